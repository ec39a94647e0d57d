//! Built-in collector classes and their compile-time registry.

use crate::collector::{Collector, CollectorState};
use crate::conf::Params;
use crate::errors::PollerError;

#[macro_use]
mod register_macro;

// THIS IS THE ONLY PLACE YOU NEED TO ADD NEW COLLECTORS
register_collectors! {
    unix => UnixCollector,
}
