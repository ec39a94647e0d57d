//! Outbound sinks.
//!
//! An exporter consumes Matrix snapshots and serializes them to an
//! external system. `export` is synchronous and must be safe to call
//! concurrently from multiple collector tasks; the core never serializes
//! exports across collectors, so implementations lock internally.

use std::sync::Arc;

use crate::collector::{Counter, StatusCell};
use crate::conf::Params;
use crate::errors::PollerError;
use crate::matrix::Matrix;
use crate::options::Options;

mod file;

pub use file::FileExporter;

/// Shared base state for exporter implementations.
pub struct ExporterState {
    /// Exporter class, e.g. `file`.
    pub class: String,
    /// Instance name as configured under `exporters:`.
    pub name: String,
    pub options: Arc<Options>,
    pub params: Params,
    pub status: StatusCell,
    pub count: Counter,
}

impl ExporterState {
    pub fn new(class: &str, name: &str, options: Arc<Options>, params: Params) -> Self {
        Self {
            class: class.to_string(),
            name: name.to_string(),
            options,
            params,
            status: StatusCell::new(),
            count: Counter::new(),
        }
    }
}

pub trait Exporter: Send + Sync {
    fn name(&self) -> &str;

    fn class(&self) -> &str;

    fn init(&mut self) -> Result<(), PollerError> {
        Ok(())
    }

    /// Serialize one Matrix snapshot. Called concurrently from collector
    /// tasks and from the poller supervisor.
    fn export(&self, data: &Matrix) -> Result<(), PollerError>;

    /// Atomic status snapshot: (code, label, message).
    fn status(&self) -> (u8, &'static str, String);

    /// Matrices exported since the last call (read-and-reset).
    fn export_count(&self) -> u64;
}

pub const EXPORTER_CLASSES: &[&str] = &["file"];

/// Resolve an exporter class name to a constructor. The registry is the
/// only place exporters are identified by string.
pub fn new_exporter(class: &str, state: ExporterState) -> Result<Box<dyn Exporter>, PollerError> {
    match class.to_ascii_lowercase().as_str() {
        "file" => Ok(Box::new(FileExporter::new(state))),
        other => Err(PollerError::Dload(format!(
            "exporter ({other}) not in registry"
        ))),
    }
}
