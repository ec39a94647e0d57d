//! pulse - a metrics polling runtime.
//!
//! One poller process monitors one target system: collectors poll the
//! target on their own schedules and produce [`matrix::Matrix`] data,
//! plugins transform it, exporters push it out. The
//! [`poller::Poller`] supervisor loads everything from config, runs one
//! task per collector and reports component and target health through
//! two metadata matrices.

pub mod cli;
pub mod collector;
pub mod collectors;
pub mod conf;
pub mod errors;
pub mod exporters;
pub mod matrix;
pub mod options;
pub mod plugins;
pub mod poller;
pub mod schedule;
