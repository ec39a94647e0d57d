//! Transformation plugins.
//!
//! A plugin runs synchronously on the collector's task right after the
//! `"data"` poll. It may mutate the passed Matrix in place (derived
//! labels and the like) and return `None`, or return additional
//! matrices (splits, aggregations). Plugin failures are logged by the
//! collector run loop and never fail the poll cycle.

use crate::conf::Params;
use crate::errors::PollerError;
use crate::matrix::Matrix;

mod aggregator;

pub use aggregator::Aggregator;

/// Shared base state handed to every plugin constructor.
#[derive(Clone, Debug)]
pub struct PluginState {
    /// Name of the owning collector.
    pub parent: String,
    /// Plugin name as configured.
    pub name: String,
    /// The plugin's own parameter subtree.
    pub params: Params,
    /// Full parameters of the owning collector.
    pub parent_params: Params,
}

impl PluginState {
    pub fn new(parent: &str, name: &str, params: Params, parent_params: Params) -> Self {
        Self {
            parent: parent.to_string(),
            name: name.to_string(),
            params,
            parent_params,
        }
    }
}

pub trait Plugin: Send {
    fn name(&self) -> &str;

    /// Class name in the registry; equal to `name` unless a plugin is
    /// configured under an alias.
    fn class(&self) -> &str {
        self.name()
    }

    fn init(&mut self) -> Result<(), PollerError> {
        Ok(())
    }

    /// Transform `data`; any returned matrices are appended to the
    /// cycle's export set. Implementations must not retain references
    /// to `data` past the call.
    fn run(&mut self, data: &mut Matrix) -> Result<Option<Vec<Matrix>>, PollerError>;
}

/// Resolve a plugin class name to a constructor. The registry is the
/// only place plugins are identified by string.
pub fn new_plugin(class: &str, state: PluginState) -> Result<Box<dyn Plugin>, PollerError> {
    match class.to_ascii_lowercase().as_str() {
        "aggregator" => Ok(Box::new(Aggregator::new(state))),
        other => Err(PollerError::Dload(format!(
            "plugin ({other}) not in registry"
        ))),
    }
}
