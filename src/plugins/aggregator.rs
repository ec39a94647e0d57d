use tracing::debug;

use crate::errors::PollerError;
use crate::matrix::Matrix;
use crate::plugins::{Plugin, PluginState};

/// Re-aggregates a data Matrix along instance labels.
///
/// For every configured label, instances sharing a label value are
/// summed into one instance of a new Matrix named
/// `<object>_<label>`. Cells that were never set do not contribute.
pub struct Aggregator {
    state: PluginState,
    labels: Vec<String>,
}

impl Aggregator {
    pub fn new(state: PluginState) -> Self {
        let labels = state.params.child_list("labels");
        Self { state, labels }
    }

    fn aggregate(&self, data: &Matrix, label: &str) -> Result<Matrix, PollerError> {
        let object = format!("{}_{}", data.object(), label);
        let mut out = Matrix::new(data.name(), &object, "");
        for (k, v) in data.global_labels() {
            out.set_global_label(k, v);
        }
        for metric in data.metrics() {
            out.add_metric_typed(
                metric.key(),
                metric.display_name(),
                metric.is_exportable(),
                metric.metric_type(),
            )?;
        }
        for instance in data.instances() {
            if let Some(group) = instance.label(label) {
                if out.instance(group).is_none() {
                    out.add_instance(group)?;
                    out.set_instance_label(group, label, group);
                }
            }
        }
        out.init_data();
        for metric in data.metrics() {
            for instance in data.instances() {
                let Some(group) = instance.label(label) else {
                    continue;
                };
                if let Some(value) = metric.value(instance.index()) {
                    let sum = out.value(metric.key(), group).unwrap_or(0.0) + value;
                    out.set_value_f64(metric.key(), group, sum)?;
                }
            }
        }
        Ok(out)
    }
}

impl Plugin for Aggregator {
    fn name(&self) -> &str {
        &self.state.name
    }

    fn init(&mut self) -> Result<(), PollerError> {
        if self.labels.is_empty() {
            return Err(PollerError::MissingParam(format!(
                "plugin ({}): labels",
                self.state.name
            )));
        }
        Ok(())
    }

    fn run(&mut self, data: &mut Matrix) -> Result<Option<Vec<Matrix>>, PollerError> {
        let mut out = Vec::with_capacity(self.labels.len());
        for label in &self.labels {
            let aggregated = self.aggregate(data, label)?;
            debug!(
                collector = %self.state.parent,
                label = %label,
                instances = aggregated.instance_count(),
                "aggregated matrix"
            );
            out.push(aggregated);
        }
        Ok(Some(out))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::conf::Params;

    fn plugin(labels_yaml: &str) -> Aggregator {
        let params = Params::from_yaml(labels_yaml).unwrap();
        Aggregator::new(PluginState::new(
            "unix",
            "aggregator",
            params,
            Params::default(),
        ))
    }

    fn data() -> Matrix {
        let mut m = Matrix::new("unix", "Process", "");
        m.set_global_label("datacenter", "dc1");
        m.add_metric("memory_rss", "memory_rss", true).unwrap();
        m.add_instance("101").unwrap();
        m.set_instance_label("101", "name", "pulse");
        m.add_instance("102").unwrap();
        m.set_instance_label("102", "name", "pulse");
        m.add_instance("103").unwrap();
        m.set_instance_label("103", "name", "sshd");
        m.init_data();
        m.set_value_f64("memory_rss", "101", 10.0).unwrap();
        m.set_value_f64("memory_rss", "102", 5.0).unwrap();
        m.set_value_f64("memory_rss", "103", 7.0).unwrap();
        m
    }

    #[test]
    fn test_init_requires_labels() {
        let mut p = plugin("{}");
        assert!(matches!(p.init(), Err(PollerError::MissingParam(_))));
        let mut p = plugin("labels: [name]");
        assert!(p.init().is_ok());
    }

    #[test]
    fn test_sums_by_label_value() {
        let mut p = plugin("labels: [name]");
        p.init().unwrap();
        let mut d = data();
        let out = p.run(&mut d).unwrap().unwrap();
        assert_eq!(out.len(), 1);
        let agg = &out[0];
        assert_eq!(agg.object(), "Process_name");
        assert_eq!(agg.instance_count(), 2);
        assert_eq!(agg.value("memory_rss", "pulse"), Some(15.0));
        assert_eq!(agg.value("memory_rss", "sshd"), Some(7.0));
        // global labels carried over
        assert_eq!(
            agg.global_labels().get("datacenter").map(String::as_str),
            Some("dc1")
        );
    }

    #[test]
    fn test_unset_cells_do_not_contribute() {
        let mut p = plugin("labels: [name]");
        p.init().unwrap();
        let mut d = data();
        d.reset();
        d.set_value_f64("memory_rss", "101", 3.0).unwrap();
        let out = p.run(&mut d).unwrap().unwrap();
        assert_eq!(out[0].value("memory_rss", "pulse"), Some(3.0));
        assert_eq!(out[0].value("memory_rss", "sshd"), None);
    }

    #[test]
    fn test_one_matrix_per_label() {
        let mut p = plugin("labels: [name, missing]");
        p.init().unwrap();
        let mut d = data();
        let out = p.run(&mut d).unwrap().unwrap();
        assert_eq!(out.len(), 2);
        // nothing carries the second label: empty but well-formed matrix
        assert_eq!(out[1].instance_count(), 0);
    }
}
