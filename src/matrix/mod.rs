//! The in-memory tabular container shared by collectors, plugins and
//! exporters.
//!
//! A `Matrix` is keyed by `(instance, metric)` and carries per-instance
//! labels, matrix-wide global labels and export filter options. Metric
//! columns are dense and addressed by instance index; `init_data`
//! (re)allocates them to the current instance count, which is expected to
//! happen once per poll cycle. Cell validity is tracked with a bitset so
//! exporters can tell "unset" from numeric zero.

use std::collections::{BTreeMap, HashMap};

use crate::errors::PollerError;

mod export_options;
mod instance;
mod metric;

pub use export_options::ExportOptions;
pub use instance::Instance;
pub use metric::{Metric, MetricType};

#[derive(Clone, Debug)]
pub struct Matrix {
    name: String,
    object: String,
    kind: String,
    is_metadata: bool,
    metadata_type: String,
    metadata_object: String,
    exportable: bool,
    metrics: Vec<Metric>,
    metric_index: HashMap<String, usize>,
    instances: Vec<Instance>,
    instance_index: HashMap<String, usize>,
    global_labels: BTreeMap<String, String>,
    export_options: ExportOptions,
    initialized: bool,
}

impl Matrix {
    /// `kind` is `""` for data matrices and `"metadata"` for metadata.
    pub fn new(name: &str, object: &str, kind: &str) -> Self {
        Self {
            name: name.to_string(),
            object: object.to_string(),
            kind: kind.to_string(),
            is_metadata: false,
            metadata_type: String::new(),
            metadata_object: String::new(),
            exportable: true,
            metrics: Vec::new(),
            metric_index: HashMap::new(),
            instances: Vec::new(),
            instance_index: HashMap::new(),
            global_labels: BTreeMap::new(),
            export_options: ExportOptions::default(),
            initialized: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn object(&self) -> &str {
        &self.object
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn set_metadata_identity(&mut self, mtype: &str, mobject: &str) {
        self.is_metadata = true;
        self.metadata_type = mtype.to_string();
        self.metadata_object = mobject.to_string();
    }

    pub fn is_metadata(&self) -> bool {
        self.is_metadata
    }

    pub fn metadata_type(&self) -> &str {
        &self.metadata_type
    }

    pub fn metadata_object(&self) -> &str {
        &self.metadata_object
    }

    pub fn is_exportable(&self) -> bool {
        self.exportable
    }

    pub fn set_exportable(&mut self, exportable: bool) {
        self.exportable = exportable;
    }

    pub fn set_export_options(&mut self, options: ExportOptions) {
        self.export_options = options;
    }

    pub fn export_options(&self) -> &ExportOptions {
        &self.export_options
    }

    pub fn set_global_label(&mut self, name: &str, value: &str) {
        self.global_labels
            .insert(name.to_string(), value.to_string());
    }

    pub fn global_labels(&self) -> &BTreeMap<String, String> {
        &self.global_labels
    }

    /// Register a float64 metric. Idempotent by key: re-adding an existing
    /// key returns its index unchanged.
    pub fn add_metric(
        &mut self,
        key: &str,
        display: &str,
        exportable: bool,
    ) -> Result<usize, PollerError> {
        self.add_metric_typed(key, display, exportable, MetricType::F64)
    }

    pub fn add_metric_typed(
        &mut self,
        key: &str,
        display: &str,
        exportable: bool,
        mtype: MetricType,
    ) -> Result<usize, PollerError> {
        if key.is_empty() {
            return Err(PollerError::InvalidParam("metric key is empty".into()));
        }
        if let Some(index) = self.metric_index.get(key) {
            return Ok(*index);
        }
        let index = self.metrics.len();
        let mut metric = Metric::new(key, display, exportable, mtype);
        // storage already initialized: grow the new column right away so
        // the column-length invariant holds without another init_data
        if self.initialized {
            metric.resize(self.instances.len());
        }
        self.metrics.push(metric);
        self.metric_index.insert(key.to_string(), index);
        Ok(index)
    }

    pub fn new_metric_u8(&mut self, key: &str) -> Result<usize, PollerError> {
        self.add_metric_typed(key, key, true, MetricType::U8)
    }

    pub fn new_metric_u32(&mut self, key: &str) -> Result<usize, PollerError> {
        self.add_metric_typed(key, key, true, MetricType::U32)
    }

    pub fn new_metric_u64(&mut self, key: &str) -> Result<usize, PollerError> {
        self.add_metric_typed(key, key, true, MetricType::U64)
    }

    pub fn new_metric_f32(&mut self, key: &str) -> Result<usize, PollerError> {
        self.add_metric_typed(key, key, true, MetricType::F32)
    }

    pub fn new_metric_f64(&mut self, key: &str) -> Result<usize, PollerError> {
        self.add_metric_typed(key, key, true, MetricType::F64)
    }

    pub fn metric(&self, key: &str) -> Option<&Metric> {
        self.metric_index.get(key).and_then(|i| self.metrics.get(*i))
    }

    pub fn metric_mut(&mut self, key: &str) -> Option<&mut Metric> {
        let index = *self.metric_index.get(key)?;
        self.metrics.get_mut(index)
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    /// Append an instance. Insertion order defines the column index;
    /// duplicate keys are rejected. No sample storage is allocated until
    /// the next `init_data`.
    pub fn add_instance(&mut self, key: &str) -> Result<usize, PollerError> {
        if key.is_empty() {
            return Err(PollerError::InvalidParam("instance key is empty".into()));
        }
        if self.instance_index.contains_key(key) {
            return Err(PollerError::InvalidParam(format!(
                "instance ({key}) already exists"
            )));
        }
        let index = self.instances.len();
        self.instances.push(Instance::new(key, index));
        self.instance_index.insert(key.to_string(), index);
        Ok(index)
    }

    pub fn instance(&self, key: &str) -> Option<&Instance> {
        self.instance_index
            .get(key)
            .and_then(|i| self.instances.get(*i))
    }

    pub fn instance_mut(&mut self, key: &str) -> Option<&mut Instance> {
        let index = *self.instance_index.get(key)?;
        self.instances.get_mut(index)
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn set_instance_label(&mut self, key: &str, name: &str, value: &str) {
        if let Some(instance) = self.instance_mut(key) {
            instance.set_label(name, value);
        }
    }

    /// Drop all instances, keeping metrics and labels. Columns are stale
    /// until the next `init_data`.
    pub fn purge_instances(&mut self) {
        self.instances.clear();
        self.instance_index.clear();
    }

    /// (Re)allocate every metric column to the current instance count and
    /// clear all validity bits. Cheap; meant to be called every poll cycle.
    pub fn init_data(&mut self) {
        let len = self.instances.len();
        for metric in &mut self.metrics {
            metric.resize(len);
        }
        self.initialized = true;
    }

    /// Clear validity bits without touching the metric or instance sets.
    pub fn reset(&mut self) {
        for metric in &mut self.metrics {
            metric.reset();
        }
    }

    fn store(&mut self, metric: &str, instance: &str, value: f64) -> Result<(), PollerError> {
        let index = *self
            .instance_index
            .get(instance)
            .ok_or_else(|| PollerError::InvalidParam(format!("no instance ({instance})")))?;
        let metric = self
            .metric_mut(metric)
            .ok_or_else(|| PollerError::InvalidParam(format!("no metric ({metric})")))?;
        metric.store(index, value)
    }

    pub fn set_value_u8(&mut self, m: &str, i: &str, v: u8) -> Result<(), PollerError> {
        self.store(m, i, f64::from(v))
    }

    pub fn set_value_u32(&mut self, m: &str, i: &str, v: u32) -> Result<(), PollerError> {
        self.store(m, i, f64::from(v))
    }

    pub fn set_value_u64(&mut self, m: &str, i: &str, v: u64) -> Result<(), PollerError> {
        self.store(m, i, v as f64)
    }

    pub fn set_value_f32(&mut self, m: &str, i: &str, v: f32) -> Result<(), PollerError> {
        self.store(m, i, f64::from(v))
    }

    pub fn set_value_f64(&mut self, m: &str, i: &str, v: f64) -> Result<(), PollerError> {
        self.store(m, i, v)
    }

    // The lazy family is a no-op when the metric or instance is absent,
    // for emitters that cannot assume the schema.

    pub fn lazy_set_value_u8(&mut self, m: &str, i: &str, v: u8) {
        let _ = self.store(m, i, f64::from(v));
    }

    pub fn lazy_set_value_u32(&mut self, m: &str, i: &str, v: u32) {
        let _ = self.store(m, i, f64::from(v));
    }

    pub fn lazy_set_value_u64(&mut self, m: &str, i: &str, v: u64) {
        let _ = self.store(m, i, v as f64);
    }

    pub fn lazy_set_value_f32(&mut self, m: &str, i: &str, v: f32) {
        let _ = self.store(m, i, f64::from(v));
    }

    pub fn lazy_set_value_f64(&mut self, m: &str, i: &str, v: f64) {
        let _ = self.store(m, i, v);
    }

    /// Cell value by keys; `None` when absent or unset.
    pub fn value(&self, metric: &str, instance: &str) -> Option<f64> {
        let index = *self.instance_index.get(instance)?;
        self.metric(metric)?.value(index)
    }

    /// Labels as exporters see them: global labels unioned with the
    /// instance's own, the instance winning on collision.
    pub fn export_labels(&self, instance: &Instance) -> BTreeMap<String, String> {
        let mut merged = self.global_labels.clone();
        for (k, v) in instance.labels() {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn sample() -> Matrix {
        let mut m = Matrix::new("unix", "System", "");
        m.add_metric("memory_used", "memory_used", true).unwrap();
        m.new_metric_u8("status").unwrap();
        m.add_instance("host-a").unwrap();
        m.add_instance("host-b").unwrap();
        m.init_data();
        m
    }

    #[test]
    fn test_column_length_matches_instances_after_init_data() {
        let m = sample();
        for metric in m.metrics() {
            assert_eq!(metric.len(), m.instance_count());
        }
    }

    #[test]
    fn test_init_data_follows_instance_set_changes() {
        let mut m = sample();
        m.add_instance("host-c").unwrap();
        m.init_data();
        for metric in m.metrics() {
            assert_eq!(metric.len(), 3);
        }
        m.purge_instances();
        m.init_data();
        for metric in m.metrics() {
            assert_eq!(metric.len(), 0);
        }
    }

    #[test]
    fn test_add_metric_idempotent_by_key() {
        let mut m = sample();
        let a = m.add_metric("memory_used", "other display", false).unwrap();
        assert_eq!(a, 0);
        assert_eq!(m.metrics().len(), 2);
        // original descriptor untouched
        assert!(m.metric("memory_used").unwrap().is_exportable());
    }

    #[test]
    fn test_metric_added_after_init_data_is_grown() {
        let mut m = sample();
        m.add_metric("swap_used", "swap_used", true).unwrap();
        assert_eq!(m.metric("swap_used").unwrap().len(), 2);
        m.set_value_f64("swap_used", "host-b", 1.5).unwrap();
        assert_eq!(m.value("swap_used", "host-b"), Some(1.5));
    }

    #[test]
    fn test_duplicate_instance_rejected() {
        let mut m = sample();
        assert!(matches!(
            m.add_instance("host-a"),
            Err(PollerError::InvalidParam(_))
        ));
    }

    #[test]
    fn test_insertion_order_defines_index() {
        let m = sample();
        assert_eq!(m.instance("host-a").unwrap().index(), 0);
        assert_eq!(m.instance("host-b").unwrap().index(), 1);
    }

    #[test]
    fn test_unset_differs_from_zero() {
        let mut m = sample();
        m.set_value_f64("memory_used", "host-a", 0.0).unwrap();
        assert_eq!(m.value("memory_used", "host-a"), Some(0.0));
        assert_eq!(m.value("memory_used", "host-b"), None);
    }

    #[test]
    fn test_reset_keeps_schema() {
        let mut m = sample();
        m.set_value_u8("status", "host-a", 2).unwrap();
        m.reset();
        assert_eq!(m.value("status", "host-a"), None);
        assert_eq!(m.metrics().len(), 2);
        assert_eq!(m.instance_count(), 2);
    }

    #[test]
    fn test_lazy_set_ignores_missing_schema() {
        let mut m = sample();
        m.lazy_set_value_f64("nope", "host-a", 1.0);
        m.lazy_set_value_f64("memory_used", "nope", 1.0);
        m.lazy_set_value_u64("memory_used", "host-a", 7);
        assert_eq!(m.value("memory_used", "host-a"), Some(7.0));
    }

    #[test]
    fn test_set_value_errors_on_missing_schema() {
        let mut m = sample();
        assert!(m.set_value_f64("nope", "host-a", 1.0).is_err());
        assert!(m.set_value_f64("memory_used", "nope", 1.0).is_err());
    }

    #[test]
    fn test_export_labels_instance_wins() {
        let mut m = sample();
        m.set_global_label("datacenter", "dc1");
        m.set_global_label("node", "global");
        m.set_instance_label("host-a", "node", "a");
        let instance = m.instance("host-a").unwrap();
        let labels = m.export_labels(instance);
        assert_eq!(labels.get("datacenter").map(String::as_str), Some("dc1"));
        assert_eq!(labels.get("node").map(String::as_str), Some("a"));
    }

    #[test]
    fn test_metadata_identity() {
        let mut m = Matrix::new("unix", "System", "metadata");
        m.set_metadata_identity("collector", "task");
        assert!(m.is_metadata());
        assert_eq!(m.metadata_type(), "collector");
        assert_eq!(m.metadata_object(), "task");
        assert_eq!(m.kind(), "metadata");
    }
}
