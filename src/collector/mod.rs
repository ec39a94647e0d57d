//! Collector lifecycle: shared base state, default initialization and
//! the per-collector run loop.
//!
//! A collector variant implements the small [`Collector`] capability set
//! and inherits everything else from [`CollectorState`] and the free
//! functions in this module, the Rust rendition of a shared base class.
//! Task handlers are dispatched by task name through `poll`, validated
//! at init time against `task_names()`.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::conf::Params;
use crate::errors::PollerError;
use crate::exporters::Exporter;
use crate::matrix::{ExportOptions, Matrix};
use crate::options::Options;
use crate::plugins::{self, Plugin, PluginState};
use crate::schedule::{Schedule, Task};

pub const STATUS_UP: u8 = 0;
pub const STATUS_STANDBY: u8 = 1;
pub const STATUS_FAILED: u8 = 2;

pub const fn status_label(code: u8) -> &'static str {
    match code {
        0 => "up",
        1 => "standby",
        _ => "failed",
    }
}

/// Status shared between a component and the poller supervisor.
/// The owner writes, the supervisor reads.
#[derive(Debug, Default)]
pub struct StatusCell {
    code: AtomicU8,
    message: Mutex<String>,
}

impl StatusCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, code: u8, message: &str) {
        self.code.store(code, Ordering::Relaxed);
        match self.message.lock() {
            Ok(mut guard) => *guard = message.to_string(),
            Err(poisoned) => *poisoned.into_inner() = message.to_string(),
        }
    }

    /// Snapshot as (code, label, message).
    pub fn get(&self) -> (u8, &'static str, String) {
        let code = self.code.load(Ordering::Relaxed);
        let message = match self.message.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        (code, status_label(code), message)
    }
}

/// Monotonic sample counter with read-and-reset semantics.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Current count; resets to zero atomically.
    pub fn read_and_reset(&self) -> u64 {
        self.0.swap(0, Ordering::Relaxed)
    }
}

/// Base state shared by all collector variants.
pub struct CollectorState {
    pub name: String,
    pub object: String,
    pub options: Arc<Options>,
    pub params: Params,
    pub status: Arc<StatusCell>,
    pub count: Arc<Counter>,
    pub schedule: Schedule,
    pub data: Matrix,
    pub metadata: Matrix,
    pub exporters: Vec<Arc<dyn Exporter>>,
    pub plugins: Vec<Box<dyn Plugin>>,
}

impl CollectorState {
    pub fn new(name: &str, object: &str, options: Arc<Options>, params: Params) -> Self {
        Self {
            name: name.to_string(),
            object: object.to_string(),
            options,
            params,
            status: Arc::new(StatusCell::new()),
            count: Arc::new(Counter::new()),
            schedule: Schedule::new(),
            data: Matrix::new(name, object, ""),
            metadata: Matrix::new(name, object, "metadata"),
            exporters: Vec::new(),
            plugins: Vec::new(),
        }
    }
}

pub trait Collector: Send {
    fn state(&self) -> &CollectorState;

    fn state_mut(&mut self) -> &mut CollectorState;

    /// Task names this collector has handlers for; `schedule` config
    /// entries are validated against this set at init.
    fn task_names(&self) -> &'static [&'static str];

    fn init(&mut self) -> Result<(), PollerError>;

    /// Run one named task, returning its data Matrix if it produced one.
    fn poll<'a>(
        &'a mut self,
        task: &'a str,
    ) -> BoxFuture<'a, Result<Option<Matrix>, PollerError>>;

    fn name(&self) -> &str {
        &self.state().name
    }

    fn object(&self) -> &str {
        &self.state().object
    }

    fn status(&self) -> (u8, &'static str, String) {
        self.state().status.get()
    }

    fn set_status(&self, code: u8, message: &str) {
        self.state().status.set(code, message);
    }

    fn add_count(&self, n: u64) {
        self.state().count.add(n);
    }

    fn collect_count(&self) -> u64 {
        self.state().count.read_and_reset()
    }

    /// Exporter names requested by this collector's parameters.
    fn wanted_exporters(&self) -> Vec<String> {
        self.state().params.child_list("exporters")
    }

    fn link_exporter(&mut self, exporter: Arc<dyn Exporter>) {
        self.state_mut().exporters.push(exporter);
    }
}

/// Shared initialization, called by concrete collectors from their own
/// `init`. Builds the schedule, the data Matrix, plugins and the
/// metadata Matrix out of the collector's parameters.
pub fn init(c: &mut dyn Collector) -> Result<(), PollerError> {
    let params = c.state().params.clone();
    let name = c.state().name.clone();
    let object = c.state().object.clone();
    let options = Arc::clone(&c.state().options);
    let known_tasks = c.task_names();

    let mut entries = params.child_pairs("schedule");
    if entries.is_empty() {
        return Err(PollerError::MissingParam("schedule".into()));
    }
    // "data" always runs last so discovery tasks populate the schema first
    entries.sort_by_key(|(task, _)| task == "data");

    let mut schedule = Schedule::new();
    for (task, interval) in &entries {
        if !known_tasks.contains(&task.as_str()) {
            return Err(PollerError::Implement(format!(
                "no poll handler for task ({task})"
            )));
        }
        schedule
            .add_task(task, interval)
            .map_err(|e| PollerError::InvalidParam(format!("schedule ({task}): {e}")))?;
    }

    let mut data = Matrix::new(&name, &object, "");
    if let Some(export_options) = params.child("export_options") {
        data.set_export_options(ExportOptions::from_params(&export_options)?);
    }
    if let Some(datacenter) = params.child_string("datacenter") {
        data.set_global_label("datacenter", &datacenter);
    }
    for (key, value) in params.child_pairs("global_labels") {
        data.set_global_label(&key, &value);
    }
    if params.child_is_false("export_data") {
        data.set_exportable(false);
    }

    let mut loaded: Vec<Box<dyn Plugin>> = Vec::new();
    for plugin_name in params.child_list("plugins") {
        let plugin_params = params
            .child("plugins")
            .and_then(|p| p.child(&plugin_name))
            .unwrap_or_default();
        let state = PluginState::new(&name, &plugin_name, plugin_params, params.clone());
        let mut plugin = plugins::new_plugin(&plugin_name, state)?;
        plugin
            .init()
            .map_err(|e| PollerError::Dload(format!("plugin ({plugin_name}): {e}")))?;
        debug!(collector = %name, plugin = %plugin_name, "loaded plugin");
        loaded.push(plugin);
    }

    let mut metadata = Matrix::new(&name, &object, "metadata");
    metadata.set_metadata_identity("collector", "task");
    metadata.set_global_label("hostname", &options.hostname);
    metadata.set_global_label("version", &options.version);
    metadata.set_global_label("poller", &options.poller);
    metadata.set_global_label("collector", &name);
    metadata.set_global_label("object", &object);
    metadata.add_metric("poll_time", "poll_time", true)?;
    metadata.add_metric("api_time", "api_time", true)?;
    metadata.add_metric("parse_time", "parse_time", true)?;
    metadata.add_metric("calc_time", "calc_time", true)?;
    metadata.new_metric_u64("count")?;
    // each scheduled task is one metadata instance
    for task in schedule.tasks() {
        metadata.add_instance(task.name())?;
        metadata.set_instance_label(task.name(), "task", task.name());
        metadata.set_instance_label(
            task.name(),
            "interval",
            &format!("{:.4}", task.interval().as_secs_f64()),
        );
    }
    metadata.init_data();

    let state = c.state_mut();
    state.schedule = schedule;
    state.data = data;
    state.metadata = metadata;
    state.plugins = loaded;
    c.set_status(STATUS_UP, "initialized");

    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    Continue,
    Fatal,
}

/// The collector task: poll forever until a fatal error.
pub async fn run(mut collector: Box<dyn Collector>) {
    let name = collector.name().to_string();
    let object = collector.object().to_string();
    let mut retry_delay: u64 = 1;
    collector.set_status(STATUS_UP, "running");
    loop {
        if run_cycle(collector.as_mut(), &mut retry_delay).await == CycleOutcome::Fatal {
            let (_, status, message) = collector.status();
            error!(collector = %name, object = %object, status, message = %message, "collector terminated");
            return;
        }
        debug!(collector = %name, object = %object, "sleeping until next poll");
        collector.state().schedule.sleep().await;
    }
}

/// One poll cycle: run due tasks in order, classify errors, fan out to
/// plugins after the `"data"` task and hand results to the exporters.
///
/// `retry_delay` carries the connection backoff across cycles:
/// quadrupled on every connection error, capped at 1024 seconds, reset
/// to one on recovery.
pub async fn run_cycle(c: &mut dyn Collector, retry_delay: &mut u64) -> CycleOutcome {
    let name = c.name().to_string();
    let object = c.object().to_string();

    c.state_mut().metadata.init_data();

    let mut results: Vec<Matrix> = Vec::new();
    let task_names: Vec<String> = c
        .state()
        .schedule
        .task_names()
        .iter()
        .map(ToString::to_string)
        .collect();

    for task_name in task_names {
        if !c
            .state()
            .schedule
            .get_task(&task_name)
            .is_some_and(Task::is_due)
        {
            continue;
        }

        let started = Instant::now();
        let polled = c.poll(&task_name).await;
        let runtime = started.elapsed();
        c.state_mut().schedule.record_run(&task_name, started, runtime);

        match polled {
            Err(err) => {
                let was_standby = c.state().schedule.is_standby();
                match err {
                    PollerError::Connection(_) => {
                        if *retry_delay < 1024 {
                            *retry_delay *= 4;
                        }
                        if !was_standby {
                            error!(collector = %name, object = %object, error = %err, "poll failed");
                            error!(
                                collector = %name,
                                object = %object,
                                retry_in_s = *retry_delay,
                                "target system unreachable, entering standby mode"
                            );
                        }
                        c.state_mut()
                            .schedule
                            .set_standby(&task_name, Duration::from_secs(*retry_delay));
                        c.set_status(STATUS_STANDBY, err.class());
                    }
                    PollerError::NoInstance(_) => {
                        c.state_mut()
                            .schedule
                            .set_standby(&task_name, Duration::from_secs(5 * 60));
                        c.set_status(STATUS_STANDBY, err.class());
                        error!(
                            collector = %name,
                            object = %object,
                            "no instances on target system, entering standby mode"
                        );
                    }
                    PollerError::NoMetric(_) => {
                        c.state_mut()
                            .schedule
                            .set_standby(&task_name, Duration::from_secs(60 * 60));
                        c.set_status(STATUS_STANDBY, err.class());
                        error!(
                            collector = %name,
                            object = %object,
                            "no metrics on target system, entering standby mode"
                        );
                    }
                    other => {
                        error!(collector = %name, object = %object, error = %other, "fatal poll error");
                        c.set_status(STATUS_FAILED, other.class());
                        return CycleOutcome::Fatal;
                    }
                }
                // don't run later tasks this cycle; they would observe an
                // inconsistent instance set
                break;
            }
            Ok(data) => {
                if c.state().schedule.is_standby() {
                    c.state_mut().schedule.recover();
                    c.set_status(STATUS_UP, "running");
                    *retry_delay = 1;
                    info!(
                        collector = %name,
                        object = %object,
                        "recovered from standby mode, back to normal schedule"
                    );
                }
                c.state_mut().metadata.lazy_set_value_f64(
                    "poll_time",
                    &task_name,
                    runtime.as_micros() as f64,
                );

                if let Some(data) = data {
                    results.push(data);
                    if task_name == "data" {
                        let state = c.state_mut();
                        let mut extra: Vec<Matrix> = Vec::new();
                        if let Some(data) = results.last_mut() {
                            for plugin in &mut state.plugins {
                                match plugin.run(data) {
                                    Ok(Some(list)) => {
                                        debug!(
                                            collector = %name,
                                            plugin = plugin.name(),
                                            added = list.len(),
                                            "plugin added data"
                                        );
                                        extra.extend(list);
                                    }
                                    Ok(None) => {
                                        debug!(collector = %name, plugin = plugin.name(), "plugin completed");
                                    }
                                    Err(e) => {
                                        error!(
                                            collector = %name,
                                            plugin = plugin.name(),
                                            error = %e,
                                            "plugin failed"
                                        );
                                    }
                                }
                            }
                        }
                        results.extend(extra);
                    }
                }
            }
        }
    }

    debug!(collector = %name, object = %object, count = results.len(), "exporting collected data");

    let exporters: Vec<Arc<dyn Exporter>> = c.state().exporters.clone();
    for exporter in &exporters {
        let (code, _, _) = exporter.status();
        if code != STATUS_UP {
            warn!(collector = %name, exporter = exporter.name(), "exporter down, skipping export");
            continue;
        }
        // metadata failures may be specific to metadata; keep pushing data
        if let Err(e) = exporter.export(&c.state().metadata) {
            warn!(collector = %name, exporter = exporter.name(), error = %e, "export metadata");
        }
        for data in &results {
            if data.is_exportable() {
                if let Err(e) = exporter.export(data) {
                    error!(collector = %name, exporter = exporter.name(), error = %e, "export data");
                    break;
                }
            }
        }
    }

    CycleOutcome::Continue
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::collections::VecDeque;
    use tokio::time::advance;

    #[derive(Clone)]
    enum Step {
        Data,
        Empty,
        Connection,
        NoInstance,
        NoMetric,
        Broken,
    }

    struct ScriptedCollector {
        state: CollectorState,
        steps: VecDeque<Step>,
    }

    impl ScriptedCollector {
        fn new(params_yaml: &str, steps: Vec<Step>) -> Self {
            let params = Params::from_yaml(params_yaml).unwrap();
            Self {
                state: CollectorState::new(
                    "fake",
                    "obj",
                    Arc::new(Options::new("test")),
                    params,
                ),
                steps: steps.into(),
            }
        }
    }

    impl Collector for ScriptedCollector {
        fn state(&self) -> &CollectorState {
            &self.state
        }

        fn state_mut(&mut self) -> &mut CollectorState {
            &mut self.state
        }

        fn task_names(&self) -> &'static [&'static str] {
            &["instance", "data"]
        }

        fn init(&mut self) -> Result<(), PollerError> {
            crate::collector::init(self)
        }

        fn poll<'a>(
            &'a mut self,
            task: &'a str,
        ) -> BoxFuture<'a, Result<Option<Matrix>, PollerError>> {
            Box::pin(async move {
                if task != "data" {
                    return Ok(None);
                }
                match self.steps.pop_front() {
                    Some(Step::Data) | None => Ok(Some(self.state.data.clone())),
                    Some(Step::Empty) => Ok(None),
                    Some(Step::Connection) => Err(PollerError::Connection("refused".into())),
                    Some(Step::NoInstance) => Err(PollerError::NoInstance("none".into())),
                    Some(Step::NoMetric) => Err(PollerError::NoMetric("none".into())),
                    Some(Step::Broken) => Err(PollerError::Config("boom".into())),
                }
            })
        }
    }

    struct RecordingExporter {
        state: crate::exporters::ExporterState,
        received: Mutex<Vec<(String, String)>>,
    }

    impl RecordingExporter {
        fn new() -> Arc<Self> {
            let state = crate::exporters::ExporterState::new(
                "recorder",
                "r1",
                Arc::new(Options::new("test")),
                Params::default(),
            );
            state.status.set(STATUS_UP, "running");
            Arc::new(Self {
                state,
                received: Mutex::new(Vec::new()),
            })
        }

        fn received(&self) -> Vec<(String, String)> {
            self.received.lock().unwrap().clone()
        }
    }

    impl Exporter for RecordingExporter {
        fn name(&self) -> &str {
            &self.state.name
        }

        fn class(&self) -> &str {
            &self.state.class
        }

        fn export(&self, data: &Matrix) -> Result<(), PollerError> {
            self.received
                .lock()
                .unwrap()
                .push((data.object().to_string(), data.kind().to_string()));
            self.state.count.add(1);
            Ok(())
        }

        fn status(&self) -> (u8, &'static str, String) {
            self.state.status.get()
        }

        fn export_count(&self) -> u64 {
            self.state.count.read_and_reset()
        }
    }

    struct FanOutPlugin;

    impl Plugin for FanOutPlugin {
        fn name(&self) -> &str {
            "fanout"
        }

        fn run(&mut self, data: &mut Matrix) -> Result<Option<Vec<Matrix>>, PollerError> {
            Ok(Some(vec![
                Matrix::new(data.name(), "extra_a", ""),
                Matrix::new(data.name(), "extra_b", ""),
            ]))
        }
    }

    struct FailingPlugin;

    impl Plugin for FailingPlugin {
        fn name(&self) -> &str {
            "failing"
        }

        fn run(&mut self, _data: &mut Matrix) -> Result<Option<Vec<Matrix>>, PollerError> {
            Err(PollerError::InvalidParam("nope".into()))
        }
    }

    const TWO_TASKS: &str = "schedule:\n  instance: 10s\n  data: 30s\n";
    const DATA_ONLY: &str = "schedule:\n  data: 30s\n";

    fn prepared(yaml: &str, steps: Vec<Step>) -> ScriptedCollector {
        let mut c = ScriptedCollector::new(yaml, steps);
        c.init().unwrap();
        let data = &mut c.state.data;
        data.add_metric("value", "value", true).unwrap();
        data.add_instance("i1").unwrap();
        data.init_data();
        data.set_value_f64("value", "i1", 1.0).unwrap();
        c
    }

    #[test]
    fn test_counter_read_and_reset_idempotent() {
        let counter = Counter::new();
        counter.add(3);
        counter.add(4);
        assert_eq!(counter.read_and_reset(), 7);
        assert_eq!(counter.read_and_reset(), 0);
    }

    #[test]
    fn test_status_cell_snapshot() {
        let cell = StatusCell::new();
        cell.set(STATUS_STANDBY, "connection");
        assert_eq!(cell.get(), (1, "standby", "connection".to_string()));
    }

    #[test]
    fn test_init_requires_schedule() {
        let mut c = ScriptedCollector::new("{}", vec![]);
        assert!(matches!(c.init(), Err(PollerError::MissingParam(_))));
    }

    #[test]
    fn test_init_rejects_unknown_task() {
        let mut c = ScriptedCollector::new("schedule:\n  bogus: 10s\n", vec![]);
        assert!(matches!(c.init(), Err(PollerError::Implement(_))));
    }

    #[test]
    fn test_init_rejects_bad_interval() {
        let mut c = ScriptedCollector::new("schedule:\n  data: 0s\n", vec![]);
        assert!(matches!(c.init(), Err(PollerError::InvalidParam(_))));
    }

    #[test]
    fn test_init_orders_data_task_last() {
        let mut c =
            ScriptedCollector::new("schedule:\n  data: 30s\n  instance: 10s\n", vec![]);
        c.init().unwrap();
        assert_eq!(c.state.schedule.task_names(), vec!["instance", "data"]);
    }

    #[test]
    fn test_init_builds_metadata_per_task() {
        let mut c = ScriptedCollector::new(TWO_TASKS, vec![]);
        c.init().unwrap();
        let md = &c.state.metadata;
        assert!(md.is_metadata());
        assert_eq!(md.instance_count(), 2);
        let data_instance = md.instance("data").unwrap();
        assert_eq!(data_instance.label("task"), Some("data"));
        assert_eq!(data_instance.label("interval"), Some("30.0000"));
        for key in ["poll_time", "api_time", "parse_time", "calc_time", "count"] {
            assert!(md.metric(key).is_some());
        }
        let (code, label, message) = c.status();
        assert_eq!((code, label), (STATUS_UP, "up"));
        assert_eq!(message, "initialized");
    }

    #[test]
    fn test_init_applies_data_matrix_config() {
        let yaml = "schedule:\n  data: 30s\ndatacenter: dc7\nglobal_labels:\n  org: acme\nexport_data: False\nexport_options:\n  instance_key: False\n";
        let mut c = ScriptedCollector::new(yaml, vec![]);
        c.init().unwrap();
        let data = &c.state.data;
        assert!(!data.is_exportable());
        assert!(!data.export_options().promotes_instance_key());
        assert_eq!(
            data.global_labels().get("datacenter").map(String::as_str),
            Some("dc7")
        );
        assert_eq!(
            data.global_labels().get("org").map(String::as_str),
            Some("acme")
        );
    }

    #[test]
    fn test_init_loads_plugins() {
        let yaml =
            "schedule:\n  data: 30s\nplugins:\n  aggregator:\n    labels: [name]\n";
        let mut c = ScriptedCollector::new(yaml, vec![]);
        c.init().unwrap();
        assert_eq!(c.state.plugins.len(), 1);
        assert_eq!(c.state.plugins[0].name(), "aggregator");
    }

    #[test]
    fn test_init_fails_on_unknown_plugin() {
        let yaml = "schedule:\n  data: 30s\nplugins: [bogus]\n";
        let mut c = ScriptedCollector::new(yaml, vec![]);
        assert!(matches!(c.init(), Err(PollerError::Dload(_))));
    }

    #[test]
    fn test_wanted_exporters() {
        let c = ScriptedCollector::new("exporters: [f1, f2]\n", vec![]);
        assert_eq!(c.wanted_exporters(), vec!["f1", "f2"]);
    }

    #[tokio::test]
    async fn test_single_cycle_happy_path() {
        let mut c = prepared(TWO_TASKS, vec![Step::Data]);
        let recorder = RecordingExporter::new();
        c.link_exporter(recorder.clone());
        let mut retry = 1u64;

        let outcome = run_cycle(&mut c, &mut retry).await;
        assert_eq!(outcome, CycleOutcome::Continue);

        // exactly metadata + data, in that order
        let received = recorder.received();
        assert_eq!(
            received,
            vec![
                ("obj".to_string(), "metadata".to_string()),
                ("obj".to_string(), String::new()),
            ]
        );
        let poll_time = c.state.metadata.value("poll_time", "data").unwrap();
        assert!(poll_time >= 0.0 && poll_time.is_finite());
        assert!(c.state.metadata.value("poll_time", "instance").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_backoff_delays() {
        let mut c = prepared(
            DATA_ONLY,
            vec![
                Step::Connection,
                Step::Connection,
                Step::Connection,
                Step::Connection,
            ],
        );
        let mut retry = 1u64;
        for expected in [4u64, 16, 64, 256] {
            run_cycle(&mut c, &mut retry).await;
            let task = c.state.schedule.get_task("data").unwrap();
            assert_eq!(task.standby_delay(), Some(Duration::from_secs(expected)));
            let (code, label, message) = c.status();
            assert_eq!((code, label), (STATUS_STANDBY, "standby"));
            assert_eq!(message, "connection");
            advance(Duration::from_secs(expected)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_backoff_caps_at_1024() {
        let mut c = prepared(DATA_ONLY, vec![Step::Connection; 7]);
        let mut retry = 1u64;
        for _ in 0..7 {
            run_cycle(&mut c, &mut retry).await;
            let delay = c
                .state
                .schedule
                .get_task("data")
                .unwrap()
                .standby_delay()
                .unwrap();
            advance(delay).await;
        }
        assert_eq!(retry, 1024);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_resets_backoff() {
        let mut c = prepared(DATA_ONLY, vec![Step::Connection, Step::Data]);
        let mut retry = 1u64;
        run_cycle(&mut c, &mut retry).await;
        assert!(c.state.schedule.is_standby());
        advance(Duration::from_secs(4)).await;
        run_cycle(&mut c, &mut retry).await;
        assert!(!c.state.schedule.is_standby());
        assert_eq!(retry, 1);
        let (code, _, message) = c.status();
        assert_eq!(code, STATUS_UP);
        assert_eq!(message, "running");
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_instance_standby_is_five_minutes() {
        let mut c = prepared(DATA_ONLY, vec![Step::NoInstance]);
        let mut retry = 1u64;
        run_cycle(&mut c, &mut retry).await;
        let task = c.state.schedule.get_task("data").unwrap();
        assert_eq!(task.standby_delay(), Some(Duration::from_secs(300)));
        assert!(task.next_due() >= Instant::now() + Duration::from_secs(299));
        let (code, _, message) = c.status();
        assert_eq!(code, STATUS_STANDBY);
        assert_eq!(message, "no instance");
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_metric_standby_is_one_hour() {
        let mut c = prepared(DATA_ONLY, vec![Step::NoMetric]);
        let mut retry = 1u64;
        run_cycle(&mut c, &mut retry).await;
        let task = c.state.schedule.get_task("data").unwrap();
        assert_eq!(task.standby_delay(), Some(Duration::from_secs(3600)));
        assert_eq!(c.status().2, "no metric");
    }

    #[tokio::test]
    async fn test_other_errors_are_fatal() {
        let mut c = prepared(DATA_ONLY, vec![Step::Broken]);
        let mut retry = 1u64;
        let outcome = run_cycle(&mut c, &mut retry).await;
        assert_eq!(outcome, CycleOutcome::Fatal);
        let (code, label, message) = c.status();
        assert_eq!((code, label), (STATUS_FAILED, "failed"));
        assert_eq!(message, "config");
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_skips_later_tasks() {
        // "instance" errors before "data" runs: nothing is polled after it
        struct OrderProbe {
            state: CollectorState,
            polled: Vec<String>,
        }
        impl Collector for OrderProbe {
            fn state(&self) -> &CollectorState {
                &self.state
            }
            fn state_mut(&mut self) -> &mut CollectorState {
                &mut self.state
            }
            fn task_names(&self) -> &'static [&'static str] {
                &["instance", "data"]
            }
            fn init(&mut self) -> Result<(), PollerError> {
                crate::collector::init(self)
            }
            fn poll<'a>(
                &'a mut self,
                task: &'a str,
            ) -> BoxFuture<'a, Result<Option<Matrix>, PollerError>> {
                Box::pin(async move {
                    self.polled.push(task.to_string());
                    if task == "instance" {
                        Err(PollerError::Connection("refused".into()))
                    } else {
                        Ok(None)
                    }
                })
            }
        }
        let mut c = OrderProbe {
            state: CollectorState::new(
                "fake",
                "obj",
                Arc::new(Options::new("test")),
                Params::from_yaml(TWO_TASKS).unwrap(),
            ),
            polled: Vec::new(),
        };
        c.init().unwrap();
        let mut retry = 1u64;
        run_cycle(&mut c, &mut retry).await;
        assert_eq!(c.polled, vec!["instance"]);
    }

    #[tokio::test]
    async fn test_plugin_fan_out_order() {
        let mut c = prepared(DATA_ONLY, vec![Step::Data]);
        c.state.plugins.push(Box::new(FanOutPlugin));
        let recorder = RecordingExporter::new();
        c.link_exporter(recorder.clone());
        let mut retry = 1u64;
        run_cycle(&mut c, &mut retry).await;
        assert_eq!(
            recorder.received(),
            vec![
                ("obj".to_string(), "metadata".to_string()),
                ("obj".to_string(), String::new()),
                ("extra_a".to_string(), String::new()),
                ("extra_b".to_string(), String::new()),
            ]
        );
    }

    #[tokio::test]
    async fn test_plugin_errors_do_not_fail_cycle() {
        let mut c = prepared(DATA_ONLY, vec![Step::Data]);
        c.state.plugins.push(Box::new(FailingPlugin));
        let recorder = RecordingExporter::new();
        c.link_exporter(recorder.clone());
        let mut retry = 1u64;
        let outcome = run_cycle(&mut c, &mut retry).await;
        assert_eq!(outcome, CycleOutcome::Continue);
        assert_eq!(recorder.received().len(), 2);
        assert_eq!(c.status().0, STATUS_UP);
    }

    #[tokio::test]
    async fn test_down_exporter_is_skipped() {
        let mut c = prepared(DATA_ONLY, vec![Step::Data]);
        let recorder = RecordingExporter::new();
        recorder.state.status.set(STATUS_FAILED, "write failed");
        c.link_exporter(recorder.clone());
        let mut retry = 1u64;
        run_cycle(&mut c, &mut retry).await;
        assert!(recorder.received().is_empty());
    }

    #[tokio::test]
    async fn test_unexportable_data_not_pushed() {
        let yaml = "schedule:\n  data: 30s\nexport_data: False\n";
        let mut c = prepared(yaml, vec![Step::Data]);
        let recorder = RecordingExporter::new();
        c.link_exporter(recorder.clone());
        let mut retry = 1u64;
        run_cycle(&mut c, &mut retry).await;
        // metadata only
        assert_eq!(
            recorder.received(),
            vec![("obj".to_string(), "metadata".to_string())]
        );
    }

    #[tokio::test]
    async fn test_empty_poll_produces_no_data() {
        let mut c = prepared(DATA_ONLY, vec![Step::Empty]);
        let recorder = RecordingExporter::new();
        c.link_exporter(recorder.clone());
        let mut retry = 1u64;
        run_cycle(&mut c, &mut retry).await;
        assert_eq!(recorder.received().len(), 1);
    }
}
