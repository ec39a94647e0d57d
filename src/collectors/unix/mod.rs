//! Local host collector.
//!
//! Polls the machine the poller runs on through `sysinfo`, standing in
//! for a remote appliance client. Two objects:
//!
//! - `System`: one instance (the host) with memory, swap, load and
//!   uptime gauges;
//! - `Process`: one instance per process whose name contains the
//!   `search` parameter (the poller's own process when unset), with
//!   cpu/memory/lifetime gauges. Processes that exit between the
//!   instance and data polls simply leave their cells unset.

use futures::future::BoxFuture;
use sysinfo::{Pid, System};
use tokio::time::Instant;
use tracing::debug;

use crate::collector::{self, Collector, CollectorState};
use crate::errors::PollerError;
use crate::matrix::{Matrix, MetricType};

pub struct UnixCollector {
    state: CollectorState,
    system: System,
}

const SYSTEM_METRICS: &[(&str, MetricType)] = &[
    ("memory_total", MetricType::U64),
    ("memory_used", MetricType::U64),
    ("memory_available", MetricType::U64),
    ("swap_total", MetricType::U64),
    ("swap_used", MetricType::U64),
    ("uptime", MetricType::U64),
    ("cpus", MetricType::U32),
    ("load_1m", MetricType::F64),
    ("load_5m", MetricType::F64),
    ("load_15m", MetricType::F64),
];

const PROCESS_METRICS: &[(&str, MetricType)] = &[
    ("cpu", MetricType::F32),
    ("memory_rss", MetricType::U64),
    ("memory_virtual", MetricType::U64),
    ("run_time", MetricType::U64),
    ("start_time", MetricType::U64),
];

impl UnixCollector {
    pub const TEMPLATE: &'static str = "\
schedule:
  instance: 300s
  data: 60s
objects:
  - System
  - Process
";

    pub fn new(state: CollectorState) -> Self {
        Self {
            state,
            system: System::new(),
        }
    }

    fn host_key(&self) -> String {
        self.state.options.hostname.clone()
    }

    /// Processes matching the `search` parameter, the poller's own
    /// process when none is configured. Sorted by pid for stable
    /// instance order.
    fn matching_processes(&self) -> Vec<(u32, String)> {
        let own_pid = std::process::id();
        let search = self.state.params.child_string("search");
        let mut found: Vec<(u32, String)> = self
            .system
            .processes()
            .iter()
            .filter_map(|(pid, process)| {
                let name = process.name().to_string_lossy().to_string();
                let wanted = match &search {
                    Some(pattern) => name.contains(pattern.as_str()),
                    None => pid.as_u32() == own_pid,
                };
                wanted.then_some((pid.as_u32(), name))
            })
            .collect();
        found.sort_unstable_by_key(|(pid, _)| *pid);
        found
    }

    fn poll_instance(&mut self) -> Result<Option<Matrix>, PollerError> {
        let refresh_started = Instant::now();
        self.system.refresh_all();
        let api_micros = refresh_started.elapsed().as_micros() as f64;

        match self.state.object.as_str() {
            "System" => {
                let host = self.host_key();
                if self.state.data.instance(&host).is_none() {
                    self.state.data.add_instance(&host)?;
                    self.state.data.set_instance_label(&host, "node", &host);
                }
                self.state.data.init_data();
            }
            "Process" => {
                let found = self.matching_processes();
                if found.is_empty() {
                    return Err(PollerError::NoInstance(format!(
                        "no matching processes on ({})",
                        self.state.options.hostname
                    )));
                }
                let data = &mut self.state.data;
                data.purge_instances();
                for (pid, name) in &found {
                    let key = pid.to_string();
                    data.add_instance(&key)?;
                    data.set_instance_label(&key, "name", name);
                    data.set_instance_label(&key, "pid", &key);
                }
                data.init_data();
                debug!(
                    collector = %self.state.name,
                    object = %self.state.object,
                    instances = found.len(),
                    "discovered instances"
                );
            }
            other => {
                return Err(PollerError::InvalidParam(format!("unknown object ({other})")));
            }
        }

        self.state
            .metadata
            .lazy_set_value_f64("api_time", "instance", api_micros);
        Ok(None)
    }

    fn poll_data(&mut self) -> Result<Option<Matrix>, PollerError> {
        let refresh_started = Instant::now();
        self.system.refresh_all();
        let api_micros = refresh_started.elapsed().as_micros() as f64;

        let parse_started = Instant::now();
        let count = match self.state.object.as_str() {
            "System" => self.fill_system()?,
            "Process" => self.fill_processes()?,
            other => {
                return Err(PollerError::InvalidParam(format!("unknown object ({other})")));
            }
        };

        self.state.count.add(count);
        self.state
            .metadata
            .lazy_set_value_f64("api_time", "data", api_micros);
        self.state.metadata.lazy_set_value_f64(
            "parse_time",
            "data",
            parse_started.elapsed().as_micros() as f64,
        );
        self.state
            .metadata
            .lazy_set_value_u64("count", "data", count);

        Ok(Some(self.state.data.clone()))
    }

    fn fill_system(&mut self) -> Result<u64, PollerError> {
        let host = self.host_key();
        let Self { state, system } = self;
        let data = &mut state.data;
        if data.instance(&host).is_none() {
            return Err(PollerError::NoInstance("system instance not discovered".into()));
        }
        data.reset();
        let load = System::load_average();
        data.set_value_u64("memory_total", &host, system.total_memory())?;
        data.set_value_u64("memory_used", &host, system.used_memory())?;
        data.set_value_u64("memory_available", &host, system.available_memory())?;
        data.set_value_u64("swap_total", &host, system.total_swap())?;
        data.set_value_u64("swap_used", &host, system.used_swap())?;
        data.set_value_u64("uptime", &host, System::uptime())?;
        data.set_value_u32("cpus", &host, system.cpus().len() as u32)?;
        data.set_value_f64("load_1m", &host, load.one)?;
        data.set_value_f64("load_5m", &host, load.five)?;
        data.set_value_f64("load_15m", &host, load.fifteen)?;
        Ok(SYSTEM_METRICS.len() as u64)
    }

    fn fill_processes(&mut self) -> Result<u64, PollerError> {
        let Self { state, system } = self;
        let data = &mut state.data;
        data.reset();
        let mut count: u64 = 0;
        let keys: Vec<String> = data.instances().iter().map(|i| i.key().to_string()).collect();
        for key in keys {
            let Ok(pid) = key.parse::<u32>() else {
                continue;
            };
            // a process may be gone since discovery; its cells stay unset
            let Some(process) = system.process(Pid::from_u32(pid)) else {
                continue;
            };
            data.set_value_f32("cpu", &key, process.cpu_usage())?;
            data.set_value_u64("memory_rss", &key, process.memory())?;
            data.set_value_u64("memory_virtual", &key, process.virtual_memory())?;
            data.set_value_u64("run_time", &key, process.run_time())?;
            data.set_value_u64("start_time", &key, process.start_time())?;
            count += PROCESS_METRICS.len() as u64;
        }
        Ok(count)
    }
}

impl Collector for UnixCollector {
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
        collector::init(self)?;
        let metrics = match self.state.object.as_str() {
            "System" => SYSTEM_METRICS,
            "Process" => PROCESS_METRICS,
            other => {
                return Err(PollerError::InvalidParam(format!("unknown object ({other})")));
            }
        };
        for (key, mtype) in metrics {
            self.state.data.add_metric_typed(key, key, true, *mtype)?;
        }
        Ok(())
    }

    fn poll<'a>(
        &'a mut self,
        task: &'a str,
    ) -> BoxFuture<'a, Result<Option<Matrix>, PollerError>> {
        Box::pin(async move {
            match task {
                "instance" => self.poll_instance(),
                "data" => self.poll_data(),
                other => Err(PollerError::Implement(format!("no handler for ({other})"))),
            }
        })
    }
}
