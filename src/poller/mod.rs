//! The poller supervisor.
//!
//! A poller monitors one target system: it loads the configured
//! collectors (one per object) and their exporters through the
//! registries, runs each collector on its own task and keeps two
//! meta-matrices up to date on its own slow schedule: component status
//! per collector/exporter and target status from the liveness probe.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::collector::{self, Collector, CollectorState, Counter, StatusCell, STATUS_UP};
use crate::collectors;
use crate::conf::{self, Params};
use crate::errors::PollerError;
use crate::exporters::{self, Exporter, ExporterState};
use crate::matrix::Matrix;
use crate::options::Options;
use crate::schedule::Schedule;

mod ping;

/// Supervisor-side view of one collector: the shared status and count
/// cells, written by the collector task and read here.
pub struct ComponentHandle {
    pub name: String,
    pub object: String,
    pub status: Arc<StatusCell>,
    pub count: Arc<Counter>,
}

pub struct Poller {
    name: String,
    target: String,
    options: Arc<Options>,
    params: Params,
    exporter_params: Params,
    schedule: Schedule,
    collectors: Vec<Box<dyn Collector>>,
    handles: Vec<ComponentHandle>,
    exporters: Vec<Arc<dyn Exporter>>,
    metadata: Matrix,
    status: Matrix,
    pid: u32,
    pid_file: Option<PathBuf>,
    up_collectors: usize,
    up_exporters: usize,
}

fn install_signal_handler(pid_file: Option<PathBuf>) {
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let (Ok(mut hup), Ok(mut int), Ok(mut term), Ok(mut quit)) = (
            signal(SignalKind::hangup()),
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
            signal(SignalKind::quit()),
        ) else {
            error!("failed to install signal handlers");
            return;
        };
        let caught = tokio::select! {
            _ = hup.recv() => "SIGHUP",
            _ = int.recv() => "SIGINT",
            _ = term.recv() => "SIGTERM",
            _ = quit.recv() => "SIGQUIT",
        };
        info!(signal = caught, "caught signal");
        if let Some(path) = pid_file {
            let _ = std::fs::remove_file(path);
        }
        std::process::exit(0);
    });
}

/// Live OS threads of this process; the closest runtime gauge to the
/// scheduler's task pressure.
fn thread_count() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(entries) = std::fs::read_dir("/proc/self/task") {
            return entries.count() as u64;
        }
    }
    1
}

impl Poller {
    /// Read the poller's configuration, set up signal handling and the
    /// pid file, verify TLS material, build the meta-matrices and load
    /// all collectors and the exporters they request. At least one
    /// collector must initialize.
    pub async fn init(options: Options) -> Result<Self, PollerError> {
        let options = Arc::new(options);
        let name = options.poller.clone();
        info!(
            poller = %name,
            config = %options.config.display(),
            version = %options.version,
            "initializing poller"
        );

        let mut params = conf::poller_params(&options.config, &name)?;

        // rotation limits are accepted for compatibility; the file sink
        // itself does not rotate
        if let Some(bytes) = params.child_string("log_max_bytes") {
            debug!(log_max_bytes = %bytes, "log rotation left to the platform");
        }
        if let Some(files) = params.child_string("log_max_files") {
            debug!(log_max_files = %files, "log rotation left to the platform");
        }
        if let Some(port) = options.profiling {
            warn!(port, "profiling endpoint not compiled into this build");
        }

        let pid = std::process::id();
        let pid_file = options
            .daemon
            .then(|| options.pid_path.join(format!("{name}.pid")));

        install_signal_handler(pid_file.clone());

        if let Some(path) = &pid_file {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    PollerError::Config(format!("create ({}): {e}", parent.display()))
                })?;
            }
            std::fs::write(path, pid.to_string()).map_err(|e| {
                PollerError::Config(format!("write pid file ({}): {e}", path.display()))
            })?;
            info!(pid, pid_file = %path.display(), "started as daemon");
        } else {
            info!(pid, "started in foreground");
        }

        // each poller is associated with one remote host
        let target = params
            .child_string("addr")
            .unwrap_or_else(|| "localhost".to_string());

        // certificate auth requires readable TLS material up front
        if params.child_string("auth_style").as_deref() == Some("certificate_auth") {
            for (key, extension) in [("ssl_cert", "pem"), ("ssl_key", "key")] {
                let path = match params.child_string(key) {
                    Some(configured) => PathBuf::from(configured),
                    None => {
                        let fallback = options
                            .home_path
                            .join("cert")
                            .join(format!("{}.{extension}", options.hostname));
                        params.set_child_string(key, &fallback.to_string_lossy());
                        debug!(param = key, path = %fallback.display(), "using default TLS material path");
                        fallback
                    }
                };
                std::fs::metadata(&path).map_err(|e| {
                    PollerError::MissingParam(format!("{key} ({}): {e}", path.display()))
                })?;
            }
        }

        let mut poller = Self {
            name,
            target,
            options: Arc::clone(&options),
            params,
            exporter_params: Params::default(),
            schedule: Schedule::new(),
            collectors: Vec::new(),
            handles: Vec::new(),
            exporters: Vec::new(),
            metadata: Matrix::new("poller", "metadata_component", ""),
            status: Matrix::new("poller", "metadata_target", ""),
            pid,
            pid_file,
            up_collectors: 0,
            up_exporters: 0,
        };

        poller.load_metadata()?;

        poller.exporter_params = match conf::exporter_params(&options.config) {
            Ok(section) => section,
            Err(e) => {
                warn!(error = %e, "read exporter params");
                Params::default()
            }
        };

        // exporters are initialized on the fly, when a collector first
        // requests them
        let classes = poller.params.child_list("collectors");
        if classes.is_empty() {
            warn!("no collectors defined for this poller in config");
            return Err(PollerError::NoCollector("no collectors".into()));
        }
        for class in classes {
            if !poller.options.collectors.is_empty()
                && !poller
                    .options
                    .collectors
                    .iter()
                    .any(|wanted| wanted.eq_ignore_ascii_case(&class))
            {
                debug!(collector = %class, "skipping collector");
                continue;
            }
            if let Err(e) = poller.load_collector(&class) {
                error!(collector = %class, error = %e, "load collector");
            }
        }

        // at least one collector should successfully initialize
        if poller.collectors.is_empty() {
            warn!("no collectors initialized, stopping");
            return Err(PollerError::NoCollector("no collectors".into()));
        }
        debug!(collectors = poller.collectors.len(), "initialized collectors");

        if poller.exporters.is_empty() {
            warn!("no exporters initialized, continuing without exporters");
        } else {
            debug!(exporters = poller.exporters.len(), "initialized exporters");
        }

        let tick = poller
            .params
            .child_string("poller_schedule")
            .unwrap_or_else(|| "60s".to_string());
        poller.schedule.add_task("poller", &tick)?;
        debug!(frequency = %tick, "set poller schedule");

        poller.metadata.init_data();
        poller.status.init_data();

        info!("poller start-up complete");
        Ok(poller)
    }

    /// Run the collectors and the supervisor loop until the last
    /// collector task exits, then stop.
    pub async fn start(mut self) {
        let mut tasks = JoinSet::new();
        for col in self.collectors.drain(..) {
            debug!(collector = col.name(), object = col.object(), "launching collector");
            tasks.spawn(collector::run(col));
        }

        loop {
            let deadline = self.schedule.next_due();
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(result) => {
                        if let Err(e) = result {
                            let err = PollerError::Panic(e.to_string());
                            error!(error = %err, "collector task aborted");
                        }
                        if tasks.is_empty() {
                            break;
                        }
                    }
                    None => break,
                },
                () = tokio::time::sleep_until(deadline) => self.tick().await,
            }
        }

        info!("no active collectors, terminating");
        self.stop();
    }

    async fn tick(&mut self) {
        let started = Instant::now();
        self.metadata.reset();
        self.status.reset();

        let ping = ping::ping(&self.target).await;
        let (up_collectors, up_exporters) = self.update_meta(ping);

        for exporter in &self.exporters {
            if let Err(e) = exporter.export(&self.metadata) {
                error!(exporter = exporter.name(), error = %e, "export component metadata");
            }
            if let Err(e) = exporter.export(&self.status) {
                error!(exporter = exporter.name(), error = %e, "export target metadata");
            }
        }

        // log only when the numbers move, which should be rare
        if up_collectors != self.up_collectors || up_exporters != self.up_exporters {
            info!(
                up_collectors,
                collectors = self.handles.len(),
                up_exporters,
                exporters = self.exporters.len(),
                "updated status"
            );
        }
        self.up_collectors = up_collectors;
        self.up_exporters = up_exporters;

        self.schedule.record_run("poller", started, started.elapsed());
    }

    /// Refresh both meta-matrices from the probe result and the shared
    /// component cells. Returns the (collectors, exporters) up-counts.
    pub(crate) fn update_meta(&mut self, ping: Option<f32>) -> (usize, usize) {
        match ping {
            Some(rtt_ms) => {
                self.status.lazy_set_value_u8("status", "host", 0);
                self.status.lazy_set_value_f32("ping", "host", rtt_ms);
            }
            None => {
                self.status.lazy_set_value_u8("status", "host", 1);
            }
        }
        self.status
            .lazy_set_value_u32("threads", "host", thread_count() as u32);

        let mut up_collectors = 0;
        for handle in &self.handles {
            let (code, status, message) = handle.status.get();
            debug!(
                collector = %handle.name,
                object = %handle.object,
                code,
                status,
                message = %message,
                "collector status"
            );
            if code == STATUS_UP {
                up_collectors += 1;
            }
            let key = format!("{}.{}", handle.name, handle.object);
            self.metadata
                .lazy_set_value_u64("count", &key, handle.count.read_and_reset());
            self.metadata.lazy_set_value_u8("status", &key, code);
            if !message.is_empty() {
                self.metadata.set_instance_label(&key, "reason", &message);
            }
        }

        let mut up_exporters = 0;
        for exporter in &self.exporters {
            let (code, status, message) = exporter.status();
            debug!(exporter = exporter.name(), code, status, message = %message, "exporter status");
            if code == STATUS_UP {
                up_exporters += 1;
            }
            let key = format!("{}.{}", exporter.class(), exporter.name());
            self.metadata
                .lazy_set_value_u64("count", &key, exporter.export_count());
            self.metadata.lazy_set_value_u8("status", &key, code);
            if !message.is_empty() {
                self.metadata.set_instance_label(&key, "reason", &message);
            }
        }

        (up_collectors, up_exporters)
    }

    /// Remove the pid file (daemon mode) and log the shutdown.
    pub fn stop(&self) {
        info!(pid = self.pid, "cleaning up and stopping");
        if let Some(path) = &self.pid_file {
            if let Err(e) = std::fs::remove_file(path) {
                error!(error = %e, "clean pid file");
            } else {
                debug!(pid_file = %path.display(), "cleaned pid file");
            }
        }
    }

    fn load_metadata(&mut self) -> Result<(), PollerError> {
        self.metadata = Matrix::new("poller", "metadata_component", "");
        self.metadata.set_metadata_identity("poller", "component");
        self.metadata.new_metric_u8("status")?;
        self.metadata.new_metric_u64("count")?;
        self.metadata.set_global_label("poller", &self.name);
        self.metadata
            .set_global_label("version", &self.options.version);
        self.metadata
            .set_global_label("hostname", &self.options.hostname);

        self.status = Matrix::new("poller", "metadata_target", "");
        self.status.set_metadata_identity("poller", "target");
        self.status.new_metric_u8("status")?;
        self.status.new_metric_f32("ping")?;
        self.status.new_metric_u32("threads")?;
        self.status.add_instance("host")?;
        self.status.set_instance_label("host", "addr", &self.target);
        self.status.set_global_label("poller", &self.name);
        self.status.set_global_label("version", &self.options.version);
        self.status
            .set_global_label("hostname", &self.options.hostname);
        Ok(())
    }

    /// Load one collector class; a template `objects` list fans out
    /// into one collector per object.
    fn load_collector(&mut self, class: &str) -> Result<(), PollerError> {
        let mut template = collectors::builtin_template(class)?;
        if let Some(custom) = conf::import_template(&self.options.home_path, class)? {
            // an on-disk template overrides the built-in one
            let mut merged = custom;
            merged.union(&template);
            template = merged;
            debug!(collector = %class, "merged custom and built-in templates");
        }
        // poller parameters fill whatever the template leaves open
        template.union(&self.params);

        let mut initialized: Vec<Box<dyn Collector>> = Vec::new();
        if let Some(object) = template.child_string("object") {
            initialized.push(self.init_collector(class, &object, &template)?);
        } else {
            let objects = template.child_list("objects");
            if objects.is_empty() {
                return Err(PollerError::MissingParam("collector object".into()));
            }
            for object in objects {
                if !self.options.objects.is_empty() && !self.options.objects.contains(&object) {
                    debug!(object = %object, "skipping object");
                    continue;
                }
                match self.init_collector(class, &object, &template) {
                    Ok(col) => initialized.push(col),
                    Err(e) => {
                        warn!(collector = %class, object = %object, error = %e, "init collector-object");
                        if e.is_connection() {
                            warn!(collector = %class, "aborting collector");
                            break;
                        }
                    }
                }
            }
        }
        if initialized.is_empty() {
            return Err(PollerError::NoCollector(format!(
                "({class}) no objects initialized"
            )));
        }

        for mut col in initialized {
            let col_name = col.name().to_string();
            let object = col.object().to_string();

            if self.options.debug {
                info!(collector = %col_name, object = %object, "debug mode, no data will be exported");
            } else {
                for wanted in col.wanted_exporters() {
                    if let Some(exporter) = self.load_exporter(&wanted) {
                        col.link_exporter(exporter);
                        debug!(collector = %col_name, object = %object, exporter = %wanted, "linked exporter");
                    } else {
                        warn!(collector = %col_name, object = %object, exporter = %wanted, "requested exporter not available");
                    }
                }
            }

            let key = format!("{col_name}.{object}");
            self.metadata.add_instance(&key)?;
            self.metadata.set_instance_label(&key, "type", "collector");
            self.metadata.set_instance_label(&key, "name", &col_name);
            self.metadata.set_instance_label(&key, "target", &object);
            self.handles.push(ComponentHandle {
                name: col_name,
                object,
                status: Arc::clone(&col.state().status),
                count: Arc::clone(&col.state().count),
            });
            self.collectors.push(col);
        }
        Ok(())
    }

    fn init_collector(
        &self,
        class: &str,
        object: &str,
        template: &Params,
    ) -> Result<Box<dyn Collector>, PollerError> {
        let state =
            CollectorState::new(class, object, Arc::clone(&self.options), template.clone());
        let mut col = collectors::new_collector(class, state)?;
        col.init()?;
        debug!(collector = %class, object = %object, "initialized collector");
        Ok(col)
    }

    /// Exporter by config name; loaded on first reference, shared after.
    fn load_exporter(&mut self, name: &str) -> Option<Arc<dyn Exporter>> {
        if let Some(existing) = self.exporters.iter().find(|e| e.name() == name) {
            return Some(Arc::clone(existing));
        }
        let Some(mut params) = self.exporter_params.child(name) else {
            warn!(exporter = %name, "exporter not defined in config");
            return None;
        };
        let Some(class) = params.child_string("exporter") else {
            warn!(exporter = %name, "exporter has no class defined");
            return None;
        };
        if let Some(port) = self.options.prom_port {
            // command line wins over the configured port
            params.set_child_string("port", &port.to_string());
        }
        let state = ExporterState::new(&class, name, Arc::clone(&self.options), params);
        let mut exporter = match exporters::new_exporter(&class, state) {
            Ok(exporter) => exporter,
            Err(e) => {
                error!(exporter = %name, error = %e, "load exporter");
                return None;
            }
        };
        if let Err(e) = exporter.init() {
            error!(exporter = %name, error = %e, "init exporter");
            return None;
        }
        let exporter: Arc<dyn Exporter> = Arc::from(exporter);
        self.exporters.push(Arc::clone(&exporter));

        let key = format!("{}.{}", exporter.class(), exporter.name());
        if let Err(e) = self.metadata.add_instance(&key) {
            error!(error = %e, "add metadata instance");
        } else {
            self.metadata.set_instance_label(&key, "type", "exporter");
            self.metadata.set_instance_label(&key, "name", &class);
            self.metadata.set_instance_label(&key, "target", name);
        }
        debug!(exporter = %name, class = %class, "initialized exporter");
        Some(exporter)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Per-component status Matrix (collectors and exporters).
    pub fn component_metadata(&self) -> &Matrix {
        &self.metadata
    }

    /// Target liveness Matrix.
    pub fn target_status(&self) -> &Matrix {
        &self.status
    }

    pub fn handles(&self) -> &[ComponentHandle] {
        &self.handles
    }

    pub fn exporters(&self) -> &[Arc<dyn Exporter>] {
        &self.exporters
    }
}
