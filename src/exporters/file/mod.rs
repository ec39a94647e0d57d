use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::debug;

use crate::collector::{STATUS_FAILED, STATUS_UP};
use crate::errors::PollerError;
use crate::exporters::{Exporter, ExporterState};
use crate::matrix::Matrix;

/// Writes matrices as JSON lines to an append-only file.
///
/// One line per set cell:
/// `{"ts":…,"collector":…,"object":…,"metric":…,"value":…,"labels":{…}}`.
/// Export options of the Matrix are honored: metric and label filters,
/// instance-key promotion and the master export switch. Mainly useful
/// for debugging a poller without a real time-series sink.
pub struct FileExporter {
    state: ExporterState,
    out: Mutex<Option<BufWriter<File>>>,
}

#[derive(Serialize)]
struct Record<'a> {
    ts: &'a str,
    collector: &'a str,
    object: &'a str,
    metric: &'a str,
    value: f64,
    labels: BTreeMap<String, String>,
}

impl FileExporter {
    pub fn new(state: ExporterState) -> Self {
        Self {
            state,
            out: Mutex::new(None),
        }
    }

    fn render(data: &Matrix, ts: &str) -> Result<Vec<String>, PollerError> {
        let options = data.export_options();
        let mut lines = Vec::new();
        for metric in data.metrics() {
            if !metric.is_exportable() || !options.metric_allowed(metric.key()) {
                continue;
            }
            for instance in data.instances() {
                let Some(value) = metric.value(instance.index()) else {
                    continue;
                };
                let mut labels = data.export_labels(instance);
                labels.retain(|k, _| options.label_allowed(k));
                if options.promotes_instance_key() {
                    labels
                        .entry("instance".to_string())
                        .or_insert_with(|| instance.key().to_string());
                }
                let record = Record {
                    ts,
                    collector: data.name(),
                    object: data.object(),
                    metric: metric.key(),
                    value,
                    labels,
                };
                lines.push(
                    serde_json::to_string(&record)
                        .map_err(|e| PollerError::Implement(format!("render: {e}")))?,
                );
            }
        }
        Ok(lines)
    }
}

impl Exporter for FileExporter {
    fn name(&self) -> &str {
        &self.state.name
    }

    fn class(&self) -> &str {
        &self.state.class
    }

    fn init(&mut self) -> Result<(), PollerError> {
        let path = self
            .state
            .params
            .child_string("path")
            .ok_or_else(|| PollerError::MissingParam(format!("exporter ({}): path", self.state.name)))?;
        if let Some(parent) = std::path::Path::new(&path).parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PollerError::Config(format!("create ({}): {e}", parent.display())))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| PollerError::Config(format!("open ({path}): {e}")))?;
        match self.out.lock() {
            Ok(mut guard) => *guard = Some(BufWriter::new(file)),
            Err(poisoned) => *poisoned.into_inner() = Some(BufWriter::new(file)),
        }
        self.state.status.set(STATUS_UP, "running");
        debug!(exporter = %self.state.name, path = %path, "opened export file");
        Ok(())
    }

    fn export(&self, data: &Matrix) -> Result<(), PollerError> {
        if !data.is_exportable() || !data.export_options().is_exportable() {
            return Ok(());
        }
        let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let lines = Self::render(data, &ts)?;

        let mut guard = match self.out.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(writer) = guard.as_mut() else {
            return Err(PollerError::Implement(format!(
                "exporter ({}) used before init",
                self.state.name
            )));
        };
        for line in &lines {
            if let Err(e) = writeln!(writer, "{line}") {
                self.state.status.set(STATUS_FAILED, "write failed");
                return Err(PollerError::Connection(format!(
                    "write ({}): {e}",
                    self.state.name
                )));
            }
        }
        if let Err(e) = writer.flush() {
            self.state.status.set(STATUS_FAILED, "write failed");
            return Err(PollerError::Connection(format!(
                "flush ({}): {e}",
                self.state.name
            )));
        }
        drop(guard);
        self.state.status.set(STATUS_UP, "running");
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
