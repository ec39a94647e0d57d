#![allow(clippy::unwrap_used)]
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use pulse::options::Options;

/// Write a config file into the test directory and return its path.
pub fn write_config(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("pulse.yml");
    std::fs::write(&path, body).unwrap();
    path
}

/// A minimal working config: the unix collector (both objects) wired to
/// one file exporter writing into the test directory.
pub fn base_config(dir: &Path) -> String {
    format!(
        "pollers:\n  itest:\n    addr: 127.0.0.1\n    collectors: [Unix]\n    exporters: [f1]\nexporters:\n  f1:\n    exporter: file\n    path: {}\n",
        dir.join("out.jsonl").display()
    )
}

pub fn options_with_config(config: PathBuf) -> Options {
    let mut options = Options::new("itest");
    options.config = config;
    options
}

/// Parse the file exporter's output back into JSON values.
pub fn read_export_lines(dir: &Path) -> Vec<serde_json::Value> {
    std::fs::read_to_string(dir.join("out.jsonl"))
        .unwrap_or_default()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}
