//! Resolved runtime options: command line flags plus environment paths.

use std::env;
use std::path::PathBuf;

use clap::ArgMatches;

const DEFAULT_HOME: &str = "/opt/pulse";
const DEFAULT_PID_PATH: &str = "/var/run/pulse";
const DEFAULT_LOG_PATH: &str = "/var/log/pulse";

#[derive(Clone, Debug)]
pub struct Options {
    /// Poller name as defined in config.
    pub poller: String,
    pub daemon: bool,
    /// Debug mode: collectors run but nothing is exported.
    pub debug: bool,
    /// 0=trace, 1=debug, 2=info, 3=warning, 4=error, 5=critical.
    pub log_level: u8,
    pub profiling: Option<u16>,
    pub prom_port: Option<u16>,
    pub config: PathBuf,
    /// Only start these collector classes (empty = all configured).
    pub collectors: Vec<String>,
    /// Only start these objects (empty = all from template).
    pub objects: Vec<String>,
    pub home_path: PathBuf,
    pub pid_path: PathBuf,
    pub log_path: PathBuf,
    pub hostname: String,
    pub version: String,
}

fn env_path(var: &str, default: &str) -> PathBuf {
    env::var(var).map_or_else(|_| PathBuf::from(default), PathBuf::from)
}

fn hostname() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| "localhost".to_string())
}

impl Options {
    /// Defaults for a named poller; used directly by tests.
    pub fn new(poller: &str) -> Self {
        Self {
            poller: poller.to_string(),
            daemon: false,
            debug: false,
            log_level: 2,
            profiling: None,
            prom_port: None,
            config: PathBuf::from("pulse.yml"),
            collectors: Vec::new(),
            objects: Vec::new(),
            home_path: env_path("PULSE_HOME", DEFAULT_HOME),
            pid_path: env_path("PULSE_PID_PATH", DEFAULT_PID_PATH),
            log_path: env_path("PULSE_LOG_PATH", DEFAULT_LOG_PATH),
            hostname: hostname(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn from_matches(matches: &ArgMatches) -> Self {
        let poller = matches
            .get_one::<String>("poller")
            .cloned()
            .unwrap_or_default();
        let mut options = Self::new(&poller);
        options.daemon = matches.get_flag("daemon");
        options.debug = matches.get_flag("debug");
        options.log_level = matches.get_one::<u8>("loglevel").copied().unwrap_or(2);
        options.profiling = matches.get_one::<u16>("profiling").copied();
        options.prom_port = matches.get_one::<u16>("promPort").copied();
        if let Some(config) = matches.get_one::<String>("config") {
            options.config = PathBuf::from(config);
        }
        options.collectors = matches
            .get_many::<String>("collectors")
            .map(|v| v.cloned().collect())
            .unwrap_or_default();
        options.objects = matches
            .get_many::<String>("objects")
            .map(|v| v.cloned().collect())
            .unwrap_or_default();
        options
    }

    /// Numeric log level mapped to a tracing level; `--debug` forces
    /// at least DEBUG.
    pub fn tracing_level(&self) -> tracing::Level {
        if self.debug && self.log_level > 1 {
            return tracing::Level::DEBUG;
        }
        match self.log_level {
            0 => tracing::Level::TRACE,
            1 => tracing::Level::DEBUG,
            2 => tracing::Level::INFO,
            3 => tracing::Level::WARN,
            _ => tracing::Level::ERROR,
        }
    }
}
