use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};

use crate::options::Options;

/// Start the tracing layer.
///
/// Foreground pollers log pretty to the console; daemonized pollers log
/// to `LOG_PATH/poller_<name>.log` through a non-blocking appender whose
/// guard must stay alive for the lifetime of the process.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created or a
/// subscriber is already installed.
pub fn init(options: &Options) -> Result<Option<WorkerGuard>> {
    // RUST_LOG= overrides the numeric --loglevel
    let filter = EnvFilter::builder()
        .with_default_directive(options.tracing_level().into())
        .from_env_lossy()
        .add_directive("tokio=error".parse()?);

    if options.daemon {
        std::fs::create_dir_all(&options.log_path)?;
        let appender = tracing_appender::rolling::never(
            &options.log_path,
            format!("poller_{}.log", options.poller),
        );
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let fmt_layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(false);
        let subscriber = Registry::default().with(fmt_layer).with(filter);
        tracing::subscriber::set_global_default(subscriber)?;
        Ok(Some(guard))
    } else {
        let fmt_layer = fmt::layer()
            .with_file(false)
            .with_line_number(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_target(false)
            .pretty();
        let subscriber = Registry::default().with(fmt_layer).with(filter);
        tracing::subscriber::set_global_default(subscriber)?;
        Ok(None)
    }
}
