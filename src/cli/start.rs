use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;

use crate::cli::{actions::Action, commands, dispatch::handler, telemetry};

/// Start the CLI: parse arguments, bring up telemetry and produce the
/// action to run. The returned guard keeps the file appender alive in
/// daemon mode and must be held until exit.
///
/// # Errors
///
/// Returns an error if telemetry initialization or command handling
/// fails.
pub fn start() -> Result<(Action, Option<WorkerGuard>)> {
    let matches = commands::new().get_matches();

    let action = handler(&matches)?;

    let guard = match &action {
        Action::Run { options } => telemetry::init(options)?,
    };

    Ok((action, guard))
}
