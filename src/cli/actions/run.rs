use anyhow::Result;
use tracing::error;

use crate::cli::actions::Action;
use crate::poller::Poller;

/// Handle the run action: bring the poller up and block until its last
/// collector exits. An initialization failure maps to exit code 1.
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Run { options } => {
            let poller = match Poller::init(*options).await {
                Ok(poller) => poller,
                Err(e) => {
                    error!(error = %e, "poller initialization failed");
                    return Err(e.into());
                }
            };
            poller.start().await;
            Ok(())
        }
    }
}
