use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;
use tracing::debug;

// summary line of iputils ("rtt min/avg/max/mdev = ...") and busybox
// ("round-trip min/avg/max = ...")
static RTT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:rtt|round-trip)[^=]*= ?([0-9.]+)/([0-9.]+)/")
        .expect("rtt summary pattern")
});

/// Reachability probe against the target: one packet, five second
/// budget. Returns the average round-trip in milliseconds, `None` when
/// the target is unreachable or the probe output cannot be parsed.
pub async fn ping(target: &str) -> Option<f32> {
    let probe = Command::new("ping")
        .arg(target)
        .args(["-w", "5", "-c", "1", "-q"])
        .output();
    let output = match tokio::time::timeout(Duration::from_secs(5), probe).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            debug!(target, error = %e, "ping spawn failed");
            return None;
        }
        Err(_) => {
            debug!(target, "ping timed out");
            return None;
        }
    };
    if !output.status.success() {
        return None;
    }
    parse_rtt(&String::from_utf8_lossy(&output.stdout))
}

fn parse_rtt(text: &str) -> Option<f32> {
    let captures = RTT.captures(text)?;
    captures.get(2)?.as_str().parse().ok()
}
