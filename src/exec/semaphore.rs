use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::Error;

/// Blocks until every path in `markers` exists, polling with `poll_interval` between
/// rounds.
///
/// The markers are written by the wrapped batch jobs; this function only observes
/// them, it never creates or deletes anything. When `timeout` elapses first, the
/// returned [`Error::WaitTimeout`] carries exactly the markers that never appeared.
pub async fn wait_for_markers(
    markers: impl IntoIterator<Item = PathBuf>,
    timeout: Duration,
    poll_interval: Duration,
) -> crate::Result<()> {
    let mut pending: Vec<PathBuf> = markers.into_iter().collect();
    let deadline = Instant::now() + timeout;

    loop {
        pending.retain(|marker| !marker.exists());
        if pending.is_empty() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            log::debug!(
                "Timed out after {} with {} marker(s) missing",
                humantime::format_duration(timeout),
                pending.len()
            );
            pending.sort();
            return Err(Error::WaitTimeout { missing: pending });
        }
        tokio::time::sleep(poll_interval).await;
    }
}
