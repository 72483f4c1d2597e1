use std::time::Duration;

use tracing::{instrument, warn};

use super::channel::ResultChannel;
use super::request::RunResponse;
use crate::config::BOOT_GRACE_MS;

/// Component E: race the guest's result record against the execution
/// deadline. The deadline folds in a fixed boot grace period on top of the
/// caller's requested timeout, so a slow-booting guest is not penalized out
/// of the time it asked to run for.
#[instrument(skip(channel), fields(timeout_ms))]
pub async fn wait_for_completion(channel: ResultChannel, timeout_ms: u64) -> RunResponse {
    let deadline = Duration::from_millis(timeout_ms.saturating_add(BOOT_GRACE_MS));

    match tokio::time::timeout(deadline, channel.accept_one()).await {
        Ok(Ok(result)) => RunResponse {
            stdout: result.stdout,
            stderr: result.stderr,
            exit_code: result.exit_code,
        },
        Ok(Err(err)) => {
            warn!(%err, "result channel failed before guest reported a result");
            RunResponse::timed_out()
        }
        Err(_) => {
            warn!(deadline_ms = deadline.as_millis() as u64, "execution deadline elapsed");
            RunResponse::timed_out()
        }
    }
}
