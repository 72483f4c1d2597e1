use tracing::{info, instrument};

use super::channel::ResultChannel;
use super::execution_id::ExecutionId;
use super::hypervisor;
use super::lifecycle::ExecutionGuard;
use super::paths::ExecutionPaths;
use super::request::{self, RunRequestBody, RunResponse};
use super::stager;
use crate::config::ServiceConfig;
use crate::error::Result;

/// Run a single `POST /run` request end to end: validate, stage, provision
/// the result channel, boot the hypervisor, wait for a result or the
/// deadline, then tear everything down. Component F runs on every exit path:
/// the `ExecutionGuard` tears down explicitly on normal completion, and via
/// its `Drop` impl if this future is ever dropped before that point (the
/// client disconnects, or the handler panics).
#[instrument(skip(config, body))]
pub async fn execute(config: &ServiceConfig, body: RunRequestBody) -> Result<RunResponse> {
    let request = request::validate(body, config.default_timeout_ms, config.max_timeout_ms)?;

    let id = ExecutionId::new();
    let paths = ExecutionPaths::new(&config.state_root, &id);
    info!(execution = %id, cmd = %request.cmd, files = request.files.len(), "accepted execution");

    let mut guard = ExecutionGuard::new(paths.clone());
    let result = run_inner(config, &request, &paths, &mut guard).await;

    match result {
        Ok(channel) => {
            let response = super::waiter::wait_for_completion(channel, request.timeout_ms).await;
            guard.teardown().await;
            Ok(response)
        }
        Err(err) => {
            guard.teardown().await;
            Err(err)
        }
    }
}

async fn run_inner(
    config: &ServiceConfig,
    request: &request::RunRequest,
    paths: &ExecutionPaths,
    guard: &mut ExecutionGuard,
) -> Result<ResultChannel> {
    stager::stage(request, &config.rootfs_image, paths).await?;

    let channel = ResultChannel::bind(paths)?;

    let has_files = !request.files.is_empty();
    let handle = hypervisor::launch(
        &config.firecracker_bin,
        &config.kernel_image,
        &request.cmd,
        has_files,
        paths,
    )
    .await?;
    guard.attach_hypervisor(handle);

    Ok(channel)
}
