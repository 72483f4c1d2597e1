use tokio::fs;
use tracing::{instrument, warn};

use super::hypervisor::HypervisorHandle;
use super::mount;
use super::paths::ExecutionPaths;

/// Component F: tear down every artifact a single execution may have created,
/// regardless of which stage of the pipeline it failed at. Mirrors the
/// orchestrator's `shutdown_vm` escalation (kill the process first, then clean
/// up its filesystem footprint).
///
/// Held for the lifetime of one execution. The normal path calls
/// [`ExecutionGuard::teardown`] explicitly once the response is ready; the
/// `Drop` impl is the fallback for every other way the handler future can
/// stop running — the client disconnects and axum drops it, or it panics —
/// so cleanup still happens even though nothing downstream awaited it.
pub struct ExecutionGuard {
    paths: ExecutionPaths,
    hypervisor: Option<HypervisorHandle>,
    disarmed: bool,
}

impl ExecutionGuard {
    pub fn new(paths: ExecutionPaths) -> Self {
        Self {
            paths,
            hypervisor: None,
            disarmed: false,
        }
    }

    pub fn attach_hypervisor(&mut self, handle: HypervisorHandle) {
        self.hypervisor = Some(handle);
    }

    /// Run teardown now and disarm the drop guard, so it does not also
    /// schedule a background teardown once this guard is dropped.
    pub async fn teardown(mut self) {
        self.disarmed = true;
        let hypervisor = self.hypervisor.take();
        run_teardown(self.paths.clone(), hypervisor).await;
    }
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        if self.disarmed {
            return;
        }
        let paths = self.paths.clone();
        let hypervisor = self.hypervisor.take();
        tokio::spawn(async move {
            run_teardown(paths, hypervisor).await;
        });
    }
}

#[instrument(skip(paths, hypervisor), fields(execution = %paths.root().display()))]
async fn run_teardown(paths: ExecutionPaths, hypervisor: Option<HypervisorHandle>) {
    if let Some(mut handle) = hypervisor {
        handle.kill().await;
    }

    // The rootfs may or may not still be mounted depending on which stage
    // failed; unmounting an already-unmounted path is a harmless no-op error
    // that `mount::unmount` already swallows and logs.
    mount::unmount(&paths.rootfs_mount_dir()).await;

    if let Err(err) = fs::remove_dir_all(paths.root()).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(
                path = %paths.root().display(),
                %err,
                "failed to remove execution directory during teardown"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::execution_id::ExecutionId;
    use std::path::Path;
    use std::time::Duration;

    #[tokio::test]
    async fn explicit_teardown_removes_execution_directory() {
        let id = ExecutionId::new();
        let dir = tempfile::tempdir().unwrap();
        let paths = ExecutionPaths::new(dir.path(), &id);
        fs::create_dir_all(paths.root()).await.unwrap();
        fs::write(paths.root().join("marker"), b"x").await.unwrap();

        let guard = ExecutionGuard::new(paths.clone());
        guard.teardown().await;

        assert!(!paths.root().exists());
    }

    #[tokio::test]
    async fn dropping_an_armed_guard_schedules_background_teardown() {
        let id = ExecutionId::new();
        let dir = tempfile::tempdir().unwrap();
        let paths = ExecutionPaths::new(dir.path(), &id);
        fs::create_dir_all(paths.root()).await.unwrap();

        {
            let _guard = ExecutionGuard::new(paths.clone());
            // Dropped here without calling `teardown` — simulates the
            // handler future being cancelled mid-execution.
        }

        // The cleanup runs on a spawned task, not synchronously with drop.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!paths.root().exists());
    }

    #[tokio::test]
    async fn teardown_on_missing_directory_does_not_panic() {
        let id = ExecutionId::new();
        let paths = ExecutionPaths::new(Path::new("/tmp/vmexecd-nonexistent-test-root"), &id);
        let guard = ExecutionGuard::new(paths);
        guard.teardown().await;
    }
}
