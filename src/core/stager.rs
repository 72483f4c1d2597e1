use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tokio::fs;
use tracing::{info, instrument};

use super::mount;
use super::paths::ExecutionPaths;
use super::request::RunRequest;
use crate::error::Result;

const WORK_DIR_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o644;
const EXECUTABLE_FILE_MODE: u32 = 0o755;

/// Stage the caller's files into a freshly cloned rootfs image (component B).
/// On success the image at `paths.rootfs_image()` is unmounted and ready to
/// be attached to the hypervisor as the root drive.
#[instrument(skip(request, canonical_rootfs, paths), fields(files = request.files.len()))]
pub async fn stage(request: &RunRequest, canonical_rootfs: &Path, paths: &ExecutionPaths) -> Result<()> {
    fs::create_dir_all(paths.root()).await?;
    mount::clone_image(canonical_rootfs, &paths.rootfs_image()).await?;

    let mount_dir = paths.rootfs_mount_dir();
    fs::create_dir_all(&mount_dir).await?;
    mount::mount_loop(&paths.rootfs_image(), &mount_dir).await?;

    let result = write_files(request, &mount_dir).await;

    // The unmount must happen regardless of whether writing files succeeded,
    // and it must succeed before the hypervisor controller runs (the image
    // cannot be simultaneously mounted on the host and opened as a guest
    // drive).
    match result {
        Ok(()) => {
            mount::unmount_checked(&mount_dir).await?;
            info!("staged rootfs for execution");
            Ok(())
        }
        Err(err) => {
            mount::unmount(&mount_dir).await;
            Err(err)
        }
    }
}

async fn write_files(request: &RunRequest, mount_dir: &Path) -> Result<()> {
    let work_dir = mount_dir.join("work");
    fs::create_dir_all(&work_dir).await?;
    fs::set_permissions(&work_dir, std::fs::Permissions::from_mode(WORK_DIR_MODE)).await?;

    for file in &request.files {
        let target = work_dir.join(&file.relative_path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&target, &file.content).await?;
        let mode = if file.is_executable() {
            EXECUTABLE_FILE_MODE
        } else {
            FILE_MODE
        };
        fs::set_permissions(&target, std::fs::Permissions::from_mode(mode)).await?;
    }

    Ok(())
}
