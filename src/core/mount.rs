use std::path::Path;

use tokio::process::Command;
use tracing::warn;

use crate::error::{Error, Result};

/// Clone `source` into `dest` using a copy-on-write reflink where the host
/// filesystem supports it, falling back transparently to a full copy
/// otherwise. Used to give each execution its own private rootfs so
/// concurrent requests never contend on the canonical image. Mirrors the
/// orchestrator's habit of shelling out to an external image tool
/// (`qemu-img`) rather than reimplementing image manipulation in-process.
pub async fn clone_image(source: &Path, dest: &Path) -> Result<()> {
    let status = Command::new("cp")
        .arg("--reflink=auto")
        .arg(source)
        .arg(dest)
        .status()
        .await
        .map_err(|err| Error::staging(format!("failed to spawn cp: {err}")))?;

    if !status.success() {
        return Err(Error::staging(format!(
            "cp --reflink=auto {} {} exited with {status}",
            source.display(),
            dest.display()
        )));
    }
    Ok(())
}

/// Loopback-mount `image` read-write at `mount_point`. `mount_point` must
/// already exist.
pub async fn mount_loop(image: &Path, mount_point: &Path) -> Result<()> {
    let status = Command::new("mount")
        .arg("-o")
        .arg("loop,rw")
        .arg(image)
        .arg(mount_point)
        .status()
        .await
        .map_err(|err| Error::staging(format!("failed to spawn mount: {err}")))?;

    if !status.success() {
        return Err(Error::staging(format!(
            "mount -o loop {} {} exited with {status}",
            image.display(),
            mount_point.display()
        )));
    }
    Ok(())
}

/// Unmount `mount_point`. Best-effort: callers invoke this during cleanup
/// where a failure must not block the rest of the lifecycle teardown, so
/// errors are logged rather than propagated.
pub async fn unmount(mount_point: &Path) {
    let result = Command::new("umount").arg(mount_point).status().await;
    match result {
        Ok(status) if status.success() => {}
        Ok(status) => warn!(
            mount_point = %mount_point.display(),
            %status,
            "umount exited with non-zero status"
        ),
        Err(err) => warn!(
            mount_point = %mount_point.display(),
            %err,
            "failed to spawn umount"
        ),
    }
}

/// Fallible variant of [`unmount`], used in the one place (before the
/// hypervisor opens the image) where the caller genuinely needs to know the
/// unmount succeeded before proceeding.
pub async fn unmount_checked(mount_point: &Path) -> Result<()> {
    let status = Command::new("umount")
        .arg(mount_point)
        .status()
        .await
        .map_err(|err| Error::staging(format!("failed to spawn umount: {err}")))?;
    if !status.success() {
        return Err(Error::staging(format!(
            "umount {} exited with {status}",
            mount_point.display()
        )));
    }
    Ok(())
}
