use std::path::{Path, PathBuf};

use super::execution_id::ExecutionId;

/// Every per-request filesystem path, derived from the execution ID rather
/// than held as a process-global constant, so concurrent executions never
/// collide on a shared path.
#[derive(Debug, Clone)]
pub struct ExecutionPaths {
    root: PathBuf,
}

impl ExecutionPaths {
    pub fn new(state_root: &Path, id: &ExecutionId) -> Self {
        Self {
            root: state_root.join(id.as_str()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host mount point for the cloned rootfs image while it is being staged.
    pub fn rootfs_mount_dir(&self) -> PathBuf {
        self.root.join("rootfs-mnt")
    }

    /// Private copy-on-write clone of the canonical rootfs image.
    pub fn rootfs_image(&self) -> PathBuf {
        self.root.join("rootfs.ext4")
    }

    /// Firecracker's API control socket.
    pub fn control_socket(&self) -> PathBuf {
        self.root.join("firecracker.sock")
    }

    /// Firecracker's stdout/stderr log file.
    pub fn hypervisor_log(&self) -> PathBuf {
        self.root.join("firecracker.log")
    }

    /// Host-bound listener that Firecracker's vsock device forwards
    /// guest-initiated connections to, on the configured port.
    pub fn vsock_uds(&self) -> PathBuf {
        self.root.join("vsock.sock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_namespaced_by_execution_id() {
        let id = ExecutionId::new();
        let paths = ExecutionPaths::new(Path::new("/tmp/vmexecd"), &id);
        assert!(paths.root().starts_with("/tmp/vmexecd"));
        assert!(paths.root().ends_with(id.as_str()));
        assert_ne!(paths.rootfs_mount_dir(), paths.rootfs_image());
        assert_ne!(paths.control_socket(), paths.vsock_uds());
    }
}
