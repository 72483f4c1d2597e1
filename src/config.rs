use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use sha2::{Digest, Sha256};
use sysinfo::Disks;

use crate::error::{Error, Result};

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:7777";
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const MAX_TIMEOUT_MS: u64 = 60_000;
pub const BOOT_GRACE_MS: u64 = 5_000;
const MIN_FREE_STATE_ROOT_MIB: u64 = 512;

/// Service configuration, assembled from (in increasing precedence) a TOML
/// file, environment variables, and CLI flags. Mirrors the precedence order
/// used for the orchestrator's own project configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub listen_addr: String,
    pub firecracker_bin: PathBuf,
    pub kernel_image: PathBuf,
    pub rootfs_image: PathBuf,
    pub rootfs_sha256: Option<String>,
    pub state_root: PathBuf,
    pub default_timeout_ms: u64,
    pub max_timeout_ms: u64,
}

/// On-disk representation of the optional TOML config file. Every field is
/// optional: a missing file, or a missing field within it, falls through to
/// environment variables and then to built-in defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    listen_addr: Option<String>,
    firecracker_bin: Option<PathBuf>,
    kernel_image: Option<PathBuf>,
    rootfs_image: Option<PathBuf>,
    rootfs_sha256: Option<String>,
    state_root: Option<PathBuf>,
    default_timeout_ms: Option<u64>,
    max_timeout_ms: Option<u64>,
}

/// CLI-level overrides, applied last. Kept separate from `clap::Args` so that
/// `config.rs` has no dependency on the `cli` feature.
#[derive(Debug, Default)]
pub struct ConfigOverrides {
    pub listen_addr: Option<String>,
    pub firecracker_bin: Option<PathBuf>,
    pub kernel_image: Option<PathBuf>,
    pub rootfs_image: Option<PathBuf>,
    pub state_root: Option<PathBuf>,
}

impl ServiceConfig {
    /// Load configuration from an optional file path, then environment
    /// variables (`VMEXECD_*`), then `overrides`. Validates that the required
    /// artifact paths exist before returning, so startup fails fast instead of
    /// surfacing a confusing per-request 500.
    pub fn load(file_path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self> {
        let file = match file_path {
            Some(path) => load_file(path)?,
            None => FileConfig::default(),
        };

        let listen_addr = overrides
            .listen_addr
            .or_else(|| std::env::var("VMEXECD_LISTEN_ADDR").ok())
            .or(file.listen_addr)
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());

        let firecracker_bin = overrides
            .firecracker_bin
            .or_else(|| std::env::var("VMEXECD_FIRECRACKER_BIN").ok().map(PathBuf::from))
            .or(file.firecracker_bin)
            .unwrap_or_else(|| PathBuf::from("/usr/bin/firecracker"));

        let kernel_image = overrides
            .kernel_image
            .or_else(|| std::env::var("VMEXECD_KERNEL_IMAGE").ok().map(PathBuf::from))
            .or(file.kernel_image)
            .ok_or_else(|| Error::InvalidConfig {
                message: "kernel_image must be set (config file, VMEXECD_KERNEL_IMAGE, or --kernel)"
                    .to_string(),
            })?;

        let rootfs_image = overrides
            .rootfs_image
            .or_else(|| std::env::var("VMEXECD_ROOTFS_IMAGE").ok().map(PathBuf::from))
            .or(file.rootfs_image)
            .ok_or_else(|| Error::InvalidConfig {
                message: "rootfs_image must be set (config file, VMEXECD_ROOTFS_IMAGE, or --rootfs)"
                    .to_string(),
            })?;

        let state_root = overrides
            .state_root
            .or_else(|| std::env::var("VMEXECD_STATE_ROOT").ok().map(PathBuf::from))
            .or(file.state_root)
            .unwrap_or_else(|| PathBuf::from("/tmp/vmexecd"));

        let default_timeout_ms = file.default_timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
        let max_timeout_ms = file.max_timeout_ms.unwrap_or(MAX_TIMEOUT_MS);
        if default_timeout_ms == 0 || max_timeout_ms == 0 || default_timeout_ms > max_timeout_ms {
            return Err(Error::InvalidConfig {
                message: format!(
                    "default_timeout_ms ({default_timeout_ms}) must be > 0 and <= max_timeout_ms ({max_timeout_ms})"
                ),
            });
        }

        let config = ServiceConfig {
            listen_addr,
            firecracker_bin,
            kernel_image,
            rootfs_image,
            rootfs_sha256: file.rootfs_sha256,
            state_root,
            default_timeout_ms,
            max_timeout_ms,
        };
        config.validate_paths()?;
        config.verify_rootfs_checksum()?;
        Ok(config)
    }

    fn validate_paths(&self) -> Result<()> {
        if !self.kernel_image.is_file() {
            return Err(Error::InvalidConfig {
                message: format!(
                    "kernel_image {} does not exist or is not a file",
                    self.kernel_image.display()
                ),
            });
        }
        if !self.rootfs_image.is_file() {
            return Err(Error::InvalidConfig {
                message: format!(
                    "rootfs_image {} does not exist or is not a file",
                    self.rootfs_image.display()
                ),
            });
        }
        Ok(())
    }

    /// If `rootfs_sha256` was configured, verify it against the canonical
    /// image on disk before accepting any traffic. Catches a stale or
    /// mismatched image at startup rather than on the first cloned execution.
    fn verify_rootfs_checksum(&self) -> Result<()> {
        let Some(expected) = &self.rootfs_sha256 else {
            return Ok(());
        };

        let bytes = fs::read(&self.rootfs_image).map_err(|source| Error::ReadConfig {
            path: self.rootfs_image.clone(),
            source,
        })?;
        let digest = Sha256::digest(&bytes);
        let actual = hex::encode(digest);

        if !actual.eq_ignore_ascii_case(expected) {
            return Err(Error::InvalidConfig {
                message: format!(
                    "rootfs_image {} has sha256 {actual} but rootfs_sha256 was configured as {expected}",
                    self.rootfs_image.display()
                ),
            });
        }
        Ok(())
    }

    /// Warn (but do not fail startup) if the filesystem backing `state_root`
    /// is low on free space — per-execution rootfs clones are sizable, and a
    /// full disk surfaces as a confusing mid-request staging failure
    /// otherwise.
    pub fn check_disk_preflight(&self) {
        let disks = Disks::new_with_refreshed_list();
        let Some(disk) = disks
            .list()
            .iter()
            .filter(|disk| self.state_root.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
        else {
            tracing::warn!(
                state_root = %self.state_root.display(),
                "could not determine disk usage for state_root"
            );
            return;
        };

        let available_mib = disk.available_space() / (1024 * 1024);
        if available_mib < MIN_FREE_STATE_ROOT_MIB {
            tracing::warn!(
                state_root = %self.state_root.display(),
                available_mib,
                "low free space on state_root filesystem"
            );
        }
    }
}

fn load_file(path: &Path) -> Result<FileConfig> {
    let text = fs::read_to_string(path).map_err(|source| Error::ReadConfig {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| Error::ParseConfig {
        path: path.to_path_buf(),
        source,
    })
}
