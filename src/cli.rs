use std::path::PathBuf;

use clap::Parser;

/// Top-level CLI definition for the `vmexecd` service.
#[derive(Debug, Parser)]
#[command(
    name = "vmexecd",
    author,
    version = env!("VMEXECD_VERSION"),
    about = "Runs a single shell command per request inside a fresh Firecracker microVM."
)]
pub struct Cli {
    /// Path to an explicit configuration file.
    #[arg(short, long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Override the listen address (host:port).
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<String>,

    /// Override the path to the firecracker binary.
    #[arg(long, value_name = "PATH")]
    pub firecracker_bin: Option<PathBuf>,

    /// Override the guest kernel image path.
    #[arg(long, value_name = "PATH")]
    pub kernel: Option<PathBuf>,

    /// Override the canonical rootfs image path.
    #[arg(long, value_name = "PATH")]
    pub rootfs: Option<PathBuf>,

    /// Override the per-execution state directory root.
    #[arg(long, value_name = "PATH")]
    pub state_root: Option<PathBuf>,
}
