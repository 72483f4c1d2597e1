//! End-to-end tests for `core::pipeline::execute`, wiring every component
//! together. The hypervisor itself is stood in by `fixtures/fake_firecracker.py`,
//! which speaks just enough of the control-socket protocol to satisfy the
//! hypervisor controller and then posts a result over the vsock-forwarded
//! socket, the same way the in-guest helper would after a real boot. Staging
//! still exercises the real `cp --reflink=auto` / `mount -o loop` commands
//! against a real ext4 image, so this test requires root and `mkfs.ext4` on
//! `PATH` — it skips itself (rather than failing) when those aren't
//! available, matching how loopback-mount-dependent infrastructure is
//! usually tested.

use std::path::PathBuf;
use std::process::Command;

use vmexecd::config::ServiceConfig;
use vmexecd::core::pipeline;
use vmexecd::core::request::RunRequestBody;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn can_run_privileged_staging() -> bool {
    if !nix_like_root() {
        return false;
    }
    Command::new("mkfs.ext4")
        .arg("-V")
        .output()
        .map(|out| out.status.success() || !out.stdout.is_empty() || !out.stderr.is_empty())
        .unwrap_or(false)
}

fn nix_like_root() -> bool {
    // SAFETY: getuid takes no arguments and only reads process state.
    unsafe { libc::getuid() == 0 }
}

fn build_config(state_root: &std::path::Path, kernel: PathBuf, rootfs: PathBuf) -> ServiceConfig {
    ServiceConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        firecracker_bin: fixture_path("fake_firecracker.py"),
        kernel_image: kernel,
        rootfs_image: rootfs,
        rootfs_sha256: None,
        state_root: state_root.to_path_buf(),
        default_timeout_ms: 5_000,
        max_timeout_ms: 60_000,
    }
}

fn make_ext4_image(path: &std::path::Path) {
    Command::new("truncate")
        .arg("-s")
        .arg("16M")
        .arg(path)
        .status()
        .expect("truncate rootfs image");
    let status = Command::new("mkfs.ext4")
        .arg("-F")
        .arg("-q")
        .arg(path)
        .status()
        .expect("mkfs.ext4 rootfs image");
    assert!(status.success(), "mkfs.ext4 failed");
}

#[tokio::test]
async fn execute_runs_the_full_pipeline_against_a_fake_hypervisor() {
    if !can_run_privileged_staging() {
        eprintln!("skipping: requires root and mkfs.ext4 for loopback-mounted staging");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let kernel = dir.path().join("vmlinux");
    std::fs::write(&kernel, b"not a real kernel").unwrap();
    let rootfs = dir.path().join("rootfs.ext4");
    make_ext4_image(&rootfs);

    let state_root = dir.path().join("state");
    std::fs::create_dir_all(&state_root).unwrap();
    let config = build_config(&state_root, kernel, rootfs);

    let body = RunRequestBody {
        cmd: "echo hello".to_string(),
        files: Default::default(),
        timeout_ms: Some(10_000),
    };

    let response = pipeline::execute(&config, body).await.unwrap();
    assert_eq!(response.stdout, "hello from guest\n");
    assert_eq!(response.stderr, "");
    assert_eq!(response.exit_code, 0);

    // Component F ran: nothing left behind under the state root.
    let leftovers: Vec<_> = std::fs::read_dir(&state_root).unwrap().collect();
    assert!(leftovers.is_empty(), "execution directory was not cleaned up: {leftovers:?}");
}

#[tokio::test]
async fn execute_rejects_an_invalid_request_before_touching_the_filesystem() {
    let dir = tempfile::tempdir().unwrap();
    let kernel = dir.path().join("vmlinux");
    std::fs::write(&kernel, b"not a real kernel").unwrap();
    let rootfs = dir.path().join("rootfs.ext4");
    std::fs::write(&rootfs, b"not a real image").unwrap();

    let state_root = dir.path().join("state");
    let config = build_config(&state_root, kernel, rootfs);

    let body = RunRequestBody {
        cmd: String::new(),
        files: Default::default(),
        timeout_ms: None,
    };

    let err = pipeline::execute(&config, body).await.unwrap_err();
    assert!(err.is_bad_request());
    // Validation fails before any execution directory is created.
    assert!(!state_root.exists());
}
