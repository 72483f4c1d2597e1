use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::json;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout};
use tracing::{info, instrument, warn};

use super::channel::ResultChannel;
use super::paths::ExecutionPaths;
use crate::error::{Error, Result};

const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(25);
const SOCKET_WAIT_TIMEOUT: Duration = Duration::from_secs(10);
const API_CALL_TIMEOUT: Duration = Duration::from_secs(5);
const LOG_TAIL_LINES: usize = 50;

const VCPU_COUNT: u32 = 1;
const MEM_SIZE_MIB: u32 = 256;

/// A live (or just-terminated) hypervisor child process, owned exclusively by
/// one request. The underlying child is spawned with `kill_on_drop(true)`, so
/// even an unreaped `HypervisorHandle` dropped without calling
/// [`HypervisorHandle::kill`] (e.g. a cancelled request) does not leak the
/// process; [`lifecycle::ExecutionGuard`](super::lifecycle::ExecutionGuard)
/// still calls `kill` explicitly so the process is reaped rather than left a
/// zombie.
pub struct HypervisorHandle {
    child: Child,
    log_path: PathBuf,
}

impl HypervisorHandle {
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Force-kill the hypervisor and reap it. Best-effort: a child that has
    /// already exited is not an error.
    pub async fn kill(&mut self) {
        if let Some(pid) = self.child.id() {
            // SAFETY: `kill(pid, 0)` only probes for liveness; no child
            // resources are accessed, matching the orchestrator's own
            // liveness-probe-before-kill idiom.
            let alive = unsafe { libc::kill(pid as libc::pid_t, 0) } == 0;
            if !alive {
                let _ = self.child.wait().await;
                return;
            }
        }
        if let Err(err) = self.child.start_kill() {
            warn!(%err, "failed to send kill to hypervisor child");
        }
        let _ = self.child.wait().await;
    }

    pub async fn log_tail(&self) -> String {
        read_log_tail(&self.log_path, LOG_TAIL_LINES).await
    }
}

/// Component D: spawn the hypervisor, wait for its control socket, and drive
/// it through machine-config → boot-source → root drive → vsock → start.
#[instrument(skip(firecracker_bin, kernel_image, paths), fields(execution = %paths.root().display()))]
pub async fn launch(
    firecracker_bin: &Path,
    kernel_image: &Path,
    cmd: &str,
    has_files: bool,
    paths: &ExecutionPaths,
) -> Result<HypervisorHandle> {
    let control_socket = paths.control_socket();
    let log_path = paths.hypervisor_log();
    if control_socket.exists() {
        let _ = fs::remove_file(&control_socket).await;
    }

    let log_file = std::fs::File::create(&log_path)
        .map_err(|err| Error::hypervisor_start(format!("failed to create log file: {err}")))?;

    let child = Command::new(firecracker_bin)
        .arg("--api-sock")
        .arg(&control_socket)
        .stdin(std::process::Stdio::null())
        .stdout(log_file.try_clone().map_err(|err| {
            Error::hypervisor_start(format!("failed to duplicate log file handle: {err}"))
        })?)
        .stderr(log_file)
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| Error::hypervisor_start(format!("failed to spawn firecracker: {err}")))?;

    let mut handle = HypervisorHandle { child, log_path };

    if let Err(err) = wait_for_socket(&control_socket).await {
        let tail = handle.log_tail().await;
        handle.kill().await;
        return Err(Error::hypervisor_start(format!("{err}\n--- hypervisor log tail ---\n{tail}")));
    }

    if let Err(err) = configure(&control_socket, kernel_image, cmd, has_files, paths).await {
        handle.kill().await;
        return Err(err);
    }

    info!("hypervisor running");
    Ok(handle)
}

async fn wait_for_socket(control_socket: &Path) -> Result<()> {
    let deadline = tokio::time::Instant::now() + SOCKET_WAIT_TIMEOUT;
    loop {
        if control_socket.exists() {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::hypervisor_start(format!(
                "control socket {} did not appear within {:?}",
                control_socket.display(),
                SOCKET_WAIT_TIMEOUT
            )));
        }
        sleep(SOCKET_POLL_INTERVAL).await;
    }
}

async fn configure(
    control_socket: &Path,
    kernel_image: &Path,
    cmd: &str,
    has_files: bool,
    paths: &ExecutionPaths,
) -> Result<()> {
    put_json(
        control_socket,
        "/machine-config",
        &json!({
            "vcpu_count": VCPU_COUNT,
            "mem_size_mib": MEM_SIZE_MIB,
            "smt": false,
        }),
    )
    .await?;

    put_json(
        control_socket,
        "/boot-source",
        &json!({
            "kernel_image_path": kernel_image,
            "boot_args": build_boot_args(cmd, has_files),
        }),
    )
    .await?;

    put_json(
        control_socket,
        "/drives/rootfs",
        &json!({
            "drive_id": "rootfs",
            "path_on_host": paths.rootfs_image(),
            "is_root_device": true,
            "is_read_only": false,
        }),
    )
    .await?;

    put_json(
        control_socket,
        "/vsock",
        &json!({
            "vsock_id": "result-channel",
            "guest_cid": 3,
            "uds_path": ResultChannel::uds_path(paths),
        }),
    )
    .await?;

    put_json(
        control_socket,
        "/actions",
        &json!({ "action_type": "InstanceStart" }),
    )
    .await?;

    Ok(())
}

/// Build the guest kernel command line. `cmd` is inserted by textual
/// substitution, not shell-escaped: embedded double quotes or metacharacters
/// are a known, deliberately-unfixed hazard.
pub fn build_boot_args(cmd: &str, has_files: bool) -> String {
    let embedded = if has_files {
        format!("cd /work && {cmd}")
    } else {
        cmd.to_string()
    };
    format!(r#"console=ttyS0 reboot=k panic=1 pci=off init=/sbin/init CMD="{embedded}""#)
}

/// Minimal async HTTP/1.1 client over a Unix-domain stream socket, grounded
/// in the hand-rolled line-protocol-over-`UnixStream` style the orchestrator
/// uses for its QMP client (`send_qmp_command`/`read_qmp_message`), adapted
/// from line-delimited JSON framing to HTTP/1.1 request/response framing.
async fn put_json(control_socket: &Path, path: &str, body: &serde_json::Value) -> Result<()> {
    let call = async {
        let mut stream = UnixStream::connect(control_socket)
            .await
            .map_err(|err| Error::hypervisor_config(format!("failed to connect to control socket: {err}")))?;

        let payload = serde_json::to_vec(body)?;
        let request = format!(
            "PUT {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            payload.len()
        );
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(|err| Error::hypervisor_config(format!("failed to write request: {err}")))?;
        stream
            .write_all(&payload)
            .await
            .map_err(|err| Error::hypervisor_config(format!("failed to write request body: {err}")))?;

        let mut response = Vec::new();
        stream
            .read_to_end(&mut response)
            .await
            .map_err(|err| Error::hypervisor_config(format!("failed to read response: {err}")))?;

        let (status, body) = parse_http_response(&response)?;
        if status == 204 {
            Ok(())
        } else {
            Err(Error::hypervisor_config(format!(
                "{path} returned HTTP {status}: {body}"
            )))
        }
    };

    timeout(API_CALL_TIMEOUT, call)
        .await
        .map_err(|_| Error::hypervisor_config(format!("{path} timed out after {API_CALL_TIMEOUT:?}")))?
}

fn parse_http_response(raw: &[u8]) -> Result<(u16, String)> {
    let text = String::from_utf8_lossy(raw);
    let mut parts = text.splitn(2, "\r\n\r\n");
    let head = parts.next().unwrap_or_default();
    let body = parts.next().unwrap_or_default().to_string();

    let status_line = head
        .lines()
        .next()
        .ok_or_else(|| Error::hypervisor_config("empty response from control socket"))?;
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| Error::hypervisor_config(format!("malformed status line: {status_line}")))?;

    Ok((status, body))
}

async fn read_log_tail(log_path: &Path, lines: usize) -> String {
    match fs::read_to_string(log_path).await {
        Ok(contents) => {
            let tail: Vec<&str> = contents.lines().rev().take(lines).collect();
            tail.into_iter().rev().collect::<Vec<_>>().join("\n")
        }
        Err(err) => format!("(failed to read hypervisor log {}: {err})", log_path.display()),
    }
}
