use std::path::PathBuf;

use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::net::UnixListener;
use tracing::{info, instrument, warn};

use super::paths::ExecutionPaths;
use crate::error::{Error, Result};

/// Guest vsock port the in-guest helper connects to. Arbitrary but fixed;
/// must match what the (out-of-scope) guest helper is built to dial.
pub const GUEST_RESULT_PORT: u32 = 52;

/// Cap on the JSON record size, to bound memory use if a misbehaving guest
/// never closes its connection.
const MAX_RECORD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct GuestResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Host side of the result channel (component C): a `UnixListener` that
/// Firecracker's vsock device forwards one guest-initiated connection to.
///
/// Firecracker proxies a guest connection on vsock port `P` to the host path
/// `<uds_path>_<P>` (see the vsock multiplexer/listener-path split documented
/// by real Firecracker clients), so the listener here binds that derived
/// path rather than `uds_path` itself.
pub struct ResultChannel {
    listener: UnixListener,
    listener_path: PathBuf,
}

impl ResultChannel {
    /// Bind the listener for this execution. Must happen before the
    /// hypervisor controller configures the vsock device, so Firecracker can
    /// connect its end of the forward as soon as the guest dials out.
    #[instrument(skip(paths))]
    pub fn bind(paths: &ExecutionPaths) -> Result<Self> {
        let listener_path = vsock_listener_path(paths);
        if listener_path.exists() {
            let _ = std::fs::remove_file(&listener_path);
        }
        let listener = UnixListener::bind(&listener_path)
            .map_err(|err| Error::staging(format!("failed to bind result listener: {err}")))?;
        info!(path = %listener_path.display(), "bound guest result listener");
        Ok(Self {
            listener,
            listener_path,
        })
    }

    /// The UDS path Firecracker's vsock device should be configured with.
    pub fn uds_path(paths: &ExecutionPaths) -> PathBuf {
        paths.vsock_uds()
    }

    /// Accept exactly one connection and decode exactly one JSON record from
    /// it, then stop listening. No deadline is applied here: the caller races
    /// this against the execution deadline (component E).
    pub async fn accept_one(self) -> Result<GuestResult> {
        let (mut stream, _) = self
            .listener
            .accept()
            .await
            .map_err(|err| Error::staging(format!("failed to accept guest connection: {err}")))?;

        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream
                .read(&mut chunk)
                .await
                .map_err(|err| Error::staging(format!("failed to read guest result: {err}")))?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if buf.len() > MAX_RECORD_BYTES {
                return Err(Error::staging("guest result record exceeded size limit"));
            }
        }

        serde_json::from_slice(&buf)
            .map_err(|err| Error::staging(format!("malformed guest result record: {err}")))
    }
}

impl Drop for ResultChannel {
    fn drop(&mut self) {
        if self.listener_path.exists() {
            if let Err(err) = std::fs::remove_file(&self.listener_path) {
                warn!(
                    path = %self.listener_path.display(),
                    %err,
                    "failed to unlink result listener socket"
                );
            }
        }
    }
}

pub(crate) fn vsock_listener_path(paths: &ExecutionPaths) -> PathBuf {
    let base = paths.vsock_uds();
    let mut encoded = base.into_os_string();
    encoded.push(format!("_{GUEST_RESULT_PORT}"));
    PathBuf::from(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::execution_id::ExecutionId;
    use std::path::Path;
    use tokio::io::AsyncWriteExt;
    use tokio::net::UnixStream;

    #[test]
    fn listener_path_is_derived_from_uds_path_and_port() {
        let id = ExecutionId::new();
        let paths = ExecutionPaths::new(Path::new("/tmp/vmexecd"), &id);
        let listener_path = vsock_listener_path(&paths);
        assert_eq!(
            listener_path,
            PathBuf::from(format!(
                "{}_{GUEST_RESULT_PORT}",
                paths.vsock_uds().display()
            ))
        );
    }

    #[tokio::test]
    async fn accept_one_decodes_a_single_json_record() {
        let id = ExecutionId::new();
        let dir = tempfile::tempdir().unwrap();
        let paths = ExecutionPaths::new(dir.path(), &id);
        std::fs::create_dir_all(paths.root()).unwrap();

        let channel = ResultChannel::bind(&paths).unwrap();
        let listener_path = vsock_listener_path(&paths);

        let writer = tokio::spawn(async move {
            let mut stream = UnixStream::connect(&listener_path).await.unwrap();
            let record = serde_json::json!({
                "stdout": "hi\n",
                "stderr": "",
                "exit_code": 0,
            });
            stream
                .write_all(record.to_string().as_bytes())
                .await
                .unwrap();
            stream.shutdown().await.unwrap();
        });

        let result = channel.accept_one().await.unwrap();
        writer.await.unwrap();

        assert_eq!(result.stdout, "hi\n");
        assert_eq!(result.stderr, "");
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn accept_one_rejects_malformed_json() {
        let id = ExecutionId::new();
        let dir = tempfile::tempdir().unwrap();
        let paths = ExecutionPaths::new(dir.path(), &id);
        std::fs::create_dir_all(paths.root()).unwrap();

        let channel = ResultChannel::bind(&paths).unwrap();
        let listener_path = vsock_listener_path(&paths);

        tokio::spawn(async move {
            let mut stream = UnixStream::connect(&listener_path).await.unwrap();
            stream.write_all(b"not json").await.unwrap();
            stream.shutdown().await.unwrap();
        });

        let err = channel.accept_one().await.unwrap_err();
        assert!(!err.is_bad_request());
    }
}
