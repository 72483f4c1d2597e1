use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique counter used to mint [`ExecutionId`]s. Mirrors the
/// `SESSION_COUNTER` pattern used for handshake session IDs in the
/// orchestrator's broker.
static EXECUTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Opaque per-request identifier. Every artifact path this service creates
/// (mount point, vsock listener, control socket, log file, per-execution
/// directory) is namespaced by one of these, so concurrent requests never
/// collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutionId(String);

impl ExecutionId {
    /// Mint a fresh, process-unique execution ID: the process PID plus a
    /// monotonically increasing counter, so IDs are unique even across two
    /// requests that land in the same millisecond.
    pub fn new() -> Self {
        let counter = EXECUTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        let pid = std::process::id();
        Self(format!("{pid:x}-{counter:x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
