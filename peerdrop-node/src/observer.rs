//! Progress callbacks for a single connection

/// Receives progress, completion and error events of one transfer
///
/// Callbacks run on the transfer task and should return quickly.
pub trait TransferObserver: Send + Sync {
    /// Bytes moved so far out of the announced total
    fn on_progress(&self, bytes_transferred: u64, total_bytes: u64);

    /// Transfer finished and the peer confirmed it
    fn on_complete(&self) {}

    /// Transfer failed; the connection has dropped its socket
    fn on_error(&self, message: &str) {
        let _ = message;
    }
}

/// Observer used when no caller attached one
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TransferObserver for NoopObserver {
    fn on_progress(&self, _bytes_transferred: u64, _total_bytes: u64) {}
}
