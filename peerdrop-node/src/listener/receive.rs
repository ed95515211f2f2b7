//! Inbound transfer handling

use std::sync::Arc;

use peerdrop_common::filter::should_keep;
use peerdrop_common::format_file_size;
use peerdrop_common::types::{NodeConfig, TransferRecord};
use tokio::fs;
use tracing::{debug, info, warn};

use super::ListenerContext;
use crate::connection::Connection;
use crate::error::TransferError;
use crate::notifier::Notification;

/// What happened to a received file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// File passed the node's rules and stays in the target directory
    Kept(TransferRecord),
    /// File arrived in full but was deleted by the node's rules
    Rejected(TransferRecord),
}

/// Receive one file on an accepted connection and apply the node's rules
///
/// The connection is always closed before this returns. Filtering runs
/// after the peer has been sent `COMPLETE`, so a rejected file still counts
/// as a completed transfer.
pub(crate) async fn handle_inbound(
    connection: Arc<Connection>,
    config: &NodeConfig,
    ctx: &ListenerContext,
) -> Result<ReceiveOutcome, TransferError> {
    let result = connection.receive_file().await;
    connection.close();

    let outcome = match result {
        Ok(record) => apply_filter(record, config).await,
        Err(e) => {
            if let Some(partial) = e.partial_file() {
                if let Err(remove_err) = fs::remove_file(partial).await {
                    debug!(file = %partial.display(), error = %remove_err, "failed to remove partial file");
                }
            }
            warn!(
                port = config.port,
                peer = %connection.remote_node().address,
                kind = %e.kind(),
                error = %e,
                "receive failed"
            );
            ctx.notifier.notify(Notification::error(
                "Receive failed",
                format!("Receiving a file on {} failed: {e}", config.name),
            ));
            return Err(e);
        }
    };

    match &outcome {
        ReceiveOutcome::Kept(record) => {
            info!(
                port = config.port,
                file = %record.file_name,
                bytes = record.file_size,
                "file received"
            );
            ctx.notifier.notify(Notification::info(
                "File received",
                format!(
                    "Received {} ({}) from {} into {}",
                    record.file_name,
                    format_file_size(record.file_size),
                    record.from_address,
                    config.target_directory
                ),
            ));
            ctx.history.record(record.clone());
        }
        ReceiveOutcome::Rejected(record) => {
            info!(port = config.port, file = %record.file_name, "file rejected by filter");
            ctx.notifier.notify(Notification::warning(
                "File rejected",
                format!(
                    "{} from {} does not match the rules of {} and was deleted",
                    record.file_name, record.from_address, config.name
                ),
            ));
            ctx.history.record(record.clone());
        }
    }

    Ok(outcome)
}

async fn apply_filter(record: TransferRecord, config: &NodeConfig) -> ReceiveOutcome {
    if should_keep(&record.file_name, config) {
        return ReceiveOutcome::Kept(record);
    }

    let path = std::path::Path::new(&config.target_directory).join(&record.file_name);
    if let Err(e) = fs::remove_file(&path).await {
        warn!(file = %path.display(), error = %e, "failed to delete rejected file");
    }
    ReceiveOutcome::Rejected(record)
}
