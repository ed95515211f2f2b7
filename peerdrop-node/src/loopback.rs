//! Direct copy into a node served by this process
//!
//! Used instead of the wire protocol when the target node is on this host.
//! Unlike a network receive, the node's include/exclude rules are checked
//! before anything is written.

use std::path::Path;

use peerdrop_common::LOOPBACK_ADDRESS;
use peerdrop_common::filter::should_keep;
use peerdrop_common::types::{NodeConfig, TransferRecord, TransferStatus};
use peerdrop_common::validators::validate_file_name;
use tokio::fs;
use tracing::debug;

use crate::error::TransferError;
use crate::observer::TransferObserver;

/// Copy `source` into the target directory of `config`, overwriting
///
/// # Errors
///
/// Returns `SourceNotFound` if `source` is not a file, `FilterRejected` if
/// the node's rules refuse it, `Config` if the target directory is unusable,
/// or `Stream` if the copy fails.
pub async fn copy_to_node(
    source: &Path,
    config: &NodeConfig,
    observer: &dyn TransferObserver,
) -> Result<TransferRecord, TransferError> {
    let metadata = match fs::metadata(source).await {
        Ok(metadata) if metadata.is_file() => metadata,
        _ => return Err(TransferError::SourceNotFound(source.to_path_buf())),
    };
    let file_name = source
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            TransferError::config(format!("{} has no UTF-8 file name", source.display()))
        })?;
    validate_file_name(file_name)
        .map_err(|e| TransferError::config(format!("invalid file name {file_name:?}: {e}")))?;

    if !should_keep(file_name, config) {
        return Err(TransferError::FilterRejected {
            file_name: file_name.to_string(),
        });
    }

    let target_dir = Path::new(&config.target_directory);
    fs::create_dir_all(target_dir).await.map_err(|e| {
        TransferError::config(format!("cannot create {}: {e}", target_dir.display()))
    })?;
    let target = target_dir.join(file_name);

    let record = TransferRecord::pending(
        LOOPBACK_ADDRESS,
        LOOPBACK_ADDRESS,
        file_name,
        metadata.len(),
    )
    .advance(TransferStatus::Accepted)?;

    if is_same_file(source, &target).await {
        debug!(file = %target.display(), "source already in target directory");
    } else {
        fs::copy(source, &target).await.map_err(|e| {
            TransferError::stream(format!("copying to {}: {e}", target.display()))
        })?;
    }

    observer.on_progress(metadata.len(), metadata.len());
    Ok(record.advance(TransferStatus::Completed)?)
}

/// Copying a file onto itself would truncate it
async fn is_same_file(source: &Path, target: &Path) -> bool {
    match (fs::canonicalize(source).await, fs::canonicalize(target).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
