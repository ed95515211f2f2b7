//! Single-file transfer over one TCP socket
//!
//! A `Connection` owns at most one socket and runs the handshake protocol
//! described in [`peerdrop_common::wire`]. Protocol operations are
//! single-flight: concurrent calls on the same instance wait on the stream
//! lock and run one after another.
//!
//! `close()` never takes the stream lock. It flips a watch flag that every
//! in-flight operation races against, so a transfer blocked on the network
//! fails with `ConnectionClosed` as soon as another task closes it. A closed
//! connection stays closed.
//!
//! Each socket carries one file. After a send finishes (or fails) the socket
//! is dropped and the next `send_file` connects again.

use std::fmt;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use peerdrop_common::types::{Node, TransferRecord, TransferStatus};
use peerdrop_common::validators::validate_file_name;
use peerdrop_common::wire::{Handshake, TOKEN_ACCEPT, TOKEN_COMPLETE, WireReader, WireWriter};
use peerdrop_common::{CHUNK_SIZE, node_id};
use socket2::{SockRef, TcpKeepalive};
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::ProtocolTimeouts;
use crate::error::TransferError;
use crate::observer::{NoopObserver, TransferObserver};

/// Idle time before the first TCP keep-alive probe
const KEEPALIVE_TIME: Duration = Duration::from_secs(30);

/// One peer link carrying whole-file transfers
pub struct Connection {
    remote_node: Node,
    receive_dir: PathBuf,
    timeouts: ProtocolTimeouts,
    stream: AsyncMutex<Option<TcpStream>>,
    closed: watch::Sender<bool>,
    observer: Mutex<Option<Arc<dyn TransferObserver>>>,
}

impl Connection {
    /// Create an outbound connection; the socket is opened on first use
    pub fn new(
        remote_node: Node,
        receive_dir: impl Into<PathBuf>,
        timeouts: ProtocolTimeouts,
    ) -> Self {
        Self::with_stream(None, remote_node, receive_dir.into(), timeouts)
    }

    /// Wrap a socket accepted by a listener
    pub fn from_stream(
        stream: TcpStream,
        remote_node: Node,
        receive_dir: impl Into<PathBuf>,
        timeouts: ProtocolTimeouts,
    ) -> Self {
        configure_keepalive(&stream);
        Self::with_stream(Some(stream), remote_node, receive_dir.into(), timeouts)
    }

    fn with_stream(
        stream: Option<TcpStream>,
        remote_node: Node,
        receive_dir: PathBuf,
        timeouts: ProtocolTimeouts,
    ) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            remote_node,
            receive_dir,
            timeouts,
            stream: AsyncMutex::new(stream),
            closed,
            observer: Mutex::new(None),
        }
    }

    /// Peer this connection talks to
    pub fn remote_node(&self) -> &Node {
        &self.remote_node
    }

    /// Directory received files are written to
    pub fn receive_dir(&self) -> &Path {
        &self.receive_dir
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Attach the observer for subsequent operations, replacing any previous one
    pub fn set_observer(&self, observer: Arc<dyn TransferObserver>) {
        *self.observer.lock().expect("observer lock poisoned") = Some(observer);
    }

    pub fn clear_observer(&self) {
        *self.observer.lock().expect("observer lock poisoned") = None;
    }

    fn observer(&self) -> Arc<dyn TransferObserver> {
        self.observer
            .lock()
            .expect("observer lock poisoned")
            .clone()
            .unwrap_or_else(|| Arc::new(NoopObserver))
    }

    /// Close the connection
    ///
    /// Idempotent. In-flight operations fail with `ConnectionClosed` and every
    /// later operation is rejected.
    pub fn close(&self) {
        let was_closed = self.closed.send_replace(true);
        // An operation in flight owns the socket and drops it when it aborts
        if let Ok(mut stream) = self.stream.try_lock() {
            stream.take();
        }
        if !was_closed {
            debug!(peer = %self.remote_node.id, "connection closed");
        }
    }

    /// Open the socket now instead of on the next send
    ///
    /// # Errors
    ///
    /// Returns `Connect` if the peer is unreachable within the connect timeout.
    pub async fn connect(&self) -> Result<(), TransferError> {
        self.until_closed(async {
            let mut stream = self.stream.lock().await;
            if stream.is_none() {
                *stream = Some(self.open_stream().await?);
            }
            Ok(())
        })
        .await
    }

    /// Send one file to the peer
    ///
    /// Returns the `COMPLETED` record once the peer confirmed every byte.
    ///
    /// # Errors
    ///
    /// Returns `SourceNotFound` before any network work if `path` is not a
    /// file, otherwise the protocol error that ended the transfer. The socket
    /// is dropped in every case.
    pub async fn send_file(&self, path: &Path) -> Result<TransferRecord, TransferError> {
        self.send_file_observed(path, self.observer()).await
    }

    /// Like [`send_file`](Self::send_file), reporting to `observer` instead
    /// of the attached one
    ///
    /// # Errors
    ///
    /// Same as [`send_file`](Self::send_file).
    pub async fn send_file_observed(
        &self,
        path: &Path,
        observer: Arc<dyn TransferObserver>,
    ) -> Result<TransferRecord, TransferError> {
        let result = self.until_closed(self.send(path, observer.as_ref())).await;
        self.report(observer.as_ref(), &result);
        result
    }

    /// Receive one file from the peer into the receive directory
    ///
    /// # Errors
    ///
    /// Returns `Config` (without answering the peer) if the file cannot be
    /// stored, or the protocol error that ended the transfer. A `Stream`
    /// error names the partially written file so the caller can delete it.
    pub async fn receive_file(&self) -> Result<TransferRecord, TransferError> {
        let observer = self.observer();
        let mut written = None;
        let result = self
            .until_closed(self.receive(observer.as_ref(), &mut written))
            .await;

        if let (Err(TransferError::ConnectionClosed), Some(path)) = (&result, written) {
            // Nobody else knows where the aborted receive was writing
            if let Err(e) = fs::remove_file(&path).await {
                debug!(file = %path.display(), error = %e, "failed to remove partial file");
            }
        }

        self.report(observer.as_ref(), &result);
        result
    }

    /// Run `operation` unless the connection is or becomes closed
    async fn until_closed<T>(
        &self,
        operation: impl Future<Output = Result<T, TransferError>>,
    ) -> Result<T, TransferError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(TransferError::ConnectionClosed);
        }

        let result = tokio::select! {
            biased;
            _ = async { let _ = closed.wait_for(|closed| *closed).await; } => {
                Err(TransferError::ConnectionClosed)
            }
            result = operation => result,
        };

        if matches!(result, Err(TransferError::ConnectionClosed)) {
            self.stream.lock().await.take();
        }
        result
    }

    fn report(&self, observer: &dyn TransferObserver, result: &Result<TransferRecord, TransferError>) {
        match result {
            Ok(record) => {
                debug!(
                    peer = %self.remote_node.id,
                    file = %record.file_name,
                    bytes = record.file_size,
                    "transfer completed"
                );
                observer.on_complete();
            }
            Err(e) => {
                debug!(peer = %self.remote_node.id, kind = %e.kind(), error = %e, "transfer failed");
                observer.on_error(&e.to_string());
            }
        }
    }

    async fn open_stream(&self) -> Result<TcpStream, TransferError> {
        let address = node_id(&self.remote_node.address, self.remote_node.port);
        let target = (self.remote_node.address.as_str(), self.remote_node.port);

        let stream = match timeout(self.timeouts.connect(), TcpStream::connect(target)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(TransferError::Connect { address, source }),
            Err(_) => {
                return Err(TransferError::Connect {
                    address,
                    source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
                });
            }
        };

        configure_keepalive(&stream);
        debug!(peer = %address, "connected");
        Ok(stream)
    }

    async fn send(
        &self,
        path: &Path,
        observer: &dyn TransferObserver,
    ) -> Result<TransferRecord, TransferError> {
        let metadata = match fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => return Err(TransferError::SourceNotFound(path.to_path_buf())),
        };
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                TransferError::config(format!("{} has no UTF-8 file name", path.display()))
            })?;

        let mut slot = self.stream.lock().await;
        let mut stream = match slot.take() {
            Some(stream) => stream,
            None => self.open_stream().await?,
        };

        let local_address = stream
            .local_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_default();
        let handshake = Handshake::new(file_name, metadata.len());
        let record = TransferRecord::with_id(
            &handshake.transfer_id,
            local_address,
            &self.remote_node.address,
            file_name,
            handshake.file_size,
        );

        let (read_half, write_half) = stream.split();
        let mut reader = WireReader::new(read_half);
        let mut writer = WireWriter::new(write_half);

        writer
            .write_handshake(&handshake)
            .await
            .map_err(|e| stream_error("sending handshake", e))?;
        self.expect_token(&mut reader, TOKEN_ACCEPT).await?;
        let record = record.advance(TransferStatus::Accepted)?;

        self.stream_file(path, handshake.file_size, &mut writer, observer)
            .await?;
        self.expect_token(&mut reader, TOKEN_COMPLETE).await?;

        // One file per socket
        if let Err(e) = stream.shutdown().await {
            debug!(peer = %self.remote_node.id, error = %e, "socket shutdown failed");
        }
        drop(slot);

        Ok(record.advance(TransferStatus::Completed)?)
    }

    async fn stream_file<W>(
        &self,
        path: &Path,
        total: u64,
        writer: &mut WireWriter<W>,
        observer: &dyn TransferObserver,
    ) -> Result<(), TransferError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut file = File::open(path)
            .await
            .map_err(|e| stream_error("opening source file", e))?;
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut sent: u64 = 0;

        if total == 0 {
            observer.on_progress(0, 0);
        }

        while sent < total {
            let to_read = (total - sent).min(CHUNK_SIZE as u64) as usize;
            let n = file
                .read(&mut buffer[..to_read])
                .await
                .map_err(|e| stream_error("reading source file", e))?;
            if n == 0 {
                return Err(TransferError::stream(format!(
                    "source file ended after {sent} of {total} bytes"
                )));
            }

            match timeout(self.timeouts.read(), writer.write_chunk(&buffer[..n])).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(stream_error("sending file data", e)),
                Err(_) => {
                    return Err(TransferError::stream(format!(
                        "peer stopped reading for {:?}",
                        self.timeouts.read()
                    )));
                }
            }

            sent += n as u64;
            observer.on_progress(sent, total);
        }

        Ok(())
    }

    /// Wait for the peer's next token, bounded by the handshake timeout
    async fn expect_token<R>(
        &self,
        reader: &mut WireReader<R>,
        expected: &'static str,
    ) -> Result<(), TransferError>
    where
        R: AsyncRead + Unpin,
    {
        let after = self.timeouts.handshake();
        match timeout(after, reader.read_string()).await {
            Ok(Ok(token)) if token == expected => Ok(()),
            Ok(Ok(received)) => Err(TransferError::HandshakeRejected { expected, received }),
            // Peer hung up without answering
            Ok(Err(e)) if e.is_connection_closed() => {
                Err(TransferError::HandshakeTimeout { expected, after })
            }
            Ok(Err(e)) => Err(stream_error("reading response", e)),
            Err(_) => Err(TransferError::HandshakeTimeout { expected, after }),
        }
    }

    async fn receive(
        &self,
        observer: &dyn TransferObserver,
        written: &mut Option<PathBuf>,
    ) -> Result<TransferRecord, TransferError> {
        let mut slot = self.stream.lock().await;
        let mut stream = slot.take().ok_or(TransferError::ConnectionClosed)?;

        let from_address = stream
            .peer_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|_| self.remote_node.address.clone());
        let to_address = stream
            .local_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_default();

        let (read_half, write_half) = stream.split();
        let mut reader = WireReader::new(read_half);
        let mut writer = WireWriter::new(write_half);

        let handshake = match timeout(self.timeouts.read(), reader.read_handshake()).await {
            Ok(Ok(handshake)) => handshake,
            Ok(Err(e)) => return Err(stream_error("reading handshake", e)),
            Err(_) => return Err(TransferError::stream("timed out waiting for handshake")),
        };

        // Anything wrong with the destination ends the exchange without ACCEPT
        let target = self.prepare_target(&handshake.file_name).await?;
        let mut file = File::create(&target).await.map_err(|e| {
            TransferError::config(format!("cannot create {}: {e}", target.display()))
        })?;
        *written = Some(target.clone());

        let record = TransferRecord::with_id(
            handshake.transfer_id,
            from_address,
            to_address,
            &handshake.file_name,
            handshake.file_size,
        );

        writer
            .write_token(TOKEN_ACCEPT)
            .await
            .map_err(|e| stream_error("sending ACCEPT", e).with_partial_file(&target))?;
        let record = record.advance(TransferStatus::Accepted)?;

        self.receive_bytes(&mut reader, &mut file, handshake.file_size, observer)
            .await
            .map_err(|e| e.with_partial_file(&target))?;

        writer
            .write_token(TOKEN_COMPLETE)
            .await
            .map_err(|e| stream_error("sending COMPLETE", e).with_partial_file(&target))?;
        drop(slot);

        Ok(record.advance(TransferStatus::Completed)?)
    }

    async fn receive_bytes<R>(
        &self,
        reader: &mut WireReader<R>,
        file: &mut File,
        total: u64,
        observer: &dyn TransferObserver,
    ) -> Result<(), TransferError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut received: u64 = 0;

        if total == 0 {
            observer.on_progress(0, 0);
        }

        while received < total {
            let to_read = (total - received).min(CHUNK_SIZE as u64) as usize;
            let n = match timeout(self.timeouts.read(), reader.read_chunk(&mut buffer[..to_read]))
                .await
            {
                Ok(Ok(0)) => {
                    return Err(TransferError::stream(format!(
                        "peer closed after {received} of {total} bytes"
                    )));
                }
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(stream_error("reading file data", e)),
                Err(_) => {
                    return Err(TransferError::stream(format!(
                        "no data from peer for {:?}",
                        self.timeouts.read()
                    )));
                }
            };

            file.write_all(&buffer[..n])
                .await
                .map_err(|e| stream_error("writing received data", e))?;
            received += n as u64;
            observer.on_progress(received, total);
        }

        file.flush()
            .await
            .map_err(|e| stream_error("flushing received file", e))?;
        file.sync_all()
            .await
            .map_err(|e| stream_error("syncing received file", e))?;
        Ok(())
    }

    /// Check that `file_name` can be stored in the receive directory
    async fn prepare_target(&self, file_name: &str) -> Result<PathBuf, TransferError> {
        validate_file_name(file_name)
            .map_err(|e| TransferError::config(format!("invalid file name {file_name:?}: {e}")))?;

        let dir = &self.receive_dir;
        fs::create_dir_all(dir).await.map_err(|e| {
            TransferError::config(format!("cannot create {}: {e}", dir.display()))
        })?;

        let metadata = fs::metadata(dir).await.map_err(|e| {
            TransferError::config(format!("cannot access {}: {e}", dir.display()))
        })?;
        if !metadata.is_dir() {
            return Err(TransferError::config(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
        if metadata.permissions().readonly() {
            return Err(TransferError::config(format!(
                "{} is not writable",
                dir.display()
            )));
        }

        let target = dir.join(file_name);
        if let Ok(existing) = fs::metadata(&target).await {
            if existing.is_dir() {
                return Err(TransferError::config(format!(
                    "{} is a directory",
                    target.display()
                )));
            }
            if existing.permissions().readonly() {
                return Err(TransferError::config(format!(
                    "{} is not writable",
                    target.display()
                )));
            }
        }

        Ok(target)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("remote_node", &self.remote_node)
            .field("receive_dir", &self.receive_dir)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn stream_error(context: &str, err: impl fmt::Display) -> TransferError {
    TransferError::stream(format!("{context}: {err}"))
}

fn configure_keepalive(stream: &TcpStream) {
    let keepalive = TcpKeepalive::new().with_time(KEEPALIVE_TIME);
    if let Err(e) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
        warn!(error = %e, "failed to enable TCP keep-alive");
    }
}
