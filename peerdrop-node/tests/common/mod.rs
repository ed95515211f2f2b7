//! Shared helpers for integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use peerdrop_common::wire::{Handshake, TOKEN_ACCEPT, WireReader, WireWriter};
use peerdrop_node::notifier::{Notification, NotificationLevel, Notifier};
use peerdrop_node::observer::TransferObserver;
use peerdrop_node::ProtocolTimeouts;
use tokio::net::TcpStream;

/// Install a test subscriber; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A port nothing listens on right now
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("0.0.0.0:0").expect("bind ephemeral port");
    listener.local_addr().expect("local addr").port()
}

/// Announce `name` with `announced` bytes to a node, wait for `ACCEPT`, send `body`
///
/// The socket is returned open so the caller decides when the peer goes away.
pub async fn begin_upload(port: u16, name: &str, announced: u64, body: &[u8]) -> TcpStream {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    {
        let (read_half, write_half) = stream.split();
        let mut reader = WireReader::new(read_half);
        let mut writer = WireWriter::new(write_half);
        writer
            .write_handshake(&Handshake::new(name, announced))
            .await
            .unwrap();
        assert_eq!(reader.read_string().await.unwrap(), TOKEN_ACCEPT);
        writer.write_chunk(body).await.unwrap();
    }
    stream
}

/// Short timeouts so failure paths resolve quickly
pub fn short_timeouts() -> ProtocolTimeouts {
    ProtocolTimeouts {
        connect_ms: 1_000,
        handshake_ms: 300,
        read_ms: 2_000,
    }
}

/// Poll `check` until it returns true or two seconds pass
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Notifier that keeps every notification
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn all(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn titles(&self, level: NotificationLevel) -> Vec<String> {
        self.all()
            .into_iter()
            .filter(|n| n.level == level)
            .map(|n| n.title)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.notifications.lock().unwrap().push(notification);
    }
}

/// Observer that keeps every callback
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub progress: Mutex<Vec<(u64, u64)>>,
    pub completed: Mutex<usize>,
    pub errors: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn last_progress(&self) -> Option<(u64, u64)> {
        self.progress.lock().unwrap().last().copied()
    }

    pub fn completed(&self) -> usize {
        *self.completed.lock().unwrap()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl TransferObserver for RecordingObserver {
    fn on_progress(&self, bytes_transferred: u64, total_bytes: u64) {
        self.progress
            .lock()
            .unwrap()
            .push((bytes_transferred, total_bytes));
    }

    fn on_complete(&self) {
        *self.completed.lock().unwrap() += 1;
    }

    fn on_error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }
}
