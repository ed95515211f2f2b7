//! Integration tests for node lifecycle and send dispatch

mod common;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{
    RecordingNotifier, RecordingObserver, begin_upload, eventually, free_port, init_tracing,
    short_timeouts,
};
use peerdrop_common::types::{Node, NodeConfig, TransferStatus};
use peerdrop_common::wire::{TOKEN_ACCEPT, WireReader, WireWriter};
use peerdrop_common::{MAX_TEST_NODES, TEST_PORT_RANGE};
use peerdrop_node::notifier::NotificationLevel;
use peerdrop_node::{
    ConnectionManager, ManagerSettings, MemoryConfigStore, MemoryHistory, NodeConfigStore,
    ProtocolTimeouts, TransferError,
};
use socket2::{Domain, Socket, Type};
use tempfile::TempDir;
use tokio::fs;
use tokio::net::TcpListener;

// ============================================================================
// Helper Functions
// ============================================================================

struct Harness {
    manager: Arc<ConnectionManager>,
    store: Arc<MemoryConfigStore>,
    notifier: Arc<RecordingNotifier>,
    history: Arc<MemoryHistory>,
}

fn harness(configs: Vec<NodeConfig>, settings: ManagerSettings) -> Harness {
    init_tracing();
    let store = Arc::new(MemoryConfigStore::new(configs));
    let notifier = RecordingNotifier::new();
    let history = Arc::new(MemoryHistory::new());
    let manager = Arc::new(ConnectionManager::with_settings(
        store.clone(),
        notifier.clone(),
        history.clone(),
        settings,
    ));
    Harness {
        manager,
        store,
        notifier,
        history,
    }
}

fn remote_only() -> ManagerSettings {
    ManagerSettings {
        local_fast_path: false,
        ..ManagerSettings::default()
    }
}

fn remote_with(timeouts: ProtocolTimeouts) -> ManagerSettings {
    ManagerSettings {
        timeouts,
        ..remote_only()
    }
}

fn config_in(name: &str, port: u16, dir: &Path) -> NodeConfig {
    NodeConfig::new(name, "127.0.0.1", port, dir.to_string_lossy())
}

async fn write_source(dir: &Path, name: &str, contents: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).await.unwrap();
    path
}

// ============================================================================
// Node Lifecycle
// ============================================================================

#[tokio::test]
async fn test_start_node_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let h = harness(Vec::new(), ManagerSettings::default());
    let config = config_in("inbox", free_port(), dir.path());

    let first = h.manager.start_node(config.clone()).await.unwrap();
    let second = h.manager.start_node(config.clone()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.manager.listening_ports().await, vec![config.port]);
    assert_eq!(h.manager.local_nodes().await.len(), 1);

    h.manager.stop().await;
}

#[tokio::test]
async fn test_same_port_different_config_conflicts() {
    let dir = TempDir::new().unwrap();
    let h = harness(Vec::new(), ManagerSettings::default());
    let port = free_port();

    h.manager
        .start_node(config_in("first", port, dir.path()))
        .await
        .unwrap();
    let err = h
        .manager
        .start_node(config_in("second", port, dir.path()))
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::BindConflict { port: p, .. } if p == port));
    let local = h.manager.local_nodes().await;
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].name, "first");

    h.manager.stop().await;
}

#[tokio::test]
async fn test_port_taken_by_other_process_leaves_no_residue() {
    let dir = TempDir::new().unwrap();
    let h = harness(Vec::new(), ManagerSettings::default());
    let blocker = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
    let port = blocker.local_addr().unwrap().port();

    let err = h
        .manager
        .start_node(config_in("blocked", port, dir.path()))
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::BindConflict { .. }), "unexpected error: {err:?}");
    assert!(h.manager.listening_ports().await.is_empty());
    assert!(h.manager.local_node().await.is_none());
    drop(blocker);
}

#[tokio::test]
async fn test_start_reports_failed_nodes() {
    let dir = TempDir::new().unwrap();
    let blocker = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
    let blocked_port = blocker.local_addr().unwrap().port();
    let good_port = free_port();

    let mut disabled = config_in("off", free_port(), dir.path());
    disabled.enabled = false;
    let h = harness(
        vec![
            config_in("good", good_port, dir.path()),
            config_in("blocked", blocked_port, dir.path()),
            disabled,
        ],
        ManagerSettings::default(),
    );

    let results = h.manager.start(false).await;

    assert!(h.manager.is_started());
    assert_eq!(results.len(), 2);
    assert!(results[0].result.is_ok());
    assert!(matches!(
        results[1].result,
        Err(TransferError::BindConflict { .. })
    ));
    assert_eq!(h.manager.listening_ports().await, vec![good_port]);
    assert_eq!(
        h.notifier.titles(NotificationLevel::Error),
        vec!["Node failed to start".to_string()]
    );

    h.manager.stop().await;
    assert!(!h.manager.is_started());
    assert!(h.manager.listening_ports().await.is_empty());
    drop(blocker);
}

#[tokio::test]
async fn test_restart_rebinds_ports() {
    let dir = TempDir::new().unwrap();
    let port = free_port();
    let h = harness(
        vec![config_in("inbox", port, dir.path())],
        ManagerSettings::default(),
    );

    let first = h.manager.start(false).await;
    assert!(first[0].result.is_ok());
    let second = h.manager.start(false).await;
    assert!(second[0].result.is_ok(), "restart failed: {:?}", second[0].result);
    assert_eq!(h.manager.listening_ports().await, vec![port]);

    assert!(h.manager.stop_node(port).await);
    assert!(!h.manager.stop_node(port).await);
    assert!(h.manager.local_nodes().await.is_empty());

    h.manager.stop().await;
}

#[tokio::test]
async fn test_test_mode_registers_loopback_peers() {
    let h = harness(Vec::new(), ManagerSettings::default());
    h.manager.start(true).await;

    let nodes = h.manager.available_nodes().await;
    assert!(nodes.len() <= MAX_TEST_NODES);
    for (index, node) in nodes.iter().enumerate() {
        assert_eq!(node.id, format!("test-node-{index}"));
        assert_eq!(node.name, format!("Test node {}", index + 1));
        assert_eq!(node.address, "127.0.0.1");
        assert!(TEST_PORT_RANGE.contains(&node.port));
    }

    h.manager.stop().await;
    assert!(h.manager.available_nodes().await.is_empty());
}

// ============================================================================
// Sending
// ============================================================================

#[tokio::test]
async fn test_loopback_send_copies_without_socket() {
    let source_dir = TempDir::new().unwrap();
    let target_dir = TempDir::new().unwrap();
    let port = free_port();
    let h = harness(
        vec![config_in("local", port, target_dir.path())],
        ManagerSettings::default(),
    );

    let source = write_source(source_dir.path(), "notes.txt", b"loopback").await;
    let observer = RecordingObserver::new();
    let record = h
        .manager
        .send_file_with_observer(&format!("127.0.0.1:{port}"), &source, observer.clone())
        .await
        .unwrap();

    assert_eq!(record.status, TransferStatus::Completed);
    assert_eq!(record.from_address, "127.0.0.1");
    assert_eq!(record.to_address, "127.0.0.1");
    assert_eq!(observer.last_progress(), Some((8, 8)));
    assert_eq!(observer.completed(), 1);
    assert_eq!(
        fs::read(target_dir.path().join("notes.txt")).await.unwrap(),
        b"loopback"
    );

    // Nothing was bound for the copy
    assert!(h.manager.listening_ports().await.is_empty());
    assert!(h.manager.connected_nodes().await.is_empty());
    assert_eq!(h.history.len(), 1);
    assert_eq!(
        h.notifier.titles(NotificationLevel::Info),
        vec!["File sent".to_string()]
    );
}

#[tokio::test]
async fn test_loopback_send_filters_before_copy() {
    let source_dir = TempDir::new().unwrap();
    let target_dir = TempDir::new().unwrap();
    let port = free_port();
    let mut config = config_in("docs", port, target_dir.path());
    config.auto_accept = true;
    config.exclude_patterns = vec!["*.tmp".to_string()];
    let h = harness(vec![config], ManagerSettings::default());

    let source = write_source(source_dir.path(), "a.tmp", b"scratch").await;
    let err = h
        .manager
        .send_file(&format!("127.0.0.1:{port}"), &source)
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::FilterRejected { .. }));
    assert!(!target_dir.path().join("a.tmp").exists());
    assert!(h.history.is_empty());
    assert_eq!(h.notifier.titles(NotificationLevel::Error).len(), 1);
}

#[tokio::test]
async fn test_remote_send_between_local_nodes() {
    let source_dir = TempDir::new().unwrap();
    let target_dir = TempDir::new().unwrap();
    let port = free_port();
    let h = harness(vec![config_in("inbox", port, target_dir.path())], remote_only());
    h.manager.start(false).await;

    let source = write_source(source_dir.path(), "report.pdf", &vec![7u8; 123_456]).await;
    let observer = RecordingObserver::new();
    let record = h
        .manager
        .send_file_with_observer(&format!("127.0.0.1:{port}"), &source, observer.clone())
        .await
        .unwrap();

    assert_eq!(record.status, TransferStatus::Completed);
    assert_eq!(observer.last_progress(), Some((123_456, 123_456)));

    // Sender and receiver share the history
    assert!(eventually(|| h.history.len() == 2).await);
    assert!(
        h.history
            .records()
            .iter()
            .all(|r| r.id == record.id && r.status == TransferStatus::Completed)
    );
    assert_eq!(
        fs::read(target_dir.path().join("report.pdf")).await.unwrap().len(),
        123_456
    );
    assert_eq!(h.manager.connected_nodes().await.len(), 1);

    h.manager.stop().await;
    assert!(h.manager.connected_nodes().await.is_empty());
}

#[tokio::test]
async fn test_send_checks_node_and_source_first() {
    let dir = TempDir::new().unwrap();
    let port = free_port();
    let h = harness(vec![config_in("inbox", port, dir.path())], remote_only());

    let err = h
        .manager
        .send_file("nobody", Path::new("/tmp/whatever"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::NodeNotFound { .. }));

    let missing = dir.path().join("missing.bin");
    let err = h
        .manager
        .send_file(&format!("127.0.0.1:{port}"), &missing)
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::SourceNotFound(_)));
    assert!(h.manager.connected_nodes().await.is_empty());
    assert_eq!(h.notifier.titles(NotificationLevel::Error).len(), 2);
}

#[tokio::test]
async fn test_send_after_connect_failure_reconnects() {
    let source_dir = TempDir::new().unwrap();
    let target_dir = TempDir::new().unwrap();
    let port = free_port();
    let h = harness(Vec::new(), remote_only());
    h.manager.start(false).await;
    assert!(
        h.manager
            .add_discovered_node(Node::new("peer", "127.0.0.1", port))
            .await
    );

    let source = write_source(source_dir.path(), "retry.txt", b"second time lucky").await;
    let err = h
        .manager
        .send_file(&format!("127.0.0.1:{port}"), &source)
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Connect { .. }));
    assert!(h.manager.connected_nodes().await.is_empty());

    h.manager
        .start_node(config_in("peer", port, target_dir.path()))
        .await
        .unwrap();
    let record = h
        .manager
        .send_file(&format!("127.0.0.1:{port}"), &source)
        .await
        .unwrap();
    assert_eq!(record.status, TransferStatus::Completed);

    h.manager.stop().await;
}

#[tokio::test]
async fn test_stop_aborts_in_flight_send() {
    let source_dir = TempDir::new().unwrap();
    let stalling = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = stalling.local_addr().unwrap().port();

    // Accepts the file, then stops reading
    let peer = tokio::spawn(async move {
        let (socket, _) = stalling.accept().await.unwrap();
        let (read_half, write_half) = socket.into_split();
        let mut reader = WireReader::new(read_half);
        let mut writer = WireWriter::new(write_half);
        reader.read_handshake().await.unwrap();
        writer.write_token(TOKEN_ACCEPT).await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop((reader, writer));
    });

    let h = harness(Vec::new(), remote_only());
    h.manager.start(false).await;
    h.manager
        .add_discovered_node(Node::new("slow", "127.0.0.1", port))
        .await;

    let source = write_source(source_dir.path(), "big.bin", &vec![1u8; 4 * 1024 * 1024]).await;
    let task = {
        let manager = Arc::clone(&h.manager);
        let node_id = format!("127.0.0.1:{port}");
        tokio::spawn(async move { manager.send_file(&node_id, &source).await })
    };

    tokio::time::sleep(Duration::from_millis(300)).await;
    h.manager.stop().await;

    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("send should end promptly after stop")
        .unwrap();
    assert!(matches!(result, Err(TransferError::ConnectionClosed)));
    assert!(h.history.is_empty());

    peer.abort();
}

#[tokio::test]
async fn test_handshake_timeout_evicts_connection() {
    let source_dir = TempDir::new().unwrap();
    let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = silent.local_addr().unwrap().port();
    let accepted = Arc::new(AtomicUsize::new(0));

    // Accepts every connection and never answers
    let peer = {
        let accepted = Arc::clone(&accepted);
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = silent.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                held.push(socket);
            }
        })
    };

    let h = harness(Vec::new(), remote_with(short_timeouts()));
    h.manager.start(false).await;
    h.manager
        .add_discovered_node(Node::new("mute", "127.0.0.1", port))
        .await;
    let node_id = format!("127.0.0.1:{port}");
    let source = write_source(source_dir.path(), "hello.txt", b"hello").await;

    let err = h.manager.send_file(&node_id, &source).await.unwrap_err();
    assert!(matches!(err, TransferError::HandshakeTimeout { .. }), "unexpected error: {err:?}");
    assert!(h.manager.connected_nodes().await.is_empty());

    let err = h.manager.send_file(&node_id, &source).await.unwrap_err();
    assert!(matches!(err, TransferError::HandshakeTimeout { .. }));
    assert!(eventually(|| accepted.load(Ordering::SeqCst) == 2).await);

    h.manager.stop().await;
    peer.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pending_connect_does_not_block_manager() {
    let source_dir = TempDir::new().unwrap();
    let target_dir = TempDir::new().unwrap();

    // A listener that never accepts, with its queue filled, leaves new connects hanging
    let backlog = Socket::new(Domain::IPV4, Type::STREAM, None).unwrap();
    backlog
        .bind(&SocketAddr::from(([127, 0, 0, 1], 0)).into())
        .unwrap();
    backlog.listen(0).unwrap();
    let stuck_addr = backlog.local_addr().unwrap().as_socket().unwrap();
    let fillers: Vec<_> = (0..4)
        .filter_map(|_| {
            std::net::TcpStream::connect_timeout(&stuck_addr, Duration::from_millis(200)).ok()
        })
        .collect();

    let timeouts = ProtocolTimeouts {
        connect_ms: 5_000,
        ..short_timeouts()
    };
    let h = harness(Vec::new(), remote_with(timeouts));
    h.manager.start(false).await;
    h.manager
        .add_discovered_node(Node::new("stuck", "127.0.0.1", stuck_addr.port()))
        .await;

    let source = write_source(source_dir.path(), "hello.txt", b"hello").await;
    let task = {
        let manager = Arc::clone(&h.manager);
        let node_id = format!("127.0.0.1:{}", stuck_addr.port());
        tokio::spawn(async move { manager.send_file(&node_id, &source).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    let quick = Duration::from_millis(500);
    tokio::time::timeout(quick, h.manager.local_nodes())
        .await
        .expect("node views must not wait for another peer's connect");
    tokio::time::timeout(quick, h.manager.available_nodes())
        .await
        .expect("node views must not wait for another peer's connect");
    let other_port = free_port();
    tokio::time::timeout(
        quick,
        h.manager
            .start_node(config_in("other", other_port, target_dir.path())),
    )
    .await
    .expect("starting a node must not wait for another peer's connect")
    .unwrap();

    tokio::time::timeout(Duration::from_secs(1), h.manager.stop())
        .await
        .expect("stop must not wait for another peer's connect");
    let result = tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("send should end promptly after stop")
        .unwrap();
    assert!(result.is_err());
    assert!(h.manager.connected_nodes().await.is_empty());

    drop(fillers);
}

#[tokio::test]
async fn test_stop_aborts_in_flight_receive() {
    let target_dir = TempDir::new().unwrap();
    let port = free_port();
    let h = harness(
        vec![config_in("inbox", port, target_dir.path())],
        ManagerSettings::default(),
    );
    h.manager.start(false).await;

    let partial = target_dir.path().join("partial.bin");
    let upload = begin_upload(port, "partial.bin", 1_000_000, &[3u8; 1_000]).await;
    assert!(eventually(|| partial.exists()).await);

    tokio::time::timeout(Duration::from_secs(2), h.manager.stop())
        .await
        .expect("stop should not wait for the receive");

    assert!(
        eventually(|| h.notifier.titles(NotificationLevel::Error) == ["Receive failed"]).await
    );
    assert!(eventually(|| !partial.exists()).await);
    assert!(h.history.is_empty());

    drop(upload);
}

// ============================================================================
// Node Views
// ============================================================================

#[tokio::test]
async fn test_available_nodes_follow_store() {
    let dir = TempDir::new().unwrap();
    let h = harness(Vec::new(), ManagerSettings::default());
    assert!(h.manager.available_nodes().await.is_empty());

    h.store.add(config_in("later", 9100, dir.path()));
    let nodes = h.manager.available_nodes().await;
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].id, "127.0.0.1:9100");

    h.store.remove(0).unwrap();
    assert!(h.manager.available_nodes().await.is_empty());
}
