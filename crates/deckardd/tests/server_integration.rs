//! Integration tests for the Unix socket server.
//!
//! These tests run a DaemonServer backed by a real registry and talk to it
//! over its socket: handshake, request routing, error reporting and
//! graceful shutdown.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use deckard_core::{CatalogsConfig, DeckardConfig, LocaleSet, RunnerConfig, SessionToken};
use deckard_protocol::{ClientMessage, DaemonMessage, MessageType, ProtocolVersion};
use deckardd::registry::{spawn_registry, RegistryHandle};
use deckardd::server::DaemonServer;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for server socket to appear
const SOCKET_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Interval between socket existence checks
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Grace period for server shutdown
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_millis(100);

// ============================================================================
// Test Helpers
// ============================================================================

/// Test server context that manages server lifecycle and cleanup.
struct TestServer {
    socket_path: PathBuf,
    registry: RegistryHandle,
    cancel_token: CancellationToken,
    _temp_dir: TempDir, // Keep alive for RAII cleanup
}

impl TestServer {
    /// Spawns a server whose content root holds one module and one language.
    async fn spawn() -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let socket_path = temp_dir.path().join("run").join("test.sock");
        let content_root = temp_dir.path().join("content");
        let storage_root = temp_dir.path().join("storage");

        fs::create_dir_all(content_root.join("LANGS/fr_FR/LC_MESSAGES")).unwrap();
        fs::create_dir_all(content_root.join("demo/dialogs")).unwrap();
        fs::write(content_root.join("demo/main.ui"), "<interface/>").unwrap();
        fs::write(content_root.join("demo/dialogs/about.glade"), "<interface/>").unwrap();
        fs::write(content_root.join("demo/README"), "not a ui file").unwrap();
        fs::create_dir_all(&storage_root).unwrap();

        let config = DeckardConfig {
            socket_path: socket_path.clone(),
            content_root: content_root.clone(),
            runner: RunnerConfig {
                program: "sh".to_string(),
                args: vec!["-c".into(), "cat >/dev/null".into(), "worker".into()],
            },
            catalogs: CatalogsConfig {
                compiler: "sh".to_string(),
                compiler_args: vec!["-c".into(), "cp \"$4\" \"$3\"".into(), "fakefmt".into()],
                storage_root: Some(storage_root),
                ..CatalogsConfig::default()
            },
            ..DeckardConfig::default()
        };

        let registry = spawn_registry(&config, Arc::new(LocaleSet::permissive()))
            .expect("registry should start");
        let cancel_token = CancellationToken::new();

        let server = DaemonServer::new(
            socket_path.clone(),
            registry.clone(),
            content_root,
            cancel_token.clone(),
        );

        // Spawn server in background
        tokio::spawn(async move {
            let _ = server.run().await;
        });

        // Wait for socket to be ready with timeout
        let start = tokio::time::Instant::now();
        while start.elapsed() < SOCKET_WAIT_TIMEOUT {
            if socket_path.exists() {
                break;
            }
            sleep(SOCKET_POLL_INTERVAL).await;
        }

        assert!(
            socket_path.exists(),
            "Server socket did not appear within {SOCKET_WAIT_TIMEOUT:?}"
        );

        TestServer {
            socket_path,
            registry,
            cancel_token,
            _temp_dir: temp_dir,
        }
    }

    /// Creates a client connection to the server.
    async fn connect(&self) -> TestClient {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .expect("connect to server");
        TestClient::new(stream)
    }

    /// Creates a client that has completed the handshake.
    async fn connect_ready(&self) -> TestClient {
        let mut client = self.connect().await;
        client.send(ClientMessage::connect(None)).await;
        let response = client.recv().await;
        assert!(
            matches!(response, DaemonMessage::Connected { .. }),
            "expected Connected, got: {response:?}"
        );
        client
    }

    /// Shuts down the server and the registry.
    async fn shutdown(self) {
        self.cancel_token.cancel();
        self.registry.shutdown().await;
        sleep(SHUTDOWN_GRACE_PERIOD).await;
    }
}

/// Test client connection with protocol helpers.
struct TestClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl TestClient {
    fn new(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Sends a message to the server.
    async fn send(&mut self, msg: ClientMessage) {
        let json = serde_json::to_string(&msg).unwrap();
        self.send_raw(&json).await;
    }

    /// Sends one raw line to the server.
    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Receives a message from the server.
    async fn recv(&mut self) -> DaemonMessage {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        serde_json::from_str(&line).unwrap()
    }

    /// Sends a request and returns its response.
    async fn request(&mut self, msg: ClientMessage) -> DaemonMessage {
        self.send(msg).await;
        self.recv().await
    }

    /// Returns true once the server has closed the connection.
    async fn is_closed(&mut self) -> bool {
        let mut line = String::new();
        matches!(
            tokio::time::timeout(Duration::from_secs(1), self.reader.read_line(&mut line)).await,
            Ok(Ok(0))
        )
    }
}

fn error_code(msg: &DaemonMessage) -> Option<&str> {
    match msg {
        DaemonMessage::Error { code, .. } => code.as_deref(),
        _ => None,
    }
}

// ============================================================================
// Handshake Tests
// ============================================================================

#[tokio::test]
async fn test_handshake_assigns_client_id() {
    let server = TestServer::spawn().await;

    let mut client = server.connect().await;
    let response = client.request(ClientMessage::connect(None)).await;
    match response {
        DaemonMessage::Connected {
            protocol_version,
            client_id,
        } => {
            assert_eq!(protocol_version, ProtocolVersion::CURRENT);
            assert!(client_id.starts_with("client-"));
        }
        other => panic!("expected Connected, got: {other:?}"),
    }

    let mut named = server.connect().await;
    let response = named
        .request(ClientMessage::connect(Some("front-end".to_string())))
        .await;
    assert!(
        matches!(&response, DaemonMessage::Connected { client_id, .. } if client_id == "front-end")
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_incompatible_version_is_rejected() {
    let server = TestServer::spawn().await;

    let mut client = server.connect().await;
    let msg = ClientMessage {
        protocol_version: ProtocolVersion::new(2, 0),
        message: MessageType::Connect { client_id: None },
    };
    let response = client.request(msg).await;
    assert!(
        matches!(response, DaemonMessage::Rejected { .. }),
        "expected Rejected, got: {response:?}"
    );
    assert!(client.is_closed().await);

    server.shutdown().await;
}

#[tokio::test]
async fn test_request_before_connect_is_refused() {
    let server = TestServer::spawn().await;

    let mut client = server.connect().await;
    let response = client.request(ClientMessage::ping(1)).await;
    assert!(matches!(response, DaemonMessage::Error { .. }));
    assert!(client.is_closed().await);

    server.shutdown().await;
}

// ============================================================================
// Request Routing Tests
// ============================================================================

#[tokio::test]
async fn test_ping_pong() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    assert_eq!(
        client.request(ClientMessage::ping(7)).await,
        DaemonMessage::pong(7)
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_spawn_keep_alive_and_stats() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    let response = client
        .request(ClientMessage::spawn_runner(None, "demo", "main.ui", "POSIX"))
        .await;
    let token = match response {
        DaemonMessage::RunnerSpawned { token, port } => {
            assert_eq!(port, 2019);
            token
        }
        other => panic!("expected RunnerSpawned, got: {other:?}"),
    };

    assert_eq!(
        client.request(ClientMessage::keep_alive(token.clone())).await,
        DaemonMessage::keep_alive(true)
    );
    assert_eq!(
        client
            .request(ClientMessage::keep_alive(SessionToken::new("nobody")))
            .await,
        DaemonMessage::keep_alive(false)
    );

    match client.request(ClientMessage::stats()).await {
        DaemonMessage::Stats(stats) => {
            assert_eq!(stats.sessions, 1);
            assert_eq!(stats.max_users, 10);
            assert_eq!(stats.ports_in_use, vec![2019]);
            assert_eq!(stats.running_workers, 1);
            assert!(stats.sweep_armed);
        }
        other => panic!("expected Stats, got: {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_upload_catalog_roundtrip() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    let body = b"msgid \"\"\nmsgstr \"\"\n\"Language: fr\\n\"\n";
    let response = client
        .request(ClientMessage::upload_catalog(None, "fr.po", "demo", body))
        .await;
    let token = match response {
        DaemonMessage::CatalogStored { token, catalogs } => {
            assert_eq!(catalogs.get("demo"), Some(&vec!["fr.po".to_string()]));
            token
        }
        other => panic!("expected CatalogStored, got: {other:?}"),
    };

    // The cached catalog can be selected as the worker language
    let response = client
        .request(ClientMessage::spawn_runner(
            Some(token.clone()),
            "demo",
            "main.ui",
            "fr.po",
        ))
        .await;
    assert!(
        matches!(&response, DaemonMessage::RunnerSpawned { token: t, .. } if *t == token),
        "expected RunnerSpawned, got: {response:?}"
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_list_content() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    match client.request(ClientMessage::list_content()).await {
        DaemonMessage::Content(listing) => {
            assert_eq!(listing.languages, vec!["fr_FR".to_string()]);
            assert_eq!(listing.modules.len(), 1);
            assert_eq!(listing.modules[0].name, "demo");
            assert_eq!(
                listing.modules[0].files,
                vec!["dialogs/about.glade".to_string(), "main.ui".to_string()]
            );
        }
        other => panic!("expected Content, got: {other:?}"),
    }

    server.shutdown().await;
}

// ============================================================================
// Error Reporting Tests
// ============================================================================

#[tokio::test]
async fn test_orchestrator_errors_carry_codes() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    let response = client
        .request(ClientMessage::upload_catalog(None, "notes.txt", "demo", b"hi"))
        .await;
    assert_eq!(error_code(&response), Some("not_a_catalog_file"));

    let response = client
        .request(ClientMessage::spawn_runner(None, "demo", "../secret.ui", "POSIX"))
        .await;
    assert_eq!(error_code(&response), Some("invalid_path"));

    // No URL templates configured
    let response = client
        .request(ClientMessage::fetch_catalog(None, "fr.po", "demo"))
        .await;
    match response {
        DaemonMessage::Error { message, code, detail } => {
            assert_eq!(message, "Unable to retrieve the file");
            assert_eq!(code.as_deref(), Some("download_failure"));
            assert!(detail.is_some());
        }
        other => panic!("expected Error, got: {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_bad_payloads_keep_connection_open() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    client.send_raw("{ not json").await;
    assert_eq!(error_code(&client.recv().await), Some("invalid_message"));

    client
        .send_raw(
            r#"{"protocol_version":{"major":1,"minor":0},"type":"upload_catalog","name":"fr.po","module":"demo","data":"%%%"}"#,
        )
        .await;
    assert_eq!(error_code(&client.recv().await), Some("invalid_payload"));

    assert_eq!(
        client.request(ClientMessage::ping(1)).await,
        DaemonMessage::pong(1)
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_closes_connection() {
    let server = TestServer::spawn().await;
    let mut client = server.connect_ready().await;

    client.send(ClientMessage::disconnect()).await;
    assert!(client.is_closed().await);

    server.shutdown().await;
}

// ============================================================================
// Shutdown Tests
// ============================================================================

#[tokio::test]
async fn test_shutdown_removes_socket() {
    let server = TestServer::spawn().await;
    let socket_path = server.socket_path.clone();

    server.shutdown().await;

    assert!(!socket_path.exists(), "socket should be removed on shutdown");
}
