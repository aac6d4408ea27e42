//! Connection handler for individual client connections.
//!
//! Each client connection gets its own `ConnectionHandler` that:
//! - Performs protocol version negotiation
//! - Parses incoming messages
//! - Routes requests to the registry
//! - Sends one response per request
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Connection errors are logged and result in graceful disconnect

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use deckard_core::OrchestratorError;
use deckard_protocol::{
    decode_upload, ClientMessage, DaemonMessage, MessageType, ProtocolVersion, StatsReport,
};

use crate::content::scan_content;
use crate::ingest::CatalogSource;
use crate::registry::RegistryHandle;

/// Maximum message size (4 MiB, room for a base64 catalog upload)
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Read timeout for idle connections (5 minutes)
const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Unique identifier for this connection
type ClientId = String;

/// Connection handler for a single client.
pub struct ConnectionHandler {
    /// Buffered reader for incoming messages
    reader: BufReader<OwnedReadHalf>,

    /// Buffered writer for outgoing messages
    writer: BufWriter<OwnedWriteHalf>,

    /// Handle to the session registry
    registry: RegistryHandle,

    /// Root scanned for `list_content`
    content_root: PathBuf,

    /// Unique client identifier (assigned after handshake)
    client_id: Option<ClientId>,

    /// Counter for generating client IDs
    connection_number: u64,
}

impl ConnectionHandler {
    pub fn new(
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        registry: RegistryHandle,
        content_root: PathBuf,
        connection_number: u64,
    ) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
            registry,
            content_root,
            client_id: None,
            connection_number,
        }
    }

    /// Runs the connection handler.
    ///
    /// Performs the handshake then enters the message processing loop.
    /// Returns the client ID when the connection closes.
    pub async fn run(mut self) -> Option<ClientId> {
        debug!(connection = self.connection_number, "New client connected");

        if let Err(e) = self.handle_handshake().await {
            warn!(
                connection = self.connection_number,
                error = %e,
                "Handshake failed"
            );
            return None;
        }
        info!(client_id = ?self.client_id, "Client handshake completed");

        if let Err(e) = self.process_messages().await {
            debug!(
                client_id = ?self.client_id,
                error = %e,
                "Connection closed"
            );
        }

        info!(client_id = ?self.client_id, "Client disconnected");
        self.client_id
    }

    /// Expects a `Connect` message with a compatible protocol version and
    /// answers `Connected` or `Rejected`.
    async fn handle_handshake(&mut self) -> Result<(), ConnectionError> {
        let msg = match timeout(READ_TIMEOUT, self.read_message()).await {
            Ok(result) => result?,
            Err(_) => return Err(ConnectionError::Timeout),
        };

        let client_version = msg.protocol_version;
        if !client_version.is_compatible_with(&ProtocolVersion::CURRENT) {
            warn!(
                client_version = %client_version,
                server_version = %ProtocolVersion::CURRENT,
                "Protocol version mismatch"
            );

            self.send_message(DaemonMessage::rejected(&format!(
                "Protocol version {} not compatible with server version {}",
                client_version,
                ProtocolVersion::CURRENT
            )))
            .await?;

            return Err(ConnectionError::VersionMismatch {
                client: client_version,
                server: ProtocolVersion::CURRENT,
            });
        }

        match msg.message {
            MessageType::Connect { client_id } => {
                let assigned_id =
                    client_id.unwrap_or_else(|| format!("client-{}", self.connection_number));
                self.client_id = Some(assigned_id.clone());
                self.send_message(DaemonMessage::connected(assigned_id)).await
            }
            other => {
                self.send_message(DaemonMessage::error("Expected Connect message for handshake"))
                    .await?;
                Err(ConnectionError::UnexpectedMessage(format!("{other:?}")))
            }
        }
    }

    /// Reads and answers messages until EOF, `Disconnect`, or an
    /// unrecoverable error.
    async fn process_messages(&mut self) -> Result<(), ConnectionError> {
        loop {
            let msg = match timeout(READ_TIMEOUT, self.read_message()).await {
                Ok(Ok(msg)) => msg,
                Ok(Err(ConnectionError::Eof)) => {
                    debug!(client_id = ?self.client_id, "Client sent EOF");
                    return Ok(());
                }
                Ok(Err(ConnectionError::ParseError(e))) => {
                    // Malformed line: report and keep the connection
                    self.send_message(DaemonMessage::error_with_code(
                        &format!("Invalid message: {e}"),
                        "invalid_message",
                    ))
                    .await?;
                    continue;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    debug!(client_id = ?self.client_id, "Connection timed out");
                    return Err(ConnectionError::Timeout);
                }
            };

            if matches!(msg.message, MessageType::Disconnect) {
                debug!(client_id = ?self.client_id, "Client disconnecting");
                return Ok(());
            }

            let response = self.handle_message(msg.message).await;
            self.send_message(response).await?;
        }
    }

    /// Maps one request to its response.
    async fn handle_message(&mut self, message: MessageType) -> DaemonMessage {
        match message {
            MessageType::Connect { .. } => DaemonMessage::error("Already connected"),

            MessageType::SpawnRunner {
                token,
                module,
                file,
                language,
            } => match self.registry.spawn_runner(token, module, file, language).await {
                Ok(spawned) => DaemonMessage::runner_spawned(spawned.token, spawned.port),
                Err(e) => self.report(e),
            },

            MessageType::UploadCatalog {
                token,
                name,
                module,
                data,
            } => {
                let bytes = match decode_upload(&data) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        return DaemonMessage::error_with_code(&e.to_string(), "invalid_payload")
                    }
                };
                self.ingest(token, name, module, CatalogSource::Upload(bytes))
                    .await
            }

            MessageType::FetchCatalog {
                token,
                name,
                module,
            } => self.ingest(token, name, module, CatalogSource::Remote).await,

            MessageType::KeepAlive { token } => match self.registry.keep_alive(token).await {
                Ok(alive) => DaemonMessage::keep_alive(alive),
                Err(e) => self.report(e),
            },

            MessageType::ListContent => {
                let root = self.content_root.clone();
                match tokio::task::spawn_blocking(move || scan_content(&root)).await {
                    Ok(Ok(listing)) => DaemonMessage::Content(listing),
                    Ok(Err(e)) => {
                        warn!(root = %self.content_root.display(), error = %e, "Content scan failed");
                        self.report(OrchestratorError::storage(e))
                    }
                    Err(e) => {
                        error!(error = %e, "Content scan task failed");
                        self.report(OrchestratorError::storage(e))
                    }
                }
            }

            MessageType::Stats => match self.registry.stats().await {
                Ok(stats) => DaemonMessage::Stats(StatsReport {
                    sessions: stats.sessions,
                    max_users: stats.max_users,
                    ports_in_use: stats.ports_in_use,
                    running_workers: stats.running_workers,
                    sweep_armed: stats.sweep_armed,
                }),
                Err(e) => self.report(e),
            },

            MessageType::Ping { seq } => DaemonMessage::pong(seq),

            // Handled by the processing loop
            MessageType::Disconnect => DaemonMessage::error("Disconnecting"),
        }
    }

    async fn ingest(
        &self,
        token: Option<deckard_core::SessionToken>,
        name: String,
        module: String,
        source: CatalogSource,
    ) -> DaemonMessage {
        match self.registry.ingest_catalog(token, name, module, source).await {
            Ok(stored) => DaemonMessage::catalog_stored(stored.token, stored.catalogs),
            Err(e) => self.report(e),
        }
    }

    /// Logs a failed request and builds its error response.
    fn report(&self, err: OrchestratorError) -> DaemonMessage {
        if err.is_internal() {
            error!(client_id = ?self.client_id, error = %err, "Internal orchestrator fault");
        } else {
            debug!(client_id = ?self.client_id, code = err.code(), error = %err, "Request failed");
        }
        DaemonMessage::from_error(&err)
    }

    /// Reads a single message from the client.
    ///
    /// Lines longer than [`MAX_MESSAGE_SIZE`] are refused without being
    /// buffered in full.
    async fn read_message(&mut self) -> Result<ClientMessage, ConnectionError> {
        let mut line = String::new();
        let limit = MAX_MESSAGE_SIZE as u64 + 1;

        let bytes_read = (&mut self.reader)
            .take(limit)
            .read_line(&mut line)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if bytes_read == 0 {
            return Err(ConnectionError::Eof);
        }

        if line.len() > MAX_MESSAGE_SIZE {
            return Err(ConnectionError::MessageTooLarge {
                size: line.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        let msg: ClientMessage = serde_json::from_str(&line)
            .map_err(|e| ConnectionError::ParseError(e.to_string()))?;

        debug!(
            client_id = ?self.client_id,
            message_type = ?std::mem::discriminant(&msg.message),
            "Received message"
        );

        Ok(msg)
    }

    /// Sends a message to the client.
    async fn send_message(&mut self, msg: DaemonMessage) -> Result<(), ConnectionError> {
        let json =
            serde_json::to_string(&msg).map_err(|e| ConnectionError::ParseError(e.to_string()))?;

        let writer = &mut self.writer;
        match timeout(WRITE_TIMEOUT, async {
            writer.write_all(json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        })
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
            Err(_) => Err(ConnectionError::WriteTimeout),
        }
    }

    /// Returns the client ID (if connected).
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Protocol version mismatch: client {client}, server {server}")]
    VersionMismatch {
        client: ProtocolVersion,
        server: ProtocolVersion,
    },

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Read timeout")]
    Timeout,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}
