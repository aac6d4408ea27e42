//! Protocol message types for daemon communication.

use crate::version::ProtocolVersion;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use deckard_core::{CatalogGrouping, OrchestratorError, SessionToken};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message types that can be sent by clients to the daemon.
///
/// Every request that may create a session takes an optional token: an
/// absent or unknown token silently provisions a new session, whose token
/// comes back in the response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// Client handshake/connection request
    Connect {
        /// Client identifier (optional)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    /// Start (or restart) the session's worker
    SpawnRunner {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<SessionToken>,
        /// Module directory under the content root
        module: String,
        /// UI-definition file, relative to the module
        file: String,
        /// Language tag, or the name of a cached custom catalog
        language: String,
    },

    /// Ingest an uploaded catalog
    UploadCatalog {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<SessionToken>,
        name: String,
        module: String,
        /// Catalog bytes, base64 encoded
        data: String,
    },

    /// Ingest a catalog fetched from the configured remote templates
    FetchCatalog {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<SessionToken>,
        name: String,
        module: String,
    },

    /// Heartbeat for the session's worker
    KeepAlive { token: SessionToken },

    /// Request the displayable content index
    ListContent,

    /// Request registry statistics
    Stats,

    /// Ping to check connection
    Ping {
        /// Sequence number for matching pong response
        seq: u64,
    },

    /// Client disconnecting gracefully
    Disconnect,
}

/// Messages sent from client to daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Protocol version
    pub protocol_version: ProtocolVersion,

    /// Message payload
    #[serde(flatten)]
    pub message: MessageType,
}

impl ClientMessage {
    /// Creates a new client message with current protocol version.
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    pub fn connect(client_id: Option<String>) -> Self {
        Self::new(MessageType::Connect { client_id })
    }

    pub fn spawn_runner(
        token: Option<SessionToken>,
        module: impl Into<String>,
        file: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self::new(MessageType::SpawnRunner {
            token,
            module: module.into(),
            file: file.into(),
            language: language.into(),
        })
    }

    /// Creates an upload message, encoding `bytes` for transport.
    pub fn upload_catalog(
        token: Option<SessionToken>,
        name: impl Into<String>,
        module: impl Into<String>,
        bytes: &[u8],
    ) -> Self {
        Self::new(MessageType::UploadCatalog {
            token,
            name: name.into(),
            module: module.into(),
            data: STANDARD.encode(bytes),
        })
    }

    pub fn fetch_catalog(
        token: Option<SessionToken>,
        name: impl Into<String>,
        module: impl Into<String>,
    ) -> Self {
        Self::new(MessageType::FetchCatalog {
            token,
            name: name.into(),
            module: module.into(),
        })
    }

    pub fn keep_alive(token: SessionToken) -> Self {
        Self::new(MessageType::KeepAlive { token })
    }

    pub fn list_content() -> Self {
        Self::new(MessageType::ListContent)
    }

    pub fn stats() -> Self {
        Self::new(MessageType::Stats)
    }

    pub fn ping(seq: u64) -> Self {
        Self::new(MessageType::Ping { seq })
    }

    pub fn disconnect() -> Self {
        Self::new(MessageType::Disconnect)
    }
}

/// Error decoding an upload payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid catalog payload: {0}")]
pub struct DecodeError(String);

/// Decodes the base64 `data` field of an upload.
pub fn decode_upload(data: &str) -> Result<Vec<u8>, DecodeError> {
    STANDARD
        .decode(data.trim())
        .map_err(|e| DecodeError(e.to_string()))
}

/// One module directory and its UI-definition files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleContent {
    pub name: String,
    /// Paths relative to the module directory, sorted
    pub files: Vec<String>,
}

/// Everything a front-end can offer for rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentListing {
    /// Languages shipped under the content root's `LANGS/`
    pub languages: Vec<String>,
    pub modules: Vec<ModuleContent>,
}

/// Registry occupancy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsReport {
    pub sessions: usize,
    pub max_users: usize,
    /// Ports held by live sessions, ascending
    pub ports_in_use: Vec<u16>,
    pub running_workers: usize,
    pub sweep_armed: bool,
}

/// Messages sent from daemon to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonMessage {
    /// Connection accepted
    Connected {
        /// Daemon's protocol version
        protocol_version: ProtocolVersion,
        /// Assigned client ID
        client_id: String,
    },

    /// Connection rejected (version mismatch, etc.)
    Rejected {
        reason: String,
        /// Daemon's protocol version (for client to upgrade)
        protocol_version: ProtocolVersion,
    },

    /// Worker started
    RunnerSpawned { token: SessionToken, port: u16 },

    /// Catalog compiled and cached; `catalogs` maps module to catalog names,
    /// oldest first
    CatalogStored {
        token: SessionToken,
        catalogs: CatalogGrouping,
    },

    /// Heartbeat result; false when the token is unknown
    KeepAlive { alive: bool },

    /// Content index
    Content(ContentListing),

    /// Registry statistics
    Stats(StatsReport),

    /// Pong response to ping
    Pong { seq: u64 },

    /// Error response
    Error {
        /// Short user-facing summary
        message: String,
        /// Stable error kind
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        /// Detailed log
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

impl DaemonMessage {
    pub fn connected(client_id: String) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            client_id,
        }
    }

    pub fn rejected(reason: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    pub fn runner_spawned(token: SessionToken, port: u16) -> Self {
        Self::RunnerSpawned { token, port }
    }

    pub fn catalog_stored(token: SessionToken, catalogs: CatalogGrouping) -> Self {
        Self::CatalogStored { token, catalogs }
    }

    pub fn keep_alive(alive: bool) -> Self {
        Self::KeepAlive { alive }
    }

    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    /// Creates a bare error response.
    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: None,
            detail: None,
        }
    }

    /// Creates an error response with code.
    pub fn error_with_code(message: &str, code: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: Some(code.to_string()),
            detail: None,
        }
    }

    /// Reports an orchestrator failure.
    ///
    /// Internal faults carry no detail: their log is for the operator only.
    pub fn from_error(err: &OrchestratorError) -> Self {
        let detail = (!err.is_internal()).then(|| err.to_string());
        Self::Error {
            message: err.summary().to_string(),
            code: Some(err.code().to_string()),
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_serialization() {
        let msg = ClientMessage::ping(42);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"ping\""));
        assert!(json.contains("\"seq\":42"));
        assert!(json.contains("\"protocol_version\":{\"major\":1,\"minor\":0}"));
    }

    #[test]
    fn test_spawn_without_token_parses() {
        let json = r#"{"protocol_version":{"major":1,"minor":0},"type":"spawn_runner","module":"demo","file":"a.ui","language":"POSIX"}"#;
        let parsed: ClientMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            parsed.message,
            MessageType::SpawnRunner {
                token: None,
                module: "demo".to_string(),
                file: "a.ui".to_string(),
                language: "POSIX".to_string(),
            }
        );
    }

    #[test]
    fn test_upload_payload_is_base64() {
        let msg = ClientMessage::upload_catalog(None, "fr.po", "m", b"msgid \"\"\n");
        let MessageType::UploadCatalog { data, .. } = &msg.message else {
            panic!("Expected UploadCatalog message");
        };
        assert_eq!(decode_upload(data).unwrap(), b"msgid \"\"\n".to_vec());
        assert!(decode_upload("not base64!").is_err());
    }

    #[test]
    fn test_catalog_stored_serialization() {
        let mut catalogs = CatalogGrouping::new();
        catalogs.insert("m".to_string(), vec!["b.po".to_string(), "c.po".to_string()]);
        let msg = DaemonMessage::catalog_stored(SessionToken::new("tok"), catalogs);
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"type":"catalog_stored","token":"tok","catalogs":{"m":["b.po","c.po"]}}"#
        );
    }

    #[test]
    fn test_newtype_variants_are_flattened() {
        let msg = DaemonMessage::Stats(StatsReport {
            sessions: 1,
            max_users: 10,
            ports_in_use: vec![2019],
            running_workers: 1,
            sweep_armed: true,
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.starts_with("{\"type\":\"stats\",\"sessions\":1"));

        let parsed: DaemonMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_error_from_orchestrator_error() {
        let err = OrchestratorError::NotACatalogFile {
            name: "notes.txt".to_string(),
        };
        match DaemonMessage::from_error(&err) {
            DaemonMessage::Error { message, code, detail } => {
                assert_eq!(message, "This is not a PO file");
                assert_eq!(code.as_deref(), Some("not_a_catalog_file"));
                assert_eq!(detail.as_deref(), Some("notes.txt is not a PO file"));
            }
            other => panic!("Expected Error message, got {other:?}"),
        }

        let internal = DaemonMessage::from_error(&OrchestratorError::ChannelClosed);
        assert!(matches!(internal, DaemonMessage::Error { detail: None, .. }));
    }
}
