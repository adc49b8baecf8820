//! JSON-lines protocol between the front-end and the session registry.
//!
//! Each stdin line is a [`Request`]; each stdout line is either a reply to
//! one request or an event from a session.

use std::collections::HashMap;
use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::{AuthType, ConnectConfig};
use crate::error::{ErrorCategory, ErrorDetail, SftpError, SshError};
use crate::relay::{EventSender, SessionEvent};
use crate::sftp::UploadRequest;
use crate::ssh::{Connector, SessionRegistry};

#[derive(Debug, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: u64,
    #[serde(flatten)]
    pub command: Command,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    Connect {
        session_id: String,
        host: String,
        #[serde(default)]
        port: Option<u16>,
        username: String,
        #[serde(default)]
        auth_type: AuthType,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        private_key_path: Option<PathBuf>,
        #[serde(default)]
        passphrase: Option<String>,
    },
    Send {
        session_id: String,
        data: String,
    },
    Disconnect {
        session_id: String,
    },
    Alive {
        session_id: String,
    },
    Resize {
        session_id: String,
        cols: u32,
        rows: u32,
    },
    Upload {
        session_id: String,
        #[serde(default)]
        local_path: Option<PathBuf>,
        remote_path: String,
        #[serde(default)]
        transfer_id: Option<String>,
    },
    CancelUpload {
        session_id: String,
        transfer_id: String,
    },
    ListDir {
        session_id: String,
        path: String,
    },
    Mkdir {
        session_id: String,
        path: String,
    },
    Pwd {
        session_id: String,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReplyError {
    pub code: &'static str,
    pub category: ErrorCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<ErrorDetail>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Reply {
    pub id: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
}

impl Reply {
    pub fn ok(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            success: true,
            message: Some(message.into()),
            data: None,
            error: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn from_ssh_error(id: u64, err: &SshError) -> Self {
        Self {
            id,
            success: false,
            message: Some(err.to_string()),
            data: None,
            error: Some(ReplyError {
                code: err.code(),
                category: err.category(),
                detail: None,
            }),
        }
    }

    pub fn from_sftp_error(id: u64, err: &SftpError) -> Self {
        Self {
            id,
            success: false,
            message: Some(err.to_string()),
            data: None,
            error: Some(ReplyError {
                code: err.code(),
                category: err.category(),
                detail: err.detail().cloned(),
            }),
        }
    }

    /// Reply to a line that could not be parsed
    pub fn malformed(reason: &str) -> Self {
        Self {
            id: 0,
            success: false,
            message: Some(format!("Malformed request: {}", reason)),
            data: None,
            error: Some(ReplyError {
                code: "MALFORMED_REQUEST",
                category: ErrorCategory::Config,
                detail: None,
            }),
        }
    }

    pub fn to_line(&self) -> Value {
        let mut line = serde_json::to_value(self).unwrap_or_else(|_| json!({}));
        if let Value::Object(map) = &mut line {
            map.insert("type".to_string(), Value::from("reply"));
        }
        line
    }
}

/// Turns session events into stdout lines.
///
/// Terminal output is sent as text. Chunks split at arbitrary byte
/// offsets, so an incomplete UTF-8 sequence at the end of a chunk is held
/// back per session and prefixed to that session's next chunk.
#[derive(Debug, Default)]
pub struct EventEncoder {
    pending: HashMap<String, Vec<u8>>,
}

impl EventEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(&mut self, event: &SessionEvent) -> Value {
        let mut line = serde_json::to_value(event).unwrap_or_else(|_| json!({}));
        let text = match event {
            SessionEvent::Output { session_id, data } => Some(self.decode(session_id, data)),
            SessionEvent::Disconnect { session_id } => {
                self.pending.remove(session_id);
                None
            }
            _ => None,
        };
        if let Value::Object(map) = &mut line {
            map.insert("type".to_string(), Value::from("event"));
            if let Some(text) = text {
                map.insert("data".to_string(), Value::from(text));
            }
        }
        line
    }

    fn decode(&mut self, session_id: &str, data: &[u8]) -> String {
        let mut bytes = self.pending.remove(session_id).unwrap_or_default();
        bytes.extend_from_slice(data);

        let mut text = String::with_capacity(bytes.len());
        let mut rest = &bytes[..];
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // Checked by from_utf8 above
                    text.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.pending.insert(session_id.to_string(), after.to_vec());
                            break;
                        }
                    }
                }
            }
        }
        text
    }
}

fn connect_config(
    host: String,
    port: Option<u16>,
    username: String,
    auth_type: AuthType,
    password: Option<String>,
    private_key_path: Option<PathBuf>,
    passphrase: Option<String>,
) -> ConnectConfig {
    let mut config = match auth_type {
        AuthType::Password => ConnectConfig::password(host, username, ""),
        AuthType::PrivateKey => ConnectConfig::private_key(host, username, PathBuf::new(), None),
    };
    if let Some(port) = port {
        config = config.with_port(port);
    }
    config.password = password.map(SecretString::from);
    config.private_key_path = private_key_path;
    config.passphrase = passphrase.map(SecretString::from);
    config
}

/// Run one request against the registry and build its reply
pub async fn handle<C: Connector>(
    registry: &SessionRegistry<C>,
    events: &EventSender,
    request: Request,
) -> Reply {
    let id = request.id;
    match request.command {
        Command::Connect {
            session_id,
            host,
            port,
            username,
            auth_type,
            password,
            private_key_path,
            passphrase,
        } => {
            let config = connect_config(
                host,
                port,
                username,
                auth_type,
                password,
                private_key_path,
                passphrase,
            );
            match registry.connect(&session_id, config, events.clone()).await {
                Ok(outcome) => Reply::ok(id, outcome.message())
                    .with_data(serde_json::to_value(&outcome).unwrap_or(Value::Null)),
                Err(e) => Reply::from_ssh_error(id, &e),
            }
        }
        Command::Send { session_id, data } => {
            match registry.send_input(&session_id, data.as_bytes()).await {
                Ok(()) => Reply::ok(id, "Sent"),
                Err(e) => Reply::from_ssh_error(id, &e),
            }
        }
        Command::Disconnect { session_id } => {
            let outcome = registry.disconnect(&session_id).await;
            Reply::ok(id, outcome.message())
        }
        Command::Alive { session_id } => {
            let alive = registry.is_alive(&session_id);
            Reply::ok(id, if alive { "Alive" } else { "Not alive" })
                .with_data(json!({ "alive": alive }))
        }
        Command::Resize {
            session_id,
            cols,
            rows,
        } => match registry.resize(&session_id, cols, rows).await {
            Ok(()) => Reply::ok(id, "Resized"),
            Err(e) => Reply::from_ssh_error(id, &e),
        },
        Command::Upload {
            session_id,
            local_path,
            remote_path,
            transfer_id,
        } => {
            let request = UploadRequest {
                session_id,
                local_path,
                remote_path,
                transfer_id,
            };
            match registry.upload_file(request).await {
                Ok(outcome) => {
                    let message = if outcome.is_cancelled() {
                        "Upload cancelled"
                    } else {
                        "Upload completed"
                    };
                    Reply::ok(id, message)
                        .with_data(serde_json::to_value(&outcome).unwrap_or(Value::Null))
                }
                Err(e) => Reply::from_sftp_error(id, &e),
            }
        }
        Command::CancelUpload {
            session_id,
            transfer_id,
        } => match registry.cancel_upload(&session_id, &transfer_id) {
            Ok(()) => Reply::ok(id, "Upload cancellation requested"),
            Err(e) => Reply::from_sftp_error(id, &e),
        },
        Command::ListDir { session_id, path } => {
            match registry.list_directory(&session_id, &path).await {
                Ok(entries) => Reply::ok(id, format!("{} entries", entries.len()))
                    .with_data(serde_json::to_value(&entries).unwrap_or(Value::Null)),
                Err(e) => Reply::from_sftp_error(id, &e),
            }
        }
        Command::Mkdir { session_id, path } => {
            match registry.create_directory(&session_id, &path).await {
                Ok(()) => Reply::ok(id, "Directory created"),
                Err(e) => Reply::from_sftp_error(id, &e),
            }
        }
        Command::Pwd { session_id } => match registry.get_current_directory(&session_id).await {
            Ok(cwd) => Reply::ok(id, cwd.directory.clone())
                .with_data(serde_json::to_value(&cwd).unwrap_or(Value::Null)),
            Err(e) => Reply::from_ssh_error(id, &e),
        },
    }
}
