// HTTP API collaborator
// Dialog list, message history, user info and file uploads over the REST endpoints

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, info, warn};
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::models::{Dialog, Direction, FileRef, Message, MessageBody, MessageId, MessageStatus, UserInfo};

/// User ids arrive as numbers from some endpoints and strings from others
pub(crate) fn de_user_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!("expected a user id, got {}", other))),
    }
}

fn from_epoch_seconds(seconds: f64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt((seconds * 1000.0) as i64)
        .single()
        .unwrap_or_else(Utc::now)
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{path} returned {status}")]
    Status { status: reqwest::StatusCode, path: String },

    #[error("Unexpected response from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cannot read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One page of a paginated listing
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    pub page: u32,
    pub pages: u32,
    pub data: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DialogRecord {
    pub id: i64,
    pub created: f64,
    pub modified: f64,
    #[serde(deserialize_with = "de_user_id")]
    pub other_user_id: String,
    pub unread_count: u32,
    pub username: String,
    pub is_online: bool,
    #[serde(default)]
    pub last_message: Option<Value>,
}

impl From<DialogRecord> for Dialog {
    fn from(record: DialogRecord) -> Self {
        let subtitle = record
            .last_message
            .as_ref()
            .and_then(|m| m.get("text"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Dialog {
            id: record.other_user_id,
            title: record.username,
            subtitle,
            unread: record.unread_count,
            online: record.is_online,
            highlighted: false,
            date: from_epoch_seconds(record.modified),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageRecord {
    pub id: i64,
    #[serde(default)]
    pub text: String,
    pub sent: f64,
    #[serde(default)]
    pub edited: Option<f64>,
    pub read: bool,
    #[serde(default)]
    pub file: Option<Value>,
    #[serde(deserialize_with = "de_user_id")]
    pub sender: String,
    #[serde(deserialize_with = "de_user_id")]
    pub recipient: String,
    #[serde(default)]
    pub out: Option<bool>,
    #[serde(default)]
    pub sender_username: Option<String>,
}

impl MessageRecord {
    /// Convert to a stored message, seen from `me`
    pub fn into_message(self, me: &str) -> Message {
        let outbound = self.out.unwrap_or(self.sender == me);
        let (direction, dialog_id) = if outbound {
            (Direction::Outbound, self.recipient)
        } else {
            (Direction::Inbound, self.sender)
        };
        let status = match (direction, self.read) {
            (_, true) => MessageStatus::Read,
            (Direction::Outbound, false) => MessageStatus::Sent,
            (Direction::Inbound, false) => MessageStatus::Received,
        };

        let file = self.file.and_then(|value| match serde_json::from_value::<FileRef>(value) {
            Ok(file) => Some(file),
            Err(e) => {
                debug!("Message {} has an unusable file reference: {}", self.id, e);
                None
            }
        });
        let body = match file {
            Some(file) => MessageBody::from_file(file),
            None => MessageBody::Text(self.text),
        };

        Message {
            id: MessageId::from_wire(self.id),
            dialog_id,
            direction,
            status,
            body,
            timestamp: from_epoch_seconds(self.sent),
        }
    }
}

/// Request/response contract with the chat server's REST endpoints
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn fetch_self(&self) -> Result<UserInfo, ApiError>;

    /// All dialogs, across every page
    async fn fetch_dialogs(&self) -> Result<Vec<Dialog>, ApiError>;

    async fn fetch_messages(&self, dialog_id: &str, page: u32) -> Result<Page<MessageRecord>, ApiError>;

    async fn fetch_users(&self) -> Result<Vec<UserInfo>, ApiError>;

    async fn upload_file(&self, path: &Path) -> Result<FileRef, ApiError>;
}

/// `ChatApi` over HTTP with the session cookie on every request
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpChatApi {
    /// `base_url` is the server origin, e.g. `http://127.0.0.1:8000`
    pub fn new(base_url: &str, session_id: Option<&str>) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        if let Some(session_id) = session_id {
            match HeaderValue::from_str(&format!("sessionid={}", session_id)) {
                Ok(cookie) => {
                    headers.insert(COOKIE, cookie);
                }
                Err(e) => warn!("Ignoring unusable session id: {}", e),
            }
        }
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(HttpChatApi {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Origin for a host, matching the socket's security
    pub fn origin(host: &str, secure: bool) -> String {
        let scheme = if secure { "https" } else { "http" };
        format!("{}://{}", scheme, host.trim_end_matches('/'))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        debug!("GET {}", path);
        let response = self.client.get(format!("{}{}", self.base_url, path)).send().await?;
        Self::decode(path, response).await
    }

    async fn decode<T: DeserializeOwned>(path: &str, response: reqwest::Response) -> Result<T, ApiError> {
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status { status, path: path.to_string() });
        }
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|source| ApiError::Decode {
            path: path.to_string(),
            source,
        })
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn fetch_self(&self) -> Result<UserInfo, ApiError> {
        self.get_json("/self/").await
    }

    async fn fetch_dialogs(&self) -> Result<Vec<Dialog>, ApiError> {
        let first: Page<DialogRecord> = self.get_json("/dialogs/").await?;
        let pages = first.pages;
        let mut dialogs: Vec<Dialog> = first.data.into_iter().map(Dialog::from).collect();
        for page in 2..=pages {
            let next: Page<DialogRecord> = self.get_json(&format!("/dialogs/?page={}", page)).await?;
            dialogs.extend(next.data.into_iter().map(Dialog::from));
        }
        info!("Fetched {} dialogs", dialogs.len());
        Ok(dialogs)
    }

    async fn fetch_messages(&self, dialog_id: &str, page: u32) -> Result<Page<MessageRecord>, ApiError> {
        self.get_json(&format!("/messages/{}/?page={}", dialog_id, page)).await
    }

    async fn fetch_users(&self) -> Result<Vec<UserInfo>, ApiError> {
        self.get_json("/users/").await
    }

    async fn upload_file(&self, path: &Path) -> Result<FileRef, ApiError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| ApiError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        info!("Uploading {} ({} bytes)", file_name, bytes.len());

        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("file", part);
        let response = self
            .client
            .post(format!("{}/upload/", self.base_url))
            .multipart(form)
            .send()
            .await?;
        Self::decode("/upload/", response).await
    }
}
