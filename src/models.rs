use std::fmt;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Deserialize;
use uuid::Uuid;

/// File extensions rendered as photos rather than generic attachments
const PHOTO_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "gif", "webp", "bmp"];

/// A conversation with one peer. The dialog id is the peer's user id.
#[derive(Debug, Clone, PartialEq)]
pub struct Dialog {
    pub id: String,
    pub title: String,
    pub subtitle: String,   // Last message preview
    pub unread: u32,
    pub online: bool,
    pub highlighted: bool,  // Set only on the selected dialog
    pub date: DateTime<Utc>,
}

impl Dialog {
    pub fn new(id: &str, title: &str) -> Self {
        Dialog {
            id: id.to_string(),
            title: title.to_string(),
            subtitle: String::new(),
            unread: 0,
            online: false,
            highlighted: false,
            date: Utc::now(),
        }
    }
}

/// Message identifier. Provisional ids are generated locally and are always
/// negative; the server replaces them with positive database ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    Provisional(i64),
    Server(i64),
}

impl MessageId {
    /// Generate a fresh provisional id
    pub fn provisional() -> Self {
        let raw: i64 = rand::thread_rng().gen_range(1..=i32::MAX as i64);
        MessageId::Provisional(-raw)
    }

    /// Classify an id as it appears on the wire
    pub fn from_wire(raw: i64) -> Self {
        if raw > 0 {
            MessageId::Server(raw)
        } else {
            MessageId::Provisional(raw)
        }
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self, MessageId::Provisional(_))
    }

    pub fn server_id(&self) -> Option<i64> {
        match self {
            MessageId::Server(id) => Some(*id),
            MessageId::Provisional(_) => None,
        }
    }

    pub fn raw(&self) -> i64 {
        match self {
            MessageId::Provisional(id) | MessageId::Server(id) => *id,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Provisional(id) => write!(f, "provisional:{}", id),
            MessageId::Server(id) => write!(f, "{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum MessageStatus {
    Waiting = 0,   // Optimistically shown, no server id yet
    Sent = 1,      // Server assigned an id to our message
    Received = 2,  // Inbound message delivered to us
    Read = 3,      // Read by the recipient
}

/// Reference to a file stored on the server
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FileRef {
    pub id: Uuid,
    pub url: String,
    pub name: String,
    pub size: u64,
}

impl FileRef {
    pub fn is_photo(&self) -> bool {
        self.name
            .rsplit_once('.')
            .map(|(_, ext)| PHOTO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    Text(String),
    File(FileRef),
    Photo(FileRef),
}

impl MessageBody {
    pub fn from_file(file: FileRef) -> Self {
        if file.is_photo() {
            MessageBody::Photo(file)
        } else {
            MessageBody::File(file)
        }
    }

    /// Short text used as the dialog subtitle
    pub fn preview(&self) -> String {
        match self {
            MessageBody::Text(text) => text.clone(),
            MessageBody::File(file) => format!("[file] {}", file.name),
            MessageBody::Photo(file) => format!("[photo] {}", file.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub dialog_id: String,
    pub direction: Direction,
    pub status: MessageStatus,
    pub body: MessageBody,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn is_inbound(&self) -> bool {
        self.direction == Direction::Inbound
    }
}

/// A user known to the server
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserInfo {
    #[serde(deserialize_with = "crate::chat::api::de_user_id")]
    pub pk: String,
    pub username: String,
}
