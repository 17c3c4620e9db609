// Private chat wire protocol
// Every frame is a JSON object discriminated by a numeric `msg_type` field

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{FileRef, MessageBody, MessageId};

/// Longest text body the server accepts
pub const TEXT_MAX_LENGTH: usize = 65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    WentOnline,
    WentOffline,
    TextMessage,
    FileMessage,
    IsTyping,
    MessageRead,
    ErrorOccurred,
    MessageIdCreated,
    NewUnreadCount,
    TypingStopped,
}

impl MessageType {
    pub fn from_code(code: i64) -> Option<Self> {
        let msg_type = match code {
            1 => MessageType::WentOnline,
            2 => MessageType::WentOffline,
            3 => MessageType::TextMessage,
            4 => MessageType::FileMessage,
            5 => MessageType::IsTyping,
            6 => MessageType::MessageRead,
            7 => MessageType::ErrorOccurred,
            8 => MessageType::MessageIdCreated,
            9 => MessageType::NewUnreadCount,
            10 => MessageType::TypingStopped,
            _ => return None,
        };
        Some(msg_type)
    }

    pub fn code(self) -> u8 {
        match self {
            MessageType::WentOnline => 1,
            MessageType::WentOffline => 2,
            MessageType::TextMessage => 3,
            MessageType::FileMessage => 4,
            MessageType::IsTyping => 5,
            MessageType::MessageRead => 6,
            MessageType::ErrorOccurred => 7,
            MessageType::MessageIdCreated => 8,
            MessageType::NewUnreadCount => 9,
            MessageType::TypingStopped => 10,
        }
    }
}

/// Error codes reported by the server in `ErrorOccurred` frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerErrorKind {
    MessageParsingError,
    TextMessageInvalid,
    InvalidMessageReadId,
    InvalidUserPk,
    InvalidRandomId,
    FileMessageInvalid,
    FileDoesNotExist,
    Other(i64),
}

impl From<i64> for ServerErrorKind {
    fn from(code: i64) -> Self {
        match code {
            1 => ServerErrorKind::MessageParsingError,
            2 => ServerErrorKind::TextMessageInvalid,
            3 => ServerErrorKind::InvalidMessageReadId,
            4 => ServerErrorKind::InvalidUserPk,
            5 => ServerErrorKind::InvalidRandomId,
            6 => ServerErrorKind::FileMessageInvalid,
            7 => ServerErrorKind::FileDoesNotExist,
            other => ServerErrorKind::Other(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame is not a JSON object")]
    NotAnObject,

    #[error("msg_type not present in frame")]
    MissingMsgType,

    #[error("msg_type is not an integer: {0}")]
    InvalidMsgType(Value),

    #[error("Unknown msg_type {0}")]
    UnknownMsgType(i64),

    #[error("Invalid {msg_type:?} payload: {source}")]
    Payload {
        msg_type: MessageType,
        #[source]
        source: serde_json::Error,
    },
}

/// A message pushed by the server
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub id: MessageId,
    pub sender: String,
    pub receiver: String,
    pub sender_username: String,
    pub body: MessageBody,
}

/// Decoded server event. Exactly one per inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    NewMessage(IncomingMessage),
    IdReassigned { old_id: MessageId, new_id: i64 },
    TypingNotice(String),
    TypingStopped(String),
    PresenceChange { peer_id: String, online: bool },
    UnreadCountUpdate { dialog_id: String, count: u32 },
    MessageRead { message_id: i64, sender: String, receiver: String },
    ServerError { kind: ServerErrorKind, text: String },
}

#[derive(Deserialize)]
struct UserPayload {
    user_pk: String,
}

#[derive(Deserialize)]
struct TextPayload {
    random_id: i64,
    text: String,
    sender: String,
    receiver: String,
    sender_username: String,
}

#[derive(Deserialize)]
struct FilePayload {
    db_id: i64,
    file: FileRef,
    sender: String,
    receiver: String,
    sender_username: String,
}

#[derive(Deserialize)]
struct ReadPayload {
    message_id: i64,
    sender: String,
    receiver: String,
}

#[derive(Deserialize)]
struct ErrorPayload {
    error: (i64, String),
}

#[derive(Deserialize)]
struct IdCreatedPayload {
    random_id: i64,
    db_id: i64,
}

#[derive(Deserialize)]
struct UnreadPayload {
    sender: String,
    unread_count: u32,
}

fn payload<T: DeserializeOwned>(msg_type: MessageType, value: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|source| ProtocolError::Payload { msg_type, source })
}

/// Decode one raw inbound frame
pub fn decode_frame(raw: &str) -> Result<InboundEvent, ProtocolError> {
    let value: Value = serde_json::from_str(raw)?;
    let object = value.as_object().ok_or(ProtocolError::NotAnObject)?;

    let code = match object.get("msg_type") {
        Some(v) => v.as_i64().ok_or_else(|| ProtocolError::InvalidMsgType(v.clone()))?,
        None => return Err(ProtocolError::MissingMsgType),
    };
    let msg_type = MessageType::from_code(code).ok_or(ProtocolError::UnknownMsgType(code))?;

    let event = match msg_type {
        MessageType::WentOnline | MessageType::WentOffline => {
            let p: UserPayload = payload(msg_type, value)?;
            InboundEvent::PresenceChange {
                peer_id: p.user_pk,
                online: msg_type == MessageType::WentOnline,
            }
        }
        MessageType::TextMessage => {
            let p: TextPayload = payload(msg_type, value)?;
            InboundEvent::NewMessage(IncomingMessage {
                id: MessageId::from_wire(p.random_id),
                sender: p.sender,
                receiver: p.receiver,
                sender_username: p.sender_username,
                body: MessageBody::Text(p.text),
            })
        }
        MessageType::FileMessage => {
            let p: FilePayload = payload(msg_type, value)?;
            InboundEvent::NewMessage(IncomingMessage {
                id: MessageId::from_wire(p.db_id),
                sender: p.sender,
                receiver: p.receiver,
                sender_username: p.sender_username,
                body: MessageBody::from_file(p.file),
            })
        }
        MessageType::IsTyping => {
            let p: UserPayload = payload(msg_type, value)?;
            InboundEvent::TypingNotice(p.user_pk)
        }
        MessageType::TypingStopped => {
            let p: UserPayload = payload(msg_type, value)?;
            InboundEvent::TypingStopped(p.user_pk)
        }
        MessageType::MessageRead => {
            let p: ReadPayload = payload(msg_type, value)?;
            InboundEvent::MessageRead {
                message_id: p.message_id,
                sender: p.sender,
                receiver: p.receiver,
            }
        }
        MessageType::ErrorOccurred => {
            let p: ErrorPayload = payload(msg_type, value)?;
            InboundEvent::ServerError {
                kind: ServerErrorKind::from(p.error.0),
                text: p.error.1,
            }
        }
        MessageType::MessageIdCreated => {
            let p: IdCreatedPayload = payload(msg_type, value)?;
            InboundEvent::IdReassigned {
                old_id: MessageId::from_wire(p.random_id),
                new_id: p.db_id,
            }
        }
        MessageType::NewUnreadCount => {
            let p: UnreadPayload = payload(msg_type, value)?;
            InboundEvent::UnreadCountUpdate {
                dialog_id: p.sender,
                count: p.unread_count,
            }
        }
    };

    Ok(event)
}

/// Frame sent from the client to the server
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Text { user_pk: String, text: String, random_id: i64 },
    File { user_pk: String, file_id: Uuid, random_id: i64 },
    IsTyping,
    TypingStopped,
    MessageRead { user_pk: String, message_id: i64 },
}

impl OutboundFrame {
    pub fn msg_type(&self) -> MessageType {
        match self {
            OutboundFrame::Text { .. } => MessageType::TextMessage,
            OutboundFrame::File { .. } => MessageType::FileMessage,
            OutboundFrame::IsTyping => MessageType::IsTyping,
            OutboundFrame::TypingStopped => MessageType::TypingStopped,
            OutboundFrame::MessageRead { .. } => MessageType::MessageRead,
        }
    }

    pub fn to_value(&self) -> Value {
        let msg_type = self.msg_type().code();
        match self {
            OutboundFrame::Text { user_pk, text, random_id } => json!({
                "msg_type": msg_type,
                "text": text,
                "user_pk": user_pk,
                "random_id": random_id,
            }),
            OutboundFrame::File { user_pk, file_id, random_id } => json!({
                "msg_type": msg_type,
                "file_id": file_id.to_string(),
                "user_pk": user_pk,
                "random_id": random_id,
            }),
            OutboundFrame::IsTyping | OutboundFrame::TypingStopped => json!({ "msg_type": msg_type }),
            OutboundFrame::MessageRead { user_pk, message_id } => json!({
                "msg_type": msg_type,
                "user_pk": user_pk,
                "message_id": message_id,
            }),
        }
    }

    pub fn encode(&self) -> String {
        self.to_value().to_string()
    }
}
