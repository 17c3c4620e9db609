// Chat client module
// Entry point for the real-time messaging state machine, organised by concern:
// wire protocol, transport, stores, inbound dispatch and outbound composition

use std::collections::HashSet;
use std::fmt;

use log::{debug, info};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

pub mod api;
pub mod client;
pub mod composer;
pub mod connection;
pub mod dialogs;
pub mod dispatcher;
pub mod messages;
pub mod presence;
pub mod protocol;

pub use api::{ApiError, ChatApi, HttpChatApi};
pub use client::{ChatClient, Command, UiEvent};
pub use composer::DEFAULT_TYPING_THROTTLE;
pub use connection::{ConnectionHandle, ConnectionManager, ConnectionState, Endpoint, ReconnectPolicy, TransportEvent};
pub use dialogs::{DialogStore, Selection};
pub use messages::MessageStore;
pub use presence::{OnlineSet, TypingExpired, TypingTracker, DEFAULT_TYPING_TIMEOUT};
pub use protocol::{InboundEvent, OutboundFrame, ProtocolError, ServerErrorKind};

use crate::models::{Dialog, UserInfo};

/// Something the user should be told about. Never fatal.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Connected,
    Disconnected(String),
    MalformedFrame(String),
    ServerError { kind: ServerErrorKind, text: String },
    RequestFailed(String),
    NotSent(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Connected => write!(f, "Connected"),
            Notice::Disconnected(reason) => write!(f, "Disconnected: {}", reason),
            Notice::MalformedFrame(err) => write!(f, "Ignored malformed message from server: {}", err),
            Notice::ServerError { kind, text } => write!(f, "Server error ({:?}): {}", kind, text),
            Notice::RequestFailed(err) => write!(f, "Request failed: {}", err),
            Notice::NotSent(reason) => write!(f, "Message not sent: {}", reason),
        }
    }
}

/// Frames to transmit and notices to surface after a state transition
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Effects {
    pub frames: Vec<OutboundFrame>,
    pub notices: Vec<Notice>,
}

impl Effects {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn notice(notice: Notice) -> Self {
        Effects { frames: Vec::new(), notices: vec![notice] }
    }

    pub fn frame(frame: OutboundFrame) -> Self {
        Effects { frames: vec![frame], notices: Vec::new() }
    }

    pub fn extend(&mut self, other: Effects) {
        self.frames.extend(other.frames);
        self.notices.extend(other.notices);
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty() && self.notices.is_empty()
    }
}

/// All client-side chat state. Mutated only through the transition methods
/// in `dispatcher` (server events) and `composer` (user intents).
pub struct ChatState {
    me: Option<UserInfo>,
    dialogs: DialogStore,
    messages: MessageStore,
    online: OnlineSet,
    typing: TypingTracker,
    read_acked: HashSet<i64>,   // Server ids we already sent a read ack for
    typing_throttle: Duration,
    last_typing_sent: Option<Instant>,
    typing_active: bool,
}

impl ChatState {
    /// Create empty state with default timeouts. Must be used inside a tokio runtime.
    pub fn new() -> (Self, mpsc::Receiver<TypingExpired>) {
        Self::with_timeouts(DEFAULT_TYPING_TIMEOUT, DEFAULT_TYPING_THROTTLE)
    }

    pub fn with_timeouts(typing_timeout: Duration, typing_throttle: Duration) -> (Self, mpsc::Receiver<TypingExpired>) {
        let (typing, typing_rx) = TypingTracker::new(typing_timeout);
        (Self {
            me: None,
            dialogs: DialogStore::new(),
            messages: MessageStore::new(),
            online: OnlineSet::new(),
            typing,
            read_acked: HashSet::new(),
            typing_throttle,
            last_typing_sent: None,
            typing_active: false,
        }, typing_rx)
    }

    pub fn set_me(&mut self, me: UserInfo) {
        info!("Logged in as {} ({})", me.username, me.pk);
        self.me = Some(me);
    }

    pub fn me(&self) -> Option<&UserInfo> {
        self.me.as_ref()
    }

    pub fn is_me(&self, user_id: &str) -> bool {
        self.me.as_ref().map(|me| me.pk == user_id).unwrap_or(false)
    }

    /// Install a freshly fetched dialog list
    pub fn load_dialogs(&mut self, dialogs: Vec<Dialog>) {
        debug!("Loading {} dialogs", dialogs.len());
        for dialog in &dialogs {
            self.online.set(&dialog.id, dialog.online);
        }
        self.dialogs.upsert_all(dialogs);
    }

    /// Apply a typing timer expiry. Returns true if the typing set changed.
    pub fn expire_typing(&mut self, expired: &TypingExpired) -> bool {
        self.typing.expire(expired)
    }

    pub fn dialogs(&self) -> &DialogStore {
        &self.dialogs
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    pub fn online(&self) -> &OnlineSet {
        &self.online
    }

    pub fn typing(&self) -> &TypingTracker {
        &self.typing
    }
}
