// Common test utilities for integration tests
// Logging setup, state and frame builders, and an in-memory ChatApi

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Mutex, Once};

use async_trait::async_trait;
use chrono::Utc;
use log::LevelFilter;
use serde_json::json;
use uuid::Uuid;

use privchat::chat::api::{ApiError, ChatApi, MessageRecord, Page};
use privchat::chat::ChatState;
use privchat::models::{Dialog, FileRef, UserInfo};

pub const ME: &str = "1";

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .init();
    });
}

pub fn me() -> UserInfo {
    UserInfo { pk: ME.to_string(), username: "alice".to_string() }
}

/// Logged-in state holding one dialog per `(id, title)`. Needs a tokio runtime.
pub fn state_with_dialogs(dialogs: &[(&str, &str)]) -> ChatState {
    setup_logging();
    let (mut state, _typing_rx) = ChatState::new();
    state.set_me(me());
    state.load_dialogs(dialogs.iter().map(|(id, title)| Dialog::new(id, title)).collect());
    state
}

pub fn text_frame(id: i64, sender: &str, receiver: &str, text: &str) -> String {
    json!({
        "msg_type": 3,
        "random_id": id,
        "text": text,
        "sender": sender,
        "receiver": receiver,
        "sender_username": format!("user{}", sender),
    })
    .to_string()
}

pub fn id_created_frame(random_id: i64, db_id: i64) -> String {
    json!({"msg_type": 8, "random_id": random_id, "db_id": db_id}).to_string()
}

pub fn typing_frame(peer: &str) -> String {
    json!({"msg_type": 5, "user_pk": peer}).to_string()
}

pub fn file_ref(name: &str) -> FileRef {
    FileRef {
        id: Uuid::new_v4(),
        url: format!("/media/user_{}/{}", ME, name),
        name: name.to_string(),
        size: 128,
    }
}

/// A stored message as the history endpoint returns it
pub fn history_record(id: i64, sender: &str, recipient: &str, text: &str, read: bool) -> MessageRecord {
    serde_json::from_value(json!({
        "id": id,
        "text": text,
        "sent": Utc::now().timestamp() as f64,
        "edited": Utc::now().timestamp() as f64,
        "read": read,
        "file": null,
        "sender": sender,
        "recipient": recipient,
    }))
    .expect("valid message record")
}

/// In-memory `ChatApi` serving fixed data and recording uploads
pub struct MockApi {
    pub me: UserInfo,
    pub dialogs: Vec<Dialog>,
    pub history: Vec<MessageRecord>,
    pub fail_dialogs: bool,
    pub uploads: Mutex<Vec<String>>,
}

impl MockApi {
    pub fn new(dialogs: &[(&str, &str)]) -> Self {
        MockApi {
            me: me(),
            dialogs: dialogs.iter().map(|(id, title)| Dialog::new(id, title)).collect(),
            history: Vec::new(),
            fail_dialogs: false,
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn with_history(mut self, history: Vec<MessageRecord>) -> Self {
        self.history = history;
        self
    }

    pub fn failing_dialogs(mut self) -> Self {
        self.fail_dialogs = true;
        self
    }
}

fn unavailable(path: &str) -> ApiError {
    ApiError::Decode {
        path: path.to_string(),
        source: serde_json::from_str::<u8>("\"unavailable\"").unwrap_err(),
    }
}

#[async_trait]
impl ChatApi for MockApi {
    async fn fetch_self(&self) -> Result<UserInfo, ApiError> {
        Ok(self.me.clone())
    }

    async fn fetch_dialogs(&self) -> Result<Vec<Dialog>, ApiError> {
        if self.fail_dialogs {
            return Err(unavailable("/dialogs/"));
        }
        Ok(self.dialogs.clone())
    }

    async fn fetch_messages(&self, dialog_id: &str, page: u32) -> Result<Page<MessageRecord>, ApiError> {
        let data = self
            .history
            .iter()
            .filter(|r| r.sender == dialog_id || r.recipient == dialog_id)
            .cloned()
            .collect();
        Ok(Page { page, pages: 1, data })
    }

    async fn fetch_users(&self) -> Result<Vec<UserInfo>, ApiError> {
        Ok(vec![self.me.clone()])
    }

    async fn upload_file(&self, path: &Path) -> Result<FileRef, ApiError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.uploads.lock().unwrap().push(name.clone());
        Ok(file_ref(&name))
    }
}
