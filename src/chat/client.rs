// Chat client control loop
// Owns the state, the connection and the API; every mutation happens here

use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, Instant};

use super::api::{ApiError, ChatApi};
use super::connection::{ConnectionHandle, ConnectionState, TransportEvent};
use super::presence::TypingExpired;
use super::protocol::OutboundFrame;
use super::{ChatState, Effects, Notice};
use crate::models::{Dialog, FileRef, Message, UserInfo};

/// What the user asks the client to do
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Select(String),
    SendText(String),
    SendFile(PathBuf),
    Typing,
    StopTyping,
    Users,
    Quit,
}

/// What the client reports back for display
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Notice(Notice),
    Connection(ConnectionState),
    Dialogs(Vec<Dialog>),
    Messages { dialog_id: String, messages: Vec<Message> },
    Typing(Vec<String>),
    Users(Vec<UserInfo>),
}

/// Results of work done off the control loop
enum Background {
    Dialogs(Result<Vec<Dialog>, ApiError>),
    Users(Result<Vec<UserInfo>, ApiError>),
    History { dialog_id: String, result: Result<Vec<Message>, ApiError> },
    Uploaded { dialog_id: String, result: Result<FileRef, ApiError> },
}

pub struct ChatClient {
    state: ChatState,
    typing_rx: mpsc::Receiver<TypingExpired>,
    connection: ConnectionHandle,
    state_rx: watch::Receiver<ConnectionState>,
    api: Arc<dyn ChatApi>,
    ui_tx: mpsc::Sender<UiEvent>,
    background_tx: mpsc::Sender<Background>,
    background_rx: mpsc::Receiver<Background>,
}

impl ChatClient {
    pub fn new(connection: ConnectionHandle, api: Arc<dyn ChatApi>) -> (Self, mpsc::Receiver<UiEvent>) {
        let (state, typing_rx) = ChatState::new();
        Self::with_state(state, typing_rx, connection, api)
    }

    pub fn with_timeouts(
        connection: ConnectionHandle,
        api: Arc<dyn ChatApi>,
        typing_timeout: Duration,
        typing_throttle: Duration,
    ) -> (Self, mpsc::Receiver<UiEvent>) {
        let (state, typing_rx) = ChatState::with_timeouts(typing_timeout, typing_throttle);
        Self::with_state(state, typing_rx, connection, api)
    }

    fn with_state(
        state: ChatState,
        typing_rx: mpsc::Receiver<TypingExpired>,
        connection: ConnectionHandle,
        api: Arc<dyn ChatApi>,
    ) -> (Self, mpsc::Receiver<UiEvent>) {
        let (ui_tx, ui_rx) = mpsc::channel(100);
        let (background_tx, background_rx) = mpsc::channel(100);
        let state_rx = connection.subscribe();
        (ChatClient {
            state,
            typing_rx,
            connection,
            state_rx,
            api,
            ui_tx,
            background_tx,
            background_rx,
        }, ui_rx)
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    /// Load the user and the dialog list, then open the first dialog.
    /// Failures are reported as notices and leave the stores as they were.
    pub async fn bootstrap(&mut self) {
        match self.api.fetch_self().await {
            Ok(me) => self.state.set_me(me),
            Err(e) => {
                error!("Cannot fetch user info: {}", e);
                self.notify(Notice::RequestFailed(e.to_string())).await;
                return;
            }
        }

        match self.api.fetch_dialogs().await {
            Ok(dialogs) => self.state.load_dialogs(dialogs),
            Err(e) => {
                error!("Cannot fetch dialogs: {}", e);
                self.notify(Notice::RequestFailed(e.to_string())).await;
                return;
            }
        }
        self.publish_dialogs().await;

        let first = self.state.dialogs().all().first().map(|d| d.id.clone());
        if let Some(dialog_id) = first {
            self.select(&dialog_id).await;
        }
    }

    /// Run until `Command::Quit` or until the command channel closes
    pub async fn run(&mut self, mut commands: mpsc::Receiver<Command>) {
        let mut transport_alive = true;
        let mut state_alive = true;
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Quit) | None => {
                        info!("Chat client stopping");
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                },
                event = self.connection.next_event(), if transport_alive => match event {
                    Some(event) => self.handle_transport(event).await,
                    None => {
                        debug!("Transport event channel closed");
                        transport_alive = false;
                    }
                },
                changed = self.state_rx.changed(), if state_alive => match changed {
                    Ok(()) => {
                        let state = *self.state_rx.borrow_and_update();
                        self.send_ui(UiEvent::Connection(state)).await;
                    }
                    Err(_) => state_alive = false,
                },
                Some(expired) = self.typing_rx.recv() => {
                    if self.state.expire_typing(&expired) {
                        self.publish_typing().await;
                    }
                },
                Some(result) = self.background_rx.recv() => self.handle_background(result).await,
            }
        }
    }

    /// Close the connection and wait for its task
    pub async fn shutdown(self) {
        self.connection.shutdown().await;
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Select(dialog_id) => self.select(&dialog_id).await,
            Command::SendText(text) => {
                let mut effects = self.state.stop_typing();
                effects.extend(self.state.send_text(&text));
                self.apply(effects).await;
                self.publish_selected().await;
                self.publish_dialogs().await;
            }
            Command::SendFile(path) => self.upload(path),
            Command::Typing => {
                let effects = self.state.signal_typing(Instant::now());
                self.apply(effects).await;
            }
            Command::StopTyping => {
                let effects = self.state.stop_typing();
                self.apply(effects).await;
            }
            Command::Users => self.fetch_users(),
            Command::Quit => {}
        }
    }

    async fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                self.notify(Notice::Connected).await;
                // Acks that failed while offline go out now
                let effects = self.state.sweep_selected();
                if !effects.is_empty() {
                    self.apply(effects).await;
                    self.publish_selected().await;
                }
                if self.state.me().is_some() {
                    self.refresh_dialogs();
                }
            }
            TransportEvent::Closed(reason) => self.notify(Notice::Disconnected(reason)).await,
            TransportEvent::Frame(raw) => {
                let effects = self.state.handle_frame(&raw);
                self.apply(effects).await;
                self.publish_dialogs().await;
                self.publish_selected().await;
                self.publish_typing().await;
            }
        }
    }

    async fn handle_background(&mut self, result: Background) {
        match result {
            Background::Dialogs(Ok(dialogs)) => {
                self.state.load_dialogs(dialogs);
                self.publish_dialogs().await;
            }
            Background::Users(Ok(users)) => self.send_ui(UiEvent::Users(users)).await,
            Background::History { dialog_id, result: Ok(history) } => {
                let effects = self.state.apply_history(&dialog_id, history);
                self.apply(effects).await;
                if self.state.dialogs().is_selected(&dialog_id) {
                    self.publish_selected().await;
                }
            }
            Background::Uploaded { dialog_id, result: Ok(file) } => {
                let effects = self.state.send_file(&dialog_id, file);
                self.apply(effects).await;
                self.publish_selected().await;
                self.publish_dialogs().await;
            }
            Background::Dialogs(Err(e))
            | Background::Users(Err(e))
            | Background::History { result: Err(e), .. }
            | Background::Uploaded { result: Err(e), .. } => {
                warn!("Background request failed: {}", e);
                self.notify(Notice::RequestFailed(e.to_string())).await;
            }
        }
    }

    async fn select(&mut self, dialog_id: &str) {
        let effects = self.state.select_dialog(dialog_id);
        self.apply(effects).await;
        if self.state.dialogs().is_selected(dialog_id) {
            self.publish_dialogs().await;
            self.publish_selected().await;
            self.fetch_history(dialog_id);
        }
    }

    fn fetch_history(&self, dialog_id: &str) {
        let Some(me) = self.state.me().map(|me| me.pk.clone()) else {
            return;
        };
        let api = Arc::clone(&self.api);
        let tx = self.background_tx.clone();
        let dialog_id = dialog_id.to_string();
        tokio::spawn(async move {
            let result = api.fetch_messages(&dialog_id, 1).await.map(|page| {
                page.data.into_iter().map(|record| record.into_message(&me)).collect()
            });
            let _ = tx.send(Background::History { dialog_id, result }).await;
        });
    }

    fn refresh_dialogs(&self) {
        let api = Arc::clone(&self.api);
        let tx = self.background_tx.clone();
        tokio::spawn(async move {
            let result = api.fetch_dialogs().await;
            let _ = tx.send(Background::Dialogs(result)).await;
        });
    }

    fn fetch_users(&self) {
        let api = Arc::clone(&self.api);
        let tx = self.background_tx.clone();
        tokio::spawn(async move {
            let result = api.fetch_users().await;
            let _ = tx.send(Background::Users(result)).await;
        });
    }

    fn upload(&self, path: PathBuf) {
        let Some(dialog_id) = self.state.dialogs().selected_id().map(str::to_string) else {
            debug!("No dialog selected, not uploading {:?}", path);
            return;
        };
        let api = Arc::clone(&self.api);
        let tx = self.background_tx.clone();
        tokio::spawn(async move {
            let result = api.upload_file(&path).await;
            let _ = tx.send(Background::Uploaded { dialog_id, result }).await;
        });
    }

    /// Transmit frames and surface notices. A frame that cannot go out is reported,
    /// and a read ack among them is rolled back so a later sweep sends it again.
    async fn apply(&mut self, effects: Effects) {
        let Effects { frames, notices } = effects;
        for frame in frames {
            if let Err(e) = self.connection.send(&frame) {
                warn!("Dropping {:?} frame: {}", frame.msg_type(), e);
                if let OutboundFrame::MessageRead { message_id, .. } = frame {
                    self.state.ack_failed(message_id);
                }
                self.notify(Notice::NotSent(e.to_string())).await;
            }
        }
        for notice in notices {
            self.notify(notice).await;
        }
    }

    async fn notify(&self, notice: Notice) {
        info!("{}", notice);
        self.send_ui(UiEvent::Notice(notice)).await;
    }

    async fn publish_dialogs(&self) {
        self.send_ui(UiEvent::Dialogs(self.state.dialogs().all().to_vec())).await;
    }

    async fn publish_selected(&self) {
        if let Some(dialog_id) = self.state.dialogs().selected_id() {
            let messages = self.state.messages().for_dialog(dialog_id);
            self.send_ui(UiEvent::Messages { dialog_id: dialog_id.to_string(), messages }).await;
        }
    }

    async fn publish_typing(&self) {
        self.send_ui(UiEvent::Typing(self.state.typing().peers())).await;
    }

    async fn send_ui(&self, event: UiEvent) {
        if self.ui_tx.send(event).await.is_err() {
            debug!("UI receiver dropped");
        }
    }
}
