// Outbound composer
// Turns user intents into protocol frames, with optimistic local updates

use chrono::Utc;
use log::{debug, info};
use tokio::time::{Duration, Instant};

use super::protocol::{OutboundFrame, TEXT_MAX_LENGTH};
use super::{ChatState, Effects, Notice};
use crate::models::{Direction, FileRef, Message, MessageBody, MessageId, MessageStatus};

/// Minimum spacing between two typing signals
pub const DEFAULT_TYPING_THROTTLE: Duration = Duration::from_millis(5000);

impl ChatState {
    /// Send text to the selected dialog. Without a selection this does nothing.
    pub fn send_text(&mut self, text: &str) -> Effects {
        match self.dialogs.selected_id().map(str::to_string) {
            Some(dialog_id) => self.send_text_to(&dialog_id, text),
            None => {
                debug!("No dialog selected, dropping text");
                Effects::none()
            }
        }
    }

    /// Send text to `dialog_id`, appending a `Waiting` record before the frame goes out
    pub fn send_text_to(&mut self, dialog_id: &str, text: &str) -> Effects {
        if text.trim().is_empty() {
            return Effects::none();
        }
        if text.chars().count() > TEXT_MAX_LENGTH {
            return Effects::notice(Notice::NotSent(format!(
                "text is longer than {} characters",
                TEXT_MAX_LENGTH
            )));
        }

        let id = self.append_optimistic(dialog_id, MessageBody::Text(text.to_string()));
        Effects::frame(OutboundFrame::Text {
            user_pk: dialog_id.to_string(),
            text: text.to_string(),
            random_id: id.raw(),
        })
    }

    /// Send an already uploaded file to `dialog_id`
    pub fn send_file(&mut self, dialog_id: &str, file: FileRef) -> Effects {
        let file_id = file.id;
        let id = self.append_optimistic(dialog_id, MessageBody::from_file(file));
        Effects::frame(OutboundFrame::File {
            user_pk: dialog_id.to_string(),
            file_id,
            random_id: id.raw(),
        })
    }

    fn append_optimistic(&mut self, dialog_id: &str, body: MessageBody) -> MessageId {
        let id = MessageId::provisional();
        let now = Utc::now();
        let title = self
            .dialogs
            .get(dialog_id)
            .map(|d| d.title.clone())
            .unwrap_or_default();
        self.dialogs.touch(dialog_id, &title, &body.preview(), now);

        info!("Sending message {} to {}", id, dialog_id);
        self.messages.insert(Message {
            id,
            dialog_id: dialog_id.to_string(),
            direction: Direction::Outbound,
            status: MessageStatus::Waiting,
            body,
            timestamp: now,
        });
        id
    }

    /// Signal that the user is typing, at most once per throttle interval
    pub fn signal_typing(&mut self, now: Instant) -> Effects {
        if let Some(last) = self.last_typing_sent {
            if now.saturating_duration_since(last) < self.typing_throttle {
                return Effects::none();
            }
        }
        self.last_typing_sent = Some(now);
        self.typing_active = true;
        Effects::frame(OutboundFrame::IsTyping)
    }

    /// Signal that the user stopped typing, only if a typing signal went out
    pub fn stop_typing(&mut self) -> Effects {
        if !self.typing_active {
            return Effects::none();
        }
        self.typing_active = false;
        self.last_typing_sent = None;
        Effects::frame(OutboundFrame::TypingStopped)
    }

    /// Mark one inbound message read. Repeated calls send nothing.
    pub fn mark_read(&mut self, message_id: i64) -> Effects {
        let dialog_id = match self.messages.get(MessageId::Server(message_id)) {
            Some(message) if message.is_inbound() => message.dialog_id.clone(),
            _ => {
                debug!("Cannot mark {} read: no such inbound message", message_id);
                return Effects::none();
            }
        };
        self.acknowledge_read(&dialog_id, message_id)
    }

    /// Flip a message to `Read` and produce its ack the first time only
    pub(crate) fn acknowledge_read(&mut self, dialog_id: &str, message_id: i64) -> Effects {
        let id = MessageId::Server(message_id);
        let already_read = match self.messages.get(id) {
            Some(message) => message.status == MessageStatus::Read,
            None => return Effects::none(),
        };
        self.messages.set_status(id, MessageStatus::Read);

        if already_read || !self.read_acked.insert(message_id) {
            return Effects::none();
        }
        debug!("Acknowledging message {} in dialog {}", message_id, dialog_id);
        Effects::frame(OutboundFrame::MessageRead {
            user_pk: dialog_id.to_string(),
            message_id,
        })
    }

    /// Undo an acknowledgement whose frame never left. The message goes back to
    /// `Received` so the next read sweep acknowledges it again.
    pub fn ack_failed(&mut self, message_id: i64) {
        if !self.read_acked.remove(&message_id) {
            return;
        }
        debug!("Read ack for {} not sent, will retry", message_id);
        self.messages.set_status(MessageId::Server(message_id), MessageStatus::Received);
    }

    /// Acknowledge whatever is still unread in the open dialog
    pub fn sweep_selected(&mut self) -> Effects {
        match self.dialogs.selected_id().map(str::to_string) {
            Some(dialog_id) => self.read_sweep(&dialog_id),
            None => Effects::none(),
        }
    }

    /// Select a dialog and acknowledge all of its unread inbound messages
    pub fn select_dialog(&mut self, dialog_id: &str) -> Effects {
        if !self.dialogs.select(dialog_id) {
            debug!("Cannot select unknown dialog {}", dialog_id);
            return Effects::none();
        }
        self.read_sweep(dialog_id)
    }

    fn read_sweep(&mut self, dialog_id: &str) -> Effects {
        let mut effects = Effects::none();
        for message_id in self.messages.unread_inbound(dialog_id) {
            effects.extend(self.acknowledge_read(dialog_id, message_id));
        }
        effects
    }

    /// Merge fetched history for `dialog_id`; the open dialog gets a read sweep
    pub fn apply_history(&mut self, dialog_id: &str, history: Vec<Message>) -> Effects {
        let added = self.messages.merge_fetched(history);
        debug!("Merged history for {}: {} new messages", dialog_id, added);
        if self.dialogs.is_selected(dialog_id) {
            self.read_sweep(dialog_id)
        } else {
            Effects::none()
        }
    }
}
