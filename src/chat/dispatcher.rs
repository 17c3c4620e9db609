// Inbound dispatcher
// Routes each decoded server event into exactly one store mutation, in arrival order

use chrono::Utc;
use log::{debug, info, warn};

use super::messages::InsertOutcome;
use super::protocol::{decode_frame, IncomingMessage, InboundEvent};
use super::{ChatState, Effects, Notice};
use crate::models::{Direction, Message, MessageId, MessageStatus};

impl ChatState {
    /// Decode and apply one raw frame. Undecodable frames leave the state untouched.
    pub fn handle_frame(&mut self, raw: &str) -> Effects {
        match decode_frame(raw) {
            Ok(event) => self.handle_event(event),
            Err(e) => {
                warn!("Discarding malformed frame {:?}: {}", raw, e);
                Effects::notice(Notice::MalformedFrame(e.to_string()))
            }
        }
    }

    /// Apply one decoded server event
    pub fn handle_event(&mut self, event: InboundEvent) -> Effects {
        match event {
            InboundEvent::NewMessage(msg) => self.on_new_message(msg),
            InboundEvent::IdReassigned { old_id, new_id } => self.on_id_reassigned(old_id, new_id),
            InboundEvent::TypingNotice(peer_id) => {
                if !self.is_me(&peer_id) {
                    self.typing.notice(&peer_id);
                }
                Effects::none()
            }
            InboundEvent::TypingStopped(peer_id) => {
                self.typing.stop(&peer_id);
                Effects::none()
            }
            InboundEvent::PresenceChange { peer_id, online } => {
                debug!("Peer {} went {}", peer_id, if online { "online" } else { "offline" });
                self.online.set(&peer_id, online);
                self.dialogs.set_online(&peer_id, online);
                Effects::none()
            }
            InboundEvent::UnreadCountUpdate { dialog_id, count } => {
                if !self.dialogs.set_unread(&dialog_id, count) {
                    debug!("Unread count for unknown dialog {} ignored", dialog_id);
                }
                Effects::none()
            }
            InboundEvent::MessageRead { message_id, receiver, .. } => {
                let id = MessageId::Server(message_id);
                match self.messages.get_mut(id) {
                    Some(message) if message.direction == Direction::Outbound => {
                        debug!("Message {} read by {}", message_id, receiver);
                        message.status = MessageStatus::Read;
                    }
                    _ => debug!("Read receipt for unknown message {} ignored", message_id),
                }
                Effects::none()
            }
            InboundEvent::ServerError { kind, text } => {
                warn!("Server reported {:?}: {}", kind, text);
                Effects::notice(Notice::ServerError { kind, text })
            }
        }
    }

    fn on_new_message(&mut self, msg: IncomingMessage) -> Effects {
        let mut effects = Effects::none();
        let now = Utc::now();

        // Our own echo carries no peer name; a new dialog stays untitled until the next reload
        let (direction, dialog_id, title) = if self.is_me(&msg.sender) {
            (Direction::Outbound, msg.receiver.clone(), String::new())
        } else {
            (Direction::Inbound, msg.sender.clone(), msg.sender_username.clone())
        };

        if direction == Direction::Inbound {
            // A message from the peer ends their typing indicator
            self.typing.stop(&msg.sender);
        }

        let status = match (direction, msg.id) {
            (Direction::Outbound, MessageId::Server(_)) => MessageStatus::Sent,
            (Direction::Outbound, MessageId::Provisional(_)) => MessageStatus::Waiting,
            (Direction::Inbound, _) => MessageStatus::Received,
        };
        // A repeated delivery never downgrades a read message
        let status = match self.messages.get(msg.id) {
            Some(existing) if existing.status == MessageStatus::Read => MessageStatus::Read,
            _ => status,
        };

        let preview = msg.body.preview();
        let outcome = self.messages.insert(Message {
            id: msg.id,
            dialog_id: dialog_id.clone(),
            direction,
            status,
            body: msg.body,
            timestamp: now,
        });
        if outcome == InsertOutcome::Conflict {
            return effects;
        }

        if self.dialogs.touch(&dialog_id, &title, &preview, now) {
            info!("New dialog with {} ({})", title, dialog_id);
        }

        // Read acks need the authoritative id; provisional ones are acked on reconciliation
        if direction == Direction::Inbound && self.dialogs.is_selected(&dialog_id) {
            if let Some(server_id) = msg.id.server_id() {
                effects.extend(self.acknowledge_read(&dialog_id, server_id));
            }
        }

        effects
    }

    fn on_id_reassigned(&mut self, old_id: MessageId, new_id: i64) -> Effects {
        let (direction, dialog_id) = match self.messages.reconcile(old_id, new_id) {
            Some(message) => {
                if message.direction == Direction::Outbound && message.status != MessageStatus::Read {
                    message.status = MessageStatus::Sent;
                }
                (message.direction, message.dialog_id.clone())
            }
            None => {
                debug!("No message with id {} to reconcile, ignoring", old_id);
                return Effects::none();
            }
        };

        if direction == Direction::Outbound {
            return Effects::none();
        }

        if self.dialogs.is_selected(&dialog_id) {
            self.acknowledge_read(&dialog_id, new_id)
        } else {
            self.messages.set_status(MessageId::Server(new_id), MessageStatus::Received);
            Effects::none()
        }
    }
}
