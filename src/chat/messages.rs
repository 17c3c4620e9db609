// Message store: ordered message records with provisional id reconciliation

use log::{debug, warn};

use crate::models::{Message, MessageId, MessageStatus};

/// What `MessageStore::insert` did with a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Appended,
    Replaced,
    /// The id belongs to a record of another dialog or direction; nothing changed
    Conflict,
}

/// Ordered message records. Ids are unique across the store at all times.
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn position(&self, id: MessageId) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.position(id).map(|idx| &self.messages[idx])
    }

    pub fn get_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    pub fn for_dialog(&self, dialog_id: &str) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|m| m.dialog_id == dialog_id)
            .cloned()
            .collect()
    }

    /// Append a record, or overwrite in place when the same message is already
    /// stored. A stored record only counts as the same message when its dialog
    /// and direction match too.
    pub fn insert(&mut self, message: Message) -> InsertOutcome {
        match self.position(message.id) {
            Some(idx) => {
                let existing = &self.messages[idx];
                if existing.dialog_id != message.dialog_id || existing.direction != message.direction {
                    warn!(
                        "Message id {} already used by a {:?} message in dialog {}, keeping it",
                        message.id, existing.direction, existing.dialog_id
                    );
                    return InsertOutcome::Conflict;
                }
                debug!("Message {} already stored, replacing in place", message.id);
                self.messages[idx] = message;
                InsertOutcome::Replaced
            }
            None => {
                self.messages.push(message);
                InsertOutcome::Appended
            }
        }
    }

    /// Replace the id `old` with the server id `new_id`.
    ///
    /// Returns the reconciled record, or `None` when no record has id `old`.
    /// If a record with the server id is already stored, the provisional
    /// record is folded into it so the store never holds the message twice.
    pub fn reconcile(&mut self, old: MessageId, new_id: i64) -> Option<&mut Message> {
        let new = MessageId::Server(new_id);
        let idx = self.position(old)?;
        if old == new {
            return self.messages.get_mut(idx);
        }

        match self.position(new) {
            Some(existing) => {
                warn!("Message {} already stored, dropping duplicate {}", new, old);
                self.messages.remove(idx);
                let existing = if existing > idx { existing - 1 } else { existing };
                self.messages.get_mut(existing)
            }
            None => {
                debug!("Reconciling message {} -> {}", old, new);
                let message = self.messages.get_mut(idx)?;
                message.id = new;
                Some(message)
            }
        }
    }

    /// Change the status of one record. Returns false for unknown ids.
    pub fn set_status(&mut self, id: MessageId, status: MessageStatus) -> bool {
        match self.get_mut(id) {
            Some(message) => {
                message.status = status;
                true
            }
            None => false,
        }
    }

    /// Server ids of inbound messages in `dialog_id` that are not read yet
    pub fn unread_inbound(&self, dialog_id: &str) -> Vec<i64> {
        self.messages
            .iter()
            .filter(|m| m.dialog_id == dialog_id && m.is_inbound() && m.status != MessageStatus::Read)
            .filter_map(|m| m.id.server_id())
            .collect()
    }

    /// Merge fetched history. Known ids are overwritten in place, new ones
    /// are added, and the store is re-ordered by timestamp.
    /// Returns how many records were new.
    pub fn merge_fetched(&mut self, fetched: Vec<Message>) -> usize {
        let mut added = 0;
        for message in fetched {
            if self.insert(message) == InsertOutcome::Appended {
                added += 1;
            }
        }
        if added > 0 {
            self.messages.sort_by_key(|m| m.timestamp);
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, MessageBody};
    use chrono::{Duration, Utc};
    use std::collections::HashSet;

    fn message(id: MessageId, dialog: &str, direction: Direction, status: MessageStatus) -> Message {
        Message {
            id,
            dialog_id: dialog.to_string(),
            direction,
            status,
            body: MessageBody::Text(format!("message {}", id)),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_insert_replaces_duplicate_ids() {
        let mut store = MessageStore::new();
        let id = MessageId::Server(10);
        assert_eq!(store.insert(message(id, "1", Direction::Inbound, MessageStatus::Received)), InsertOutcome::Appended);
        assert_eq!(store.insert(message(id, "1", Direction::Inbound, MessageStatus::Read)), InsertOutcome::Replaced);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(id).unwrap().status, MessageStatus::Read);
    }

    #[test]
    fn test_insert_keeps_record_of_other_dialog_with_same_id() {
        let mut store = MessageStore::new();
        let id = MessageId::Provisional(-7);
        store.insert(message(id, "2", Direction::Inbound, MessageStatus::Received));

        assert_eq!(store.insert(message(id, "3", Direction::Inbound, MessageStatus::Received)), InsertOutcome::Conflict);
        assert_eq!(store.insert(message(id, "2", Direction::Outbound, MessageStatus::Waiting)), InsertOutcome::Conflict);
        assert_eq!(store.len(), 1);
        let kept = store.get(id).unwrap();
        assert_eq!(kept.dialog_id, "2");
        assert_eq!(kept.direction, Direction::Inbound);
    }

    #[test]
    fn test_reconcile_unknown_id_is_noop() {
        let mut store = MessageStore::new();
        store.insert(message(MessageId::Provisional(-5), "1", Direction::Outbound, MessageStatus::Waiting));
        let before = store.all().to_vec();
        assert!(store.reconcile(MessageId::Provisional(-6), 99).is_none());
        assert_eq!(store.all(), before.as_slice());
    }

    #[test]
    fn test_reconcile_replaces_in_place() {
        let mut store = MessageStore::new();
        store.insert(message(MessageId::Server(1), "1", Direction::Inbound, MessageStatus::Read));
        store.insert(message(MessageId::Provisional(-5), "1", Direction::Outbound, MessageStatus::Waiting));
        store.insert(message(MessageId::Server(2), "1", Direction::Inbound, MessageStatus::Read));

        let reconciled = store.reconcile(MessageId::Provisional(-5), 55).unwrap();
        assert_eq!(reconciled.id, MessageId::Server(55));

        let ids: Vec<MessageId> = store.all().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![MessageId::Server(1), MessageId::Server(55), MessageId::Server(2)]);
    }

    #[test]
    fn test_reconcile_onto_existing_id_keeps_ids_unique() {
        let mut store = MessageStore::new();
        store.insert(message(MessageId::Provisional(-5), "1", Direction::Outbound, MessageStatus::Waiting));
        store.insert(message(MessageId::Server(55), "1", Direction::Outbound, MessageStatus::Sent));

        let reconciled = store.reconcile(MessageId::Provisional(-5), 55).unwrap();
        assert_eq!(reconciled.id, MessageId::Server(55));
        assert_eq!(store.len(), 1);

        let unique: HashSet<MessageId> = store.all().iter().map(|m| m.id).collect();
        assert_eq!(unique.len(), store.len());
    }

    #[test]
    fn test_unread_inbound_skips_provisional_outbound_and_read() {
        let mut store = MessageStore::new();
        store.insert(message(MessageId::Server(1), "1", Direction::Inbound, MessageStatus::Received));
        store.insert(message(MessageId::Server(2), "1", Direction::Inbound, MessageStatus::Read));
        store.insert(message(MessageId::Provisional(-3), "1", Direction::Inbound, MessageStatus::Received));
        store.insert(message(MessageId::Server(4), "1", Direction::Outbound, MessageStatus::Sent));
        store.insert(message(MessageId::Server(5), "2", Direction::Inbound, MessageStatus::Received));

        assert_eq!(store.unread_inbound("1"), vec![1]);
        assert_eq!(store.unread_inbound("2"), vec![5]);
    }

    #[test]
    fn test_merge_fetched_orders_by_timestamp() {
        let mut store = MessageStore::new();
        let live = message(MessageId::Server(30), "1", Direction::Inbound, MessageStatus::Received);
        store.insert(live.clone());

        let mut older = message(MessageId::Server(10), "1", Direction::Inbound, MessageStatus::Read);
        older.timestamp = live.timestamp - Duration::minutes(5);
        let mut same = live.clone();
        same.status = MessageStatus::Read;

        assert_eq!(store.merge_fetched(vec![older, same]), 1);
        let ids: Vec<MessageId> = store.all().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![MessageId::Server(10), MessageId::Server(30)]);
        assert_eq!(store.get(MessageId::Server(30)).unwrap().status, MessageStatus::Read);
    }
}
