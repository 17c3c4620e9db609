// Dialog store and the dialog selection state machine

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use log::debug;

use crate::models::Dialog;

/// Which dialog the user currently has open
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Selection {
    #[default]
    NoSelection,
    Selected(Dialog),
}

/// Ordered dialogs, unique by id. Dialogs are never removed within a session.
#[derive(Debug, Clone, Default)]
pub struct DialogStore {
    dialogs: Vec<Dialog>,
    selection: Selection,
}

impl DialogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a freshly fetched dialog list. Known dialogs are updated in place,
    /// new ones are appended, and dialogs missing from the list are kept.
    /// The selection never changes. Returns how many dialogs were new.
    pub fn upsert_all(&mut self, dialogs: Vec<Dialog>) -> usize {
        let mut seen = HashSet::new();
        let mut added = 0;
        for dialog in dialogs {
            if !seen.insert(dialog.id.clone()) {
                debug!("Skipping duplicate dialog {} in fetched list", dialog.id);
                continue;
            }
            match self.get_mut(&dialog.id) {
                Some(existing) => {
                    existing.title = dialog.title;
                    if !dialog.subtitle.is_empty() {
                        existing.subtitle = dialog.subtitle;
                    }
                    existing.unread = dialog.unread;
                    existing.online = dialog.online;
                    existing.date = dialog.date;
                }
                None => {
                    self.dialogs.push(Dialog { highlighted: false, ..dialog });
                    added += 1;
                }
            }
        }
        if let Some(id) = self.selected_id().map(str::to_string) {
            self.sync_selection(&id);
        }
        added
    }

    pub fn all(&self) -> &[Dialog] {
        &self.dialogs
    }

    pub fn len(&self) -> usize {
        self.dialogs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dialogs.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Dialog> {
        self.dialogs.iter().find(|d| d.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Dialog> {
        self.dialogs.iter_mut().find(|d| d.id == id)
    }

    /// Keep the selection's local copy in step with the stored dialog
    fn sync_selection(&mut self, id: &str) {
        if self.selected_id() != Some(id) {
            return;
        }
        if let Some(dialog) = self.get(id).cloned() {
            self.selection = Selection::Selected(dialog);
        }
    }

    /// Record activity in a dialog, creating it when the peer is unknown.
    /// Returns true when a new dialog was appended.
    pub fn touch(&mut self, id: &str, title: &str, preview: &str, date: DateTime<Utc>) -> bool {
        let created = match self.get_mut(id) {
            Some(dialog) => {
                dialog.subtitle = preview.to_string();
                dialog.date = date;
                false
            }
            None => {
                debug!("Creating dialog {} for new peer {}", id, title);
                let mut dialog = Dialog::new(id, title);
                dialog.subtitle = preview.to_string();
                dialog.date = date;
                self.dialogs.push(dialog);
                true
            }
        };
        self.sync_selection(id);
        created
    }

    /// Update the presence flag. Returns false for unknown dialogs.
    pub fn set_online(&mut self, id: &str, online: bool) -> bool {
        match self.get_mut(id) {
            Some(dialog) => dialog.online = online,
            None => return false,
        }
        self.sync_selection(id);
        true
    }

    /// Overwrite the unread counter. Returns false for unknown dialogs.
    pub fn set_unread(&mut self, id: &str, count: u32) -> bool {
        match self.get_mut(id) {
            Some(dialog) => dialog.unread = count,
            None => return false,
        }
        self.sync_selection(id);
        true
    }

    /// Move the selection to `id`. Unknown ids leave the store untouched.
    pub fn select(&mut self, id: &str) -> bool {
        if !self.contains(id) {
            return false;
        }
        for dialog in self.dialogs.iter_mut() {
            dialog.highlighted = dialog.id == id;
        }
        if let Some(dialog) = self.get(id).cloned() {
            self.selection = Selection::Selected(dialog);
        }
        true
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn selected(&self) -> Option<&Dialog> {
        match &self.selection {
            Selection::Selected(dialog) => Some(dialog),
            Selection::NoSelection => None,
        }
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected().map(|d| d.id.as_str())
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.selected_id() == Some(id)
    }
}
