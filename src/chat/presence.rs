// Presence and typing indicators
// Online peers are toggled by explicit events; typing peers expire on a timer

use log::debug;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// Default lifetime of a typing notice
pub const DEFAULT_TYPING_TIMEOUT: Duration = Duration::from_millis(5000);

/// Peers currently online. No implicit expiry.
#[derive(Debug, Clone, Default)]
pub struct OnlineSet {
    peers: HashSet<String>,
}

impl OnlineSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the set changed
    pub fn set(&mut self, peer_id: &str, online: bool) -> bool {
        if online {
            self.peers.insert(peer_id.to_string())
        } else {
            self.peers.remove(peer_id)
        }
    }

    pub fn is_online(&self, peer_id: &str) -> bool {
        self.peers.contains(peer_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Fired by a typing timer. Stale timers are recognised by their generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingExpired {
    pub peer_id: String,
    generation: u64,
}

struct TypingEntry {
    generation: u64,
    timer: JoinHandle<()>,
}

/// Peers currently typing. Each peer owns exactly one pending expiry timer;
/// a fresh notice aborts and replaces it.
pub struct TypingTracker {
    timeout: Duration,
    entries: HashMap<String, TypingEntry>,
    next_generation: u64,
    expired_tx: mpsc::Sender<TypingExpired>,
}

impl TypingTracker {
    /// Create a tracker and the channel its timers report expirations on.
    /// Must be used inside a tokio runtime.
    pub fn new(timeout: Duration) -> (Self, mpsc::Receiver<TypingExpired>) {
        let (expired_tx, expired_rx) = mpsc::channel(100);
        (Self {
            timeout,
            entries: HashMap::new(),
            next_generation: 0,
            expired_tx,
        }, expired_rx)
    }

    /// Mark `peer_id` as typing and (re)start its expiry timer
    pub fn notice(&mut self, peer_id: &str) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let expired = TypingExpired {
            peer_id: peer_id.to_string(),
            generation,
        };
        let tx = self.expired_tx.clone();
        let timeout = self.timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            // Receiver gone means the client shut down
            let _ = tx.send(expired).await;
        });

        if let Some(previous) = self.entries.insert(peer_id.to_string(), TypingEntry { generation, timer }) {
            debug!("Resetting typing timer for {}", peer_id);
            previous.timer.abort();
        }
    }

    /// Remove `peer_id` right away. Returns true if it was typing.
    pub fn stop(&mut self, peer_id: &str) -> bool {
        match self.entries.remove(peer_id) {
            Some(entry) => {
                entry.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Apply a timer expiry. Returns true if the peer was removed.
    pub fn expire(&mut self, expired: &TypingExpired) -> bool {
        match self.entries.get(&expired.peer_id) {
            Some(entry) if entry.generation == expired.generation => {
                debug!("Typing notice from {} expired", expired.peer_id);
                self.entries.remove(&expired.peer_id);
                true
            }
            _ => false,
        }
    }

    pub fn is_typing(&self, peer_id: &str) -> bool {
        self.entries.contains_key(peer_id)
    }

    /// Typing peers, sorted for stable display
    pub fn peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.entries.keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Number of live expiry timers (one per typing peer)
    pub fn pending_timers(&self) -> usize {
        self.entries.values().filter(|e| !e.timer.is_finished()).count()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Drop for TypingTracker {
    fn drop(&mut self) {
        for entry in self.entries.values() {
            entry.timer.abort();
        }
    }
}
