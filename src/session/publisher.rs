//! Fan-out of state and history snapshots to every connected display

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::store::PersistedMatch;
use crate::ws::protocol::{DisplaySnapshot, HistoryEntry, ServerMsg};

/// Broadcast buffer per subscriber. A display further behind than this
/// skips ahead instead of holding up the others.
pub const BROADCAST_CAPACITY: usize = 64;

/// Which screen displays should render
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViewMode {
    Match,
    History,
}

impl ViewMode {
    pub fn toggled(self) -> Self {
        match self {
            ViewMode::Match => ViewMode::History,
            ViewMode::History => ViewMode::Match,
        }
    }
}

/// Fire-and-forget publisher over a tokio broadcast channel
#[derive(Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<ServerMsg>,
}

impl BroadcastPublisher {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerMsg> {
        self.tx.subscribe()
    }

    pub fn publish_state(&self, snapshot: DisplaySnapshot) {
        self.send(ServerMsg::UpdateDisplay(snapshot));
    }

    pub fn publish_history(&self, matches: Vec<PersistedMatch>) {
        self.send(ServerMsg::UpdateHistory {
            matches: history_entries(matches),
        });
    }

    pub fn timer_finished(&self) {
        self.send(ServerMsg::TimerFinished);
    }

    fn send(&self, msg: ServerMsg) {
        // No receivers is fine: nobody is watching yet.
        if let Err(broadcast::error::SendError(msg)) = self.tx.send(msg) {
            trace!(?msg, "No subscribers for broadcast");
        }
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new()
    }
}

pub fn history_entries(matches: Vec<PersistedMatch>) -> Vec<HistoryEntry> {
    matches.into_iter().map(HistoryEntry::from).collect()
}
