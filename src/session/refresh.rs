//! Background reload of the match history

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use super::publisher::BroadcastPublisher;
use crate::store::MatchHistoryStore;

/// Handle to the task that reloads history and broadcasts it.
///
/// At most one reload waits behind the running one; further requests fold
/// into it. A reload always starts after the request that asked for it, so
/// the last history broadcast reflects every write made before that request.
#[derive(Clone)]
pub struct HistoryRefresher {
    tx: mpsc::Sender<()>,
}

impl HistoryRefresher {
    /// Start the reload task. It ends once every handle is dropped.
    pub fn spawn(store: Arc<dyn MatchHistoryStore>, publisher: BroadcastPublisher) -> Self {
        let (tx, mut rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                match store.find_all_ordered().await {
                    Ok(matches) => {
                        debug!(count = matches.len(), "History reloaded");
                        publisher.publish_history(matches);
                    }
                    Err(e) => warn!(error = %e, "Failed to load match history"),
                }
            }
        });

        Self { tx }
    }

    /// Ask for a history broadcast. Never waits.
    pub fn request(&self) {
        match self.tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Closed(())) => warn!("History reload task has stopped"),
        }
    }
}
