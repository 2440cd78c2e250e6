//! Application state shared across routes

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::session::{BroadcastPublisher, Session, SessionHandle, SessionSettings};
use crate::store::{
    MatchHistoryStore, MemoryMatchStore, SupabaseClient, SupabaseError, SupabaseMatchStore,
};

/// What a websocket connection is allowed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionRole {
    /// Receives broadcasts only
    #[default]
    Viewer,
    /// Receives broadcasts and drives the session
    Admin,
}

/// A live websocket connection
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub role: ConnectionRole,
    pub connected_at: DateTime<Utc>,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub session: SessionHandle,
    pub store: Arc<dyn MatchHistoryStore>,
    pub subscribers: Arc<DashMap<Uuid, Subscriber>>,
}

impl AppState {
    /// Build the history store from config and start the session task
    pub fn new(config: Config) -> Result<(Self, JoinHandle<()>), SupabaseError> {
        let store: Arc<dyn MatchHistoryStore> = match &config.supabase {
            Some(supabase) => {
                info!(table = %supabase.matches_table, "Using Supabase match history");
                let client = SupabaseClient::new(&supabase.url, &supabase.service_role_key)?;
                Arc::new(SupabaseMatchStore::new(client, supabase.matches_table.clone()))
            }
            None => {
                warn!("SUPABASE_URL not set, match history is kept in memory only");
                Arc::new(MemoryMatchStore::new())
            }
        };

        let settings = SessionSettings {
            round_seconds: config.round_seconds,
            ..SessionSettings::default()
        };

        Ok(Self::with_store(config, settings, store))
    }

    pub fn with_store(
        config: Config,
        settings: SessionSettings,
        store: Arc<dyn MatchHistoryStore>,
    ) -> (Self, JoinHandle<()>) {
        let session = Session::new(settings, store.clone(), BroadcastPublisher::new());
        let (session, task) = SessionHandle::spawn(session);

        let state = Self {
            config: Arc::new(config),
            session,
            store,
            subscribers: Arc::new(DashMap::new()),
        };
        (state, task)
    }

    pub fn register_subscriber(&self, role: ConnectionRole) -> Uuid {
        let id = Uuid::new_v4();
        self.subscribers.insert(
            id,
            Subscriber {
                role,
                connected_at: Utc::now(),
            },
        );
        id
    }

    pub fn unregister_subscriber(&self, id: &Uuid) -> Option<Subscriber> {
        self.subscribers.remove(id).map(|(_, s)| s)
    }

    /// Connected (viewers, admins)
    pub fn subscriber_counts(&self) -> (usize, usize) {
        self.subscribers
            .iter()
            .fold((0, 0), |(viewers, admins), entry| match entry.role {
                ConnectionRole::Viewer => (viewers + 1, admins),
                ConnectionRole::Admin => (viewers, admins + 1),
            })
    }
}
