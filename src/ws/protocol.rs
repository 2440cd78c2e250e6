//! WebSocket protocol message definitions
//! These are the wire types for controller/display communication

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bracket::Phase;
use crate::session::{MatchStatus, ScoreAction, ViewMode};
use crate::store::PersistedMatch;

/// Commands sent by the admin controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMsg {
    /// Reset the scoreboard and start the clock for a new pairing
    #[serde(rename_all = "camelCase")]
    StartMatch {
        name_a: String,
        /// Empty or "-" for a bye
        #[serde(default)]
        name_b: String,
        /// Falls back to the default phase when absent or blank
        #[serde(default)]
        phase: Option<String>,
    },

    /// Finalize, persist and promote the winner
    EndMatch,

    PauseMatch,

    ResumeMatch,

    /// Shift the remaining time; negative values subtract
    AdjustTime { seconds: i64 },

    NextRound,

    UpdateScore {
        /// 1 or 2
        player: u8,
        action: ScoreAction,
    },

    ToggleView,

    /// Remove a persisted match from the history
    DeleteMatch { id: i64 },
}

/// Messages sent from server to connected displays
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMsg {
    /// Full live state
    UpdateDisplay(DisplaySnapshot),

    /// Full ordered history
    UpdateHistory { matches: Vec<HistoryEntry> },

    /// The clock reached zero
    TimerFinished,

    /// Command rejected; only sent to the connection that issued it
    Error { code: String, message: String },
}

/// Everything a display needs to render the live screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplaySnapshot {
    pub remaining_seconds: u32,
    pub name_a: String,
    pub name_b: String,
    pub score_a: u32,
    pub score_b: u32,
    pub round: u32,
    pub phase: Phase,
    pub status: MatchStatus,
    pub running: bool,
    pub paused: bool,
    pub view_mode: ViewMode,
    /// Winners waiting in each destination phase, in arrival order
    pub queues: BTreeMap<Phase, Vec<String>>,
}

/// One finished match in the history screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: i64,
    pub name_a: String,
    pub name_b: String,
    pub score_a: u32,
    pub score_b: u32,
    pub phase: Phase,
    pub created_at: DateTime<Utc>,
}

impl From<PersistedMatch> for HistoryEntry {
    fn from(m: PersistedMatch) -> Self {
        Self {
            id: m.id,
            name_a: m.name_a,
            name_b: m.name_b,
            score_a: m.score_a,
            score_b: m.score_b,
            phase: m.phase,
            created_at: m.created_at,
        }
    }
}
