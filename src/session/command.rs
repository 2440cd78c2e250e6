//! Validated admin commands

use crate::bracket::Phase;
use crate::store::StoreError;
use crate::ws::protocol::ClientMsg;

use super::scoreboard::{Player, ScoreAction};

/// A command that has passed validation and may mutate the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartMatch {
        name_a: String,
        name_b: String,
        /// `None` means the configured default phase
        phase: Option<Phase>,
    },
    EndMatch,
    PauseMatch,
    ResumeMatch,
    AdjustTime { seconds: i64 },
    NextRound,
    UpdateScore { player: Player, action: ScoreAction },
    ToggleView,
    DeleteMatch { id: i64 },
}

impl TryFrom<ClientMsg> for Command {
    type Error = CommandError;

    fn try_from(msg: ClientMsg) -> Result<Self, Self::Error> {
        let command = match msg {
            ClientMsg::StartMatch {
                name_a,
                name_b,
                phase,
            } => {
                let name_a = name_a.trim().to_string();
                if name_a.is_empty() {
                    return Err(CommandError::Validation("nameA must not be blank".into()));
                }
                let phase = phase
                    .filter(|p| !p.trim().is_empty())
                    .map(Phase::from);

                Command::StartMatch {
                    name_a,
                    name_b: name_b.trim().to_string(),
                    phase,
                }
            }
            ClientMsg::EndMatch => Command::EndMatch,
            ClientMsg::PauseMatch => Command::PauseMatch,
            ClientMsg::ResumeMatch => Command::ResumeMatch,
            ClientMsg::AdjustTime { seconds } => Command::AdjustTime { seconds },
            ClientMsg::NextRound => Command::NextRound,
            ClientMsg::UpdateScore { player, action } => {
                let player = Player::try_from(player).map_err(|p| {
                    CommandError::Validation(format!("player must be 1 or 2, got {}", p))
                })?;
                Command::UpdateScore { player, action }
            }
            ClientMsg::ToggleView => Command::ToggleView,
            ClientMsg::DeleteMatch { id } => Command::DeleteMatch { id },
        };

        Ok(command)
    }
}

impl Command {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Command::StartMatch { .. } => "start-match",
            Command::EndMatch => "end-match",
            Command::PauseMatch => "pause-match",
            Command::ResumeMatch => "resume-match",
            Command::AdjustTime { .. } => "adjust-time",
            Command::NextRound => "next-round",
            Command::UpdateScore { .. } => "update-score",
            Command::ToggleView => "toggle-view",
            Command::DeleteMatch { .. } => "delete-match",
        }
    }
}

/// Why a command was not (fully) applied. Reported to the sender only.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// Rejected before touching any state
    #[error("Invalid command: {0}")]
    Validation(String),

    /// State was updated and broadcast, but the history write/read failed
    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),

    #[error("Match session is not running")]
    SessionClosed,
}

impl CommandError {
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::Validation(_) => "validation_error",
            CommandError::StoreUnavailable(_) => "store_unavailable",
            CommandError::SessionClosed => "session_closed",
        }
    }
}
