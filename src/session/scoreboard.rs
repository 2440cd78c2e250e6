//! Match data and its transition rules

use serde::{Deserialize, Serialize};

use crate::bracket::Phase;
use crate::store::NewMatchRecord;

/// Placeholder an operator types for a missing opponent
pub const BYE_PLACEHOLDER: &str = "-";

/// Where the current match is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Idle,
    Active,
    Ended,
}

/// One of the two competitors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Player {
    A,
    B,
}

impl TryFrom<u8> for Player {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Player::A),
            2 => Ok(Player::B),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreAction {
    Add,
    Remove,
}

/// Two-slot score, never negative
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Scores {
    pub a: u32,
    pub b: u32,
}

impl Scores {
    pub fn apply(&mut self, player: Player, action: ScoreAction) {
        let slot = match player {
            Player::A => &mut self.a,
            Player::B => &mut self.b,
        };
        *slot = match action {
            ScoreAction::Add => slot.saturating_add(1),
            ScoreAction::Remove => slot.saturating_sub(1),
        };
    }
}

/// The live match: who is playing, the score, the round and the phase
#[derive(Debug, Clone)]
pub struct Scoreboard {
    pub name_a: String,
    pub name_b: String,
    pub scores: Scores,
    pub round: u32,
    pub phase: Phase,
    pub status: MatchStatus,
}

impl Scoreboard {
    pub fn new(default_phase: Phase) -> Self {
        Self {
            name_a: String::new(),
            name_b: String::new(),
            scores: Scores::default(),
            round: 1,
            phase: default_phase,
            status: MatchStatus::Idle,
        }
    }

    /// Replace everything with a fresh match
    pub fn start(&mut self, name_a: String, name_b: String, phase: Phase) {
        *self = Self {
            name_a,
            name_b,
            scores: Scores::default(),
            round: 1,
            phase,
            status: MatchStatus::Active,
        };
    }

    pub fn update_score(&mut self, player: Player, action: ScoreAction) {
        self.scores.apply(player, action);
    }

    pub fn next_round(&mut self) {
        self.round = self.round.saturating_add(1);
    }

    /// A match with no real second competitor
    pub fn is_bye(&self) -> bool {
        let name_b = self.name_b.trim();
        name_b.is_empty() || name_b == BYE_PLACEHOLDER
    }

    /// Byes go to A; otherwise the strictly higher score wins and a tie has
    /// no winner.
    pub fn winner(&self) -> Option<&str> {
        if self.is_bye() {
            return Some(self.name_a.as_str());
        }
        match self.scores.a.cmp(&self.scores.b) {
            std::cmp::Ordering::Greater => Some(self.name_a.as_str()),
            std::cmp::Ordering::Less => Some(self.name_b.as_str()),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// Mark the match finished and produce the record to persist
    pub fn finish(&mut self) -> NewMatchRecord {
        self.status = MatchStatus::Ended;
        NewMatchRecord {
            name_a: self.name_a.clone(),
            name_b: self.name_b.clone(),
            score_a: self.scores.a,
            score_b: self.scores.b,
            phase: self.phase.clone(),
        }
    }
}
