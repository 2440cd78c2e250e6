//! Bracket phase identifiers

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stage of a single-elimination bracket.
///
/// The well-known stages get their own variants; anything else a tournament
/// director types in is kept verbatim in `Other` so new stages need no code
/// change.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Phase {
    Preliminar,
    Quartas,
    Semi,
    Final,
    Terceiro,
    Other(String),
}

impl Phase {
    pub fn as_str(&self) -> &str {
        match self {
            Phase::Preliminar => "preliminar",
            Phase::Quartas => "quartas",
            Phase::Semi => "semi",
            Phase::Final => "final",
            Phase::Terceiro => "terceiro",
            Phase::Other(name) => name,
        }
    }
}

impl Default for Phase {
    fn default() -> Self {
        Self::Preliminar
    }
}

impl From<&str> for Phase {
    fn from(value: &str) -> Self {
        match value.trim() {
            "preliminar" => Phase::Preliminar,
            "quartas" => Phase::Quartas,
            "semi" => Phase::Semi,
            "final" => Phase::Final,
            "terceiro" => Phase::Terceiro,
            other => Phase::Other(other.to_string()),
        }
    }
}

impl From<String> for Phase {
    fn from(value: String) -> Self {
        Phase::from(value.as_str())
    }
}

impl From<Phase> for String {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
