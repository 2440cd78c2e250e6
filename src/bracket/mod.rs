//! Bracket progression between phases

pub mod phase;
pub mod queue;

pub use phase::Phase;
pub use queue::{BracketQueues, Progression};
