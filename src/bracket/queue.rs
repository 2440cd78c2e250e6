//! Per-phase queues of winners waiting for their next opponent

use std::collections::{BTreeMap, VecDeque};

use tracing::debug;

use super::Phase;

/// Which phase a winner of a given phase advances to
#[derive(Debug, Clone)]
pub struct Progression {
    edges: Vec<(Phase, Phase)>,
}

impl Progression {
    pub fn new(edges: Vec<(Phase, Phase)>) -> Self {
        Self { edges }
    }

    /// Destination phase for winners of `phase`, if any
    pub fn successor(&self, phase: &Phase) -> Option<&Phase> {
        self.edges
            .iter()
            .find(|(from, _)| from == phase)
            .map(|(_, to)| to)
    }

    /// Every phase that receives promoted winners
    pub fn destinations(&self) -> impl Iterator<Item = &Phase> {
        self.edges.iter().map(|(_, to)| to)
    }
}

impl Default for Progression {
    /// preliminar/quartas -> semi -> final. final and terceiro are terminal.
    fn default() -> Self {
        Self::new(vec![
            (Phase::Preliminar, Phase::Semi),
            (Phase::Quartas, Phase::Semi),
            (Phase::Semi, Phase::Final),
        ])
    }
}

/// The bracket queues, keyed by the phase the winners are waiting to play in
#[derive(Debug, Clone)]
pub struct BracketQueues {
    progression: Progression,
    queues: BTreeMap<Phase, VecDeque<String>>,
}

impl BracketQueues {
    pub fn new(progression: Progression) -> Self {
        let queues = progression
            .destinations()
            .map(|phase| (phase.clone(), VecDeque::new()))
            .collect();

        Self {
            progression,
            queues,
        }
    }

    /// Append the winner of a `current` match to its successor's queue.
    /// Returns the phase the winner was queued for, or `None` when
    /// `current` is terminal.
    pub fn promote(&mut self, current: &Phase, winner: &str) -> Option<Phase> {
        let next = self.progression.successor(current)?.clone();

        let queue = self.queues.entry(next.clone()).or_default();
        queue.push_back(winner.to_string());

        debug!(from = %current, to = %next, winner, queue_len = queue.len(), "Winner promoted");
        Some(next)
    }

    /// Drop every entry equal to `name_a` or `name_b` from `phase`'s queue.
    /// Identical duplicate names are all removed. Returns how many entries went.
    pub fn remove(&mut self, phase: &Phase, name_a: &str, name_b: &str) -> usize {
        let Some(queue) = self.queues.get_mut(phase) else {
            return 0;
        };

        let before = queue.len();
        queue.retain(|name| name != name_a && name != name_b);
        let removed = before - queue.len();

        if removed > 0 {
            debug!(phase = %phase, removed, remaining = queue.len(), "Queue entries consumed");
        }
        removed
    }

    /// Read-only copy of all queues for snapshots
    pub fn snapshot(&self) -> BTreeMap<Phase, Vec<String>> {
        self.queues
            .iter()
            .map(|(phase, q)| (phase.clone(), q.iter().cloned().collect()))
            .collect()
    }
}

#[cfg(test)]
impl BracketQueues {
    /// Entries waiting for `phase`, in arrival order
    pub fn waiting(&self, phase: &Phase) -> Vec<String> {
        self.queues
            .get(phase)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }
}

#[cfg(test)]
impl Default for BracketQueues {
    fn default() -> Self {
        Self::new(Progression::default())
    }
}
