//! The live match session: scoreboard, clock, bracket queues and the
//! snapshots pushed to displays.
//!
//! A single task owns the whole [`Session`] and handles requests and clock
//! ticks one at a time. Everything else talks to it through a
//! [`SessionHandle`].

pub mod command;
pub mod publisher;
pub mod refresh;
pub mod scoreboard;
pub mod timer;

pub use command::{Command, CommandError};
pub use publisher::{BroadcastPublisher, ViewMode};
pub use scoreboard::{MatchStatus, ScoreAction};

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::bracket::{BracketQueues, Phase, Progression};
use crate::store::{MatchHistoryStore, NewMatchRecord, StoreError};
use crate::ws::protocol::{DisplaySnapshot, ServerMsg};

use self::refresh::HistoryRefresher;
use self::scoreboard::Scoreboard;
use self::timer::{TickOutcome, TimerEngine};

/// Request queue depth for the session task
const REQUEST_BUFFER: usize = 64;

/// Tunables for a session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Clock length for a new match and for every new round
    pub round_seconds: u32,
    /// Phase used when `start-match` names none
    pub default_phase: Phase,
    pub progression: Progression,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            round_seconds: 60,
            default_phase: Phase::default(),
            progression: Progression::default(),
        }
    }
}

/// What a new display gets: the state to render right away and the live
/// feed after it
pub struct Subscription {
    pub snapshot: DisplaySnapshot,
    pub updates: broadcast::Receiver<ServerMsg>,
}

enum SessionRequest {
    Command {
        command: Command,
        reply: oneshot::Sender<Result<(), CommandError>>,
    },
    Subscribe {
        reply: oneshot::Sender<Subscription>,
    },
    Snapshot {
        reply: oneshot::Sender<DisplaySnapshot>,
    },
}

/// The shared tournament-night state
pub struct Session {
    settings: SessionSettings,
    scoreboard: Scoreboard,
    timer: TimerEngine,
    queues: BracketQueues,
    view_mode: ViewMode,
    publisher: BroadcastPublisher,
    history: HistoryRefresher,
    store: Arc<dyn MatchHistoryStore>,
    /// Finished matches the store refused, oldest first
    unsaved: VecDeque<NewMatchRecord>,
}

impl Session {
    /// Must be called inside a tokio runtime: history reloads run on their
    /// own task.
    pub fn new(
        settings: SessionSettings,
        store: Arc<dyn MatchHistoryStore>,
        publisher: BroadcastPublisher,
    ) -> Self {
        Self {
            scoreboard: Scoreboard::new(settings.default_phase.clone()),
            timer: TimerEngine::new(settings.round_seconds),
            queues: BracketQueues::new(settings.progression.clone()),
            view_mode: ViewMode::History,
            settings,
            history: HistoryRefresher::spawn(store.clone(), publisher.clone()),
            publisher,
            store,
            unsaved: VecDeque::new(),
        }
    }

    pub fn snapshot(&self) -> DisplaySnapshot {
        DisplaySnapshot {
            remaining_seconds: self.timer.remaining(),
            name_a: self.scoreboard.name_a.clone(),
            name_b: self.scoreboard.name_b.clone(),
            score_a: self.scoreboard.scores.a,
            score_b: self.scoreboard.scores.b,
            round: self.scoreboard.round,
            phase: self.scoreboard.phase.clone(),
            status: self.scoreboard.status,
            running: self.timer.is_running(),
            paused: self.timer.is_paused(),
            view_mode: self.view_mode,
            queues: self.queues.snapshot(),
        }
    }

    /// Apply one command. Validation failures leave the state untouched;
    /// store failures happen after the state change has been broadcast.
    /// Only the writes of `end-match` and `delete-match` are awaited here;
    /// history reads happen off this task.
    pub async fn handle(&mut self, command: Command) -> Result<(), CommandError> {
        debug!(command = command.name(), "Handling command");

        match command {
            Command::StartMatch {
                name_a,
                name_b,
                phase,
            } => self.start_match(name_a, name_b, phase),
            Command::EndMatch => return self.end_match().await,
            Command::PauseMatch => {
                self.timer.pause();
                self.publish_state();
            }
            Command::ResumeMatch => {
                if self.timer.resume() {
                    self.publish_state();
                } else {
                    debug!(remaining = self.timer.remaining(), "Resume ignored");
                }
            }
            Command::AdjustTime { seconds } => {
                self.timer.adjust(seconds);
                self.publish_state();
            }
            Command::NextRound => {
                self.scoreboard.next_round();
                self.timer.reset_paused(self.settings.round_seconds);
                info!(round = self.scoreboard.round, "Next round, clock paused");
                self.publish_state();
            }
            Command::UpdateScore { player, action } => {
                self.scoreboard.update_score(player, action);
                self.publish_state();
            }
            Command::ToggleView => {
                self.view_mode = self.view_mode.toggled();
                self.publish_state();
                if self.view_mode == ViewMode::History {
                    self.history.request();
                }
            }
            Command::DeleteMatch { id } => {
                self.save_unsaved().await?;
                if !self.store.delete(id).await? {
                    debug!(id, "Delete of unknown match ignored");
                }
                self.history.request();
            }
        }

        Ok(())
    }

    fn start_match(&mut self, name_a: String, name_b: String, phase: Option<Phase>) {
        let phase = phase.unwrap_or_else(|| self.settings.default_phase.clone());

        self.queues.remove(&phase, &name_a, &name_b);
        info!(name_a = %name_a, name_b = %name_b, phase = %phase, "Match started");

        self.scoreboard.start(name_a, name_b, phase);
        self.view_mode = ViewMode::Match;
        self.timer.start(self.settings.round_seconds);
        self.publish_state();
    }

    async fn end_match(&mut self) -> Result<(), CommandError> {
        if self.scoreboard.status != MatchStatus::Active {
            return Err(CommandError::Validation("no match in progress".into()));
        }

        self.timer.stop();

        let winner = self.scoreboard.winner().map(str::to_string);
        let promoted_to = winner
            .as_deref()
            .and_then(|w| self.queues.promote(&self.scoreboard.phase, w));

        let record = self.scoreboard.finish();
        info!(
            phase = %record.phase,
            winner = winner.as_deref().unwrap_or("none"),
            promoted_to = promoted_to.as_ref().map(Phase::as_str).unwrap_or("none"),
            score_a = record.score_a,
            score_b = record.score_b,
            "Match ended"
        );

        self.view_mode = ViewMode::History;
        self.publish_state();

        self.unsaved.push_back(record);
        if let Err(e) = self.save_unsaved().await {
            warn!(
                error = %e,
                unsaved = ?self.unsaved,
                "Failed to persist finished match, retrying on next write"
            );
            return Err(e.into());
        }

        self.history.request();
        Ok(())
    }

    /// Write every finished match the store has not accepted yet, oldest
    /// first. Stops at the first failure.
    async fn save_unsaved(&mut self) -> Result<(), StoreError> {
        while let Some(record) = self.unsaved.front() {
            let persisted = self.store.create(record.clone()).await?;
            debug!(id = persisted.id, "Match persisted");
            self.unsaved.pop_front();
        }
        Ok(())
    }

    /// Advance the clock by one elapsed second
    pub fn on_tick(&mut self) {
        match self.timer.on_tick() {
            TickOutcome::Decremented => trace!(remaining = self.timer.remaining(), "Tick"),
            TickOutcome::Finished => {
                info!("Timer finished");
                self.publisher.timer_finished();
            }
        }
        self.publish_state();
    }

    /// Hand a new display the current state plus the live feed. The
    /// receiver is created before the snapshot is taken so nothing
    /// published afterwards can be missed.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            updates: self.publisher.subscribe(),
            snapshot: self.snapshot(),
        }
    }

    fn publish_state(&self) {
        self.publisher.publish_state(self.snapshot());
    }

    async fn handle_request(&mut self, request: SessionRequest) {
        match request {
            SessionRequest::Command { command, reply } => {
                let result = self.handle(command).await;
                let _ = reply.send(result);
            }
            SessionRequest::Subscribe { reply } => {
                let subscription = self.subscribe();
                let _ = reply.send(subscription);
            }
            SessionRequest::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    /// Serve requests and clock ticks until every handle is dropped
    async fn run(mut self, mut requests: mpsc::Receiver<SessionRequest>) {
        info!(round_seconds = self.settings.round_seconds, "Match session running");

        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request).await,
                    None => break,
                },
                _ = self.timer.next_tick() => self.on_tick(),
            }
        }

        info!("Match session stopped");
    }
}

/// Cloneable handle to the session task
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionRequest>,
}

impl SessionHandle {
    /// Move `session` onto its own task
    pub fn spawn(session: Session) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(REQUEST_BUFFER);
        let task = tokio::spawn(session.run(rx));
        (Self { tx }, task)
    }

    pub async fn dispatch(&self, command: Command) -> Result<(), CommandError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionRequest::Command { command, reply })
            .await
            .map_err(|_| CommandError::SessionClosed)?;
        rx.await.map_err(|_| CommandError::SessionClosed)?
    }

    pub async fn subscribe(&self) -> Result<Subscription, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionRequest::Subscribe { reply })
            .await
            .map_err(|_| CommandError::SessionClosed)?;
        rx.await.map_err(|_| CommandError::SessionClosed)
    }

    pub async fn snapshot(&self) -> Result<DisplaySnapshot, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionRequest::Snapshot { reply })
            .await
            .map_err(|_| CommandError::SessionClosed)?;
        rx.await.map_err(|_| CommandError::SessionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio_test::assert_ok;

    use crate::session::scoreboard::Player;
    use crate::store::{MemoryMatchStore, PersistedMatch};
    use crate::ws::protocol::HistoryEntry;

    fn session_with(
        store: Arc<dyn MatchHistoryStore>,
        round_seconds: u32,
    ) -> (Session, broadcast::Receiver<ServerMsg>) {
        let publisher = BroadcastPublisher::new();
        let rx = publisher.subscribe();
        let settings = SessionSettings {
            round_seconds,
            ..SessionSettings::default()
        };
        (Session::new(settings, store, publisher), rx)
    }

    fn start(name_a: &str, name_b: &str, phase: &str) -> Command {
        Command::StartMatch {
            name_a: name_a.to_string(),
            name_b: name_b.to_string(),
            phase: Some(Phase::from(phase)),
        }
    }

    fn score(player: Player, action: ScoreAction) -> Command {
        Command::UpdateScore { player, action }
    }

    fn drain(rx: &mut broadcast::Receiver<ServerMsg>) -> Vec<ServerMsg> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    /// Wait for a history broadcast that satisfies `accept`
    async fn history_where(
        rx: &mut broadcast::Receiver<ServerMsg>,
        accept: impl Fn(&[HistoryEntry]) -> bool,
    ) -> Vec<HistoryEntry> {
        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(ServerMsg::UpdateHistory { matches }) if accept(&matches) => {
                        return matches
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => panic!("publisher closed"),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(30), wait)
            .await
            .expect("no matching history broadcast")
    }

    /// Store whose every call fails
    struct DownStore;

    #[async_trait]
    impl MatchHistoryStore for DownStore {
        async fn create(&self, _record: NewMatchRecord) -> Result<PersistedMatch, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn delete(&self, _id: i64) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn find_all_ordered(&self) -> Result<Vec<PersistedMatch>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    /// Memory store whose first `failures` writes are refused
    struct FlakyStore {
        inner: MemoryMatchStore,
        failures: AtomicUsize,
    }

    impl FlakyStore {
        fn new(failures: usize) -> Self {
            Self {
                inner: MemoryMatchStore::new(),
                failures: AtomicUsize::new(failures),
            }
        }
    }

    #[async_trait]
    impl MatchHistoryStore for FlakyStore {
        async fn create(&self, record: NewMatchRecord) -> Result<PersistedMatch, StoreError> {
            let refuse = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if refuse {
                return Err(StoreError::Unavailable("timeout".into()));
            }
            self.inner.create(record).await
        }

        async fn delete(&self, id: i64) -> Result<bool, StoreError> {
            self.inner.delete(id).await
        }

        async fn find_all_ordered(&self) -> Result<Vec<PersistedMatch>, StoreError> {
            self.inner.find_all_ordered().await
        }
    }

    /// Memory store that takes three seconds to answer every read
    #[derive(Default)]
    struct SlowStore {
        inner: MemoryMatchStore,
    }

    #[async_trait]
    impl MatchHistoryStore for SlowStore {
        async fn create(&self, record: NewMatchRecord) -> Result<PersistedMatch, StoreError> {
            self.inner.create(record).await
        }

        async fn delete(&self, id: i64) -> Result<bool, StoreError> {
            self.inner.delete(id).await
        }

        async fn find_all_ordered(&self) -> Result<Vec<PersistedMatch>, StoreError> {
            tokio::time::sleep(Duration::from_secs(3)).await;
            self.inner.find_all_ordered().await
        }
    }

    #[tokio::test]
    async fn start_match_resets_scoreboard_and_runs_clock() {
        let store = Arc::new(MemoryMatchStore::new());
        let (mut session, mut rx) = session_with(store, 60);

        session.handle(start("Ana", "Bia", "quartas")).await.unwrap();
        session.handle(score(Player::A, ScoreAction::Add)).await.unwrap();
        session.handle(Command::NextRound).await.unwrap();
        session.handle(Command::AdjustTime { seconds: -15 }).await.unwrap();

        session.handle(start("Caio", "Duda", "semi")).await.unwrap();
        let snap = session.snapshot();

        assert_eq!((snap.score_a, snap.score_b, snap.round), (0, 0, 1));
        assert_eq!(snap.remaining_seconds, 60);
        assert_eq!(snap.phase, Phase::Semi);
        assert_eq!(snap.view_mode, ViewMode::Match);
        assert_eq!(snap.status, MatchStatus::Active);
        assert!(snap.running && !snap.paused);

        let msgs = drain(&mut rx);
        assert_eq!(msgs.len(), 5);
        assert!(msgs.iter().all(|m| matches!(m, ServerMsg::UpdateDisplay(_))));
    }

    #[tokio::test]
    async fn start_match_without_phase_uses_default() {
        let store = Arc::new(MemoryMatchStore::new());
        let (mut session, _rx) = session_with(store, 60);

        session
            .handle(Command::StartMatch {
                name_a: "Ana".into(),
                name_b: "Bia".into(),
                phase: None,
            })
            .await
            .unwrap();

        assert_eq!(session.snapshot().phase, Phase::Preliminar);
    }

    #[tokio::test]
    async fn scores_stay_non_negative() {
        let store = Arc::new(MemoryMatchStore::new());
        let (mut session, _rx) = session_with(store, 60);
        session.handle(start("Ana", "Bia", "quartas")).await.unwrap();

        for cmd in [
            score(Player::A, ScoreAction::Remove),
            score(Player::B, ScoreAction::Add),
            score(Player::B, ScoreAction::Remove),
            score(Player::B, ScoreAction::Remove),
            score(Player::A, ScoreAction::Add),
        ] {
            session.handle(cmd).await.unwrap();
        }

        let snap = session.snapshot();
        assert_eq!((snap.score_a, snap.score_b), (1, 0));
    }

    #[tokio::test]
    async fn next_round_stops_clock_and_waits_for_resume() {
        let store = Arc::new(MemoryMatchStore::new());
        let (mut session, _rx) = session_with(store, 60);
        session.handle(start("Ana", "Bia", "quartas")).await.unwrap();
        session.handle(Command::AdjustTime { seconds: -40 }).await.unwrap();

        session.handle(Command::NextRound).await.unwrap();
        let snap = session.snapshot();
        assert_eq!(snap.round, 2);
        assert_eq!(snap.remaining_seconds, 60);
        assert!(!snap.running && snap.paused);

        session.handle(Command::ResumeMatch).await.unwrap();
        let snap = session.snapshot();
        assert!(snap.running && !snap.paused);
        assert_eq!(snap.remaining_seconds, 60);
    }

    #[tokio::test]
    async fn resume_at_zero_is_ignored_without_broadcast() {
        let store = Arc::new(MemoryMatchStore::new());
        let (mut session, mut rx) = session_with(store, 60);
        session.handle(start("Ana", "Bia", "quartas")).await.unwrap();
        session.handle(Command::PauseMatch).await.unwrap();
        session.handle(Command::AdjustTime { seconds: -100 }).await.unwrap();
        drain(&mut rx);

        session.handle(Command::ResumeMatch).await.unwrap();

        assert!(drain(&mut rx).is_empty());
        let snap = session.snapshot();
        assert!(!snap.running && snap.paused);
        assert_eq!(snap.remaining_seconds, 0);
    }

    #[tokio::test]
    async fn bye_in_quartas_promotes_first_name_to_semi() {
        let store = Arc::new(MemoryMatchStore::new());
        let (mut session, mut rx) = session_with(store.clone(), 60);

        session.handle(start("Ana", "-", "quartas")).await.unwrap();
        session.handle(Command::EndMatch).await.unwrap();

        let snap = session.snapshot();
        assert_eq!(snap.queues[&Phase::Semi], vec!["Ana"]);
        assert_eq!(snap.view_mode, ViewMode::History);
        assert_eq!(snap.status, MatchStatus::Ended);
        assert!(!snap.running);

        let records = store.find_all_ordered().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].phase, Phase::Quartas);
        assert_eq!(records[0].name_b, "-");

        let history = history_where(&mut rx, |h| !h.is_empty()).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].name_a, "Ana");
    }

    #[tokio::test]
    async fn empty_second_name_is_also_a_bye() {
        let store = Arc::new(MemoryMatchStore::new());
        let (mut session, _rx) = session_with(store, 60);

        session.handle(start("Ana", "", "semi")).await.unwrap();
        session.handle(score(Player::B, ScoreAction::Add)).await.unwrap();
        session.handle(Command::EndMatch).await.unwrap();

        assert_eq!(session.snapshot().queues[&Phase::Final], vec!["Ana"]);
    }

    #[tokio::test]
    async fn tie_records_history_but_promotes_nobody() {
        let store = Arc::new(MemoryMatchStore::new());
        let (mut session, _rx) = session_with(store.clone(), 60);

        session.handle(start("Ana", "Bia", "preliminar")).await.unwrap();
        session.handle(score(Player::A, ScoreAction::Add)).await.unwrap();
        session.handle(score(Player::B, ScoreAction::Add)).await.unwrap();
        session.handle(Command::EndMatch).await.unwrap();

        let snap = session.snapshot();
        assert!(snap.queues.values().all(Vec::is_empty));

        let records = store.find_all_ordered().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!((records[0].score_a, records[0].score_b), (1, 1));
    }

    #[tokio::test]
    async fn winners_flow_from_early_phases_to_semi_then_final() {
        let store = Arc::new(MemoryMatchStore::new());
        let (mut session, _rx) = session_with(store, 60);

        session.handle(start("Ana", "Bia", "preliminar")).await.unwrap();
        session.handle(score(Player::B, ScoreAction::Add)).await.unwrap();
        session.handle(Command::EndMatch).await.unwrap();

        session.handle(start("Caio", "Duda", "quartas")).await.unwrap();
        session.handle(score(Player::A, ScoreAction::Add)).await.unwrap();
        session.handle(Command::EndMatch).await.unwrap();

        assert_eq!(session.snapshot().queues[&Phase::Semi], vec!["Bia", "Caio"]);

        session.handle(start("Bia", "Caio", "semi")).await.unwrap();
        let snap = session.snapshot();
        assert!(snap.queues[&Phase::Semi].is_empty());

        session.handle(score(Player::A, ScoreAction::Add)).await.unwrap();
        session.handle(Command::EndMatch).await.unwrap();
        assert_eq!(session.snapshot().queues[&Phase::Final], vec!["Bia"]);

        session.handle(start("Bia", "Eva", "final")).await.unwrap();
        session.handle(score(Player::A, ScoreAction::Add)).await.unwrap();
        session.handle(Command::EndMatch).await.unwrap();
        assert!(session.snapshot().queues.values().all(Vec::is_empty));
    }

    #[tokio::test]
    async fn starting_semi_removes_only_its_competitors() {
        let store = Arc::new(MemoryMatchStore::new());
        let (mut session, _rx) = session_with(store, 60);

        for name in ["Ana", "Bia", "Caio", "Duda"] {
            session.handle(start(name, "-", "quartas")).await.unwrap();
            session.handle(Command::EndMatch).await.unwrap();
        }

        session.handle(start("Bia", "Duda", "semi")).await.unwrap();

        assert_eq!(session.snapshot().queues[&Phase::Semi], vec!["Ana", "Caio"]);
    }

    #[tokio::test]
    async fn end_match_without_active_match_is_rejected() {
        let store = Arc::new(MemoryMatchStore::new());
        let (mut session, mut rx) = session_with(store.clone(), 60);

        let err = session.handle(Command::EndMatch).await.unwrap_err();
        assert_eq!(err.code(), "validation_error");

        session.handle(start("Ana", "Bia", "semi")).await.unwrap();
        session.handle(Command::EndMatch).await.unwrap();
        history_where(&mut rx, |h| h.len() == 1).await;
        drain(&mut rx);

        assert!(session.handle(Command::EndMatch).await.is_err());
        assert!(drain(&mut rx).is_empty());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn history_is_ordered_oldest_first() {
        let store = Arc::new(MemoryMatchStore::new());
        let (mut session, mut rx) = session_with(store, 60);

        for (a, b) in [("Ana", "Bia"), ("Caio", "Duda"), ("Eva", "Fabi")] {
            session.handle(start(a, b, "preliminar")).await.unwrap();
            session.handle(score(Player::A, ScoreAction::Add)).await.unwrap();
            session.handle(Command::EndMatch).await.unwrap();
        }

        let history = history_where(&mut rx, |h| h.len() == 3).await;
        let names: Vec<&str> = history.iter().map(|h| h.name_a.as_str()).collect();
        assert_eq!(names, vec!["Ana", "Caio", "Eva"]);
        assert!(history
            .windows(2)
            .all(|w| (w[0].created_at, w[0].id) < (w[1].created_at, w[1].id)));
    }

    #[tokio::test]
    async fn toggle_view_sends_history_only_when_entering_history() {
        let store = Arc::new(MemoryMatchStore::new());
        let (mut session, mut rx) = session_with(store, 60);

        session.handle(Command::ToggleView).await.unwrap();
        let msgs = drain(&mut rx);
        assert_eq!(session.snapshot().view_mode, ViewMode::Match);
        assert_eq!(msgs.len(), 1);

        session.handle(Command::ToggleView).await.unwrap();
        assert_eq!(session.snapshot().view_mode, ViewMode::History);
        assert!(matches!(rx.recv().await.unwrap(), ServerMsg::UpdateDisplay(_)));
        assert!(history_where(&mut rx, |_| true).await.is_empty());
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_refreshes_history() {
        let store = Arc::new(MemoryMatchStore::new());
        let (mut session, mut rx) = session_with(store.clone(), 60);
        session.handle(start("Ana", "-", "quartas")).await.unwrap();
        session.handle(Command::EndMatch).await.unwrap();
        let id = history_where(&mut rx, |h| h.len() == 1).await[0].id;

        assert_ok!(session.handle(Command::DeleteMatch { id }).await);
        assert_ok!(session.handle(Command::DeleteMatch { id }).await);

        history_where(&mut rx, |h| h.is_empty()).await;
        assert_eq!(store.len().await, 0);
        // Deleting history leaves the bracket alone
        assert_eq!(session.snapshot().queues[&Phase::Semi], vec!["Ana"]);
    }

    #[tokio::test]
    async fn store_outage_still_broadcasts_state() {
        let (mut session, mut rx) = session_with(Arc::new(DownStore), 60);

        session.handle(start("Ana", "Bia", "semi")).await.unwrap();
        session.handle(score(Player::B, ScoreAction::Add)).await.unwrap();
        drain(&mut rx);

        let err = session.handle(Command::EndMatch).await.unwrap_err();
        assert_eq!(err.code(), "store_unavailable");

        let msgs = drain(&mut rx);
        assert_eq!(msgs.len(), 1);
        match &msgs[0] {
            ServerMsg::UpdateDisplay(snap) => {
                assert_eq!(snap.view_mode, ViewMode::History);
                assert_eq!(snap.queues[&Phase::Final], vec!["Bia"]);
            }
            other => panic!("unexpected message: {:?}", other),
        }

        let err = session.handle(Command::DeleteMatch { id: 1 }).await.unwrap_err();
        assert!(matches!(err, CommandError::StoreUnavailable(_)));

        // Toggling never reads on the caller's behalf
        assert_ok!(session.handle(Command::ToggleView).await);
        assert_ok!(session.handle(Command::ToggleView).await);
    }

    #[tokio::test]
    async fn refused_record_is_written_on_next_end_match() {
        let store = Arc::new(FlakyStore::new(1));
        let (mut session, mut rx) = session_with(store.clone(), 60);

        session.handle(start("Ana", "Bia", "semi")).await.unwrap();
        session.handle(score(Player::A, ScoreAction::Add)).await.unwrap();
        let err = session.handle(Command::EndMatch).await.unwrap_err();
        assert_eq!(err.code(), "store_unavailable");
        assert_eq!(store.inner.len().await, 0);

        session.handle(start("Caio", "Duda", "semi")).await.unwrap();
        session.handle(score(Player::B, ScoreAction::Add)).await.unwrap();
        session.handle(Command::EndMatch).await.unwrap();

        let history = history_where(&mut rx, |h| h.len() == 2).await;
        let names: Vec<&str> = history.iter().map(|h| h.name_a.as_str()).collect();
        assert_eq!(names, vec!["Ana", "Caio"]);
        assert_eq!(session.snapshot().queues[&Phase::Final], vec!["Ana", "Duda"]);
    }

    #[tokio::test]
    async fn refused_record_is_written_before_a_delete() {
        let store = Arc::new(FlakyStore::new(1));
        let (mut session, _rx) = session_with(store.clone(), 60);

        session.handle(start("Ana", "-", "quartas")).await.unwrap();
        assert!(session.handle(Command::EndMatch).await.is_err());

        assert_ok!(session.handle(Command::DeleteMatch { id: 99 }).await);
        assert_eq!(store.inner.len().await, 1);
    }

    #[tokio::test]
    async fn subscriber_gets_current_state_then_live_updates() {
        let (mut session, _rx) = session_with(Arc::new(DownStore), 60);

        let mut sub = session.subscribe();
        assert_eq!(sub.snapshot.view_mode, ViewMode::History);
        assert_eq!(sub.snapshot.status, MatchStatus::Idle);

        session.handle(start("Ana", "Bia", "semi")).await.unwrap();
        match sub.updates.try_recv().unwrap() {
            ServerMsg::UpdateDisplay(snap) => assert_eq!(snap.name_a, "Ana"),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_history_reads_never_hold_up_the_clock() {
        let (session, _rx) = session_with(Arc::new(SlowStore::default()), 60);
        let (handle, _task) = SessionHandle::spawn(session);

        handle.dispatch(start("Ana", "Bia", "quartas")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        handle.dispatch(Command::ToggleView).await.unwrap();
        handle.dispatch(Command::ToggleView).await.unwrap();
        handle.dispatch(Command::ToggleView).await.unwrap();
        let _viewer = handle.subscribe().await.unwrap();
        handle.dispatch(Command::DeleteMatch { id: 1 }).await.unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(handle.snapshot().await.unwrap().remaining_seconds, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn clock_runs_down_to_a_single_timer_finished() {
        let store = Arc::new(MemoryMatchStore::new());
        let (session, _rx) = session_with(store, 3);
        let (handle, _task) = SessionHandle::spawn(session);
        let mut sub = handle.subscribe().await.unwrap();

        handle.dispatch(start("Ana", "Bia", "preliminar")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        let msgs = drain(&mut sub.updates);
        let finished = msgs
            .iter()
            .filter(|m| matches!(m, ServerMsg::TimerFinished))
            .count();
        assert_eq!(finished, 1);

        let remaining: Vec<u32> = msgs
            .iter()
            .filter_map(|m| match m {
                ServerMsg::UpdateDisplay(s) => Some(s.remaining_seconds),
                _ => None,
            })
            .collect();
        assert_eq!(remaining, vec![3, 2, 1, 0, 0]);

        let snap = handle.snapshot().await.unwrap();
        assert!(!snap.running);
        assert_eq!(snap.remaining_seconds, 0);
        assert_eq!(snap.status, MatchStatus::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_never_double_decrements() {
        let store = Arc::new(MemoryMatchStore::new());
        let (session, _rx) = session_with(store, 60);
        let (handle, _task) = SessionHandle::spawn(session);

        handle.dispatch(start("Ana", "Bia", "quartas")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(handle.snapshot().await.unwrap().remaining_seconds, 59);

        handle.dispatch(Command::PauseMatch).await.unwrap();
        handle.dispatch(Command::ResumeMatch).await.unwrap();
        handle.dispatch(Command::ResumeMatch).await.unwrap();
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(handle.snapshot().await.unwrap().remaining_seconds, 59);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(handle.snapshot().await.unwrap().remaining_seconds, 58);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.snapshot().await.unwrap().remaining_seconds, 53);
    }

    #[tokio::test]
    async fn handle_reports_closed_session() {
        let store = Arc::new(MemoryMatchStore::new());
        let (session, _rx) = session_with(store, 60);
        let (handle, task) = SessionHandle::spawn(session);
        task.abort();
        let _ = task.await;

        let err = handle.dispatch(Command::PauseMatch).await.unwrap_err();
        assert!(matches!(err, CommandError::SessionClosed));
    }
}
