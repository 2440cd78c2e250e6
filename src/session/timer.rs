//! Countdown clock with a cancellable one-second tick

use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Period of the countdown tick
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Result of one elapsed tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// One second was taken off the clock
    Decremented,
    /// The clock was already at zero; the tick is cancelled
    Finished,
}

/// Owns the remaining time and the scheduled tick.
///
/// The tick is an `Interval` held by the engine itself, so starting the
/// clock replaces any previous schedule and stopping it simply drops the
/// schedule. Whoever owns the engine is the only one who can poll it, which
/// serializes ticks with every other mutation of the owner.
#[derive(Debug)]
pub struct TimerEngine {
    remaining: u32,
    running: bool,
    paused: bool,
    ticker: Option<Interval>,
}

impl TimerEngine {
    pub fn new(remaining: u32) -> Self {
        Self {
            remaining,
            running: false,
            paused: false,
            ticker: None,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Set the clock to `seconds` and schedule a tick every second,
    /// superseding any tick already scheduled.
    pub fn start(&mut self, seconds: u32) {
        self.stop();
        self.remaining = seconds;
        self.running = true;
        self.paused = false;

        let mut ticker = interval_at(Instant::now() + TICK_PERIOD, TICK_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.ticker = Some(ticker);
    }

    /// Cancel the tick. Idempotent.
    pub fn stop(&mut self) {
        self.ticker = None;
        self.running = false;
    }

    pub fn pause(&mut self) {
        self.stop();
        self.paused = true;
    }

    /// Restart from the current remaining time. Returns false (and changes
    /// nothing) when the clock is at zero or already running.
    pub fn resume(&mut self) -> bool {
        if self.remaining == 0 || self.running {
            return false;
        }
        self.paused = false;
        self.start(self.remaining);
        true
    }

    /// Stop the clock, set it to `seconds` and leave it paused
    pub fn reset_paused(&mut self, seconds: u32) {
        self.remaining = seconds;
        self.stop();
        self.paused = true;
    }

    /// Shift the remaining time, clamped to zero. Running state is untouched.
    pub fn adjust(&mut self, delta: i64) {
        let shifted = i64::from(self.remaining)
            .saturating_add(delta)
            .clamp(0, i64::from(u32::MAX));
        self.remaining = shifted as u32;
    }

    /// Apply one elapsed tick
    pub fn on_tick(&mut self) -> TickOutcome {
        if self.remaining > 0 {
            self.remaining -= 1;
            TickOutcome::Decremented
        } else {
            self.stop();
            TickOutcome::Finished
        }
    }

    /// Wait for the next scheduled tick. Never resolves while stopped.
    /// Cancel safe, so it can sit in a `select!` next to other work.
    pub async fn next_tick(&mut self) {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}
