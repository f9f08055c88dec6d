//! Cancellable per-session countdown shared by the pre-game and per-question timers.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::state::actor::SessionCommand;

/// Result of feeding a ticker wake-up back into the countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The tick belongs to a superseded run (or arrived while paused) and must be ignored.
    Stale,
    /// The countdown is still running with this many seconds left.
    Running(u32),
    /// The countdown just reached zero; the ticker task has been stopped.
    Elapsed,
}

/// A single mutable countdown owned by a session actor.
///
/// The ticker task never touches session state directly: it only pushes
/// [`SessionCommand::TimerTick`] messages into the room channel, so expiry is
/// processed on the same serialized stream as every client-originated event.
/// Each `start` bumps a generation counter; ticks stamped with an older
/// generation are discarded, which makes cancellation race-free.
#[derive(Debug)]
pub struct Countdown {
    remaining: u32,
    paused: bool,
    alert: bool,
    generation: u64,
    tick_interval: Duration,
    alert_interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl Countdown {
    /// Create an idle countdown with the given tick intervals.
    pub fn new(tick_interval: Duration, alert_interval: Duration) -> Self {
        Self {
            remaining: 0,
            paused: false,
            alert: false,
            generation: 0,
            tick_interval,
            alert_interval,
            task: None,
        }
    }

    /// Seconds left on the clock.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// True while a ticker task is alive and the clock is not paused.
    pub fn is_running(&self) -> bool {
        self.task.is_some() && !self.paused
    }

    /// True once the clock has been frozen by the organizer.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Start a fresh countdown, superseding any previous run.
    pub fn start(&mut self, seconds: u32, tx: mpsc::UnboundedSender<SessionCommand>) {
        self.abort_task();
        self.generation = self.generation.wrapping_add(1);
        self.remaining = seconds;
        self.paused = false;
        self.alert = false;
        if seconds > 0 {
            self.spawn_ticker(tx);
        }
    }

    /// Freeze the clock; the ticker task is torn down so no tick can slip through.
    pub fn pause(&mut self) {
        if self.task.is_none() || self.paused {
            return;
        }
        self.abort_task();
        self.paused = true;
    }

    /// Resume a paused clock from its frozen remaining value.
    pub fn resume(&mut self, tx: mpsc::UnboundedSender<SessionCommand>) {
        if !self.paused || self.remaining == 0 {
            return;
        }
        self.paused = false;
        self.spawn_ticker(tx);
    }

    /// Enter alert mode, rescheduling ticks at the accelerated interval.
    ///
    /// Returns false when alert mode was already active for this run.
    pub fn enter_alert(&mut self, tx: mpsc::UnboundedSender<SessionCommand>) -> bool {
        if self.alert {
            return false;
        }
        self.alert = true;
        if !self.paused && self.task.is_some() {
            self.abort_task();
            self.spawn_ticker(tx);
        }
        true
    }

    /// Cancel the countdown outright. Any tick already in the room channel
    /// carries the old generation and will be reported as [`TickOutcome::Stale`].
    pub fn stop(&mut self) {
        self.abort_task();
        self.generation = self.generation.wrapping_add(1);
        self.remaining = 0;
        self.paused = false;
    }

    /// Process a ticker wake-up delivered through the room channel.
    pub fn on_tick(&mut self, generation: u64) -> TickOutcome {
        if generation != self.generation || self.paused || self.remaining == 0 {
            return TickOutcome::Stale;
        }

        self.remaining -= 1;
        if self.remaining == 0 {
            self.abort_task();
            TickOutcome::Elapsed
        } else {
            TickOutcome::Running(self.remaining)
        }
    }

    fn spawn_ticker(&mut self, tx: mpsc::UnboundedSender<SessionCommand>) {
        let generation = self.generation;
        let interval = if self.alert {
            self.alert_interval
        } else {
            self.tick_interval
        };
        self.task = Some(tokio::spawn(async move {
            loop {
                sleep(interval).await;
                if tx.send(SessionCommand::TimerTick { generation }).is_err() {
                    break;
                }
            }
        }));
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.abort_task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (
        mpsc::UnboundedSender<SessionCommand>,
        mpsc::UnboundedReceiver<SessionCommand>,
    ) {
        mpsc::unbounded_channel()
    }

    async fn next_generation(rx: &mut mpsc::UnboundedReceiver<SessionCommand>) -> u64 {
        match rx.recv().await.expect("ticker stopped unexpectedly") {
            SessionCommand::TimerTick { generation } => generation,
            other => panic!("unexpected command: {other:?}"),
        }
    }

    fn fast() -> Countdown {
        Countdown::new(Duration::from_millis(10), Duration::from_millis(2))
    }

    #[tokio::test(start_paused = true)]
    async fn counts_down_to_elapsed() {
        let (tx, mut rx) = channel();
        let mut countdown = fast();
        countdown.start(2, tx);

        let generation = next_generation(&mut rx).await;
        assert_eq!(countdown.on_tick(generation), TickOutcome::Running(1));

        let generation = next_generation(&mut rx).await;
        assert_eq!(countdown.on_tick(generation), TickOutcome::Elapsed);
        assert!(!countdown.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_supersedes_previous_run() {
        let (tx, mut rx) = channel();
        let mut countdown = fast();
        countdown.start(5, tx.clone());

        let stale_generation = next_generation(&mut rx).await;
        countdown.start(3, tx);

        assert_eq!(countdown.on_tick(stale_generation), TickOutcome::Stale);
        assert_eq!(countdown.remaining(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_freezes_remaining_and_resume_continues() {
        let (tx, mut rx) = channel();
        let mut countdown = fast();
        countdown.start(5, tx.clone());

        let generation = next_generation(&mut rx).await;
        assert_eq!(countdown.on_tick(generation), TickOutcome::Running(4));

        countdown.pause();
        assert!(countdown.is_paused());
        assert_eq!(countdown.remaining(), 4);
        // A tick already queued before the pause must not advance the clock.
        assert_eq!(countdown.on_tick(generation), TickOutcome::Stale);

        countdown.resume(tx);
        let generation = next_generation(&mut rx).await;
        assert_eq!(countdown.on_tick(generation), TickOutcome::Running(3));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_invalidates_inflight_ticks() {
        let (tx, mut rx) = channel();
        let mut countdown = fast();
        countdown.start(5, tx);

        let generation = next_generation(&mut rx).await;
        countdown.stop();
        assert_eq!(countdown.on_tick(generation), TickOutcome::Stale);
        assert_eq!(countdown.remaining(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn alert_mode_enters_once_per_run() {
        let (tx, _rx) = channel();
        let mut countdown = fast();
        countdown.start(5, tx.clone());

        assert!(countdown.enter_alert(tx.clone()));
        assert!(!countdown.enter_alert(tx.clone()));

        countdown.start(5, tx.clone());
        assert!(countdown.enter_alert(tx));
    }
}
