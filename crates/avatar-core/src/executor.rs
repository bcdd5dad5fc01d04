//! Cooldown and sliding-window action executor.
//!
//! Turns an ordered list of discrete actions into `ACTION` commands. Each
//! action is followed by a fixed cooldown, and no more than
//! `max_per_sec` actions are admitted in any trailing one-second window.
//! When the window is saturated the executor waits; it never drops.

use std::collections::VecDeque;
use std::time::Duration;

use avatar_types::OutboundCommand;
use tokio::time::Instant;
use tracing::debug;

use crate::actuation::CommandSink;
use crate::config::RateLimitConfig;

const WINDOW: Duration = Duration::from_secs(1);

/// Timestamps of recently admitted actions, pruned to the last second.
#[derive(Debug, Clone)]
pub struct RateWindow {
    stamps: VecDeque<Instant>,
    max_per_window: usize,
}

impl RateWindow {
    /// Allow at most `max_per_window` actions per trailing second (minimum 1).
    pub fn new(max_per_window: usize) -> Self {
        let max_per_window = max_per_window.max(1);
        Self {
            stamps: VecDeque::with_capacity(max_per_window),
            max_per_window,
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.stamps.front() {
            if now.saturating_duration_since(*oldest) >= WINDOW {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// How long until another action may be admitted at `now`. Zero when
    /// there is capacity.
    pub fn wait_time(&mut self, now: Instant) -> Duration {
        self.prune(now);
        if self.stamps.len() < self.max_per_window {
            return Duration::ZERO;
        }
        self.stamps
            .front()
            .map_or(Duration::ZERO, |oldest| {
                WINDOW.saturating_sub(now.saturating_duration_since(*oldest))
            })
    }

    /// Record an admitted action.
    pub fn record(&mut self, now: Instant) {
        self.stamps.push_back(now);
    }

    /// Actions admitted within the trailing second at `now`.
    pub fn in_window(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.stamps.len()
    }

    /// Forget all recorded actions.
    pub fn reset(&mut self) {
        self.stamps.clear();
    }
}

/// Spaces and caps discrete actions before handing them to a sink.
#[derive(Debug)]
pub struct ActionExecutor<S> {
    sink: S,
    window: RateWindow,
    cooldown: Duration,
}

impl<S: CommandSink> ActionExecutor<S> {
    /// Create an executor writing into `sink`.
    pub fn new(sink: S, cooldown: Duration, max_per_sec: usize) -> Self {
        Self {
            sink,
            window: RateWindow::new(max_per_sec),
            cooldown,
        }
    }

    /// Create an executor from the rate-limit configuration.
    pub fn from_config(sink: S, config: &RateLimitConfig) -> Self {
        let max = usize::try_from(config.actions_per_sec).unwrap_or(usize::MAX);
        Self::new(sink, config.action_cooldown(), max)
    }

    /// The sink actions are written into.
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    /// Submit every action in order, waiting for rate capacity as needed.
    pub async fn execute_actions(&mut self, actions: &[String]) {
        for action in actions {
            self.execute(action).await;
        }
    }

    /// Submit a single action, waiting for rate capacity as needed.
    pub async fn execute(&mut self, action: &str) {
        loop {
            let wait = self.window.wait_time(Instant::now());
            if wait.is_zero() {
                break;
            }
            debug!(
                action = action,
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                "action rate window saturated"
            );
            tokio::time::sleep(wait).await;
        }

        self.window.record(Instant::now());
        self.sink.submit(OutboundCommand::action(action));
        debug!(action = action, "action submitted");

        if !self.cooldown.is_zero() {
            tokio::time::sleep(self.cooldown).await;
        }
    }

    /// Clear the rate window.
    pub fn reset(&mut self) {
        self.window.reset();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects, clippy::indexing_slicing)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(Instant, OutboundCommand)>>);

    impl CommandSink for Recorder {
        fn submit(&self, command: OutboundCommand) {
            self.0.lock().unwrap().push((Instant::now(), command));
        }
    }

    fn actions(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| (*n).to_owned()).collect()
    }

    #[test]
    fn window_admits_up_to_limit() {
        let t0 = Instant::now();
        let mut window = RateWindow::new(2);
        assert!(window.wait_time(t0).is_zero());
        window.record(t0);
        window.record(t0 + Duration::from_millis(100));
        assert_eq!(window.wait_time(t0 + Duration::from_millis(200)), Duration::from_millis(800));
        assert!(window.wait_time(t0 + Duration::from_secs(1)).is_zero());
        assert_eq!(window.in_window(t0 + Duration::from_millis(1050)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_list_is_a_noop() {
        let sink = Arc::new(Recorder::default());
        let mut executor = ActionExecutor::new(Arc::clone(&sink), Duration::from_millis(100), 10);
        let start = Instant::now();
        executor.execute_actions(&[]).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn saturated_window_delays_instead_of_dropping() {
        let sink = Arc::new(Recorder::default());
        let mut executor = ActionExecutor::new(Arc::clone(&sink), Duration::ZERO, 2);
        let start = Instant::now();

        executor.execute_actions(&actions(&["JUMP", "JUMP", "JUMP", "JUMP"])).await;

        let sent = sink.0.lock().unwrap();
        assert_eq!(sent.len(), 4);
        assert!(start.elapsed() >= Duration::from_secs(1));
        for (i, (at, _)) in sent.iter().enumerate() {
            let in_window = sent
                .iter()
                .skip(i)
                .take_while(|(later, _)| later.duration_since(*at) < WINDOW)
                .count();
            assert!(in_window <= 2);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_spaces_actions() {
        let sink = Arc::new(Recorder::default());
        let mut executor = ActionExecutor::new(Arc::clone(&sink), Duration::from_millis(100), 10);
        let start = Instant::now();

        executor.execute_actions(&actions(&["MOVE_LEFT", "JUMP", "ATTACK"])).await;

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(320));
        let sent = sink.0.lock().unwrap();
        let tags: Vec<_> = sent.iter().map(|(_, c)| c.tag()).collect();
        assert_eq!(tags, ["ACTION", "ACTION", "ACTION"]);
        assert!(sent[1].0 - sent[0].0 >= Duration::from_millis(100));
    }
}
