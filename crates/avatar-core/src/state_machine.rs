//! Activity state machine.
//!
//! Tracks which of [`ActivityState`]'s mutually exclusive modes the
//! character is in, timestamps every accepted transition, and notifies
//! registered observers synchronously.
//!
//! # Transition rules
//!
//! - A request for the current state is a no-op: no log entry, no
//!   observer call.
//! - Every other request is put to the installed [`TransitionGuard`]. The
//!   default guard, [`AllowAll`], admits everything.
//! - Each accepted transition appends one [`StateTransition`] to the log
//!   and resets the time-in-state clock.
//!
//! The log is unbounded unless a retention limit is set with
//! [`ActivityStateMachine::set_history_limit`], in which case the oldest
//! records are discarded first.

use std::time::Instant;

use avatar_types::{ActivityState, Decision, StateTransition, UnknownState};
use chrono::Utc;
use tracing::{debug, info};

/// Predicate consulted before every state change.
pub trait TransitionGuard: Send + Sync {
    /// Whether the machine may move from `from` to `to`.
    fn permits(&self, from: ActivityState, to: ActivityState) -> bool;
}

/// Guard that admits every transition.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl TransitionGuard for AllowAll {
    fn permits(&self, _from: ActivityState, _to: ActivityState) -> bool {
        true
    }
}

impl<F> TransitionGuard for F
where
    F: Fn(ActivityState, ActivityState) -> bool + Send + Sync,
{
    fn permits(&self, from: ActivityState, to: ActivityState) -> bool {
        self(from, to)
    }
}

/// Callback fired on every accepted transition.
pub type TransitionObserver = Box<dyn Fn(&StateTransition) + Send + Sync>;

/// Result of a transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Already in the requested state.
    Unchanged,
    /// The transition was recorded.
    Applied,
    /// The guard refused the transition.
    Rejected,
}

impl TransitionOutcome {
    /// Whether the state actually changed.
    pub const fn is_applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Owner of the live [`ActivityState`].
pub struct ActivityStateMachine {
    current: ActivityState,
    entered_at: Instant,
    history: Vec<StateTransition>,
    history_limit: Option<usize>,
    guard: Box<dyn TransitionGuard>,
    observers: Vec<TransitionObserver>,
}

impl std::fmt::Debug for ActivityStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityStateMachine")
            .field("current", &self.current)
            .field("transitions", &self.history.len())
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

impl Default for ActivityStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityStateMachine {
    /// Start in [`ActivityState::Idle`] with the [`AllowAll`] guard.
    pub fn new() -> Self {
        Self::with_guard(AllowAll)
    }

    /// Start in [`ActivityState::Idle`] with a custom guard.
    pub fn with_guard(guard: impl TransitionGuard + 'static) -> Self {
        Self {
            current: ActivityState::Idle,
            entered_at: Instant::now(),
            history: Vec::new(),
            history_limit: None,
            guard: Box::new(guard),
            observers: Vec::new(),
        }
    }

    /// Replace the transition guard.
    pub fn set_guard(&mut self, guard: impl TransitionGuard + 'static) {
        self.guard = Box::new(guard);
    }

    /// Keep at most `limit` transitions in the log. `None` keeps all.
    pub fn set_history_limit(&mut self, limit: Option<usize>) {
        self.history_limit = limit;
        self.trim_history();
    }

    fn trim_history(&mut self) {
        if let Some(limit) = self.history_limit {
            let excess = self.history.len().saturating_sub(limit);
            self.history.drain(..excess);
        }
    }

    /// Register an observer for accepted transitions.
    pub fn observe(&mut self, observer: impl Fn(&StateTransition) + Send + Sync + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// The live state.
    pub const fn current(&self) -> ActivityState {
        self.current
    }

    /// How long the machine has been in the live state.
    pub fn time_in_state(&self) -> std::time::Duration {
        self.entered_at.elapsed()
    }

    /// Transition log, oldest first.
    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// The last `n` transitions, oldest first.
    pub fn recent_history(&self, n: usize) -> &[StateTransition] {
        let start = self.history.len().saturating_sub(n);
        self.history.get(start..).unwrap_or_default()
    }

    /// Move to `to`, recording why.
    pub fn transition_to(&mut self, to: ActivityState, reason: Option<&str>) -> TransitionOutcome {
        let from = self.current;
        if from == to {
            return TransitionOutcome::Unchanged;
        }
        if !self.guard.permits(from, to) {
            debug!(from = %from, to = %to, "transition rejected by guard");
            return TransitionOutcome::Rejected;
        }

        let now = Instant::now();
        let record = StateTransition {
            at: Utc::now(),
            from,
            to,
            reason: reason.map(str::to_owned),
            prior_duration: now.saturating_duration_since(self.entered_at),
        };

        self.current = to;
        self.entered_at = now;

        info!(
            from = %from,
            to = %to,
            reason = record.reason.as_deref().unwrap_or(""),
            prior_ms = u64::try_from(record.prior_duration.as_millis()).unwrap_or(u64::MAX),
            "activity state changed"
        );

        for observer in &self.observers {
            observer(&record);
        }
        self.history.push(record);
        self.trim_history();
        TransitionOutcome::Applied
    }

    /// Move to a state given by name (`"talking"`, `"PLAYING"`, ...).
    pub fn request(
        &mut self,
        name: &str,
        reason: Option<&str>,
    ) -> Result<TransitionOutcome, UnknownState> {
        let to = name.parse()?;
        Ok(self.transition_to(to, reason))
    }

    /// Enter [`ActivityState::Thinking`] before a decision is dispatched.
    pub fn set_thinking(&mut self) -> TransitionOutcome {
        self.transition_to(ActivityState::Thinking, Some("awaiting decision"))
    }

    /// Map a resolved decision to the matching state.
    pub fn update_from_decision(&mut self, decision: &Decision) -> TransitionOutcome {
        let to = match decision {
            Decision::ActGoal(_) => ActivityState::Playing,
            Decision::Say(_) => ActivityState::Talking,
            Decision::Idle => ActivityState::Idle,
        };
        self.transition_to(to, Some(decision.kind().as_str()))
    }
}
