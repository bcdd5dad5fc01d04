//! Fixed-timestep simulation loop.
//!
//! Ticks the emulator at a constant rate and keeps slow work off the tick:
//!
//! - The emulator advances exactly one frame per tick, unconditionally.
//! - A policy-chosen button is held for a fixed number of frames and
//!   released automatically.
//! - Perception runs on its own worker pool every `perception_interval`
//!   frames. The result is cached and read by later policy requests; the
//!   tick never waits for it.
//! - In AI mode a policy decision is requested every `action_interval`
//!   frames when none is outstanding. Its handle is polled each tick and
//!   the button applied once it resolves.
//! - In manual mode the decision path is skipped entirely; only buttons
//!   pressed by a human are applied.
//!
//! If a tick overruns its frame budget the next one starts immediately.
//! Missed frames are not caught up.

use std::sync::Arc;

use avatar_types::{Button, ControlMode};
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::collaborators::{
    CollaboratorError, Emulator, PerceptionAnalyzer, PerceptionReport, Policy, PolicyInput,
    predict_or_random,
};
use crate::config::SimulationConfig;
use crate::control::{ControlHandle, SimulationCommand};
use crate::shutdown::Shutdown;
use crate::worker::WorkerPool;

/// Counters describing what the loop has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulationStats {
    /// Policy requests handed to the worker pool.
    pub decisions_dispatched: u64,
    /// Resolved decisions that pressed a button.
    pub decisions_applied: u64,
    /// Perception requests handed to the worker pool.
    pub perceptions_dispatched: u64,
    /// Emulator ticks that reported an error.
    pub tick_errors: u64,
    /// Ticks that ran past their frame budget.
    pub overruns: u64,
}

/// A button pressed by the policy and the frames left before release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeldButton {
    button: Button,
    remaining: u32,
}

/// Owner of the emulator and the tick cadence.
pub struct SimulationLoop<E> {
    emulator: E,
    perception: Arc<dyn PerceptionAnalyzer>,
    policy: Arc<dyn Policy>,
    vision_pool: WorkerPool,
    policy_pool: WorkerPool,
    control: ControlHandle,
    commands: mpsc::Receiver<SimulationCommand>,
    settings: SimulationConfig,
    frame: u64,
    last_action_frame: u64,
    last_perception_frame: u64,
    held: Option<HeldButton>,
    cached_perception: Option<PerceptionReport>,
    pending_perception: Option<JoinHandle<Result<PerceptionReport, CollaboratorError>>>,
    pending_decision: Option<JoinHandle<usize>>,
    stats: SimulationStats,
}

impl<E> std::fmt::Debug for SimulationLoop<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationLoop")
            .field("frame", &self.frame)
            .field("mode", &self.control.mode())
            .field("held", &self.held)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<E: Emulator> SimulationLoop<E> {
    /// Assemble the loop. Returns the loop and the sender for human input.
    pub fn new(
        emulator: E,
        perception: Arc<dyn PerceptionAnalyzer>,
        policy: Arc<dyn Policy>,
        control: ControlHandle,
        settings: &SimulationConfig,
    ) -> (Self, mpsc::Sender<SimulationCommand>) {
        let (tx, rx) = mpsc::channel(64);
        let sim = Self {
            emulator,
            perception,
            policy,
            vision_pool: WorkerPool::new("vision", settings.vision_workers),
            policy_pool: WorkerPool::new("policy", settings.policy_workers),
            control,
            commands: rx,
            settings: settings.clone(),
            frame: 0,
            last_action_frame: 0,
            last_perception_frame: 0,
            held: None,
            cached_perception: None,
            pending_perception: None,
            pending_decision: None,
            stats: SimulationStats::default(),
        };
        (sim, tx)
    }

    /// Frames ticked so far.
    pub const fn frame(&self) -> u64 {
        self.frame
    }

    /// Loop counters.
    pub const fn stats(&self) -> SimulationStats {
        self.stats
    }

    /// The emulator.
    pub const fn emulator(&self) -> &E {
        &self.emulator
    }

    /// Button currently held by the policy, if any.
    pub fn held_button(&self) -> Option<Button> {
        self.held.map(|h| h.button)
    }

    /// Most recent perception result.
    pub const fn cached_perception(&self) -> Option<&PerceptionReport> {
        self.cached_perception.as_ref()
    }

    /// Whether a policy decision is outstanding.
    pub const fn has_pending_decision(&self) -> bool {
        self.pending_decision.is_some()
    }

    /// Tick at the configured rate until `shutdown` is triggered.
    pub async fn run(&mut self, shutdown: &Shutdown) {
        let budget = self.settings.frame_budget();
        info!(
            target_fps = self.settings.target_fps,
            action_interval_frames = self.settings.action_interval_frames,
            perception_interval_frames = self.settings.perception_interval_frames,
            "simulation loop started"
        );

        while !shutdown.is_triggered() {
            let started = Instant::now();
            self.step();

            let elapsed = started.elapsed();
            if let Some(remaining) = budget.checked_sub(elapsed)
                && !remaining.is_zero()
            {
                tokio::select! {
                    () = shutdown.wait() => break,
                    () = tokio::time::sleep(remaining) => {}
                }
            } else {
                self.stats.overruns = self.stats.overruns.saturating_add(1);
                debug!(frame = self.frame, "frame budget overrun");
                tokio::task::yield_now().await;
            }
        }

        self.abandon_pending();
        info!(frames = self.frame, "simulation loop stopped");
    }

    /// Run one tick. Never waits on worker results.
    pub fn step(&mut self) {
        if let Err(e) = self.emulator.tick() {
            self.stats.tick_errors = self.stats.tick_errors.saturating_add(1);
            warn!(frame = self.frame, error = %e, "emulator tick failed");
        }
        self.frame = self.frame.saturating_add(1);

        let mode = self.control.mode();
        self.apply_commands(mode);
        self.advance_held_button();
        self.refresh_perception();

        match mode {
            ControlMode::Ai => self.drive_policy(),
            ControlMode::Manual => self.discard_resolved_decision(),
        }
    }

    fn apply_commands(&mut self, mode: ControlMode) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                SimulationCommand::Press(button) if mode == ControlMode::Manual => {
                    self.emulator.press(button);
                }
                SimulationCommand::Release(button) if mode == ControlMode::Manual => {
                    self.emulator.release(button);
                }
                SimulationCommand::Press(button) | SimulationCommand::Release(button) => {
                    debug!(button = button.as_str(), "manual input ignored in AI mode");
                }
                SimulationCommand::SaveState => match self.emulator.save_state() {
                    Ok(()) => info!(frame = self.frame, "emulator state saved"),
                    Err(e) => warn!(error = %e, "failed to save emulator state"),
                },
                SimulationCommand::LoadState => match self.emulator.load_state() {
                    Ok(()) => info!(frame = self.frame, "emulator state loaded"),
                    Err(e) => warn!(error = %e, "failed to load emulator state"),
                },
            }
        }
    }

    fn advance_held_button(&mut self) {
        let Some(held) = self.held.as_mut() else {
            return;
        };
        held.remaining = held.remaining.saturating_sub(1);
        if held.remaining == 0 {
            let button = held.button;
            self.held = None;
            self.emulator.release(button);
        }
    }

    fn refresh_perception(&mut self) {
        match take_if_finished(&mut self.pending_perception) {
            Some(Ok(Ok(report))) => self.cached_perception = Some(report),
            Some(Ok(Err(e))) => warn!(error = %e, "perception failed, keeping cached result"),
            Some(Err(e)) => warn!(error = %e, "perception task aborted"),
            None => {}
        }

        if self.frame.saturating_sub(self.last_perception_frame)
            < self.settings.perception_interval_frames
            || self.pending_perception.is_some()
        {
            return;
        }
        self.last_perception_frame = self.frame;

        let Some(frame) = self.emulator.frame() else {
            return;
        };
        let analyzer = Arc::clone(&self.perception);
        if let Some(handle) = self.vision_pool.submit(move || analyzer.analyze(&frame)) {
            self.pending_perception = Some(handle);
            self.stats.perceptions_dispatched = self.stats.perceptions_dispatched.saturating_add(1);
        }
    }

    fn drive_policy(&mut self) {
        match take_if_finished(&mut self.pending_decision) {
            Some(Ok(index)) => self.apply_action(index),
            Some(Err(e)) => warn!(error = %e, "policy task aborted"),
            None => {}
        }

        if self.pending_decision.is_some()
            || self.frame.saturating_sub(self.last_action_frame)
                < self.settings.action_interval_frames
        {
            return;
        }
        self.last_action_frame = self.frame;

        if self.held.is_some() {
            return;
        }

        let input = PolicyInput {
            observation: self.emulator.observation(),
            perception: self.cached_perception.clone(),
        };
        let policy = Arc::clone(&self.policy);
        if let Some(handle) = self
            .policy_pool
            .submit(move || predict_or_random(policy.as_ref(), &input))
        {
            self.pending_decision = Some(handle);
            self.stats.decisions_dispatched = self.stats.decisions_dispatched.saturating_add(1);
        }
    }

    fn apply_action(&mut self, index: usize) {
        let Some(button) = Button::from_action_index(index) else {
            return;
        };
        if let Some(previous) = self.held.take() {
            self.emulator.release(previous.button);
        }
        self.emulator.press(button);
        self.held = Some(HeldButton {
            button,
            remaining: self.settings.button_hold_frames.max(1),
        });
        self.stats.decisions_applied = self.stats.decisions_applied.saturating_add(1);
        debug!(frame = self.frame, button = button.as_str(), "policy button pressed");
    }

    fn discard_resolved_decision(&mut self) {
        if let Some(Ok(index)) = take_if_finished(&mut self.pending_decision) {
            debug!(index = index, "discarding policy decision resolved in manual mode");
        }
    }

    fn abandon_pending(&mut self) {
        if let Some(handle) = self.pending_decision.take() {
            handle.abort();
        }
        if let Some(handle) = self.pending_perception.take() {
            handle.abort();
        }
    }
}

/// Take the result out of `slot` if its task has finished. Never waits.
fn take_if_finished<T>(slot: &mut Option<JoinHandle<T>>) -> Option<Result<T, JoinError>> {
    let handle = slot.as_mut()?;
    if !handle.is_finished() {
        return None;
    }
    let result = handle.now_or_never();
    if result.is_some() {
        *slot = None;
    }
    result
}
