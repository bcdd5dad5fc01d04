//! Priority event multiplexer: the main control loop.
//!
//! Each iteration takes at most one item, checking sources in strict
//! priority order:
//!
//! 1. platform events (follows, subscriptions, raids, ...)
//! 2. in-session game events
//! 3. chat messages
//! 4. the autonomous timer, only when every queue is empty
//!
//! After handling an item the iteration ends at once, so a higher-priority
//! source is always re-checked before a lower one is served. Platform and
//! game events bypass the [`DecisionGate`]; chat and autonomous requests
//! go through it. Chat control commands (`!takeover`, `!auto`, ...) are
//! handled before the gate and never reach the decision source.
//!
//! A handled decision is dispatched: goals are planned into actions and
//! run through the [`ActionExecutor`], speech is synthesized and queued as
//! `SAY`, and `Idle` does nothing.

use std::panic::AssertUnwindSafe;

use avatar_types::{
    ChatMessage, ControlMode, Decision, DecisionContext, GameEvent, OutboundCommand,
    PlatformEvent,
};
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::actuation::CommandSink;
use crate::collaborators::SpeechSynthesizer;
use crate::config::{AvatarConfig, MultiplexerConfig};
use crate::control::{
    ControlCommand, ControlHandle, SimulationCommand, mode_announcement, parse_control_command,
};
use crate::decision::{DecisionSource, decide_or_idle};
use crate::executor::ActionExecutor;
use crate::gate::DecisionGate;
use crate::planner::GoalPlanner;
use crate::shutdown::Shutdown;
use crate::state_machine::ActivityStateMachine;

/// Errors raised while handling a single item. Logged, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum MultiplexerError {
    /// A save/load command arrived but no simulation loop is attached.
    #[error("no simulation loop is attached")]
    SimulationUnavailable,

    /// The simulation command channel is full or closed.
    #[error("failed to forward {command:?} to the simulation loop: {reason}")]
    SimulationSend {
        /// The command that could not be forwarded.
        command: SimulationCommand,
        /// Why.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Event channels
// ---------------------------------------------------------------------------

/// Producer handles for the three inbound event sources.
#[derive(Debug, Clone)]
pub struct EventSenders {
    /// Platform events (never dropped by the multiplexer).
    pub platform: mpsc::Sender<PlatformEvent>,
    /// In-session game events.
    pub game: mpsc::Sender<GameEvent>,
    /// Chat messages, already spam-filtered.
    pub chat: mpsc::Sender<ChatMessage>,
}

/// Consumer side of the inbound event sources, owned by the multiplexer.
#[derive(Debug)]
pub struct EventQueues {
    platform: mpsc::Receiver<PlatformEvent>,
    game: mpsc::Receiver<GameEvent>,
    chat: mpsc::Receiver<ChatMessage>,
}

impl EventQueues {
    fn all_empty(&self) -> bool {
        self.platform.is_empty() && self.game.is_empty() && self.chat.is_empty()
    }
}

/// Create the bounded inbound channels.
pub fn event_channels(capacity: usize) -> (EventSenders, EventQueues) {
    let capacity = capacity.max(1);
    let (platform_tx, platform_rx) = mpsc::channel(capacity);
    let (game_tx, game_rx) = mpsc::channel(capacity);
    let (chat_tx, chat_rx) = mpsc::channel(capacity);
    (
        EventSenders {
            platform: platform_tx,
            game: game_tx,
            chat: chat_tx,
        },
        EventQueues {
            platform: platform_rx,
            game: game_rx,
            chat: chat_rx,
        },
    )
}

enum Inbound {
    Platform(PlatformEvent),
    Game(GameEvent),
    Chat(ChatMessage),
}

/// What one call to [`Multiplexer::run_once`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iteration {
    /// Handled a platform event.
    Platform,
    /// Handled a game event.
    Game,
    /// Dropped a game event because game events are disabled.
    GameSkipped,
    /// Handled a chat message through the decision source.
    Chat,
    /// Dropped a chat message because the gate was closed.
    RateLimited,
    /// Handled a chat control command.
    Control(ControlCommand),
    /// Ran (or attempted) an autonomous decision.
    Autonomous,
    /// Nothing to do.
    Idle,
}

// ---------------------------------------------------------------------------
// Multiplexer
// ---------------------------------------------------------------------------

/// The main control loop.
pub struct Multiplexer<D, V, S> {
    queues: EventQueues,
    decisions: D,
    speech: V,
    executor: ActionExecutor<S>,
    planner: GoalPlanner,
    gate: DecisionGate,
    state: ActivityStateMachine,
    control: ControlHandle,
    simulation: Option<mpsc::Sender<SimulationCommand>>,
    settings: MultiplexerConfig,
    last_autonomous: Option<Instant>,
}

impl<D, V, S> std::fmt::Debug for Multiplexer<D, V, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("state", &self.state.current())
            .field("mode", &self.control.mode())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<D, V, S> Multiplexer<D, V, S>
where
    D: DecisionSource,
    V: SpeechSynthesizer,
    S: CommandSink,
{
    /// Assemble the loop from its collaborators.
    pub fn new(config: &AvatarConfig, queues: EventQueues, sink: S, decisions: D, speech: V) -> Self {
        let mut state = ActivityStateMachine::new();
        state.set_history_limit(match config.multiplexer.transition_history_limit {
            0 => None,
            limit => Some(limit),
        });
        Self {
            queues,
            decisions,
            speech,
            executor: ActionExecutor::from_config(sink, &config.rate_limits),
            planner: GoalPlanner::new(),
            gate: DecisionGate::per_second(config.rate_limits.brain_decisions_per_sec),
            state,
            control: ControlHandle::default(),
            simulation: None,
            settings: config.multiplexer.clone(),
            last_autonomous: None,
        }
    }

    /// Share a control handle with the simulation loop.
    #[must_use]
    pub fn with_control(mut self, control: ControlHandle) -> Self {
        self.control = control;
        self
    }

    /// Forward save/load commands to a simulation loop.
    #[must_use]
    pub fn with_simulation(mut self, commands: mpsc::Sender<SimulationCommand>) -> Self {
        self.simulation = Some(commands);
        self
    }

    /// The activity state machine, for registering observers or guards.
    pub const fn state_machine_mut(&mut self) -> &mut ActivityStateMachine {
        &mut self.state
    }

    /// The activity state machine.
    pub const fn state_machine(&self) -> &ActivityStateMachine {
        &self.state
    }

    /// The shared control handle.
    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    /// Run until `shutdown` is triggered.
    ///
    /// A panic inside one iteration is logged and the loop resumes after
    /// the configured restart backoff.
    pub async fn run(&mut self, shutdown: &Shutdown) {
        info!(
            poll_timeout_ms = self.settings.poll_timeout_ms,
            autonomous_interval_ms = self.settings.autonomous_interval_ms,
            decision_interval_ms =
                u64::try_from(self.gate.interval().as_millis()).unwrap_or(u64::MAX),
            "multiplexer started"
        );

        while !shutdown.is_triggered() {
            let outcome = tokio::select! {
                () = shutdown.wait() => break,
                outcome = AssertUnwindSafe(self.run_once()).catch_unwind() => outcome,
            };

            if outcome.is_err() {
                error!(
                    backoff_ms = self.settings.restart_backoff_ms,
                    "multiplexer iteration panicked, restarting"
                );
                tokio::select! {
                    () = shutdown.wait() => break,
                    () = tokio::time::sleep(self.settings.restart_backoff()) => {}
                }
            }
        }

        info!("multiplexer stopped");
    }

    /// Run one iteration: handle at most one item, or consider an
    /// autonomous decision when idle.
    pub async fn run_once(&mut self) -> Iteration {
        if let Some(item) = self.next_inbound().await {
            let iteration = match item {
                Inbound::Platform(event) => self.handle_platform(event).await,
                Inbound::Game(event) => self.handle_game(event).await,
                Inbound::Chat(message) => self.handle_chat(message).await,
            };
            tokio::task::yield_now().await;
            return iteration;
        }

        if self.autonomous_due() {
            self.last_autonomous = Some(Instant::now());
            if self.queues.all_empty() {
                self.handle_autonomous().await;
                return Iteration::Autonomous;
            }
        }

        tokio::time::sleep(self.settings.idle_yield()).await;
        Iteration::Idle
    }

    async fn next_inbound(&mut self) -> Option<Inbound> {
        if let Ok(event) = self.queues.platform.try_recv() {
            return Some(Inbound::Platform(event));
        }
        if let Ok(event) = self.queues.game.try_recv() {
            return Some(Inbound::Game(event));
        }
        if let Ok(message) = self.queues.chat.try_recv() {
            return Some(Inbound::Chat(message));
        }

        let queues = &mut self.queues;
        let wait = async {
            tokio::select! {
                biased;
                Some(event) = queues.platform.recv() => Some(Inbound::Platform(event)),
                Some(event) = queues.game.recv() => Some(Inbound::Game(event)),
                Some(message) = queues.chat.recv() => Some(Inbound::Chat(message)),
                else => None,
            }
        };
        tokio::time::timeout(self.settings.poll_timeout(), wait)
            .await
            .ok()
            .flatten()
    }

    fn autonomous_due(&self) -> bool {
        self.settings.autonomous_enabled
            && self.last_autonomous.is_none_or(|last| {
                last.elapsed() >= self.settings.autonomous_interval()
            })
    }

    // -----------------------------------------------------------------------
    // Handlers
    // -----------------------------------------------------------------------

    async fn handle_platform(&mut self, event: PlatformEvent) -> Iteration {
        info!(
            kind = event.kind.as_str(),
            viewer = %event.display_name,
            "platform event"
        );
        let fallback = event.acknowledgement();
        let decision = self.decide(DecisionContext::Platform(event)).await;
        let decision = if decision.is_idle() {
            Decision::Say(fallback)
        } else {
            decision
        };
        self.conclude(decision).await;
        Iteration::Platform
    }

    async fn handle_game(&mut self, event: GameEvent) -> Iteration {
        if !self.settings.game_events_enabled || self.brain_paused_for_game() {
            debug!(kind = event.kind.as_str(), "game events disabled, skipping");
            return Iteration::GameSkipped;
        }
        info!(
            kind = event.kind.as_str(),
            priority = event.priority,
            "game event"
        );
        let fallback = event.reaction();
        let decision = self.decide(DecisionContext::Game(event)).await;
        let decision = match (decision, fallback) {
            (Decision::Idle, Some(line)) => Decision::Say(line),
            (decision, _) => decision,
        };
        self.conclude(decision).await;
        Iteration::Game
    }

    async fn handle_chat(&mut self, message: ChatMessage) -> Iteration {
        if let Some(command) = parse_control_command(&message.message) {
            info!(user = %message.username, command = ?command, "control command");
            if let Err(e) = self.apply_control(command) {
                warn!(error = %e, "control command failed");
            }
            return Iteration::Control(command);
        }

        if !self.gate.allow() {
            debug!(user = %message.username, "decision gate closed, dropping chat message");
            return Iteration::RateLimited;
        }

        info!(user = %message.username, message = %message.message, "chat message");
        let decision = self.decide(DecisionContext::Chat(message)).await;
        self.conclude(decision).await;
        Iteration::Chat
    }

    async fn handle_autonomous(&mut self) {
        if self.brain_paused_for_game() {
            debug!("game loop attached, skipping autonomous decision");
            return;
        }
        if !self.gate.allow() {
            debug!("decision gate closed, skipping autonomous decision");
            return;
        }
        debug!("autonomous decision");
        let decision = self.decide(DecisionContext::Autonomous).await;
        self.conclude(decision).await;
    }

    const fn brain_paused_for_game(&self) -> bool {
        self.settings.disable_brain_while_gaming && self.simulation.is_some()
    }

    fn apply_control(&self, command: ControlCommand) -> Result<(), MultiplexerError> {
        let mode = match command {
            ControlCommand::TakeOver => Some(ControlMode::Manual),
            ControlCommand::Release => Some(ControlMode::Ai),
            ControlCommand::Toggle => Some(self.control.mode().toggled()),
            ControlCommand::Save => {
                self.forward(SimulationCommand::SaveState)?;
                self.say_status("Game saved!");
                None
            }
            ControlCommand::Load => {
                self.forward(SimulationCommand::LoadState)?;
                self.say_status("Save state loaded!");
                None
            }
        };

        if let Some(mode) = mode {
            let previous = self.control.set_mode(mode);
            if previous != mode {
                info!(from = %previous, to = %mode, "control mode changed");
            }
            self.say_status(mode_announcement(mode));
        }
        Ok(())
    }

    fn forward(&self, command: SimulationCommand) -> Result<(), MultiplexerError> {
        let sender = self
            .simulation
            .as_ref()
            .ok_or(MultiplexerError::SimulationUnavailable)?;
        sender
            .try_send(command)
            .map_err(|e| MultiplexerError::SimulationSend {
                command,
                reason: e.to_string(),
            })
    }

    fn say_status(&self, text: &str) {
        self.executor.sink().submit(OutboundCommand::say(text));
    }

    // -----------------------------------------------------------------------
    // Decision pipeline
    // -----------------------------------------------------------------------

    async fn decide(&mut self, context: DecisionContext) -> Decision {
        self.state.set_thinking();
        decide_or_idle(&self.decisions, &context, self.settings.decision_timeout()).await
    }

    async fn conclude(&mut self, decision: Decision) {
        self.state.update_from_decision(&decision);
        self.dispatch(decision).await;
    }

    async fn dispatch(&mut self, decision: Decision) {
        match decision {
            Decision::ActGoal(goal) => {
                let actions = match self.settings.max_goal_actions {
                    0 => self.planner.plan(&goal),
                    cap => self.planner.plan_sequence(&goal, cap),
                };
                info!(goal = %goal, actions = ?actions, "executing goal");
                self.executor.execute_actions(&actions).await;
            }
            Decision::Say(text) => {
                info!(text = %text, "saying");
                let audio = self.speech.synthesize(&text).await;
                self.executor
                    .sink()
                    .submit(OutboundCommand::say_with_audio(text, audio));
            }
            Decision::Idle => debug!("idle decision"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::sync::Arc;

    use avatar_types::{ActivityState, CommandKind};

    use super::*;
    use crate::actuation::OutboundQueue;
    use crate::collaborators::NoSpeech;
    use crate::decision::StubDecisionSource;

    type TestLoop = Multiplexer<StubDecisionSource, NoSpeech, Arc<OutboundQueue>>;

    fn build() -> (EventSenders, TestLoop, Arc<OutboundQueue>) {
        let config = AvatarConfig::default();
        let (senders, queues) = event_channels(16);
        let outbound = Arc::new(OutboundQueue::new(64));
        let mux = Multiplexer::new(
            &config,
            queues,
            Arc::clone(&outbound),
            StubDecisionSource::new(),
            NoSpeech,
        );
        (senders, mux, outbound)
    }

    fn said(queue: &OutboundQueue) -> Vec<String> {
        queue
            .drain()
            .into_iter()
            .filter_map(|c| match c.kind {
                CommandKind::Say { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn control_command_switches_mode_without_gate() {
        let (senders, mut mux, outbound) = build();
        let control = mux.control();

        senders.chat.send(ChatMessage::new("ana", "hi")).await.unwrap();
        senders.chat.send(ChatMessage::new("ana", "!takeover")).await.unwrap();

        assert_eq!(mux.run_once().await, Iteration::Chat);
        assert_eq!(
            mux.run_once().await,
            Iteration::Control(ControlCommand::TakeOver)
        );
        assert_eq!(control.mode(), ControlMode::Manual);

        let lines = said(&outbound);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], mode_announcement(ControlMode::Manual));
    }

    #[tokio::test(start_paused = true)]
    async fn save_without_simulation_is_logged_not_fatal() {
        let (senders, mut mux, outbound) = build();
        senders.chat.send(ChatMessage::new("ana", "!save")).await.unwrap();
        assert_eq!(mux.run_once().await, Iteration::Control(ControlCommand::Save));
        assert!(outbound.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn save_is_forwarded_to_simulation() {
        let (senders, mux, _outbound) = build();
        let (sim_tx, mut sim_rx) = mpsc::channel(4);
        let mut mux = mux.with_simulation(sim_tx);

        senders.chat.send(ChatMessage::new("ana", "!load")).await.unwrap();
        assert_eq!(mux.run_once().await, Iteration::Control(ControlCommand::Load));
        assert_eq!(sim_rx.try_recv().unwrap(), SimulationCommand::LoadState);
    }

    #[tokio::test(start_paused = true)]
    async fn state_follows_decision() {
        let (senders, mut mux, _outbound) = build();
        senders.chat.send(ChatMessage::new("bo", "hello")).await.unwrap();
        mux.run_once().await;

        let history = mux.state_machine().history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].to, ActivityState::Thinking);
        assert_eq!(history[1].to, ActivityState::Talking);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_game_events_are_skipped() {
        let mut config = AvatarConfig::default();
        config.multiplexer.game_events_enabled = false;
        let (senders, queues) = event_channels(4);
        let outbound = Arc::new(OutboundQueue::new(8));
        let mut mux = Multiplexer::new(
            &config,
            queues,
            Arc::clone(&outbound),
            StubDecisionSource::new(),
            NoSpeech,
        );

        senders
            .game
            .send(GameEvent::new(avatar_types::GameEventKind::Victory))
            .await
            .unwrap();
        assert_eq!(mux.run_once().await, Iteration::GameSkipped);
        assert!(mux.state_machine().history().is_empty());
    }
}
