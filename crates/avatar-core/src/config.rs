//! Configuration loading and typed config structures.
//!
//! The configuration lives in `avatar-config.yaml`. This module defines
//! strongly-typed structs that mirror the YAML structure; every field has a
//! default, so an empty or missing file yields a usable configuration.
//! Endpoints and secrets can be overridden from the environment.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value parsed but is out of range.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// What is wrong.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AvatarConfig {
    /// Connection to the remote renderer.
    #[serde(default)]
    pub actuation: ActuationConfig,

    /// Decision and action rate limits.
    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    /// Main event loop timing.
    #[serde(default)]
    pub multiplexer: MultiplexerConfig,

    /// Fixed-timestep game loop.
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Decision collaborator backend.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Notifications sent to the remote renderer on internal changes.
    #[serde(default)]
    pub notifications: NotificationConfig,
}

impl AvatarConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override endpoint and secret values, see
    /// [`ActuationConfig::apply_env_overrides`] and
    /// [`LlmConfig::apply_env_overrides`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string and apply environment
    /// overrides.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.actuation.apply_env_overrides()?;
        config.llm.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a loop spin or divide by zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.actuation.queue_capacity == 0 {
            return Err(invalid("actuation.queue_capacity must be at least 1"));
        }
        let rate = self.rate_limits.brain_decisions_per_sec;
        if !rate.is_finite() || rate < MIN_DECISIONS_PER_SEC {
            return Err(invalid(
                "rate_limits.brain_decisions_per_sec must be a finite number of at least 0.001",
            ));
        }
        self.rate_limits.decision_interval()?;
        if self.rate_limits.actions_per_sec == 0 {
            return Err(invalid("rate_limits.actions_per_sec must be at least 1"));
        }
        if self.actuation.reconnect_delay_ms == 0
            || self.actuation.disconnected_backoff_ms == 0
            || self.actuation.idle_wait_ms == 0
        {
            return Err(invalid("actuation delays must be at least 1 ms"));
        }
        if self.multiplexer.poll_timeout_ms == 0 || self.multiplexer.idle_yield_ms == 0 {
            return Err(invalid("multiplexer poll timeout and idle yield must be at least 1 ms"));
        }
        if self.simulation.target_fps == 0 {
            return Err(invalid("simulation.target_fps must be at least 1"));
        }
        if self.simulation.action_interval_frames == 0
            || self.simulation.perception_interval_frames == 0
        {
            return Err(invalid("simulation frame intervals must be at least 1"));
        }
        if self.simulation.vision_workers == 0 || self.simulation.policy_workers == 0 {
            return Err(invalid("simulation worker pools need at least one worker"));
        }
        Ok(())
    }
}

/// Slowest accepted decision rate: one every 1000 seconds.
pub const MIN_DECISIONS_PER_SEC: f64 = 0.001;

fn invalid(reason: &str) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.to_owned(),
    }
}

/// Connection to the remote renderer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ActuationConfig {
    /// Renderer host.
    #[serde(default = "default_actuation_host")]
    pub host: String,

    /// Renderer TCP port.
    #[serde(default = "default_actuation_port")]
    pub port: u16,

    /// Maximum number of queued outbound commands before the oldest is
    /// evicted.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Fixed delay before each reconnect attempt.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Sender back-off while the connection is down.
    #[serde(default = "default_disconnected_backoff_ms")]
    pub disconnected_backoff_ms: u64,

    /// How long the sender waits for a command before re-checking state.
    #[serde(default = "default_idle_wait_ms")]
    pub idle_wait_ms: u64,

    /// Interval between `PING` heartbeats while connected. `0` disables
    /// them.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
}

impl ActuationConfig {
    /// Override host and port from `AVATAR_ACTUATION_HOST` and
    /// `AVATAR_ACTUATION_PORT` when set.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var("AVATAR_ACTUATION_HOST") {
            self.host = val;
        }
        if let Ok(val) = std::env::var("AVATAR_ACTUATION_PORT") {
            self.port = val.parse().map_err(|e| ConfigError::Invalid {
                reason: format!("invalid AVATAR_ACTUATION_PORT: {e}"),
            })?;
        }
        Ok(())
    }

    /// `host:port` address of the renderer.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// [`Self::reconnect_delay_ms`] as a [`Duration`].
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// [`Self::disconnected_backoff_ms`] as a [`Duration`].
    pub const fn disconnected_backoff(&self) -> Duration {
        Duration::from_millis(self.disconnected_backoff_ms)
    }

    /// [`Self::idle_wait_ms`] as a [`Duration`].
    pub const fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    /// Heartbeat interval, or `None` when disabled.
    pub const fn heartbeat(&self) -> Option<Duration> {
        if self.heartbeat_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.heartbeat_ms))
        }
    }
}

impl Default for ActuationConfig {
    fn default() -> Self {
        Self {
            host: default_actuation_host(),
            port: default_actuation_port(),
            queue_capacity: default_queue_capacity(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            disconnected_backoff_ms: default_disconnected_backoff_ms(),
            idle_wait_ms: default_idle_wait_ms(),
            heartbeat_ms: default_heartbeat_ms(),
        }
    }
}

/// Decision and action rate limits.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum gated decisions per second (chat and autonomous).
    #[serde(default = "default_brain_decisions_per_sec")]
    pub brain_decisions_per_sec: f64,

    /// Maximum discrete actions admitted in any trailing second.
    #[serde(default = "default_actions_per_sec")]
    pub actions_per_sec: u32,

    /// Pause after every discrete action.
    #[serde(default = "default_action_cooldown_ms")]
    pub action_cooldown_ms: u64,
}

impl RateLimitConfig {
    /// Minimum interval between two gated decisions.
    pub fn decision_interval(&self) -> Result<Duration, ConfigError> {
        Duration::try_from_secs_f64(self.brain_decisions_per_sec.recip()).map_err(|e| {
            ConfigError::Invalid {
                reason: format!(
                    "rate_limits.brain_decisions_per_sec {} has no usable interval: {e}",
                    self.brain_decisions_per_sec
                ),
            }
        })
    }

    /// [`Self::action_cooldown_ms`] as a [`Duration`].
    pub const fn action_cooldown(&self) -> Duration {
        Duration::from_millis(self.action_cooldown_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            brain_decisions_per_sec: default_brain_decisions_per_sec(),
            actions_per_sec: default_actions_per_sec(),
            action_cooldown_ms: default_action_cooldown_ms(),
        }
    }
}

/// Main event loop timing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MultiplexerConfig {
    /// Bounded wait on each event source per iteration.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Sleep between idle iterations.
    #[serde(default = "default_idle_yield_ms")]
    pub idle_yield_ms: u64,

    /// Interval between autonomous decision requests.
    #[serde(default = "default_autonomous_interval_ms")]
    pub autonomous_interval_ms: u64,

    /// Whether autonomous decisions are requested at all.
    #[serde(default = "default_true")]
    pub autonomous_enabled: bool,

    /// Whether in-session game events are forwarded to the decision
    /// collaborator.
    #[serde(default = "default_true")]
    pub game_events_enabled: bool,

    /// Deadline for one decision call; on expiry the decision is `Idle`.
    #[serde(default = "default_decision_timeout_ms")]
    pub decision_timeout_ms: u64,

    /// Sleep before the loop restarts after an unexpected failure.
    #[serde(default = "default_restart_backoff_ms")]
    pub restart_backoff_ms: u64,

    /// Capacity of each inbound event channel.
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,

    /// Cap on the actions a single goal expands into. 0 runs the full plan.
    #[serde(default)]
    pub max_goal_actions: usize,

    /// Activity transitions kept in the log. 0 keeps all of them.
    #[serde(default)]
    pub transition_history_limit: usize,

    /// While a simulation loop is attached, skip game events and
    /// autonomous decisions so the decision collaborator only serves chat
    /// and platform events.
    #[serde(default)]
    pub disable_brain_while_gaming: bool,
}

impl MultiplexerConfig {
    /// [`Self::poll_timeout_ms`] as a [`Duration`].
    pub const fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// [`Self::idle_yield_ms`] as a [`Duration`].
    pub const fn idle_yield(&self) -> Duration {
        Duration::from_millis(self.idle_yield_ms)
    }

    /// [`Self::autonomous_interval_ms`] as a [`Duration`].
    pub const fn autonomous_interval(&self) -> Duration {
        Duration::from_millis(self.autonomous_interval_ms)
    }

    /// [`Self::decision_timeout_ms`] as a [`Duration`].
    pub const fn decision_timeout(&self) -> Duration {
        Duration::from_millis(self.decision_timeout_ms)
    }

    /// [`Self::restart_backoff_ms`] as a [`Duration`].
    pub const fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout_ms(),
            idle_yield_ms: default_idle_yield_ms(),
            autonomous_interval_ms: default_autonomous_interval_ms(),
            autonomous_enabled: true,
            game_events_enabled: true,
            decision_timeout_ms: default_decision_timeout_ms(),
            restart_backoff_ms: default_restart_backoff_ms(),
            inbound_capacity: default_inbound_capacity(),
            max_goal_actions: 0,
            transition_history_limit: 0,
            disable_brain_while_gaming: false,
        }
    }
}

/// Fixed-timestep game loop.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SimulationConfig {
    /// Whether the game loop runs at all.
    #[serde(default)]
    pub enabled: bool,

    /// Emulator frames per second.
    #[serde(default = "default_target_fps")]
    pub target_fps: u32,

    /// Request a policy decision every N frames.
    #[serde(default = "default_action_interval_frames")]
    pub action_interval_frames: u64,

    /// Refresh perception every N frames.
    #[serde(default = "default_perception_interval_frames")]
    pub perception_interval_frames: u64,

    /// Frames a policy-chosen button stays pressed.
    #[serde(default = "default_button_hold_frames")]
    pub button_hold_frames: u32,

    /// Worker threads for perception.
    #[serde(default = "default_workers")]
    pub vision_workers: usize,

    /// Worker threads for policy inference.
    #[serde(default = "default_workers")]
    pub policy_workers: usize,
}

impl SimulationConfig {
    /// Duration of one frame at [`Self::target_fps`].
    pub fn frame_budget(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.target_fps.max(1)))
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target_fps: default_target_fps(),
            action_interval_frames: default_action_interval_frames(),
            perception_interval_frames: default_perception_interval_frames(),
            button_hold_frames: default_button_hold_frames(),
            vision_workers: default_workers(),
            policy_workers: default_workers(),
        }
    }
}

/// Decision collaborator backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LlmConfig {
    /// Backend type (`openai`, `deepseek`, `ollama`, `anthropic`). Empty
    /// selects the offline stub.
    #[serde(default)]
    pub backend: String,

    /// Base API URL.
    #[serde(default)]
    pub api_url: String,

    /// API key.
    #[serde(default)]
    pub api_key: String,

    /// Model identifier.
    #[serde(default)]
    pub model: String,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Character description used as the system prompt.
    #[serde(default = "default_persona")]
    pub persona: String,
}

impl LlmConfig {
    /// Override backend settings from `LLM_BACKEND`, `LLM_API_URL`,
    /// `LLM_API_KEY` and `LLM_MODEL` when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("LLM_BACKEND") {
            self.backend = val;
        }
        if let Ok(val) = std::env::var("LLM_API_URL") {
            self.api_url = val;
        }
        if let Ok(val) = std::env::var("LLM_API_KEY") {
            self.api_key = val;
        }
        if let Ok(val) = std::env::var("LLM_MODEL") {
            self.model = val;
        }
    }

    /// Whether enough is configured to call a real backend.
    pub fn is_configured(&self) -> bool {
        !self.backend.is_empty() && !self.api_url.is_empty() && !self.model.is_empty()
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: String::new(),
            api_url: String::new(),
            api_key: String::new(),
            model: String::new(),
            temperature: default_temperature(),
            persona: default_persona(),
        }
    }
}

/// Notifications sent to the remote renderer on internal changes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NotificationConfig {
    /// Send an `EMOTION` command on every activity state transition.
    #[serde(default = "default_true")]
    pub emotion_on_transition: bool,

    /// Seconds each transition emotion is held.
    #[serde(default = "default_emotion_duration_secs")]
    pub emotion_duration_secs: f64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            emotion_on_transition: true,
            emotion_duration_secs: default_emotion_duration_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_actuation_host() -> String {
    "localhost".to_owned()
}

const fn default_actuation_port() -> u16 {
    8765
}

const fn default_queue_capacity() -> usize {
    256
}

const fn default_reconnect_delay_ms() -> u64 {
    2000
}

const fn default_disconnected_backoff_ms() -> u64 {
    100
}

const fn default_idle_wait_ms() -> u64 {
    1000
}

const fn default_heartbeat_ms() -> u64 {
    30_000
}

const fn default_brain_decisions_per_sec() -> f64 {
    2.0
}

const fn default_actions_per_sec() -> u32 {
    10
}

const fn default_action_cooldown_ms() -> u64 {
    100
}

const fn default_poll_timeout_ms() -> u64 {
    50
}

const fn default_idle_yield_ms() -> u64 {
    50
}

const fn default_autonomous_interval_ms() -> u64 {
    5000
}

const fn default_decision_timeout_ms() -> u64 {
    7000
}

const fn default_restart_backoff_ms() -> u64 {
    1000
}

const fn default_inbound_capacity() -> usize {
    1024
}

const fn default_target_fps() -> u32 {
    60
}

const fn default_action_interval_frames() -> u64 {
    12
}

const fn default_perception_interval_frames() -> u64 {
    120
}

const fn default_button_hold_frames() -> u32 {
    8
}

const fn default_workers() -> usize {
    1
}

const fn default_temperature() -> f64 {
    0.7
}

fn default_persona() -> String {
    "You are a cheerful streamer avatar who plays games and chats with viewers.".to_owned()
}

const fn default_emotion_duration_secs() -> f64 {
    2.0
}

const fn default_true() -> bool {
    true
}
