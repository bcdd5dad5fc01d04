//! Activity states, transition records and control modes.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The character's current activity. Exactly one value is live at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityState {
    /// Nothing in particular.
    Idle,
    /// Speaking to the audience.
    Talking,
    /// Acting toward a goal in the game.
    Playing,
    /// Waiting on the decision collaborator.
    Thinking,
}

impl ActivityState {
    /// Upper-case name (`IDLE`, `TALKING`, `PLAYING`, `THINKING`).
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Talking => "TALKING",
            Self::Playing => "PLAYING",
            Self::Thinking => "THINKING",
        }
    }

    /// Emotion shown by the remote renderer while in this state.
    pub const fn emotion(self) -> &'static str {
        match self {
            Self::Idle => "Neutral",
            Self::Talking => "Happy",
            Self::Playing => "Focused",
            Self::Thinking => "Thinking",
        }
    }
}

impl std::fmt::Display for ActivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a state name does not match any [`ActivityState`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown activity state: {0}")]
pub struct UnknownState(pub String);

impl FromStr for ActivityState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IDLE" => Ok(Self::Idle),
            "TALKING" => Ok(Self::Talking),
            "PLAYING" => Ok(Self::Playing),
            "THINKING" => Ok(Self::Thinking),
            _ => Err(UnknownState(s.to_owned())),
        }
    }
}

/// One accepted state change. The transition log is append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    /// Wall-clock time of the transition.
    pub at: DateTime<Utc>,
    /// State that was left.
    pub from: ActivityState,
    /// State that was entered.
    pub to: ActivityState,
    /// Why the transition happened, if the caller said.
    pub reason: Option<String>,
    /// How long the character stayed in `from`.
    pub prior_duration: Duration,
}

/// Who drives the emulated environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    /// The policy collaborator picks buttons.
    #[default]
    Ai,
    /// A human drives the emulator directly.
    Manual,
}

impl ControlMode {
    /// The other mode.
    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Self::Ai => Self::Manual,
            Self::Manual => Self::Ai,
        }
    }

    /// Lowercase name (`ai`, `manual`).
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ai => "ai",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for ControlMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
