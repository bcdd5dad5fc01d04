//! Decisions and the context they are requested for.
//!
//! A [`Decision`] is the tagged outcome of the decision collaborator: act
//! toward a goal, say something, or do nothing. Decisions are immutable once
//! created and are consumed exactly once by the dispatch step.

use serde::{Deserialize, Serialize};

use crate::events::{ChatMessage, GameEvent, PlatformEvent};

/// The outcome of a single call to the decision collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    /// Pursue a high-level goal; the planner expands it into discrete actions.
    #[serde(rename = "GOAL")]
    ActGoal(String),
    /// Speak the given text.
    Say(String),
    /// Do nothing.
    Idle,
}

impl Decision {
    /// Return the tag of this decision without its payload.
    pub const fn kind(&self) -> DecisionKind {
        match self {
            Self::ActGoal(_) => DecisionKind::ActGoal,
            Self::Say(_) => DecisionKind::Say,
            Self::Idle => DecisionKind::Idle,
        }
    }

    /// Whether this decision is [`Decision::Idle`].
    pub const fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

/// Payload-free tag of a [`Decision`], used for logging and state mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecisionKind {
    /// See [`Decision::ActGoal`].
    ActGoal,
    /// See [`Decision::Say`].
    Say,
    /// See [`Decision::Idle`].
    Idle,
}

impl DecisionKind {
    /// Wire/log name of the decision kind (`GOAL`, `SAY`, `IDLE`).
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ActGoal => "GOAL",
            Self::Say => "SAY",
            Self::Idle => "IDLE",
        }
    }
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a decision is being requested for.
///
/// The multiplexer builds one context per dequeued item (or one for an
/// autonomous request) and hands it to the decision collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum DecisionContext {
    /// A viewer wrote in chat.
    Chat(ChatMessage),
    /// A platform event (follow, subscription, raid, ...) arrived.
    Platform(PlatformEvent),
    /// Something happened inside the running game session.
    Game(GameEvent),
    /// Nothing happened for a while; the character may act on its own.
    Autonomous,
}

impl DecisionContext {
    /// Short label for logging.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Chat(_) => "chat",
            Self::Platform(_) => "platform",
            Self::Game(_) => "game",
            Self::Autonomous => "autonomous",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn decision_uses_type_value_shape() {
        let json = serde_json::to_value(Decision::ActGoal("jump the gap".to_owned())).unwrap();
        assert_eq!(json["type"], "GOAL");
        assert_eq!(json["value"], "jump the gap");

        let idle: Decision = serde_json::from_str(r#"{"type":"IDLE"}"#).unwrap();
        assert_eq!(idle, Decision::Idle);

        let say: Decision = serde_json::from_str(r#"{"type":"SAY","value":"hi chat"}"#).unwrap();
        assert_eq!(say, Decision::Say("hi chat".to_owned()));
    }

    #[test]
    fn kind_matches_variant() {
        assert_eq!(Decision::Idle.kind(), DecisionKind::Idle);
        assert_eq!(Decision::Say(String::new()).kind().as_str(), "SAY");
        assert!(Decision::Idle.is_idle());
        assert!(!Decision::ActGoal("x".to_owned()).is_idle());
    }
}
