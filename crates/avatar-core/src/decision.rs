//! Decision source trait and stub implementation.
//!
//! The multiplexer presents a [`DecisionContext`] to a [`DecisionSource`]
//! and awaits a [`Decision`]. The trait abstracts how the decision is
//! produced: a language-model backend, a scripted bot, or a test stub.
//!
//! Sources may fail or hang. [`decide_or_idle`] bounds every call with a
//! deadline and turns any failure into [`Decision::Idle`], so nothing a
//! source does can stop the caller.

use std::future::Future;
use std::time::Duration;

use avatar_types::{Decision, DecisionContext};
use tracing::{debug, warn};

/// Errors a decision source may report.
#[derive(Debug, thiserror::Error)]
pub enum DecisionError {
    /// The source did not answer before the deadline.
    #[error("decision timed out (deadline: {deadline_ms}ms)")]
    Timeout {
        /// The deadline in milliseconds.
        deadline_ms: u64,
    },

    /// The source answered with something that is not a decision.
    #[error("malformed decision response: {message}")]
    Malformed {
        /// What was wrong with the response.
        message: String,
    },

    /// An internal error in the decision source.
    #[error("decision source error: {message}")]
    Internal {
        /// Description of the error.
        message: String,
    },
}

/// A source of decisions.
pub trait DecisionSource: Send + Sync {
    /// Produce a decision for the given context.
    fn decide(
        &self,
        context: &DecisionContext,
    ) -> impl Future<Output = Result<Decision, DecisionError>> + Send;
}

/// Ask `source` for a decision, substituting [`Decision::Idle`] on failure
/// or when `deadline` expires.
pub async fn decide_or_idle<D: DecisionSource>(
    source: &D,
    context: &DecisionContext,
    deadline: Duration,
) -> Decision {
    match tokio::time::timeout(deadline, source.decide(context)).await {
        Ok(Ok(decision)) => {
            debug!(
                context = context.label(),
                decision = %decision.kind(),
                "decision received"
            );
            decision
        }
        Ok(Err(e)) => {
            warn!(context = context.label(), error = %e, "decision failed, idling");
            Decision::Idle
        }
        Err(_) => {
            let e = DecisionError::Timeout {
                deadline_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
            };
            warn!(context = context.label(), error = %e, "decision timed out, idling");
            Decision::Idle
        }
    }
}

/// A decision source that answers without any backend.
///
/// Platform events get a thank-you line, chat gets a short reply, and
/// everything else is [`Decision::Idle`].
#[derive(Debug, Clone, Default)]
pub struct StubDecisionSource;

impl StubDecisionSource {
    /// Create a new stub decision source.
    pub const fn new() -> Self {
        Self
    }
}

impl DecisionSource for StubDecisionSource {
    fn decide(
        &self,
        context: &DecisionContext,
    ) -> impl Future<Output = Result<Decision, DecisionError>> + Send {
        let decision = match context {
            DecisionContext::Platform(event) => Decision::Say(event.acknowledgement()),
            DecisionContext::Chat(chat) => Decision::Say(format!("Hi {}!", chat.username)),
            DecisionContext::Game(_) | DecisionContext::Autonomous => Decision::Idle,
        };
        std::future::ready(Ok(decision))
    }
}

#[cfg(test)]
mod tests {
    use avatar_types::{ChatMessage, PlatformEvent, PlatformEventKind};

    use super::*;

    struct Failing;

    impl DecisionSource for Failing {
        async fn decide(&self, _context: &DecisionContext) -> Result<Decision, DecisionError> {
            Err(DecisionError::Malformed {
                message: "not json".to_owned(),
            })
        }
    }

    struct Hanging;

    impl DecisionSource for Hanging {
        async fn decide(&self, _context: &DecisionContext) -> Result<Decision, DecisionError> {
            std::future::pending::<()>().await;
            Ok(Decision::Say("never".to_owned()))
        }
    }

    #[tokio::test]
    async fn stub_acknowledges_platform_events() {
        let context = DecisionContext::Platform(PlatformEvent::new(PlatformEventKind::Raid, "crew"));
        let decision = decide_or_idle(&StubDecisionSource::new(), &context, Duration::from_secs(1)).await;
        assert!(matches!(decision, Decision::Say(text) if text.contains("crew")));

        let chat = DecisionContext::Chat(ChatMessage::new("ana", "hello"));
        let decision = decide_or_idle(&StubDecisionSource::new(), &chat, Duration::from_secs(1)).await;
        assert_eq!(decision.kind().as_str(), "SAY");
    }

    #[tokio::test]
    async fn failure_becomes_idle() {
        let decision =
            decide_or_idle(&Failing, &DecisionContext::Autonomous, Duration::from_secs(1)).await;
        assert_eq!(decision, Decision::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_becomes_idle() {
        let decision =
            decide_or_idle(&Hanging, &DecisionContext::Autonomous, Duration::from_secs(7)).await;
        assert_eq!(decision, Decision::Idle);
    }
}
