//! Prompt assembly for the LLM decision backend.
//!
//! The system message is the configured persona followed by the response
//! contract; the user message describes the single item being decided on.

use avatar_types::{ChatMessage, DecisionContext, GameEvent, PlatformEvent, PlatformEventKind};

/// Response contract appended to every system prompt.
const RESPONSE_FORMAT: &str = r#"You can act in the game with these actions: MOVE_LEFT, MOVE_RIGHT, JUMP, ATTACK, IDLE.

Reply ONLY with valid JSON in this format:
{"type": "GOAL" | "SAY" | "IDLE", "value": "content"}

- SAY: talk to chat. Always use SAY when answering a chat message. Keep it under 150 characters.
- GOAL: describe something to do in the game (e.g. "jump over the enemy").
- IDLE: nothing to do. Use rarely."#;

/// The complete rendered prompt ready to send to an LLM backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    /// Persona and response contract.
    pub system: String,
    /// Description of the item being decided on.
    pub user: String,
}

/// Render the prompt for one decision.
pub fn render(persona: &str, context: &DecisionContext) -> RenderedPrompt {
    let user = match context {
        DecisionContext::Chat(message) => chat_prompt(message),
        DecisionContext::Platform(event) => platform_prompt(event),
        DecisionContext::Game(event) => game_prompt(event),
        DecisionContext::Autonomous => "No new chat messages. What do you want to do now? \
             It can be something in the game (GOAL) or something to say to chat (SAY)."
            .to_owned(),
    };
    RenderedPrompt {
        system: format!("{}\n\n{RESPONSE_FORMAT}", persona.trim()),
        user,
    }
}

fn chat_prompt(message: &ChatMessage) -> String {
    format!(
        "NEW CHAT MESSAGE from @{}: \"{}\"\n\n\
         Answer this person with SAY. Be kind and react to what they said. \
         If they used offensive language, politely disapprove.",
        message.username, message.message
    )
}

fn platform_prompt(event: &PlatformEvent) -> String {
    let name = &event.display_name;
    let number = |key: &str| {
        event
            .data
            .get(key)
            .and_then(serde_json::Value::as_u64)
            .unwrap_or_default()
    };
    let headline = match event.kind {
        PlatformEventKind::Follow => format!("NEW FOLLOWER! @{name} just followed the channel."),
        PlatformEventKind::Subscribe => format!("NEW SUB! @{name} just subscribed."),
        PlatformEventKind::SubscriptionGift => {
            format!("GIFT SUBS! @{name} gifted {} sub(s) to the community.", number("total").max(1))
        }
        PlatformEventKind::Cheer => format!("BITS! @{name} sent {} bits.", number("bits")),
        PlatformEventKind::Raid => {
            format!("RAID! @{name} is raiding with {} viewers.", number("viewers"))
        }
    };
    format!("{headline}\n\nThank them warmly with SAY.")
}

fn game_prompt(event: &GameEvent) -> String {
    let details = if event.data.is_empty() {
        String::new()
    } else {
        serde_json::to_string(&event.data).unwrap_or_default()
    };
    format!(
        "GAME EVENT: {} {details}\n\n\
         React naturally in one or two sentences, the way a streamer would.",
        event.kind.as_str()
    )
}

#[cfg(test)]
mod tests {
    use avatar_types::GameEventKind;

    use super::*;

    #[test]
    fn system_prompt_carries_persona_and_contract() {
        let prompt = render("  You are Aya.  ", &DecisionContext::Autonomous);
        assert!(prompt.system.starts_with("You are Aya."));
        assert!(prompt.system.contains(r#""type": "GOAL" | "SAY" | "IDLE""#));
    }

    #[test]
    fn chat_prompt_names_the_viewer() {
        let context = DecisionContext::Chat(ChatMessage::new("ana", "good morning"));
        let prompt = render("p", &context);
        assert!(prompt.user.contains("@ana"));
        assert!(prompt.user.contains("good morning"));
    }

    #[test]
    fn raid_prompt_includes_viewer_count() {
        let mut event = PlatformEvent::new(PlatformEventKind::Raid, "bo");
        event.data.insert("viewers".to_owned(), serde_json::json!(42));
        let prompt = render("p", &DecisionContext::Platform(event));
        assert!(prompt.user.contains("42 viewers"));
    }

    #[test]
    fn game_prompt_includes_payload() {
        let mut event = GameEvent::new(GameEventKind::LowHp);
        event.data.insert("hp_percent".to_owned(), serde_json::json!(12));
        let prompt = render("p", &DecisionContext::Game(event));
        assert!(prompt.user.contains("low_hp"));
        assert!(prompt.user.contains("hp_percent"));
    }
}
