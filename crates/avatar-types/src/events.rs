//! Inbound event records delivered by the chat, platform and game
//! collaborators.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// A single chat line, already filtered for spam by the chat collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Display name of the sender.
    pub username: String,
    /// Message body.
    pub message: String,
}

impl ChatMessage {
    /// Create a chat message.
    pub fn new(username: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Platform events
// ---------------------------------------------------------------------------

/// Kind of platform event. Platform events are never dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformEventKind {
    /// A viewer followed the channel.
    Follow,
    /// A viewer subscribed.
    Subscribe,
    /// A viewer gifted subscriptions.
    SubscriptionGift,
    /// A viewer cheered with bits.
    Cheer,
    /// Another channel raided this one.
    Raid,
}

impl PlatformEventKind {
    /// Stable lowercase name used in logs and decision contexts.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Follow => "follow",
            Self::Subscribe => "subscribe",
            Self::SubscriptionGift => "subscription_gift",
            Self::Cheer => "cheer",
            Self::Raid => "raid",
        }
    }
}

/// A typed platform event record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformEvent {
    /// What happened.
    pub kind: PlatformEventKind,
    /// Display name of the viewer (or raiding channel).
    pub display_name: String,
    /// Free-form event payload (bit count, viewer count, tier, ...).
    #[serde(default)]
    pub data: BTreeMap<String, serde_json::Value>,
}

impl PlatformEvent {
    /// Create a platform event with an empty payload.
    pub fn new(kind: PlatformEventKind, display_name: impl Into<String>) -> Self {
        Self {
            kind,
            display_name: display_name.into(),
            data: BTreeMap::new(),
        }
    }

    /// Line spoken when the decision collaborator has nothing to say about
    /// this event. Platform events must always be acknowledged.
    pub fn acknowledgement(&self) -> String {
        let name = &self.display_name;
        match self.kind {
            PlatformEventKind::Follow => format!("Thanks for the follow, {name}!"),
            PlatformEventKind::Subscribe => format!("Thank you so much for subscribing, {name}!"),
            PlatformEventKind::SubscriptionGift => {
                format!("{name}, thank you for gifting subs!")
            }
            PlatformEventKind::Cheer => match self.data.get("bits").and_then(serde_json::Value::as_u64) {
                Some(bits) => format!("{name}, thanks for the {bits} bits!"),
                None => format!("{name}, thanks for the bits!"),
            },
            PlatformEventKind::Raid => {
                match self.data.get("viewers").and_then(serde_json::Value::as_u64) {
                    Some(viewers) => {
                        format!("Welcome raiders! Thanks {name} for bringing {viewers} people!")
                    }
                    None => format!("Welcome raiders! Thanks for the raid, {name}!"),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Game events
// ---------------------------------------------------------------------------

/// Kind of in-session game event reported by the game-event collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameEventKind {
    /// A battle started.
    BattleStart,
    /// A battle ended.
    BattleEnd,
    /// The player won a battle.
    Victory,
    /// The player lost a battle.
    Defeat,
    /// Party health dropped below the low threshold.
    LowHp,
    /// Party health dropped below the critical threshold.
    CriticalHp,
    /// Party health recovered.
    HpRecovered,
    /// A new party member joined.
    NewPokemon,
    /// A party member fainted.
    PokemonFainted,
    /// A party member levelled up.
    PokemonLeveledUp,
    /// A party member evolved.
    Evolution,
    /// The player entered a new map.
    NewMap,
    /// A badge was obtained.
    BadgeObtained,
    /// A dialog box opened.
    DialogOpened,
    /// A menu opened.
    MenuOpened,
    /// The player has not moved for a long time.
    Stuck,
    /// No meaningful input for a long time.
    Idle,
}

impl GameEventKind {
    /// Stable lowercase name used in logs and decision contexts.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BattleStart => "battle_start",
            Self::BattleEnd => "battle_end",
            Self::Victory => "victory",
            Self::Defeat => "defeat",
            Self::LowHp => "low_hp",
            Self::CriticalHp => "critical_hp",
            Self::HpRecovered => "hp_recovered",
            Self::NewPokemon => "new_pokemon",
            Self::PokemonFainted => "pokemon_fainted",
            Self::PokemonLeveledUp => "pokemon_leveled_up",
            Self::Evolution => "evolution",
            Self::NewMap => "new_map",
            Self::BadgeObtained => "badge_obtained",
            Self::DialogOpened => "dialog_opened",
            Self::MenuOpened => "menu_opened",
            Self::Stuck => "stuck",
            Self::Idle => "idle",
        }
    }
}

/// A typed in-session game event record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    /// What happened.
    pub kind: GameEventKind,
    /// 1 = normal, 2 = high, 3 = urgent.
    #[serde(default = "default_priority")]
    pub priority: u8,
    /// Free-form event payload (level, map id, hp percent, ...).
    #[serde(default)]
    pub data: BTreeMap<String, serde_json::Value>,
}

const fn default_priority() -> u8 {
    1
}

impl GameEvent {
    /// Create a normal-priority game event with an empty payload.
    pub const fn new(kind: GameEventKind) -> Self {
        Self {
            kind,
            priority: default_priority(),
            data: BTreeMap::new(),
        }
    }

    /// Canned reaction spoken when no decision is available for a notable
    /// event. `None` for routine events (menus, dialogs, idling).
    pub fn reaction(&self) -> Option<String> {
        let line = match self.kind {
            GameEventKind::BattleStart => "Ooh, a battle! Let's go!".to_owned(),
            GameEventKind::BattleEnd => "Phew, battle over!".to_owned(),
            GameEventKind::Victory => "WE WON! Yes!".to_owned(),
            GameEventKind::Defeat => "Oh no, we lost... Let's try again!".to_owned(),
            GameEventKind::LowHp => "Careful, HP is getting low!".to_owned(),
            GameEventKind::CriticalHp => "HP is critical! I need to heal!".to_owned(),
            GameEventKind::HpRecovered => "What a relief, HP recovered!".to_owned(),
            GameEventKind::NewPokemon => "A new friend joined the team!".to_owned(),
            GameEventKind::PokemonFainted => "Oh no, our Pokemon fainted...".to_owned(),
            GameEventKind::PokemonLeveledUp => {
                match self.data.get("new_level").and_then(serde_json::Value::as_u64) {
                    Some(level) => format!("LEVEL UP! We're level {level} now!"),
                    None => "LEVEL UP!".to_owned(),
                }
            }
            GameEventKind::Evolution => "It's evolving! So exciting!".to_owned(),
            GameEventKind::NewMap => "New area! Let's explore!".to_owned(),
            GameEventKind::BadgeObtained => "WE GOT THE BADGE!".to_owned(),
            GameEventKind::Stuck => "Hmm, looks like I'm stuck here...".to_owned(),
            GameEventKind::DialogOpened | GameEventKind::MenuOpened | GameEventKind::Idle => {
                return None;
            }
        };
        Some(line)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn acknowledgement_mentions_viewer() {
        let follow = PlatformEvent::new(PlatformEventKind::Follow, "ana");
        assert!(follow.acknowledgement().contains("ana"));

        let mut cheer = PlatformEvent::new(PlatformEventKind::Cheer, "bo");
        cheer.data.insert("bits".to_owned(), serde_json::json!(500));
        assert!(cheer.acknowledgement().contains("500 bits"));
    }

    #[test]
    fn game_event_priority_defaults_to_normal() {
        let event: GameEvent = serde_json::from_str(r#"{"kind":"low_hp"}"#).unwrap();
        assert_eq!(event.kind, GameEventKind::LowHp);
        assert_eq!(event.priority, 1);
        assert!(event.data.is_empty());
    }

    #[test]
    fn only_notable_game_events_have_a_reaction() {
        let mut level_up = GameEvent::new(GameEventKind::PokemonLeveledUp);
        level_up.data.insert("new_level".to_owned(), serde_json::json!(12));
        assert!(level_up.reaction().unwrap().contains("12"));

        assert!(GameEvent::new(GameEventKind::Victory).reaction().is_some());
        assert!(GameEvent::new(GameEventKind::MenuOpened).reaction().is_none());
        assert!(GameEvent::new(GameEventKind::Idle).reaction().is_none());
    }
}
