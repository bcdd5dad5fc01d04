//! Local event source reading from standard input.
//!
//! Lines are routed to the multiplexer's inbound queues:
//!
//! ```text
//! ana: hello there        chat message from "ana"
//! hello there             chat message from "console"
//! /follow ana             platform follow
//! /sub ana                platform subscription
//! /gift ana 5             platform gift of 5 subs
//! /cheer ana 100          platform cheer with 100 bits
//! /raid ana 30            platform raid with 30 viewers
//! /game low_hp            game event
//! /press a                 hold a button (manual mode)
//! /release a               release a held button (manual mode)
//! ```

use avatar_core::control::SimulationCommand;
use avatar_core::multiplexer::EventSenders;
use avatar_core::shutdown::Shutdown;
use avatar_types::{
    Button, ChatMessage, GameEvent, GameEventKind, PlatformEvent, PlatformEventKind,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Username used for chat lines without a `name:` prefix.
const CONSOLE_USER: &str = "console";

/// One parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleInput {
    /// A chat message.
    Chat(ChatMessage),
    /// A platform event.
    Platform(PlatformEvent),
    /// An in-session game event.
    Game(GameEvent),
    /// Manual button input for the simulation loop.
    Simulation(SimulationCommand),
}

/// Parse one console line. Blank and unrecognised lines yield `None`.
pub fn parse_line(line: &str) -> Option<ConsoleInput> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if let Some(command) = line.strip_prefix('/') {
        return parse_command(command);
    }

    if let Some((user, message)) = line.split_once(':') {
        let (user, message) = (user.trim(), message.trim());
        if !user.is_empty() && !user.contains(' ') && !message.is_empty() {
            return Some(ConsoleInput::Chat(ChatMessage::new(user, message)));
        }
    }
    Some(ConsoleInput::Chat(ChatMessage::new(CONSOLE_USER, line)))
}

fn parse_command(command: &str) -> Option<ConsoleInput> {
    let mut words = command.split_whitespace();
    let verb = words.next()?.to_lowercase();

    match verb.as_str() {
        "game" => {
            let kind: GameEventKind = parse_name(words.next()?)?;
            return Some(ConsoleInput::Game(GameEvent::new(kind)));
        }
        "press" => {
            let button: Button = parse_name(words.next()?)?;
            return Some(ConsoleInput::Simulation(SimulationCommand::Press(button)));
        }
        "release" => {
            let button: Button = parse_name(words.next()?)?;
            return Some(ConsoleInput::Simulation(SimulationCommand::Release(button)));
        }
        _ => {}
    }

    let (kind, amount_key) = match verb.as_str() {
        "follow" => (PlatformEventKind::Follow, None),
        "sub" | "subscribe" => (PlatformEventKind::Subscribe, None),
        "gift" => (PlatformEventKind::SubscriptionGift, Some("total")),
        "cheer" | "bits" => (PlatformEventKind::Cheer, Some("bits")),
        "raid" => (PlatformEventKind::Raid, Some("viewers")),
        _ => return None,
    };

    let mut event = PlatformEvent::new(kind, words.next()?);
    if let Some(key) = amount_key
        && let Some(amount) = words.next().and_then(|w| w.parse::<u64>().ok())
    {
        event.data.insert(key.to_owned(), serde_json::json!(amount));
    }
    Some(ConsoleInput::Platform(event))
}

/// Parse a lowercase serde name such as `low_hp` or `start`.
fn parse_name<T: serde::de::DeserializeOwned>(word: &str) -> Option<T> {
    serde_json::from_value(serde_json::Value::String(word.to_lowercase())).ok()
}

/// Route one parsed line. Returns `false` once the multiplexer is gone.
pub async fn dispatch(
    input: ConsoleInput,
    senders: &EventSenders,
    simulation: Option<&mpsc::Sender<SimulationCommand>>,
) -> bool {
    match input {
        ConsoleInput::Chat(message) => senders.chat.send(message).await.is_ok(),
        ConsoleInput::Platform(event) => senders.platform.send(event).await.is_ok(),
        ConsoleInput::Game(event) => senders.game.send(event).await.is_ok(),
        ConsoleInput::Simulation(command) => {
            let Some(sender) = simulation else {
                warn!(command = ?command, "simulation disabled, manual input ignored");
                return true;
            };
            if let Err(e) = sender.try_send(command) {
                warn!(command = ?command, error = %e, "failed to forward manual input");
            }
            true
        }
    }
}

/// Read stdin until EOF or shutdown, forwarding each line.
pub async fn run(
    senders: EventSenders,
    simulation: Option<mpsc::Sender<SimulationCommand>>,
    shutdown: Shutdown,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("console input ready (`name: message`, `/follow name`, `/game victory`, ...)");

    loop {
        let line = tokio::select! {
            () = shutdown.wait() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("console input closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "failed to read console input");
                break;
            }
        };

        let Some(input) = parse_line(&line) else {
            if !line.trim().is_empty() {
                warn!(line = %line, "unrecognised console command");
            }
            continue;
        };

        if !dispatch(input, &senders, simulation.as_ref()).await {
            debug!("multiplexer gone, stopping console input");
            break;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::Arc;

    use avatar_core::collaborators::{BrightnessAnalyzer, HeadlessEmulator, UnloadedPolicy};
    use avatar_core::config::SimulationConfig;
    use avatar_core::control::ControlHandle;
    use avatar_core::multiplexer::event_channels;
    use avatar_core::simulation::SimulationLoop;
    use avatar_types::ControlMode;

    use super::*;

    #[test]
    fn chat_with_and_without_username() {
        assert_eq!(
            parse_line("ana: good morning"),
            Some(ConsoleInput::Chat(ChatMessage::new("ana", "good morning")))
        );
        assert_eq!(
            parse_line("just talking: with a colon"),
            Some(ConsoleInput::Chat(ChatMessage::new("console", "just talking: with a colon")))
        );
        assert_eq!(parse_line("   "), None);
    }

    #[test]
    fn platform_commands() {
        let Some(ConsoleInput::Platform(raid)) = parse_line("/raid bo 30") else {
            panic!("expected raid");
        };
        assert_eq!(raid.kind, PlatformEventKind::Raid);
        assert_eq!(raid.display_name, "bo");
        assert_eq!(raid.data.get("viewers"), Some(&serde_json::json!(30)));

        let Some(ConsoleInput::Platform(follow)) = parse_line("/follow ana") else {
            panic!("expected follow");
        };
        assert!(follow.data.is_empty());

        assert_eq!(parse_line("/follow"), None);
        assert_eq!(parse_line("/dance ana"), None);
    }

    #[test]
    fn game_command() {
        assert_eq!(
            parse_line("/game LOW_HP"),
            Some(ConsoleInput::Game(GameEvent::new(GameEventKind::LowHp)))
        );
        assert_eq!(parse_line("/game nonsense"), None);
    }

    #[test]
    fn button_commands() {
        assert_eq!(
            parse_line("/press A"),
            Some(ConsoleInput::Simulation(SimulationCommand::Press(Button::A)))
        );
        assert_eq!(
            parse_line("/release start"),
            Some(ConsoleInput::Simulation(SimulationCommand::Release(Button::Start)))
        );
        assert_eq!(parse_line("/press"), None);
        assert_eq!(parse_line("/press turbo"), None);
    }

    #[tokio::test]
    async fn manual_input_reaches_emulator_without_decisions() {
        let (mut sim, commands) = SimulationLoop::new(
            HeadlessEmulator::new(),
            Arc::new(BrightnessAnalyzer),
            Arc::new(UnloadedPolicy),
            ControlHandle::new(ControlMode::Manual),
            &SimulationConfig::default(),
        );
        let (senders, _queues) = event_channels(4);

        let press = parse_line("/press left").unwrap();
        assert!(dispatch(press, &senders, Some(&commands)).await);
        for _ in 0..60 {
            sim.step();
        }
        assert_eq!(sim.emulator().held(), [Button::Left]);

        let release = parse_line("/release left").unwrap();
        assert!(dispatch(release, &senders, Some(&commands)).await);
        for _ in 0..60 {
            sim.step();
        }
        assert!(sim.emulator().held().is_empty());
        assert_eq!(sim.stats().decisions_dispatched, 0);
    }

    #[tokio::test]
    async fn manual_input_without_simulation_is_dropped() {
        let (senders, _queues) = event_channels(4);
        let press = parse_line("/press a").unwrap();
        assert!(dispatch(press, &senders, None).await);
    }
}
