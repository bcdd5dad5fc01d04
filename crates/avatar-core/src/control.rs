//! Control mode switching.
//!
//! The [`ControlHandle`] is shared between the event multiplexer (which
//! parses `!takeover`-style chat commands) and the simulation loop (which
//! reads the mode every tick). The mode lives in a single atomic so the
//! tick never waits on a lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use avatar_types::{Button, ControlMode};

/// A command a human sends to the simulation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationCommand {
    /// Press and hold a button (manual mode only).
    Press(Button),
    /// Release a held button (manual mode only).
    Release(Button),
    /// Save the emulator state.
    SaveState,
    /// Restore the last saved emulator state.
    LoadState,
}

/// A control command recognised in chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Switch to [`ControlMode::Manual`].
    TakeOver,
    /// Switch to [`ControlMode::Ai`].
    Release,
    /// Flip the current mode.
    Toggle,
    /// Save the emulator state.
    Save,
    /// Restore the last saved emulator state.
    Load,
}

/// Recognise a control command at the start of a chat message.
///
/// Matching is case-insensitive and ignores anything after the first word.
pub fn parse_control_command(message: &str) -> Option<ControlCommand> {
    let word = message.split_whitespace().next()?.to_ascii_lowercase();
    match word.as_str() {
        "!takeover" | "!manual" | "!control" | "!me" => Some(ControlCommand::TakeOver),
        "!auto" | "!ai" | "!release" | "!bot" => Some(ControlCommand::Release),
        "!toggle" | "!switch" => Some(ControlCommand::Toggle),
        "!save" | "!savegame" => Some(ControlCommand::Save),
        "!load" | "!loadgame" => Some(ControlCommand::Load),
        _ => None,
    }
}

/// Line announced when the mode changes.
pub const fn mode_announcement(mode: ControlMode) -> &'static str {
    match mode {
        ControlMode::Ai => "AI mode on. I'm back in control of the game!",
        ControlMode::Manual => "Manual mode on. You have the controls now!",
    }
}

const AI: u8 = 0;
const MANUAL: u8 = 1;

const fn encode(mode: ControlMode) -> u8 {
    match mode {
        ControlMode::Ai => AI,
        ControlMode::Manual => MANUAL,
    }
}

const fn decode(raw: u8) -> ControlMode {
    if raw == MANUAL {
        ControlMode::Manual
    } else {
        ControlMode::Ai
    }
}

/// Shared, lock-free handle to the current [`ControlMode`].
#[derive(Debug, Clone, Default)]
pub struct ControlHandle {
    mode: Arc<AtomicU8>,
}

impl ControlHandle {
    /// Create a handle starting in `mode`.
    pub fn new(mode: ControlMode) -> Self {
        Self {
            mode: Arc::new(AtomicU8::new(encode(mode))),
        }
    }

    /// Current mode.
    pub fn mode(&self) -> ControlMode {
        decode(self.mode.load(Ordering::Acquire))
    }

    /// Set the mode and return the previous one.
    pub fn set_mode(&self, mode: ControlMode) -> ControlMode {
        decode(self.mode.swap(encode(mode), Ordering::AcqRel))
    }

    /// Flip the mode and return the new one.
    pub fn toggle(&self) -> ControlMode {
        let mut current = self.mode.load(Ordering::Acquire);
        loop {
            let next = encode(decode(current).toggled());
            match self
                .mode
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return decode(next),
                Err(actual) => current = actual,
            }
        }
    }

    /// Whether the policy collaborator drives the emulator.
    pub fn is_ai(&self) -> bool {
        self.mode() == ControlMode::Ai
    }
}
