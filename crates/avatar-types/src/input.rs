//! Emulator buttons.

use serde::{Deserialize, Serialize};

/// A button on the emulated handheld.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Button {
    /// A button.
    A,
    /// B button.
    B,
    /// Start.
    Start,
    /// Select.
    Select,
    /// D-pad up.
    Up,
    /// D-pad down.
    Down,
    /// D-pad left.
    Left,
    /// D-pad right.
    Right,
}

impl Button {
    /// Number of entries in the policy action space (index 0 is "no-op").
    pub const ACTION_SPACE: usize = 9;

    /// Map a policy action index to a button.
    ///
    /// `0` means "press nothing"; `1..=8` map to A, B, Start, Select, Up,
    /// Down, Left, Right. Anything else is treated as a no-op.
    pub const fn from_action_index(index: usize) -> Option<Self> {
        match index {
            1 => Some(Self::A),
            2 => Some(Self::B),
            3 => Some(Self::Start),
            4 => Some(Self::Select),
            5 => Some(Self::Up),
            6 => Some(Self::Down),
            7 => Some(Self::Left),
            8 => Some(Self::Right),
            _ => None,
        }
    }

    /// Lowercase button name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::A => "a",
            Self::B => "b",
            Self::Start => "start",
            Self::Select => "select",
            Self::Up => "up",
            Self::Down => "down",
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}
