//! Shared type definitions for the avatar orchestration core.
//!
//! This crate is the single source of truth for the data that flows between
//! the event sources, the decision pipeline, the simulation loop and the
//! remote rendering process.
//!
//! # Modules
//!
//! - [`decision`] -- Decisions produced by the decision collaborator and the
//!   context they are produced from
//! - [`events`] -- Chat messages, platform events and in-session game events
//! - [`state`] -- Activity states, transition records and control modes
//! - [`command`] -- Outbound commands and their newline-delimited wire format
//! - [`input`] -- Emulator buttons and the policy action-index mapping

pub mod command;
pub mod decision;
pub mod events;
pub mod input;
pub mod state;

// Re-export all public types at crate root for convenience.
pub use command::{AudioPayload, CommandKind, OutboundCommand, WireMessage};
pub use decision::{Decision, DecisionContext, DecisionKind};
pub use events::{ChatMessage, GameEvent, GameEventKind, PlatformEvent, PlatformEventKind};
pub use input::Button;
pub use state::{ActivityState, ControlMode, StateTransition, UnknownState};
