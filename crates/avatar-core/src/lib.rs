//! Orchestration core for a live-streaming avatar.
//!
//! This crate interleaves chat, platform events, in-session game events and
//! a real-time emulated game under real-time constraints, and delivers the
//! resulting speech and actions to a remote renderer.
//!
//! # Modules
//!
//! - [`actuation`] -- Non-blocking outbound channel to the remote renderer,
//!   with drop-oldest overflow and fixed-delay reconnect.
//! - [`collaborators`] -- Emulator, perception, policy and speech seams.
//! - [`config`] -- Configuration loading from `avatar-config.yaml` into
//!   strongly-typed structs.
//! - [`control`] -- AI/manual control mode and chat control commands.
//! - [`decision`] -- [`DecisionSource`] trait and [`StubDecisionSource`].
//! - [`executor`] -- Cooldown and sliding-window action executor.
//! - [`gate`] -- Rate-limited decision gate.
//! - [`multiplexer`] -- The priority event loop.
//! - [`planner`] -- Goal-to-action keyword planner.
//! - [`shutdown`] -- Cooperative stop signal.
//! - [`simulation`] -- Fixed-timestep emulator loop.
//! - [`state_machine`] -- Activity state machine with transition log.
//! - [`worker`] -- Bounded worker pools for blocking inference.
//!
//! [`DecisionSource`]: decision::DecisionSource
//! [`StubDecisionSource`]: decision::StubDecisionSource

pub mod actuation;
pub mod collaborators;
pub mod config;
pub mod control;
pub mod decision;
pub mod executor;
pub mod gate;
pub mod multiplexer;
pub mod planner;
pub mod shutdown;
pub mod simulation;
pub mod state_machine;
pub mod worker;
