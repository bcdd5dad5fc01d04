//! Process entry point for the live-streaming avatar.
//!
//! Wires the collaborators around the priority event multiplexer:
//!
//! ```text
//! console / platform / game --> Multiplexer --> Brain (LLM or stub)
//!                                    |
//!                                    v
//!                         OutboundQueue --> ActuationChannel --> renderer (TCP)
//!
//! SimulationLoop (optional) <-- save/load, control mode, console buttons
//! ```
//!
//! Ctrl-C stops every loop cooperatively. The actuation channel is closed
//! last.

mod brain;
mod console;
mod error;
mod llm;
mod parse;
mod prompt;

use std::path::PathBuf;
use std::sync::Arc;

use avatar_core::actuation::{
    ActuationChannel, ChannelTiming, CommandSink, OutboundQueue, TcpConnector,
};
use avatar_core::collaborators::{BrightnessAnalyzer, HeadlessEmulator, NoSpeech, UnloadedPolicy};
use avatar_core::config::AvatarConfig;
use avatar_core::control::ControlHandle;
use avatar_core::multiplexer::{Multiplexer, event_channels};
use avatar_core::shutdown::Shutdown;
use avatar_core::simulation::SimulationLoop;
use avatar_types::OutboundCommand;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::brain::Brain;
use crate::error::RunnerError;

/// Default configuration file, read from the working directory.
const DEFAULT_CONFIG_PATH: &str = "avatar-config.yaml";

/// Application entry point.
///
/// Initializes logging, loads configuration, opens the renderer channel,
/// then runs the multiplexer until Ctrl-C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("avatar-runner starting");

    let config = load_config()?;
    info!(
        renderer = %config.actuation.address(),
        queue_capacity = config.actuation.queue_capacity,
        decisions_per_sec = config.rate_limits.brain_decisions_per_sec,
        simulation = config.simulation.enabled,
        "configuration loaded"
    );

    let shutdown = Shutdown::new();

    // Renderer channel
    let queue = Arc::new(OutboundQueue::new(config.actuation.queue_capacity));
    let channel = Arc::new(ActuationChannel::start(
        TcpConnector::from_config(&config.actuation),
        Arc::clone(&queue),
        ChannelTiming::from(&config.actuation),
    ));

    // Decision pipeline
    let brain = Brain::from_config(&config.llm);
    info!(brain = brain.name(), "decision source ready");

    let control = ControlHandle::default();
    let (senders, queues) = event_channels(config.multiplexer.inbound_capacity);
    let mut multiplexer = Multiplexer::new(&config, queues, Arc::clone(&queue), brain, NoSpeech)
        .with_control(control.clone());

    if config.notifications.emotion_on_transition {
        let sink = Arc::clone(&queue);
        let duration = config.notifications.emotion_duration_secs;
        multiplexer.state_machine_mut().observe(move |transition| {
            sink.submit(OutboundCommand::emotion(transition.to.emotion(), duration));
        });
    }

    // Game loop
    let (simulation, manual_input) = if config.simulation.enabled {
        let (mut sim, commands) = SimulationLoop::new(
            HeadlessEmulator::new(),
            Arc::new(BrightnessAnalyzer),
            Arc::new(UnloadedPolicy),
            control,
            &config.simulation,
        );
        multiplexer = multiplexer.with_simulation(commands.clone());
        let stop = shutdown.clone();
        (
            Some(tokio::spawn(async move { sim.run(&stop).await })),
            Some(commands),
        )
    } else {
        (None, None)
    };

    // Local chat, event and manual button input
    tokio::spawn(console::run(senders, manual_input, shutdown.clone()));

    if let Some(interval) = config.actuation.heartbeat() {
        let channel = Arc::clone(&channel);
        let stop = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = stop.wait() => break,
                    _ = ticker.tick() => {
                        if !channel.ping() {
                            debug!("renderer offline, heartbeat skipped");
                        }
                    }
                }
            }
        });
    }

    {
        let stop = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
                return;
            }
            info!("ctrl-c received, shutting down");
            stop.trigger();
        });
    }

    info!("entering event loop");
    multiplexer.run(&shutdown).await;
    shutdown.trigger();

    if let Some(handle) = simulation
        && let Err(e) = handle.await
    {
        warn!(error = %e, "simulation task failed");
    }

    channel.shutdown().await;
    let stats = channel.stats();
    info!(
        sent = stats.sent,
        lost = stats.lost,
        evicted = stats.evicted,
        connects = stats.connects,
        "avatar-runner stopped"
    );
    Ok(())
}

/// Load configuration from `AVATAR_CONFIG` or [`DEFAULT_CONFIG_PATH`].
///
/// A missing file is not an error: defaults plus environment overrides
/// are used instead.
fn load_config() -> Result<AvatarConfig, RunnerError> {
    let path = std::env::var("AVATAR_CONFIG")
        .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);

    if path.exists() {
        info!(path = %path.display(), "loading configuration file");
        Ok(AvatarConfig::from_file(&path)?)
    } else {
        info!(path = %path.display(), "configuration file not found, using defaults");
        Ok(AvatarConfig::parse("")?)
    }
}
