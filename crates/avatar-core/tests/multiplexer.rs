//! Integration tests for the priority event multiplexer.
//!
//! The loop runs against a scripted decision source and the real outbound
//! queue, with Tokio's clock paused so rate limits and timeouts can be
//! checked deterministically.

#![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use avatar_core::actuation::OutboundQueue;
use avatar_core::collaborators::NoSpeech;
use avatar_core::config::AvatarConfig;
use avatar_core::decision::{DecisionError, DecisionSource, StubDecisionSource};
use avatar_core::multiplexer::{Iteration, Multiplexer, event_channels};
use avatar_core::shutdown::Shutdown;
use avatar_types::{
    ActivityState, ChatMessage, CommandKind, Decision, DecisionContext, GameEvent, GameEventKind,
    OutboundCommand, PlatformEvent, PlatformEventKind,
};
use tokio::time::Instant;

/// Replays a fixed list of decisions and records every context it saw.
#[derive(Default)]
struct Scripted {
    replies: Mutex<VecDeque<Result<Decision, DecisionError>>>,
    seen: Arc<Mutex<Vec<&'static str>>>,
}

impl Scripted {
    fn new(replies: Vec<Result<Decision, DecisionError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            seen: Arc::default(),
        }
    }
}

impl DecisionSource for Scripted {
    fn decide(
        &self,
        context: &DecisionContext,
    ) -> impl Future<Output = Result<Decision, DecisionError>> + Send {
        self.seen.lock().unwrap().push(context.label());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(Decision::Idle));
        std::future::ready(reply)
    }
}

/// Crashes on its first call, answers `Idle` afterwards.
struct CrashesOnce {
    calls: Arc<Mutex<Vec<Instant>>>,
}

impl DecisionSource for CrashesOnce {
    fn decide(
        &self,
        _context: &DecisionContext,
    ) -> impl Future<Output = Result<Decision, DecisionError>> + Send {
        let first = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Instant::now());
            calls.len() == 1
        };
        assert!(!first, "decision backend crashed");
        std::future::ready(Ok(Decision::Idle))
    }
}

fn describe(command: &OutboundCommand) -> String {
    match &command.kind {
        CommandKind::Action { name } => format!("ACTION {name}"),
        CommandKind::Say { text, .. } => format!("SAY {text}"),
        CommandKind::Emotion { name, .. } => format!("EMOTION {name}"),
        CommandKind::Ping => "PING".to_owned(),
    }
}

#[tokio::test(start_paused = true)]
async fn platform_event_is_served_before_earlier_chat() {
    let config = AvatarConfig::default();
    let (senders, queues) = event_channels(16);
    let outbound = Arc::new(OutboundQueue::new(64));
    let mut mux = Multiplexer::new(
        &config,
        queues,
        Arc::clone(&outbound),
        StubDecisionSource::new(),
        NoSpeech,
    );

    senders.chat.send(ChatMessage::new("early", "hello")).await.unwrap();
    senders
        .platform
        .send(PlatformEvent::new(PlatformEventKind::Follow, "late"))
        .await
        .unwrap();

    assert_eq!(mux.run_once().await, Iteration::Platform);
    assert_eq!(mux.run_once().await, Iteration::Chat);

    let lines: Vec<String> = outbound.drain().iter().map(describe).collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("late"));
    assert!(lines[1].contains("early"));
}

#[tokio::test(start_paused = true)]
async fn strict_priority_across_all_sources() {
    let config = AvatarConfig::default();
    let (senders, queues) = event_channels(16);
    let outbound = Arc::new(OutboundQueue::new(64));
    let mut mux = Multiplexer::new(
        &config,
        queues,
        Arc::clone(&outbound),
        StubDecisionSource::new(),
        NoSpeech,
    );

    senders.chat.send(ChatMessage::new("a", "one")).await.unwrap();
    senders.game.send(GameEvent::new(GameEventKind::BattleStart)).await.unwrap();
    senders
        .platform
        .send(PlatformEvent::new(PlatformEventKind::Raid, "b"))
        .await
        .unwrap();
    senders
        .platform
        .send(PlatformEvent::new(PlatformEventKind::Cheer, "c"))
        .await
        .unwrap();

    let order = [
        mux.run_once().await,
        mux.run_once().await,
        mux.run_once().await,
        mux.run_once().await,
    ];
    assert_eq!(
        order,
        [
            Iteration::Platform,
            Iteration::Platform,
            Iteration::Game,
            Iteration::Chat
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn chat_is_gated_but_platform_events_are_not() {
    let config = AvatarConfig::default();
    let (senders, queues) = event_channels(16);
    let outbound = Arc::new(OutboundQueue::new(64));
    let mut mux = Multiplexer::new(
        &config,
        queues,
        Arc::clone(&outbound),
        StubDecisionSource::new(),
        NoSpeech,
    );

    senders.chat.send(ChatMessage::new("a", "first")).await.unwrap();
    senders.chat.send(ChatMessage::new("b", "second")).await.unwrap();
    assert_eq!(mux.run_once().await, Iteration::Chat);
    assert_eq!(mux.run_once().await, Iteration::RateLimited);

    for name in ["x", "y", "z"] {
        senders
            .platform
            .send(PlatformEvent::new(PlatformEventKind::Subscribe, name))
            .await
            .unwrap();
    }
    for _ in 0..3 {
        assert_eq!(mux.run_once().await, Iteration::Platform);
    }

    tokio::time::sleep(Duration::from_millis(600)).await;
    senders.chat.send(ChatMessage::new("c", "third")).await.unwrap();
    assert_eq!(mux.run_once().await, Iteration::Chat);

    let says = outbound
        .drain()
        .iter()
        .filter(|c| c.tag() == "SAY")
        .count();
    assert_eq!(says, 5);
}

#[tokio::test(start_paused = true)]
async fn goal_is_planned_into_actions() {
    let config = AvatarConfig::default();
    let (senders, queues) = event_channels(16);
    let outbound = Arc::new(OutboundQueue::new(64));
    let source = Scripted::new(vec![Ok(Decision::ActGoal("pular o inimigo".to_owned()))]);
    let mut mux = Multiplexer::new(&config, queues, Arc::clone(&outbound), source, NoSpeech);

    senders.chat.send(ChatMessage::new("a", "do something")).await.unwrap();
    assert_eq!(mux.run_once().await, Iteration::Chat);

    let lines: Vec<String> = outbound.drain().iter().map(describe).collect();
    assert_eq!(lines, ["ACTION JUMP", "ACTION ATTACK"]);
    assert_eq!(mux.state_machine().current(), ActivityState::Playing);
}

#[tokio::test(start_paused = true)]
async fn failed_platform_decision_still_acknowledges() {
    let config = AvatarConfig::default();
    let (senders, queues) = event_channels(16);
    let outbound = Arc::new(OutboundQueue::new(64));
    let source = Scripted::new(vec![Err(DecisionError::Internal {
        message: "backend down".to_owned(),
    })]);
    let mut mux = Multiplexer::new(&config, queues, Arc::clone(&outbound), source, NoSpeech);

    senders
        .platform
        .send(PlatformEvent::new(PlatformEventKind::Follow, "dee"))
        .await
        .unwrap();
    assert_eq!(mux.run_once().await, Iteration::Platform);

    let lines: Vec<String> = outbound.drain().iter().map(describe).collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("SAY"));
    assert!(lines[0].contains("dee"));
}

#[tokio::test(start_paused = true)]
async fn autonomous_decision_only_when_idle_and_due() {
    let mut config = AvatarConfig::default();
    config.multiplexer.autonomous_interval_ms = 5_000;
    let (_senders, queues) = event_channels(16);
    let outbound = Arc::new(OutboundQueue::new(64));
    let source = Scripted::new(vec![Ok(Decision::Say("bored".to_owned()))]);
    let seen = Arc::clone(&source.seen);
    let mut mux = Multiplexer::new(&config, queues, Arc::clone(&outbound), source, NoSpeech);

    assert_eq!(mux.run_once().await, Iteration::Autonomous);
    assert_eq!(mux.run_once().await, Iteration::Idle);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(mux.run_once().await, Iteration::Autonomous);

    assert_eq!(*seen.lock().unwrap(), ["autonomous", "autonomous"]);
    let lines: Vec<String> = outbound.drain().iter().map(describe).collect();
    assert_eq!(lines, ["SAY bored"]);
}

#[tokio::test(start_paused = true)]
async fn run_stops_on_shutdown() {
    let config = AvatarConfig::default();
    let (senders, queues) = event_channels(16);
    let outbound = Arc::new(OutboundQueue::new(64));
    let mut mux = Multiplexer::new(
        &config,
        queues,
        Arc::clone(&outbound),
        StubDecisionSource::new(),
        NoSpeech,
    );
    let shutdown = Shutdown::new();

    let stopper = {
        let shutdown = shutdown.clone();
        let chat = senders.chat.clone();
        tokio::spawn(async move {
            chat.send(ChatMessage::new("a", "hello")).await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            shutdown.trigger();
        })
    };

    tokio::time::timeout(Duration::from_secs(10), mux.run(&shutdown))
        .await
        .unwrap();
    stopper.await.unwrap();

    assert!(
        outbound
            .drain()
            .iter()
            .any(|c| describe(c) == "SAY Hi a!")
    );
}

#[tokio::test(start_paused = true)]
async fn full_goal_plan_runs_unless_capped() {
    let goal = "left right jump attack";
    let mut capped = AvatarConfig::default();
    capped.multiplexer.max_goal_actions = 2;

    for (config, expected) in [
        (
            AvatarConfig::default(),
            vec!["ACTION MOVE_LEFT", "ACTION MOVE_RIGHT", "ACTION JUMP", "ACTION ATTACK"],
        ),
        (capped, vec!["ACTION MOVE_LEFT", "ACTION MOVE_RIGHT"]),
    ] {
        let (senders, queues) = event_channels(16);
        let outbound = Arc::new(OutboundQueue::new(64));
        let source = Scripted::new(vec![Ok(Decision::ActGoal(goal.to_owned()))]);
        let mut mux = Multiplexer::new(&config, queues, Arc::clone(&outbound), source, NoSpeech);

        senders.chat.send(ChatMessage::new("a", "go")).await.unwrap();
        assert_eq!(mux.run_once().await, Iteration::Chat);

        let lines: Vec<String> = outbound.drain().iter().map(describe).collect();
        assert_eq!(lines, expected);
    }
}

#[tokio::test(start_paused = true)]
async fn panicking_iteration_restarts_after_backoff() {
    let config = AvatarConfig::default();
    let (senders, queues) = event_channels(16);
    let outbound = Arc::new(OutboundQueue::new(64));
    let calls = Arc::new(Mutex::new(Vec::new()));
    let source = CrashesOnce {
        calls: Arc::clone(&calls),
    };
    let mut mux = Multiplexer::new(&config, queues, Arc::clone(&outbound), source, NoSpeech);

    for viewer in ["first", "second"] {
        senders
            .platform
            .send(PlatformEvent::new(PlatformEventKind::Follow, viewer))
            .await
            .unwrap();
    }

    let shutdown = Shutdown::new();
    let stopper = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            shutdown.trigger();
        })
    };
    tokio::time::timeout(Duration::from_secs(10), mux.run(&shutdown))
        .await
        .unwrap();
    stopper.await.unwrap();

    let calls = calls.lock().unwrap().clone();
    assert!(calls.len() >= 2);
    assert!(calls[1].duration_since(calls[0]) >= config.multiplexer.restart_backoff());

    let lines: Vec<String> = outbound.drain().iter().map(describe).collect();
    assert!(!lines.iter().any(|line| line.contains("first")));
    assert!(
        lines
            .iter()
            .any(|line| line.starts_with("SAY") && line.contains("second"))
    );
}

#[tokio::test(start_paused = true)]
async fn game_loop_can_keep_the_brain_to_chat() {
    let mut config = AvatarConfig::default();
    config.multiplexer.disable_brain_while_gaming = true;
    let (senders, queues) = event_channels(16);
    let outbound = Arc::new(OutboundQueue::new(64));
    let source = Scripted::new(vec![]);
    let seen = Arc::clone(&source.seen);
    let (sim_tx, _sim_rx) = tokio::sync::mpsc::channel(4);
    let mut mux = Multiplexer::new(&config, queues, Arc::clone(&outbound), source, NoSpeech)
        .with_simulation(sim_tx);

    senders.game.send(GameEvent::new(GameEventKind::BattleStart)).await.unwrap();
    assert_eq!(mux.run_once().await, Iteration::GameSkipped);
    assert_eq!(mux.run_once().await, Iteration::Autonomous);

    senders.chat.send(ChatMessage::new("a", "hi")).await.unwrap();
    assert_eq!(mux.run_once().await, Iteration::Chat);

    assert_eq!(*seen.lock().unwrap(), ["chat"]);
    assert!(outbound.is_empty());
}
