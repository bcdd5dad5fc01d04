//! Outbound commands and the wire format spoken to the remote renderer.
//!
//! The remote consumer reads newline-delimited JSON objects of the form
//!
//! ```text
//! {"cmd":"SAY","value":"hello","timestamp":1718000000.25,"audio_data":"...","audio_format":"mp3"}
//! ```
//!
//! `duration` is present only for `EMOTION`, `value` is absent for `PING`,
//! and the audio fields are present only for `SAY` with synthesized speech.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Synthesized speech attached to a `SAY` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioPayload {
    /// Base64-encoded audio bytes.
    pub data: String,
    /// Container format (`mp3`, `wav`, ...).
    pub format: String,
}

/// What the remote renderer should do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandKind {
    /// Perform a discrete action (`MOVE_LEFT`, `JUMP`, ...).
    Action {
        /// Action name.
        name: String,
    },
    /// Speak a line, optionally with pre-rendered audio.
    Say {
        /// Text to speak / display.
        text: String,
        /// Synthesized speech, if available.
        audio: Option<AudioPayload>,
    },
    /// Show an emotion for a while.
    Emotion {
        /// Emotion name (`Happy`, `Angry`, ...).
        name: String,
        /// Seconds to hold the emotion.
        duration_secs: f64,
    },
    /// Liveness probe.
    Ping,
}

/// A command queued for the remote renderer. Transmitted at most once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundCommand {
    /// The command itself.
    pub kind: CommandKind,
    /// When the producer created the command.
    pub created_at: DateTime<Utc>,
}

impl OutboundCommand {
    /// Wrap a command kind, stamping it with the current time.
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            created_at: Utc::now(),
        }
    }

    /// `ACTION` command.
    pub fn action(name: impl Into<String>) -> Self {
        Self::new(CommandKind::Action { name: name.into() })
    }

    /// `SAY` command without audio.
    pub fn say(text: impl Into<String>) -> Self {
        Self::new(CommandKind::Say {
            text: text.into(),
            audio: None,
        })
    }

    /// `SAY` command with optional synthesized audio.
    pub fn say_with_audio(text: impl Into<String>, audio: Option<AudioPayload>) -> Self {
        Self::new(CommandKind::Say {
            text: text.into(),
            audio,
        })
    }

    /// `EMOTION` command.
    pub fn emotion(name: impl Into<String>, duration_secs: f64) -> Self {
        Self::new(CommandKind::Emotion {
            name: name.into(),
            duration_secs,
        })
    }

    /// `PING` command.
    pub fn ping() -> Self {
        Self::new(CommandKind::Ping)
    }

    /// Wire tag of this command.
    pub const fn tag(&self) -> &'static str {
        match self.kind {
            CommandKind::Action { .. } => "ACTION",
            CommandKind::Say { .. } => "SAY",
            CommandKind::Emotion { .. } => "EMOTION",
            CommandKind::Ping => "PING",
        }
    }

    /// Borrowing view of this command in wire shape.
    pub fn to_wire(&self) -> WireMessage<'_> {
        #[allow(clippy::cast_precision_loss)]
        let timestamp = self.created_at.timestamp_micros() as f64 / 1_000_000.0;
        let mut wire = WireMessage {
            cmd: self.tag(),
            value: None,
            timestamp,
            duration: None,
            audio_data: None,
            audio_format: None,
        };
        match &self.kind {
            CommandKind::Action { name } => wire.value = Some(name),
            CommandKind::Say { text, audio } => {
                wire.value = Some(text);
                if let Some(audio) = audio {
                    wire.audio_data = Some(&audio.data);
                    wire.audio_format = Some(&audio.format);
                }
            }
            CommandKind::Emotion {
                name,
                duration_secs,
            } => {
                wire.value = Some(name);
                wire.duration = Some(*duration_secs);
            }
            CommandKind::Ping => {}
        }
        wire
    }

    /// Serialize to a single newline-terminated JSON line.
    pub fn to_line(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut line = serde_json::to_vec(&self.to_wire())?;
        line.push(b'\n');
        Ok(line)
    }
}

/// One line of the wire protocol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireMessage<'a> {
    /// `ACTION`, `SAY`, `EMOTION` or `PING`.
    pub cmd: &'static str,
    /// Action name, spoken text or emotion name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<&'a str>,
    /// Creation time as fractional Unix seconds.
    pub timestamp: f64,
    /// Emotion duration in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Base64 audio for `SAY`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_data: Option<&'a str>,
    /// Audio container format for `SAY`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_format: Option<&'a str>,
}
