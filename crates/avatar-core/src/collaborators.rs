//! Interfaces to the external collaborators of the simulation loop and the
//! dispatch step: the emulator, perception, policy inference and speech
//! synthesis.
//!
//! Only the seams live here. The concrete backends (emulator cores,
//! vision models, trained policies, speech services) are plugged in by the
//! binary. A few small implementations are provided for headless runs and
//! tests.

use std::future::Future;
use std::sync::Arc;

use avatar_types::{AudioPayload, Button};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Errors reported by a collaborator.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    /// The collaborator has not been initialised (model not loaded, ROM
    /// missing, ...).
    #[error("{what} is not initialised")]
    NotReady {
        /// Which collaborator.
        what: &'static str,
    },

    /// The collaborator failed while handling a request.
    #[error("{what} failed: {message}")]
    Failed {
        /// Which collaborator.
        what: &'static str,
        /// Description of the failure.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// An RGB screen capture, shared read-only with worker threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Row-major RGB bytes.
    pub pixels: Arc<[u8]>,
}

impl Frame {
    /// A frame filled with one grey level.
    pub fn filled(width: u32, height: u32, level: u8) -> Self {
        let len = usize::try_from(u64::from(width).saturating_mul(u64::from(height)).saturating_mul(3))
            .unwrap_or(0);
        Self {
            width,
            height,
            pixels: vec![level; len].into(),
        }
    }

    /// Mean value over every channel of every pixel.
    pub fn mean_level(&self) -> f64 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.pixels.iter().map(|p| u64::from(*p)).sum();
        #[allow(clippy::cast_precision_loss)]
        let mean = sum as f64 / self.pixels.len() as f64;
        mean
    }

    /// Fraction of bright bytes in the bottom `rows` rows.
    pub fn bottom_bright_ratio(&self, rows: u32) -> f64 {
        let row_len = usize::try_from(self.width).unwrap_or(0).saturating_mul(3);
        let rows = usize::try_from(rows.min(self.height)).unwrap_or(0);
        let start = self.pixels.len().saturating_sub(row_len.saturating_mul(rows));
        let Some(region) = self.pixels.get(start..) else {
            return 0.0;
        };
        if region.is_empty() {
            return 0.0;
        }
        let bright = region.iter().filter(|p| **p > 200).count();
        #[allow(clippy::cast_precision_loss)]
        let ratio = bright as f64 / region.len() as f64;
        ratio
    }
}

/// Numeric game-state features fed to the policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Feature vector, each entry normalised to `0.0..=1.0`.
    pub features: Vec<f32>,
}

/// What the screen currently shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenKind {
    /// Could not tell.
    #[default]
    Unknown,
    /// Walking around the map.
    Overworld,
    /// In a battle.
    Battle,
    /// A menu is open.
    Menu,
    /// A dialog box is open.
    Dialog,
    /// Title screen.
    Title,
}

/// Result of one perception pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerceptionReport {
    /// Screen classification.
    pub screen: ScreenKind,
    /// Classifier confidence in `0.0..=1.0`.
    pub confidence: f32,
    /// Whether the health bar looks low.
    pub low_hp: bool,
    /// Whether a text box is visible.
    pub text_box: bool,
}

/// Immutable input handed to the policy on a worker thread.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyInput {
    /// Game-state features at dispatch time.
    pub observation: Observation,
    /// Most recent cached perception, if any.
    pub perception: Option<PerceptionReport>,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// The emulated environment. Mutated only by the simulation loop.
pub trait Emulator: Send {
    /// Advance by exactly one frame.
    fn tick(&mut self) -> Result<(), CollaboratorError>;

    /// Press and hold a button.
    fn press(&mut self, button: Button);

    /// Release a held button.
    fn release(&mut self, button: Button);

    /// Snapshot of the current game-state features.
    fn observation(&self) -> Observation;

    /// Snapshot of the current screen, if one is available.
    fn frame(&self) -> Option<Frame>;

    /// Persist the current state.
    fn save_state(&mut self) -> Result<(), CollaboratorError>;

    /// Restore the last persisted state.
    fn load_state(&mut self) -> Result<(), CollaboratorError>;
}

/// Screen classifier, invoked off the tick thread.
pub trait PerceptionAnalyzer: Send + Sync {
    /// Classify a frame.
    fn analyze(&self, frame: &Frame) -> Result<PerceptionReport, CollaboratorError>;
}

/// Action policy, invoked off the tick thread.
pub trait Policy: Send + Sync {
    /// Whether a model is loaded.
    fn is_ready(&self) -> bool;

    /// Pick an action index in `0..Button::ACTION_SPACE`.
    fn predict(&self, input: &PolicyInput) -> Result<usize, CollaboratorError>;
}

/// Text-to-speech backend.
pub trait SpeechSynthesizer: Send + Sync {
    /// Render `text` to audio. `None` means "send text only".
    fn synthesize(&self, text: &str) -> impl Future<Output = Option<AudioPayload>> + Send;
}

/// Query `policy`, falling back to a uniformly random action when it is
/// not ready or fails.
pub fn predict_or_random(policy: &dyn Policy, input: &PolicyInput) -> usize {
    if policy.is_ready() {
        match policy.predict(input) {
            Ok(index) if index < Button::ACTION_SPACE => return index,
            Ok(index) => debug!(index = index, "policy returned out-of-range action"),
            Err(e) => debug!(error = %e, "policy failed, using random action"),
        }
    }
    rand::rng().random_range(0..Button::ACTION_SPACE)
}

// ---------------------------------------------------------------------------
// Built-in implementations
// ---------------------------------------------------------------------------

/// Speech backend that never produces audio.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSpeech;

impl SpeechSynthesizer for NoSpeech {
    fn synthesize(&self, _text: &str) -> impl Future<Output = Option<AudioPayload>> + Send {
        std::future::ready(None)
    }
}

/// Colour-statistics classifier for when no vision model is available.
///
/// Dark screens read as battles, bright screens as menus (or dialogs when
/// the bottom rows hold a text box), anything else as the overworld.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrightnessAnalyzer;

impl PerceptionAnalyzer for BrightnessAnalyzer {
    fn analyze(&self, frame: &Frame) -> Result<PerceptionReport, CollaboratorError> {
        if frame.pixels.is_empty() {
            return Err(CollaboratorError::Failed {
                what: "perception",
                message: "empty frame".to_owned(),
            });
        }
        let mean = frame.mean_level();
        let text_box = frame.bottom_bright_ratio(48) > 0.5;
        let (screen, confidence) = if mean < 100.0 {
            (ScreenKind::Battle, 0.7)
        } else if mean > 200.0 {
            if text_box {
                (ScreenKind::Dialog, 0.6)
            } else {
                (ScreenKind::Menu, 0.5)
            }
        } else {
            (ScreenKind::Overworld, 0.5)
        };
        Ok(PerceptionReport {
            screen,
            confidence,
            low_hp: false,
            text_box,
        })
    }
}

/// Policy with no model loaded; always defers to the random fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnloadedPolicy;

impl Policy for UnloadedPolicy {
    fn is_ready(&self) -> bool {
        false
    }

    fn predict(&self, _input: &PolicyInput) -> Result<usize, CollaboratorError> {
        Err(CollaboratorError::NotReady { what: "policy" })
    }
}

/// Emulator stand-in that renders a blank screen and remembers which
/// buttons are held. Used for headless runs.
#[derive(Debug, Clone, Default)]
pub struct HeadlessEmulator {
    frames: u64,
    held: Vec<Button>,
    saved_frames: Option<u64>,
}

impl HeadlessEmulator {
    /// Create a headless emulator at frame zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames advanced so far.
    pub const fn frames(&self) -> u64 {
        self.frames
    }

    /// Buttons currently held.
    pub fn held(&self) -> &[Button] {
        &self.held
    }
}

impl Emulator for HeadlessEmulator {
    fn tick(&mut self) -> Result<(), CollaboratorError> {
        self.frames = self.frames.saturating_add(1);
        Ok(())
    }

    fn press(&mut self, button: Button) {
        if !self.held.contains(&button) {
            self.held.push(button);
        }
    }

    fn release(&mut self, button: Button) {
        self.held.retain(|b| *b != button);
    }

    fn observation(&self) -> Observation {
        Observation {
            features: vec![0.0; 10],
        }
    }

    fn frame(&self) -> Option<Frame> {
        Some(Frame::filled(160, 144, 128))
    }

    fn save_state(&mut self) -> Result<(), CollaboratorError> {
        self.saved_frames = Some(self.frames);
        Ok(())
    }

    fn load_state(&mut self) -> Result<(), CollaboratorError> {
        self.frames = self.saved_frames.ok_or_else(|| CollaboratorError::Failed {
            what: "emulator",
            message: "no saved state".to_owned(),
        })?;
        Ok(())
    }
}
