//! Default collaborator implementations.
//!
//! Everything here is swappable behind the `runtime::collaborators` traits;
//! the server wires these in, tests wire in mocks.

pub mod recognition;
pub mod synthesis;
pub mod translation;
pub mod tts;
pub mod vad;

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::audio::AudioEngine;
use crate::config::Config;
use crate::runtime::Collaborators;

pub use recognition::{check_api_key, ApiRecognizer};
pub use synthesis::FfmpegRenderer;
pub use translation::ApiTranslator;
pub use tts::ApiSynthesizer;
pub use vad::EnergyVad;

/// The production collaborator set: energy VAD, API clients for ASR,
/// translation and TTS, and the ffmpeg renderer.
pub fn default_collaborators(
    audio: Arc<AudioEngine>,
    config: Arc<RwLock<Config>>,
) -> Collaborators {
    Collaborators {
        vad: Arc::new(EnergyVad::new(Arc::clone(&audio), Arc::clone(&config))),
        recognizer: Arc::new(ApiRecognizer::new(Arc::clone(&audio), Arc::clone(&config))),
        translator: Arc::new(ApiTranslator::new(Arc::clone(&config))),
        synthesizer: Arc::new(ApiSynthesizer::new(Arc::clone(&audio), Arc::clone(&config))),
        renderer: Arc::new(FfmpegRenderer::new(audio, config)),
    }
}
