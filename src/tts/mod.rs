//! Text-to-speech capability.
//!
//! [`SpeechSynthesizer`] is the seam the session speaks through.
//! [`speak_with_callbacks`] wraps any synthesizer with the start/end
//! notification contract: `on_end` fires exactly once for every call that
//! fired `on_start`, whether playback succeeds, fails, or the future is
//! dropped mid-utterance.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::audio::playback::{CpalPlayback, pcm16_le_to_f32};
use crate::config::{AudioConfig, TtsConfig};
use crate::error::{HarkError, Result};
use crate::pipeline::messages::SynthesizedAudio;

/// Speaks text aloud, returning once playback has finished.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize and play `text`.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Tts`] or [`HarkError::Audio`] on failure.
    async fn speak(&self, text: &str) -> Result<()>;
}

/// Runs `on_end` when dropped unless already fired.
struct EndGuard<F: FnOnce()> {
    on_end: Option<F>,
}

impl<F: FnOnce()> Drop for EndGuard<F> {
    fn drop(&mut self) {
        if let Some(on_end) = self.on_end.take() {
            on_end();
        }
    }
}

/// Speak `text`, bracketing playback with `on_start` / `on_end`.
///
/// Empty text is skipped without firing either callback.
///
/// # Errors
///
/// Propagates the synthesizer's error after `on_end` has fired.
pub async fn speak_with_callbacks<S, E>(
    synth: &dyn SpeechSynthesizer,
    text: &str,
    on_start: S,
    on_end: E,
) -> Result<()>
where
    S: FnOnce(),
    E: FnOnce(),
{
    if text.trim().is_empty() {
        info!("no text to speak");
        return Ok(());
    }

    let guard = EndGuard {
        on_end: Some(on_end),
    };
    on_start();
    let result = synth.speak(text).await;
    if let Err(ref e) = result {
        warn!("speech failed: {e}");
    }
    drop(guard);
    result
}

// ── ElevenLabs ──────────────────────────────────────────────────

/// Synthesizer backed by the ElevenLabs HTTP API, played through cpal.
pub struct ElevenLabsSynthesizer {
    client: reqwest::Client,
    config: TtsConfig,
    api_key: String,
    audio: AudioConfig,
}

impl std::fmt::Debug for ElevenLabsSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElevenLabsSynthesizer")
            .field("voice_id", &self.config.voice_id)
            .field("model_id", &self.config.model_id)
            .finish()
    }
}

impl ElevenLabsSynthesizer {
    /// Create a synthesizer.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Config`] if no API key is configured.
    pub fn new(config: &TtsConfig, audio: &AudioConfig) -> Result<Self> {
        let api_key = config
            .resolved_api_key()
            .ok_or_else(|| HarkError::Config("ELEVENLABS_API_KEY is not set".into()))?;
        info!("TTS configured with voice: {}", config.voice_id);
        Ok(Self {
            client: reqwest::Client::new(),
            config: config.clone(),
            api_key,
            audio: audio.clone(),
        })
    }

    /// Request raw PCM audio for `text`.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Tts`] if the request fails.
    pub async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        let sample_rate = self.audio.output_sample_rate;
        let url = format!(
            "{}/v1/text-to-speech/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.voice_id
        );
        let response = self
            .client
            .post(url)
            .query(&[("output_format", format!("pcm_{sample_rate}"))])
            .header("xi-api-key", &self.api_key)
            .json(&serde_json::json!({
                "text": text,
                "model_id": self.config.model_id,
            }))
            .send()
            .await
            .map_err(|e| HarkError::Tts(format!("synthesis request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HarkError::Tts(format!(
                "synthesis HTTP {}: {body}",
                status.as_u16()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| HarkError::Tts(format!("cannot read synthesis body: {e}")))?;
        Ok(SynthesizedAudio {
            samples: pcm16_le_to_f32(&bytes),
            sample_rate,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    async fn speak(&self, text: &str) -> Result<()> {
        let audio = self.synthesize(text).await?;
        let audio_config = self.audio.clone();
        tokio::task::spawn_blocking(move || CpalPlayback::new(&audio_config)?.play(&audio))
            .await
            .map_err(|e| HarkError::Audio(format!("playback task failed: {e}")))?
    }
}
