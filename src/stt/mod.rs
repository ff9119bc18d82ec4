//! Speech-to-text capability.
//!
//! The session only depends on the [`Transcriber`] trait. [`HttpTranscriber`]
//! posts WAV audio to an OpenAI-compatible `/v1/audio/transcriptions`
//! endpoint (whisper.cpp server, faster-whisper-server, hosted APIs).

use std::io::Cursor;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::SttConfig;
use crate::error::{HarkError, Result};
use crate::pipeline::messages::{Transcription, Utterance};

/// Converts an utterance to text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe `utterance`.
    ///
    /// Empty or near-silent input yields an empty string, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Stt`] when the engine fails.
    async fn transcribe(&self, utterance: &Utterance, language: &str) -> Result<String>;
}

/// Transcribe and stamp the result with timing information.
///
/// # Errors
///
/// Propagates the transcriber's error.
pub async fn transcribe_timed(
    transcriber: &dyn Transcriber,
    utterance: &Utterance,
    language: &str,
) -> Result<Transcription> {
    let text = transcriber.transcribe(utterance, language).await?;
    let transcription = Transcription {
        text: text.trim().to_owned(),
        audio_captured_at: utterance.started_at,
        transcribed_at: Instant::now(),
    };
    debug!(
        latency_ms = transcription
            .transcribed_at
            .duration_since(transcription.audio_captured_at)
            .as_millis() as u64,
        "transcription complete"
    );
    Ok(transcription)
}

/// Encode mono f32 samples as a 16-bit PCM WAV file in memory.
///
/// # Errors
///
/// Returns an error if the WAV writer fails.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| HarkError::Stt(format!("cannot create WAV writer: {e}")))?;
        for &s in samples {
            let v = (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
            writer
                .write_sample(v)
                .map_err(|e| HarkError::Stt(format!("cannot write WAV sample: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| HarkError::Stt(format!("cannot finalize WAV: {e}")))?;
    }
    Ok(cursor.into_inner())
}

/// Transcriber backed by an OpenAI-compatible HTTP endpoint.
pub struct HttpTranscriber {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for HttpTranscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTranscriber")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl HttpTranscriber {
    /// Create a transcriber from configuration.
    pub fn new(config: &SttConfig) -> Self {
        info!("STT configured: {} ({})", config.base_url, config.model);
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            model: config.model.clone(),
            api_key: config.resolved_api_key(),
        }
    }
}

#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, utterance: &Utterance, language: &str) -> Result<String> {
        if utterance.is_empty() {
            return Ok(String::new());
        }

        let wav = encode_wav(&utterance.samples, utterance.sample_rate)?;
        let file = reqwest::multipart::Part::bytes(wav)
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| HarkError::Stt(format!("invalid mime type: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("language", language.to_owned())
            .text("response_format", "json");

        let mut request = self
            .client
            .post(format!("{}/v1/audio/transcriptions", self.base_url))
            .multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| HarkError::Stt(format!("transcription request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HarkError::Stt(format!(
                "transcription HTTP {}: {body}",
                status.as_u16()
            )));
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| HarkError::Stt(format!("invalid transcription response: {e}")))?;
        Ok(parsed.text.trim().to_owned())
    }
}
