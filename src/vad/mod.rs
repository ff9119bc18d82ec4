//! Energy-based utterance endpointing.
//!
//! [`AudioEndpointer`] turns a stream of fixed-size frames into bounded
//! [`Utterance`]s. Each frame's RMS energy is compared against a threshold:
//!
//! - `Armed`: waiting for the first frame above the threshold.
//! - `Capturing`: accumulating frames.
//! - `Draining`: counting consecutive quiet frames after the minimum
//!   capture length has been reached.
//!
//! An utterance is emitted once enough consecutive silence accumulates, or
//! unconditionally when the maximum recording length is reached. Emitted
//! buffers are always between the minimum and maximum lengths.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::audio::FrameSource;
use crate::config::EndpointConfig;
use crate::error::Result;
use crate::pipeline::messages::{AudioChunk, Utterance};

/// Endpointer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// Waiting for voiced audio.
    Armed,
    /// Accumulating an utterance.
    Capturing,
    /// Counting trailing silence.
    Draining,
}

/// Segments a live frame stream into utterances.
pub struct AudioEndpointer {
    state: EndpointState,
    buffer: Vec<f32>,
    started_at: Option<Instant>,
    silent_samples: usize,
    sample_rate: u32,
    energy_threshold: f32,
    min_samples: usize,
    max_samples: usize,
    silence_samples: usize,
}

impl AudioEndpointer {
    /// Create an endpointer for frames delivered at `sample_rate`.
    pub fn new(config: &EndpointConfig, sample_rate: u32) -> Self {
        let min_samples = EndpointConfig::samples_for_ms(config.min_audio_length_ms, sample_rate);
        let max_samples =
            EndpointConfig::samples_for_ms(config.max_recording_duration_ms, sample_rate)
                .max(min_samples)
                .max(1);
        let silence_samples =
            EndpointConfig::samples_for_ms(config.silence_duration_ms, sample_rate).max(1);

        info!(
            threshold = config.energy_threshold,
            min_ms = config.min_audio_length_ms,
            max_ms = config.max_recording_duration_ms,
            silence_ms = config.silence_duration_ms,
            "endpointer initialized"
        );

        Self {
            state: EndpointState::Armed,
            buffer: Vec::with_capacity(max_samples),
            started_at: None,
            silent_samples: 0,
            sample_rate,
            energy_threshold: config.energy_threshold,
            min_samples,
            max_samples,
            silence_samples,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> EndpointState {
        self.state
    }

    /// Discard any partial utterance and re-arm.
    pub fn reset(&mut self) {
        self.state = EndpointState::Armed;
        self.buffer.clear();
        self.started_at = None;
        self.silent_samples = 0;
    }

    /// Feed one frame; returns an utterance when one completes.
    pub fn process_frame(&mut self, chunk: &AudioChunk) -> Option<Utterance> {
        let energy = compute_rms_energy(&chunk.samples);
        let voiced = energy > self.energy_threshold;

        match self.state {
            EndpointState::Armed => {
                if !voiced {
                    return None;
                }
                debug!(energy, "speech onset");
                self.state = EndpointState::Capturing;
                self.started_at = Some(chunk.captured_at);
                self.buffer.clear();
                self.silent_samples = 0;
                self.buffer.extend_from_slice(&chunk.samples);
            }
            EndpointState::Capturing => {
                self.buffer.extend_from_slice(&chunk.samples);
                if !voiced && self.buffer.len() >= self.min_samples {
                    self.state = EndpointState::Draining;
                    self.silent_samples = chunk.samples.len();
                }
            }
            EndpointState::Draining => {
                self.buffer.extend_from_slice(&chunk.samples);
                if voiced {
                    self.state = EndpointState::Capturing;
                    self.silent_samples = 0;
                } else {
                    self.silent_samples += chunk.samples.len();
                }
            }
        }

        if self.buffer.len() >= self.max_samples {
            self.buffer.truncate(self.max_samples);
            debug!("maximum recording length reached");
            return Some(self.emit());
        }

        if self.state == EndpointState::Draining && self.silent_samples >= self.silence_samples {
            return Some(self.emit());
        }

        None
    }

    fn emit(&mut self) -> Utterance {
        let samples = std::mem::take(&mut self.buffer);
        let started_at = self.started_at.take().unwrap_or_else(Instant::now);
        self.reset();
        let utterance = Utterance {
            samples,
            sample_rate: self.sample_rate,
            started_at,
        };
        info!(
            duration_ms = utterance.duration().as_millis() as u64,
            "utterance complete"
        );
        utterance
    }

    /// Read frames until one utterance completes.
    ///
    /// Returns `Ok(None)` when the stream ends or `cancel` fires.
    ///
    /// # Errors
    ///
    /// Device errors from `source` stop the endpointer and are returned.
    pub async fn next_utterance<S>(
        &mut self,
        source: &mut S,
        cancel: &CancellationToken,
    ) -> Result<Option<Utterance>>
    where
        S: FrameSource + ?Sized,
    {
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            let frame = tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                frame = source.next_frame() => frame?,
            };
            let Some(frame) = frame else {
                self.reset();
                return Ok(None);
            };
            if let Some(utterance) = self.process_frame(&frame) {
                return Ok(Some(utterance));
            }
        }
    }

    /// Record a single command.
    ///
    /// Gives up with `Ok(None)` if speech has not started within `timeout`.
    /// Once speech starts the utterance runs to completion.
    ///
    /// # Errors
    ///
    /// Device errors from `source` are returned.
    pub async fn listen_once<S>(
        &mut self,
        source: &mut S,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<Utterance>>
    where
        S: FrameSource + ?Sized,
    {
        self.reset();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            let frame = if self.state == EndpointState::Armed {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(None),
                    _ = tokio::time::sleep_until(deadline) => {
                        debug!("no speech before listen timeout");
                        return Ok(None);
                    }
                    frame = source.next_frame() => frame?,
                }
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(None),
                    frame = source.next_frame() => frame?,
                }
            };
            let Some(frame) = frame else {
                self.reset();
                return Ok(None);
            };
            if let Some(utterance) = self.process_frame(&frame) {
                return Ok(Some(utterance));
            }
        }
    }

    /// Run until the stream ends or `cancel` fires, handing every utterance
    /// to `on_utterance`.
    ///
    /// # Errors
    ///
    /// A device error is fatal; the caller must restart the endpointer.
    pub async fn run<S, F>(
        &mut self,
        source: &mut S,
        cancel: &CancellationToken,
        mut on_utterance: F,
    ) -> Result<()>
    where
        S: FrameSource + ?Sized,
        F: FnMut(Utterance),
    {
        while let Some(utterance) = self.next_utterance(source, cancel).await? {
            on_utterance(utterance);
        }
        Ok(())
    }
}

/// Compute RMS energy of audio samples.
pub fn compute_rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}
