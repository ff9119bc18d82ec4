//! Microphone audio capture using cpal.
//!
//! Captures audio at the device's native sample rate, downsamples to the
//! configured input rate, and slices the stream into fixed-size frames for
//! the endpointer.

use crate::config::AudioConfig;
use crate::error::{HarkError, Result};
use crate::pipeline::messages::AudioChunk;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Audio capture from the system microphone via cpal.
pub struct CpalCapture {
    device: cpal::Device,
    stream_config: StreamConfig,
    target_sample_rate: u32,
    frame_size: usize,
}

impl CpalCapture {
    /// Open the configured (or default) input device.
    ///
    /// # Errors
    ///
    /// Returns an error if no input device is available.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(ref name) = config.input_device {
            host.input_devices()
                .map_err(|e| HarkError::Audio(format!("cannot enumerate devices: {e}")))?
                .find(|d| {
                    d.description()
                        .ok()
                        .map(|desc| desc.name() == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| HarkError::Audio(format!("input device '{name}' not found")))?
        } else {
            host.default_input_device()
                .ok_or_else(|| HarkError::Audio("no default input device".into()))?
        };

        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using input device: {device_name}");

        let default_config = device
            .default_input_config()
            .map_err(|e| HarkError::Audio(format!("no default input config: {e}")))?;

        let stream_config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: default_config.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        info!(
            native_rate = stream_config.sample_rate,
            channels = stream_config.channels,
            target_rate = config.input_sample_rate,
            frame_size = config.frame_size,
            "input stream configured"
        );

        Ok(Self {
            device,
            stream_config,
            target_sample_rate: config.input_sample_rate,
            frame_size: config.frame_size.max(1),
        })
    }

    /// Run the capture loop, sending fixed-size frames to `tx`.
    ///
    /// Holds the device until `cancel` fires or the stream reports an
    /// error. A stream error stops capture: it is delivered to the consumer
    /// as a final `Err` item, then `tx` is dropped so the channel closes.
    ///
    /// # Errors
    ///
    /// Returns an error if the audio stream cannot be created or started,
    /// or the device error that stopped it.
    pub async fn run(
        &self,
        tx: mpsc::Sender<Result<AudioChunk>>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let native_rate = self.stream_config.sample_rate;
        let native_channels = self.stream_config.channels;
        let target_rate = self.target_sample_rate;
        let data_tx = tx.clone();
        let (failed_tx, mut failed_rx) = watch::channel(None::<String>);
        let mut slicer = FrameSlicer::new(self.frame_size);

        let stream = self
            .device
            .build_input_stream(
                &self.stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    let mono = if native_channels > 1 {
                        to_mono(data, native_channels)
                    } else {
                        data.to_vec()
                    };
                    let samples = downsample(&mono, native_rate, target_rate);

                    for frame in slicer.push(&samples) {
                        // Never block the audio thread.
                        if data_tx
                            .try_send(Ok(AudioChunk::new(frame, target_rate)))
                            .is_err()
                        {
                            debug!("audio channel full, dropping frame");
                        }
                    }
                },
                move |err| {
                    error!("audio input stream error: {err}");
                    failed_tx.send_replace(Some(format!("input stream error: {err}")));
                },
                None,
            )
            .map_err(|e| HarkError::Audio(format!("failed to build input stream: {e}")))?;

        stream
            .play()
            .map_err(|e| HarkError::Audio(format!("failed to start input stream: {e}")))?;

        info!("audio capture started");

        let failure = tokio::select! {
            () = cancel.cancelled() => None,
            changed = failed_rx.changed() => match changed {
                Ok(()) => failed_rx.borrow_and_update().clone(),
                Err(_) => None,
            },
        };

        drop(stream);
        info!("audio capture stopped");
        match failure {
            Some(message) => {
                // Waits for room so the consumer always sees the failure.
                if tx.send(Err(HarkError::Audio(message.clone()))).await.is_err() {
                    debug!("audio consumer gone before the device error was delivered");
                }
                Err(HarkError::Audio(message))
            }
            None => Ok(()),
        }
    }

    /// List available input devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_input_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| HarkError::Audio(format!("cannot enumerate devices: {e}")))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }
}

/// Regroups arbitrarily sized callback buffers into fixed-size frames.
pub(crate) struct FrameSlicer {
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameSlicer {
    pub(crate) fn new(frame_size: usize) -> Self {
        Self {
            frame_size: frame_size.max(1),
            pending: Vec::with_capacity(frame_size.max(1) * 2),
        }
    }

    /// Append samples and return every complete frame now available.
    pub(crate) fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);
        let complete = self.pending.len() / self.frame_size;
        if complete == 0 {
            return Vec::new();
        }
        let rest = self.pending.split_off(complete * self.frame_size);
        let full = std::mem::replace(&mut self.pending, rest);
        full.chunks_exact(self.frame_size).map(<[f32]>::to_vec).collect()
    }
}

/// Convert interleaved multi-channel audio to mono by averaging channels.
fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = channels as usize;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Linear-interpolation resampler; speech energy sits well below the new Nyquist.
fn downsample(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() || dst_rate == 0 {
        return samples.to_vec();
    }

    let ratio = f64::from(src_rate) / f64::from(dst_rate);
    let out_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            f64::from(samples[idx]) * (1.0 - frac) + f64::from(samples[idx + 1]) * frac
        } else {
            f64::from(samples[idx.min(samples.len() - 1)])
        };

        output.push(sample as f32);
    }

    output
}
