//! Audio capture and playback via cpal, and the frame source seam the
//! endpointer reads from.

pub mod capture;
pub mod playback;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{HarkError, Result};
use crate::pipeline::messages::AudioChunk;

/// A stream of fixed-size audio frames.
///
/// The microphone handle behind a source is owned by whoever holds the
/// source; only one component reads from it at a time.
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next frame. `Ok(None)` means the stream ended.
    ///
    /// # Errors
    ///
    /// Returns the device error that stopped the stream.
    async fn next_frame(&mut self) -> Result<Option<AudioChunk>>;

    /// Discard frames that queued up while nobody was listening.
    fn drain(&mut self) -> usize {
        0
    }
}

/// Frames arriving over a channel from [`capture::CpalCapture`].
///
/// A device error met while draining is held back and returned by the
/// next [`next_frame`](FrameSource::next_frame), so it is never lost.
pub struct ChannelSource {
    rx: mpsc::Receiver<Result<AudioChunk>>,
    pending_error: Option<HarkError>,
}

impl ChannelSource {
    /// Read frames from `rx`.
    pub fn new(rx: mpsc::Receiver<Result<AudioChunk>>) -> Self {
        Self {
            rx,
            pending_error: None,
        }
    }
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn next_frame(&mut self) -> Result<Option<AudioChunk>> {
        if let Some(e) = self.pending_error.take() {
            return Err(e);
        }
        match self.rx.recv().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    fn drain(&mut self) -> usize {
        let mut dropped = 0;
        while self.pending_error.is_none() {
            match self.rx.try_recv() {
                Ok(Ok(_)) => dropped += 1,
                Ok(Err(e)) => {
                    tracing::warn!("device error queued during drain: {e}");
                    self.pending_error = Some(e);
                }
                Err(_) => break,
            }
        }
        dropped
    }
}
