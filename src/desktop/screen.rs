//! Screen capture capability.

use std::io::Cursor;
use std::path::PathBuf;

use async_trait::async_trait;
use base64::Engine;
use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;
use tracing::debug;

use crate::error::{HarkError, Result};

/// A captured frame of the screen.
#[derive(Debug, Clone)]
pub struct Screenshot {
    /// Decoded image.
    pub image: DynamicImage,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Screenshot {
    /// Wrap a decoded image.
    pub fn new(image: DynamicImage) -> Self {
        let (width, height) = (image.width(), image.height());
        Self {
            image,
            width,
            height,
        }
    }

    /// Encode as JPEG at `quality` (1-100).
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Screen`] if encoding fails.
    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        let rgb = self.image.to_rgb8();
        JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
            .encode_image(&rgb)
            .map_err(|e| HarkError::Screen(format!("JPEG encoding failed: {e}")))?;
        Ok(buf.into_inner())
    }

    /// Encode as base64 JPEG.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Screen`] if encoding fails.
    pub fn to_jpeg_base64(&self, quality: u8) -> Result<String> {
        Ok(base64::engine::general_purpose::STANDARD.encode(self.to_jpeg(quality)?))
    }
}

/// Grabs the current screen contents.
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    /// Capture the full screen.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Screen`] when no frame can be produced.
    async fn capture(&self) -> Result<Screenshot>;
}

/// Screen capture by shelling out to `scrot` (Linux) or `screencapture`
/// (macOS) and decoding the PNG it writes.
#[derive(Debug, Clone)]
pub struct CommandScreenCapture {
    program: String,
    args: Vec<String>,
}

impl CommandScreenCapture {
    /// The platform default tool.
    pub fn detect() -> Self {
        if cfg!(target_os = "macos") {
            Self::with_command("screencapture", &["-x"])
        } else {
            Self::with_command("scrot", &["--overwrite"])
        }
    }

    /// Use a custom program. The output path is appended as the last argument.
    pub fn with_command(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_owned(),
            args: args.iter().map(|a| (*a).to_owned()).collect(),
        }
    }

    fn capture_blocking(program: &str, args: &[String]) -> Result<Screenshot> {
        let path: PathBuf = std::env::temp_dir().join(format!(
            "hark_screenshot_{}.png",
            uuid::Uuid::new_v4().simple()
        ));
        let status = std::process::Command::new(program)
            .args(args)
            .arg(&path)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map_err(|e| HarkError::Screen(format!("failed to spawn {program}: {e}")))?;
        if !status.success() {
            let _ = std::fs::remove_file(&path);
            return Err(HarkError::Screen(format!(
                "{program} exited with code {}",
                status.code().unwrap_or(-1)
            )));
        }
        let decoded = image::open(&path);
        let _ = std::fs::remove_file(&path);
        let image =
            decoded.map_err(|e| HarkError::Screen(format!("cannot decode screenshot: {e}")))?;
        Ok(Screenshot::new(image))
    }
}

impl Default for CommandScreenCapture {
    fn default() -> Self {
        Self::detect()
    }
}

#[async_trait]
impl ScreenCapture for CommandScreenCapture {
    async fn capture(&self) -> Result<Screenshot> {
        let program = self.program.clone();
        let args = self.args.clone();
        let shot = tokio::task::spawn_blocking(move || Self::capture_blocking(&program, &args))
            .await
            .map_err(|e| HarkError::Screen(format!("capture task failed: {e}")))??;
        debug!(width = shot.width, height = shot.height, "screen captured");
        Ok(shot)
    }
}
