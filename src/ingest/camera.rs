//! Camera frame source.
//!
//! `CameraSource` picks a backend from the configured device string:
//! - `stub://<name>`: synthetic scenes, no hardware
//! - a local directory: replay of the image files it contains
//! - anything else: a V4L2 device node (feature: ingest-v4l2)

use anyhow::{anyhow, Result};
use std::path::Path;
use std::time::Instant;

use super::replay::ReplaySource;
#[cfg(feature = "ingest-v4l2")]
use super::v4l2::V4l2Capture;
use super::{frame_interval, DeviceClaim, FrameSource, FrameSourceProvider};
use crate::frame::Frame;

/// Configuration for a camera source.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device string (e.g., "/dev/video0", "stub://front", "/var/lib/sentinel/replay").
    pub device: String,
    /// Target frame rate (frames per second). Sources pace reads to this rate.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
    /// Synthetic only: frames per scene before the picture changes.
    pub scene_frames: u64,
    /// Synthetic only: end the stream after this many frames.
    pub max_frames: Option<u64>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "stub://camera0".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
            scene_frames: 50,
            max_frames: None,
        }
    }
}

impl FrameSourceProvider for CameraConfig {
    fn provide(&self) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(CameraSource::new(self.clone())?))
    }
}

/// Camera frame source with backend selection by device string.
pub struct CameraSource {
    device: String,
    backend: CameraBackend,
    claim: Option<DeviceClaim>,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    Replay(ReplaySource),
    #[cfg(feature = "ingest-v4l2")]
    Device(V4l2Capture),
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        let device = config.device.trim().to_string();
        if device.is_empty() {
            return Err(anyhow!("camera device must not be empty"));
        }
        let backend = if device.starts_with("stub://") {
            CameraBackend::Synthetic(SyntheticCamera::new(config))
        } else if Path::new(&device).is_dir() {
            CameraBackend::Replay(ReplaySource::new(&device, config.target_fps))
        } else {
            #[cfg(feature = "ingest-v4l2")]
            {
                CameraBackend::Device(V4l2Capture::new(config))
            }
            #[cfg(not(feature = "ingest-v4l2"))]
            {
                return Err(anyhow!(
                    "camera device {} requires the ingest-v4l2 feature",
                    device
                ));
            }
        };
        Ok(Self {
            device,
            backend,
            claim: None,
        })
    }

    pub fn is_open(&self) -> bool {
        self.claim.is_some()
    }
}

impl FrameSource for CameraSource {
    fn name(&self) -> String {
        self.device.clone()
    }

    fn open(&mut self) -> Result<()> {
        if self.claim.is_some() {
            return Ok(());
        }
        let claim = DeviceClaim::acquire(&self.device)?;
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.open(),
            CameraBackend::Replay(source) => source.open()?,
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.open()?,
        }
        self.claim = Some(claim);
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        if self.claim.is_none() {
            return Err(anyhow!("camera {} not open; call open() first", self.device));
        }
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.read(),
            CameraBackend::Replay(source) => source.read(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.read(),
        }
    }

    fn release(&mut self) {
        match &mut self.backend {
            CameraBackend::Synthetic(_) => {}
            CameraBackend::Replay(source) => source.release(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.release(),
        }
        if self.claim.take().is_some() {
            log::info!("CameraSource: released {}", self.device);
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.release();
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticCamera {
    config: CameraConfig,
    frame_count: u64,
    last_frame_at: Option<Instant>,
}

impl SyntheticCamera {
    fn new(config: CameraConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            last_frame_at: None,
        }
    }

    fn open(&mut self) {
        self.frame_count = 0;
        self.last_frame_at = None;
        log::info!("CameraSource: connected to {} (synthetic)", self.config.device);
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        if let Some(max) = self.config.max_frames {
            if self.frame_count >= max {
                return Ok(None);
            }
        }

        let min_interval = frame_interval(self.config.target_fps);
        if let Some(last) = self.last_frame_at {
            let since = last.elapsed();
            if since < min_interval {
                std::thread::sleep(min_interval - since);
            }
        }

        let pixels = self.scene_pixels()?;
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Frame::from_rgb(pixels, self.config.width, self.config.height).map(Some)
    }

    /// Solid picture per scene. The level steps every `scene_frames` frames so a
    /// brightness-based classifier sees stable runs separated by changes.
    fn scene_pixels(&self) -> Result<Vec<u8>> {
        let scene = self.frame_count / self.config.scene_frames.max(1);
        let level = (((scene % 256) * 97 + 16) % 256) as u8;
        let pixel_count = (self.config.width as usize)
            .checked_mul(self.config.height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| {
                anyhow!(
                    "synthetic frame {}x{} is too large",
                    self.config.width,
                    self.config.height
                )
            })?;
        Ok(vec![level; pixel_count])
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
