//! Frame sources.
//!
//! This module provides the sources the stream worker pulls frames from:
//! - Synthetic camera (`stub://<name>`) for tests and demos
//! - Image-directory replay (any local directory path)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//!
//! Every source follows the same lifecycle: `open()` acquires the device and
//! fails fast when it is missing or busy, `read()` yields frames until end of
//! stream (`Ok(None)`) or an unrecoverable error, and `release()` gives the
//! device back. Devices are claimed in a process-wide registry so two sessions
//! cannot hold the same camera at once.

mod camera;
mod replay;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use crate::frame::Frame;

pub use camera::{CameraConfig, CameraSource};
pub(crate) use replay::is_image_file;
pub use replay::ReplaySource;

/// A device that yields frames.
pub trait FrameSource: Send {
    /// Human-readable identifier (device path or URL).
    fn name(&self) -> String;

    /// Acquire the device. Errors mean the camera is unavailable.
    fn open(&mut self) -> Result<()>;

    /// Next frame, `Ok(None)` at end of stream.
    fn read(&mut self) -> Result<Option<Frame>>;

    /// Give the device back. Must be idempotent.
    fn release(&mut self);
}

/// Creates a fresh frame source for each stream session.
pub trait FrameSourceProvider: Send + Sync {
    fn provide(&self) -> Result<Box<dyn FrameSource>>;
}

// ----------------------------------------------------------------------------
// Device claims
// ----------------------------------------------------------------------------

fn claimed_devices() -> &'static Mutex<HashSet<String>> {
    static CLAIMED: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    CLAIMED.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Exclusive in-process hold on a device. Released on drop.
#[derive(Debug)]
pub struct DeviceClaim {
    device: String,
}

impl DeviceClaim {
    pub fn acquire(device: &str) -> Result<Self> {
        let mut claimed = claimed_devices()
            .lock()
            .map_err(|_| anyhow!("device claim registry lock poisoned"))?;
        if !claimed.insert(device.to_string()) {
            return Err(anyhow!("device {} is busy", device));
        }
        Ok(Self {
            device: device.to_string(),
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

impl Drop for DeviceClaim {
    fn drop(&mut self) {
        if let Ok(mut claimed) = claimed_devices().lock() {
            claimed.remove(&self.device);
        }
    }
}

pub(crate) fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}
