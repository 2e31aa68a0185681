//! Image-directory replay source.
//!
//! Replays the `.jpg/.jpeg/.png` files of a local directory in file-name order,
//! one frame per read, then reports end of stream. Useful for reproducing a
//! field recording without a camera attached.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::{frame_interval, FrameSource};
use crate::frame::Frame;

pub struct ReplaySource {
    dir: PathBuf,
    target_fps: u32,
    queue: Vec<PathBuf>,
    position: usize,
    last_frame_at: Option<Instant>,
}

impl ReplaySource {
    pub fn new(dir: impl AsRef<Path>, target_fps: u32) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            target_fps,
            queue: Vec::new(),
            position: 0,
            last_frame_at: None,
        }
    }

    pub fn remaining(&self) -> usize {
        self.queue.len().saturating_sub(self.position)
    }
}

impl FrameSource for ReplaySource {
    fn name(&self) -> String {
        self.dir.display().to_string()
    }

    fn open(&mut self) -> Result<()> {
        if !self.dir.is_dir() {
            return Err(anyhow!("replay directory {} not found", self.dir.display()));
        }
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir)
            .with_context(|| format!("list replay directory {}", self.dir.display()))?
        {
            let path = entry?.path();
            if path.is_file() && is_image_file(&path) {
                files.push(path);
            }
        }
        files.sort();
        log::info!(
            "ReplaySource: {} frames queued from {}",
            files.len(),
            self.dir.display()
        );
        self.queue = files;
        self.position = 0;
        self.last_frame_at = None;
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.queue.get(self.position).cloned() else {
            return Ok(None);
        };
        self.position += 1;

        let min_interval = frame_interval(self.target_fps);
        if let Some(last) = self.last_frame_at {
            let since = last.elapsed();
            if since < min_interval {
                std::thread::sleep(min_interval - since);
            }
        }

        let bytes = std::fs::read(&path)
            .with_context(|| format!("read replay frame {}", path.display()))?;
        let frame = Frame::decode(&bytes)
            .with_context(|| format!("decode replay frame {}", path.display()))?;
        self.last_frame_at = Some(Instant::now());
        Ok(Some(frame))
    }

    fn release(&mut self) {
        self.queue.clear();
        self.position = 0;
    }
}

pub(crate) fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            ext == "jpg" || ext == "jpeg" || ext == "png"
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};

    fn write_png(dir: &Path, name: &str, value: u8) {
        let image = RgbImage::from_pixel(4, 4, Rgb([value, value, value]));
        image
            .save_with_format(dir.join(name), ImageFormat::Png)
            .unwrap();
    }

    #[test]
    fn replays_images_in_name_order_then_ends() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_png(dir.path(), "b.png", 20);
        write_png(dir.path(), "a.png", 10);
        std::fs::write(dir.path().join("notes.txt"), b"ignored")?;

        let mut source = ReplaySource::new(dir.path(), 0);
        source.open()?;
        assert_eq!(source.remaining(), 2);

        let first = source.read()?.expect("first frame");
        assert_eq!(first.pixels()[0], 10);
        let second = source.read()?.expect("second frame");
        assert_eq!(second.pixels()[0], 20);
        assert!(source.read()?.is_none());
        Ok(())
    }

    #[test]
    fn corrupt_frame_is_a_read_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("broken.jpg"), b"not a jpeg")?;
        let mut source = ReplaySource::new(dir.path(), 0);
        source.open()?;
        assert!(source.read().is_err());
        Ok(())
    }

    #[test]
    fn missing_directory_fails_open() {
        let mut source = ReplaySource::new("/nonexistent/replay/dir", 0);
        assert!(source.open().is_err());
    }

    #[test]
    fn image_extension_filter() {
        assert!(is_image_file(Path::new("x.JPG")));
        assert!(is_image_file(Path::new("x.jpeg")));
        assert!(is_image_file(Path::new("x.png")));
        assert!(!is_image_file(Path::new("x.gif")));
        assert!(!is_image_file(Path::new("noext")));
    }
}
