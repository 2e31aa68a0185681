//! Preview snapshots.
//!
//! Stills are downscaled to a square and written as JPEG into the previews
//! directory under `preview_<epoch_ms>.jpg`. Files are write-once; readers list
//! them newest-first and fetch them by name.

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::SystemTime;

use crate::error::OperationError;
use crate::frame::{encode_jpeg, Frame};
use crate::ingest::is_image_file;
use crate::store::write_atomic;

#[derive(Clone, Debug)]
pub struct PreviewConfig {
    pub dir: PathBuf,
    /// Side of the square preview, in pixels.
    pub size: u32,
    pub jpeg_quality: u8,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("previews"),
            size: 320,
            jpeg_quality: 75,
        }
    }
}

pub struct PreviewStore {
    config: PreviewConfig,
    save_lock: Mutex<()>,
}

impl PreviewStore {
    pub fn new(config: PreviewConfig) -> Result<Self> {
        if config.size == 0 {
            return Err(anyhow!("preview size must be positive"));
        }
        if !(1..=100).contains(&config.jpeg_quality) {
            return Err(anyhow!(
                "preview jpeg quality must be in 1..=100, got {}",
                config.jpeg_quality
            ));
        }
        Ok(Self {
            config,
            save_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    /// Downscale, encode and persist a frame. Returns the preview's file name.
    pub fn save(&self, frame: &Frame) -> Result<String> {
        let resized = frame.resized(self.config.size, self.config.size)?;
        let jpeg = encode_jpeg(&resized, self.config.jpeg_quality)?;

        let _guard = self
            .save_lock
            .lock()
            .map_err(|_| anyhow!("preview lock poisoned"))?;
        fs::create_dir_all(&self.config.dir).with_context(|| {
            format!("create previews directory {}", self.config.dir.display())
        })?;

        let stamp = crate::now_ms()?;
        let mut name = format!("preview_{}.jpg", stamp);
        let mut suffix = 1;
        while self.config.dir.join(&name).exists() {
            name = format!("preview_{}_{}.jpg", stamp, suffix);
            suffix += 1;
        }
        write_atomic(&self.config.dir.join(&name), &jpeg)
            .with_context(|| format!("write preview {}", name))?;
        log::debug!("saved preview {} ({} bytes)", name, jpeg.len());
        Ok(name)
    }

    /// Image file names in the previews directory, newest first.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.config.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(anyhow::Error::new(err).context(format!(
                    "list previews directory {}",
                    self.config.dir.display()
                )))
            }
        };

        let mut previews: Vec<(SystemTime, String)> = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() || !is_image_file(&path) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            previews.push((modified, name.to_string()));
        }
        previews.sort_by(|a, b| b.cmp(a));
        Ok(previews.into_iter().map(|(_, name)| name).collect())
    }

    /// Bytes of a stored preview. Unknown or unsafe names are `NotFound`.
    pub fn get(&self, name: &str) -> std::result::Result<Vec<u8>, OperationError> {
        let name = validate_preview_name(name)
            .map_err(|err| OperationError::NotFound(err.to_string()))?;
        let path = self.config.dir.join(name);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(
                OperationError::NotFound(format!("preview {} not found", name)),
            ),
            Err(err) => Err(OperationError::Internal(format!(
                "read preview {}: {}",
                name, err
            ))),
        }
    }
}

fn validate_preview_name(name: &str) -> Result<&str> {
    static PREVIEW_NAME_RE: OnceLock<Regex> = OnceLock::new();
    let re = PREVIEW_NAME_RE
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_-][A-Za-z0-9._-]{0,127}$").unwrap());

    if !re.is_match(name) || name.contains("..") {
        return Err(anyhow!("invalid preview name {:?}", name));
    }
    if !is_image_file(Path::new(name)) {
        return Err(anyhow!("preview {:?} is not an image", name));
    }
    Ok(name)
}
