use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::classify::DEFAULT_LABELS;
use crate::ingest::CameraConfig;
use crate::location::{DEFAULT_LOCATION_ENDPOINT, DEFAULT_LOOKUP_TIMEOUT};
use crate::preview::PreviewConfig;
use crate::store::StoreKind;
use crate::stream::{StreamSettings, DEFAULT_STOP_TIMEOUT};
use crate::DEFAULT_STABILITY_WINDOW;

const DEFAULT_STORE_PATH: &str = "detections_log.json";
const DEFAULT_PREVIEWS_DIR: &str = "previews";
const DEFAULT_PREVIEW_SIZE: u32 = 320;
const DEFAULT_JPEG_QUALITY: u8 = 75;
const DEFAULT_CAMERA: &str = "stub://camera0";
const DEFAULT_CAMERA_FPS: u32 = 10;
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_MODEL_INPUT: u32 = 224;
const MAX_CAMERA_DIMENSION: u32 = 8192;

#[derive(Debug, Deserialize, Default)]
struct SentinelConfigFile {
    store: Option<StoreConfigFile>,
    previews: Option<PreviewConfigFile>,
    camera: Option<CameraConfigFile>,
    stream: Option<StreamConfigFile>,
    location: Option<LocationConfigFile>,
    classifier: Option<ClassifierConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StoreConfigFile {
    kind: Option<String>,
    path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct PreviewConfigFile {
    enabled: Option<bool>,
    dir: Option<PathBuf>,
    size: Option<u32>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    stability_ms: Option<u64>,
    stop_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct LocationConfigFile {
    enabled: Option<bool>,
    endpoint: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassifierConfigFile {
    model_path: Option<PathBuf>,
    labels: Option<Vec<String>>,
    input_size: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub store_kind: StoreKind,
    pub store_path: PathBuf,
    pub previews: PreviewSettings,
    pub camera: CameraSettings,
    pub stability_window: Duration,
    pub stop_timeout: Duration,
    pub location: LocationSettings,
    pub classifier: ClassifierSettings,
}

#[derive(Debug, Clone)]
pub struct PreviewSettings {
    pub enabled: bool,
    pub dir: PathBuf,
    pub size: u32,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub device: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct LocationSettings {
    pub enabled: bool,
    pub endpoint: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    /// ONNX model; the stub classifier is used when unset.
    pub model_path: Option<PathBuf>,
    pub labels: Vec<String>,
    pub input_size: u32,
}

impl SentinelConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTINEL_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentinelConfigFile) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(store) = file.store {
            if let Some(kind) = store.kind {
                cfg.store_kind = kind.parse()?;
            }
            if let Some(path) = store.path {
                cfg.store_path = path;
            }
        }

        if let Some(previews) = file.previews {
            cfg.previews.enabled = previews.enabled.unwrap_or(cfg.previews.enabled);
            cfg.previews.dir = previews.dir.unwrap_or(cfg.previews.dir);
            cfg.previews.size = previews.size.unwrap_or(cfg.previews.size);
            cfg.previews.jpeg_quality = previews.jpeg_quality.unwrap_or(cfg.previews.jpeg_quality);
        }

        if let Some(camera) = file.camera {
            cfg.camera.device = camera.device.unwrap_or(cfg.camera.device);
            cfg.camera.target_fps = camera.target_fps.unwrap_or(cfg.camera.target_fps);
            cfg.camera.width = camera.width.unwrap_or(cfg.camera.width);
            cfg.camera.height = camera.height.unwrap_or(cfg.camera.height);
        }

        if let Some(stream) = file.stream {
            if let Some(ms) = stream.stability_ms {
                cfg.stability_window = Duration::from_millis(ms);
            }
            if let Some(ms) = stream.stop_timeout_ms {
                cfg.stop_timeout = Duration::from_millis(ms);
            }
        }

        if let Some(location) = file.location {
            cfg.location.enabled = location.enabled.unwrap_or(cfg.location.enabled);
            cfg.location.endpoint = location.endpoint.unwrap_or(cfg.location.endpoint);
            if let Some(ms) = location.timeout_ms {
                cfg.location.timeout = Duration::from_millis(ms);
            }
        }

        if let Some(classifier) = file.classifier {
            cfg.classifier.model_path = classifier.model_path;
            cfg.classifier.labels = classifier.labels.unwrap_or(cfg.classifier.labels);
            cfg.classifier.input_size = classifier.input_size.unwrap_or(cfg.classifier.input_size);
        }

        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("SENTINEL_STORE_PATH") {
            if !path.trim().is_empty() {
                self.store_path = PathBuf::from(path);
            }
        }
        if let Ok(kind) = std::env::var("SENTINEL_STORE_KIND") {
            if !kind.trim().is_empty() {
                self.store_kind = kind.parse()?;
            }
        }
        if let Ok(dir) = std::env::var("SENTINEL_PREVIEWS_DIR") {
            if !dir.trim().is_empty() {
                self.previews.dir = PathBuf::from(dir);
            }
        }
        if let Ok(device) = std::env::var("SENTINEL_CAMERA") {
            if !device.trim().is_empty() {
                self.camera.device = device.trim().to_string();
            }
        }
        if let Ok(ms) = std::env::var("SENTINEL_STABILITY_MS") {
            self.stability_window = Duration::from_millis(parse_millis("SENTINEL_STABILITY_MS", &ms)?);
        }
        if let Ok(ms) = std::env::var("SENTINEL_STOP_TIMEOUT_MS") {
            self.stop_timeout = Duration::from_millis(parse_millis("SENTINEL_STOP_TIMEOUT_MS", &ms)?);
        }
        if let Ok(endpoint) = std::env::var("SENTINEL_LOCATION_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                self.location.endpoint = endpoint.trim().to_string();
            }
        }
        if let Ok(disabled) = std::env::var("SENTINEL_LOCATION_DISABLED") {
            self.location.enabled = !parse_flag("SENTINEL_LOCATION_DISABLED", &disabled)?;
        }
        if let Ok(path) = std::env::var("SENTINEL_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.classifier.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(labels) = std::env::var("SENTINEL_LABELS") {
            let parsed = split_csv(&labels);
            if !parsed.is_empty() {
                self.classifier.labels = parsed;
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.stability_window.is_zero() {
            return Err(anyhow!("stability window must be greater than zero"));
        }
        if self.stop_timeout.is_zero() {
            return Err(anyhow!("stop timeout must be greater than zero"));
        }
        if self.previews.size == 0 {
            return Err(anyhow!("preview size must be greater than zero"));
        }
        if !(1..=100).contains(&self.previews.jpeg_quality) {
            return Err(anyhow!(
                "preview jpeg quality must be in 1..=100, got {}",
                self.previews.jpeg_quality
            ));
        }
        if self.camera.device.trim().is_empty() {
            return Err(anyhow!("camera device must not be empty"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera frame size must be non-zero"));
        }
        if self.camera.width > MAX_CAMERA_DIMENSION || self.camera.height > MAX_CAMERA_DIMENSION {
            return Err(anyhow!(
                "camera frame size {}x{} exceeds {}x{}",
                self.camera.width,
                self.camera.height,
                MAX_CAMERA_DIMENSION,
                MAX_CAMERA_DIMENSION
            ));
        }
        self.classifier.labels = self
            .classifier
            .labels
            .iter()
            .map(|label| label.trim().to_string())
            .filter(|label| !label.is_empty())
            .collect();
        if self.classifier.labels.is_empty() {
            return Err(anyhow!("classifier labels must not be empty"));
        }
        if self.classifier.input_size == 0 {
            return Err(anyhow!("classifier input size must be greater than zero"));
        }
        if self.location.enabled {
            let url = url::Url::parse(&self.location.endpoint)
                .map_err(|e| anyhow!("invalid location endpoint {}: {}", self.location.endpoint, e))?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(anyhow!("location endpoint must be http(s)"));
            }
        }
        Ok(())
    }

    pub fn camera_config(&self) -> CameraConfig {
        CameraConfig {
            device: self.camera.device.clone(),
            target_fps: self.camera.target_fps,
            width: self.camera.width,
            height: self.camera.height,
            ..CameraConfig::default()
        }
    }

    pub fn preview_config(&self) -> PreviewConfig {
        PreviewConfig {
            dir: self.previews.dir.clone(),
            size: self.previews.size,
            jpeg_quality: self.previews.jpeg_quality,
        }
    }

    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            stability_window: self.stability_window,
            stop_timeout: self.stop_timeout,
        }
    }
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            store_kind: StoreKind::Json,
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            previews: PreviewSettings {
                enabled: true,
                dir: PathBuf::from(DEFAULT_PREVIEWS_DIR),
                size: DEFAULT_PREVIEW_SIZE,
                jpeg_quality: DEFAULT_JPEG_QUALITY,
            },
            camera: CameraSettings {
                device: DEFAULT_CAMERA.to_string(),
                target_fps: DEFAULT_CAMERA_FPS,
                width: DEFAULT_CAMERA_WIDTH,
                height: DEFAULT_CAMERA_HEIGHT,
            },
            stability_window: DEFAULT_STABILITY_WINDOW,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            location: LocationSettings {
                enabled: true,
                endpoint: DEFAULT_LOCATION_ENDPOINT.to_string(),
                timeout: DEFAULT_LOOKUP_TIMEOUT,
            },
            classifier: ClassifierSettings {
                model_path: None,
                labels: DEFAULT_LABELS.iter().map(|l| l.to_string()).collect(),
                input_size: DEFAULT_MODEL_INPUT,
            },
        }
    }
}

fn read_config_file(path: &Path) -> Result<SentinelConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn parse_millis(name: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("{} must be an integer number of milliseconds", name))
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(anyhow!("{} must be a boolean (1/0, true/false)", name)),
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
