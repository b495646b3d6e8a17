use anyhow::{Context, Result};
use log::LogLevel;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::{confirm::EnrollPolicy, cv::RegionSelector};

pub const APP_NAME: &str = "lanegate";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CameraConf {
    pub index: i32,
    pub width: u32,
    pub height: u32,
    pub frame_period_ms: u64,
}

impl Default for CameraConf {
    fn default() -> Self {
        Self {
            index: 0,
            width: 860,
            height: 420,
            frame_period_ms: 33,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectorConf {
    pub model: PathBuf,
    pub input_size: u32,
    pub confidence: f32,
    pub nms: f32,
    /// Frames between detection attempts.
    pub every: u64,
    pub selector: RegionSelector,
}

impl Default for DetectorConf {
    fn default() -> Self {
        Self {
            model: "models/license_plate_detector.onnx".into(),
            input_size: 640,
            confidence: 0.25,
            nms: 0.45,
            every: 10,
            selector: RegionSelector::First,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecognizerConf {
    pub url: String,
    pub timeout_ms: u64,
    /// JSON field holding the recognized text.
    pub field: String,
    pub api_secret: Option<String>,
}

impl Default for RecognizerConf {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8000/ocr".into(),
            timeout_ms: 10_000,
            field: "OCR result".into(),
            api_secret: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SerialConf {
    pub device: PathBuf,
    pub poll_ms: u64,
    pub grant_byte: char,
    pub token_pattern: String,
}

impl Default for SerialConf {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB0".into(),
            poll_ms: 200,
            grant_byte: 'y',
            token_pattern: "^[0-9A-Za-z]+$".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AccessConf {
    pub credential_ttl_ms: u64,
    pub min_plate_len: usize,
    pub enroll: EnrollPolicy,
    pub confirm_timeout_ms: u64,
    /// Detection results waiting for a decision before new ones are dropped.
    pub queue: usize,
}

impl Default for AccessConf {
    fn default() -> Self {
        Self {
            credential_ttl_ms: 8_000,
            min_plate_len: 2,
            enroll: EnrollPolicy::Prompt,
            confirm_timeout_ms: 30_000,
            queue: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConf {
    pub path: PathBuf,
    /// Pairings written when the store is empty.
    pub seed: Vec<(String, String)>,
}

impl Default for StoreConf {
    fn default() -> Self {
        Self {
            path: "license_plate.db".into(),
            seed: vec![("123ABC".into(), "213213".into())],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JournalConf {
    pub path: Option<PathBuf>,
}

impl Default for JournalConf {
    fn default() -> Self {
        Self {
            path: Some("decisions.csv".into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Conf {
    pub version: u8,
    pub log_level: String,
    pub camera: CameraConf,
    pub detector: DetectorConf,
    pub recognizer: RecognizerConf,
    pub serial: SerialConf,
    pub access: AccessConf,
    pub store: StoreConf,
    pub journal: JournalConf,
}

impl ::std::default::Default for Conf {
    fn default() -> Self {
        Self {
            version: 1,
            log_level: "info".into(),
            camera: CameraConf::default(),
            detector: DetectorConf::default(),
            recognizer: RecognizerConf::default(),
            serial: SerialConf::default(),
            access: AccessConf::default(),
            store: StoreConf::default(),
            journal: JournalConf::default(),
        }
    }
}

impl Conf {
    pub fn log_level(&self) -> LogLevel {
        self.log_level.parse().unwrap_or_default()
    }

    pub fn frame_period(&self) -> Duration {
        Duration::from_millis(self.camera.frame_period_ms.max(1))
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.serial.poll_ms.max(1))
    }

    pub fn credential_ttl(&self) -> Duration {
        Duration::from_millis(self.access.credential_ttl_ms)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.access.confirm_timeout_ms)
    }

    pub fn recognizer_timeout(&self) -> Duration {
        Duration::from_millis(self.recognizer.timeout_ms)
    }

    pub fn grant_byte(&self) -> Result<u8> {
        u8::try_from(self.serial.grant_byte)
            .context("serial.grant_byte must be a single-byte character")
    }
}

/// Loads the config from `path`, or from the per-user confy location.
///
/// A missing file is created with defaults.
pub fn load_config(path: Option<&PathBuf>) -> Result<Conf> {
    let cfg: Conf = match path {
        Some(path) => confy::load_path(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => confy::load(APP_NAME, None).context("Failed to load config")?,
    };
    Ok(cfg)
}
