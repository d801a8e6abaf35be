//! Sampler configuration — loupe presets, zoom set, gesture deadbands.
//!
//! Loaded in layers, later wins: built-in defaults, then an optional JSON
//! file under the platform config directory, then `LOUPE_*` environment
//! variables (a `.env` file is honoured via dotenvy).
//!
//! Config file location:
//!   macOS:   ~/Library/Application Support/color-loupe/config.json
//!   Linux:   ~/.config/color-loupe/config.json
//!   Windows: %APPDATA%/color-loupe/config.json

use crate::capture::SurfaceId;
use crate::color::Color;
use crate::zoom::{ZoomLevel, ZoomSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Largest custom loupe side, in points.
pub const MAX_LOUPE_SIDE: f64 = 1024.0;
const MIN_LOUPE_SIDE: f64 = 1.0;

/// Side length of the square loupe viewport, in points.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "LoupeSizeRepr")]
pub enum LoupeSize {
    Small,
    #[default]
    Medium,
    Large,
    Custom(f64),
}

impl LoupeSize {
    /// Custom size held to `[1, MAX_LOUPE_SIDE]` points.
    pub fn custom(side: f64) -> Self {
        bounded_side(side).map(LoupeSize::Custom).unwrap_or_default()
    }

    pub fn side(self) -> f64 {
        match self {
            LoupeSize::Small => 96.0,
            LoupeSize::Medium => 128.0,
            LoupeSize::Large => 160.0,
            LoupeSize::Custom(side) => bounded_side(side).unwrap_or_else(|| LoupeSize::Medium.side()),
        }
    }
}

fn bounded_side(side: f64) -> Option<f64> {
    (!side.is_nan()).then(|| side.clamp(MIN_LOUPE_SIDE, MAX_LOUPE_SIDE))
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum LoupeSizeRepr {
    Small,
    Medium,
    Large,
    Custom(f64),
}

impl From<LoupeSizeRepr> for LoupeSize {
    fn from(repr: LoupeSizeRepr) -> Self {
        match repr {
            LoupeSizeRepr::Small => LoupeSize::Small,
            LoupeSizeRepr::Medium => LoupeSize::Medium,
            LoupeSizeRepr::Large => LoupeSize::Large,
            LoupeSizeRepr::Custom(side) => LoupeSize::custom(side),
        }
    }
}

impl FromStr for LoupeSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "small" => Ok(LoupeSize::Small),
            "medium" => Ok(LoupeSize::Medium),
            "large" => Ok(LoupeSize::Large),
            other => match other.parse::<f64>() {
                Ok(side) if side > 0.0 && side <= MAX_LOUPE_SIDE => Ok(LoupeSize::Custom(side)),
                _ => Err(format!("invalid loupe size '{}'", s)),
            },
        }
    }
}

/// Captured pixels per display point, trading fidelity for bandwidth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Low,
    Nominal,
    #[default]
    Good,
    Great,
}

impl Quality {
    pub fn multiplier(self) -> f64 {
        match self {
            Quality::Low => 0.75,
            Quality::Nominal => 1.0,
            Quality::Good => 1.5,
            Quality::Great => 2.0,
        }
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Quality::Low),
            "nominal" => Ok(Quality::Nominal),
            "good" => Ok(Quality::Good),
            "great" => Ok(Quality::Great),
            _ => Err(format!("invalid quality '{}'", s)),
        }
    }
}

/// Clip shape of the loupe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoupeShape {
    Rect,
    #[default]
    RoundedRect,
    Circle,
}

impl FromStr for LoupeShape {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(&['-', '_'][..], "");
        match normalized.as_str() {
            "rect" => Ok(LoupeShape::Rect),
            "roundedrect" => Ok(LoupeShape::RoundedRect),
            "circle" | "ellipse" => Ok(LoupeShape::Circle),
            _ => Err(format!("invalid loupe shape '{}'", s)),
        }
    }
}

/// Minimum gesture magnitudes before a zoom step is taken.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureThresholds {
    /// Pinch magnification deadband.
    pub pinch: f64,
    /// Scroll delta-Y deadband.
    pub scroll: f64,
}

impl Default for GestureThresholds {
    fn default() -> Self {
        Self {
            pinch: 0.01,
            scroll: 1.0,
        }
    }
}

/// Color → description text used under the loupe.
#[derive(Clone)]
pub struct ColorFormatter(Arc<dyn Fn(&Color) -> String + Send + Sync>);

impl ColorFormatter {
    pub fn new(format: impl Fn(&Color) -> String + Send + Sync + 'static) -> Self {
        Self(Arc::new(format))
    }

    pub fn format(&self, color: &Color) -> String {
        (self.0)(color)
    }
}

impl Default for ColorFormatter {
    fn default() -> Self {
        ColorFormatter::new(Color::to_hex)
    }
}

impl fmt::Debug for ColorFormatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ColorFormatter(..)")
    }
}

/// Everything a host can tune about one sampling session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub loupe_size: LoupeSize,
    pub quality: Quality,
    pub zoom: ZoomSet,
    pub loupe_shape: LoupeShape,
    pub show_color_description: bool,
    pub gestures: GestureThresholds,
    /// Host surfaces (the loupe itself, its label) kept out of captured frames.
    pub excluded_surfaces: Vec<SurfaceId>,
    /// Polling interval for sources that grab frames on a timer.
    pub frame_interval_ms: u64,
    #[serde(skip)]
    pub color_description: ColorFormatter,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            loupe_size: LoupeSize::default(),
            quality: Quality::default(),
            zoom: ZoomSet::default(),
            loupe_shape: LoupeShape::default(),
            show_color_description: true,
            gestures: GestureThresholds::default(),
            excluded_surfaces: Vec::new(),
            frame_interval_ms: 16,
            color_description: ColorFormatter::default(),
        }
    }
}

impl SamplerConfig {
    /// Defaults ← config file (if present) ← environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let path = config_path();
        let mut config = if path.exists() {
            log::info!("[CONFIG] Loading {}", path.display());
            Self::from_file(&path)?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `LOUPE_*` overrides read through `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup("LOUPE_SIZE") {
            self.loupe_size = parse_var("LOUPE_SIZE", &value)?;
        }
        if let Some(value) = lookup("LOUPE_QUALITY") {
            self.quality = parse_var("LOUPE_QUALITY", &value)?;
        }
        if let Some(value) = lookup("LOUPE_SHAPE") {
            self.loupe_shape = parse_var("LOUPE_SHAPE", &value)?;
        }
        if let Some(value) = lookup("LOUPE_ZOOMS") {
            let levels = value
                .split(',')
                .filter(|part| !part.trim().is_empty())
                .map(|part| parse_var::<ZoomLevel>("LOUPE_ZOOMS", part))
                .collect::<Result<Vec<_>, _>>()?;
            self.zoom.set_levels(levels);
        }
        if let Some(value) = lookup("LOUPE_DEFAULT_ZOOM") {
            self.zoom.set_default(parse_var("LOUPE_DEFAULT_ZOOM", &value)?);
        }
        if let Some(value) = lookup("LOUPE_SHOW_DESCRIPTION") {
            self.show_color_description = parse_bool("LOUPE_SHOW_DESCRIPTION", &value)?;
        }
        if let Some(value) = lookup("LOUPE_PINCH_DEADBAND") {
            self.gestures.pinch = parse_var("LOUPE_PINCH_DEADBAND", &value)?;
        }
        if let Some(value) = lookup("LOUPE_SCROLL_DEADBAND") {
            self.gestures.scroll = parse_var("LOUPE_SCROLL_DEADBAND", &value)?;
        }
        if let Some(value) = lookup("LOUPE_FRAME_INTERVAL_MS") {
            self.frame_interval_ms = parse_var("LOUPE_FRAME_INTERVAL_MS", &value)?;
        }
        Ok(())
    }

    pub fn viewport_side(&self) -> f64 {
        self.loupe_size.side()
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }

    /// Description text for `color`, or `None` when descriptions are off.
    pub fn describe(&self, color: &Color) -> Option<String> {
        self.show_color_description
            .then(|| self.color_description.format(color))
    }
}

/// Path of the optional JSON config file.
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("color-loupe")
        .join("config.json")
}

fn parse_var<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::InvalidVar {
        key,
        reason: e.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidVar {
            key,
            reason: format!("expected a boolean, got '{}'", other),
        }),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Config file is not valid JSON: {0}")]
    Parse(String),

    #[error("Invalid value for {key}: {reason}")]
    InvalidVar { key: &'static str, reason: String },
}
