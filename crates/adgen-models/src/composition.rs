//! Composition specs: canvas, background, layers and audio source.
//!
//! A [`CompositionSpec`] fully describes one render. It is assembled with
//! [`CompositionSpecBuilder`] and is immutable afterwards.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::color::Rgb;
use crate::encoding::{EncodingConfig, DEFAULT_FRAME_RATE};

/// Output canvas dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

impl CanvasSize {
    pub const SQUARE: CanvasSize = CanvasSize { width: 1080, height: 1080 };
    pub const LANDSCAPE: CanvasSize = CanvasSize { width: 1920, height: 1080 };

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Length of the shorter side.
    pub fn min_side(&self) -> u32 {
        self.width.min(self.height)
    }
}

/// Canvas presets accepted from clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum CanvasPreset {
    /// 1080×1080
    #[default]
    Square,
    /// 1920×1080
    Landscape,
}

impl CanvasPreset {
    pub fn size(&self) -> CanvasSize {
        match self {
            CanvasPreset::Square => CanvasSize::SQUARE,
            CanvasPreset::Landscape => CanvasSize::LANDSCAPE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CanvasPreset::Square => "square",
            CanvasPreset::Landscape => "landscape",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "square" => Some(CanvasPreset::Square),
            "landscape" => Some(CanvasPreset::Landscape),
            _ => None,
        }
    }
}

/// Where a layer sits on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    #[default]
    Center,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Anchor {
    /// Top-left position of a `size` box on `canvas`.
    ///
    /// `margin` only applies to corner anchors.
    pub fn position(&self, canvas: CanvasSize, size: (u32, u32), margin: u32) -> (i64, i64) {
        let (w, h) = (size.0 as i64, size.1 as i64);
        let (cw, ch) = (canvas.width as i64, canvas.height as i64);
        let m = margin as i64;

        match self {
            Anchor::Center => ((cw - w) / 2, (ch - h) / 2),
            Anchor::TopLeft => (m, m),
            Anchor::TopRight => (cw - w - m, m),
            Anchor::BottomLeft => (m, ch - h - m),
            Anchor::BottomRight => (cw - w - m, ch - h - m),
        }
    }
}

/// Square bounding box, sized as a fraction of the canvas' shorter side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FitBox {
    pub ratio: f64,
}

impl FitBox {
    /// Product alone on the canvas.
    pub const PRODUCT: FitBox = FitBox { ratio: 0.8 };
    /// Product sharing the canvas with an avatar.
    pub const PRODUCT_WITH_AVATAR: FitBox = FitBox { ratio: 0.5 };
    /// Avatar inset in a corner.
    pub const AVATAR_INSET: FitBox = FitBox { ratio: 0.25 };

    pub const fn new(ratio: f64) -> Self {
        Self { ratio }
    }

    /// Side of the bounding box in pixels.
    pub fn side(&self, canvas: CanvasSize) -> u32 {
        ((canvas.min_side() as f64 * self.ratio).round() as u32).max(1)
    }

    /// Scale `(width, height)` to fit the box without distorting it.
    ///
    /// Landscape sources bind on width, everything else on height.
    pub fn fit(&self, source: (u32, u32), canvas: CanvasSize) -> (u32, u32) {
        let side = self.side(canvas);
        let (w, h) = (source.0.max(1) as f64, source.1.max(1) as f64);

        if w > h {
            let scaled_h = (h * side as f64 / w).round() as u32;
            (side, scaled_h.max(1))
        } else {
            let scaled_w = (w * side as f64 / h).round() as u32;
            (scaled_w.max(1), side)
        }
    }
}

/// How a background photo is mapped onto the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundImageFit {
    /// Resize to exactly the canvas size
    #[default]
    Stretch,
    /// Scale to cover the canvas and crop the overflow
    Cover,
}

impl BackgroundImageFit {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stretch" => Some(BackgroundImageFit::Stretch),
            "cover" => Some(BackgroundImageFit::Cover),
            _ => None,
        }
    }
}

/// Canvas background.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackgroundSpec {
    Color { color: Rgb },
    Image { path: PathBuf, fit: BackgroundImageFit },
}

/// Source of a foreground layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "path", rename_all = "snake_case")]
pub enum LayerSource {
    Image(PathBuf),
    Video(PathBuf),
}

impl LayerSource {
    pub fn path(&self) -> &Path {
        match self {
            LayerSource::Image(p) | LayerSource::Video(p) => p,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, LayerSource::Video(_))
    }
}

/// A foreground layer, painted over everything before it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub source: LayerSource,
    pub fit: FitBox,
    pub anchor: Anchor,
}

impl Layer {
    pub fn image(path: impl Into<PathBuf>, fit: FitBox, anchor: Anchor) -> Self {
        Self {
            source: LayerSource::Image(path.into()),
            fit,
            anchor,
        }
    }

    pub fn video(path: impl Into<PathBuf>, fit: FitBox, anchor: Anchor) -> Self {
        Self {
            source: LayerSource::Video(path.into()),
            fit,
            anchor,
        }
    }
}

/// Where the soundtrack comes from. The composite lasts as long as this source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AudioSource {
    /// Standalone voice-over file
    File { path: PathBuf },
    /// Audio track of the video layer at `index`
    Layer { index: usize },
}

/// Errors building a composition spec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompositionSpecError {
    #[error("composition has no audio source")]
    MissingAudio,

    #[error("audio layer {0} does not exist")]
    AudioLayerOutOfRange(usize),

    #[error("audio layer {0} is not a video layer")]
    AudioLayerNotVideo(usize),

    #[error("frame rate must be positive")]
    InvalidFrameRate,
}

/// Complete description of a single render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionSpec {
    canvas: CanvasSize,
    background: BackgroundSpec,
    layers: Vec<Layer>,
    audio: AudioSource,
    frame_rate: u32,
    encoding: EncodingConfig,
    corner_margin: u32,
}

impl CompositionSpec {
    pub fn builder(canvas: CanvasSize, background: BackgroundSpec) -> CompositionSpecBuilder {
        CompositionSpecBuilder {
            canvas,
            background,
            layers: Vec::new(),
            audio: None,
            frame_rate: DEFAULT_FRAME_RATE,
            encoding: EncodingConfig::default(),
            corner_margin: 0,
        }
    }

    pub fn canvas(&self) -> CanvasSize {
        self.canvas
    }

    pub fn background(&self) -> &BackgroundSpec {
        &self.background
    }

    /// Layers in paint order (back to front).
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn audio(&self) -> &AudioSource {
        &self.audio
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    pub fn encoding(&self) -> &EncodingConfig {
        &self.encoding
    }

    pub fn corner_margin(&self) -> u32 {
        self.corner_margin
    }

    /// Number of leading still layers (these can be flattened into the background).
    pub fn leading_still_layers(&self) -> usize {
        self.layers
            .iter()
            .take_while(|l| !l.source.is_video())
            .count()
    }
}

/// Builder for [`CompositionSpec`].
#[derive(Debug, Clone)]
pub struct CompositionSpecBuilder {
    canvas: CanvasSize,
    background: BackgroundSpec,
    layers: Vec<Layer>,
    audio: Option<AudioSource>,
    frame_rate: u32,
    encoding: EncodingConfig,
    corner_margin: u32,
}

impl CompositionSpecBuilder {
    /// Add a layer on top of the existing ones.
    pub fn layer(mut self, layer: Layer) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn audio(mut self, audio: AudioSource) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn frame_rate(mut self, fps: u32) -> Self {
        self.frame_rate = fps;
        self
    }

    pub fn encoding(mut self, encoding: EncodingConfig) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn corner_margin(mut self, margin: u32) -> Self {
        self.corner_margin = margin;
        self
    }

    pub fn build(self) -> Result<CompositionSpec, CompositionSpecError> {
        let audio = self.audio.ok_or(CompositionSpecError::MissingAudio)?;

        if let AudioSource::Layer { index } = audio {
            let layer = self
                .layers
                .get(index)
                .ok_or(CompositionSpecError::AudioLayerOutOfRange(index))?;
            if !layer.source.is_video() {
                return Err(CompositionSpecError::AudioLayerNotVideo(index));
            }
        }

        if self.frame_rate == 0 {
            return Err(CompositionSpecError::InvalidFrameRate);
        }

        Ok(CompositionSpec {
            canvas: self.canvas,
            background: self.background,
            layers: self.layers,
            audio,
            frame_rate: self.frame_rate,
            encoding: self.encoding,
            corner_margin: self.corner_margin,
        })
    }
}
