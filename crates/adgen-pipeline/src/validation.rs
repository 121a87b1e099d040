//! Request validation.
//!
//! Everything a client sends is checked here, in a fixed order, before any
//! file is written or any provider is called. The first failure wins.

use std::path::Path;

use adgen_models::{parse_color, BackgroundFallback, CanvasPreset, GenerationMode, Rgb};
use adgen_storage::ALLOWED_UPLOAD_EXTENSIONS;
use tracing::warn;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};

/// A file part as received from the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }

    /// Lowercased extension of the client filename.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }

    /// Browsers send an empty part when no file was picked.
    fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Unvalidated form input.
#[derive(Debug, Clone, Default)]
pub struct UploadDraft {
    pub product_image: Option<UploadedFile>,
    pub script: Option<String>,
    pub background_image: Option<UploadedFile>,
    pub background_color: Option<String>,
    pub mode: Option<String>,
    pub canvas: Option<String>,
    pub presenter_image: Option<UploadedFile>,
}

/// An image that passed the extension check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub extension: String,
}

/// A fully validated generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub product_image: ImageUpload,
    pub script: String,
    pub background_image: Option<ImageUpload>,
    pub background_color: Rgb,
    pub mode: GenerationMode,
    pub canvas: CanvasPreset,
    pub presenter_image: Option<ImageUpload>,
}

/// Validation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationLimits {
    pub max_script_chars: usize,
    pub default_background_color: Rgb,
    pub background_fallback: BackgroundFallback,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for ValidationLimits {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_script_chars: config.max_script_chars,
            default_background_color: config.default_background_color,
            background_fallback: config.background_fallback,
        }
    }
}

/// Validate a draft.
///
/// Order: product image present, product image type, script present, script
/// length, background image type, background color, presenter image type,
/// mode, canvas.
pub fn validate(draft: UploadDraft, limits: &ValidationLimits) -> PipelineResult<GenerationRequest> {
    let product = draft
        .product_image
        .filter(|f| !f.is_empty())
        .ok_or_else(|| PipelineError::validation("product_image is required"))?;
    let product_image = checked_image("product_image", product)?;

    let script = draft
        .script
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| PipelineError::validation("script is required"))?;
    let chars = script.chars().count();
    if chars > limits.max_script_chars {
        return Err(PipelineError::validation(format!(
            "script is {chars} characters; the limit is {}",
            limits.max_script_chars
        )));
    }

    let background_image = match draft.background_image.filter(|f| !f.is_empty()) {
        None => None,
        Some(file) => match (checked_image("background_image", file), limits.background_fallback) {
            (Ok(image), _) => Some(image),
            (Err(e), BackgroundFallback::Color) => {
                warn!(error = %e, "Ignoring background image, using background color");
                None
            }
            (Err(e), BackgroundFallback::Reject) => return Err(e),
        },
    };

    let background_color = match draft.background_color.as_deref().map(str::trim) {
        None | Some("") => limits.default_background_color,
        Some(value) => parse_color(value)
            .map_err(|e| PipelineError::validation(format!("background_color: {e}")))?,
    };

    let presenter_image = draft
        .presenter_image
        .filter(|f| !f.is_empty())
        .map(|f| checked_image("presenter_image", f))
        .transpose()?;

    let mode = match draft.mode.as_deref().map(str::trim) {
        None | Some("") => GenerationMode::default(),
        Some(value) => GenerationMode::parse(value).ok_or_else(|| {
            PipelineError::validation(format!("mode must be 'voiceover' or 'avatar', got {value:?}"))
        })?,
    };

    let canvas = match draft.canvas.as_deref().map(str::trim) {
        None | Some("") => CanvasPreset::default(),
        Some(value) => CanvasPreset::parse(value).ok_or_else(|| {
            PipelineError::validation(format!("canvas must be 'square' or 'landscape', got {value:?}"))
        })?,
    };

    if presenter_image.is_some() && mode != GenerationMode::Avatar {
        warn!("presenter_image ignored outside avatar mode");
    }

    Ok(GenerationRequest {
        product_image,
        script,
        background_image,
        background_color,
        mode,
        presenter_image: presenter_image.filter(|_| mode == GenerationMode::Avatar),
        canvas,
    })
}

fn checked_image(field: &str, file: UploadedFile) -> PipelineResult<ImageUpload> {
    match file.extension() {
        Some(ext) if ALLOWED_UPLOAD_EXTENSIONS.contains(&ext.as_str()) => Ok(ImageUpload {
            bytes: file.bytes,
            extension: ext,
        }),
        _ => Err(PipelineError::validation(format!(
            "{field} must be a PNG or JPEG file, got {:?}",
            file.filename
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> UploadDraft {
        UploadDraft {
            product_image: Some(UploadedFile::new("shoe.PNG", b"png".to_vec())),
            script: Some("Hello world".into()),
            ..Default::default()
        }
    }

    fn message(result: PipelineResult<GenerationRequest>) -> String {
        match result {
            Err(PipelineError::Validation(msg)) => msg,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_defaults_applied() {
        let request = validate(draft(), &ValidationLimits::default()).unwrap();
        assert_eq!(request.product_image.extension, "png");
        assert_eq!(request.script, "Hello world");
        assert_eq!(request.background_color, Rgb::new(211, 211, 211));
        assert_eq!(request.mode, GenerationMode::Voiceover);
        assert_eq!(request.canvas, CanvasPreset::Square);
        assert!(request.background_image.is_none());
    }

    #[test]
    fn test_missing_script() {
        let mut d = draft();
        d.script = Some("   ".into());
        assert!(message(validate(d, &ValidationLimits::default())).contains("script"));

        let mut d = draft();
        d.script = None;
        assert!(message(validate(d, &ValidationLimits::default())).contains("script"));
    }

    #[test]
    fn test_product_checked_before_script() {
        let d = UploadDraft {
            product_image: Some(UploadedFile::new("shoe.bmp", b"bmp".to_vec())),
            ..Default::default()
        };
        assert!(message(validate(d, &ValidationLimits::default())).contains("product_image"));

        let d = UploadDraft::default();
        assert!(message(validate(d, &ValidationLimits::default())).contains("product_image is required"));
    }

    #[test]
    fn test_script_length_limit_counts_chars() {
        let limits = ValidationLimits::default();

        let mut d = draft();
        d.script = Some("é".repeat(500));
        assert!(validate(d, &limits).is_ok());

        let mut d = draft();
        d.script = Some("a".repeat(501));
        assert!(message(validate(d, &limits)).contains("501"));
    }

    #[test]
    fn test_gif_background_rejected_or_replaced() {
        let mut d = draft();
        d.background_image = Some(UploadedFile::new("bg.gif", b"gif".to_vec()));
        assert!(message(validate(d.clone(), &ValidationLimits::default())).contains("background_image"));

        let limits = ValidationLimits {
            background_fallback: BackgroundFallback::Color,
            ..Default::default()
        };
        let request = validate(d, &limits).unwrap();
        assert!(request.background_image.is_none());
    }

    #[test]
    fn test_bad_color() {
        let mut d = draft();
        d.background_color = Some("#GG0000".into());
        assert!(message(validate(d, &ValidationLimits::default())).contains("background_color"));

        let mut d = draft();
        d.background_color = Some("#0a0B0c".into());
        assert_eq!(
            validate(d, &ValidationLimits::default()).unwrap().background_color,
            Rgb::new(10, 11, 12)
        );
    }

    #[test]
    fn test_mode_and_canvas() {
        let mut d = draft();
        d.mode = Some("avatar".into());
        d.canvas = Some("landscape".into());
        d.presenter_image = Some(UploadedFile::new("me.jpeg", b"jpg".to_vec()));
        let request = validate(d, &ValidationLimits::default()).unwrap();
        assert_eq!(request.mode, GenerationMode::Avatar);
        assert_eq!(request.canvas, CanvasPreset::Landscape);
        assert_eq!(request.presenter_image.unwrap().extension, "jpeg");

        let mut d = draft();
        d.mode = Some("hologram".into());
        assert!(message(validate(d, &ValidationLimits::default())).contains("mode"));

        let mut d = draft();
        d.presenter_image = Some(UploadedFile::new("me.gif", b"gif".to_vec()));
        assert!(message(validate(d, &ValidationLimits::default())).contains("presenter_image"));
    }

    #[test]
    fn test_empty_file_parts_are_absent() {
        let mut d = draft();
        d.background_image = Some(UploadedFile::new("", Vec::new()));
        assert!(validate(d, &ValidationLimits::default()).unwrap().background_image.is_none());
    }
}
