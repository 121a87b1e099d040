//! Still-frame compositing.
//!
//! Paints a background (solid color or photo) at canvas resolution and places
//! foreground images on it, scaled into a square fit box without distortion.

use std::io::Cursor;

use ::image::imageops::{self, FilterType};
use ::image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
use adgen_models::{Anchor, BackgroundImageFit, CanvasSize, FitBox, Rgb};

use crate::error::{MediaError, MediaResult};

/// A decoded background.
#[derive(Debug, Clone)]
pub enum Backdrop {
    Color(Rgb),
    Image(DynamicImage, BackgroundImageFit),
}

/// Where and how large a foreground is drawn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub fit: FitBox,
    pub anchor: Anchor,
    /// Distance from the canvas edge for corner anchors
    pub margin: u32,
}

impl Placement {
    pub fn new(fit: FitBox, anchor: Anchor) -> Self {
        Self {
            fit,
            anchor,
            margin: 0,
        }
    }

    pub fn with_margin(mut self, margin: u32) -> Self {
        self.margin = margin;
        self
    }

    /// Scaled size and top-left position of a `source`-sized foreground.
    pub fn resolve(&self, source: (u32, u32), canvas: CanvasSize) -> ((u32, u32), (i64, i64)) {
        let size = self.fit.fit(source, canvas);
        let position = self.anchor.position(canvas, size, self.margin);
        (size, position)
    }
}

/// Composites still images at canvas resolution.
#[derive(Debug, Clone, Copy)]
pub struct ImageCompositor {
    filter: FilterType,
}

impl Default for ImageCompositor {
    fn default() -> Self {
        Self {
            filter: FilterType::Lanczos3,
        }
    }
}

impl ImageCompositor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode an encoded image (PNG/JPEG).
    pub fn decode(bytes: &[u8]) -> MediaResult<DynamicImage> {
        ::image::load_from_memory(bytes).map_err(|e| MediaError::invalid_image(e.to_string()))
    }

    /// Paint the background at canvas size.
    pub fn paint_background(&self, backdrop: &Backdrop, canvas: CanvasSize) -> RgbaImage {
        match backdrop {
            Backdrop::Color(color) => RgbaImage::from_pixel(
                canvas.width,
                canvas.height,
                Rgba([color.r, color.g, color.b, 255]),
            ),
            Backdrop::Image(image, BackgroundImageFit::Stretch) => image
                .resize_exact(canvas.width, canvas.height, self.filter)
                .to_rgba8(),
            Backdrop::Image(image, BackgroundImageFit::Cover) => image
                .resize_to_fill(canvas.width, canvas.height, self.filter)
                .to_rgba8(),
        }
    }

    /// Draw `foreground` onto `target` according to `placement`.
    pub fn place(
        &self,
        target: &mut RgbaImage,
        foreground: &DynamicImage,
        placement: Placement,
    ) {
        let canvas = CanvasSize::new(target.width(), target.height());
        let ((w, h), (x, y)) = placement.resolve((foreground.width(), foreground.height()), canvas);
        let scaled = foreground.resize_exact(w, h, self.filter).to_rgba8();
        imageops::overlay(target, &scaled, x, y);
    }

    /// Background plus foregrounds in paint order, at canvas resolution.
    pub fn compose(
        &self,
        backdrop: &Backdrop,
        layers: &[(DynamicImage, Placement)],
        canvas: CanvasSize,
    ) -> RgbaImage {
        let mut frame = self.paint_background(backdrop, canvas);
        for (image, placement) in layers {
            self.place(&mut frame, image, *placement);
        }
        frame
    }

    /// Encode a frame as PNG.
    pub fn encode_png(frame: &RgbaImage) -> MediaResult<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(frame.clone())
            .write_to(&mut buf, ImageOutputFormat::Png)
            .map_err(|e| MediaError::internal(format!("PNG encode failed: {e}")))?;
        Ok(buf.into_inner())
    }
}
