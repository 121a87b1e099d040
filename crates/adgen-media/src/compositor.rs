//! Layered video rendering.
//!
//! Leading still layers are flattened with the background into one frame;
//! anything after the first video layer is overlaid by FFmpeg. The composite
//! runs exactly as long as its audio source.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use adgen_models::{AudioSource, BackgroundSpec, CompositionSpec, LayerSource};
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::frame::{Backdrop, ImageCompositor, Placement};
use crate::probe::probe_media;

/// Render progress callback, called with a fraction in `0.0..=1.0`.
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// Everything a renderer needs for one render.
pub struct RenderJob<'a> {
    pub spec: &'a CompositionSpec,
    /// Where the mp4 is written
    pub output: &'a Path,
    /// Scratch path for the flattened still frame (PNG)
    pub frame_path: &'a Path,
    pub cancel: Option<watch::Receiver<bool>>,
    pub progress: Option<ProgressFn>,
}

/// Result of a successful render.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderOutput {
    /// Composite duration in seconds (equals the audio source duration)
    pub duration_secs: f64,
}

/// Turns a composition spec into a video file.
#[async_trait]
pub trait VideoRenderer: Send + Sync {
    async fn render(&self, job: RenderJob<'_>) -> MediaResult<RenderOutput>;
}

/// A layer FFmpeg has to draw, with its resolved geometry.
#[derive(Debug, Clone, PartialEq)]
struct OverlayInput {
    source: LayerSource,
    size: (u32, u32),
    position: (i64, i64),
}

/// [`VideoRenderer`] backed by the FFmpeg CLI.
#[derive(Debug, Clone, Default)]
pub struct FfmpegCompositor {
    images: ImageCompositor,
    timeout_secs: Option<u64>,
}

impl FfmpegCompositor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill FFmpeg if a render takes longer than this.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Paint the background and every leading still layer into one frame.
    async fn flatten(&self, spec: &CompositionSpec, frame_path: &Path) -> MediaResult<()> {
        let backdrop = match spec.background() {
            BackgroundSpec::Color { color } => Backdrop::Color(*color),
            BackgroundSpec::Image { path, fit } => {
                let bytes = read_input(path).await?;
                Backdrop::Image(ImageCompositor::decode(&bytes)?, *fit)
            }
        };

        let mut stills = Vec::new();
        for layer in &spec.layers()[..spec.leading_still_layers()] {
            let bytes = read_input(layer.source.path()).await?;
            let placement = Placement::new(layer.fit, layer.anchor).with_margin(spec.corner_margin());
            stills.push((bytes, placement));
        }

        let images = self.images;
        let canvas = spec.canvas();
        let png = tokio::task::spawn_blocking(move || -> MediaResult<Vec<u8>> {
            let layers = stills
                .into_iter()
                .map(|(bytes, placement)| Ok((ImageCompositor::decode(&bytes)?, placement)))
                .collect::<MediaResult<Vec<_>>>()?;
            ImageCompositor::encode_png(&images.compose(&backdrop, &layers, canvas))
        })
        .await
        .map_err(|e| MediaError::internal(format!("frame task failed: {e}")))??;

        tokio::fs::write(frame_path, png).await?;
        Ok(())
    }

    /// Resolve size and position of every layer FFmpeg overlays.
    async fn resolve_overlays(&self, spec: &CompositionSpec) -> MediaResult<Vec<OverlayInput>> {
        let canvas = spec.canvas();
        let mut overlays = Vec::new();

        for layer in &spec.layers()[spec.leading_still_layers()..] {
            let source_size = match &layer.source {
                LayerSource::Video(path) => probe_media(path)
                    .await?
                    .dimensions()
                    .ok_or_else(|| MediaError::invalid_media(format!("{} has no video stream", path.display())))?,
                LayerSource::Image(path) => {
                    let bytes = read_input(path).await?;
                    let image = ImageCompositor::decode(&bytes)?;
                    (image.width(), image.height())
                }
            };

            let placement = Placement::new(layer.fit, layer.anchor).with_margin(spec.corner_margin());
            let (size, position) = placement.resolve(source_size, canvas);
            overlays.push(OverlayInput {
                source: layer.source.clone(),
                size,
                position,
            });
        }

        Ok(overlays)
    }

    /// Path of the file whose duration drives the composite.
    fn audio_path(spec: &CompositionSpec) -> MediaResult<PathBuf> {
        match spec.audio() {
            AudioSource::File { path } => Ok(path.clone()),
            AudioSource::Layer { index } => spec
                .layers()
                .get(*index)
                .map(|l| l.source.path().to_path_buf())
                .ok_or_else(|| MediaError::internal(format!("audio layer {index} missing"))),
        }
    }
}

#[async_trait]
impl VideoRenderer for FfmpegCompositor {
    async fn render(&self, job: RenderJob<'_>) -> MediaResult<RenderOutput> {
        let spec = job.spec;
        let started = Instant::now();

        let audio_path = Self::audio_path(spec)?;
        let audio = probe_media(&audio_path).await?;
        if !audio.has_audio {
            return Err(MediaError::invalid_media(format!(
                "{} has no audio stream",
                audio_path.display()
            )));
        }
        let duration = audio.duration;

        self.flatten(spec, job.frame_path).await?;
        let overlays = self.resolve_overlays(spec).await?;
        let cmd = build_render_command(spec, job.frame_path, &overlays, duration, job.output);

        let mut runner = FfmpegRunner::new();
        if let Some(cancel) = job.cancel {
            runner = runner.with_cancel(cancel);
        }
        if let Some(secs) = self.timeout_secs {
            runner = runner.with_timeout(secs);
        }

        let total_ms = (duration * 1000.0) as i64;
        let progress = job.progress;
        runner
            .run_with_progress(&cmd, move |p| {
                if let Some(cb) = &progress {
                    cb(p.fraction(total_ms));
                }
            })
            .await?;

        let elapsed = started.elapsed().as_secs_f64();
        metrics::histogram!("adgen_render_duration_seconds").record(elapsed);
        info!(
            output = %job.output.display(),
            duration_secs = duration,
            overlays = overlays.len(),
            elapsed_secs = elapsed,
            "Rendered composite"
        );

        Ok(RenderOutput {
            duration_secs: duration,
        })
    }
}

/// Build the FFmpeg invocation for a flattened frame plus overlays.
///
/// Input order: frame, overlays (in paint order), then the standalone audio file if any.
fn build_render_command(
    spec: &CompositionSpec,
    frame_path: &Path,
    overlays: &[OverlayInput],
    duration: f64,
    output: &Path,
) -> FfmpegCommand {
    let fps = spec.frame_rate();
    let mut cmd = FfmpegCommand::new(output).looped_image(frame_path, fps);

    for overlay in overlays {
        cmd = match &overlay.source {
            LayerSource::Image(path) => cmd.looped_image(path, fps),
            LayerSource::Video(path) => cmd.input(path),
        };
    }

    let audio_map = match spec.audio() {
        AudioSource::File { path } => {
            let index = cmd.input_count();
            cmd = cmd.input(path);
            format!("{index}:a:0")
        }
        AudioSource::Layer { index } => {
            // layer index -> input index: stills are flattened into input 0
            let input = index - spec.leading_still_layers() + 1;
            format!("{input}:a:0")
        }
    };

    let filter = build_filter_graph(overlays, &spec.encoding().pixel_format);
    debug!(filter = %filter, "Render filter graph");

    let encoding = spec.encoding();
    cmd.filter_complex(filter)
        .map("[vout]")
        .map(audio_map)
        .duration(duration)
        .frame_rate(fps)
        .video_codec(&encoding.codec)
        .preset(&encoding.preset)
        .crf(encoding.crf)
        .pixel_format(&encoding.pixel_format)
        .audio_codec(&encoding.audio_codec)
        .audio_bitrate(&encoding.audio_bitrate)
        .faststart()
}

/// Scale each overlay into its box and stack them over input 0.
fn build_filter_graph(overlays: &[OverlayInput], pixel_format: &str) -> String {
    let mut chains = Vec::with_capacity(overlays.len() * 2 + 1);
    let mut base = "[0:v]".to_string();

    for (i, overlay) in overlays.iter().enumerate() {
        let input = i + 1;
        let (w, h) = overlay.size;
        let (x, y) = overlay.position;
        chains.push(format!("[{input}:v]scale={w}:{h},setsar=1[l{i}]"));
        chains.push(format!("{base}[l{i}]overlay={x}:{y}:eof_action=repeat[v{i}]"));
        base = format!("[v{i}]");
    }

    chains.push(format!("{base}format={pixel_format}[vout]"));
    chains.join(";")
}

async fn read_input(path: &Path) -> MediaResult<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(MediaError::FileNotFound(path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adgen_models::{Anchor, CanvasSize, FitBox, Layer, Rgb};

    fn color() -> BackgroundSpec {
        BackgroundSpec::Color {
            color: Rgb::new(211, 211, 211),
        }
    }

    #[test]
    fn test_voiceover_command() {
        let spec = CompositionSpec::builder(CanvasSize::SQUARE, color())
            .layer(Layer::image("/w/product.png", FitBox::PRODUCT, Anchor::Center))
            .audio(AudioSource::File {
                path: "/w/voice.mp3".into(),
            })
            .build()
            .unwrap();

        let cmd = build_render_command(&spec, Path::new("/w/frame.png"), &[], 3.25, Path::new("/o/out.mp4"));
        let args = cmd.build_args();
        let joined = args.join(" ");

        assert!(joined.contains("-loop 1 -framerate 24 -i /w/frame.png"));
        assert!(joined.contains("-i /w/voice.mp3"));
        assert!(!joined.contains("product.png"), "stills are flattened into the frame");
        assert!(joined.contains("-filter_complex [0:v]format=yuv420p[vout]"));
        assert!(joined.contains("-map [vout] -map 1:a:0"));
        assert!(joined.contains("-t 3.250"));
        assert!(joined.contains("-r 24"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-pix_fmt yuv420p"));
        assert!(joined.contains("-c:a aac"));
    }

    #[test]
    fn test_avatar_command_takes_audio_from_clip() {
        let spec = CompositionSpec::builder(CanvasSize::LANDSCAPE, color())
            .layer(Layer::image("/w/product.png", FitBox::PRODUCT_WITH_AVATAR, Anchor::Center))
            .layer(Layer::video("/w/avatar.mp4", FitBox::AVATAR_INSET, Anchor::BottomLeft))
            .audio(AudioSource::Layer { index: 1 })
            .corner_margin(20)
            .build()
            .unwrap();

        let overlays = vec![OverlayInput {
            source: LayerSource::Video("/w/avatar.mp4".into()),
            size: (270, 270),
            position: (20, 790),
        }];
        let cmd = build_render_command(&spec, Path::new("/w/frame.png"), &overlays, 8.0, Path::new("/o/out.mp4"));
        let joined = cmd.build_args().join(" ");

        assert_eq!(cmd.input_count(), 2);
        assert!(joined.contains("-i /w/avatar.mp4"));
        assert!(joined.contains("-map [vout] -map 1:a:0"));
        assert!(joined.contains("-t 8.000"));
    }

    #[test]
    fn test_audio_path_follows_audio_source() {
        let avatar = CompositionSpec::builder(CanvasSize::LANDSCAPE, color())
            .layer(Layer::image("/w/product.png", FitBox::PRODUCT_WITH_AVATAR, Anchor::Center))
            .layer(Layer::video("/w/avatar.mp4", FitBox::AVATAR_INSET, Anchor::BottomLeft))
            .audio(AudioSource::Layer { index: 1 })
            .build()
            .unwrap();
        assert_eq!(
            FfmpegCompositor::audio_path(&avatar).unwrap(),
            PathBuf::from("/w/avatar.mp4")
        );

        let voiceover = CompositionSpec::builder(CanvasSize::SQUARE, color())
            .layer(Layer::image("/w/product.png", FitBox::PRODUCT, Anchor::Center))
            .audio(AudioSource::File {
                path: "/w/voice.mp3".into(),
            })
            .build()
            .unwrap();
        assert_eq!(
            FfmpegCompositor::audio_path(&voiceover).unwrap(),
            PathBuf::from("/w/voice.mp3")
        );
    }

    #[test]
    fn test_filter_graph_paints_back_to_front() {
        let overlays = vec![
            OverlayInput {
                source: LayerSource::Video("a.mp4".into()),
                size: (270, 270),
                position: (20, 790),
            },
            OverlayInput {
                source: LayerSource::Image("logo.png".into()),
                size: (100, 50),
                position: (960, 10),
            },
        ];

        let graph = build_filter_graph(&overlays, "yuv420p");
        assert_eq!(
            graph,
            "[1:v]scale=270:270,setsar=1[l0];\
             [0:v][l0]overlay=20:790:eof_action=repeat[v0];\
             [2:v]scale=100:50,setsar=1[l1];\
             [v0][l1]overlay=960:10:eof_action=repeat[v1];\
             [v1]format=yuv420p[vout]"
        );
    }

    #[tokio::test]
    async fn test_flatten_writes_canvas_sized_frame() {
        let dir = tempfile::tempdir().unwrap();
        let product_path = dir.path().join("product.png");
        let product = ::image::RgbaImage::from_pixel(30, 60, ::image::Rgba([200, 10, 10, 255]));
        tokio::fs::write(&product_path, ImageCompositor::encode_png(&product).unwrap())
            .await
            .unwrap();

        let spec = CompositionSpec::builder(CanvasSize::LANDSCAPE, color())
            .layer(Layer::image(&product_path, FitBox::PRODUCT, Anchor::Center))
            .audio(AudioSource::File {
                path: dir.path().join("voice.mp3"),
            })
            .build()
            .unwrap();

        let frame_path = dir.path().join("frame.png");
        FfmpegCompositor::new().flatten(&spec, &frame_path).await.unwrap();

        let frame = ::image::open(&frame_path).unwrap().to_rgba8();
        assert_eq!(frame.dimensions(), (1920, 1080));
        assert_eq!(frame.get_pixel(960, 540), &::image::Rgba([200, 10, 10, 255]));
        assert_eq!(frame.get_pixel(10, 10), &::image::Rgba([211, 211, 211, 255]));
    }

    #[tokio::test]
    async fn test_flatten_rejects_corrupt_product() {
        let dir = tempfile::tempdir().unwrap();
        let product_path = dir.path().join("product.png");
        tokio::fs::write(&product_path, b"not an image").await.unwrap();

        let spec = CompositionSpec::builder(CanvasSize::SQUARE, color())
            .layer(Layer::image(&product_path, FitBox::PRODUCT, Anchor::Center))
            .audio(AudioSource::File {
                path: dir.path().join("voice.mp3"),
            })
            .build()
            .unwrap();

        let err = FfmpegCompositor::new()
            .flatten(&spec, &dir.path().join("frame.png"))
            .await
            .unwrap_err();
        assert!(err.is_input_error());
    }
}
