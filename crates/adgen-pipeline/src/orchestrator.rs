//! Generation orchestrator.
//!
//! Runs one validated request through its stages: store uploads, produce the
//! narration (voice-over or avatar video), fetch remote media, composite.
//! Intermediate files live in a work scope that is always released; the
//! rendered mp4 lives in its own scope handed to the caller.

use std::sync::Arc;
use std::time::Instant;

use adgen_media::{ProgressFn, RenderJob, VideoRenderer};
use adgen_models::{
    Anchor, AssetKind, AudioSource, BackgroundSpec, CompositionSpec,
    FitBox, GenerationJob, GenerationMode, JobId, Layer,
};
use adgen_providers::{
    AvatarIdentity, AvatarJobClient, AvatarRequest, AvatarScript, Downloader, ProviderError,
    SpeechSynthesizer, SynthesizedAudio,
};
use adgen_storage::{AssetHandle, AssetScope, MediaAssetStore};
use serde::Serialize;
use tokio::sync::watch;
use tracing::Instrument;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::logging::JobLogger;
use crate::retry::{retry_async, RetryConfig};
use crate::validation::{GenerationRequest, ValidationLimits};

/// Where a generation currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Queued,
    StoringUploads,
    Synthesizing,
    AwaitingAvatar,
    Downloading,
    Compositing,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Queued => "queued",
            Stage::StoringUploads => "storing_uploads",
            Stage::Synthesizing => "synthesizing",
            Stage::AwaitingAvatar => "awaiting_avatar",
            Stage::Downloading => "downloading",
            Stage::Compositing => "compositing",
            Stage::Done => "done",
        }
    }

    /// Overall progress when the stage starts.
    pub fn base_progress(&self) -> f64 {
        match self {
            Stage::Queued => 0.0,
            Stage::StoringUploads => 0.05,
            Stage::Synthesizing => 0.1,
            Stage::AwaitingAvatar => 0.25,
            Stage::Downloading => 0.65,
            Stage::Compositing => 0.7,
            Stage::Done => 1.0,
        }
    }
}

/// Something observable happened during a generation.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Stage(Stage),
    /// The avatar job changed (submitted, polled or settled)
    Avatar(GenerationJob),
    /// Render progress in `0.0..=1.0`
    Render(f64),
}

pub type EventFn = Arc<dyn Fn(PipelineEvent) + Send + Sync>;

/// Per-generation context: identity, cancellation and event sink.
#[derive(Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub cancel: Option<watch::Receiver<bool>>,
    pub events: Option<EventFn>,
}

impl JobContext {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            cancel: None,
            events: None,
        }
    }

    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_events(mut self, events: EventFn) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(events) = &self.events {
            events(event);
        }
    }

    fn stage(&self, stage: Stage) {
        self.emit(PipelineEvent::Stage(stage));
    }

    fn check_cancelled(&self) -> PipelineResult<()> {
        match &self.cancel {
            Some(rx) if *rx.borrow() => Err(PipelineError::Cancelled),
            _ => Ok(()),
        }
    }
}

/// A finished video. Dropping it (or releasing the scope) deletes the file.
#[derive(Debug)]
pub struct RenderedVideo {
    pub scope: AssetScope,
    pub video: AssetHandle,
    pub duration_secs: f64,
}

impl RenderedVideo {
    /// Read the mp4 and delete it.
    pub async fn into_bytes(self) -> PipelineResult<Vec<u8>> {
        let bytes = self.scope.read(&self.video).await;
        self.scope.release_all().await?;
        Ok(bytes?)
    }
}

/// Drives a request from validated input to rendered video.
pub struct Orchestrator {
    store: MediaAssetStore,
    speech: Arc<dyn SpeechSynthesizer>,
    avatar: Option<AvatarJobClient>,
    renderer: Arc<dyn VideoRenderer>,
    downloader: Downloader,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new(
        store: MediaAssetStore,
        speech: Arc<dyn SpeechSynthesizer>,
        renderer: Arc<dyn VideoRenderer>,
        config: PipelineConfig,
    ) -> PipelineResult<Self> {
        let downloader = Downloader::new(config.download_timeout)?;
        Ok(Self {
            store,
            speech,
            avatar: None,
            renderer,
            downloader,
            config,
        })
    }

    /// Enable avatar mode.
    pub fn with_avatar(mut self, avatar: AvatarJobClient) -> Self {
        self.avatar = Some(avatar);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &MediaAssetStore {
        &self.store
    }

    pub fn limits(&self) -> ValidationLimits {
        ValidationLimits::from(&self.config)
    }

    pub fn speech_provider(&self) -> &'static str {
        self.speech.name()
    }

    pub fn avatar_provider(&self) -> Option<&'static str> {
        self.avatar.as_ref().map(AvatarJobClient::provider_name)
    }

    /// Reject requests this server is not configured to serve.
    pub fn ensure_supported(&self, request: &GenerationRequest) -> PipelineResult<()> {
        if request.mode == GenerationMode::Avatar && self.avatar.is_none() {
            return Err(PipelineError::validation(
                "avatar mode is not available: no avatar provider is configured",
            ));
        }
        Ok(())
    }

    /// Produce a video for `request`.
    ///
    /// All intermediate files are deleted before this returns, on success and
    /// on every failure path.
    pub async fn generate(
        &self,
        request: GenerationRequest,
        ctx: &JobContext,
    ) -> PipelineResult<RenderedVideo> {
        let mode = request.mode;
        let logger = JobLogger::new(&ctx.job_id, mode);

        self.ensure_supported(&request)?;

        let span = logger.span();
        async move {
            logger.started(request.canvas.as_str(), request.script.chars().count());
            let started = Instant::now();

            let work = self.store.scope().await?;
            let output = self.store.scope().await?;

            let result = self.run(&request, &work, &output, ctx, &logger).await;

            if let Err(e) = work.release_all().await {
                logger.cleanup_failed("work", &e);
            }

            match result {
                Ok((video, duration_secs)) => {
                    let elapsed = started.elapsed().as_secs_f64();
                    metrics::counter!("adgen_generations_total", "mode" => mode.as_str(), "outcome" => "completed")
                        .increment(1);
                    metrics::histogram!("adgen_generation_duration_seconds", "mode" => mode.as_str())
                        .record(elapsed);
                    logger.finished(duration_secs, elapsed);
                    ctx.stage(Stage::Done);
                    Ok(RenderedVideo {
                        scope: output,
                        video,
                        duration_secs,
                    })
                }
                Err(e) => {
                    if let Err(release) = output.release_all().await {
                        logger.cleanup_failed("output", &release);
                    }
                    metrics::counter!(
                        "adgen_generations_total",
                        "mode" => mode.as_str(),
                        "outcome" => e.kind().as_str()
                    )
                    .increment(1);
                    logger.failed(&e);
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        request: &GenerationRequest,
        work: &AssetScope,
        output: &AssetScope,
        ctx: &JobContext,
        logger: &JobLogger,
    ) -> PipelineResult<(AssetHandle, f64)> {
        ctx.check_cancelled()?;
        ctx.stage(Stage::StoringUploads);

        let product = work
            .store_upload(
                AssetKind::ProductImage,
                &request.product_image.bytes,
                &request.product_image.extension,
            )
            .await?;

        let background = match &request.background_image {
            Some(image) => {
                let stored = work
                    .store_upload(AssetKind::BackgroundImage, &image.bytes, &image.extension)
                    .await?;
                BackgroundSpec::Image {
                    path: stored.path,
                    fit: self.config.background_image_fit,
                }
            }
            None => BackgroundSpec::Color {
                color: request.background_color,
            },
        };

        let canvas = request.canvas.size();
        let builder = CompositionSpec::builder(canvas, background);
        let builder = match request.mode {
            GenerationMode::Voiceover => {
                let audio = self.voiceover(request, work, ctx, logger).await?;
                builder
                    .layer(Layer::image(product.path, FitBox::PRODUCT, Anchor::Center))
                    .audio(AudioSource::File { path: audio.path })
            }
            GenerationMode::Avatar => {
                let clip = self.avatar_clip(request, work, ctx, logger).await?;
                builder
                    .layer(Layer::image(product.path, FitBox::PRODUCT_WITH_AVATAR, Anchor::Center))
                    .layer(Layer::video(clip.path, FitBox::AVATAR_INSET, Anchor::BottomLeft))
                    .audio(AudioSource::Layer { index: 1 })
                    .corner_margin(self.config.avatar_inset_margin)
            }
        };
        let spec = builder
            .build()
            .map_err(|e| PipelineError::internal(format!("invalid composition: {e}")))?;

        ctx.check_cancelled()?;
        ctx.stage(Stage::Compositing);

        let frame = work.allocate(AssetKind::Frame, "png");
        let video = output.allocate(AssetKind::Output, "mp4");
        let progress = ctx.events.clone().map(|events| -> ProgressFn {
            Arc::new(move |fraction: f64| events(PipelineEvent::Render(fraction)))
        });

        let rendered = self
            .renderer
            .render(RenderJob {
                spec: &spec,
                output: &video.path,
                frame_path: &frame.path,
                cancel: ctx.cancel.clone(),
                progress,
            })
            .await?;

        Ok((video, rendered.duration_secs))
    }

    /// Synthesize the script and make the audio a local file.
    async fn voiceover(
        &self,
        request: &GenerationRequest,
        work: &AssetScope,
        ctx: &JobContext,
        logger: &JobLogger,
    ) -> PipelineResult<AssetHandle> {
        ctx.stage(Stage::Synthesizing);
        let audio = self.speech.synthesize(&request.script, ctx.cancel.clone()).await?;
        logger.speech_ready(self.speech.name());

        match audio {
            SynthesizedAudio::Inline { bytes, extension } => {
                Ok(work.store_generated(AssetKind::Audio, &bytes, &extension).await?)
            }
            SynthesizedAudio::Remote { url, extension } => {
                ctx.check_cancelled()?;
                ctx.stage(Stage::Downloading);
                self.fetch(&url, AssetKind::Audio, &extension, work).await
            }
        }
    }

    /// Generate the talking-head clip and download it.
    async fn avatar_clip(
        &self,
        request: &GenerationRequest,
        work: &AssetScope,
        ctx: &JobContext,
        logger: &JobLogger,
    ) -> PipelineResult<AssetHandle> {
        let client = self
            .avatar
            .as_ref()
            .ok_or_else(|| PipelineError::internal("avatar provider missing"))?;

        let script = if self.speech.hosts_audio() {
            ctx.stage(Stage::Synthesizing);
            match self.speech.synthesize(&request.script, ctx.cancel.clone()).await? {
                SynthesizedAudio::Remote { url, .. } => AvatarScript::AudioUrl(url),
                SynthesizedAudio::Inline { .. } => AvatarScript::Text(request.script.clone()),
            }
        } else {
            AvatarScript::Text(request.script.clone())
        };

        let identity = match &request.presenter_image {
            Some(image) => AvatarIdentity::Image {
                bytes: image.bytes.clone(),
                extension: image.extension.clone(),
            },
            None => AvatarIdentity::Default,
        };

        ctx.check_cancelled()?;
        ctx.stage(Stage::AwaitingAvatar);

        let avatar_request = AvatarRequest {
            identity: client.prepare_identity(identity).await?,
            script,
            canvas: request.canvas.size(),
            background: request.background_color,
        };

        let mut job = client.submit(&avatar_request).await?;
        ctx.emit(PipelineEvent::Avatar(job.clone()));
        logger.avatar_submitted(&job);

        let outcome = client
            .await_completion(&mut job, ctx.cancel.clone(), |j| {
                ctx.emit(PipelineEvent::Avatar(j.clone()))
            })
            .await;
        logger.avatar_settled(&job);
        let url = outcome?;

        ctx.stage(Stage::Downloading);
        self.fetch(&url, AssetKind::AvatarVideo, "mp4", work).await
    }

    /// Download provider-hosted media into the work scope, with retry.
    async fn fetch(
        &self,
        url: &str,
        kind: AssetKind,
        extension: &str,
        work: &AssetScope,
    ) -> PipelineResult<AssetHandle> {
        let handle = work.allocate(kind, extension);
        let retry = RetryConfig::new(format!("{kind}_download"))
            .with_max_retries(self.config.download_retries)
            .with_base_delay(self.config.download_backoff);

        retry_async(&retry, ProviderError::is_retryable, || {
            self.downloader.download(url, &handle.path)
        })
        .await
        .into_result()?;

        Ok(handle)
    }
}
