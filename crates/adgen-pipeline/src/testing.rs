//! Fakes shared by the unit tests.

use std::path::PathBuf;
use std::sync::Mutex;

use adgen_media::{MediaError, MediaResult, RenderJob, RenderOutput, VideoRenderer};
use adgen_models::{CanvasPreset, CompositionSpec, GenerationMode, JobStatus, Rgb};
use adgen_providers::{
    AvatarIdentity, AvatarProvider, AvatarRequest, IdentityKind, PreparedIdentity, ProviderError,
    ProviderResult, RemoteStatus, SpeechSynthesizer, SynthesizedAudio,
};
use async_trait::async_trait;
use tokio::sync::watch;

use crate::validation::{GenerationRequest, ImageUpload};

pub fn request() -> GenerationRequest {
    GenerationRequest {
        product_image: ImageUpload {
            bytes: b"png".to_vec(),
            extension: "png".into(),
        },
        script: "Hello world".into(),
        background_image: None,
        background_color: Rgb::new(211, 211, 211),
        mode: GenerationMode::Voiceover,
        canvas: CanvasPreset::Square,
        presenter_image: None,
    }
}

#[derive(Debug, Clone, Copy)]
enum SpeechBehavior {
    Inline,
    Reject,
    /// Block until cancelled
    Hang,
}

pub struct FakeSpeech {
    behavior: SpeechBehavior,
}

impl FakeSpeech {
    pub fn inline() -> Self {
        Self {
            behavior: SpeechBehavior::Inline,
        }
    }

    pub fn rejecting() -> Self {
        Self {
            behavior: SpeechBehavior::Reject,
        }
    }

    pub fn hanging() -> Self {
        Self {
            behavior: SpeechBehavior::Hang,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSpeech {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn hosts_audio(&self) -> bool {
        false
    }

    async fn synthesize(
        &self,
        _text: &str,
        cancel: Option<watch::Receiver<bool>>,
    ) -> ProviderResult<SynthesizedAudio> {
        match self.behavior {
            SpeechBehavior::Inline => Ok(SynthesizedAudio::Inline {
                bytes: b"mp3".to_vec(),
                extension: "mp3".into(),
            }),
            SpeechBehavior::Reject => Err(ProviderError::submission("fake", "401 Unauthorized")),
            SpeechBehavior::Hang => {
                let Some(mut rx) = cancel else {
                    return Err(ProviderError::config("hanging speech needs a cancel channel"));
                };
                while !*rx.borrow() {
                    if rx.changed().await.is_err() {
                        break;
                    }
                }
                Err(ProviderError::Cancelled)
            }
        }
    }
}

pub struct FakeRenderer {
    duration_secs: f64,
    fail: bool,
    last_spec: Mutex<Option<CompositionSpec>>,
}

impl FakeRenderer {
    pub const OUTPUT: &'static [u8] = b"fake mp4";

    pub fn new(duration_secs: f64) -> Self {
        Self {
            duration_secs,
            fail: false,
            last_spec: Mutex::new(None),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(0.0)
        }
    }

    pub fn last_spec(&self) -> Option<CompositionSpec> {
        self.last_spec.lock().unwrap().clone()
    }
}

#[async_trait]
impl VideoRenderer for FakeRenderer {
    async fn render(&self, job: RenderJob<'_>) -> MediaResult<RenderOutput> {
        *self.last_spec.lock().unwrap() = Some(job.spec.clone());
        if self.fail {
            return Err(MediaError::ffmpeg_failed("encoder exploded", None, Some(1)));
        }
        if let Some(progress) = &job.progress {
            progress(0.5);
            progress(1.0);
        }
        tokio::fs::write(job.output, Self::OUTPUT).await?;
        Ok(RenderOutput {
            duration_secs: self.duration_secs,
        })
    }
}

/// Avatar provider whose job never leaves `processing`.
pub struct ScriptedAvatar;

impl ScriptedAvatar {
    pub fn never_done() -> Self {
        Self
    }
}

#[async_trait]
impl AvatarProvider for ScriptedAvatar {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn prepare_identity(&self, _identity: AvatarIdentity) -> ProviderResult<PreparedIdentity> {
        Ok(PreparedIdentity {
            kind: IdentityKind::Presenter,
            reference: "presenter".into(),
        })
    }

    async fn submit(&self, _request: &AvatarRequest) -> ProviderResult<String> {
        Ok("talk-1".into())
    }

    async fn fetch_status(&self, _job_id: &str) -> ProviderResult<RemoteStatus> {
        Ok(RemoteStatus::pending(JobStatus::Processing))
    }
}

/// Avatar provider that records the identity it was handed, along with how many
/// files the store held at that moment, then fails the job.
pub struct RecordingAvatar {
    root: PathBuf,
    seen: Mutex<Option<(AvatarIdentity, usize)>>,
}

impl RecordingAvatar {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            seen: Mutex::new(None),
        }
    }

    pub fn seen(&self) -> Option<(AvatarIdentity, usize)> {
        self.seen.lock().unwrap().clone()
    }

    fn stored_files(&self) -> usize {
        std::fs::read_dir(&self.root)
            .unwrap()
            .flatten()
            .filter(|scope| scope.path().is_dir())
            .map(|scope| std::fs::read_dir(scope.path()).unwrap().count())
            .sum()
    }
}

#[async_trait]
impl AvatarProvider for RecordingAvatar {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn prepare_identity(&self, identity: AvatarIdentity) -> ProviderResult<PreparedIdentity> {
        *self.seen.lock().unwrap() = Some((identity, self.stored_files()));
        Ok(PreparedIdentity {
            kind: IdentityKind::Photo,
            reference: "photo-1".into(),
        })
    }

    async fn submit(&self, _request: &AvatarRequest) -> ProviderResult<String> {
        Ok("talk-2".into())
    }

    async fn fetch_status(&self, _job_id: &str) -> ProviderResult<RemoteStatus> {
        Ok(RemoteStatus::failed("face not found"))
    }
}
