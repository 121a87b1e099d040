//! Application state.

use std::sync::Arc;

use adgen_media::{FfmpegCompositor, VideoRenderer};
use adgen_pipeline::{JobRegistry, Orchestrator, PipelineConfig};
use adgen_providers::{
    AvatarJobClient, AvatarProvider, AzureSpeech, AzureSpeechConfig, DidClient, HeyGenClient,
    PlayHtConfig, PlayHtSpeech, SpeechSynthesizer,
};
use adgen_storage::{MediaAssetStore, StoreConfig};
use anyhow::{bail, Context};
use tracing::info;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub orchestrator: Arc<Orchestrator>,
    pub jobs: JobRegistry,
}

impl AppState {
    /// Create new application state from the environment.
    pub async fn new(config: ApiConfig) -> anyhow::Result<Self> {
        let store = MediaAssetStore::from_config(&StoreConfig::from_env())
            .await
            .context("failed to open the work directory")?;
        let pipeline = PipelineConfig::from_env()?;

        let speech = speech_from_env()?;
        let renderer: Arc<dyn VideoRenderer> =
            Arc::new(FfmpegCompositor::new().with_timeout(pipeline.render_timeout_secs));

        let avatar = avatar_from_env()?;
        if let Some(provider) = &avatar {
            check_avatar_script(speech.as_ref(), provider.as_ref())?;
        }

        let avatar_policy = pipeline.avatar_poll;
        let mut orchestrator = Orchestrator::new(store, speech, renderer, pipeline)?;
        if let Some(provider) = avatar {
            orchestrator = orchestrator.with_avatar(AvatarJobClient::new(provider, avatar_policy));
        }

        info!(
            speech = orchestrator.speech_provider(),
            avatar = orchestrator.avatar_provider().unwrap_or("none"),
            "Providers configured"
        );

        Ok(Self::from_parts(config, Arc::new(orchestrator)))
    }

    /// Assemble state around an already-built orchestrator.
    pub fn from_parts(config: ApiConfig, orchestrator: Arc<Orchestrator>) -> Self {
        let jobs = JobRegistry::new(Arc::clone(&orchestrator));
        Self {
            config,
            orchestrator,
            jobs,
        }
    }
}

fn speech_from_env() -> anyhow::Result<Arc<dyn SpeechSynthesizer>> {
    let name = std::env::var("SPEECH_PROVIDER").unwrap_or_else(|_| "azure".to_string());
    let speech: Arc<dyn SpeechSynthesizer> = match name.to_lowercase().as_str() {
        "azure" => Arc::new(AzureSpeech::new(AzureSpeechConfig::from_env()?)?),
        "playht" => Arc::new(PlayHtSpeech::new(PlayHtConfig::from_env()?)?),
        other => bail!("unknown SPEECH_PROVIDER '{other}' (expected azure or playht)"),
    };
    Ok(speech)
}

fn avatar_from_env() -> anyhow::Result<Option<Arc<dyn AvatarProvider>>> {
    let name = std::env::var("AVATAR_PROVIDER").unwrap_or_else(|_| "none".to_string());
    let provider: Arc<dyn AvatarProvider> = match name.to_lowercase().as_str() {
        "" | "none" => return Ok(None),
        "did" | "d-id" => Arc::new(DidClient::from_env()?),
        "heygen" => Arc::new(HeyGenClient::from_env()?),
        other => bail!("unknown AVATAR_PROVIDER '{other}' (expected none, did or heygen)"),
    };
    Ok(Some(provider))
}

/// Without hosted audio the avatar gets the raw script, so it must have a voice of its own.
fn check_avatar_script(speech: &dyn SpeechSynthesizer, avatar: &dyn AvatarProvider) -> anyhow::Result<()> {
    if !speech.hosts_audio() && !avatar.speaks_text() {
        bail!(
            "AVATAR_PROVIDER={} cannot voice text scripts from SPEECH_PROVIDER={} (set HEYGEN_VOICE_ID)",
            avatar.name(),
            speech.name()
        );
    }
    Ok(())
}
