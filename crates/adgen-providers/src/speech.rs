//! Text-to-speech providers.

use std::time::Duration;

use adgen_models::{GenerationJob, JobStatus, PollPolicy};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{ProviderError, ProviderResult};
use crate::http::{build_client, describe_failure, required_env, timeout_from_env, trim_base_url};
use crate::poll::{poll_until_terminal, RemoteStatus};

/// Voice-over produced by a speech provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesizedAudio {
    /// Audio returned in the response body
    Inline { bytes: Vec<u8>, extension: String },
    /// Audio hosted by the provider
    Remote { url: String, extension: String },
}

impl SynthesizedAudio {
    pub fn extension(&self) -> &str {
        match self {
            SynthesizedAudio::Inline { extension, .. } | SynthesizedAudio::Remote { extension, .. } => {
                extension
            }
        }
    }
}

/// Turns script text into speech.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether results come back as a hosted URL (usable as avatar audio).
    fn hosts_audio(&self) -> bool;

    async fn synthesize(
        &self,
        text: &str,
        cancel: Option<watch::Receiver<bool>>,
    ) -> ProviderResult<SynthesizedAudio>;
}

// ---------------------------------------------------------------------------
// Azure
// ---------------------------------------------------------------------------

/// Configuration for Azure text-to-speech.
#[derive(Debug, Clone)]
pub struct AzureSpeechConfig {
    pub api_key: String,
    pub region: String,
    /// Overrides the regional endpoint
    pub base_url: Option<String>,
    pub voice: String,
    pub output_format: String,
    pub timeout: Duration,
}

impl AzureSpeechConfig {
    pub fn new(api_key: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            region: region.into(),
            base_url: None,
            voice: "en-US-JennyNeural".to_string(),
            output_format: "audio-24khz-48kbitrate-mono-mp3".to_string(),
            timeout: timeout_from_env(),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> ProviderResult<Self> {
        let mut config = Self::new(
            required_env("AZURE_SPEECH_KEY")?,
            required_env("AZURE_SPEECH_REGION")?,
        );
        config.base_url = std::env::var("AZURE_SPEECH_URL").ok();
        if let Ok(voice) = std::env::var("AZURE_SPEECH_VOICE") {
            config.voice = voice;
        }
        if let Ok(format) = std::env::var("AZURE_SPEECH_FORMAT") {
            config.output_format = format;
        }
        Ok(config)
    }

    fn endpoint(&self) -> String {
        let base = self
            .base_url
            .clone()
            .unwrap_or_else(|| format!("https://{}.tts.speech.microsoft.com", self.region));
        format!("{}/cognitiveservices/v1", trim_base_url(base))
    }
}

/// Azure Cognitive Services speech: one SSML request, mp3 bytes back.
pub struct AzureSpeech {
    http: Client,
    config: AzureSpeechConfig,
}

impl AzureSpeech {
    pub fn new(config: AzureSpeechConfig) -> ProviderResult<Self> {
        let http = build_client(config.timeout)?;
        Ok(Self { http, config })
    }

    fn ssml(&self, text: &str) -> String {
        format!(
            "<speak version='1.0' xml:lang='en-US'><voice name='{}'>{}</voice></speak>",
            escape_xml(&self.config.voice),
            escape_xml(text)
        )
    }
}

#[async_trait]
impl SpeechSynthesizer for AzureSpeech {
    fn name(&self) -> &'static str {
        "azure"
    }

    fn hosts_audio(&self) -> bool {
        false
    }

    async fn synthesize(
        &self,
        text: &str,
        _cancel: Option<watch::Receiver<bool>>,
    ) -> ProviderResult<SynthesizedAudio> {
        let url = self.config.endpoint();
        debug!("Requesting speech from {}", url);

        let response = self
            .http
            .post(&url)
            .header("Ocp-Apim-Subscription-Key", &self.config.api_key)
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", &self.config.output_format)
            .body(self.ssml(text))
            .send()
            .await
            .map_err(|e| ProviderError::submission(self.name(), e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::submission(
                self.name(),
                describe_failure(response).await,
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProviderError::submission(self.name(), e.to_string()))?;
        if bytes.is_empty() {
            return Err(ProviderError::submission(self.name(), "empty audio response"));
        }

        info!(bytes = bytes.len(), "Synthesized speech");
        Ok(SynthesizedAudio::Inline {
            bytes: bytes.to_vec(),
            extension: "mp3".to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Play.ht
// ---------------------------------------------------------------------------

/// Configuration for Play.ht text-to-speech.
#[derive(Debug, Clone)]
pub struct PlayHtConfig {
    pub api_key: String,
    pub user_id: String,
    pub base_url: String,
    pub voice: String,
    pub speed: f32,
    pub sample_rate: u32,
    pub output_format: String,
    pub poll: PollPolicy,
    pub timeout: Duration,
}

impl PlayHtConfig {
    pub fn new(api_key: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            user_id: user_id.into(),
            base_url: "https://play.ht".to_string(),
            voice: "s3://voice-cloning-zero-shot/ai_female_voice_1/manifest.json".to_string(),
            speed: 1.0,
            sample_rate: 24_000,
            output_format: "mp3".to_string(),
            poll: PollPolicy::speech(),
            timeout: timeout_from_env(),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> ProviderResult<Self> {
        let mut config = Self::new(required_env("PLAYHT_API_KEY")?, required_env("PLAYHT_USER_ID")?);
        if let Ok(url) = std::env::var("PLAYHT_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(voice) = std::env::var("PLAYHT_VOICE") {
            config.voice = voice;
        }
        if let Some(speed) = std::env::var("PLAYHT_SPEED").ok().and_then(|s| s.parse().ok()) {
            config.speed = speed;
        }
        if let Some(rate) = std::env::var("PLAYHT_SAMPLE_RATE").ok().and_then(|s| s.parse().ok()) {
            config.sample_rate = rate;
        }
        config.poll = PollPolicy::from_env("SPEECH", PollPolicy::speech());
        Ok(config)
    }
}

#[derive(Debug, Serialize)]
struct PlayHtRequest<'a> {
    voice: &'a str,
    text: &'a str,
    output_format: &'a str,
    speed: f32,
    sample_rate: u32,
}

#[derive(Debug, Deserialize)]
struct PlayHtSubmitted {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlayHtStatus {
    status: Option<String>,
    #[serde(rename = "audioUrl")]
    audio_url: Option<String>,
    #[serde(alias = "message")]
    error: Option<serde_json::Value>,
}

/// Play.ht speech: submit, then poll until the audio is hosted.
pub struct PlayHtSpeech {
    http: Client,
    config: PlayHtConfig,
}

impl PlayHtSpeech {
    pub fn new(config: PlayHtConfig) -> ProviderResult<Self> {
        let mut config = config;
        config.base_url = trim_base_url(config.base_url);
        let http = build_client(config.timeout)?;
        Ok(Self { http, config })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.config.base_url, path))
            .header("AUTHORIZATION", &self.config.api_key)
            .header("X-USER-ID", &self.config.user_id)
            .header("accept", "application/json")
    }

    async fn submit(&self, text: &str) -> ProviderResult<String> {
        let body = PlayHtRequest {
            voice: &self.config.voice,
            text,
            output_format: &self.config.output_format,
            speed: self.config.speed,
            sample_rate: self.config.sample_rate,
        };

        let response = self
            .request(reqwest::Method::POST, "/api/v2/tts")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::submission(self.name(), e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::submission(
                self.name(),
                describe_failure(response).await,
            ));
        }

        let submitted: PlayHtSubmitted = response
            .json()
            .await
            .map_err(|e| ProviderError::submission(self.name(), format!("malformed response: {e}")))?;

        submitted
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ProviderError::submission(self.name(), "response carried no job id"))
    }

    async fn fetch_status(&self, id: &str) -> ProviderResult<RemoteStatus> {
        let response = self
            .request(reqwest::Method::GET, &format!("/api/v2/tts/{id}"))
            .send()
            .await
            .map_err(|e| ProviderError::transient(self.name(), e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::transient(
                self.name(),
                describe_failure(response).await,
            ));
        }

        let body: PlayHtStatus = response
            .json()
            .await
            .map_err(|e| ProviderError::transient(self.name(), format!("malformed status: {e}")))?;

        Ok(map_playht_status(body))
    }
}

fn map_playht_status(body: PlayHtStatus) -> RemoteStatus {
    let status = body.status.unwrap_or_default().to_ascii_lowercase();
    match status.as_str() {
        "complete" | "completed" => RemoteStatus {
            status: JobStatus::Completed,
            result_url: body.audio_url,
            error_detail: None,
        },
        "error" | "failed" => RemoteStatus::failed(
            body.error
                .map(|e| match e {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })
                .unwrap_or_else(|| status.clone()),
        ),
        "processing" | "generating" => RemoteStatus::pending(JobStatus::Processing),
        // queued, pending and anything unrecognized
        _ => RemoteStatus::pending(JobStatus::Queued),
    }
}

#[async_trait]
impl SpeechSynthesizer for PlayHtSpeech {
    fn name(&self) -> &'static str {
        "play.ht"
    }

    fn hosts_audio(&self) -> bool {
        true
    }

    async fn synthesize(
        &self,
        text: &str,
        cancel: Option<watch::Receiver<bool>>,
    ) -> ProviderResult<SynthesizedAudio> {
        let id = self.submit(text).await?;
        info!(job_id = %id, "Submitted speech job");

        let mut job = GenerationJob::submitted(self.name(), id.clone());
        let url = poll_until_terminal(&mut job, self.config.poll, cancel, |_| {}, || {
            self.fetch_status(&id)
        })
        .await?;

        Ok(SynthesizedAudio::Remote {
            url,
            extension: self.config.output_format.clone(),
        })
    }
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
