//! HeyGen video API.

use std::io::Cursor;
use std::time::Duration;

use adgen_models::JobStatus;
use async_trait::async_trait;
use image::{DynamicImage, ImageOutputFormat};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{AvatarIdentity, AvatarProvider, AvatarRequest, AvatarScript, IdentityKind, PreparedIdentity};
use crate::error::{ProviderError, ProviderResult};
use crate::http::{build_client, describe_failure, required_env, timeout_from_env, trim_base_url};
use crate::poll::RemoteStatus;

const PROVIDER: &str = "heygen";
const JPEG_QUALITY: u8 = 90;

/// Configuration for the HeyGen client.
#[derive(Debug, Clone)]
pub struct HeyGenConfig {
    pub api_key: String,
    /// Stock avatar used when the client uploads no photo
    pub avatar_id: String,
    /// Voice for text scripts; audio-URL scripts don't need one
    pub voice_id: Option<String>,
    pub base_url: String,
    pub upload_url: String,
    pub timeout: Duration,
}

impl HeyGenConfig {
    pub fn new(api_key: impl Into<String>, avatar_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            avatar_id: avatar_id.into(),
            voice_id: None,
            base_url: "https://api.heygen.com".to_string(),
            upload_url: "https://upload.heygen.com".to_string(),
            timeout: timeout_from_env(),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> ProviderResult<Self> {
        let mut config = Self::new(required_env("HEYGEN_API_KEY")?, required_env("HEYGEN_AVATAR_ID")?);
        config.voice_id = std::env::var("HEYGEN_VOICE_ID").ok().filter(|v| !v.is_empty());
        if let Ok(url) = std::env::var("HEYGEN_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(url) = std::env::var("HEYGEN_UPLOAD_URL") {
            config.upload_url = url;
        }
        Ok(config)
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct VideoCreated {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PhotoUploaded {
    #[serde(alias = "id")]
    talking_photo_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoStatus {
    status: Option<String>,
    video_url: Option<String>,
    error: Option<serde_json::Value>,
}

/// HeyGen client.
pub struct HeyGenClient {
    http: Client,
    config: HeyGenConfig,
}

impl HeyGenClient {
    pub fn new(mut config: HeyGenConfig) -> ProviderResult<Self> {
        config.base_url = trim_base_url(config.base_url);
        config.upload_url = trim_base_url(config.upload_url);
        let http = build_client(config.timeout)?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> ProviderResult<Self> {
        Self::new(HeyGenConfig::from_env()?)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("X-Api-Key", &self.config.api_key)
            .header("accept", "application/json")
    }

    fn video_input(&self, request: &AvatarRequest) -> ProviderResult<serde_json::Value> {
        let character = match request.identity.kind {
            IdentityKind::Presenter => json!({
                "type": "avatar",
                "avatar_id": request.identity.reference,
                "avatar_style": "normal",
            }),
            IdentityKind::Photo => json!({
                "type": "talking_photo",
                "talking_photo_id": request.identity.reference,
            }),
        };

        let voice = match &request.script {
            AvatarScript::AudioUrl(url) => json!({"type": "audio", "audio_url": url}),
            AvatarScript::Text(text) => {
                let voice_id = self
                    .config
                    .voice_id
                    .as_ref()
                    .ok_or_else(|| ProviderError::config("HEYGEN_VOICE_ID is required for text scripts"))?;
                json!({"type": "text", "input_text": text, "voice_id": voice_id})
            }
        };

        Ok(json!({
            "video_inputs": [{
                "character": character,
                "voice": voice,
                "background": {"type": "color", "value": request.background.to_hex()},
            }],
            "dimension": {"width": request.canvas.width, "height": request.canvas.height},
        }))
    }
}

/// Re-encode any supported image as baseline RGB JPEG.
fn to_jpeg(bytes: &[u8]) -> ProviderResult<Vec<u8>> {
    let image = image::load_from_memory(bytes).map_err(|e| ProviderError::InvalidImage(e.to_string()))?;
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    let mut out = Cursor::new(Vec::new());
    rgb.write_to(&mut out, ImageOutputFormat::Jpeg(JPEG_QUALITY))
        .map_err(|e| ProviderError::InvalidImage(e.to_string()))?;
    Ok(out.into_inner())
}

fn error_text(value: Option<serde_json::Value>) -> Option<String> {
    match value? {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn map_video_status(body: VideoStatus) -> RemoteStatus {
    match body.status.as_deref().unwrap_or_default() {
        "completed" => RemoteStatus {
            status: JobStatus::Completed,
            result_url: body.video_url,
            error_detail: None,
        },
        "failed" => RemoteStatus::failed(error_text(body.error).unwrap_or_else(|| "video failed".to_string())),
        "processing" => RemoteStatus::pending(JobStatus::Processing),
        // pending, waiting and anything unrecognized
        _ => RemoteStatus::pending(JobStatus::Queued),
    }
}

#[async_trait]
impl AvatarProvider for HeyGenClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn speaks_text(&self) -> bool {
        self.config.voice_id.is_some()
    }

    async fn prepare_identity(&self, identity: AvatarIdentity) -> ProviderResult<PreparedIdentity> {
        let bytes = match identity {
            AvatarIdentity::Default => {
                return Ok(PreparedIdentity {
                    kind: IdentityKind::Presenter,
                    reference: self.config.avatar_id.clone(),
                })
            }
            AvatarIdentity::Image { bytes, .. } => bytes,
        };

        let jpeg = tokio::task::spawn_blocking(move || to_jpeg(&bytes))
            .await
            .map_err(|e| ProviderError::InvalidImage(e.to_string()))??;

        let response = self
            .authed(self.http.post(format!("{}/v1/talking_photo", self.config.upload_url)))
            .header("Content-Type", "image/jpeg")
            .body(jpeg)
            .send()
            .await
            .map_err(|e| ProviderError::submission(PROVIDER, e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::submission(PROVIDER, describe_failure(response).await));
        }

        let uploaded: Envelope<PhotoUploaded> = response
            .json()
            .await
            .map_err(|e| ProviderError::submission(PROVIDER, format!("malformed upload response: {e}")))?;
        let id = uploaded
            .data
            .and_then(|d| d.talking_photo_id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                let detail = error_text(uploaded.error).unwrap_or_else(|| "no talking photo id".to_string());
                ProviderError::submission(PROVIDER, detail)
            })?;

        debug!(talking_photo_id = %id, "Uploaded talking photo");
        Ok(PreparedIdentity {
            kind: IdentityKind::Photo,
            reference: id,
        })
    }

    async fn submit(&self, request: &AvatarRequest) -> ProviderResult<String> {
        let body = self.video_input(request)?;

        let response = self
            .authed(self.http.post(format!("{}/v2/video/generate", self.config.base_url)))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::submission(PROVIDER, e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::submission(PROVIDER, describe_failure(response).await));
        }

        let created: Envelope<VideoCreated> = response
            .json()
            .await
            .map_err(|e| ProviderError::submission(PROVIDER, format!("malformed response: {e}")))?;

        let error = created.error;
        created
            .data
            .and_then(|d| d.video_id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                let detail = error_text(error).unwrap_or_else(|| "response carried no video id".to_string());
                ProviderError::submission(PROVIDER, detail)
            })
    }

    async fn fetch_status(&self, job_id: &str) -> ProviderResult<RemoteStatus> {
        let response = self
            .authed(self.http.get(format!("{}/v1/video_status.get", self.config.base_url)))
            .query(&[("video_id", job_id)])
            .send()
            .await
            .map_err(|e| ProviderError::transient(PROVIDER, e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::transient(PROVIDER, describe_failure(response).await));
        }

        let body: Envelope<VideoStatus> = response
            .json()
            .await
            .map_err(|e| ProviderError::transient(PROVIDER, format!("malformed status: {e}")))?;

        body.data
            .map(map_video_status)
            .ok_or_else(|| ProviderError::transient(PROVIDER, "status response carried no data"))
    }
}
