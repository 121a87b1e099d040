//! D-ID talks API.

use std::time::Duration;

use adgen_models::JobStatus;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{AvatarIdentity, AvatarProvider, AvatarRequest, AvatarScript, IdentityKind, PreparedIdentity};
use crate::error::{ProviderError, ProviderResult};
use crate::http::{build_client, describe_failure, required_env, timeout_from_env, trim_base_url};
use crate::poll::RemoteStatus;

const PROVIDER: &str = "d-id";

/// Configuration for the D-ID client.
#[derive(Debug, Clone)]
pub struct DidConfig {
    /// API key as issued (already base64 `user:secret`)
    pub api_key: String,
    pub base_url: String,
    /// Presenter photo used when the client uploads none
    pub presenter_url: String,
    /// Voice for text scripts
    pub voice_id: String,
    pub timeout: Duration,
}

impl DidConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.d-id.com".to_string(),
            presenter_url: "https://create-images-results.d-id.com/DefaultPresenters/Noelle-Hi.png"
                .to_string(),
            voice_id: "en-US-JennyNeural".to_string(),
            timeout: timeout_from_env(),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> ProviderResult<Self> {
        let mut config = Self::new(required_env("DID_API_KEY")?);
        if let Ok(url) = std::env::var("DID_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(url) = std::env::var("DID_PRESENTER_URL") {
            config.presenter_url = url;
        }
        if let Ok(voice) = std::env::var("DID_VOICE_ID") {
            config.voice_id = voice;
        }
        Ok(config)
    }
}

#[derive(Debug, Deserialize)]
struct TalkCreated {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageUploaded {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TalkStatus {
    status: Option<String>,
    result_url: Option<String>,
    error: Option<serde_json::Value>,
}

/// D-ID client.
pub struct DidClient {
    http: Client,
    config: DidConfig,
}

impl DidClient {
    pub fn new(mut config: DidConfig) -> ProviderResult<Self> {
        config.base_url = trim_base_url(config.base_url);
        let http = build_client(config.timeout)?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> ProviderResult<Self> {
        Self::new(DidConfig::from_env()?)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("Authorization", format!("Basic {}", self.config.api_key))
            .header("accept", "application/json")
    }

    fn script_body(&self, script: &AvatarScript) -> serde_json::Value {
        match script {
            AvatarScript::Text(text) => json!({
                "type": "text",
                "input": text,
                "provider": {"type": "microsoft", "voice_id": self.config.voice_id},
            }),
            AvatarScript::AudioUrl(url) => json!({
                "type": "audio",
                "audio_url": url,
            }),
        }
    }
}

fn map_talk_status(body: TalkStatus) -> RemoteStatus {
    match body.status.as_deref().unwrap_or_default() {
        "done" => RemoteStatus {
            status: JobStatus::Completed,
            result_url: body.result_url,
            error_detail: None,
        },
        "error" | "rejected" => RemoteStatus::failed(
            body.error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "talk failed".to_string()),
        ),
        "started" => RemoteStatus::pending(JobStatus::Processing),
        // created and anything unrecognized
        _ => RemoteStatus::pending(JobStatus::Queued),
    }
}

#[async_trait]
impl AvatarProvider for DidClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn prepare_identity(&self, identity: AvatarIdentity) -> ProviderResult<PreparedIdentity> {
        let (bytes, extension) = match identity {
            AvatarIdentity::Default => {
                return Ok(PreparedIdentity {
                    kind: IdentityKind::Presenter,
                    reference: self.config.presenter_url.clone(),
                })
            }
            AvatarIdentity::Image { bytes, extension } => (bytes, extension),
        };

        let mime = match extension.as_str() {
            "png" => "image/png",
            _ => "image/jpeg",
        };
        let part = Part::bytes(bytes)
            .file_name(format!("presenter.{extension}"))
            .mime_str(mime)
            .map_err(|e| ProviderError::submission(PROVIDER, e.to_string()))?;

        let response = self
            .authed(self.http.post(format!("{}/images", self.config.base_url)))
            .multipart(Form::new().part("image", part))
            .send()
            .await
            .map_err(|e| ProviderError::submission(PROVIDER, e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::submission(PROVIDER, describe_failure(response).await));
        }

        let uploaded: ImageUploaded = response
            .json()
            .await
            .map_err(|e| ProviderError::submission(PROVIDER, format!("malformed upload response: {e}")))?;
        let url = uploaded
            .url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ProviderError::submission(PROVIDER, "image upload returned no url"))?;

        debug!(url = %url, "Uploaded presenter image");
        Ok(PreparedIdentity {
            kind: IdentityKind::Photo,
            reference: url,
        })
    }

    async fn submit(&self, request: &AvatarRequest) -> ProviderResult<String> {
        let body = json!({
            "source_url": request.identity.reference,
            "script": self.script_body(&request.script),
            "config": {"result_format": "mp4"},
        });

        let response = self
            .authed(self.http.post(format!("{}/talks", self.config.base_url)))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::submission(PROVIDER, e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::submission(PROVIDER, describe_failure(response).await));
        }

        let created: TalkCreated = response
            .json()
            .await
            .map_err(|e| ProviderError::submission(PROVIDER, format!("malformed response: {e}")))?;

        created
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ProviderError::submission(PROVIDER, "response carried no talk id"))
    }

    async fn fetch_status(&self, job_id: &str) -> ProviderResult<RemoteStatus> {
        let response = self
            .authed(self.http.get(format!("{}/talks/{}", self.config.base_url, job_id)))
            .send()
            .await
            .map_err(|e| ProviderError::transient(PROVIDER, e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::transient(PROVIDER, describe_failure(response).await));
        }

        let body: TalkStatus = response
            .json()
            .await
            .map_err(|e| ProviderError::transient(PROVIDER, format!("malformed status: {e}")))?;

        Ok(map_talk_status(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(json: &str) -> RemoteStatus {
        map_talk_status(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_talk_status_mapping() {
        assert_eq!(status(r#"{"status": "created"}"#).status, JobStatus::Queued);
        assert_eq!(status(r#"{"status": "started"}"#).status, JobStatus::Processing);
        assert_eq!(
            status(r#"{"status": "done", "result_url": "https://d-id/r.mp4"}"#),
            RemoteStatus::completed("https://d-id/r.mp4")
        );

        let failed = status(r#"{"status": "error", "error": {"kind": "FaceError", "description": "no face"}}"#);
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.error_detail.unwrap().contains("no face"));

        assert_eq!(status(r#"{"status": "rejected"}"#).status, JobStatus::Failed);
        assert_eq!(status(r#"{"status": "mystery"}"#).status, JobStatus::Queued);
    }

    #[test]
    fn test_audio_script_body() {
        let client = DidClient::new(DidConfig::new("key")).unwrap();
        let body = client.script_body(&AvatarScript::AudioUrl("https://a/v.mp3".into()));
        assert_eq!(body["type"], "audio");
        assert_eq!(body["audio_url"], "https://a/v.mp3");

        let body = client.script_body(&AvatarScript::Text("Hi".into()));
        assert_eq!(body["type"], "text");
        assert_eq!(body["input"], "Hi");
    }
}
