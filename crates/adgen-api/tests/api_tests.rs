//! Router tests with fake speech and rendering.

use std::sync::Arc;
use std::time::Duration;

use adgen_api::{create_router, ApiConfig, AppState};
use adgen_media::{MediaResult, RenderJob, RenderOutput, VideoRenderer};
use adgen_pipeline::{Orchestrator, PipelineConfig};
use adgen_providers::{ProviderResult, SpeechSynthesizer, SynthesizedAudio};
use adgen_storage::MediaAssetStore;
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::watch;
use tower::ServiceExt;

const BOUNDARY: &str = "adgen-test-boundary";
const VIDEO: &[u8] = b"not really an mp4";

struct SilentSpeech;

#[async_trait]
impl SpeechSynthesizer for SilentSpeech {
    fn name(&self) -> &'static str {
        "silent"
    }

    fn hosts_audio(&self) -> bool {
        false
    }

    async fn synthesize(
        &self,
        _text: &str,
        _cancel: Option<watch::Receiver<bool>>,
    ) -> ProviderResult<SynthesizedAudio> {
        Ok(SynthesizedAudio::Inline {
            bytes: b"mp3 bytes".to_vec(),
            extension: "mp3".into(),
        })
    }
}

struct StubRenderer;

#[async_trait]
impl VideoRenderer for StubRenderer {
    async fn render(&self, job: RenderJob<'_>) -> MediaResult<RenderOutput> {
        tokio::fs::write(job.output, VIDEO).await?;
        Ok(RenderOutput { duration_secs: 3.5 })
    }
}

struct Harness {
    _dir: TempDir,
    store: MediaAssetStore,
    router: Router,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = MediaAssetStore::new(dir.path().join("work")).await.unwrap();
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(SilentSpeech),
        Arc::new(StubRenderer),
        PipelineConfig::default(),
    )
    .unwrap();

    let state = AppState::from_parts(ApiConfig::default(), Arc::new(orchestrator));
    Harness {
        _dir: dir,
        store,
        router: create_router(state, None),
    }
}

enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

fn multipart(parts: &[Part<'_>]) -> Body {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n").as_bytes(),
                );
            }
            Part::File(name, filename, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
                body.extend_from_slice(b"\r\n");
            }
        }
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    Body::from(body)
}

fn form_request(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(multipart(parts))
        .unwrap()
}

fn empty_request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn valid_form<'a>() -> Vec<Part<'a>> {
    vec![
        Part::File("product_image", "shoe.png", b"png bytes"),
        Part::Text("script", "Meet the shoe that runs for you."),
    ]
}

#[tokio::test]
async fn test_generate_returns_attachment_and_cleans_up() {
    let h = harness().await;

    let response = send(&h.router, form_request("/api/generate", &valid_form())).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"marketing_video.mp4\""
    );
    assert!(response.headers().contains_key("x-request-id"));

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], VIDEO);
    assert_eq!(h.store.live_scopes().await.unwrap(), 0);
}

#[tokio::test]
async fn test_missing_script_is_rejected_before_any_work() {
    let h = harness().await;

    let parts = [Part::File("product_image", "shoe.png", b"png bytes")];
    let response = send(&h.router, form_request("/api/generate", &parts)).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["kind"], "validation_error");
    assert!(body["error"]["message"].as_str().unwrap().contains("script"));
    assert_eq!(h.store.live_scopes().await.unwrap(), 0);
}

#[tokio::test]
async fn test_disallowed_background_type() {
    let h = harness().await;

    let mut parts = valid_form();
    parts.push(Part::File("background_image", "bg.gif", b"GIF89a"));
    let response = send(&h.router, form_request("/api/generate", &parts)).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["kind"], "validation_error");
    assert!(body["error"]["message"].as_str().unwrap().contains("background_image"));
}

#[tokio::test]
async fn test_bad_background_color() {
    let h = harness().await;

    let mut parts = valid_form();
    parts.push(Part::Text("background_color", "#12345"));
    let response = send(&h.router, form_request("/api/generate", &parts)).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["kind"], "validation_error");
}

#[tokio::test]
async fn test_avatar_mode_without_provider() {
    let h = harness().await;

    let mut parts = valid_form();
    parts.push(Part::Text("mode", "avatar"));
    let response = send(&h.router, form_request("/api/jobs", &parts)).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["error"]["message"].as_str().unwrap().contains("avatar"));
}

#[tokio::test]
async fn test_health() {
    let h = harness().await;

    let response = send(&h.router, empty_request(Method::GET, "/health")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert_eq!(json_body(response).await["status"], "healthy");
}

#[tokio::test]
async fn test_job_lifecycle() {
    let h = harness().await;

    let response = send(&h.router, form_request("/api/jobs", &valid_form())).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let accepted = json_body(response).await;
    let job_id = accepted["job_id"].as_str().unwrap().to_string();
    assert_eq!(accepted["status_url"], format!("/api/jobs/{job_id}"));

    let mut status = Value::Null;
    for _ in 0..200 {
        let response = send(&h.router, empty_request(Method::GET, &format!("/api/jobs/{job_id}"))).await;
        assert_eq!(response.status(), StatusCode::OK);
        status = json_body(response).await;
        if status["status"] == "completed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status["status"], "completed");
    assert_eq!(status["video_ready"], true);
    assert_eq!(status["progress"], 1.0);
    assert_eq!(status["video_url"], format!("/api/jobs/{job_id}/video"));

    // Finished jobs cannot be cancelled
    let response = send(&h.router, empty_request(Method::DELETE, &format!("/api/jobs/{job_id}"))).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await["error"]["kind"], "conflict");

    let video_uri = format!("/api/jobs/{job_id}/video");
    let response = send(&h.router, empty_request(Method::GET, &video_uri)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], VIDEO);
    assert_eq!(h.store.live_scopes().await.unwrap(), 0);

    let response = send(&h.router, empty_request(Method::GET, &video_uri)).await;
    assert_eq!(response.status(), StatusCode::GONE);
    assert_eq!(json_body(response).await["error"]["kind"], "gone");
}

#[tokio::test]
async fn test_unknown_job() {
    let h = harness().await;

    let response = send(&h.router, empty_request(Method::GET, "/api/jobs/nope")).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"]["kind"], "not_found");
}
