//! One-page web front end.
//!
//! | Route                  | Purpose                                         |
//! |------------------------|-------------------------------------------------|
//! | `GET /`                | text box, button, audio player, error line      |
//! | `POST /api/synthesize` | `{"text": "..."}` → `audio/wav`                 |
//! | `GET /health`          | liveness + output format                        |
//!
//! Every error, including a body that is not `{"text": string}` JSON, comes
//! back as `{"error": "...", "kind": "..."}`.
//!
//! Inference is blocking, so every request runs on tokio's blocking pool. The
//! WAV artifact is read back into memory and deleted before the response is
//! sent, so nothing on disk outlives the request.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    audio::{CHANNELS, SAMPLE_RATE},
    synth::{SynthError, Synthesizer},
};

const INDEX_HTML: &str = include_str!("index.html");

#[derive(Debug, Deserialize)]
pub struct SynthesizeRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

/// `kind` of errors raised before the request reaches the synthesizer.
pub const BAD_REQUEST_KIND: &str = "bad_request";

fn error_response(status: StatusCode, kind: &'static str, error: String) -> Response {
    (status, Json(ErrorBody { error, kind })).into_response()
}

impl IntoResponse for SynthError {
    fn into_response(self) -> Response {
        let status = if self.is_user_error() {
            tracing::info!(kind = self.kind(), "synthesis rejected: {}", self);
            StatusCode::UNPROCESSABLE_ENTITY
        } else {
            tracing::error!(kind = self.kind(), "synthesis failed: {}", self);
            match &self {
                SynthError::ModelLoad(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            }
        };
        error_response(status, self.kind(), self.to_string())
    }
}

/// Malformed body, missing `text` or wrong content type; keeps axum's status.
fn rejection_response(rejection: JsonRejection) -> Response {
    tracing::info!(status = %rejection.status(), "bad synthesis request: {}", rejection.body_text());
    error_response(rejection.status(), BAD_REQUEST_KIND, rejection.body_text())
}

/// Build the router around a loaded synthesizer.
pub fn router(synth: Arc<Synthesizer>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/synthesize", post(synthesize))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(synth)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health(State(synth): State<Arc<Synthesizer>>) -> Json<serde_json::Value> {
    let model = synth.model();
    Json(serde_json::json!({
        "status": "ok",
        "sample_rate": SAMPLE_RATE,
        "channels": CHANNELS,
        "speaker": synth.speaker().describe(),
        "model_dir": model.model_dir.as_ref().map(|dir| dir.display().to_string()),
        "mel_bins": model.config.num_mel_bins,
    }))
}

async fn synthesize(
    State(synth): State<Arc<Synthesizer>>,
    payload: Result<Json<SynthesizeRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(json) => json,
        Err(rejection) => return rejection_response(rejection),
    };
    let result = tokio::task::spawn_blocking(move || synth.synthesize_wav_bytes(&request.text)).await;

    match result {
        Ok(Ok(wav)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "audio/wav"), (header::CACHE_CONTROL, "no-store")],
            wav,
        )
            .into_response(),
        Ok(Err(err)) => err.into_response(),
        Err(join_err) => {
            tracing::error!("synthesis task aborted: {}", join_err);
            SynthError::Generation(anyhow::anyhow!("synthesis task aborted: {}", join_err))
                .into_response()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::tests::fake_model;
    use axum::{
        body::{to_bytes, Body},
        http::Request,
    };
    use tower::ServiceExt;

    fn app(dir: &std::path::Path) -> Router {
        let synth = Synthesizer::new(fake_model()).with_artifact_dir(dir.to_path_buf());
        router(Arc::new(synth))
    }

    fn post_json(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/synthesize")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_index_page() {
        let dir = tempfile::tempdir().unwrap();
        let resp = app(dir.path())
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let html = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(html.to_vec()).unwrap();
        assert!(html.contains("/api/synthesize"));
        assert!(html.contains("<audio"));
    }

    #[tokio::test]
    async fn test_synthesize_returns_wav() {
        let dir = tempfile::tempdir().unwrap();
        let resp = app(dir.path())
            .oneshot(post_json(r#"{"text": "Hello, World!"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "audio/wav");

        let wav = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let reader = hound::WavReader::new(std::io::Cursor::new(wav.to_vec())).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.spec().channels, 1);

        // The artifact is gone by the time the response exists.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_empty_text_is_422() {
        let dir = tempfile::tempdir().unwrap();
        let resp = app(dir.path()).oneshot(post_json(r#"{"text": "123"}"#)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = error_body(resp).await;
        assert_eq!(body["kind"], "empty_text");
        assert!(body["error"].as_str().unwrap().contains("123"));
    }

    async fn error_body(resp: Response) -> serde_json::Value {
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_missing_text_field_is_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let resp = app(dir.path()).oneshot(post_json("{}")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = error_body(resp).await;
        assert_eq!(body["kind"], BAD_REQUEST_KIND);
        assert!(body["error"].as_str().unwrap().contains("text"), "{}", body);
    }

    #[tokio::test]
    async fn test_malformed_json_is_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let resp = app(dir.path()).oneshot(post_json("hello world")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_body(resp).await["kind"], BAD_REQUEST_KIND);
    }

    #[tokio::test]
    async fn test_wrong_content_type_is_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::builder()
            .method("POST")
            .uri("/api/synthesize")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from(r#"{"text": "hi"}"#))
            .unwrap();
        let resp = app(dir.path()).oneshot(request).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(error_body(resp).await["kind"], BAD_REQUEST_KIND);
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let resp = app(dir.path())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["sample_rate"], 16_000);
        assert_eq!(body["speaker"], "random per request");
        assert_eq!(body["mel_bins"], 4);
        assert!(body["model_dir"].is_null());
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (SynthError::EmptyText { input: String::new() }, StatusCode::UNPROCESSABLE_ENTITY),
            (SynthError::Generation(anyhow::anyhow!("oom")), StatusCode::INTERNAL_SERVER_ERROR),
            (SynthError::ArtifactIo(anyhow::anyhow!("disk full")), StatusCode::INTERNAL_SERVER_ERROR),
            (SynthError::ModelLoad(anyhow::anyhow!("missing")), StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
