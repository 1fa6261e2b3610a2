//! Transcript endpoint

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::api::server::AppState;
use crate::error::RelayError;
use crate::transcript::OutputFormat;

/// Query parameters for a transcript request
#[derive(Debug, Deserialize, Default)]
pub struct TranscriptQuery {
    pub language: Option<String>,
    pub format: Option<String>,
    /// Only return the requested language, never a substitute
    #[serde(default)]
    pub strict: bool,
}

/// Fetch the transcript of one video
pub async fn get_transcript(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    Query(query): Query<TranscriptQuery>,
) -> Result<impl IntoResponse, RelayError> {
    let format = match query.format.as_deref() {
        None => OutputFormat::default(),
        Some(raw) => OutputFormat::parse(raw).ok_or_else(|| {
            RelayError::InvalidRequest(format!(
                "unsupported format {:?}, expected text, srt or vtt",
                raw
            ))
        })?,
    };

    let response = state
        .service
        .transcript(&video_id, query.language.as_deref(), format, query.strict)
        .await?;
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use crate::api::routes::create_router;
    use crate::api::server::AppState;
    use crate::models::ProxyEndpoint;
    use crate::proxy::pool::ProxyPool;
    use crate::proxy::retry::{RetryOrchestrator, RetryPolicy};
    use crate::transcript::service::tests::FakeFetcher;
    use crate::transcript::service::FetchMode;
    use crate::transcript::{FetchError, LanguagePreferences, TranscriptService};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    type Script = fn(Option<&str>, &LanguagePreferences) -> Result<(), FetchError>;

    fn state(hosts: &[&str], script: Script) -> AppState {
        let endpoints = hosts
            .iter()
            .map(|h| ProxyEndpoint::new(h, 8080, "user", "pw").unwrap())
            .collect();
        let pool = Arc::new(ProxyPool::new(endpoints, Duration::ZERO));
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1),
            jitter: Duration::ZERO,
            ..RetryPolicy::default()
        };
        let mode = FetchMode::Pooled(RetryOrchestrator::new(pool, policy));
        AppState::new(Arc::new(TranscriptService::new(
            FakeFetcher::new(script),
            mode,
            "en",
        )))
    }

    async fn get(state: AppState, uri: &str) -> Response {
        create_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_transcript_success() {
        let response = get(state(&["a"], |_, _| Ok(())), "/transcript/abc123?language=de").await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_body(response).await;
        assert_eq!(json["video_id"], "abc123");
        assert_eq!(json["language_code"], "de");
        assert_eq!(json["source"], "fake");
        assert_eq!(json["format"], "text");
        assert_eq!(json["text"], "0:00 - Hello\n1:15 - again");
        assert!(json.get("translated_from").is_none());
    }

    #[tokio::test]
    async fn test_transcript_vtt_format() {
        let response = get(state(&["a"], |_, _| Ok(())), "/transcript/abc123?format=vtt").await;
        let json = json_body(response).await;
        assert_eq!(json["format"], "vtt");
        assert!(json["text"].as_str().unwrap().starts_with("WEBVTT"));
    }

    #[tokio::test]
    async fn test_transcript_rejects_unknown_format() {
        let response = get(state(&["a"], |_, _| Ok(())), "/transcript/abc123?format=pdf").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["kind"], "invalid_request");
    }

    #[tokio::test]
    async fn test_transcript_not_found_is_404() {
        let response = get(
            state(&["a", "b"], |_, _| Err(FetchError::NotFound("video unavailable".into()))),
            "/transcript/gone",
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["kind"], "not_found");
    }

    #[tokio::test]
    async fn test_transcript_pool_exhausted_is_503() {
        let response = get(
            state(&["a", "b"], |_, _| Err(FetchError::RateLimited("429".into()))),
            "/transcript/abc123",
        )
        .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().contains_key(header::RETRY_AFTER));
        assert_eq!(json_body(response).await["kind"], "proxy_pool_exhausted");
    }

    #[tokio::test]
    async fn test_transcript_strict_language_unavailable() {
        let response = get(
            state(&["a"], |_, prefs| {
                if prefs.allow_fallback {
                    Ok(())
                } else {
                    Err(FetchError::LanguageUnavailable("no fr".into()))
                }
            }),
            "/transcript/abc123?language=fr&strict=true",
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["kind"], "language_unavailable");
    }
}
