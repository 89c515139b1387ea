//! JSON body extractor with structured rejections

use crate::types::IngressError;
use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
    http::StatusCode,
};
use serde::de::DeserializeOwned;

/// Like [`axum::Json`], but rejects with [`IngressError`] so malformed or
/// oversized bodies get the same `{"error": ...}` shape as every other failure
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = IngressError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => Err(map_rejection(rejection)),
        }
    }
}

fn map_rejection(rejection: JsonRejection) -> IngressError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return IngressError::PayloadTooLarge;
    }
    tracing::debug!(reason = %rejection.body_text(), "Rejected JSON body");
    IngressError::InvalidJson(rejection.body_text())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        body::Body,
        extract::DefaultBodyLimit,
        http::{Request, header},
        routing::post,
    };
    use http_body_util::BodyExt;
    use serde::Deserialize;
    use tower::ServiceExt;

    #[derive(Deserialize)]
    struct Note {
        text: String,
    }

    async fn handler(JsonBody(note): JsonBody<Note>) -> String {
        note.text
    }

    fn app() -> Router {
        Router::new()
            .route("/notes", post(handler))
            .layer(DefaultBodyLimit::max(64))
    }

    fn json_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/notes")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn error_code(response: axum::response::Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        body["error"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_valid_body() {
        let response = app().oneshot(json_request(r#"{"text":"hi"}"#)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"hi");
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let response = app().oneshot(json_request("{not json")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(response).await, "invalid_json");
    }

    #[tokio::test]
    async fn test_wrong_shape() {
        let response = app().oneshot(json_request(r#"{"body":"hi"}"#)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(response).await, "invalid_json");
    }

    #[tokio::test]
    async fn test_missing_content_type() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/notes")
                    .body(Body::from(r#"{"text":"hi"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(response).await, "invalid_json");
    }

    #[tokio::test]
    async fn test_oversized_body() {
        let body = format!(r#"{{"text":"{}"}}"#, "a".repeat(200));
        let response = app().oneshot(json_request(&body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(error_code(response).await, "payload_too_large");
    }
}
