//! Shared ingress middleware

use crate::types::IngressError;
use axum::{
    extract::Request,
    http::{HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use teaim_core::{REQUEST_ID_HEADER, RequestId};
use tracing::Instrument;

/// Tag every request with an id and run the rest of the stack inside a span
/// carrying it.
///
/// A well-formed incoming `x-request-id` is kept; otherwise a fresh one is
/// generated. The id is stored as a [`RequestId`] extension for handlers and
/// echoed on the response.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let headers = req.headers();

    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(RequestId::from_header)
        .unwrap_or_else(RequestId::generate);

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

/// Reject requests whose declared `Content-Length` exceeds `max_size`.
///
/// Bodies without a usable length header pass through; the JSON extractor
/// enforces the limit on the bytes actually read.
pub async fn body_limit_middleware(req: Request, next: Next, max_size: usize) -> Response {
    if let Some(content_length) = req.headers().get(header::CONTENT_LENGTH)
        && let Ok(length_str) = content_length.to_str()
        && let Ok(length) = length_str.parse::<usize>()
        && length > max_size
    {
        tracing::debug!(length, max_size, "Rejecting oversized request body");
        return IngressError::PayloadTooLarge.into_response();
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Extension, Router,
        body::Body,
        http::{Request, StatusCode},
        middleware,
        routing::{get, post},
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn test_handler() -> &'static str {
        "OK"
    }

    async fn echo_request_id(Extension(id): Extension<RequestId>) -> String {
        id.to_string()
    }

    fn limited_app(max_size: usize) -> Router {
        Router::new()
            .route("/test", post(test_handler))
            .layer(middleware::from_fn(move |req, next| {
                body_limit_middleware(req, next, max_size)
            }))
    }

    fn post_with_length(length: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/test")
            .header(header::CONTENT_LENGTH, length)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_request_id_generated() {
        let app = Router::new()
            .route("/test", get(test_handler))
            .layer(middleware::from_fn(request_id_middleware));

        let response = app
            .oneshot(Request::builder().uri("/test").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let id = response.headers().get(REQUEST_ID_HEADER).unwrap();
        assert_eq!(id.to_str().unwrap().len(), 36);
    }

    #[tokio::test]
    async fn test_request_id_echoed() {
        let app = Router::new()
            .route("/test", get(test_handler))
            .layer(middleware::from_fn(request_id_middleware));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/test")
                    .header(REQUEST_ID_HEADER, "client-abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get(REQUEST_ID_HEADER).unwrap(),
            "client-abc-123"
        );
    }

    #[tokio::test]
    async fn test_malformed_request_id_replaced() {
        let app = Router::new()
            .route("/test", get(test_handler))
            .layer(middleware::from_fn(request_id_middleware));

        let long = "x".repeat(500);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/test")
                    .header(REQUEST_ID_HEADER, long.as_str())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let id = response.headers().get(REQUEST_ID_HEADER).unwrap();
        assert_ne!(id.to_str().unwrap(), long);
    }

    #[tokio::test]
    async fn test_request_id_extension() {
        let app = Router::new()
            .route("/test", get(echo_request_id))
            .layer(middleware::from_fn(request_id_middleware));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/test")
                    .header(REQUEST_ID_HEADER, "rid-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"rid-1");
    }

    #[tokio::test]
    async fn test_body_limit_within_limit() {
        let response = limited_app(1024)
            .oneshot(post_with_length("512"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_body_limit_at_limit() {
        let response = limited_app(1024)
            .oneshot(post_with_length("1024"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_body_limit_exceeded() {
        let response = limited_app(1024)
            .oneshot(post_with_length("2048"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "payload_too_large");
    }

    #[tokio::test]
    async fn test_body_limit_malformed_length_passes() {
        let response = limited_app(1024)
            .oneshot(post_with_length("invalid"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
