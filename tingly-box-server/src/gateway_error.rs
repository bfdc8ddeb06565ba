//! HTTP error mapping (§7, §10.2): the single `IntoResponse` seam for a
//! [`DispatchError`], keyed off the caller's wire shape rather than one
//! fixed JSON envelope. Mirrors the one-layer-up `GatewayError` pattern
//! this crate grew out of, except the classification itself already lives
//! in the dispatch core's [`ErrorKind`] — this module only maps that
//! classification to an HTTP status and a shape-specific body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tingly_box_core::{ApiStyle, DispatchError, ErrorKind};

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::AuthFailed => StatusCode::UNAUTHORIZED,
        ErrorKind::NoRule => StatusCode::NOT_FOUND,
        ErrorKind::NoHealthyService => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::BadUpstream | ErrorKind::Transient => StatusCode::BAD_GATEWAY,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Cancelled => StatusCode::from_u16(499).unwrap(),
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// A [`DispatchError`] paired with the shape it must be rendered in —
/// handlers attach the caller's shape before returning the error, since
/// `DispatchError` itself carries no wire-format opinion.
pub struct ShapedError {
    pub shape: ApiStyle,
    pub error: DispatchError,
}

impl ShapedError {
    pub fn new(shape: ApiStyle, error: DispatchError) -> Self {
        Self { shape, error }
    }
}

impl IntoResponse for ShapedError {
    fn into_response(self) -> Response {
        let status = status_for(self.error.kind);
        let message = self.error.message.clone();
        let error_type = self.error.kind.to_string();

        let body = match self.shape {
            ApiStyle::Anthropic => json!({
                "type": "error",
                "error": {
                    "type": error_type,
                    "message": message,
                }
            }),
            ApiStyle::Openai | ApiStyle::Google | ApiStyle::Responses => json!({
                "error": {
                    "message": message,
                    "type": error_type,
                }
            }),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn anthropic_shape_wraps_error_in_type_tagged_envelope() {
        let err = ShapedError::new(ApiStyle::Anthropic, DispatchError::no_rule("openai", "gpt-4o"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["type"], "error");
        assert_eq!(body["error"]["type"], "no_rule");
    }

    #[tokio::test]
    async fn openai_shape_wraps_error_flat() {
        let err = ShapedError::new(ApiStyle::Openai, DispatchError::no_healthy_service());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["type"], "no_healthy_service");
        assert!(body.get("type").is_none());
    }
}
