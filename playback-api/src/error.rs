use axum::http::StatusCode;
use axum::response::IntoResponse;

use stream_engine::EngineError;

/// Response wrapper mapping engine errors onto the status codes the
/// dashboard client's retry logic depends on.
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self.0 {
            EngineError::SourceUnknown(_) | EngineError::InvalidSourceId(_) => {
                (StatusCode::NOT_FOUND, self.0.to_string())
            }
            EngineError::SourceUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, self.0.to_string())
            }
            EngineError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, self.0.to_string()),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string()),
        };

        tracing::warn!("Playback API error: {}", self.0);

        (status, message).into_response()
    }
}
