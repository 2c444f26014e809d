use crate::engine::EngineError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use presence_store::StoreError;
use serde::Serialize;
use thiserror::Error;

/// JSON envelope returned by attendance and API endpoints.
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub status: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl Envelope {
    pub fn ok(message: impl Into<String>) -> Self {
        Envelope {
            status: true,
            message: message.into(),
            score: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Envelope {
            status: false,
            message: message.into(),
            score: None,
        }
    }
}

/// Typed request-boundary errors.
///
/// Each failure keeps its kind: callers branch on structure, logs keep the
/// original error, and the wire response never leaks internals.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("no face detected in the submitted image")]
    FaceNotDetected,
    #[error("{0}")]
    BadRequest(String),
    #[error("storage: {0}")]
    Storage(#[from] StoreError),
    #[error("inference: {0}")]
    Inference(EngineError),
    #[error("internal: {0}")]
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NoFaceDetected => ApiError::FaceNotDetected,
            other => ApiError::Inference(other),
        }
    }
}

impl From<presence_core::frame::FrameError> for ApiError {
    fn from(err: presence_core::frame::FrameError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("blocking task failed: {err}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, message) = match &self {
            // Domain negative, not a server failure: the original caller
            // contract reports it in the envelope with a 200.
            ApiError::FaceNotDetected => (StatusCode::OK, "No face detected in the image.".into()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Storage(_) | ApiError::Inference(_) | ApiError::Internal(_) => {
                tracing::error!(error = %self, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal error, see server logs.".to_string(),
                )
            }
        };

        (code, Json(Envelope::rejected(message))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_skips_absent_score() {
        let json = serde_json::to_string(&Envelope::rejected("Face not recognized.")).unwrap();
        assert!(!json.contains("score"));
        assert!(json.contains("\"status\":false"));
    }

    #[test]
    fn test_envelope_includes_score() {
        let mut env = Envelope::ok("Attendance recorded: Jane Roe");
        env.score = Some(0.87);
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains("\"score\":0.87"));
        assert!(json.contains("\"status\":true"));
    }

    #[test]
    fn test_no_face_maps_from_engine() {
        let api: ApiError = EngineError::NoFaceDetected.into();
        assert!(matches!(api, ApiError::FaceNotDetected));
    }
}
