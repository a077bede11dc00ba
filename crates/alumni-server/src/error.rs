use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use uuid::Uuid;

use alumni_realtime::ChatError;
use alumni_shared::error::TokenError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("Unauthorized: {0}")]
    Unauthorized(#[from] TokenError),

    #[error("Missing access token")]
    MissingToken,

    #[error("Media not found: {0}")]
    MediaNotFound(Uuid),

    #[error("Media too large: {size} bytes (max {max})")]
    MediaTooLarge { size: usize, max: usize },

    #[error("Media storage error: {0}")]
    MediaStorage(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Chat(e) => match e {
                ChatError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
                ChatError::Forbidden(_) => StatusCode::FORBIDDEN,
                ChatError::NotFound(_) => StatusCode::NOT_FOUND,
                ChatError::BadRequest(_) => StatusCode::BAD_REQUEST,
                ChatError::Conflict(_) => StatusCode::CONFLICT,
                ChatError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Unauthorized(_) | Self::MissingToken => StatusCode::UNAUTHORIZED,
            Self::MediaNotFound(_) => StatusCode::NOT_FOUND,
            Self::MediaTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::MediaStorage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ServerError::Chat(e @ ChatError::Internal(_)) => {
                tracing::error!(error = %e, "Request failed");
                e.public_message()
            }
            ServerError::Chat(e) => e.public_message(),
            ServerError::MediaStorage(detail) => {
                tracing::error!(error = %detail, "Media storage failure");
                "Media storage error".to_string()
            }
            other => other.to_string(),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ServerError::from(ChatError::Unauthorized("x".into())), StatusCode::UNAUTHORIZED),
            (ServerError::from(ChatError::Forbidden("x".into())), StatusCode::FORBIDDEN),
            (ServerError::from(ChatError::NotFound("x".into())), StatusCode::NOT_FOUND),
            (ServerError::from(ChatError::BadRequest("x".into())), StatusCode::BAD_REQUEST),
            (ServerError::from(ChatError::Conflict("x".into())), StatusCode::CONFLICT),
            (ServerError::from(ChatError::Internal("x".into())), StatusCode::INTERNAL_SERVER_ERROR),
            (ServerError::from(TokenError::Expired), StatusCode::UNAUTHORIZED),
            (ServerError::MediaTooLarge { size: 2, max: 1 }, StatusCode::PAYLOAD_TOO_LARGE),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
