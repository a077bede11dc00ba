use thiserror::Error;

use alumni_store::StoreError;

/// Failure kinds surfaced by core operations.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Message safe to show to the client. Internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<StoreError> for ChatError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => Self::NotFound("Record not found".into()),
            other => Self::Internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_taxonomy() {
        assert!(matches!(ChatError::from(StoreError::NotFound), ChatError::NotFound(_)));
        assert!(matches!(
            ChatError::from(StoreError::Migration("boom".into())),
            ChatError::Internal(_)
        ));
    }

    #[test]
    fn internal_details_are_not_public() {
        let err = ChatError::Internal("disk I/O error at /var/db".into());
        assert_eq!(err.public_message(), "Internal server error");

        let err = ChatError::Forbidden("Not a room member".into());
        assert_eq!(err.public_message(), "Forbidden: Not a room member");
    }
}
