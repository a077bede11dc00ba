use thiserror::Error;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Malformed access token")]
    Malformed,

    #[error("Access token expired")]
    Expired,

    #[error("Invalid access token signature")]
    BadSignature,

    #[error("Auth server key is not a valid Ed25519 public key")]
    InvalidServerKey,
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid event frame: {0}")]
    InvalidFrame(#[from] serde_json::Error),
}
