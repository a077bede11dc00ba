use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::TokenError;
use crate::types::UserId;

// Token signed by the auth server, presented on every HTTP request and at socket upgrade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub user_id: UserId,
    pub valid_until: DateTime<Utc>,
    pub signature: Vec<u8>,
}

impl AccessToken {
    /// Encode as the opaque string carried in `Authorization: Bearer ...`.
    pub fn encode(&self) -> String {
        // Serializing a struct of plain fields cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(raw: &str) -> Result<Self, TokenError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(raw.trim())
            .map_err(|_| TokenError::Malformed)?;
        serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
    }
}

// payload = user_id bytes || valid_until (rfc3339)
fn signing_payload(user_id: &UserId, valid_until: &DateTime<Utc>) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(user_id.0.as_bytes());
    payload.extend_from_slice(valid_until.to_rfc3339().as_bytes());
    payload
}

/// Check expiry and signature of a token against the auth server key.
pub fn verify_access_token(
    token: &AccessToken,
    server_pubkey: &[u8; 32],
) -> Result<UserId, TokenError> {
    if Utc::now() > token.valid_until {
        return Err(TokenError::Expired);
    }

    let verifying_key =
        VerifyingKey::from_bytes(server_pubkey).map_err(|_| TokenError::InvalidServerKey)?;

    let signature =
        Signature::from_slice(&token.signature).map_err(|_| TokenError::BadSignature)?;

    verifying_key
        .verify(&signing_payload(&token.user_id, &token.valid_until), &signature)
        .map_err(|_| TokenError::BadSignature)?;

    Ok(token.user_id)
}

pub fn create_access_token(
    user_id: UserId,
    valid_until: DateTime<Utc>,
    server_signing_key: &ed25519_dalek::SigningKey,
) -> AccessToken {
    use ed25519_dalek::Signer;

    let signature = server_signing_key.sign(&signing_payload(&user_id, &valid_until));

    AccessToken {
        user_id,
        valid_until,
        signature: signature.to_bytes().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    #[test]
    fn test_access_token_valid() {
        let server_key = SigningKey::generate(&mut OsRng);
        let server_pubkey = server_key.verifying_key().to_bytes();
        let user = UserId::new();

        let token = create_access_token(user, Utc::now() + Duration::hours(1), &server_key);

        assert_eq!(verify_access_token(&token, &server_pubkey).unwrap(), user);
    }

    #[test]
    fn test_access_token_expired() {
        let server_key = SigningKey::generate(&mut OsRng);
        let server_pubkey = server_key.verifying_key().to_bytes();

        let token =
            create_access_token(UserId::new(), Utc::now() - Duration::minutes(1), &server_key);

        assert!(matches!(
            verify_access_token(&token, &server_pubkey),
            Err(TokenError::Expired)
        ));
    }

    #[test]
    fn test_access_token_wrong_server_key() {
        let server_key = SigningKey::generate(&mut OsRng);
        let wrong_pubkey = SigningKey::generate(&mut OsRng).verifying_key().to_bytes();

        let token =
            create_access_token(UserId::new(), Utc::now() + Duration::hours(1), &server_key);

        assert!(verify_access_token(&token, &wrong_pubkey).is_err());
    }

    #[test]
    fn test_tampered_user_is_rejected() {
        let server_key = SigningKey::generate(&mut OsRng);
        let server_pubkey = server_key.verifying_key().to_bytes();

        let mut token =
            create_access_token(UserId::new(), Utc::now() + Duration::hours(1), &server_key);
        token.user_id = UserId::new();

        assert!(matches!(
            verify_access_token(&token, &server_pubkey),
            Err(TokenError::BadSignature)
        ));
    }

    #[test]
    fn test_encoded_token_survives_transport() {
        let server_key = SigningKey::generate(&mut OsRng);
        let server_pubkey = server_key.verifying_key().to_bytes();
        let user = UserId::new();

        let raw = create_access_token(user, Utc::now() + Duration::hours(1), &server_key).encode();
        let decoded = AccessToken::decode(&raw).unwrap();

        assert_eq!(verify_access_token(&decoded, &server_pubkey).unwrap(), user);
        assert!(AccessToken::decode("not a token!").is_err());
    }
}
