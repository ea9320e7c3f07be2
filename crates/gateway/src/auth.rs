//! Session credential check at the channel boundary. Tokens are issued by the
//! auth collaborator; the gateway only verifies them.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use shared::domain::UserId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid session token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("unrecognised token subject: {0}")]
    Subject(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    iat: i64,
    exp: i64,
}

pub fn issue_session_token(
    secret: &str,
    user_id: UserId,
    ttl: Duration,
) -> Result<String, AuthError> {
    let now = Utc::now();
    let claims = SessionClaims {
        sub: format!("user:{}", user_id.0),
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

pub fn verify_session_token(secret: &str, token: &str) -> Result<UserId, AuthError> {
    let data = decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    data.claims
        .sub
        .strip_prefix("user:")
        .and_then(|raw| raw.parse::<i64>().ok())
        .map(UserId)
        .ok_or(AuthError::Subject(data.claims.sub))
}
