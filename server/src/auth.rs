//! Authentication primitives: password hashing, bearer tokens, and
//! session token generation.

use axum::http::HeaderMap;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use vigil_core::{Result, VigilError};

/// Bearer token claims: subject is the username.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// Hash a password with bcrypt at the default cost.
pub fn hash_password(password: &str) -> Result<String> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
        .map_err(|e| VigilError::Internal(format!("password hashing failed: {e}")))
}

/// Constant-time verification against a stored bcrypt hash.
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// Issue a signed bearer token for a username.
pub fn issue_token(
    username: &str,
    secret: &str,
    expiry_min: i64,
    now: DateTime<Utc>,
) -> Result<String> {
    let claims = Claims {
        sub: username.to_string(),
        exp: (now + Duration::minutes(expiry_min)).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| VigilError::Internal(format!("token signing failed: {e}")))
}

/// Decode and validate a bearer token, returning the username.
pub fn decode_token(token: &str, secret: &str) -> Result<String> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| VigilError::Unauthorized("could not validate credentials".into()))?;
    Ok(data.claims.sub)
}

/// 256-bit random session token, base64url without padding.
pub fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Pull the username out of an `Authorization: Bearer ...` header.
pub fn bearer_username(headers: &HeaderMap, secret: &str) -> Result<String> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| VigilError::Unauthorized("missing bearer token".into()))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| VigilError::Unauthorized("malformed authorization header".into()))?;
    decode_token(token, secret)
}
