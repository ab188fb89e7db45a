//! Bearer tokens and the addon-scope validator.
//!
//! The hub mints HMAC-signed tokens for addon pods and validates them on the
//! REST surface. An addon token carries the task id it was issued for; the
//! validator rejects it once the task is gone, terminal, or no longer bound
//! to a pod.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::Database;

/// Scope granted to addon tokens.
pub const ADDON_SCOPE: &str = "addon";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("token not authenticated")]
    NotAuthenticated,
    #[error("token not valid for task {0}")]
    NotValid(i64),
    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Claims carried by hub tokens.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Claims {
    pub user: String,
    pub scope: String,
    /// Task the token was issued for; present on addon tokens only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<i64>,
    /// Expiry (seconds since epoch).
    pub exp: u64,
}

/// Mint a token for the addon serving a task. The token is projected into
/// the task pod through its Secret.
pub fn mint_addon_token(key: &str, addon: &str, task: i64) -> Result<String, AuthError> {
    let claims = Claims {
        user: format!("addon:{addon}"),
        scope: ADDON_SCOPE.to_string(),
        task: Some(task),
        // Far-future expiry; the validator bounds the token's real lifetime
        // to the task's.
        exp: u64::MAX / 2,
    };
    let token = encode(
        &Header::new(Algorithm::HS512),
        &claims,
        &EncodingKey::from_secret(key.as_bytes()),
    )?;
    Ok(token)
}

/// Decode and verify a bearer token's signature.
pub fn authenticate(key: &str, token: &str) -> Result<Claims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS512);
    validation.validate_exp = true;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(key.as_bytes()),
        &validation,
    )
    .map_err(|_| AuthError::NotAuthenticated)?;
    Ok(data.claims)
}

/// Validate an addon token against the task it claims.
///
/// The token is only ever projected into the pod the scheduler launched for
/// that task, so it stays valid exactly while: the task row exists, the task
/// is non-terminal, the task still has a pod, and the `user` claim names the
/// task's resolved addon.
pub async fn validate_task_claim(db: &Database, claims: &Claims) -> Result<(), AuthError> {
    let Some(task_id) = claims.task else {
        // Not an addon token; nothing to validate here.
        return Ok(());
    };
    let Some(task) = db.get_task(task_id).await? else {
        return Err(AuthError::NotValid(task_id));
    };
    if task.state.terminal() {
        return Err(AuthError::NotValid(task_id));
    }
    if task.pod.is_empty() {
        return Err(AuthError::NotValid(task_id));
    }
    if claims.user != format!("addon:{}", task.addon) {
        return Err(AuthError::NotValid(task_id));
    }
    Ok(())
}
