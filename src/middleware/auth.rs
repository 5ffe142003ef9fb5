//! Bearer token authentication and the capability guard.
//!
//! The middleware intercepts every protected request to:
//! 1. Extract the token from the Authorization header
//! 2. Hash it and resolve the principal it was issued to
//! 3. Inject the `Principal` into the request
//! 4. Reject unknown or inactive tokens with HTTP 401

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::app::AppState;
use crate::error::AppError;
use crate::models::principal::{Capability, Principal};

/// Tokens are stored as lowercase hex SHA-256 digests, never in clear.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Token authentication middleware.
///
/// # Headers
///
/// ```text
/// Authorization: Bearer abc123xyz
/// ```
///
/// Handlers extract the caller with `Extension<Principal>`.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AppError::InvalidToken)?;

    let principal = state
        .repo
        .find_principal(&hash_token(token))
        .await?
        .ok_or(AppError::InvalidToken)?;

    request.extensions_mut().insert(principal);

    Ok(next.run(request).await)
}

/// Capability guard for data owned by `school_id`.
pub fn authorize(
    principal: &Principal,
    capability: Capability,
    school_id: Uuid,
) -> Result<(), AppError> {
    if principal.allows(capability, school_id) {
        Ok(())
    } else {
        tracing::warn!(
            user_id = %principal.user_id,
            school_id = %school_id,
            capability = capability.as_str(),
            "capability denied"
        );
        Err(AppError::Forbidden(capability.as_str()))
    }
}

/// Capability guard for operations spanning every school.
pub fn authorize_platform(principal: &Principal, capability: Capability) -> Result<(), AppError> {
    if principal.allows_platform_wide(capability) {
        Ok(())
    } else {
        tracing::warn!(
            user_id = %principal.user_id,
            capability = capability.as_str(),
            "platform-wide capability denied"
        );
        Err(AppError::Forbidden(capability.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_hash_is_hex_sha256() {
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
