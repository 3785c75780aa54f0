//! Authorization gate: bearer-token authentication and the admin-role check.
//!
//! Handlers call `ensure_authenticated` first and hand the returned claims to
//! `ensure_admin` when the route is admin-only.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use tracing::{debug, warn};

use crate::model::User;
use crate::token::Claims;

use super::error::ApiError;
use super::state::AppState;

pub fn ensure_authenticated(state: &AppState, headers: &HeaderMap) -> Result<Claims, ApiError> {
    let Some(token) = extract_bearer_token(headers) else {
        warn!("request without bearer token");
        return Err(ApiError::Unauthorized);
    };

    match state.tokens.verify(token) {
        Ok(claims) => {
            debug!(email = %claims.email, "authenticated request");
            Ok(claims)
        }
        Err(err) => {
            warn!(reason = %err, "rejected bearer token");
            Err(ApiError::Unauthorized)
        }
    }
}

/// Requires the authenticated caller to exist in the users collection with the
/// admin role.
pub async fn ensure_admin(state: &AppState, claims: &Claims) -> Result<User, ApiError> {
    let user = state
        .db
        .users
        .find_one(|user| user.email == claims.email)
        .await;

    match user {
        Some(user) if user.is_admin() => {
            debug!(email = %user.email, "admin access granted");
            Ok(user)
        }
        Some(_) => {
            warn!(email = %claims.email, "admin route requested by non-admin");
            Err(ApiError::Unauthorized)
        }
        None => {
            warn!(email = %claims.email, "admin route requested by unknown user");
            Err(ApiError::Unauthorized)
        }
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())?;
    let mut parts = raw.split_whitespace();
    let scheme = parts.next()?;
    let token = parts.next()?;
    if !scheme.eq_ignore_ascii_case("bearer") || parts.next().is_some() {
        return None;
    }
    Some(token)
}
