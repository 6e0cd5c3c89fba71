//! Session authentication middleware.
//!
//! This middleware intercepts every protected request to:
//! 1. Extract the session token from the Authorization header or the `token` cookie
//! 2. Hash it and resolve a live session
//! 3. Inject authentication context into the request
//! 4. Reject unauthenticated requests with HTTP 401

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};

use crate::{
    app::AppState,
    error::AppError,
    services::{account_service, credentials},
};

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE: &str = "token";

/// Authentication context attached to authenticated requests.
///
/// Inserted into the request's extension map; handlers extract it with
/// `Extension<AuthContext>` to know who is calling.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// The authenticated account. Services trust it without re-checking credentials.
    pub account_id: i64,

    /// Digest of the presented token, used to end this session on logout
    pub token_hash: String,
}

/// Session authentication middleware function.
///
/// # Headers
///
/// Either of:
/// ```text
/// Authorization: Bearer 3f9a...
/// Cookie: token=3f9a...
/// ```
///
/// The bearer header wins when both are present.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = session_token(request.headers()).ok_or(AppError::Unauthenticated)?;
    let token_hash = credentials::hash_token(&token);

    let account_id = account_service::authenticate(state.store.as_ref(), &token_hash)
        .await?
        .ok_or(AppError::Unauthenticated)?;

    request.extensions_mut().insert(AuthContext {
        account_id,
        token_hash,
    });

    Ok(next.run(request).await)
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}
