//! Password recovery by emailed one-time token.

use chrono::Utc;
use url::Url;

use crate::{
    error::AppError,
    services::{
        account_service::normalize_email,
        credentials::{self, PasswordHasher},
        mailer::Mailer,
    },
    store::Store,
};

/// Issue a reset token for the account and mail the recovery link.
///
/// # Errors
///
/// - `NotFound`: no live account uses this email
pub async fn request_reset(
    store: &dyn Store,
    mailer: &dyn Mailer,
    recovery_url: &str,
    token_ttl: chrono::Duration,
    email: &str,
) -> Result<(), AppError> {
    let email = normalize_email(email);
    let account = store
        .find_account_by_email(&email)
        .await?
        .ok_or(AppError::NotFound("Account"))?;

    let token = credentials::generate_token();
    let link = recovery_link(recovery_url, &token)?;
    store
        .create_reset_token(
            account.id,
            &credentials::hash_token(&token),
            Utc::now() + token_ttl,
        )
        .await?;

    mailer.send_password_reset(&account.email, link.as_str()).await?;
    tracing::info!(account_id = account.id, "password reset requested");
    Ok(())
}

/// Redeem a reset token and replace the password.
///
/// The token is consumed atomically, so it works exactly once. All sessions
/// of the account are revoked afterwards.
pub async fn reset_password(
    store: &dyn Store,
    hasher: &dyn PasswordHasher,
    token: &str,
    new_password: &str,
) -> Result<(), AppError> {
    credentials::require_password(new_password)?;
    let digest = hasher.hash(new_password)?;

    let redeemed = store
        .consume_reset_token(&credentials::hash_token(token.trim()), Utc::now())
        .await?
        .ok_or(AppError::InvalidResetToken)?;

    store
        .update_password_digest(redeemed.account_id, &digest)
        .await?;
    store.delete_account_sessions(redeemed.account_id).await?;

    tracing::info!(account_id = redeemed.account_id, "password reset");
    Ok(())
}

/// `base` with the token appended as the last path segment.
fn recovery_link(base: &str, token: &str) -> Result<Url, AppError> {
    let mut url = Url::parse(base)
        .map_err(|e| AppError::Internal(format!("invalid recovery url {base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| AppError::Internal(format!("recovery url {base} cannot take a path")))?
        .pop_if_empty()
        .push(token);
    Ok(url)
}
