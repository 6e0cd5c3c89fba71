//! Password reset tokens and login sessions.
//!
//! Both are bearer secrets handed to the client once. Only their SHA-256 hex
//! digest is stored, the same way API keys are kept elsewhere.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Represents a password reset token record.
///
/// # Lifecycle
///
/// Created on a reset request, consumed at most once, and unusable
/// `RESET_TOKEN_TTL_MINUTES` after creation.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PasswordResetToken {
    pub id: i64,
    pub account_id: i64,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

impl PasswordResetToken {
    pub fn is_redeemable(&self, now: DateTime<Utc>) -> bool {
        !self.used && self.expires_at > now
    }
}

/// A login session resolved by the auth middleware.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Session {
    pub id: i64,
    pub account_id: i64,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

/// Request body for `POST /accounts/forgetpw`.
#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

/// Request body for `POST /accounts/reset-password`.
#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
}
