//! Error types and HTTP error response handling.
//!
//! This module defines all application errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// SQLSTATE codes PostgreSQL uses for retryable transaction failures.
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

/// Application-wide error type.
///
/// # Error Categories
///
/// - **Transfer rules**: `DestinationNotFound`, `NotOwner`, `AmountOutOfRange`,
///   `InsufficientFunds`, `InvalidTransfer`. Terminal, never retried.
/// - **Card registry rules**: `LimitExceeded`, `DuplicateCardNumber`
/// - **Ledger guard**: `WouldGoNegative`, the commit-time re-check of a debit
/// - **Transient storage**: `StorageUnavailable`, `Conflict`. The transfer
///   engine retries these with backoff before surfacing them.
/// - **Request plumbing**: authentication, lookups and validation
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Destination card not found")]
    DestinationNotFound,

    /// The source card does not exist or belongs to someone else.
    ///
    /// Returns HTTP 404 so callers cannot discover other accounts' cards.
    #[error("The card (id={0}) is private and does not belong to this user")]
    NotOwner(i64),

    #[error("Transaction amount must be between {min} and {max}")]
    AmountOutOfRange { min: String, max: String },

    #[error("Insufficient balance")]
    InsufficientFunds,

    #[error("Cannot transfer to the same card")]
    InvalidTransfer,

    #[error("Maximum number of cards ({0}) reached")]
    LimitExceeded(usize),

    #[error("Card number already exists")]
    DuplicateCardNumber,

    /// Removal refused by `CardRemovalPolicy::RejectNonZeroBalance`.
    #[error("Card (id={0}) still holds a balance")]
    CardHasBalance(i64),

    #[error("Balance of card (id={0}) would go negative")]
    WouldGoNegative(i64),

    /// Storage did not answer in time or the connection was lost.
    #[error("Storage temporarily unavailable")]
    StorageUnavailable,

    /// Concurrent transactions collided and retries ran out.
    #[error("Conflicting concurrent update")]
    Conflict,

    #[error("Unauthorized")]
    Unauthenticated,

    #[error("Access denied")]
    Forbidden,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Email already registered")]
    EmailTaken,

    #[error("Invalid or expired token")]
    InvalidResetToken,

    /// Request body or parameters are invalid.
    ///
    /// The String contains details about what was invalid.
    #[error("{0}")]
    InvalidRequest(String),

    /// Invariant broken inside the service; details are only logged.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Database operation failed for a non-transient reason.
    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl AppError {
    /// Whether the transfer engine may retry the operation that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::StorageUnavailable | AppError::Conflict)
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::DestinationNotFound => (StatusCode::NOT_FOUND, "destination_not_found"),
            AppError::NotOwner(_) => (StatusCode::NOT_FOUND, "not_owner"),
            AppError::AmountOutOfRange { .. } => (StatusCode::BAD_REQUEST, "amount_out_of_range"),
            AppError::InsufficientFunds => (StatusCode::BAD_REQUEST, "insufficient_funds"),
            AppError::InvalidTransfer => (StatusCode::BAD_REQUEST, "invalid_transfer"),
            AppError::LimitExceeded(_) => (StatusCode::BAD_REQUEST, "limit_exceeded"),
            AppError::DuplicateCardNumber => (StatusCode::BAD_REQUEST, "duplicate_card_number"),
            AppError::CardHasBalance(_) => (StatusCode::BAD_REQUEST, "card_has_balance"),
            AppError::WouldGoNegative(_) => (StatusCode::BAD_REQUEST, "would_go_negative"),
            AppError::StorageUnavailable => {
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_unavailable")
            }
            AppError::Conflict => (StatusCode::INTERNAL_SERVER_ERROR, "conflict"),
            AppError::Unauthenticated => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            AppError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "invalid_credentials"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::EmailTaken => (StatusCode::BAD_REQUEST, "email_taken"),
            AppError::InvalidResetToken => (StatusCode::BAD_REQUEST, "invalid_reset_token"),
            AppError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            AppError::Internal(_) | AppError::Database(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        }
    }
}

/// Classify driver errors into transient and permanent failures.
///
/// Pool exhaustion and broken connections become `StorageUnavailable`,
/// serialization failures and deadlocks become `Conflict`. Anything else is
/// kept as `Database`.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                AppError::StorageUnavailable
            }
            sqlx::Error::Database(db_err)
                if matches!(
                    db_err.code().as_deref(),
                    Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED)
                ) =>
            {
                AppError::Conflict
            }
            _ => AppError::Database(err),
        }
    }
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// ```json
/// {
///   "error": "Human-readable error message",
///   "code": "error_type"
/// }
/// ```
///
/// Storage and internal failures are logged and reported with a generic message.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": message,
            "code": code,
        }));

        (status, body).into_response()
    }
}
