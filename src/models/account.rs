//! Account data models and API request/response types.
//!
//! This module defines:
//! - `Account`: Database entity representing a card owner
//! - `NewAccount` / `UpdateAccountRequest`: values written by the account service
//! - `CreateAccountRequest`: Request body for registration
//! - `AccountResponse`: Response body returned to clients

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::models::card::CardResponse;

/// Represents an account record from the database.
///
/// # Database Table
///
/// Maps to the `accounts` table. Each account:
/// - Owns zero or more cards (at most `MAX_CARDS_PER_ACCOUNT` live ones)
/// - Points at one of them as its default card (weak reference, looked up by id)
/// - Is soft deleted through `deleted_at`, so historical transactions stay valid
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Account {
    pub id: i64,

    /// Lowercased login email, unique among live accounts
    pub email: String,

    /// Opaque digest produced by the password hasher; never serialized
    pub password_digest: String,

    pub first_name: String,
    pub last_name: String,
    pub birthday: Option<NaiveDate>,
    pub phone_number: String,

    /// Weak reference to one of the account's cards
    pub default_card_id: Option<i64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Values persisted when an account is registered.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub password_digest: String,
    pub first_name: String,
    pub last_name: String,
    pub birthday: Option<NaiveDate>,
    pub phone_number: String,
}

/// Request body for registering a new account.
///
/// # JSON Example
///
/// ```json
/// {
///   "email": "ada@example.com",
///   "password": "correct horse",
///   "firstName": "Ada",
///   "lastName": "Lovelace",
///   "birthday": "1815-12-10",
///   "phoneNumber": "+44 20 0000 0000"
/// }
/// ```
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    /// `YYYY-MM-DD`; empty or missing means unknown
    #[serde(default)]
    pub birthday: Option<String>,
    #[serde(default)]
    pub phone_number: String,
}

/// Request body for `PUT /api/accounts/{id}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAccountRequest {
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
}

/// Request body for `POST /login`.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Request body for `PUT /api/accounts/settings/change-password/{id}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Response body for account endpoints.
///
/// Carries the live cards as an explicit projection; transactions are read
/// through `GET /api/transaction/{cardId}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub birthday: Option<NaiveDate>,
    pub phone_number: String,
    #[serde(rename = "defaultCardID")]
    pub default_card_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub cards: Vec<CardResponse>,
}

impl AccountResponse {
    /// Build the response from the account and its live cards.
    ///
    /// The password digest is dropped here and never leaves the service.
    pub fn new(account: Account, cards: Vec<CardResponse>) -> Self {
        Self {
            id: account.id,
            email: account.email,
            first_name: account.first_name,
            last_name: account.last_name,
            birthday: account.birthday,
            phone_number: account.phone_number,
            default_card_id: account.default_card_id,
            created_at: account.created_at,
            cards,
        }
    }
}
