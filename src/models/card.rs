//! Card data models and API request/response types.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::money;

/// Represents a card record from the database.
///
/// # Database Table
///
/// Maps to the `cards` table. Each card:
/// - Belongs to exactly one account (`account_id`)
/// - Has a card number that is unique among live cards and never changes
/// - Holds a balance in cents that is never negative (CHECK constraint)
///
/// `balance_cents` is only ever written through the ledger store's transfer
/// unit, while the card row is locked.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Card {
    pub id: i64,
    pub account_id: i64,
    pub card_number: String,
    pub balance_cents: i64,
    pub card_type: String,
    pub expire_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Values persisted when a card is added to an account.
#[derive(Debug, Clone)]
pub struct NewCard {
    pub account_id: i64,
    pub card_number: String,
    pub balance_cents: i64,
    pub card_type: String,
    pub expire_date: Option<NaiveDate>,
}

/// Request body for `POST /api/cards`.
///
/// # JSON Example
///
/// ```json
/// {
///   "cardNumber": "4000123412341234",
///   "cardBalance": "500.00",
///   "cardType": "debit",
///   "cardExpireDate": "2029-08-31"
/// }
/// ```
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCardRequest {
    pub card_number: String,

    /// Initial balance in major units, defaults to zero
    #[serde(default)]
    pub card_balance: Decimal,

    #[serde(default)]
    pub card_type: String,

    /// `YYYY-MM-DD`; empty or missing means no expiry recorded
    #[serde(default)]
    pub card_expire_date: Option<String>,
}

/// Response body for card endpoints.
///
/// The owning account id is internal and not returned.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardResponse {
    pub id: i64,
    pub card_number: String,
    #[serde(with = "money::serde_cents")]
    pub card_balance: i64,
    pub card_type: String,
    pub card_expire_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl From<Card> for CardResponse {
    fn from(card: Card) -> Self {
        Self {
            id: card.id,
            card_number: card.card_number,
            card_balance: card.balance_cents,
            card_type: card.card_type,
            card_expire_date: card.expire_date,
            created_at: card.created_at,
        }
    }
}

/// A card row as seen while its lock is held inside a transfer unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockedCard {
    pub id: i64,
    pub account_id: i64,
    pub balance_cents: i64,
}
