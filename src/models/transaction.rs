//! Transaction data models and API request/response types.
//!
//! This module defines:
//! - `Transaction`: the immutable record of a committed transfer
//! - `TransferRequest`: Request body for `POST /api/transaction`
//! - `Direction`: the projection used when listing a card's transactions
//! - `TransactionResponse`: Response body returned to clients

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::money;

/// Represents a transaction record from the database.
///
/// # Database Table
///
/// Maps to the `transactions` table. Rows are append-only: created by the
/// transfer engine inside the same unit that moves the balances and never
/// updated or deleted afterwards.
///
/// Invariants (also CHECK constraints): `amount_cents > 0` and
/// `from_card_id != to_card_id`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Transaction {
    pub id: i64,
    pub from_card_id: i64,
    pub to_card_id: i64,
    pub amount_cents: i64,

    /// Client supplied, or generated per request when the client sent none.
    ///
    /// Unique per source card, so a retried request finds the original record.
    pub idempotency_key: String,

    pub transaction_time: DateTime<Utc>,
}

/// A transaction about to be appended by a transfer unit.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub from_card_id: i64,
    pub to_card_id: i64,
    pub amount_cents: i64,
    pub idempotency_key: String,
}

/// Request to transfer money from one of the caller's cards to a card number.
///
/// # JSON Example
///
/// ```json
/// {
///   "fromCardID": 12,
///   "toCardNumber": "4000",
///   "transactionAmount": "150.00",
///   "idempotencyKey": "checkout-7781"
/// }
/// ```
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    #[serde(rename = "fromCardID")]
    pub from_card_id: i64,

    pub to_card_number: String,

    /// Amount in major units (number or string)
    pub transaction_amount: Decimal,

    /// Optional key to deduplicate client retries
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Which side of a card's transactions to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Transactions crediting the card
    Incoming,
    /// Transactions debiting the card
    Outgoing,
    #[default]
    All,
}

impl Direction {
    /// Parse the `type` query parameter; anything unrecognised means `All`.
    pub fn from_query(value: Option<&str>) -> Self {
        match value {
            Some("incoming") => Direction::Incoming,
            Some("outgoing") => Direction::Outgoing,
            _ => Direction::All,
        }
    }

    pub fn matches(&self, card_id: i64, transaction: &Transaction) -> bool {
        match self {
            Direction::Incoming => transaction.to_card_id == card_id,
            Direction::Outgoing => transaction.from_card_id == card_id,
            Direction::All => {
                transaction.to_card_id == card_id || transaction.from_card_id == card_id
            }
        }
    }
}

/// Response returned for transaction operations.
///
/// # JSON Example
///
/// ```json
/// {
///   "id": 41,
///   "transactionTime": "2025-12-21T16:00:00Z",
///   "transactionAmount": "150.00",
///   "fromCardID": 12,
///   "toCardID": 19
/// }
/// ```
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    pub id: i64,
    pub transaction_time: DateTime<Utc>,
    #[serde(with = "money::serde_cents")]
    pub transaction_amount: i64,
    #[serde(rename = "fromCardID")]
    pub from_card_id: i64,
    #[serde(rename = "toCardID")]
    pub to_card_id: i64,
}

/// Convert database Transaction to API TransactionResponse.
///
/// The idempotency key stays internal.
impl From<Transaction> for TransactionResponse {
    fn from(transaction: Transaction) -> Self {
        Self {
            id: transaction.id,
            transaction_time: transaction.transaction_time,
            transaction_amount: transaction.amount_cents,
            from_card_id: transaction.from_card_id,
            to_card_id: transaction.to_card_id,
        }
    }
}

/// Response body of a successful (or replayed) transfer.
#[derive(Debug, Serialize)]
pub struct TransferResponse {
    pub message: String,
    pub transaction: TransactionResponse,
    /// True when an earlier transfer with the same idempotency key was returned
    pub replayed: bool,
}

/// Query string of `GET /api/transaction/{cardId}`.
#[derive(Debug, Deserialize)]
pub struct TransactionQuery {
    #[serde(rename = "type")]
    pub direction: Option<String>,
}
