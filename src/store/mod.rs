//! Ledger store: storage ports and their backends.
//!
//! The services only talk to storage through the traits below:
//!
//! - [`AccountStore`]: account master records
//! - [`CardStore`]: card master records and registry primitives
//! - [`LedgerStore`]: opens [`TransferUnit`]s and reads committed transactions
//! - [`CredentialStore`]: sessions and password reset tokens
//!
//! [`Store`] is the union the application state holds as `Arc<dyn Store>`.
//!
//! # Balance mutation
//!
//! `cards.balance_cents` is written in exactly one place: a [`TransferUnit`].
//! A unit locks card rows in ascending id order, adjusts balances with a
//! non-negative guard, appends the transaction and commits all of it at once.
//! Dropping a unit without committing rolls everything back and releases the
//! locks, on every exit path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::CardRemovalPolicy;
use crate::error::AppError;
use crate::models::account::{Account, NewAccount, UpdateAccountRequest};
use crate::models::card::{Card, LockedCard, NewCard};
use crate::models::credential::PasswordResetToken;
use crate::models::transaction::{Direction, NewTransaction, Transaction};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert a new account. Fails with `EmailTaken` when a live account uses the email.
    async fn create_account(&self, account: NewAccount) -> Result<Account, AppError>;

    /// Live account by id.
    async fn get_account(&self, id: i64) -> Result<Option<Account>, AppError>;

    /// Live account by (already lowercased) email.
    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, AppError>;

    async fn update_profile(
        &self,
        id: i64,
        update: &UpdateAccountRequest,
    ) -> Result<Account, AppError>;

    async fn update_password_digest(&self, id: i64, digest: &str) -> Result<(), AppError>;

    /// Point the account at one of its cards, or clear the reference with `None`.
    async fn set_default_card(&self, id: i64, card_id: Option<i64>) -> Result<(), AppError>;

    /// Soft delete. Returns false when no live account had this id.
    async fn delete_account(&self, id: i64) -> Result<bool, AppError>;
}

#[async_trait]
pub trait CardStore: Send + Sync {
    /// Insert a card unless the account already owns `max_per_account` live cards.
    ///
    /// The count and the insert are one atomic step, so two concurrent adds
    /// cannot both take the last slot. Fails with `LimitExceeded`,
    /// `DuplicateCardNumber` or `NotFound` for a missing account.
    async fn insert_card(&self, card: NewCard, max_per_account: usize)
    -> Result<Card, AppError>;

    /// Live card by id.
    async fn get_card(&self, id: i64) -> Result<Option<Card>, AppError>;

    /// Card by id, soft-deleted or not.
    async fn get_card_including_removed(&self, id: i64) -> Result<Option<Card>, AppError>;

    /// Live cards of an account, id ascending.
    async fn list_cards(&self, account_id: i64) -> Result<Vec<Card>, AppError>;

    async fn find_card_id_by_number(&self, card_number: &str) -> Result<Option<i64>, AppError>;

    /// Soft delete a live card and clear it as its owner's default card.
    ///
    /// Waits for any transfer unit holding the card's lock, then applies
    /// `policy` to the balance it sees. Returns the card as it was at deletion
    /// time, or `None` when it was not live.
    async fn soft_delete_card(
        &self,
        id: i64,
        policy: CardRemovalPolicy,
    ) -> Result<Option<Card>, AppError>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a new atomic unit of work for one transfer.
    async fn begin_transfer(&self) -> Result<Box<dyn TransferUnit>, AppError>;

    /// Committed transaction recorded under this source card and key.
    async fn find_transaction_by_key(
        &self,
        from_card_id: i64,
        idempotency_key: &str,
    ) -> Result<Option<Transaction>, AppError>;

    /// Committed transactions touching a card, oldest first.
    async fn list_transactions(
        &self,
        card_id: i64,
        direction: Direction,
    ) -> Result<Vec<Transaction>, AppError>;

    /// Cheap round trip used by the health check.
    async fn ping(&self) -> Result<(), AppError>;
}

/// One transfer's atomic boundary over the ledger.
///
/// Nothing a unit does is visible to anyone else until [`TransferUnit::commit`]
/// succeeds. Dropping the unit rolls back and releases its locks.
#[async_trait]
pub trait TransferUnit: Send {
    /// Acquire exclusive locks on the given live cards, lowest id first.
    ///
    /// Returns the locked rows in ascending id order; ids that are not live
    /// cards are absent from the result. Locks are held until commit or drop.
    async fn lock_cards(&mut self, ids: &[i64]) -> Result<Vec<LockedCard>, AppError>;

    /// Transaction already recorded under this source card and key, as seen
    /// while holding the source card's lock.
    async fn find_transaction_by_key(
        &mut self,
        from_card_id: i64,
        idempotency_key: &str,
    ) -> Result<Option<Transaction>, AppError>;

    /// Add `delta` to a locked card's balance and return the new balance.
    ///
    /// Fails with `WouldGoNegative` when `delta < 0` and the result would
    /// drop below zero; the balance is left untouched in that case.
    async fn adjust_balance(&mut self, card_id: i64, delta: i64) -> Result<i64, AppError>;

    /// Append an immutable transaction record.
    async fn append_transaction(
        &mut self,
        transaction: NewTransaction,
    ) -> Result<Transaction, AppError>;

    /// Make every change of this unit visible at once.
    async fn commit(self: Box<Self>) -> Result<(), AppError>;
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn create_session(
        &self,
        account_id: i64,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// Account id of an unexpired session whose owner is still live.
    async fn resolve_session(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>, AppError>;

    async fn delete_session(&self, token_hash: &str) -> Result<(), AppError>;

    async fn delete_account_sessions(&self, account_id: i64) -> Result<(), AppError>;

    async fn create_reset_token(
        &self,
        account_id: i64,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<PasswordResetToken, AppError>;

    /// Mark a redeemable token as used and return it.
    ///
    /// Check and mark happen atomically: of two concurrent redemptions of
    /// the same token, exactly one gets `Some`.
    async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PasswordResetToken>, AppError>;
}

/// Everything the application needs from storage.
pub trait Store: AccountStore + CardStore + LedgerStore + CredentialStore {}

impl<T> Store for T where T: AccountStore + CardStore + LedgerStore + CredentialStore {}
