//! PostgreSQL ledger store.
//!
//! # Atomicity Guarantees
//!
//! Every transfer runs inside one PostgreSQL transaction:
//! - card rows are locked with `SELECT ... FOR UPDATE`, one row at a time in
//!   ascending id order, so two transfers over the same pair of cards in
//!   opposite directions queue instead of deadlocking
//! - each balance leg is a single `UPDATE` guarded by
//!   `balance_cents + delta >= 0`, checked through the returned row
//! - dropping the transaction without commit rolls everything back

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Postgres;

use crate::config::CardRemovalPolicy;
use crate::db::DbPool;
use crate::error::AppError;
use crate::models::account::{Account, NewAccount, UpdateAccountRequest};
use crate::models::card::{Card, LockedCard, NewCard};
use crate::models::credential::PasswordResetToken;
use crate::models::transaction::{Direction, NewTransaction, Transaction};
use crate::store::{AccountStore, CardStore, CredentialStore, LedgerStore, TransferUnit};

const UNIQUE_VIOLATION: &str = "23505";

fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some(UNIQUE_VIOLATION)
                && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}

/// Ledger store backed by a PostgreSQL connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn create_account(&self, account: NewAccount) -> Result<Account, AppError> {
        sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (email, password_digest, first_name, last_name, birthday, phone_number)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(&account.email)
        .bind(&account.password_digest)
        .bind(&account.first_name)
        .bind(&account.last_name)
        .bind(account.birthday)
        .bind(&account.phone_number)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e, "accounts_email_live_idx") {
                AppError::EmailTaken
            } else {
                e.into()
            }
        })
    }

    async fn get_account(&self, id: i64) -> Result<Option<Account>, AppError> {
        let account = sqlx::query_as::<_, Account>(
            "SELECT * FROM accounts WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, AppError> {
        let account = sqlx::query_as::<_, Account>(
            "SELECT * FROM accounts WHERE email = $1 AND deleted_at IS NULL",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn update_profile(
        &self,
        id: i64,
        update: &UpdateAccountRequest,
    ) -> Result<Account, AppError> {
        sqlx::query_as::<_, Account>(
            r#"
            UPDATE accounts
            SET first_name = $1,
                last_name = $2,
                phone_number = $3,
                updated_at = NOW()
            WHERE id = $4 AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(&update.first_name)
        .bind(&update.last_name)
        .bind(&update.phone_number)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound("Account"))
    }

    async fn update_password_digest(&self, id: i64, digest: &str) -> Result<(), AppError> {
        let updated = sqlx::query(
            "UPDATE accounts SET password_digest = $1, updated_at = NOW() WHERE id = $2 AND deleted_at IS NULL",
        )
        .bind(digest)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(AppError::NotFound("Account"));
        }
        Ok(())
    }

    async fn set_default_card(&self, id: i64, card_id: Option<i64>) -> Result<(), AppError> {
        let updated = sqlx::query(
            "UPDATE accounts SET default_card_id = $1, updated_at = NOW() WHERE id = $2 AND deleted_at IS NULL",
        )
        .bind(card_id)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(AppError::NotFound("Account"));
        }
        Ok(())
    }

    async fn delete_account(&self, id: i64) -> Result<bool, AppError> {
        let updated = sqlx::query(
            "UPDATE accounts SET deleted_at = NOW(), updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }
}

#[async_trait]
impl CardStore for PgStore {
    async fn insert_card(
        &self,
        card: NewCard,
        max_per_account: usize,
    ) -> Result<Card, AppError> {
        let mut tx = self.pool.begin().await?;

        // Lock the owner so concurrent adds for one account count one at a time
        let owner: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM accounts WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
        )
        .bind(card.account_id)
        .fetch_optional(&mut *tx)
        .await?;
        if owner.is_none() {
            return Err(AppError::NotFound("Account"));
        }

        let owned: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM cards WHERE account_id = $1 AND deleted_at IS NULL",
        )
        .bind(card.account_id)
        .fetch_one(&mut *tx)
        .await?;
        if owned >= max_per_account as i64 {
            return Err(AppError::LimitExceeded(max_per_account));
        }

        let created = sqlx::query_as::<_, Card>(
            r#"
            INSERT INTO cards (account_id, card_number, balance_cents, card_type, expire_date)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(card.account_id)
        .bind(&card.card_number)
        .bind(card.balance_cents)
        .bind(&card.card_type)
        .bind(card.expire_date)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e, "cards_number_live_idx") {
                AppError::DuplicateCardNumber
            } else {
                AppError::from(e)
            }
        })?;

        tx.commit().await?;
        Ok(created)
    }

    async fn get_card(&self, id: i64) -> Result<Option<Card>, AppError> {
        let card =
            sqlx::query_as::<_, Card>("SELECT * FROM cards WHERE id = $1 AND deleted_at IS NULL")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(card)
    }

    async fn get_card_including_removed(&self, id: i64) -> Result<Option<Card>, AppError> {
        let card = sqlx::query_as::<_, Card>("SELECT * FROM cards WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(card)
    }

    async fn list_cards(&self, account_id: i64) -> Result<Vec<Card>, AppError> {
        let cards = sqlx::query_as::<_, Card>(
            "SELECT * FROM cards WHERE account_id = $1 AND deleted_at IS NULL ORDER BY id",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(cards)
    }

    async fn find_card_id_by_number(&self, card_number: &str) -> Result<Option<i64>, AppError> {
        let id = sqlx::query_scalar(
            "SELECT id FROM cards WHERE card_number = $1 AND deleted_at IS NULL",
        )
        .bind(card_number)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    async fn soft_delete_card(
        &self,
        id: i64,
        policy: CardRemovalPolicy,
    ) -> Result<Option<Card>, AppError> {
        let mut tx = self.pool.begin().await?;

        // Row lock waits for any transfer holding this card
        let balance: Option<i64> = sqlx::query_scalar(
            "SELECT balance_cents FROM cards WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(balance) = balance else {
            return Ok(None);
        };
        if policy == CardRemovalPolicy::RejectNonZeroBalance && balance != 0 {
            return Err(AppError::CardHasBalance(id));
        }

        let removed = sqlx::query_as::<_, Card>(
            r#"
            UPDATE cards
            SET deleted_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE accounts SET default_card_id = NULL, updated_at = NOW() WHERE id = $1 AND default_card_id = $2",
        )
        .bind(removed.account_id)
        .bind(removed.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(removed))
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn begin_transfer(&self) -> Result<Box<dyn TransferUnit>, AppError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransferUnit { tx }))
    }

    async fn find_transaction_by_key(
        &self,
        from_card_id: i64,
        idempotency_key: &str,
    ) -> Result<Option<Transaction>, AppError> {
        let transaction = sqlx::query_as::<_, Transaction>(
            "SELECT * FROM transactions WHERE from_card_id = $1 AND idempotency_key = $2",
        )
        .bind(from_card_id)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(transaction)
    }

    async fn list_transactions(
        &self,
        card_id: i64,
        direction: Direction,
    ) -> Result<Vec<Transaction>, AppError> {
        let sql = match direction {
            Direction::Incoming => "SELECT * FROM transactions WHERE to_card_id = $1 ORDER BY id",
            Direction::Outgoing => {
                "SELECT * FROM transactions WHERE from_card_id = $1 ORDER BY id"
            }
            Direction::All => {
                "SELECT * FROM transactions WHERE from_card_id = $1 OR to_card_id = $1 ORDER BY id"
            }
        };
        let transactions = sqlx::query_as::<_, Transaction>(sql)
            .bind(card_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(transactions)
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Transfer unit wrapping one PostgreSQL transaction.
pub struct PgTransferUnit {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl TransferUnit for PgTransferUnit {
    async fn lock_cards(&mut self, ids: &[i64]) -> Result<Vec<LockedCard>, AppError> {
        let mut ordered: Vec<i64> = ids.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        // One statement per row keeps the acquisition order explicit
        let mut locked = Vec::with_capacity(ordered.len());
        for id in ordered {
            let row: Option<(i64, i64, i64)> = sqlx::query_as(
                "SELECT id, account_id, balance_cents FROM cards WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
            )
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;

            if let Some((id, account_id, balance_cents)) = row {
                locked.push(LockedCard {
                    id,
                    account_id,
                    balance_cents,
                });
            }
        }
        Ok(locked)
    }

    async fn find_transaction_by_key(
        &mut self,
        from_card_id: i64,
        idempotency_key: &str,
    ) -> Result<Option<Transaction>, AppError> {
        let transaction = sqlx::query_as::<_, Transaction>(
            "SELECT * FROM transactions WHERE from_card_id = $1 AND idempotency_key = $2",
        )
        .bind(from_card_id)
        .bind(idempotency_key)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(transaction)
    }

    async fn adjust_balance(&mut self, card_id: i64, delta: i64) -> Result<i64, AppError> {
        let balance: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE cards
            SET balance_cents = balance_cents + $1,
                updated_at = NOW()
            WHERE id = $2
              AND deleted_at IS NULL
              AND balance_cents + $1 >= 0
            RETURNING balance_cents
            "#,
        )
        .bind(delta)
        .bind(card_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        match balance {
            Some(balance) => Ok(balance),
            None if delta < 0 => Err(AppError::WouldGoNegative(card_id)),
            None => Err(AppError::NotFound("Card")),
        }
    }

    async fn append_transaction(
        &mut self,
        transaction: NewTransaction,
    ) -> Result<Transaction, AppError> {
        let recorded = sqlx::query_as::<_, Transaction>(
            r#"
            INSERT INTO transactions (from_card_id, to_card_id, amount_cents, idempotency_key)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(transaction.from_card_id)
        .bind(transaction.to_card_id)
        .bind(transaction.amount_cents)
        .bind(&transaction.idempotency_key)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            // Lost a race on the key; the retry finds the winner's record
            if is_unique_violation(&e, "transactions_from_card_id_idempotency_key_key") {
                AppError::Conflict
            } else {
                AppError::from(e)
            }
        })?;
        Ok(recorded)
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let unit = *self;
        unit.tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn create_session(
        &self,
        account_id: i64,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query("INSERT INTO sessions (account_id, token_hash, expires_at) VALUES ($1, $2, $3)")
            .bind(account_id)
            .bind(token_hash)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn resolve_session(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>, AppError> {
        let account_id = sqlx::query_scalar(
            r#"
            SELECT s.account_id
            FROM sessions s
            JOIN accounts a ON a.id = s.account_id
            WHERE s.token_hash = $1
              AND s.expires_at > $2
              AND a.deleted_at IS NULL
            "#,
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account_id)
    }

    async fn delete_session(&self, token_hash: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_account_sessions(&self, account_id: i64) -> Result<(), AppError> {
        sqlx::query("DELETE FROM sessions WHERE account_id = $1")
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_reset_token(
        &self,
        account_id: i64,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<PasswordResetToken, AppError> {
        let token = sqlx::query_as::<_, PasswordResetToken>(
            r#"
            INSERT INTO password_reset_tokens (account_id, token_hash, expires_at)
            VALUES ($1, $2, $3)
            RETURNING id, account_id, token_hash, expires_at, used
            "#,
        )
        .bind(account_id)
        .bind(token_hash)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(token)
    }

    async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PasswordResetToken>, AppError> {
        // Check and mark in one statement: only one caller sees the row come back
        let token = sqlx::query_as::<_, PasswordResetToken>(
            r#"
            UPDATE password_reset_tokens
            SET used = TRUE
            WHERE token_hash = $1
              AND used = FALSE
              AND expires_at > $2
            RETURNING id, account_id, token_hash, expires_at, used
            "#,
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(token)
    }
}
