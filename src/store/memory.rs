//! In-process ledger store.
//!
//! All records live in one `RwLock`-protected state. Card balances are
//! additionally guarded by one async mutex per card, which a
//! [`MemoryTransferUnit`] holds from `lock_cards` until it is committed or
//! dropped. Changes staged by a unit are applied under a single write lock, so
//! readers either see all of a transfer or none of it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::config::CardRemovalPolicy;
use crate::error::AppError;
use crate::models::account::{Account, NewAccount, UpdateAccountRequest};
use crate::models::card::{Card, LockedCard, NewCard};
use crate::models::credential::{PasswordResetToken, Session};
use crate::models::transaction::{Direction, NewTransaction, Transaction};
use crate::store::{AccountStore, CardStore, CredentialStore, LedgerStore, TransferUnit};

#[derive(Default)]
struct State {
    accounts: BTreeMap<i64, Account>,
    cards: BTreeMap<i64, Card>,
    transactions: Vec<Transaction>,
    sessions: HashMap<String, Session>,
    reset_tokens: HashMap<String, PasswordResetToken>,
    last_account_id: i64,
    last_card_id: i64,
    last_session_id: i64,
    last_reset_token_id: i64,
}

impl State {
    fn live_card(&self, id: i64) -> Option<&Card> {
        self.cards.get(&id).filter(|card| card.deleted_at.is_none())
    }

    fn live_account_mut(&mut self, id: i64) -> Option<&mut Account> {
        self.accounts
            .get_mut(&id)
            .filter(|account| account.deleted_at.is_none())
    }

    fn transaction_by_key(&self, from_card_id: i64, key: &str) -> Option<&Transaction> {
        self.transactions
            .iter()
            .find(|t| t.from_card_id == from_card_id && t.idempotency_key == key)
    }
}

/// A thread-safe in-memory ledger store.
///
/// Cloning is cheap and every clone shares the same data, which makes it
/// convenient for tests and single-process deployments.
#[derive(Default, Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    card_locks: Arc<Mutex<HashMap<i64, Arc<Mutex<()>>>>>,
    // Shared so that ids handed out by concurrent units never collide
    last_transaction_id: Arc<AtomicI64>,
}

impl MemoryStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    async fn card_lock(&self, card_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.card_locks.lock().await;
        locks.entry(card_id).or_default().clone()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn create_account(&self, account: NewAccount) -> Result<Account, AppError> {
        let mut state = self.state.write().await;
        let taken = state
            .accounts
            .values()
            .any(|a| a.deleted_at.is_none() && a.email == account.email);
        if taken {
            return Err(AppError::EmailTaken);
        }

        state.last_account_id += 1;
        let now = Utc::now();
        let record = Account {
            id: state.last_account_id,
            email: account.email,
            password_digest: account.password_digest,
            first_name: account.first_name,
            last_name: account.last_name,
            birthday: account.birthday,
            phone_number: account.phone_number,
            default_card_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        state.accounts.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_account(&self, id: i64) -> Result<Option<Account>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .accounts
            .get(&id)
            .filter(|a| a.deleted_at.is_none())
            .cloned())
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .accounts
            .values()
            .find(|a| a.deleted_at.is_none() && a.email == email)
            .cloned())
    }

    async fn update_profile(
        &self,
        id: i64,
        update: &UpdateAccountRequest,
    ) -> Result<Account, AppError> {
        let mut state = self.state.write().await;
        let account = state
            .live_account_mut(id)
            .ok_or(AppError::NotFound("Account"))?;
        account.first_name = update.first_name.clone();
        account.last_name = update.last_name.clone();
        account.phone_number = update.phone_number.clone();
        account.updated_at = Utc::now();
        Ok(account.clone())
    }

    async fn update_password_digest(&self, id: i64, digest: &str) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        let account = state
            .live_account_mut(id)
            .ok_or(AppError::NotFound("Account"))?;
        account.password_digest = digest.to_string();
        account.updated_at = Utc::now();
        Ok(())
    }

    async fn set_default_card(&self, id: i64, card_id: Option<i64>) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        let account = state
            .live_account_mut(id)
            .ok_or(AppError::NotFound("Account"))?;
        account.default_card_id = card_id;
        account.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_account(&self, id: i64) -> Result<bool, AppError> {
        let mut state = self.state.write().await;
        match state.live_account_mut(id) {
            Some(account) => {
                let now = Utc::now();
                account.deleted_at = Some(now);
                account.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl CardStore for MemoryStore {
    async fn insert_card(
        &self,
        card: NewCard,
        max_per_account: usize,
    ) -> Result<Card, AppError> {
        let mut state = self.state.write().await;

        if state.live_account_mut(card.account_id).is_none() {
            return Err(AppError::NotFound("Account"));
        }

        let owned = state
            .cards
            .values()
            .filter(|c| c.deleted_at.is_none() && c.account_id == card.account_id)
            .count();
        if owned >= max_per_account {
            return Err(AppError::LimitExceeded(max_per_account));
        }

        let duplicate = state
            .cards
            .values()
            .any(|c| c.deleted_at.is_none() && c.card_number == card.card_number);
        if duplicate {
            return Err(AppError::DuplicateCardNumber);
        }

        state.last_card_id += 1;
        let now = Utc::now();
        let record = Card {
            id: state.last_card_id,
            account_id: card.account_id,
            card_number: card.card_number,
            balance_cents: card.balance_cents,
            card_type: card.card_type,
            expire_date: card.expire_date,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        state.cards.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_card(&self, id: i64) -> Result<Option<Card>, AppError> {
        let state = self.state.read().await;
        Ok(state.live_card(id).cloned())
    }

    async fn get_card_including_removed(&self, id: i64) -> Result<Option<Card>, AppError> {
        let state = self.state.read().await;
        Ok(state.cards.get(&id).cloned())
    }

    async fn list_cards(&self, account_id: i64) -> Result<Vec<Card>, AppError> {
        let state = self.state.read().await;
        // BTreeMap iteration is already id ascending
        Ok(state
            .cards
            .values()
            .filter(|c| c.deleted_at.is_none() && c.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn find_card_id_by_number(&self, card_number: &str) -> Result<Option<i64>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .cards
            .values()
            .find(|c| c.deleted_at.is_none() && c.card_number == card_number)
            .map(|c| c.id))
    }

    async fn soft_delete_card(
        &self,
        id: i64,
        policy: CardRemovalPolicy,
    ) -> Result<Option<Card>, AppError> {
        // Same lock transfer units take, so a removal never interleaves with a commit
        let lock = self.card_lock(id).await;
        let _guard = lock.lock_owned().await;

        let mut state = self.state.write().await;
        let Some(card) = state.cards.get_mut(&id).filter(|c| c.deleted_at.is_none()) else {
            return Ok(None);
        };
        if policy == CardRemovalPolicy::RejectNonZeroBalance && card.balance_cents != 0 {
            return Err(AppError::CardHasBalance(id));
        }
        let now = Utc::now();
        card.deleted_at = Some(now);
        card.updated_at = now;
        let removed = card.clone();

        if let Some(owner) = state.accounts.get_mut(&removed.account_id)
            && owner.default_card_id == Some(id)
        {
            owner.default_card_id = None;
            owner.updated_at = now;
        }

        Ok(Some(removed))
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn begin_transfer(&self) -> Result<Box<dyn TransferUnit>, AppError> {
        Ok(Box::new(MemoryTransferUnit {
            store: self.clone(),
            guards: Vec::new(),
            balances: BTreeMap::new(),
            appended: Vec::new(),
        }))
    }

    async fn find_transaction_by_key(
        &self,
        from_card_id: i64,
        idempotency_key: &str,
    ) -> Result<Option<Transaction>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .transaction_by_key(from_card_id, idempotency_key)
            .cloned())
    }

    async fn list_transactions(
        &self,
        card_id: i64,
        direction: Direction,
    ) -> Result<Vec<Transaction>, AppError> {
        let state = self.state.read().await;
        let mut transactions: Vec<Transaction> = state
            .transactions
            .iter()
            .filter(|t| direction.matches(card_id, t))
            .cloned()
            .collect();
        // Units may commit out of id order
        transactions.sort_by_key(|t| t.id);
        Ok(transactions)
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// Transfer unit over [`MemoryStore`].
///
/// Holds the per-card guards it acquired plus the staged balances and
/// transactions. Dropping it discards the staged state and releases the guards.
pub struct MemoryTransferUnit {
    store: MemoryStore,
    guards: Vec<(i64, OwnedMutexGuard<()>)>,
    balances: BTreeMap<i64, i64>,
    appended: Vec<Transaction>,
}

impl MemoryTransferUnit {
    fn highest_locked(&self) -> Option<i64> {
        self.guards.iter().map(|(id, _)| *id).max()
    }
}

#[async_trait]
impl TransferUnit for MemoryTransferUnit {
    async fn lock_cards(&mut self, ids: &[i64]) -> Result<Vec<LockedCard>, AppError> {
        let mut ordered: Vec<i64> = ids.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        let already_locked: Vec<i64> = self.guards.iter().map(|(id, _)| *id).collect();
        let fresh: Vec<i64> = ordered
            .iter()
            .copied()
            .filter(|id| !already_locked.contains(id))
            .collect();

        if let (Some(highest), Some(lowest_fresh)) = (self.highest_locked(), fresh.first())
            && *lowest_fresh < highest
        {
            return Err(AppError::Internal(format!(
                "card {lowest_fresh} locked after card {highest}"
            )));
        }

        for id in fresh {
            let lock = self.store.card_lock(id).await;
            let guard = lock.lock_owned().await;
            self.guards.push((id, guard));
        }

        let state = self.store.state.read().await;
        let mut locked = Vec::with_capacity(ordered.len());
        for id in ordered {
            let Some(card) = state.live_card(id) else {
                continue;
            };
            let balance_cents = *self.balances.entry(id).or_insert(card.balance_cents);
            locked.push(LockedCard {
                id,
                account_id: card.account_id,
                balance_cents,
            });
        }
        Ok(locked)
    }

    async fn find_transaction_by_key(
        &mut self,
        from_card_id: i64,
        idempotency_key: &str,
    ) -> Result<Option<Transaction>, AppError> {
        if let Some(staged) = self
            .appended
            .iter()
            .find(|t| t.from_card_id == from_card_id && t.idempotency_key == idempotency_key)
        {
            return Ok(Some(staged.clone()));
        }
        self.store
            .find_transaction_by_key(from_card_id, idempotency_key)
            .await
    }

    async fn adjust_balance(&mut self, card_id: i64, delta: i64) -> Result<i64, AppError> {
        let balance = self.balances.get_mut(&card_id).ok_or_else(|| {
            AppError::Internal(format!("card {card_id} is not locked by this unit"))
        })?;

        let updated = balance
            .checked_add(delta)
            .ok_or_else(|| AppError::Internal(format!("balance overflow on card {card_id}")))?;
        if delta < 0 && updated < 0 {
            return Err(AppError::WouldGoNegative(card_id));
        }

        *balance = updated;
        Ok(updated)
    }

    async fn append_transaction(
        &mut self,
        transaction: NewTransaction,
    ) -> Result<Transaction, AppError> {
        if transaction.amount_cents <= 0 {
            return Err(AppError::Internal(
                "transaction amount must be positive".to_string(),
            ));
        }
        if transaction.from_card_id == transaction.to_card_id {
            return Err(AppError::Internal(
                "transaction source equals destination".to_string(),
            ));
        }
        if self
            .find_transaction_by_key(transaction.from_card_id, &transaction.idempotency_key)
            .await?
            .is_some()
        {
            return Err(AppError::Internal(format!(
                "idempotency key {} already recorded",
                transaction.idempotency_key
            )));
        }

        let id = self.store.last_transaction_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = Transaction {
            id,
            from_card_id: transaction.from_card_id,
            to_card_id: transaction.to_card_id,
            amount_cents: transaction.amount_cents,
            idempotency_key: transaction.idempotency_key,
            transaction_time: Utc::now(),
        };
        self.appended.push(record.clone());
        Ok(record)
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let unit = *self;
        let now = Utc::now();
        {
            let mut state = unit.store.state.write().await;
            for (id, balance) in &unit.balances {
                if let Some(card) = state.cards.get_mut(id)
                    && card.balance_cents != *balance
                {
                    card.balance_cents = *balance;
                    card.updated_at = now;
                }
            }
            state.transactions.extend(unit.appended);
        }
        // Guards drop here, after the write is visible
        drop(unit.guards);
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn create_session(
        &self,
        account_id: i64,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        state.last_session_id += 1;
        let session = Session {
            id: state.last_session_id,
            account_id,
            token_hash: token_hash.to_string(),
            expires_at,
        };
        state.sessions.insert(token_hash.to_string(), session);
        Ok(())
    }

    async fn resolve_session(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>, AppError> {
        let state = self.state.read().await;
        let Some(session) = state.sessions.get(token_hash) else {
            return Ok(None);
        };
        let owner_live = state
            .accounts
            .get(&session.account_id)
            .is_some_and(|a| a.deleted_at.is_none());
        Ok((session.expires_at > now && owner_live).then_some(session.account_id))
    }

    async fn delete_session(&self, token_hash: &str) -> Result<(), AppError> {
        self.state.write().await.sessions.remove(token_hash);
        Ok(())
    }

    async fn delete_account_sessions(&self, account_id: i64) -> Result<(), AppError> {
        self.state
            .write()
            .await
            .sessions
            .retain(|_, session| session.account_id != account_id);
        Ok(())
    }

    async fn create_reset_token(
        &self,
        account_id: i64,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<PasswordResetToken, AppError> {
        let mut state = self.state.write().await;
        state.last_reset_token_id += 1;
        let token = PasswordResetToken {
            id: state.last_reset_token_id,
            account_id,
            token_hash: token_hash.to_string(),
            expires_at,
            used: false,
        };
        state
            .reset_tokens
            .insert(token_hash.to_string(), token.clone());
        Ok(token)
    }

    async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PasswordResetToken>, AppError> {
        let mut state = self.state.write().await;
        match state.reset_tokens.get_mut(token_hash) {
            Some(token) if token.is_redeemable(now) => {
                token.used = true;
                Ok(Some(token.clone()))
            }
            _ => Ok(None),
        }
    }
}
