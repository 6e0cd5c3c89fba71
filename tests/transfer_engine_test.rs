mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use card_ledger::{
    config::{CardRemovalPolicy, LedgerPolicy, RetryPolicy},
    error::AppError,
    models::{
        account::{Account, NewAccount, UpdateAccountRequest},
        card::{Card, LockedCard, NewCard},
        credential::PasswordResetToken,
        transaction::{Direction, NewTransaction, Transaction},
    },
    services::transfer_engine::{TransferCommand, execute_transfer},
    store::{
        AccountStore, CardStore, CredentialStore, LedgerStore, MemoryStore, TransferUnit,
    },
};
use chrono::{DateTime, Utc};
use common::{account, balance, card, policy};

fn transfer(account_id: i64, from: i64, to_number: &str, amount_cents: i64) -> TransferCommand {
    TransferCommand {
        account_id,
        from_card_id: from,
        to_card_number: to_number.to_string(),
        amount_cents,
        idempotency_key: None,
    }
}

#[tokio::test]
async fn test_transfer_moves_money_and_records_transaction() {
    let store = MemoryStore::new();
    let alice = account(&store, "alice@example.com").await;
    let bob = account(&store, "bob@example.com").await;
    let a = card(&store, alice, "1111", 50_000).await;
    let b = card(&store, bob, "2222", 0).await;

    let outcome = execute_transfer(&store, &policy(), transfer(alice, a, "2222", 15_000))
        .await
        .unwrap();

    assert!(!outcome.replayed);
    assert_eq!(outcome.transaction.from_card_id, a);
    assert_eq!(outcome.transaction.to_card_id, b);
    assert_eq!(outcome.transaction.amount_cents, 15_000);
    assert_eq!(balance(&store, a).await, 35_000);
    assert_eq!(balance(&store, b).await, 15_000);

    let outgoing = store.list_transactions(a, Direction::Outgoing).await.unwrap();
    let incoming = store.list_transactions(b, Direction::Incoming).await.unwrap();
    assert_eq!(outgoing, vec![outcome.transaction.clone()]);
    assert_eq!(incoming, vec![outcome.transaction]);
    assert!(store.list_transactions(a, Direction::Incoming).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_amount_bounds_are_inclusive() {
    let store = MemoryStore::new();
    let alice = account(&store, "alice@example.com").await;
    let a = card(&store, alice, "1111", 20_000_000).await;
    card(&store, alice, "2222", 0).await;
    let limits = policy().limits;

    for amount in [limits.min_cents - 1, limits.max_cents + 1, 0] {
        let result = execute_transfer(&store, &policy(), transfer(alice, a, "2222", amount)).await;
        assert!(
            matches!(result, Err(AppError::AmountOutOfRange { .. })),
            "amount {amount} should be rejected"
        );
    }
    assert_eq!(balance(&store, a).await, 20_000_000);

    for amount in [limits.min_cents, limits.max_cents] {
        execute_transfer(&store, &policy(), transfer(alice, a, "2222", amount))
            .await
            .unwrap();
    }
    assert_eq!(
        balance(&store, a).await,
        20_000_000 - limits.min_cents - limits.max_cents
    );
}

#[tokio::test]
async fn test_rejections_leave_no_trace() {
    let store = MemoryStore::new();
    let alice = account(&store, "alice@example.com").await;
    let mallory = account(&store, "mallory@example.com").await;
    let a = card(&store, alice, "1111", 50_000).await;
    let m = card(&store, mallory, "9999", 50_000).await;

    let cases = [
        (transfer(alice, a, "0000", 10_000), "destination"),
        (transfer(alice, m, "1111", 10_000), "owner"),
        (transfer(alice, a, "1111", 10_000), "self"),
        (transfer(alice, a, "9999", 60_000), "funds"),
    ];
    for (command, case) in cases {
        let err = execute_transfer(&store, &policy(), command).await.unwrap_err();
        let expected = match case {
            "destination" => matches!(err, AppError::DestinationNotFound),
            "owner" => matches!(err, AppError::NotOwner(id) if id == m),
            "self" => matches!(err, AppError::InvalidTransfer),
            _ => matches!(err, AppError::InsufficientFunds),
        };
        assert!(expected, "{case}: unexpected {err:?}");
    }

    assert_eq!(balance(&store, a).await, 50_000);
    assert_eq!(balance(&store, m).await, 50_000);
    assert!(store.list_transactions(a, Direction::All).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_destination_is_checked_before_ownership() {
    let store = MemoryStore::new();
    let alice = account(&store, "alice@example.com").await;
    let mallory = account(&store, "mallory@example.com").await;
    let m = card(&store, mallory, "9999", 50_000).await;

    let result = execute_transfer(&store, &policy(), transfer(alice, m, "0000", 10_000)).await;
    assert!(matches!(result, Err(AppError::DestinationNotFound)));
}

#[tokio::test]
async fn test_exact_balance_can_be_spent() {
    let store = MemoryStore::new();
    let alice = account(&store, "alice@example.com").await;
    let a = card(&store, alice, "1111", 10_000).await;
    card(&store, alice, "2222", 0).await;

    execute_transfer(&store, &policy(), transfer(alice, a, "2222", 10_000))
        .await
        .unwrap();
    assert_eq!(balance(&store, a).await, 0);
}

#[tokio::test]
async fn test_repeated_key_returns_prior_result() {
    let store = MemoryStore::new();
    let alice = account(&store, "alice@example.com").await;
    let a = card(&store, alice, "1111", 50_000).await;
    let b = card(&store, alice, "2222", 0).await;

    let keyed = |amount| TransferCommand {
        idempotency_key: Some("order-17".to_string()),
        ..transfer(alice, a, "2222", amount)
    };

    let first = execute_transfer(&store, &policy(), keyed(15_000)).await.unwrap();
    let second = execute_transfer(&store, &policy(), keyed(15_000)).await.unwrap();

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(first.transaction, second.transaction);
    assert_eq!(balance(&store, a).await, 35_000);
    assert_eq!(balance(&store, b).await, 15_000);

    let reused = execute_transfer(&store, &policy(), keyed(20_000)).await;
    assert!(matches!(reused, Err(AppError::InvalidRequest(_))));

    // Without a key every request is a new transfer
    execute_transfer(&store, &policy(), transfer(alice, a, "2222", 15_000))
        .await
        .unwrap();
    assert_eq!(balance(&store, a).await, 20_000);
}

#[tokio::test]
async fn test_repeated_key_survives_destination_removal() {
    let store = MemoryStore::new();
    let alice = account(&store, "alice@example.com").await;
    let bob = account(&store, "bob@example.com").await;
    let a = card(&store, alice, "1111", 50_000).await;
    let b = card(&store, bob, "4000", 0).await;

    let keyed = |number: &str, amount| TransferCommand {
        idempotency_key: Some("k1".to_string()),
        ..transfer(alice, a, number, amount)
    };

    let first = execute_transfer(&store, &policy(), keyed("4000", 15_000))
        .await
        .unwrap();
    store
        .soft_delete_card(b, CardRemovalPolicy::Permit)
        .await
        .unwrap();

    let second = execute_transfer(&store, &policy(), keyed("4000", 15_000))
        .await
        .unwrap();
    assert!(second.replayed);
    assert_eq!(second.transaction, first.transaction);
    assert_eq!(balance(&store, a).await, 35_000);

    // Still bound to the recorded transfer
    card(&store, alice, "5000", 0).await;
    let other_destination = execute_transfer(&store, &policy(), keyed("5000", 15_000)).await;
    assert!(matches!(other_destination, Err(AppError::InvalidRequest(_))));
    let other_amount = execute_transfer(&store, &policy(), keyed("4000", 1_000)).await;
    assert!(matches!(other_amount, Err(AppError::InvalidRequest(_))));

    // Only the source card's owner gets the replay
    let stranger = TransferCommand {
        account_id: bob,
        ..keyed("4000", 15_000)
    };
    let result = execute_transfer(&store, &policy(), stranger).await;
    assert!(matches!(result, Err(AppError::NotOwner(_))));
}

#[tokio::test]
async fn test_removed_cards_cannot_transfer() {
    let store = MemoryStore::new();
    let alice = account(&store, "alice@example.com").await;
    let a = card(&store, alice, "1111", 50_000).await;
    let b = card(&store, alice, "2222", 0).await;

    store
        .soft_delete_card(b, CardRemovalPolicy::Permit)
        .await
        .unwrap();
    let result = execute_transfer(&store, &policy(), transfer(alice, a, "2222", 10_000)).await;
    assert!(matches!(result, Err(AppError::DestinationNotFound)));

    store
        .soft_delete_card(a, CardRemovalPolicy::Permit)
        .await
        .unwrap();
    card(&store, alice, "3333", 0).await;
    let result = execute_transfer(&store, &policy(), transfer(alice, a, "3333", 10_000)).await;
    assert!(matches!(result, Err(AppError::NotOwner(_))));
}

/// Wraps a `MemoryStore` and injects storage faults into transfer units.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    /// `begin_transfer` calls that fail before doing anything
    failed_begins: AtomicU32,
    /// Commits that succeed but report `StorageUnavailable`
    lost_acks: AtomicU32,
    /// `begin_transfer` calls that hang past any timeout
    stalls: AtomicU32,
    begins: AtomicU32,
}

fn take(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

struct LossyUnit {
    inner: Box<dyn TransferUnit>,
    lose_ack: bool,
}

#[async_trait]
impl TransferUnit for LossyUnit {
    async fn lock_cards(&mut self, ids: &[i64]) -> Result<Vec<LockedCard>, AppError> {
        self.inner.lock_cards(ids).await
    }

    async fn find_transaction_by_key(
        &mut self,
        from_card_id: i64,
        idempotency_key: &str,
    ) -> Result<Option<Transaction>, AppError> {
        self.inner
            .find_transaction_by_key(from_card_id, idempotency_key)
            .await
    }

    async fn adjust_balance(&mut self, card_id: i64, delta: i64) -> Result<i64, AppError> {
        self.inner.adjust_balance(card_id, delta).await
    }

    async fn append_transaction(
        &mut self,
        transaction: NewTransaction,
    ) -> Result<Transaction, AppError> {
        self.inner.append_transaction(transaction).await
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let lose_ack = self.lose_ack;
        self.inner.commit().await?;
        if lose_ack {
            return Err(AppError::StorageUnavailable);
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for FlakyStore {
    async fn begin_transfer(&self) -> Result<Box<dyn TransferUnit>, AppError> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        if take(&self.stalls) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if take(&self.failed_begins) {
            return Err(AppError::StorageUnavailable);
        }
        Ok(Box::new(LossyUnit {
            inner: self.inner.begin_transfer().await?,
            lose_ack: take(&self.lost_acks),
        }))
    }

    async fn find_transaction_by_key(
        &self,
        from_card_id: i64,
        idempotency_key: &str,
    ) -> Result<Option<Transaction>, AppError> {
        self.inner
            .find_transaction_by_key(from_card_id, idempotency_key)
            .await
    }

    async fn list_transactions(
        &self,
        card_id: i64,
        direction: Direction,
    ) -> Result<Vec<Transaction>, AppError> {
        self.inner.list_transactions(card_id, direction).await
    }

    async fn ping(&self) -> Result<(), AppError> {
        self.inner.ping().await
    }
}

#[async_trait]
impl AccountStore for FlakyStore {
    async fn create_account(&self, account: NewAccount) -> Result<Account, AppError> {
        self.inner.create_account(account).await
    }

    async fn get_account(&self, id: i64) -> Result<Option<Account>, AppError> {
        self.inner.get_account(id).await
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, AppError> {
        self.inner.find_account_by_email(email).await
    }

    async fn update_profile(
        &self,
        id: i64,
        update: &UpdateAccountRequest,
    ) -> Result<Account, AppError> {
        self.inner.update_profile(id, update).await
    }

    async fn update_password_digest(&self, id: i64, digest: &str) -> Result<(), AppError> {
        self.inner.update_password_digest(id, digest).await
    }

    async fn set_default_card(&self, id: i64, card_id: Option<i64>) -> Result<(), AppError> {
        self.inner.set_default_card(id, card_id).await
    }

    async fn delete_account(&self, id: i64) -> Result<bool, AppError> {
        self.inner.delete_account(id).await
    }
}

#[async_trait]
impl CardStore for FlakyStore {
    async fn insert_card(&self, card: NewCard, max_per_account: usize) -> Result<Card, AppError> {
        self.inner.insert_card(card, max_per_account).await
    }

    async fn get_card(&self, id: i64) -> Result<Option<Card>, AppError> {
        self.inner.get_card(id).await
    }

    async fn get_card_including_removed(&self, id: i64) -> Result<Option<Card>, AppError> {
        self.inner.get_card_including_removed(id).await
    }

    async fn list_cards(&self, account_id: i64) -> Result<Vec<Card>, AppError> {
        self.inner.list_cards(account_id).await
    }

    async fn find_card_id_by_number(&self, card_number: &str) -> Result<Option<i64>, AppError> {
        self.inner.find_card_id_by_number(card_number).await
    }

    async fn soft_delete_card(
        &self,
        id: i64,
        policy: CardRemovalPolicy,
    ) -> Result<Option<Card>, AppError> {
        self.inner.soft_delete_card(id, policy).await
    }
}

#[async_trait]
impl CredentialStore for FlakyStore {
    async fn create_session(
        &self,
        account_id: i64,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.inner
            .create_session(account_id, token_hash, expires_at)
            .await
    }

    async fn resolve_session(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>, AppError> {
        self.inner.resolve_session(token_hash, now).await
    }

    async fn delete_session(&self, token_hash: &str) -> Result<(), AppError> {
        self.inner.delete_session(token_hash).await
    }

    async fn delete_account_sessions(&self, account_id: i64) -> Result<(), AppError> {
        self.inner.delete_account_sessions(account_id).await
    }

    async fn create_reset_token(
        &self,
        account_id: i64,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<PasswordResetToken, AppError> {
        self.inner
            .create_reset_token(account_id, token_hash, expires_at)
            .await
    }

    async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PasswordResetToken>, AppError> {
        self.inner.consume_reset_token(token_hash, now).await
    }
}

fn fast_retries(max_attempts: u32) -> LedgerPolicy {
    LedgerPolicy {
        retry: RetryPolicy {
            max_attempts,
            backoff: Duration::from_millis(1),
        },
        storage_timeout: Duration::from_millis(200),
        ..policy()
    }
}

async fn flaky_setup() -> (FlakyStore, i64, i64, i64) {
    let store = FlakyStore::default();
    let alice = account(&store.inner, "alice@example.com").await;
    let a = card(&store.inner, alice, "1111", 50_000).await;
    let b = card(&store.inner, alice, "2222", 0).await;
    (store, alice, a, b)
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let (store, alice, a, b) = flaky_setup().await;
    store.failed_begins.store(2, Ordering::SeqCst);

    let outcome = execute_transfer(&store, &fast_retries(3), transfer(alice, a, "2222", 15_000))
        .await
        .unwrap();

    assert!(!outcome.replayed);
    assert_eq!(store.begins.load(Ordering::SeqCst), 3);
    assert_eq!(balance(&store.inner, a).await, 35_000);
    assert_eq!(balance(&store.inner, b).await, 15_000);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let (store, alice, a, _) = flaky_setup().await;
    store.failed_begins.store(10, Ordering::SeqCst);

    let result = execute_transfer(&store, &fast_retries(3), transfer(alice, a, "2222", 15_000)).await;

    assert!(matches!(result, Err(AppError::StorageUnavailable)));
    assert_eq!(store.begins.load(Ordering::SeqCst), 3);
    assert_eq!(balance(&store.inner, a).await, 50_000);
}

#[tokio::test]
async fn test_business_errors_are_not_retried() {
    let (store, alice, a, _) = flaky_setup().await;

    let result = execute_transfer(&store, &fast_retries(3), transfer(alice, a, "2222", 60_000)).await;

    assert!(matches!(result, Err(AppError::InsufficientFunds)));
    assert_eq!(store.begins.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stalled_storage_times_out_and_retries() {
    let (store, alice, a, b) = flaky_setup().await;
    store.stalls.store(1, Ordering::SeqCst);

    let outcome = execute_transfer(&store, &fast_retries(2), transfer(alice, a, "2222", 15_000))
        .await
        .unwrap();

    assert_eq!(outcome.transaction.to_card_id, b);
    assert_eq!(store.begins.load(Ordering::SeqCst), 2);
    assert_eq!(balance(&store.inner, a).await, 35_000);
}

#[tokio::test]
async fn test_lost_acknowledgement_is_not_applied_twice() {
    let (store, alice, a, b) = flaky_setup().await;
    store.lost_acks.store(1, Ordering::SeqCst);

    let outcome = execute_transfer(&store, &fast_retries(3), transfer(alice, a, "2222", 15_000))
        .await
        .unwrap();

    assert!(outcome.replayed);
    assert_eq!(store.begins.load(Ordering::SeqCst), 2);
    assert_eq!(balance(&store.inner, a).await, 35_000);
    assert_eq!(balance(&store.inner, b).await, 15_000);
    assert_eq!(
        store.inner.list_transactions(a, Direction::All).await.unwrap().len(),
        1
    );
}
