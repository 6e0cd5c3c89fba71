mod common;

use std::time::Duration;

use card_ledger::{
    error::AppError,
    models::transaction::Direction,
    services::transfer_engine::{TransferCommand, execute_transfer},
    store::{LedgerStore, MemoryStore},
};
use common::{account, balance, card, policy};
use tokio::task::JoinSet;

const AMOUNT: i64 = 10_000;

fn spawn_transfer(
    tasks: &mut JoinSet<Result<(), AppError>>,
    store: &MemoryStore,
    account_id: i64,
    from_card_id: i64,
    to_card_number: &str,
) {
    let store = store.clone();
    let to_card_number = to_card_number.to_string();
    tasks.spawn(async move {
        execute_transfer(
            &store,
            &policy(),
            TransferCommand {
                account_id,
                from_card_id,
                to_card_number,
                amount_cents: AMOUNT,
                idempotency_key: None,
            },
        )
        .await
        .map(|_| ())
    });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_overdraft_fails_exactly_once() {
    const N: i64 = 12;

    let store = MemoryStore::new();
    let alice = account(&store, "alice@example.com").await;
    let bob = account(&store, "bob@example.com").await;
    let a = card(&store, alice, "1111", (N - 1) * AMOUNT).await;
    let b = card(&store, bob, "2222", 0).await;

    let mut tasks = JoinSet::new();
    for _ in 0..N {
        spawn_transfer(&mut tasks, &store, alice, a, "2222");
    }

    let mut succeeded = 0;
    let mut insufficient = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.unwrap() {
            Ok(()) => succeeded += 1,
            Err(AppError::InsufficientFunds) => insufficient += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(succeeded, N - 1);
    assert_eq!(insufficient, 1);
    assert_eq!(balance(&store, a).await, 0);
    assert_eq!(balance(&store, b).await, (N - 1) * AMOUNT);
    assert_eq!(
        store.list_transactions(a, Direction::Outgoing).await.unwrap().len() as i64,
        N - 1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposite_transfers_do_not_deadlock() {
    const ROUNDS: usize = 40;

    let store = MemoryStore::new();
    let alice = account(&store, "alice@example.com").await;
    let bob = account(&store, "bob@example.com").await;
    let a = card(&store, alice, "1111", 1_000_000).await;
    let b = card(&store, bob, "2222", 1_000_000).await;

    let mut tasks = JoinSet::new();
    for _ in 0..ROUNDS {
        spawn_transfer(&mut tasks, &store, alice, a, "2222");
        spawn_transfer(&mut tasks, &store, bob, b, "1111");
    }

    let all_done = async {
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }
    };
    tokio::time::timeout(Duration::from_secs(10), all_done)
        .await
        .expect("transfers deadlocked");

    assert_eq!(balance(&store, a).await, 1_000_000);
    assert_eq!(balance(&store, b).await, 1_000_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_money_is_conserved_under_contention() {
    let store = MemoryStore::new();
    let owner = account(&store, "owner@example.com").await;
    let numbers = ["1111", "2222", "3333"];
    let mut cards = Vec::new();
    for number in numbers {
        cards.push(card(&store, owner, number, 35_000).await);
    }
    let total: i64 = 3 * 35_000;

    let mut tasks = JoinSet::new();
    for round in 0..60 {
        let from = cards[round % 3];
        let to_number = numbers[(round + 1 + round / 3 % 2) % 3];
        spawn_transfer(&mut tasks, &store, owner, from, to_number);
    }

    while let Some(joined) = tasks.join_next().await {
        match joined.unwrap() {
            Ok(()) | Err(AppError::InsufficientFunds) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    let mut sum = 0;
    for id in &cards {
        let balance = balance(&store, *id).await;
        assert!(balance >= 0);
        sum += balance;
    }
    assert_eq!(sum, total);
}
