//! Transfer engine - moves money between two cards.
//!
//! # Process
//!
//! A repeated idempotency key is answered from the recorded transfer first.
//! Otherwise every check runs before anything durable happens:
//!
//! 1. Resolve the destination card by number (`DestinationNotFound`)
//! 2. Authorize the source card for the caller (`NotOwner`)
//! 3. Reject self-transfers (`InvalidTransfer`)
//! 4. Bound-check the amount (`AmountOutOfRange`)
//! 5. Inside one transfer unit: lock both cards lowest id first, re-check
//!    ownership and sufficiency (`InsufficientFunds`), append the
//!    transaction, debit, credit, commit
//!
//! # Atomicity Guarantees
//!
//! Step 5 either commits as a whole or leaves no trace. Transient storage
//! failures are retried with backoff; each attempt carries the same
//! idempotency key, so an attempt that committed but lost its
//! acknowledgement is found by the next one instead of being applied twice.

use tokio::time::{sleep, timeout};

use crate::{
    config::LedgerPolicy,
    error::AppError,
    models::{
        money,
        transaction::{NewTransaction, Transaction},
    },
    services::card_registry,
    store::Store,
};

const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

/// A transfer requested by an authenticated account.
#[derive(Debug, Clone)]
pub struct TransferCommand {
    pub account_id: i64,
    pub from_card_id: i64,
    pub to_card_number: String,
    pub amount_cents: i64,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub transaction: Transaction,
    /// True when the key matched an earlier transfer and nothing was moved
    pub replayed: bool,
}

/// Validated transfer, ready to be committed.
#[derive(Debug)]
struct TransferPlan {
    account_id: i64,
    from_card_id: i64,
    to_card_id: i64,
    amount_cents: i64,
    idempotency_key: String,
}

/// Execute a transfer.
///
/// # Returns
///
/// The committed transaction, or the earlier one recorded under the same
/// idempotency key (`replayed = true`).
///
/// # Errors
///
/// - `DestinationNotFound`: no live card has the destination number
/// - `NotOwner`: the source card is missing or not the caller's
/// - `InvalidTransfer`: source and destination are the same card
/// - `AmountOutOfRange`: amount outside the configured limits
/// - `InsufficientFunds`: source balance below the amount
/// - `InvalidRequest`: idempotency key reused for a different transfer
/// - `StorageUnavailable` / `Conflict`: retries exhausted
pub async fn execute_transfer(
    store: &dyn Store,
    policy: &LedgerPolicy,
    command: TransferCommand,
) -> Result<TransferOutcome, AppError> {
    let client_key = command.idempotency_key.clone().map(validate_key).transpose()?;

    // A repeated key answers with the recorded transfer even if the
    // destination card has been removed since
    if let Some(key) = &client_key {
        if let Some(prior) = store
            .find_transaction_by_key(command.from_card_id, key)
            .await?
        {
            return replay_recorded(store, &command, prior).await;
        }
    }

    let to_card_id = store
        .find_card_id_by_number(command.to_card_number.trim())
        .await?
        .ok_or(AppError::DestinationNotFound)?;

    if !card_registry::owns(store, command.from_card_id, command.account_id).await? {
        return Err(AppError::NotOwner(command.from_card_id));
    }

    if to_card_id == command.from_card_id {
        return Err(AppError::InvalidTransfer);
    }

    if !policy.limits.contains(command.amount_cents) {
        return Err(AppError::AmountOutOfRange {
            min: money::from_cents(policy.limits.min_cents).to_string(),
            max: money::from_cents(policy.limits.max_cents).to_string(),
        });
    }

    // The unit re-checks the key under lock
    let idempotency_key = client_key.unwrap_or_else(generate_key);

    let plan = TransferPlan {
        account_id: command.account_id,
        from_card_id: command.from_card_id,
        to_card_id,
        amount_cents: command.amount_cents,
        idempotency_key,
    };

    let mut attempt = 1;
    loop {
        let result = match timeout(policy.storage_timeout, commit_transfer(store, &plan)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::StorageUnavailable),
        };

        match result {
            Ok(outcome) => {
                if outcome.replayed {
                    tracing::info!(
                        transaction_id = outcome.transaction.id,
                        attempt,
                        "transfer already committed"
                    );
                } else {
                    tracing::info!(
                        transaction_id = outcome.transaction.id,
                        from_card_id = plan.from_card_id,
                        to_card_id = plan.to_card_id,
                        amount_cents = plan.amount_cents,
                        "transfer committed"
                    );
                }
                return Ok(outcome);
            }
            Err(err) if err.is_retryable() && attempt < policy.retry.max_attempts => {
                attempt += 1;
                let delay = policy.retry.delay_before(attempt);
                tracing::warn!(error = %err, attempt, ?delay, "retrying transfer");
                sleep(delay).await;
            }
            Err(err) => {
                if err.is_retryable() {
                    tracing::error!(error = %err, attempt, "transfer failed after retries");
                } else {
                    tracing::warn!(
                        error = %err,
                        from_card_id = plan.from_card_id,
                        "transfer rejected"
                    );
                }
                return Err(err);
            }
        }
    }
}

/// One commit attempt. Dropping the unit on any early return rolls it back.
async fn commit_transfer(
    store: &dyn Store,
    plan: &TransferPlan,
) -> Result<TransferOutcome, AppError> {
    let mut unit = store.begin_transfer().await?;
    let locked = unit
        .lock_cards(&[plan.from_card_id, plan.to_card_id])
        .await?;

    if let Some(prior) = unit
        .find_transaction_by_key(plan.from_card_id, &plan.idempotency_key)
        .await?
    {
        return replay(prior, plan.to_card_id, plan.amount_cents);
    }

    // Cards may have been removed since validation
    let source = locked
        .iter()
        .find(|card| card.id == plan.from_card_id && card.account_id == plan.account_id)
        .ok_or(AppError::NotOwner(plan.from_card_id))?;
    if !locked.iter().any(|card| card.id == plan.to_card_id) {
        return Err(AppError::DestinationNotFound);
    }

    if source.balance_cents < plan.amount_cents {
        return Err(AppError::InsufficientFunds);
    }

    let transaction = unit
        .append_transaction(NewTransaction {
            from_card_id: plan.from_card_id,
            to_card_id: plan.to_card_id,
            amount_cents: plan.amount_cents,
            idempotency_key: plan.idempotency_key.clone(),
        })
        .await?;
    unit.adjust_balance(plan.from_card_id, -plan.amount_cents)
        .await?;
    unit.adjust_balance(plan.to_card_id, plan.amount_cents)
        .await?;
    unit.commit().await?;

    Ok(TransferOutcome {
        transaction,
        replayed: false,
    })
}

/// Return the earlier transfer, unless the key is being reused for a different one.
fn replay(
    prior: Transaction,
    to_card_id: i64,
    amount_cents: i64,
) -> Result<TransferOutcome, AppError> {
    if prior.to_card_id != to_card_id || prior.amount_cents != amount_cents {
        return Err(key_reused());
    }
    Ok(TransferOutcome {
        transaction: prior,
        replayed: true,
    })
}

/// Replay a transfer found before any validation ran.
///
/// The destination is compared by card number, resolved across removed cards.
async fn replay_recorded(
    store: &dyn Store,
    command: &TransferCommand,
    prior: Transaction,
) -> Result<TransferOutcome, AppError> {
    if !card_registry::owns(store, command.from_card_id, command.account_id).await? {
        return Err(AppError::NotOwner(command.from_card_id));
    }

    let recorded_to = prior.to_card_id;
    let recorded_number = store
        .get_card_including_removed(recorded_to)
        .await?
        .map(|card| card.card_number);
    if recorded_number.as_deref() != Some(command.to_card_number.trim()) {
        return Err(key_reused());
    }
    replay(prior, recorded_to, command.amount_cents)
}

fn key_reused() -> AppError {
    AppError::InvalidRequest(
        "Idempotency key was already used for a different transfer".to_string(),
    )
}

fn validate_key(key: String) -> Result<String, AppError> {
    let key = key.trim().to_string();
    if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(AppError::InvalidRequest(format!(
            "Idempotency key must be 1 to {MAX_IDEMPOTENCY_KEY_LEN} characters"
        )));
    }
    Ok(key)
}

fn generate_key() -> String {
    format!("auto-{}", hex::encode(rand::random::<[u8; 16]>()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transaction(to_card_id: i64, amount_cents: i64) -> Transaction {
        Transaction {
            id: 1,
            from_card_id: 1,
            to_card_id,
            amount_cents,
            idempotency_key: "k".to_string(),
            transaction_time: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_replay_requires_matching_transfer() {
        let outcome = replay(transaction(2, 500), 2, 500).unwrap();
        assert!(outcome.replayed);

        assert!(matches!(
            replay(transaction(2, 500), 3, 500),
            Err(AppError::InvalidRequest(_))
        ));
        assert!(matches!(
            replay(transaction(2, 500), 2, 501),
            Err(AppError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_key_validation() {
        assert_eq!(validate_key("  abc ".to_string()).unwrap(), "abc");
        assert!(validate_key("   ".to_string()).is_err());
        assert!(validate_key("x".repeat(256)).is_err());
        assert_ne!(generate_key(), generate_key());
    }
}
