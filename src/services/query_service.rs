//! Read-only views over committed transactions.

use crate::{
    error::AppError,
    models::transaction::{Direction, Transaction},
    services::card_registry,
    store::Store,
};

/// Transactions of one of the caller's cards, in commit order.
///
/// A fresh call re-reads current state; nothing is cached or paged.
pub async fn list_transactions(
    store: &dyn Store,
    account_id: i64,
    card_id: i64,
    direction: Direction,
) -> Result<Vec<Transaction>, AppError> {
    if !card_registry::owns(store, card_id, account_id).await? {
        return Err(AppError::NotOwner(card_id));
    }
    store.list_transactions(card_id, direction).await
}
