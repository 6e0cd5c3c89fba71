//! Card registry: adding, removing and authorizing cards.
//!
//! Balances are only set here once, when a card is created. Every later
//! change goes through the transfer engine.

use chrono::NaiveDate;

use crate::{
    config::LedgerPolicy,
    error::AppError,
    models::{
        card::{AddCardRequest, Card, NewCard},
        money,
    },
    store::Store,
};

/// Add a card to an account.
///
/// # Validation
///
/// - Card number is non-empty and made of digits only
/// - Initial balance is zero or positive with at most two decimals
/// - Expiry date, if present, is `YYYY-MM-DD`
///
/// # Errors
///
/// - `LimitExceeded`: the account already owns the maximum number of cards
/// - `DuplicateCardNumber`: a live card already uses this number
pub async fn add_card(
    store: &dyn Store,
    policy: &LedgerPolicy,
    account_id: i64,
    request: AddCardRequest,
) -> Result<Card, AppError> {
    let card_number = request.card_number.trim().to_string();
    if card_number.is_empty() || !card_number.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::InvalidRequest(
            "Card number must consist of digits".to_string(),
        ));
    }

    let balance_cents = money::to_cents(request.card_balance)?;
    if balance_cents < 0 {
        return Err(AppError::InvalidRequest(
            "Initial balance cannot be negative".to_string(),
        ));
    }

    let expire_date = request
        .card_expire_date
        .as_deref()
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| parse_date(raw, "cardExpireDate"))
        .transpose()?;

    let card = store
        .insert_card(
            NewCard {
                account_id,
                card_number,
                balance_cents,
                card_type: request.card_type.trim().to_string(),
                expire_date,
            },
            policy.max_cards_per_account,
        )
        .await?;

    tracing::info!(card_id = card.id, account_id, "card added");
    Ok(card)
}

/// Soft delete a card.
///
/// Callers authorize with [`owns`] first. Whether a card that still holds
/// money may go is decided by `policy.card_removal`.
pub async fn remove_card(
    store: &dyn Store,
    policy: &LedgerPolicy,
    card_id: i64,
) -> Result<Card, AppError> {
    let removed = store
        .soft_delete_card(card_id, policy.card_removal)
        .await?
        .ok_or(AppError::NotFound("Card"))?;

    if removed.balance_cents != 0 {
        tracing::warn!(
            card_id,
            balance_cents = removed.balance_cents,
            "card removed while holding a balance"
        );
    } else {
        tracing::info!(card_id, "card removed");
    }
    Ok(removed)
}

/// Whether a live card belongs to the account.
///
/// A missing card yields `false`, which callers must treat as "deny".
pub async fn owns(store: &dyn Store, card_id: i64, account_id: i64) -> Result<bool, AppError> {
    Ok(store
        .get_card(card_id)
        .await?
        .is_some_and(|card| card.account_id == account_id))
}

/// A card of the account, or `NotOwner` when it is missing or someone else's.
pub async fn owned_card(
    store: &dyn Store,
    card_id: i64,
    account_id: i64,
) -> Result<Card, AppError> {
    store
        .get_card(card_id)
        .await?
        .filter(|card| card.account_id == account_id)
        .ok_or(AppError::NotOwner(card_id))
}

pub(crate) fn parse_date(raw: &str, field: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::InvalidRequest(format!("{field} must be formatted as YYYY-MM-DD")))
}
