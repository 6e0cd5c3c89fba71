//! Card HTTP handlers.
//!
//! - POST /api/cards - Add a card to the caller's account
//! - GET /api/cards - List the caller's cards
//! - GET /api/cards/{id} - Get one of the caller's cards
//! - DELETE /api/cards/{id} - Remove one of the caller's cards

use crate::{
    app::AppState,
    error::AppError,
    middleware::auth::AuthContext,
    models::card::{AddCardRequest, CardResponse},
    services::card_registry,
};
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};

/// Add a card.
///
/// # Request Body
///
/// ```json
/// {
///   "cardNumber": "4000123412341234",
///   "cardBalance": "500.00",
///   "cardType": "debit",
///   "cardExpireDate": "2029-08-31"
/// }
/// ```
///
/// # Errors
///
/// - 400 when the account already has the maximum number of cards
/// - 400 when the card number is taken
pub async fn add_card(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<AddCardRequest>,
) -> Result<(StatusCode, Json<CardResponse>), AppError> {
    let card =
        card_registry::add_card(state.store.as_ref(), &state.policy, auth.account_id, request)
            .await?;
    Ok((StatusCode::CREATED, Json(card.into())))
}

pub async fn list_cards(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<CardResponse>>, AppError> {
    let cards = state.store.list_cards(auth.account_id).await?;
    Ok(Json(cards.into_iter().map(Into::into).collect()))
}

/// Get a card. Someone else's card looks exactly like a missing one.
pub async fn get_card(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<i64>,
) -> Result<Json<CardResponse>, AppError> {
    let card = card_registry::owned_card(state.store.as_ref(), id, auth.account_id).await?;
    Ok(Json(card.into()))
}

/// Remove a card.
///
/// Clears the account's default card if it pointed here. Past transactions
/// keep referring to the removed card.
pub async fn delete_card(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    if !card_registry::owns(state.store.as_ref(), id, auth.account_id).await? {
        return Err(AppError::NotOwner(id));
    }
    card_registry::remove_card(state.store.as_ref(), &state.policy, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
