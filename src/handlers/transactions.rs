//! Transaction HTTP handlers.
//!
//! This module implements transaction-related API endpoints:
//! - POST /api/transaction - Transfer money to another card
//! - GET /api/transaction/{cardId} - List a card's transactions

use crate::{
    app::AppState,
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        money,
        transaction::{
            Direction, TransactionQuery, TransactionResponse, TransferRequest, TransferResponse,
        },
    },
    services::{
        query_service,
        transfer_engine::{self, TransferCommand},
    },
};
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::HeaderMap,
};

const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Transfer money from one of the caller's cards.
///
/// # Request Body
///
/// ```json
/// {
///   "fromCardID": 12,
///   "toCardNumber": "4000",
///   "transactionAmount": "150.00",
///   "idempotencyKey": "checkout-7781"
/// }
/// ```
///
/// The key may also be sent as an `Idempotency-Key` header; the body wins
/// when both are present.
///
/// # Response (200)
///
/// ```json
/// {
///   "message": "Transaction successful",
///   "transaction": { "id": 41, "transactionAmount": "150.00", ... },
///   "replayed": false
/// }
/// ```
pub async fn create_transfer(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
    Json(request): Json<TransferRequest>,
) -> Result<Json<TransferResponse>, AppError> {
    let idempotency_key = request.idempotency_key.or_else(|| {
        headers
            .get(IDEMPOTENCY_KEY_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string)
    });

    let outcome = transfer_engine::execute_transfer(
        state.store.as_ref(),
        &state.policy,
        TransferCommand {
            account_id: auth.account_id,
            from_card_id: request.from_card_id,
            to_card_number: request.to_card_number,
            amount_cents: money::to_cents(request.transaction_amount)?,
            idempotency_key,
        },
    )
    .await?;

    let message = if outcome.replayed {
        "Transaction already processed"
    } else {
        "Transaction successful"
    };

    Ok(Json(TransferResponse {
        message: message.to_string(),
        transaction: outcome.transaction.into(),
        replayed: outcome.replayed,
    }))
}

/// List transactions of one of the caller's cards, oldest first.
///
/// # Query Parameters
///
/// - `type`: `incoming`, `outgoing` or `all` (default)
pub async fn list_transactions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(card_id): Path<i64>,
    Query(query): Query<TransactionQuery>,
) -> Result<Json<Vec<TransactionResponse>>, AppError> {
    let direction = Direction::from_query(query.direction.as_deref());
    let transactions =
        query_service::list_transactions(state.store.as_ref(), auth.account_id, card_id, direction)
            .await?;
    Ok(Json(transactions.into_iter().map(Into::into).collect()))
}
