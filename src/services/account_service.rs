//! Account lifecycle, login sessions and account settings.
//!
//! An account may only read or change itself; addressing another id fails
//! with `Forbidden`.

use chrono::{DateTime, Utc};

use crate::{
    error::AppError,
    models::account::{
        Account, AccountResponse, ChangePasswordRequest, CreateAccountRequest, NewAccount,
        UpdateAccountRequest,
    },
    services::{
        card_registry,
        credentials::{self, PasswordHasher},
    },
    store::Store,
};

/// A freshly issued login session.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    /// Bearer token handed to the client once
    pub token: String,
    pub account_id: i64,
    pub expires_at: DateTime<Utc>,
}

pub async fn register(
    store: &dyn Store,
    hasher: &dyn PasswordHasher,
    request: CreateAccountRequest,
) -> Result<Account, AppError> {
    let email = normalize_email(&request.email);
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::InvalidRequest(
            "A valid email is required".to_string(),
        ));
    }
    credentials::require_password(&request.password)?;

    let birthday = request
        .birthday
        .as_deref()
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| card_registry::parse_date(raw, "birthday"))
        .transpose()?;

    let account = store
        .create_account(NewAccount {
            email,
            password_digest: hasher.hash(&request.password)?,
            first_name: request.first_name.trim().to_string(),
            last_name: request.last_name.trim().to_string(),
            birthday,
            phone_number: request.phone_number.trim().to_string(),
        })
        .await?;

    tracing::info!(account_id = account.id, "account registered");
    Ok(account)
}

/// Verify credentials and open a session.
///
/// Unknown email and wrong password are indistinguishable to the caller.
pub async fn login(
    store: &dyn Store,
    hasher: &dyn PasswordHasher,
    session_ttl: chrono::Duration,
    email: &str,
    password: &str,
) -> Result<IssuedSession, AppError> {
    let account = store
        .find_account_by_email(&normalize_email(email))
        .await?
        .filter(|account| hasher.verify(password, &account.password_digest))
        .ok_or(AppError::InvalidCredentials)?;

    let token = credentials::generate_token();
    let expires_at = Utc::now() + session_ttl;
    store
        .create_session(account.id, &credentials::hash_token(&token), expires_at)
        .await?;

    tracing::info!(account_id = account.id, "session opened");
    Ok(IssuedSession {
        token,
        account_id: account.id,
        expires_at,
    })
}

pub async fn logout(store: &dyn Store, token_hash: &str) -> Result<(), AppError> {
    store.delete_session(token_hash).await
}

/// Account behind a session token digest, if the session is still valid.
pub async fn authenticate(store: &dyn Store, token_hash: &str) -> Result<Option<i64>, AppError> {
    store.resolve_session(token_hash, Utc::now()).await
}

pub async fn get_account(
    store: &dyn Store,
    requester: i64,
    id: i64,
) -> Result<AccountResponse, AppError> {
    ensure_self(requester, id)?;
    let account = store
        .get_account(id)
        .await?
        .ok_or(AppError::NotFound("Account"))?;
    respond(store, account).await
}

pub async fn update_account(
    store: &dyn Store,
    requester: i64,
    id: i64,
    update: UpdateAccountRequest,
) -> Result<AccountResponse, AppError> {
    ensure_self(requester, id)?;
    let update = UpdateAccountRequest {
        first_name: update.first_name.trim().to_string(),
        last_name: update.last_name.trim().to_string(),
        phone_number: update.phone_number.trim().to_string(),
    };
    let account = store.update_profile(id, &update).await?;
    respond(store, account).await
}

/// Soft delete the account and revoke all of its sessions.
pub async fn delete_account(store: &dyn Store, requester: i64, id: i64) -> Result<(), AppError> {
    ensure_self(requester, id)?;
    if !store.delete_account(id).await? {
        return Err(AppError::NotFound("Account"));
    }
    store.delete_account_sessions(id).await?;
    tracing::info!(account_id = id, "account deleted");
    Ok(())
}

/// Set the default card; `0` clears it.
pub async fn set_default_card(
    store: &dyn Store,
    account_id: i64,
    card_id: i64,
) -> Result<(), AppError> {
    let card_id = match card_id {
        0 => None,
        id => {
            if !card_registry::owns(store, id, account_id).await? {
                return Err(AppError::NotOwner(id));
            }
            Some(id)
        }
    };
    store.set_default_card(account_id, card_id).await
}

pub async fn change_password(
    store: &dyn Store,
    hasher: &dyn PasswordHasher,
    requester: i64,
    id: i64,
    request: ChangePasswordRequest,
) -> Result<(), AppError> {
    ensure_self(requester, id)?;
    credentials::require_password(&request.new_password)?;
    if request.new_password == request.current_password {
        return Err(AppError::InvalidRequest(
            "New password must differ from the current one".to_string(),
        ));
    }

    let account = store
        .get_account(id)
        .await?
        .ok_or(AppError::NotFound("Account"))?;
    if !hasher.verify(&request.current_password, &account.password_digest) {
        return Err(AppError::InvalidCredentials);
    }

    store
        .update_password_digest(id, &hasher.hash(&request.new_password)?)
        .await?;
    tracing::info!(account_id = id, "password changed");
    Ok(())
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn ensure_self(requester: i64, id: i64) -> Result<(), AppError> {
    if requester != id {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

async fn respond(store: &dyn Store, account: Account) -> Result<AccountResponse, AppError> {
    let cards = store.list_cards(account.id).await?;
    Ok(AccountResponse::new(
        account,
        cards.into_iter().map(Into::into).collect(),
    ))
}
