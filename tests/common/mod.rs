#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use card_ledger::{
    app::{self, AppState},
    config::{Config, LedgerPolicy},
    error::AppError,
    models::{account::NewAccount, card::NewCard},
    services::{credentials::PasswordHasher, mailer::Mailer},
    store::{AccountStore, CardStore, MemoryStore},
};

/// Cheap reversible digest; argon2 is far too slow for test loops.
pub struct PlainHasher;

impl PasswordHasher for PlainHasher {
    fn hash(&self, password: &str) -> Result<String, AppError> {
        Ok(format!("plain:{password}"))
    }

    fn verify(&self, password: &str, digest: &str) -> bool {
        digest == format!("plain:{password}")
    }
}

/// Keeps every recovery link instead of mailing it.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl RecordingMailer {
    pub fn last_token(&self) -> Option<String> {
        let sent = self.sent.lock().unwrap();
        sent.last()
            .and_then(|(_, link)| link.rsplit('/').next().map(str::to_string))
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_password_reset(&self, email: &str, link: &str) -> Result<(), AppError> {
        self.sent
            .lock()
            .unwrap()
            .push((email.to_string(), link.to_string()));
        Ok(())
    }
}

pub fn test_config() -> Config {
    Config {
        database_url: "postgres://unused".to_string(),
        ..Config::default()
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: MemoryStore,
    pub mailer: Arc<RecordingMailer>,
}

pub fn test_app() -> TestApp {
    let store = MemoryStore::new();
    let mailer = Arc::new(RecordingMailer::default());
    let state = AppState::new(
        Arc::new(store.clone()),
        Arc::new(PlainHasher),
        mailer.clone(),
        test_config(),
    )
    .unwrap();
    TestApp {
        router: app::router(state),
        store,
        mailer,
    }
}

pub fn policy() -> LedgerPolicy {
    LedgerPolicy::default()
}

pub async fn account(store: &MemoryStore, email: &str) -> i64 {
    store
        .create_account(NewAccount {
            email: email.to_string(),
            password_digest: "plain:secret".to_string(),
            first_name: "Test".to_string(),
            last_name: "User".to_string(),
            birthday: None,
            phone_number: "0100".to_string(),
        })
        .await
        .unwrap()
        .id
}

/// Insert a card directly with the given balance in cents.
pub async fn card(store: &MemoryStore, account_id: i64, number: &str, balance_cents: i64) -> i64 {
    store
        .insert_card(
            NewCard {
                account_id,
                card_number: number.to_string(),
                balance_cents,
                card_type: "debit".to_string(),
                expire_date: None,
            },
            policy().max_cards_per_account,
        )
        .await
        .unwrap()
        .id
}

pub async fn balance(store: &MemoryStore, card_id: i64) -> i64 {
    store.get_card(card_id).await.unwrap().unwrap().balance_cents
}
