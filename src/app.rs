//! Shared application state and the HTTP router.

use std::sync::Arc;

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    config::{Config, ConfigError, LedgerPolicy},
    handlers, middleware,
    services::{credentials::PasswordHasher, mailer::Mailer},
    store::Store,
};

/// State shared by every handler via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub hasher: Arc<dyn PasswordHasher>,
    pub mailer: Arc<dyn Mailer>,
    pub config: Arc<Config>,
    pub policy: LedgerPolicy,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        hasher: Arc<dyn PasswordHasher>,
        mailer: Arc<dyn Mailer>,
        config: Config,
    ) -> Result<Self, ConfigError> {
        let policy = config.ledger_policy()?;
        Ok(Self {
            store,
            hasher,
            mailer,
            config: Arc::new(config),
            policy,
        })
    }
}

/// Build the full router: public routes, session-protected `/api` routes,
/// request tracing and CORS.
pub fn router(state: AppState) -> Router {
    let authenticated_routes = Router::new()
        .route("/api/logout", post(handlers::auth::logout))
        // Accounts and settings
        .route(
            "/api/accounts/{id}",
            get(handlers::accounts::get_account)
                .put(handlers::accounts::update_account)
                .delete(handlers::accounts::delete_account),
        )
        .route(
            "/api/accounts/settings/default-card/{card_id}",
            post(handlers::settings::set_default_card),
        )
        .route(
            "/api/accounts/settings/change-password/{id}",
            put(handlers::settings::change_password),
        )
        // Cards
        .route(
            "/api/cards",
            post(handlers::cards::add_card).get(handlers::cards::list_cards),
        )
        .route(
            "/api/cards/{id}",
            get(handlers::cards::get_card).delete(handlers::cards::delete_card),
        )
        // Transfers
        .route(
            "/api/transaction",
            post(handlers::transactions::create_transfer),
        )
        .route(
            "/api/transaction/{card_id}",
            get(handlers::transactions::list_transactions),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    let cors = cors_layer(&state.config.cors_allowed_origin);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/register", post(handlers::auth::register))
        .route("/login", post(handlers::auth::login))
        .route("/accounts/forgetpw", post(handlers::settings::forgot_password))
        .route(
            "/accounts/reset-password",
            post(handlers::settings::reset_password),
        )
        .merge(authenticated_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true);

    match HeaderValue::from_str(origin) {
        Ok(origin) => layer.allow_origin(origin),
        Err(_) => {
            tracing::warn!(%origin, "invalid CORS origin, cross-origin requests disabled");
            layer
        }
    }
}
