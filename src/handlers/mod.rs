//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, auth context)
//! 2. Calls into a service
//! 3. Returns HTTP response (JSON, status code)

/// Account management endpoints
pub mod accounts;

/// Registration, login and logout
pub mod auth;

/// Card registry endpoints
pub mod cards;

/// Health check endpoint
pub mod health;

/// Default card, password change and recovery
pub mod settings;

/// Transfer and transaction history endpoints
pub mod transactions;
