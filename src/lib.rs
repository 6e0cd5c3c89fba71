//! Card ledger service.
//!
//! Accounts own up to a configured number of cards; money moves between
//! cards through the transfer engine, which keeps every balance non-negative
//! under concurrent transfers and records each move as an immutable
//! transaction.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx, or the in-memory store for tests
//! - **Authentication**: login sessions, tokens stored as SHA-256 digests
//! - **Format**: JSON requests/responses, money as decimal strings

pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;
