//! Data models representing database entities.
//!
//! This module contains the records held by the ledger store and the
//! request/response types exchanged over HTTP.

/// Account (card owner) model
pub mod account;
/// Payment card model
pub mod card;
/// Password reset tokens and sessions
pub mod credential;
/// Minor-unit money conversion
pub mod money;
/// Immutable transfer record model
pub mod transaction;
