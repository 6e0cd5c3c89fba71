//! Business logic services.
//!
//! Services contain the business rules, separated from HTTP handlers. They
//! reach storage only through the `Store` ports, so the same code runs
//! against PostgreSQL and the in-memory backend.

pub mod account_service;
pub mod card_registry;
pub mod credentials;
pub mod mailer;
pub mod password_reset;
pub mod query_service;
pub mod transfer_engine;
