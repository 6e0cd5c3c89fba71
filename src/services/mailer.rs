//! Outbound mail capability.

use async_trait::async_trait;

use crate::error::AppError;

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver a password recovery link to `email`.
    async fn send_password_reset(&self, email: &str, link: &str) -> Result<(), AppError>;
}

/// Writes the message to the log instead of sending it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_password_reset(&self, email: &str, link: &str) -> Result<(), AppError> {
        tracing::info!(%email, %link, "password recovery mail");
        Ok(())
    }
}
