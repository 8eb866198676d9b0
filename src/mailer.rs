use async_trait::async_trait;
use tracing::info;

use crate::error::AppError;

/// Outbound mail boundary. Delivery itself lives outside this service.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_password_reset(&self, to: &str, link: &str) -> Result<(), AppError>;
}

/// Writes outgoing mail to the log instead of delivering it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_password_reset(&self, to: &str, link: &str) -> Result<(), AppError> {
        info!(recipient = %to, "Password reset link: {link}");
        Ok(())
    }
}
