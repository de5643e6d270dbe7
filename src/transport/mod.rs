//! Outbound mail transports.

pub mod bridge;
pub mod smtp;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::TransportConfig;
use crate::error::TransportError;

pub use bridge::BridgeMailer;
pub use smtp::SmtpMailer;

/// Sends one rendered email. Any error is a failed attempt.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Short name used in logs and error messages.
    fn name(&self) -> &str;

    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<(), TransportError>;
}

/// Build the transport selected by configuration. `send_timeout` is the
/// deadline callers put on each send.
pub fn build_transport(
    config: &TransportConfig,
    send_timeout: Duration,
) -> Result<Arc<dyn MailTransport>, TransportError> {
    match config {
        TransportConfig::Smtp(smtp) => {
            let mailer = SmtpMailer::new(smtp, send_timeout)?;
            tracing::info!(host = %smtp.host, port = smtp.port, "Using SMTP transport");
            Ok(Arc::new(mailer))
        }
        TransportConfig::Bridge(bridge) => {
            tracing::info!(url = %bridge.url, "Using HTTP bridge transport");
            Ok(Arc::new(BridgeMailer::new(bridge)))
        }
    }
}
