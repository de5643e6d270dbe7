//! SMTP transport via lettre.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;

use super::MailTransport;
use crate::config::SmtpConfig;
use crate::error::TransportError;

/// Sends HTML mail through an authenticated SMTP relay.
pub struct SmtpMailer {
    transport: SmtpTransport,
    from: Mailbox,
}

/// Per-operation socket timeout for a dialogue bounded by `send_timeout`.
///
/// The blocking send cannot be cancelled, so each SMTP step must give up well
/// inside the caller's deadline. Otherwise a send abandoned by the caller can
/// still be delivered.
fn socket_timeout(send_timeout: Duration) -> Duration {
    (send_timeout / 4).max(Duration::from_secs(1)).min(send_timeout)
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig, send_timeout: Duration) -> Result<Self, TransportError> {
        let from = parse_mailbox(&config.from_address)?;

        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );

        let transport = SmtpTransport::relay(&config.host)
            .map_err(|e| TransportError::Build(format!("SMTP relay error: {e}")))?
            .port(config.port)
            .credentials(creds)
            .timeout(Some(socket_timeout(send_timeout)))
            .build();

        Ok(Self { transport, from })
    }

    fn build_message(
        &self,
        recipient: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<Message, TransportError> {
        Message::builder()
            .from(self.from.clone())
            .to(parse_mailbox(recipient)?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html_body.to_string())
            .map_err(|e| TransportError::Build(e.to_string()))
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, TransportError> {
    address.parse().map_err(|e: lettre::address::AddressError| {
        TransportError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        }
    })
}

#[async_trait]
impl MailTransport for SmtpMailer {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<(), TransportError> {
        let email = self.build_message(recipient, subject, html_body)?;
        let transport = self.transport.clone();

        // lettre's SmtpTransport is blocking.
        tokio::task::spawn_blocking(move || transport.send(&email))
            .await
            .map_err(|e| TransportError::SendFailed {
                transport: "smtp".into(),
                reason: format!("send task failed: {e}"),
            })?
            .map_err(|e| TransportError::SendFailed {
                transport: "smtp".into(),
                reason: e.to_string(),
            })?;

        tracing::debug!(to = %recipient, "SMTP message accepted");
        Ok(())
    }
}
