//! HTTP mail bridge: hands the message to an external sender service.
//!
//! The bridge accepts `{to, subject, body, isHtml}` and answers
//! `{success, error}`. Anything other than `success: true` is a failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::MailTransport;
use crate::config::BridgeConfig;
use crate::error::TransportError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BridgeRequest<'a> {
    to: &'a str,
    subject: &'a str,
    body: &'a str,
    is_html: bool,
}

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Posts each message to a bridge endpoint.
pub struct BridgeMailer {
    url: String,
    client: reqwest::Client,
}

impl BridgeMailer {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            url: config.url.clone(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl MailTransport for BridgeMailer {
    fn name(&self) -> &str {
        "bridge"
    }

    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<(), TransportError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&BridgeRequest {
                to: recipient,
                subject,
                body: html_body,
                is_html: true,
            })
            .send()
            .await
            .map_err(|e| TransportError::SendFailed {
                transport: "bridge".into(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();

        match serde_json::from_str::<BridgeResponse>(&text) {
            Ok(BridgeResponse { success: true, .. }) if status.is_success() => {
                tracing::debug!(to = %recipient, "Bridge accepted message");
                Ok(())
            }
            Ok(BridgeResponse { error, .. }) => Err(TransportError::Rejected {
                transport: "bridge".into(),
                reason: error.unwrap_or_else(|| format!("HTTP {status}")),
            }),
            Err(_) => Err(TransportError::Rejected {
                transport: "bridge".into(),
                reason: format!("HTTP {status}: unexpected response body"),
            }),
        }
    }
}
