//! Messaging gateway — delivers approval requests to responsible parties.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

const SEND_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("send request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider rejected message: {0}")]
    Rejected(String),
}

/// Outbound side of the asynchronous messaging channel.
#[async_trait]
pub trait MessageGateway: Send + Sync {
    /// Deliver `body` to `channel`, returning the provider's delivery id.
    async fn send(&self, channel: &str, body: &str) -> Result<String, GatewayError>;
}

/// Strip the provider's channel prefix from a webhook sender address.
pub fn strip_channel_prefix(sender: &str) -> &str {
    sender.strip_prefix("whatsapp:").unwrap_or(sender)
}

/// Twilio WhatsApp gateway.
pub struct TwilioGateway {
    http: Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
    status_callback: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TwilioMessageResponse {
    sid: String,
}

impl TwilioGateway {
    pub fn new(
        account_sid: String,
        auth_token: String,
        from_number: String,
        status_callback: Option<String>,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            http: Client::builder().timeout(SEND_TIMEOUT).build()?,
            account_sid,
            auth_token,
            from_number,
            status_callback,
        })
    }
}

#[async_trait]
impl MessageGateway for TwilioGateway {
    async fn send(&self, channel: &str, body: &str) -> Result<String, GatewayError> {
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.account_sid
        );

        let mut form = vec![
            ("To".to_string(), format!("whatsapp:{channel}")),
            ("From".to_string(), format!("whatsapp:{}", self.from_number)),
            ("Body".to_string(), body.to_string()),
        ];
        if let Some(callback) = &self.status_callback {
            form.push(("StatusCallback".to_string(), callback.clone()));
        }

        let response = self
            .http
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected(format!("{status}: {text}")));
        }

        let parsed: TwilioMessageResponse = response.json().await?;
        tracing::info!(channel, sid = %parsed.sid, "approval request sent");
        Ok(parsed.sid)
    }
}

/// Log-only gateway for development without provider credentials.
pub struct ConsoleGateway;

#[async_trait]
impl MessageGateway for ConsoleGateway {
    async fn send(&self, channel: &str, body: &str) -> Result<String, GatewayError> {
        tracing::info!(channel, body, "console gateway: message logged, not delivered");
        Ok(format!("console-{}", uuid::Uuid::new_v4()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_channel_prefix() {
        assert_eq!(strip_channel_prefix("whatsapp:+1555"), "+1555");
        assert_eq!(strip_channel_prefix("+1555"), "+1555");
    }

    #[tokio::test]
    async fn test_console_gateway_returns_synthetic_id() {
        let sid = ConsoleGateway.send("+1555", "hello").await.unwrap();
        assert!(sid.starts_with("console-"));
    }
}
