//! Operator notification: one SMS per newly discovered offer.

use async_trait::async_trait;
use flatwatch_core::Offer;
use thiserror::Error;
use tracing::info;

pub const CRATE_NAME: &str = "flatwatch-notify";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("notification rejected: status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("missing {0} in environment")]
    MissingCredential(&'static str),
}

/// Render the operator-facing alert body for one offer.
pub fn message_body(offer: &Offer) -> String {
    format!("New offer \"{}\" {}", offer.title, offer.url)
}

/// Best-effort delivery of a single offer alert. Returns the transport's
/// delivery identifier. Failures never affect pipeline state.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, offer: &Offer) -> Result<String, NotifyError>;
}

/// Twilio credentials and phone numbers, read once at startup and handed to
/// the notifier; never process-wide globals.
#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub to_number: String,
}

impl TwilioConfig {
    pub fn from_env() -> Result<Self, NotifyError> {
        fn required(name: &'static str) -> Result<String, NotifyError> {
            std::env::var(name).map_err(|_| NotifyError::MissingCredential(name))
        }

        Ok(Self {
            account_sid: required("TWILIO_ACCOUNT_SID")?,
            auth_token: required("TWILIO_AUTH_TOKEN")?,
            from_number: required("TWILIO_FROM_NUMBER")?,
            to_number: required("TWILIO_TO_NUMBER")?,
        })
    }
}

/// SMS transport backed by the Twilio Messages API.
pub struct SmsNotifier {
    http: reqwest::Client,
    config: TwilioConfig,
}

impl SmsNotifier {
    pub fn new(http: reqwest::Client, config: TwilioConfig) -> Self {
        Self { http, config }
    }

    fn messages_url(&self) -> String {
        format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.config.account_sid
        )
    }
}

#[async_trait]
impl Notifier for SmsNotifier {
    async fn notify(&self, offer: &Offer) -> Result<String, NotifyError> {
        let body = message_body(offer);
        let response = self
            .http
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[
                ("To", self.config.to_number.as_str()),
                ("From", self.config.from_number.as_str()),
                ("Body", body.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }

        let sid = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|v| v.get("sid").and_then(|s| s.as_str()).map(str::to_string))
            .unwrap_or_default();
        info!(url = %offer.url, sid = %sid, "sent offer notification");
        Ok(sid)
    }
}

/// Dry-run transport used when SMS dispatch is disabled; logs the alert
/// instead of sending it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, offer: &Offer) -> Result<String, NotifyError> {
        info!(url = %offer.url, "{}", message_body(offer));
        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_body_quotes_title_and_appends_url() {
        let offer = Offer::new("Flat 1", "https://x/1");
        assert_eq!(message_body(&offer), "New offer \"Flat 1\" https://x/1");
    }

    #[test]
    fn messages_url_embeds_the_account_sid() {
        let notifier = SmsNotifier::new(
            reqwest::Client::new(),
            TwilioConfig {
                account_sid: "AC123".into(),
                auth_token: "token".into(),
                from_number: "+15550001111".into(),
                to_number: "+48555000111".into(),
            },
        );
        assert_eq!(
            notifier.messages_url(),
            "https://api.twilio.com/2010-04-01/Accounts/AC123/Messages.json"
        );
    }

    #[tokio::test]
    async fn log_notifier_always_succeeds() {
        let offer = Offer::new("Flat 1", "https://x/1");
        assert!(LogNotifier.notify(&offer).await.is_ok());
    }
}
