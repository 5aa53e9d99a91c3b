//! SMS delivery through Twilio's Messages API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{ContactSender, NotificationPayload, truncate_string};
use crate::config::env_string;
use crate::domain::Channel;
use crate::utils::http_client::build_client;
use crate::{Error, Result};

pub const DEFAULT_API_BASE: &str = "https://api.twilio.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Concatenated SMS stays readable up to roughly this many characters.
const MAX_BODY_CHARS: usize = 640;

#[derive(Clone)]
pub struct SmsConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub api_base: String,
}

impl std::fmt::Debug for SmsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmsConfig")
            .field("account_sid", &self.account_sid)
            .field("from_number", &self.from_number)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl SmsConfig {
    pub fn new(
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
        from_number: impl Into<String>,
    ) -> Self {
        Self {
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            from_number: from_number.into(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    /// `Ok(None)` when no Twilio variable is set.
    pub fn from_env() -> Result<Option<Self>> {
        let sid = env_string("TWILIO_ACCOUNT_SID");
        let token = env_string("TWILIO_AUTH_TOKEN");
        let from = env_string("TWILIO_FROM_NUMBER");
        match (sid, token, from) {
            (None, None, None) => Ok(None),
            (Some(sid), Some(token), Some(from)) => {
                let mut config = Self::new(sid, token, from);
                if let Some(base) = env_string("TWILIO_API_BASE") {
                    config.api_base = base;
                }
                Ok(Some(config))
            }
            _ => Err(Error::config(
                "TWILIO_ACCOUNT_SID, TWILIO_AUTH_TOKEN and TWILIO_FROM_NUMBER must all be set",
            )),
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base.trim_end_matches('/'),
            self.account_sid
        )
    }
}

#[derive(Debug, Deserialize)]
struct TwilioError {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

pub struct SmsSender {
    config: SmsConfig,
    client: reqwest::Client,
}

/// Text message body: title and body on separate lines, capped.
fn sms_body(payload: &NotificationPayload) -> String {
    let text = if payload.body.is_empty() {
        payload.title.clone()
    } else {
        format!("{}\n{}", payload.title, payload.body)
    };
    truncate_string(&text, MAX_BODY_CHARS)
}

impl SmsSender {
    pub fn new(config: SmsConfig) -> Result<Self> {
        Ok(Self {
            config,
            client: build_client(REQUEST_TIMEOUT)?,
        })
    }
}

#[async_trait]
impl ContactSender for SmsSender {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn send(&self, address: &str, payload: &NotificationPayload) -> Result<()> {
        let body = sms_body(payload);
        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("To", address)
            .append_pair("From", &self.config.from_number)
            .append_pair("Body", &body)
            .finish();

        let response = self
            .client
            .post(self.config.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(form)
            .send()
            .await
            .map_err(|e| Error::transport(format!("Twilio request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        let detail = match serde_json::from_str::<TwilioError>(&text) {
            Ok(err) => format!(
                "code {} {}",
                err.code.unwrap_or_default(),
                err.message.unwrap_or_default()
            ),
            Err(_) => truncate_string(&text, 200),
        };
        Err(Error::transport(format!(
            "Twilio returned {}: {}",
            status, detail
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_url() {
        let mut config = SmsConfig::new("AC123", "secret", "+15550001111");
        assert_eq!(
            config.messages_url(),
            "https://api.twilio.com/2010-04-01/Accounts/AC123/Messages.json"
        );
        config.api_base = "http://127.0.0.1:9999/".to_string();
        assert_eq!(
            config.messages_url(),
            "http://127.0.0.1:9999/2010-04-01/Accounts/AC123/Messages.json"
        );
    }

    #[test]
    fn test_sms_body_joins_and_caps() {
        let payload = NotificationPayload::new("Game day", "Bring water");
        assert_eq!(sms_body(&payload), "Game day\nBring water");

        let long = NotificationPayload::new("t", "x".repeat(2000));
        assert_eq!(sms_body(&long).chars().count(), MAX_BODY_CHARS + 1);
    }
}
