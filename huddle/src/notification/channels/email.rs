//! SMTP email delivery.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{ContactSender, NotificationPayload};
use crate::config::{env_parse, env_string};
use crate::domain::Channel;
use crate::{Error, Result};

const DEFAULT_SMTP_PORT: u16 = 587;

#[derive(Clone)]
pub struct EmailConfig {
    pub host: String,
    pub port: u16,
    pub from: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("from", &self.from)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl EmailConfig {
    /// `Ok(None)` when `SMTP_HOST` is unset.
    pub fn from_env() -> Result<Option<Self>> {
        let Some(host) = env_string("SMTP_HOST") else {
            return Ok(None);
        };
        let from = env_string("SMTP_FROM")
            .ok_or_else(|| Error::config("SMTP_FROM must be set when SMTP_HOST is"))?;
        Ok(Some(Self {
            host,
            port: env_parse("SMTP_PORT", DEFAULT_SMTP_PORT),
            from,
            username: env_string("SMTP_USER"),
            password: env_string("SMTP_PASSWORD"),
        }))
    }
}

pub struct EmailSender {
    from: String,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailSender {
    pub fn new(config: EmailConfig) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| Error::config(format!("Invalid SMTP relay {}: {}", config.host, e)))?
            .port(config.port);

        if let (Some(user), Some(password)) = (config.username, config.password) {
            builder = builder.credentials(Credentials::new(user, password));
        }

        // Validate the sender address once.
        config
            .from
            .parse::<lettre::message::Mailbox>()
            .map_err(|e| Error::config(format!("Invalid SMTP_FROM {}: {}", config.from, e)))?;

        Ok(Self {
            from: config.from,
            mailer: builder.build(),
        })
    }

    fn build_message(&self, address: &str, payload: &NotificationPayload) -> Result<Message> {
        let from = self
            .from
            .parse()
            .map_err(|e| Error::config(format!("Invalid sender address: {}", e)))?;
        let to = address
            .parse()
            .map_err(|e| Error::validation(format!("Invalid email address {}: {}", address, e)))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(payload.title.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(payload.body.clone())
            .map_err(|e| Error::transport(format!("Failed to build email: {}", e)))
    }
}

#[async_trait]
impl ContactSender for EmailSender {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, address: &str, payload: &NotificationPayload) -> Result<()> {
        let message = self.build_message(address, payload)?;
        self.mailer
            .send(message)
            .await
            .map_err(|e| Error::transport(format!("SMTP send failed: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> EmailSender {
        EmailSender::new(EmailConfig {
            host: "smtp.example.com".to_string(),
            port: 2525,
            from: "Huddle <noreply@example.com>".to_string(),
            username: None,
            password: None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_build_message_sets_subject_and_body() {
        let payload = NotificationPayload::new("Practice moved", "Now at 6pm");
        let message = sender()
            .build_message("parent@example.com", &payload)
            .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: Practice moved"));
        assert!(raw.contains("To: parent@example.com"));
        assert!(raw.contains("Now at 6pm"));
    }

    #[tokio::test]
    async fn test_invalid_recipient_is_validation_error() {
        let payload = NotificationPayload::new("t", "b");
        let err = sender().build_message("not-an-address", &payload).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
