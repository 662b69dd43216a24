//! Email notification channel using SMTP.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment as MailAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{NotificationChannel, OutgoingMail, load_attachments};
use crate::{Error, Result};

/// Email channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// Whether the channel is enabled.
    pub enabled: bool,
    /// SMTP server host.
    pub smtp_host: String,
    /// SMTP server port.
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    /// SMTP username.
    #[serde(default)]
    pub smtp_username: Option<String>,
    /// SMTP password.
    #[serde(default)]
    pub smtp_password: Option<String>,
    /// Use TLS.
    #[serde(default = "default_use_tls")]
    pub use_tls: bool,
    /// Sender email address.
    pub from_address: String,
    /// SMTP timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_use_tls() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: "localhost".to_string(),
            smtp_port: default_smtp_port(),
            smtp_username: None,
            smtp_password: None,
            use_tls: default_use_tls(),
            from_address: String::new(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Email notification channel.
pub struct EmailChannel {
    config: EmailConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailChannel {
    /// Create a new Email channel.
    pub fn new(config: EmailConfig) -> Result<Self> {
        let mut builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
                .map_err(|e| Error::config(format!("invalid SMTP relay: {}", e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        };

        builder = builder
            .port(config.smtp_port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));

        if let Some(username) = &config.smtp_username {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                config.smtp_password.clone().unwrap_or_default(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            config,
        })
    }

    /// Build the MIME message.
    async fn build_message(&self, mail: &OutgoingMail) -> Result<Message> {
        let mut builder = Message::builder()
            .from(parse_mailbox(&self.config.from_address)?)
            .subject(mail.subject.as_str());

        if !mail.reply_to.trim().is_empty() {
            builder = builder.reply_to(parse_mailbox(&mail.reply_to)?);
        }
        for recipient in &mail.to {
            builder = builder.to(parse_mailbox(recipient.as_str())?);
        }

        let mut body = MultiPart::mixed().singlepart(SinglePart::html(mail.body.clone()));
        for (attachment, bytes) in load_attachments(mail).await? {
            let content_type = match ContentType::parse(&attachment.mime_type) {
                Ok(content_type) => content_type,
                Err(_) => ContentType::parse("application/octet-stream").map_err(|e| {
                    Error::transport(format!("invalid attachment content type: {}", e))
                })?,
            };
            body = body.singlepart(
                MailAttachment::new(attachment.display_name.clone()).body(bytes, content_type),
            );
        }

        builder
            .multipart(body)
            .map_err(|e| Error::transport(format!("cannot build message: {}", e)))
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox> {
    address
        .trim()
        .parse::<Mailbox>()
        .map_err(|e| Error::transport(format!("invalid address '{}': {}", address, e)))
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn channel_type(&self) -> &'static str {
        "email"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
            && !self.config.smtp_host.is_empty()
            && !self.config.from_address.is_empty()
    }

    async fn send(&self, mail: &OutgoingMail) -> Result<()> {
        if !self.is_enabled() {
            return Err(Error::transport("email channel is disabled"));
        }

        let message = self.build_message(mail).await?;
        self.transport
            .send(message)
            .await
            .map_err(|e| Error::transport(format!("SMTP delivery failed: {}", e)))?;

        debug!(to = %mail.to_header(), "Email notification sent");
        Ok(())
    }
}
