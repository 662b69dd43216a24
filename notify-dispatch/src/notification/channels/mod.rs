//! Notification channels.
//!
//! This module provides the transports a composed notification can be
//! delivered through:
//! - HTTP mail APIs (JSON POST)
//! - Email (SMTP), behind the `smtp` feature

#[cfg(feature = "smtp")]
mod email;
mod http;

#[cfg(feature = "smtp")]
pub use email::{EmailChannel, EmailConfig};
pub use http::{HttpMailChannel, HttpMailConfig};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::attachment::Attachment;
use super::recipient::Recipient;
use crate::Result;

/// A message ready to be handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMail {
    pub subject: String,
    pub to: Vec<Recipient>,
    pub reply_to: String,
    /// HTML body.
    pub body: String,
    pub attachments: Vec<Attachment>,
}

impl OutgoingMail {
    /// Recipients joined the way mail headers expect them.
    pub fn to_header(&self) -> String {
        self.to
            .iter()
            .map(Recipient::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Trait for notification channels.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Get the channel type name.
    fn channel_type(&self) -> &'static str;

    /// Check if the channel is enabled.
    fn is_enabled(&self) -> bool;

    /// Deliver `mail`. Any error is a transport failure for every recipient
    /// of the mail.
    async fn send(&self, mail: &OutgoingMail) -> Result<()>;
}

/// Channel configuration wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelConfig {
    /// HTTP mail API channel.
    Http(HttpMailConfig),
    /// SMTP channel.
    #[cfg(feature = "smtp")]
    Email(EmailConfig),
}

impl ChannelConfig {
    /// Get the channel type name.
    pub fn channel_type(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            #[cfg(feature = "smtp")]
            Self::Email(_) => "email",
        }
    }

    /// Build the configured channel.
    pub fn build(&self) -> Result<Arc<dyn NotificationChannel>> {
        Ok(match self {
            Self::Http(c) => Arc::new(HttpMailChannel::new(c.clone())?),
            #[cfg(feature = "smtp")]
            Self::Email(c) => Arc::new(EmailChannel::new(c.clone())?),
        })
    }
}

/// Read every attachment of `mail` from disk.
pub(crate) async fn load_attachments(mail: &OutgoingMail) -> Result<Vec<(Attachment, Vec<u8>)>> {
    let mut loaded = Vec::with_capacity(mail.attachments.len());
    for attachment in &mail.attachments {
        let bytes = tokio::fs::read(&attachment.path).await.map_err(|e| {
            crate::Error::transport(format!(
                "cannot read attachment '{}': {}",
                attachment.path.display(),
                e
            ))
        })?;
        loaded.push((attachment.clone(), bytes));
    }
    Ok(loaded)
}
