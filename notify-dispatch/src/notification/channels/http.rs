//! HTTP mail API channel.
//!
//! Posts the composed message as JSON to a transactional mail API. The
//! payload shape is the common denominator of such APIs; a small relay is
//! usually enough to adapt it to a specific provider.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{NotificationChannel, OutgoingMail, load_attachments};
use crate::{Error, Result};

/// Request timeout used when none is configured.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// HTTP mail channel configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpMailConfig {
    pub enabled: bool,
    /// Endpoint receiving the JSON payload.
    pub url: String,
    /// Sender address.
    pub from_address: String,
    /// API key of the mail provider.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Header carrying `api_key` as is. When unset the key is sent as
    /// `Authorization: Bearer <key>`.
    #[serde(default)]
    pub api_key_header: Option<String>,
    /// Request timeout in seconds, `None` for the default.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// HTTP mail API channel.
pub struct HttpMailChannel {
    config: HttpMailConfig,
    client: Client,
    headers: HeaderMap,
}

impl HttpMailChannel {
    /// Create a new HTTP mail channel.
    ///
    /// Fails with a configuration error when the API key cannot be sent as
    /// a header.
    pub fn new(config: HttpMailConfig) -> Result<Self> {
        let timeout = config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()
            .map_err(|e| Error::config(format!("cannot build HTTP client: {}", e)))?;
        let headers = auth_headers(&config)?;

        Ok(Self {
            config,
            client,
            headers,
        })
    }

    /// Build the JSON payload.
    async fn build_payload(&self, mail: &OutgoingMail) -> Result<Value> {
        let attachments: Vec<Value> = load_attachments(mail)
            .await?
            .into_iter()
            .map(|(attachment, bytes)| {
                json!({
                    "filename": attachment.display_name,
                    "content_type": attachment.mime_type,
                    "content": BASE64.encode(bytes),
                })
            })
            .collect();

        Ok(json!({
            "from": self.config.from_address,
            "to": mail.to,
            "reply_to": mail.reply_to,
            "subject": mail.subject,
            "html": mail.body,
            "attachments": attachments,
        }))
    }
}

fn auth_headers(config: &HttpMailConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let Some(key) = config.api_key.as_deref().filter(|k| !k.is_empty()) else {
        return Ok(headers);
    };

    let (name, value) = match config.api_key_header.as_deref() {
        Some(name) => (
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| Error::config(format!("invalid API key header name '{}'", name)))?,
            key.to_string(),
        ),
        None => (AUTHORIZATION, format!("Bearer {}", key)),
    };
    let mut value = HeaderValue::from_str(&value)
        .map_err(|_| Error::config("API key is not a valid header value"))?;
    value.set_sensitive(true);
    headers.insert(name, value);
    Ok(headers)
}

#[async_trait]
impl NotificationChannel for HttpMailChannel {
    fn channel_type(&self) -> &'static str {
        "http"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled && !self.config.url.is_empty()
    }

    async fn send(&self, mail: &OutgoingMail) -> Result<()> {
        if !self.is_enabled() {
            return Err(Error::transport("HTTP mail channel is disabled"));
        }

        let payload = self.build_payload(mail).await?;

        let response = self
            .client
            .post(&self.config.url)
            .headers(self.headers.clone())
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::transport(format!("mail API request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("Mail API rejected message: {} - {}", status, body);
            return Err(Error::transport(format!(
                "mail API rejected message: {} - {}",
                status, body
            )));
        }

        debug!(recipients = mail.to.len(), "Mail handed to HTTP API");
        Ok(())
    }
}
