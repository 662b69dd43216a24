//! Engine configuration.
//!
//! Values come from `NOTIFY_*` environment variables (a `.env` file is
//! honoured). Threshold rules are not part of this configuration; they are
//! loaded separately into a [`RuleSet`](crate::notification::rules::RuleSet).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::i18n::DEFAULT_LOCALE;
use crate::notification::channels::ChannelConfig;
use crate::notification::events::DEFAULT_ENTITY;
use crate::notification::rules::DEFAULT_RULE_PREFIX;
use crate::utils::url::web_root;
use crate::{Error, Result};

/// Prefix of every environment variable read by [`EngineConfig::from_env`].
pub const ENV_PREFIX: &str = "NOTIFY_";

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Configuration key prefix of threshold rules.
    pub rule_prefix: String,
    /// Application name shown in the boilerplate notice.
    pub application_title: String,
    /// Organization name, used as subject prefix. Falls back to the
    /// application title when blank.
    pub organization: String,
    /// Public base URL of the application.
    pub base_url: String,
    /// Base URL override for links, e.g. when the application sits behind a proxy.
    pub forced_base_url: Option<String>,
    /// Reply-to address of outgoing mail.
    pub reply_to: String,
    /// Locale of notification text.
    pub locale: String,
    /// Upper bound of a single transport send.
    pub send_timeout_secs: u64,
    /// Run the rules of one event concurrently.
    pub concurrent_rules: bool,
    /// Root directory of generated documents.
    pub data_root: PathBuf,
    /// SQLite database URL.
    pub database_url: String,
    /// Entity whose rules are loaded.
    pub entity: i64,
    /// Transport configuration.
    pub channel: Option<ChannelConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rule_prefix: DEFAULT_RULE_PREFIX.to_string(),
            application_title: "notify-dispatch".to_string(),
            organization: String::new(),
            base_url: "http://localhost".to_string(),
            forced_base_url: None,
            reply_to: String::new(),
            locale: DEFAULT_LOCALE.to_string(),
            send_timeout_secs: 30,
            concurrent_rules: false,
            data_root: PathBuf::from("documents"),
            database_url: "sqlite:notify.db?mode=rwc".to_string(),
            entity: DEFAULT_ENTITY,
            channel: None,
        }
    }
}

impl EngineConfig {
    /// Load the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load the configuration through `lookup`, which maps a variable name to
    /// its value. Unset variables keep their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, name)).filter(|v| !v.trim().is_empty())
        };
        let mut config = Self::default();

        if let Some(v) = var("RULE_PREFIX") {
            config.rule_prefix = v;
        }
        if let Some(v) = var("APPLICATION_TITLE") {
            config.application_title = v;
        }
        if let Some(v) = var("ORGANIZATION") {
            config.organization = v;
        }
        if let Some(v) = var("BASE_URL") {
            config.base_url = v;
        }
        config.forced_base_url = var("FORCED_BASE_URL");
        if let Some(v) = var("REPLY_TO") {
            config.reply_to = v;
        }
        if let Some(v) = var("LOCALE") {
            config.locale = v;
        }
        if let Some(v) = var("SEND_TIMEOUT_SECS") {
            config.send_timeout_secs = parse_var("SEND_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("CONCURRENT_RULES") {
            config.concurrent_rules = parse_var("CONCURRENT_RULES", &v)?;
        }
        if let Some(v) = var("DATA_ROOT") {
            config.data_root = PathBuf::from(v);
        }
        if let Some(v) = var("DATABASE_URL") {
            config.database_url = v;
        }
        if let Some(v) = var("ENTITY") {
            config.entity = parse_var("ENTITY", &v)?;
        }
        if let Some(v) = var("CHANNEL") {
            config.channel = Some(serde_json::from_str(&v).map_err(|e| {
                Error::config(format!("{}CHANNEL is not a valid channel: {}", ENV_PREFIX, e))
            })?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.rule_prefix.trim().is_empty() {
            return Err(Error::config("rule prefix must not be empty"));
        }
        if self.send_timeout_secs == 0 {
            return Err(Error::config("send timeout must be at least one second"));
        }
        Ok(())
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    /// Organization shown in subjects and notices.
    pub fn organization_name(&self) -> &str {
        match self.organization.trim() {
            "" => self.application_title.trim(),
            name => name,
        }
    }

    /// Web root used in notification links.
    pub fn web_root(&self) -> String {
        web_root(&self.base_url, self.forced_base_url.as_deref())
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| {
        Error::config(format!(
            "{}{} has an invalid value '{}': {}",
            ENV_PREFIX, name, value, e
        ))
    })
}
