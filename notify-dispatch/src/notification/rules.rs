//! Threshold rules.
//!
//! Rules come from configuration entries named
//! `<PREFIX>_<code>_THRESHOLD_HIGHER_<amount>` whose value is the recipient
//! expression. A [`RuleSet`] is an immutable, typed snapshot of those
//! entries; the engine never reads configuration while dispatching.

use std::collections::{BTreeMap, HashMap, HashSet};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::events::NotificationEvent;
use crate::database::repositories::{ActionTriggerRepository, ConfigRepository};
use crate::{Error, Result};

/// Default configuration key prefix for fixed-address rules.
pub const DEFAULT_RULE_PREFIX: &str = "NOTIFICATION_FIXEDEMAIL";

const THRESHOLD_MARKER: &str = "_THRESHOLD_HIGHER_";

/// A raw configuration key/value pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub name: String,
    pub value: String,
}

impl ConfigEntry {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Collect process environment variables whose name starts with `prefix`.
    pub fn from_env_vars(prefix: &str) -> Vec<Self> {
        Self::from_vars(prefix, std::env::vars())
    }

    /// Keep the `(name, value)` pairs whose name starts with `prefix`.
    pub fn from_vars<I>(prefix: &str, vars: I) -> Vec<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        vars.into_iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, value)| Self { name, value })
            .collect()
    }
}

/// A configured (code, threshold, recipients) triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    /// Full configuration key the rule was derived from.
    pub key: String,
    pub code: String,
    pub threshold: f64,
    /// Raw recipient expression, may contain placeholders.
    pub recipient_expression: String,
    /// Action trigger id recorded in the delivery log, when known.
    pub rule_id: Option<i64>,
}

impl ThresholdRule {
    /// Whether `event` crosses this rule's threshold.
    ///
    /// The comparison is strict; an event without an amount never matches.
    pub fn matches(&self, event: &NotificationEvent) -> bool {
        if event.code != self.code {
            return false;
        }
        event
            .object
            .threshold_amount()
            .is_some_and(|total| total > self.threshold)
    }
}

/// One parsed configuration entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RuleEntry {
    Valid(ThresholdRule),
    /// The key names a code but its threshold cannot be parsed.
    Malformed {
        key: String,
        code: String,
        reason: String,
    },
}

impl RuleEntry {
    pub fn key(&self) -> &str {
        match self {
            Self::Valid(rule) => &rule.key,
            Self::Malformed { key, .. } => key,
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::Valid(rule) => &rule.code,
            Self::Malformed { code, .. } => code,
        }
    }
}

/// Immutable snapshot of all threshold rules, in lexical key order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    entries: Vec<RuleEntry>,
}

impl RuleSet {
    /// Build a rule set from raw configuration entries.
    ///
    /// Entries that do not follow the naming pattern or have an empty value
    /// are ignored. `rule_ids` maps action codes to their trigger id.
    pub fn from_entries<I>(
        prefix: &str,
        entries: I,
        rule_ids: &HashMap<String, i64>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = ConfigEntry>,
    {
        let pattern = key_pattern(prefix)?;
        let mut by_key: BTreeMap<String, RuleEntry> = BTreeMap::new();

        for entry in entries {
            if entry.value.trim().is_empty() {
                continue;
            }
            let Some(caps) = pattern.captures(&entry.name) else {
                continue;
            };
            let code = caps["code"].to_string();
            let amount = &caps["amount"];

            let parsed = match parse_threshold(amount) {
                Some(threshold) => RuleEntry::Valid(ThresholdRule {
                    rule_id: rule_ids.get(&code).copied(),
                    key: entry.name.clone(),
                    code,
                    threshold,
                    recipient_expression: entry.value,
                }),
                None => {
                    warn!(key = %entry.name, "Threshold rule has a malformed amount");
                    RuleEntry::Malformed {
                        key: entry.name.clone(),
                        code,
                        reason: format!("threshold '{}' is not a number", amount),
                    }
                }
            };
            by_key.insert(entry.name, parsed);
        }

        Ok(Self {
            entries: by_key.into_values().collect(),
        })
    }

    /// Load rules for `entity` from the configuration tables.
    pub async fn load(
        config_repo: &dyn ConfigRepository,
        trigger_repo: &dyn ActionTriggerRepository,
        prefix: &str,
        entity: i64,
    ) -> Result<Self> {
        let entries = config_repo.list_by_prefix(prefix, entity).await?;
        let set = Self::resolve(trigger_repo, prefix, entries).await?;
        debug!(rules = set.len(), entity, "Loaded threshold rules");
        Ok(set)
    }

    /// Build rules from entries obtained elsewhere (e.g. the process
    /// environment), resolving rule ids through `trigger_repo`.
    pub async fn resolve(
        trigger_repo: &dyn ActionTriggerRepository,
        prefix: &str,
        entries: Vec<ConfigEntry>,
    ) -> Result<Self> {
        let pattern = key_pattern(prefix)?;
        let codes: HashSet<String> = entries
            .iter()
            .filter_map(|e| pattern.captures(&e.name).map(|c| c["code"].to_string()))
            .collect();

        let mut rule_ids = HashMap::new();
        for code in codes {
            match trigger_repo.get_id_by_code(&code).await? {
                Some(id) => {
                    rule_ids.insert(code, id);
                }
                None => debug!(code = %code, "No action trigger registered for code"),
            }
        }

        Self::from_entries(prefix, entries, &rule_ids)
    }

    /// Entries configured for `code`, in discovery order.
    pub fn for_code<'a>(&'a self, code: &'a str) -> impl Iterator<Item = &'a RuleEntry> + 'a {
        self.entries.iter().filter(move |e| e.code() == code)
    }

    pub fn entries(&self) -> &[RuleEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn key_pattern(prefix: &str) -> Result<Regex> {
    let pattern = format!(
        "^{}_(?P<code>.+){}(?P<amount>.*)$",
        regex::escape(prefix),
        THRESHOLD_MARKER
    );
    Regex::new(&pattern)
        .map_err(|e| Error::config(format!("invalid rule prefix '{}': {}", prefix, e)))
}

fn parse_threshold(amount: &str) -> Option<f64> {
    amount
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}
