//! Recipient resolution.
//!
//! A rule's recipient expression is a comma-separated list of addresses that
//! may contain the [`SUPERVISOR_PLACEHOLDER`] token. Resolution substitutes
//! the token, then normalizes the list so that empty substitutions never
//! leave blank or duplicated entries behind.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Token replaced by the acting user's supervisor.
pub const SUPERVISOR_PLACEHOLDER: &str = "__SUPERVISOREMAIL__";

/// Characters that force a display name to be quoted.
const NAME_SPECIALS: &[char] = &[',', ';', '"', '<', '>', '@', '(', ')', '\\'];

/// A single, non-empty delivery address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Recipient(String);

impl Recipient {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Recipient {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A user's supervisor, as returned by a [`SupervisorLookup`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supervisor {
    pub display_name: String,
    pub email: String,
}

impl Supervisor {
    pub fn new(display_name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            email: email.into(),
        }
    }

    /// `Name <address>`, or `<address>` when the name is blank. Names with
    /// separators or other specials are quoted.
    pub fn mailbox(&self) -> String {
        let name = self.display_name.trim();
        let email = self.email.trim();
        if name.is_empty() {
            format!("<{}>", email)
        } else if name.contains(NAME_SPECIALS) {
            let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
            format!("\"{}\" <{}>", escaped, email)
        } else {
            format!("{} <{}>", name, email)
        }
    }
}

/// Resolves the supervisor of the user who triggered an event.
#[async_trait]
pub trait SupervisorLookup: Send + Sync {
    /// Supervisor of `actor_id`, or `None` when the user has no supervisor
    /// or the supervisor has no address.
    async fn supervisor_of(&self, actor_id: i64) -> Result<Option<Supervisor>>;
}

/// Lookup used when no user directory is available.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSupervisor;

#[async_trait]
impl SupervisorLookup for NoSupervisor {
    async fn supervisor_of(&self, _actor_id: i64) -> Result<Option<Supervisor>> {
        Ok(None)
    }
}

/// Turns raw recipient expressions into concrete recipient lists.
#[derive(Clone)]
pub struct RecipientResolver {
    supervisors: Arc<dyn SupervisorLookup>,
}

impl RecipientResolver {
    pub fn new(supervisors: Arc<dyn SupervisorLookup>) -> Self {
        Self { supervisors }
    }

    /// Resolve `expression` for an event triggered by `actor_id`.
    ///
    /// An empty result means the rule has nobody to notify.
    pub async fn resolve(&self, expression: &str, actor_id: Option<i64>) -> Result<Vec<Recipient>> {
        if !expression.contains(SUPERVISOR_PLACEHOLDER) {
            return Ok(normalize_recipients(expression));
        }

        let replacement = match actor_id.filter(|id| *id > 0) {
            Some(actor_id) => self
                .supervisors
                .supervisor_of(actor_id)
                .await?
                .filter(|s| !s.email.trim().is_empty())
                .map(|s| s.mailbox())
                .unwrap_or_default(),
            None => String::new(),
        };

        debug!(
            replacement = %replacement,
            "Replacing {} in recipient expression", SUPERVISOR_PLACEHOLDER
        );
        let expanded = expression.replace(SUPERVISOR_PLACEHOLDER, &replacement);
        Ok(normalize_recipients(&expanded))
    }
}

/// Split a comma-separated expression into unique, non-empty recipients.
///
/// Runs of separators collapse, surrounding whitespace is trimmed and the
/// first occurrence of a duplicate wins. Whitespace inside an entry is kept,
/// so `Name <address>` survives intact.
pub fn normalize_recipients(expression: &str) -> Vec<Recipient> {
    let mut seen = HashSet::new();
    split_unquoted(expression)
        .into_iter()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter(|part| seen.insert(part.to_string()))
        .map(|part| Recipient(part.to_string()))
        .collect()
}

/// Validate a recipient list supplied from outside the resolver.
///
/// Unlike [`normalize_recipients`], nothing is silently dropped: a blank
/// entry, an entry containing a separator, a duplicate or an empty list is
/// a validation error.
pub fn validate_recipients<S: AsRef<str>>(candidates: &[S]) -> Result<Vec<Recipient>> {
    if candidates.is_empty() {
        return Err(Error::validation("recipient list is empty"));
    }

    let mut seen = HashSet::new();
    let mut recipients = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let value = candidate.as_ref().trim();
        if value.is_empty() {
            return Err(Error::validation("recipient list contains a blank entry"));
        }
        if split_unquoted(value).len() > 1 {
            return Err(Error::validation(format!(
                "recipient '{}' contains a separator",
                value
            )));
        }
        if !seen.insert(value.to_string()) {
            return Err(Error::validation(format!(
                "recipient '{}' is listed twice",
                value
            )));
        }
        recipients.push(Recipient(value.to_string()));
    }
    Ok(recipients)
}

/// Split on commas that are not inside a quoted display name.
fn split_unquoted(expression: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;

    for (i, c) in expression.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ',' if !quoted => {
                parts.push(&expression[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&expression[start..]);
    parts
}
