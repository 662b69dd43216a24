//! Extension hooks.
//!
//! Extensions are registered in order on a [`HookBus`]. Before every send the
//! engine runs [`FORMAT_MESSAGE_HOOK`]; each extension may veto the send,
//! append to the subject or body, or replace the recipient list.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::attachment::Attachment;
use super::events::NotificationEvent;
use super::recipient::Recipient;
use crate::{Error, Result};

/// Hook run right before a notification is handed to the transport.
pub const FORMAT_MESSAGE_HOOK: &str = "format_notification_message";

/// Data handed to every extension.
#[derive(Debug, Clone, Copy)]
pub struct HookParameters<'a> {
    pub code: &'a str,
    pub recipients: &'a [Recipient],
    pub reply_to: &'a str,
    pub attachments: &'a [Attachment],
}

/// What a single extension, or the whole bus, decided.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookOutcome {
    /// Abort this rule's send.
    pub vetoed: bool,
    pub subject_append: Option<String>,
    pub message_append: Option<String>,
    /// Replacement recipient list. Validated by the engine before use.
    pub recipients: Option<Vec<String>>,
}

impl HookOutcome {
    pub fn veto() -> Self {
        Self {
            vetoed: true,
            ..Default::default()
        }
    }

    fn merge(&mut self, other: HookOutcome) {
        self.vetoed |= other.vetoed;
        append(&mut self.subject_append, other.subject_append);
        append(&mut self.message_append, other.message_append);
        if other.recipients.is_some() {
            self.recipients = other.recipients;
        }
    }
}

fn append(target: &mut Option<String>, extra: Option<String>) {
    let Some(extra) = extra.filter(|s| !s.is_empty()) else {
        return;
    };
    match target {
        Some(existing) => existing.push_str(&extra),
        None => *target = Some(extra),
    }
}

/// A notification extension.
#[async_trait]
pub trait NotificationHook: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Run the extension for `hook`. Extensions ignore hooks they do not
    /// handle by returning the default outcome.
    async fn run(
        &self,
        hook: &str,
        params: &HookParameters<'_>,
        event: &NotificationEvent,
    ) -> Result<HookOutcome>;
}

/// Ordered registry of extensions.
#[derive(Clone, Default)]
pub struct HookBus {
    hooks: Vec<Arc<dyn NotificationHook>>,
}

impl HookBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Arc<dyn NotificationHook>) {
        debug!(hook = hook.name(), "Registered notification hook");
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run every extension in registration order and merge their outcomes.
    ///
    /// Appends are concatenated in order and the last replacement recipient
    /// list wins. The first veto stops the run. An extension error aborts the
    /// run with [`Error::Hook`].
    pub async fn run(
        &self,
        hook: &str,
        params: &HookParameters<'_>,
        event: &NotificationEvent,
    ) -> Result<HookOutcome> {
        let mut merged = HookOutcome::default();
        for extension in &self.hooks {
            let outcome = extension
                .run(hook, params, event)
                .await
                .map_err(|e| Error::hook(extension.name(), e.to_string()))?;

            if outcome.vetoed {
                info!(hook = extension.name(), code = params.code, "Notification vetoed by hook");
                return Ok(HookOutcome::veto());
            }
            merged.merge(outcome);
        }
        Ok(merged)
    }
}
