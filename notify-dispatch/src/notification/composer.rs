//! Message composition.
//!
//! Everything here is pure string building: no I/O, no hooks. The body is
//! assembled in full before its line breaks are converted to HTML, so the
//! conversion happens exactly once.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::attachment::Attachment;
use super::events::{NotificationCodeInfo, NotificationEvent};
use crate::i18n::Translator;
use crate::utils::url::card_url;

/// Translation key of the generic notification title.
pub const TITLE_KEY: &str = "NotificationTitle";

/// Translation key of the boilerplate notice opening every body.
pub const NOTICE_KEY: &str = "YouReceiveMailBecauseOfNotification";

/// A fully composed notification, before extension hooks run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposedMessage {
    pub subject: String,
    /// HTML body.
    pub body: String,
    pub attachments: Vec<Attachment>,
}

/// Builds subjects and bodies for matched rules.
#[derive(Clone)]
pub struct MessageComposer {
    translator: Arc<dyn Translator>,
    application: String,
    organization: String,
}

impl MessageComposer {
    pub fn new(
        translator: Arc<dyn Translator>,
        application: impl Into<String>,
        organization: impl Into<String>,
    ) -> Self {
        Self {
            translator,
            application: application.into(),
            organization: organization.into(),
        }
    }

    /// Localized notice explaining why the recipient gets this message.
    pub fn boilerplate_notice(&self) -> String {
        self.translator.translate(
            NOTICE_KEY,
            &[
                ("application", self.application.as_str()),
                ("organization", self.organization.as_str()),
            ],
        )
    }

    /// `[<organization>] <title>`
    pub fn subject(&self) -> String {
        format!(
            "[{}] {}",
            self.organization,
            self.translator.translate(TITLE_KEY, &[])
        )
    }

    /// Compose the message of a matched rule.
    ///
    /// `link` is embedded into the code's localized message, `notice` opens
    /// the body. `attachments` are carried over unchanged.
    pub fn compose(
        &self,
        event: &NotificationEvent,
        target: &NotificationCodeInfo,
        link: &str,
        notice: &str,
        attachments: Vec<Attachment>,
    ) -> ComposedMessage {
        debug_assert_eq!(event.code, target.code);

        let message = self.translator.translate(target.message_key, &[("link", link)]);
        let body = [notice, "", message.as_str()].join("\n");

        ComposedMessage {
            subject: self.subject(),
            body: nl2br(&body),
            attachments,
        }
    }
}

/// HTML link to the object's card page, labelled with its new reference.
pub fn object_link(root: &str, event: &NotificationEvent, target: &NotificationCodeInfo) -> String {
    let object = &event.object;
    format!(
        "<a href=\"{}\">{}</a>",
        escape_html(&card_url(root, target.card_path, object.id, object.entity)),
        escape_html(object.new_reference())
    )
}

/// Insert `<br />` before every line break (`\r\n`, `\n` or `\r`).
pub fn nl2br(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' if chars.peek() == Some(&'\n') => {
                chars.next();
                out.push_str("<br />\r\n");
            }
            '\r' | '\n' => {
                out.push_str("<br />");
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
