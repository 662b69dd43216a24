//! Notification events.
//!
//! Defines the business events that can trigger notifications and the static
//! catalog of action codes the engine knows how to notify about.

use serde::{Deserialize, Serialize};

/// Entity that owns objects when none is given.
pub const DEFAULT_ENTITY: i64 = 1;

/// Static metadata about a supported action code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NotificationCodeInfo {
    /// Action code, as emitted by the triggering business action.
    pub code: &'static str,
    /// Human-friendly label.
    pub label: &'static str,
    /// Object type written to delivery records.
    pub object_type: &'static str,
    /// Path of the object's card page, relative to the web root.
    pub card_path: &'static str,
    /// Directory (under the data root) where generated documents live.
    pub artifact_dir: &'static str,
    /// Translation key of the rule-specific message. Takes a `link` argument.
    pub message_key: &'static str,
}

const NOTIFICATION_CODES: &[NotificationCodeInfo] = &[
    NotificationCodeInfo {
        code: "PROPAL_CLOSE_SIGNED_WEB",
        label: "Proposal signed online",
        object_type: "propal",
        card_path: "/comm/propal/card.php",
        artifact_dir: "propale",
        message_key: "EMailTextProposalClosedSignedWeb",
    },
    NotificationCodeInfo {
        code: "ORDER_CLOSE",
        label: "Order delivered",
        object_type: "commande",
        card_path: "/commande/card.php",
        artifact_dir: "commande",
        message_key: "EMailTextOrderDelivered",
    },
];

/// All action codes supported out of the box.
pub fn supported_codes() -> &'static [NotificationCodeInfo] {
    NOTIFICATION_CODES
}

/// Look up a code in `codes`.
pub fn find_code<'a>(
    codes: &'a [NotificationCodeInfo],
    code: &str,
) -> Option<&'a NotificationCodeInfo> {
    codes.iter().find(|info| info.code == code)
}

/// The business object a notification deals with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventObject {
    /// Object identifier.
    pub id: i64,
    /// Owning entity.
    #[serde(default = "default_entity")]
    pub entity: i64,
    /// General reference (e.g. `PR2402-0012`).
    #[serde(default)]
    pub reference: String,
    /// Reference before the action, when the action renamed the object.
    #[serde(default)]
    pub old_ref: Option<String>,
    /// Reference after the action, when the action renamed the object.
    #[serde(default)]
    pub new_ref: Option<String>,
    /// Total amount excluding tax, compared against rule thresholds.
    #[serde(default)]
    pub total: Option<f64>,
    /// Third-party company the object belongs to.
    #[serde(default)]
    pub company_id: Option<i64>,
}

fn default_entity() -> i64 {
    DEFAULT_ENTITY
}

impl EventObject {
    pub fn new(id: i64, reference: impl Into<String>) -> Self {
        Self {
            id,
            entity: DEFAULT_ENTITY,
            reference: reference.into(),
            old_ref: None,
            new_ref: None,
            total: None,
            company_id: None,
        }
    }

    pub fn with_total(mut self, total: f64) -> Self {
        self.total = Some(total);
        self
    }

    pub fn with_entity(mut self, entity: i64) -> Self {
        self.entity = entity;
        self
    }

    pub fn with_company(mut self, company_id: i64) -> Self {
        self.company_id = Some(company_id);
        self
    }

    pub fn with_new_ref(mut self, new_ref: impl Into<String>) -> Self {
        self.new_ref = Some(new_ref.into());
        self
    }

    /// Reference after the action, falling back to the general reference.
    pub fn new_reference(&self) -> &str {
        non_blank(self.new_ref.as_deref()).unwrap_or(self.reference.as_str())
    }

    /// Reference before the action, falling back to the general reference.
    pub fn old_reference(&self) -> &str {
        non_blank(self.old_ref.as_deref()).unwrap_or(self.reference.as_str())
    }

    /// Amount usable for threshold checks.
    ///
    /// Unset, zero and non-finite totals yield `None`.
    pub fn threshold_amount(&self) -> Option<f64> {
        self.total.filter(|t| t.is_finite() && *t != 0.0)
    }

    /// Company identifier for audit rows. Non-positive ids mean "none".
    pub fn company(&self) -> Option<i64> {
        self.company_id.filter(|id| *id > 0)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// A single occurrence of a business action that may trigger notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Action code (see [`supported_codes`]).
    pub code: String,
    /// Object the action was performed on.
    pub object: EventObject,
    /// User who performed the action, used for supervisor resolution.
    #[serde(default)]
    pub actor_id: Option<i64>,
}

impl NotificationEvent {
    pub fn new(code: impl Into<String>, object: EventObject) -> Self {
        Self {
            code: code.into(),
            object,
            actor_id: None,
        }
    }

    pub fn with_actor(mut self, actor_id: i64) -> Self {
        self.actor_id = Some(actor_id);
        self
    }
}
