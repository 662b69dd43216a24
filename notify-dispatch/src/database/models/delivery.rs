//! Delivery log database model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::{ms_to_datetime, now_ms};

/// Channel recorded for every delivery.
pub const DELIVERY_CHANNEL: &str = "email";

/// Target kind of deliveries to addresses fixed in configuration.
pub const FIXED_EMAIL_TARGET: &str = "tofixedemail";

/// One sent notification, for one recipient.
///
/// Rows are append-only: the engine never updates or deletes them.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: String,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    pub rule_id: i64,
    pub company_id: Option<i64>,
    /// Object type of the event, e.g. `propal`.
    pub event_type: String,
    pub object_id: i64,
    pub recipient: String,
    pub channel: String,
    pub target_kind: String,
}

impl DeliveryRecord {
    pub fn new(
        rule_id: i64,
        company_id: Option<i64>,
        event_type: impl Into<String>,
        object_id: i64,
        recipient: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now_ms(),
            rule_id,
            company_id,
            event_type: event_type.into(),
            object_id,
            recipient: recipient.into(),
            channel: DELIVERY_CHANNEL.to_string(),
            target_kind: FIXED_EMAIL_TARGET.to_string(),
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        ms_to_datetime(self.created_at)
    }
}
