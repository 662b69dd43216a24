//! Configuration database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::notification::rules::ConfigEntry;

/// Entity id of configuration values shared by every entity.
pub const SHARED_ENTITY: i64 = 0;

/// A row of the `config_const` table.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct ConfigConstDbModel {
    pub name: String,
    pub value: String,
    /// Owning entity, or [`SHARED_ENTITY`].
    pub entity: i64,
    pub note: Option<String>,
}

impl ConfigConstDbModel {
    pub fn new(name: impl Into<String>, value: impl Into<String>, entity: i64) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            entity,
            note: None,
        }
    }
}

impl From<ConfigConstDbModel> for ConfigEntry {
    fn from(row: ConfigConstDbModel) -> Self {
        ConfigEntry::new(row.name, row.value)
    }
}

/// A row of the `action_trigger` table: a business action notifications can
/// be attached to.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct ActionTriggerDbModel {
    pub id: i64,
    pub code: String,
    pub label: String,
    /// Object type the action applies to.
    pub element_type: String,
}
