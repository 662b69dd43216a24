//! Configuration repositories.

use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::{ActionTriggerDbModel, ConfigConstDbModel, SHARED_ENTITY};
use crate::notification::rules::ConfigEntry;

/// Configuration constants repository trait.
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    /// Entries whose name starts with `prefix`, visible to `entity`.
    ///
    /// Shared entries are included; an entity-specific entry overrides the
    /// shared entry of the same name. Results are ordered by name.
    async fn list_by_prefix(&self, prefix: &str, entity: i64) -> Result<Vec<ConfigEntry>>;

    async fn get_value(&self, name: &str, entity: i64) -> Result<Option<String>>;

    /// Insert or replace a value.
    async fn set_value(&self, name: &str, value: &str, entity: i64) -> Result<()>;

    async fn delete_value(&self, name: &str, entity: i64) -> Result<()>;
}

/// SQLx implementation of ConfigRepository.
pub struct SqlxConfigRepository {
    pool: SqlitePool,
}

impl SqlxConfigRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConfigRepository for SqlxConfigRepository {
    async fn list_by_prefix(&self, prefix: &str, entity: i64) -> Result<Vec<ConfigEntry>> {
        // substr() instead of LIKE: prefixes contain '_', a LIKE wildcard.
        let rows = sqlx::query_as::<_, ConfigConstDbModel>(
            r#"
            SELECT name, value, entity, note FROM config_const
            WHERE substr(name, 1, ?) = ? AND entity IN (?, ?)
            ORDER BY name, entity
            "#,
        )
        .bind(prefix.chars().count() as i64)
        .bind(prefix)
        .bind(SHARED_ENTITY)
        .bind(entity)
        .fetch_all(&self.pool)
        .await?;

        let mut by_name: BTreeMap<String, ConfigConstDbModel> = BTreeMap::new();
        for row in rows {
            match by_name.get(&row.name) {
                Some(existing) if existing.entity != SHARED_ENTITY => {}
                _ => {
                    by_name.insert(row.name.clone(), row);
                }
            }
        }
        Ok(by_name.into_values().map(ConfigEntry::from).collect())
    }

    async fn get_value(&self, name: &str, entity: i64) -> Result<Option<String>> {
        let value: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT value FROM config_const
            WHERE name = ? AND entity IN (?, ?)
            ORDER BY entity DESC
            LIMIT 1
            "#,
        )
        .bind(name)
        .bind(SHARED_ENTITY)
        .bind(entity)
        .fetch_optional(&self.pool)
        .await?;
        Ok(value.map(|(v,)| v))
    }

    async fn set_value(&self, name: &str, value: &str, entity: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO config_const (name, value, entity)
            VALUES (?, ?, ?)
            ON CONFLICT(name, entity) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(name)
        .bind(value)
        .bind(entity)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_value(&self, name: &str, entity: i64) -> Result<()> {
        sqlx::query("DELETE FROM config_const WHERE name = ? AND entity = ?")
            .bind(name)
            .bind(entity)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Action trigger repository trait.
#[async_trait]
pub trait ActionTriggerRepository: Send + Sync {
    /// Id of the trigger registered for `code`.
    async fn get_id_by_code(&self, code: &str) -> Result<Option<i64>>;

    async fn list_triggers(&self) -> Result<Vec<ActionTriggerDbModel>>;

    /// Register a trigger and return its id. Existing codes keep their id.
    async fn register(&self, code: &str, label: &str, element_type: &str) -> Result<i64>;
}

/// SQLx implementation of ActionTriggerRepository.
pub struct SqlxActionTriggerRepository {
    pool: SqlitePool,
}

impl SqlxActionTriggerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActionTriggerRepository for SqlxActionTriggerRepository {
    async fn get_id_by_code(&self, code: &str) -> Result<Option<i64>> {
        let id: Option<(i64,)> = sqlx::query_as("SELECT id FROM action_trigger WHERE code = ?")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id.map(|(id,)| id))
    }

    async fn list_triggers(&self) -> Result<Vec<ActionTriggerDbModel>> {
        let triggers = sqlx::query_as::<_, ActionTriggerDbModel>(
            "SELECT id, code, label, element_type FROM action_trigger ORDER BY code",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(triggers)
    }

    async fn register(&self, code: &str, label: &str, element_type: &str) -> Result<i64> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO action_trigger (code, label, element_type)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(code)
        .bind(label)
        .bind(element_type)
        .execute(&self.pool)
        .await?;

        let (id,): (i64,) = sqlx::query_as("SELECT id FROM action_trigger WHERE code = ?")
            .bind(code)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_pool;

    #[tokio::test]
    async fn test_list_by_prefix_prefers_entity_rows() {
        let repo = SqlxConfigRepository::new(test_pool().await);
        repo.set_value("NOTIFICATION_FIXEDEMAIL_ORDER_CLOSE_THRESHOLD_HIGHER_10", "shared@x.com", 0)
            .await
            .unwrap();
        repo.set_value("NOTIFICATION_FIXEDEMAIL_ORDER_CLOSE_THRESHOLD_HIGHER_10", "own@x.com", 2)
            .await
            .unwrap();
        repo.set_value("NOTIFICATION_FIXEDEMAIL_ORDER_CLOSE_THRESHOLD_HIGHER_50", "other@x.com", 3)
            .await
            .unwrap();
        repo.set_value("NOTIFICATIONXFIXEDEMAIL", "wildcard@x.com", 2)
            .await
            .unwrap();

        let entries = repo.list_by_prefix("NOTIFICATION_FIXEDEMAIL", 2).await.unwrap();
        assert_eq!(
            entries,
            vec![ConfigEntry::new(
                "NOTIFICATION_FIXEDEMAIL_ORDER_CLOSE_THRESHOLD_HIGHER_10",
                "own@x.com"
            )]
        );

        let shared = repo.list_by_prefix("NOTIFICATION_FIXEDEMAIL", 1).await.unwrap();
        assert_eq!(shared[0].value, "shared@x.com");
    }

    #[tokio::test]
    async fn test_get_and_set_value() {
        let repo = SqlxConfigRepository::new(test_pool().await);
        assert_eq!(repo.get_value("MAIN_INFO_SOCIETE_NOM", 1).await.unwrap(), None);

        repo.set_value("MAIN_INFO_SOCIETE_NOM", "ACME", 1).await.unwrap();
        repo.set_value("MAIN_INFO_SOCIETE_NOM", "ACME Corp", 1).await.unwrap();
        assert_eq!(
            repo.get_value("MAIN_INFO_SOCIETE_NOM", 1).await.unwrap().as_deref(),
            Some("ACME Corp")
        );

        repo.delete_value("MAIN_INFO_SOCIETE_NOM", 1).await.unwrap();
        assert_eq!(repo.get_value("MAIN_INFO_SOCIETE_NOM", 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_seeded_triggers() {
        let repo = SqlxActionTriggerRepository::new(test_pool().await);
        assert!(repo.get_id_by_code("ORDER_CLOSE").await.unwrap().is_some());
        assert!(repo.get_id_by_code("PROPAL_CLOSE_SIGNED_WEB").await.unwrap().is_some());
        assert_eq!(repo.get_id_by_code("BILL_VALIDATE").await.unwrap(), None);

        let id = repo.register("BILL_VALIDATE", "Invoice validated", "facture").await.unwrap();
        assert_eq!(repo.register("BILL_VALIDATE", "again", "facture").await.unwrap(), id);
        assert_eq!(repo.list_triggers().await.unwrap().len(), 3);
    }
}
