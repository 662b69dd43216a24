//! Delivery log repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::DeliveryRecord;
use crate::{Error, Result};

/// Delivery log repository trait.
///
/// The log is append-only.
#[async_trait]
pub trait DeliveryRepository: Send + Sync {
    /// Append one record. Failures are reported as storage errors.
    async fn record(&self, record: &DeliveryRecord) -> Result<()>;

    /// Every record of one object, oldest first.
    async fn list_for_object(&self, event_type: &str, object_id: i64)
    -> Result<Vec<DeliveryRecord>>;

    /// Number of records a rule produced for one object.
    async fn count_for_rule(&self, rule_id: i64, event_type: &str, object_id: i64) -> Result<i64>;
}

/// SQLx implementation of DeliveryRepository.
pub struct SqlxDeliveryRepository {
    pool: SqlitePool,
}

impl SqlxDeliveryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveryRepository for SqlxDeliveryRepository {
    async fn record(&self, record: &DeliveryRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notify_delivery (
                id, created_at, rule_id, company_id, event_type,
                object_id, recipient, channel, target_kind
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(record.created_at)
        .bind(record.rule_id)
        .bind(record.company_id)
        .bind(&record.event_type)
        .bind(record.object_id)
        .bind(&record.recipient)
        .bind(&record.channel)
        .bind(&record.target_kind)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::storage(format!("cannot record delivery: {}", e)))?;
        Ok(())
    }

    async fn list_for_object(
        &self,
        event_type: &str,
        object_id: i64,
    ) -> Result<Vec<DeliveryRecord>> {
        let records = sqlx::query_as::<_, DeliveryRecord>(
            r#"
            SELECT * FROM notify_delivery
            WHERE event_type = ? AND object_id = ?
            ORDER BY created_at, rowid
            "#,
        )
        .bind(event_type)
        .bind(object_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn count_for_rule(&self, rule_id: i64, event_type: &str, object_id: i64) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM notify_delivery
            WHERE rule_id = ? AND event_type = ? AND object_id = ?
            "#,
        )
        .bind(rule_id)
        .bind(event_type)
        .bind(object_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
