//! Append-only audit records written by the webhook reconciler.
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::db::errors::DatabaseError;

/// INSERT model for an `activity_logs` row. There is no read path in the API;
/// the table exists for manual replay and support tooling.
pub struct ActivityLogInsert {
    pub user_id: Uuid,
    /// Machine-readable action, e.g. `payment_captured`.
    pub action: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    /// Free-form JSON context (gateway ids, amounts, failure reasons).
    pub details: serde_json::Value,
}

impl ActivityLogInsert {
    pub async fn store(self, executor: impl PgExecutor<'_>) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO activity_logs (user_id, action, entity_type, entity_id, details) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(self.user_id)
        .bind(self.action)
        .bind(self.entity_type)
        .bind(self.entity_id)
        .bind(self.details)
        .execute(executor)
        .await?;
        Ok(())
    }
}
