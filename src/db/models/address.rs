//! Model mapping to the `addresses` table. Only ownership-scoped reads are
//! needed here; address management lives outside the checkout core.
use serde::Serialize;
use uuid::Uuid;

use crate::db::{errors::DatabaseError, ConnectionPool};

/// A saved shipping/billing address belonging to a user.
#[derive(sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(skip)]
    id: Uuid,
    #[serde(skip)]
    pub user_id: Uuid,
    pub name: String,
    pub phone: Option<String>,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

impl Address {
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Select an address by ID, but only if it belongs to the given user.
    pub async fn select_one_owned(
        id: Uuid,
        user_id: Uuid,
        db_client: &ConnectionPool,
    ) -> Result<Option<Self>, DatabaseError> {
        Ok(sqlx::query_as::<_, Self>(
            "SELECT id, user_id, name, phone, line1, line2, city, state, postal_code, country \
             FROM addresses WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(db_client)
        .await?)
    }

    /// Select an address without an ownership constraint, for rendering the
    /// snapshot stored on an existing order.
    pub async fn select_one(
        id: Uuid,
        db_client: &ConnectionPool,
    ) -> Result<Option<Self>, DatabaseError> {
        Ok(sqlx::query_as::<_, Self>(
            "SELECT id, user_id, name, phone, line1, line2, city, state, postal_code, country \
             FROM addresses WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(db_client)
        .await?)
    }
}
