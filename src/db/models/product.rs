//! Models mapping to the `products` and `product_variants` tables. Stock
//! mutation happens exclusively through the guarded decrement/increment
//! statements here so the counter can never go negative.
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::db::{errors::DatabaseError, ConnectionPool};

/// A purchaseable product as stored in the database. Can only be constructed
/// by reading it from the database.
#[derive(sqlx::FromRow)]
pub struct Product {
    id: Uuid,
    /// The name of the product.
    pub name: String,
    /// URL-friendly identifier used by the storefront.
    pub slug: String,
    /// The base price of the product in paise (INR).
    price: i64,
    /// The count of the product left in stock.
    stock_quantity: i64,
    /// Whether the product is visible/purchaseable.
    pub is_active: bool,
    /// Whether stock is tracked for this product at all.
    pub track_inventory: bool,
    /// Whether the product may be ordered beyond available stock.
    pub allow_backorder: bool,
}

/// A variant of a product (size, finish, ...). Prices are expressed as a
/// modifier on top of the parent product's base price.
#[derive(sqlx::FromRow)]
pub struct ProductVariant {
    id: Uuid,
    pub product_id: Uuid,
    /// Display name of the variant.
    pub name: String,
    /// Optional colour of the variant.
    pub color: Option<String>,
    /// Amount added to the product's base price, in paise. May be negative.
    price_modifier: i64,
    /// Variant-level stock count.
    stock_quantity: i64,
}

impl Product {
    /// Select an active or inactive `Product` from the database by its ID.
    pub async fn select_one(
        id: Uuid,
        db_client: &ConnectionPool,
    ) -> Result<Option<Self>, DatabaseError> {
        Ok(sqlx::query_as::<_, Self>(
            "SELECT id, name, slug, price, stock_quantity, is_active, track_inventory, \
             allow_backorder FROM products WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(db_client)
        .await?)
    }

    /// Get this product's ID primary key.
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Get the base price of this product in paise (INR).
    pub const fn price(&self) -> i64 {
        self.price
    }

    /// Get the count of this product left in stock.
    pub const fn stock_quantity(&self) -> i64 {
        self.stock_quantity
    }

    /// Whether `quantity` units can currently be sold against `available`
    /// stock. The tracking and backorder policy lives on the product even
    /// when the counter being checked belongs to one of its variants.
    pub const fn can_fulfil(&self, available: i64, quantity: i64) -> bool {
        !self.track_inventory || self.allow_backorder || available >= quantity
    }

    /// Atomically decrement stock, refusing to go below zero. Returns whether
    /// a row was updated; `false` means the stock check failed and the
    /// enclosing transaction should be rolled back.
    pub async fn guarded_decrement_stock(
        id: Uuid,
        quantity: i64,
        executor: impl PgExecutor<'_>,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE products SET stock_quantity = stock_quantity - $1 \
             WHERE id = $2 AND stock_quantity >= $1",
        )
        .bind(quantity)
        .bind(id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Decrement stock for an already-captured payment, clamping at zero.
    /// The money has moved, so the order proceeds even if stock drifted
    /// since assembly; the counter still never goes negative.
    pub async fn decrement_stock_clamped(
        id: Uuid,
        quantity: i64,
        executor: impl PgExecutor<'_>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE products SET stock_quantity = GREATEST(stock_quantity - $1, 0) WHERE id = $2",
        )
        .bind(quantity)
        .bind(id)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Restore previously reserved stock (cancellation, refund).
    pub async fn increment_stock(
        id: Uuid,
        quantity: i64,
        executor: impl PgExecutor<'_>,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE products SET stock_quantity = stock_quantity + $1 WHERE id = $2")
            .bind(quantity)
            .bind(id)
            .execute(executor)
            .await?;
        Ok(())
    }
}

impl ProductVariant {
    /// Select a variant by its ID, scoped to its parent product.
    pub async fn select_one(
        id: Uuid,
        product_id: Uuid,
        db_client: &ConnectionPool,
    ) -> Result<Option<Self>, DatabaseError> {
        Ok(sqlx::query_as::<_, Self>(
            "SELECT id, product_id, name, color, price_modifier, stock_quantity \
             FROM product_variants WHERE id = $1 AND product_id = $2",
        )
        .bind(id)
        .bind(product_id)
        .fetch_optional(db_client)
        .await?)
    }

    pub const fn id(&self) -> Uuid {
        self.id
    }

    pub const fn price_modifier(&self) -> i64 {
        self.price_modifier
    }

    pub const fn stock_quantity(&self) -> i64 {
        self.stock_quantity
    }

    /// Guarded stock decrement on the variant row. Same contract as
    /// [`Product::guarded_decrement_stock`].
    pub async fn guarded_decrement_stock(
        id: Uuid,
        quantity: i64,
        executor: impl PgExecutor<'_>,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE product_variants SET stock_quantity = stock_quantity - $1 \
             WHERE id = $2 AND stock_quantity >= $1",
        )
        .bind(quantity)
        .bind(id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Clamped decrement on the variant row. Same contract as
    /// [`Product::decrement_stock_clamped`].
    pub async fn decrement_stock_clamped(
        id: Uuid,
        quantity: i64,
        executor: impl PgExecutor<'_>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE product_variants SET stock_quantity = GREATEST(stock_quantity - $1, 0) \
             WHERE id = $2",
        )
        .bind(quantity)
        .bind(id)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn increment_stock(
        id: Uuid,
        quantity: i64,
        executor: impl PgExecutor<'_>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE product_variants SET stock_quantity = stock_quantity + $1 WHERE id = $2",
        )
        .bind(quantity)
        .bind(id)
        .execute(executor)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(track_inventory: bool, allow_backorder: bool, stock_quantity: i64) -> Product {
        Product {
            id: Uuid::new_v4(),
            name: String::from("Walnut Desk"),
            slug: String::from("walnut-desk"),
            price: 1_250_000,
            stock_quantity,
            is_active: true,
            track_inventory,
            allow_backorder,
        }
    }

    #[test]
    fn tracked_product_fulfils_up_to_available_stock() {
        let tracked = product(true, false, 5);
        assert!(tracked.can_fulfil(tracked.stock_quantity(), 5));
        assert!(!tracked.can_fulfil(tracked.stock_quantity(), 6));
        // The counter may belong to a variant instead of the product.
        assert!(tracked.can_fulfil(2, 2));
        assert!(!tracked.can_fulfil(2, 3));
    }

    #[test]
    fn untracked_or_backorderable_product_always_fulfils() {
        let untracked = product(false, false, 0);
        assert!(untracked.can_fulfil(0, 100));
        let backorderable = product(true, true, 0);
        assert!(backorderable.can_fulfil(0, 100));
    }
}
