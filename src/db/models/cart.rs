//! Models mapping to the `carts` and `cart_items` tables. A cart belongs to
//! exactly one of an authenticated user or a guest session, never both.
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::db::{errors::DatabaseError, ConnectionPool, Transaction};

/// The mutually exclusive owner of a cart.
#[derive(Clone, Debug)]
pub enum CartOwner {
    /// An authenticated user, identified by their user ID.
    User(Uuid),
    /// A guest, identified by the opaque id in their `guest_session` cookie.
    Guest(String),
}

/// A shopping cart as stored in the database. Only `active` carts are read or
/// written by the API; a cart is deleted outright once converted to an order.
#[derive(sqlx::FromRow)]
pub struct Cart {
    id: Uuid,
    pub user_id: Option<Uuid>,
    pub session_id: Option<String>,
    /// Cart lifecycle status. Always `active` for rows this code touches.
    pub status: String,
    /// The coupon code currently applied, uppercased.
    pub coupon_code: Option<String>,
    /// Cached totals in paise, recomputed on every mutation.
    pub subtotal: i64,
    pub discount_total: i64,
    pub tax_total: i64,
    pub total: i64,
}

/// A line in a cart. Unit price is captured at add time; checkout re-reads
/// live catalog prices rather than trusting this.
#[derive(sqlx::FromRow)]
pub struct CartItem {
    id: Uuid,
    pub cart_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: i64,
    pub unit_price: i64,
    pub total_price: i64,
    pub selected_color: Option<String>,
}

/// INSERT model for a `cart_items` row.
pub struct CartItemInsert {
    pub cart_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: i64,
    pub unit_price: i64,
    pub selected_color: Option<String>,
}

/// A cart line joined with live product/variant data, as needed by both the
/// cart views and the order assembler.
#[derive(sqlx::FromRow)]
pub struct CartLineJoined {
    pub item_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: i64,
    pub unit_price: i64,
    pub total_price: i64,
    pub selected_color: Option<String>,
    pub product_name: String,
    pub product_slug: String,
    pub product_price: i64,
    pub product_stock: i64,
    pub is_active: bool,
    pub track_inventory: bool,
    pub allow_backorder: bool,
    pub variant_name: Option<String>,
    pub variant_color: Option<String>,
    pub variant_price_modifier: Option<i64>,
    pub variant_stock: Option<i64>,
}

const LINE_JOIN_SELECT: &str = "SELECT ci.id AS item_id, ci.product_id, ci.variant_id, \
     ci.quantity, ci.unit_price, ci.total_price, ci.selected_color, \
     p.name AS product_name, p.slug AS product_slug, p.price AS product_price, \
     p.stock_quantity AS product_stock, p.is_active, p.track_inventory, p.allow_backorder, \
     pv.name AS variant_name, pv.color AS variant_color, \
     pv.price_modifier AS variant_price_modifier, pv.stock_quantity AS variant_stock \
     FROM cart_items ci \
     JOIN products p ON ci.product_id = p.id \
     LEFT JOIN product_variants pv ON ci.variant_id = pv.id \
     WHERE ci.cart_id = $1 \
     ORDER BY ci.created_at ASC";

impl Cart {
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Select the owner's active cart, if any.
    pub async fn select_active(
        owner: &CartOwner,
        db_client: &ConnectionPool,
    ) -> Result<Option<Self>, DatabaseError> {
        let query = match *owner {
            CartOwner::User(user_id) => sqlx::query_as::<_, Self>(
                "SELECT id, user_id, session_id, status, coupon_code, subtotal, discount_total, \
                 tax_total, total FROM carts WHERE user_id = $1 AND status = 'active' \
                 ORDER BY updated_at DESC LIMIT 1",
            )
            .bind(user_id),
            CartOwner::Guest(ref session_id) => sqlx::query_as::<_, Self>(
                "SELECT id, user_id, session_id, status, coupon_code, subtotal, discount_total, \
                 tax_total, total FROM carts WHERE session_id = $1 AND user_id IS NULL \
                 AND status = 'active' ORDER BY updated_at DESC LIMIT 1",
            )
            .bind(session_id.clone()),
        };
        Ok(query.fetch_optional(db_client).await?)
    }

    /// Create a fresh, empty active cart for the given owner.
    pub async fn create(
        owner: &CartOwner,
        db_client: &ConnectionPool,
    ) -> Result<Self, DatabaseError> {
        let query = match *owner {
            CartOwner::User(user_id) => sqlx::query_as::<_, Self>(
                "INSERT INTO carts (user_id, status) VALUES ($1, 'active') \
                 RETURNING id, user_id, session_id, status, coupon_code, subtotal, \
                 discount_total, tax_total, total",
            )
            .bind(user_id),
            CartOwner::Guest(ref session_id) => sqlx::query_as::<_, Self>(
                "INSERT INTO carts (session_id, status) VALUES ($1, 'active') \
                 RETURNING id, user_id, session_id, status, coupon_code, subtotal, \
                 discount_total, tax_total, total",
            )
            .bind(session_id.clone()),
        };
        Ok(query.fetch_one(db_client).await?)
    }

    /// Re-read a cart by its primary key.
    pub async fn select_one(
        id: Uuid,
        db_client: &ConnectionPool,
    ) -> Result<Option<Self>, DatabaseError> {
        Ok(sqlx::query_as::<_, Self>(
            "SELECT id, user_id, session_id, status, coupon_code, subtotal, discount_total, \
             tax_total, total FROM carts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(db_client)
        .await?)
    }

    /// Persist recomputed totals and the applied coupon code.
    pub async fn update_totals(
        id: Uuid,
        subtotal: i64,
        discount_total: i64,
        tax_total: i64,
        total: i64,
        coupon_code: Option<&str>,
        executor: impl PgExecutor<'_>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE carts SET subtotal = $1, discount_total = $2, tax_total = $3, total = $4, \
             coupon_code = $5, updated_at = NOW() WHERE id = $6",
        )
        .bind(subtotal)
        .bind(discount_total)
        .bind(tax_total)
        .bind(total)
        .bind(coupon_code)
        .bind(id)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Delete a cart and all of its items inside the supplied transaction.
    pub async fn delete_with_items(
        id: Uuid,
        tx: &mut Transaction<'_>,
    ) -> Result<(), DatabaseError> {
        sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        sqlx::query("DELETE FROM carts WHERE id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Delete the active cart (and items) of a user, if one exists. Used by
    /// the paid transition, which runs without a cart handle.
    pub async fn delete_active_for_user(
        user_id: Uuid,
        tx: &mut Transaction<'_>,
    ) -> Result<(), DatabaseError> {
        let cart_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM carts WHERE user_id = $1 AND status = 'active' LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?;
        if let Some(id) = cart_id {
            Self::delete_with_items(id, tx).await?;
        }
        Ok(())
    }
}

impl CartItemInsert {
    /// Store this INSERT model and return the complete row.
    pub async fn store(self, db_client: &ConnectionPool) -> Result<CartItem, DatabaseError> {
        Ok(sqlx::query_as::<_, CartItem>(
            "INSERT INTO cart_items (cart_id, product_id, variant_id, quantity, unit_price, \
             total_price, selected_color) VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING id, cart_id, product_id, variant_id, quantity, unit_price, total_price, \
             selected_color",
        )
        .bind(self.cart_id)
        .bind(self.product_id)
        .bind(self.variant_id)
        .bind(self.quantity)
        .bind(self.unit_price)
        .bind(self.unit_price * self.quantity)
        .bind(self.selected_color)
        .fetch_one(db_client)
        .await?)
    }
}

impl CartItem {
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Find a line in the cart matching the same product, variant and colour
    /// combination, for merge-on-add.
    pub async fn find_matching(
        cart_id: Uuid,
        product_id: Uuid,
        variant_id: Option<Uuid>,
        selected_color: Option<&str>,
        db_client: &ConnectionPool,
    ) -> Result<Option<Self>, DatabaseError> {
        Ok(sqlx::query_as::<_, Self>(
            "SELECT id, cart_id, product_id, variant_id, quantity, unit_price, total_price, \
             selected_color FROM cart_items WHERE cart_id = $1 AND product_id = $2 \
             AND variant_id IS NOT DISTINCT FROM $3 \
             AND COALESCE(selected_color, '') = COALESCE($4, '')",
        )
        .bind(cart_id)
        .bind(product_id)
        .bind(variant_id)
        .bind(selected_color)
        .fetch_optional(db_client)
        .await?)
    }

    /// Select an item by ID, but only if it sits in the owner's active cart.
    pub async fn select_one_owned(
        item_id: Uuid,
        owner: &CartOwner,
        db_client: &ConnectionPool,
    ) -> Result<Option<Self>, DatabaseError> {
        let query = match *owner {
            CartOwner::User(user_id) => sqlx::query_as::<_, Self>(
                "SELECT ci.id, ci.cart_id, ci.product_id, ci.variant_id, ci.quantity, \
                 ci.unit_price, ci.total_price, ci.selected_color \
                 FROM cart_items ci JOIN carts c ON ci.cart_id = c.id \
                 WHERE ci.id = $1 AND c.user_id = $2 AND c.status = 'active'",
            )
            .bind(item_id)
            .bind(user_id),
            CartOwner::Guest(ref session_id) => sqlx::query_as::<_, Self>(
                "SELECT ci.id, ci.cart_id, ci.product_id, ci.variant_id, ci.quantity, \
                 ci.unit_price, ci.total_price, ci.selected_color \
                 FROM cart_items ci JOIN carts c ON ci.cart_id = c.id \
                 WHERE ci.id = $1 AND c.session_id = $2 AND c.user_id IS NULL \
                 AND c.status = 'active'",
            )
            .bind(item_id)
            .bind(session_id.clone()),
        };
        Ok(query.fetch_optional(db_client).await?)
    }

    /// Set this line's quantity and derived total price.
    pub async fn update_quantity(
        id: Uuid,
        quantity: i64,
        unit_price: i64,
        db_client: &ConnectionPool,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE cart_items SET quantity = $1, total_price = $2, updated_at = NOW() \
             WHERE id = $3",
        )
        .bind(quantity)
        .bind(unit_price * quantity)
        .bind(id)
        .execute(db_client)
        .await?;
        Ok(())
    }

    pub async fn delete(id: Uuid, db_client: &ConnectionPool) -> Result<(), DatabaseError> {
        sqlx::query("DELETE FROM cart_items WHERE id = $1")
            .bind(id)
            .execute(db_client)
            .await?;
        Ok(())
    }

    pub async fn delete_all(cart_id: Uuid, db_client: &ConnectionPool) -> Result<(), DatabaseError> {
        sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
            .bind(cart_id)
            .execute(db_client)
            .await?;
        Ok(())
    }

    /// Sum of quantities across the owner's active cart, for the header badge.
    pub async fn count_for_owner(
        owner: &CartOwner,
        db_client: &ConnectionPool,
    ) -> Result<i64, DatabaseError> {
        let query = match *owner {
            CartOwner::User(user_id) => sqlx::query_scalar::<_, i64>(
                "SELECT COALESCE(SUM(ci.quantity), 0) FROM cart_items ci \
                 JOIN carts c ON ci.cart_id = c.id \
                 WHERE c.user_id = $1 AND c.status = 'active'",
            )
            .bind(user_id),
            CartOwner::Guest(ref session_id) => sqlx::query_scalar::<_, i64>(
                "SELECT COALESCE(SUM(ci.quantity), 0) FROM cart_items ci \
                 JOIN carts c ON ci.cart_id = c.id \
                 WHERE c.session_id = $1 AND c.user_id IS NULL AND c.status = 'active'",
            )
            .bind(session_id.clone()),
        };
        Ok(query.fetch_one(db_client).await?)
    }
}

impl CartLineJoined {
    /// Fetch all lines of a cart with live catalog data attached.
    pub async fn select_all(
        cart_id: Uuid,
        db_client: &ConnectionPool,
    ) -> Result<Vec<Self>, DatabaseError> {
        Ok(sqlx::query_as::<_, Self>(LINE_JOIN_SELECT)
            .bind(cart_id)
            .fetch_all(db_client)
            .await?)
    }

    /// The current catalog unit price for this line, in paise.
    pub fn current_unit_price(&self) -> i64 {
        self.product_price + self.variant_price_modifier.unwrap_or(0)
    }

    /// Live stock for whichever of product/variant this line references.
    pub fn available_stock(&self) -> i64 {
        self.variant_stock.unwrap_or(self.product_stock)
    }

    /// Whether the requested quantity can currently be fulfilled.
    pub fn can_fulfil(&self) -> bool {
        !self.track_inventory || self.allow_backorder || self.available_stock() >= self.quantity
    }
}
