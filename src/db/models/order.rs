//! Models mapping to the `orders` and `order_items` tables, plus the closed
//! status enums governing order lifecycle and money flow. Both machines only
//! move forward; every transition goes through the functions defined here.
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use sqlx::PgExecutor;
use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::db::{errors::DatabaseError, ConnectionPool, Transaction};

/// Fulfilment status of an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Online payment not yet confirmed. Stock is not reserved.
    PendingPayment,
    /// Payment confirmed (or COD accepted), awaiting processing.
    Pending,
    Processing,
    Shipped,
    OutForDelivery,
    Delivered,
    Completed,
    Cancelled,
}

/// Money-flow status of an order, independent of fulfilment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    RefundPending,
    Refunded,
    RefundFailed,
    /// Order cancelled before any money moved.
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Razorpay,
    Cod,
}

impl OrderStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingPayment => "pending_payment",
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::OutForDelivery => "out_for_delivery",
            Self::Delivered => "delivered",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Only not-yet-fulfilled orders may be cancelled by their owner.
    pub const fn is_cancellable(self) -> bool {
        matches!(self, Self::PendingPayment | Self::Pending)
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Completed | Self::Cancelled)
    }

    /// The status after a payment confirmation. Advances `pending_payment` to
    /// `pending`; any later stage is left untouched so a straggling webhook
    /// cannot move an order backwards.
    pub const fn after_payment_confirmed(self) -> Self {
        match self {
            Self::PendingPayment => Self::Pending,
            other => other,
        }
    }
}

impl PaymentStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::RefundPending => "refund_pending",
            Self::Refunded => "refunded",
            Self::RefundFailed => "refund_failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the money-flow machine may advance from `self` to `target`.
    /// The graph is strictly forward: once `paid`, an order can only move
    /// into the refund states.
    pub const fn can_advance_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Paid)
                | (Self::Pending, Self::Failed)
                | (Self::Pending, Self::Cancelled)
                | (Self::Paid, Self::RefundPending)
                | (Self::RefundPending, Self::Refunded)
                | (Self::RefundPending, Self::RefundFailed)
        )
    }
}

impl PaymentMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Razorpay => "razorpay",
            Self::Cod => "cod",
        }
    }
}

/// Error for parsing a status string that is not part of the closed set.
#[derive(Debug, thiserror::Error)]
#[error("unrecognised status value: {0}")]
pub struct InvalidStatus(pub String);

impl FromStr for OrderStatus {
    type Err = InvalidStatus;
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "pending_payment" => Ok(Self::PendingPayment),
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "shipped" => Ok(Self::Shipped),
            "out_for_delivery" => Ok(Self::OutForDelivery),
            "delivered" => Ok(Self::Delivered),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(InvalidStatus(other.to_owned())),
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = InvalidStatus;
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "failed" => Ok(Self::Failed),
            "refund_pending" => Ok(Self::RefundPending),
            "refunded" => Ok(Self::Refunded),
            "refund_failed" => Ok(Self::RefundFailed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(InvalidStatus(other.to_owned())),
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = InvalidStatus;
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "razorpay" => Ok(Self::Razorpay),
            "cod" => Ok(Self::Cod),
            other => Err(InvalidStatus(other.to_owned())),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An order as stored in the database. Never deleted; mutated only by the
/// payment verifier, the webhook reconciler and cancellation. Serialised
/// directly into API responses, so field names follow the wire convention.
#[derive(sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    id: Uuid,
    pub user_id: Uuid,
    /// Human-facing unique order number, e.g. `SF-A1B2C3D4`.
    pub order_number: String,
    status: String,
    payment_status: String,
    payment_method: String,
    pub razorpay_order_id: Option<String>,
    pub razorpay_payment_id: Option<String>,
    pub refund_id: Option<String>,
    pub shipping_address_id: Uuid,
    pub billing_address_id: Uuid,
    /// Monetary breakdown in paise. Always satisfies
    /// total = subtotal - discount + shipping + tax.
    pub subtotal: i64,
    pub discount_amount: i64,
    pub discount_code: Option<String>,
    pub shipping_amount: i64,
    pub tax_amount: i64,
    pub total_amount: i64,
    pub notes: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_at: PrimitiveDateTime,
    pub confirmed_at: Option<PrimitiveDateTime>,
    pub shipped_at: Option<PrimitiveDateTime>,
    pub delivered_at: Option<PrimitiveDateTime>,
    pub cancelled_at: Option<PrimitiveDateTime>,
}

const ORDER_COLUMNS: &str = "id, user_id, order_number, status, payment_status, payment_method, \
     razorpay_order_id, razorpay_payment_id, refund_id, shipping_address_id, billing_address_id, \
     subtotal, discount_amount, discount_code, shipping_amount, tax_amount, total_amount, notes, \
     cancellation_reason, created_at, confirmed_at, shipped_at, delivered_at, cancelled_at";

/// INSERT model for an `orders` row. Built by the order assembler, stored by
/// the order persister.
pub struct OrderInsert {
    pub user_id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub razorpay_order_id: Option<String>,
    pub shipping_address_id: Uuid,
    pub billing_address_id: Uuid,
    pub subtotal: i64,
    pub discount_amount: i64,
    pub discount_code: Option<String>,
    pub shipping_amount: i64,
    pub tax_amount: i64,
    pub total_amount: i64,
    pub notes: Option<String>,
}

impl OrderInsert {
    /// Store this INSERT model inside the supplied transaction, so the header
    /// is never observable without its lines.
    pub async fn store(self, tx: &mut Transaction<'_>) -> Result<Order, DatabaseError> {
        Ok(sqlx::query_as::<_, Order>(&format!(
            "INSERT INTO orders (user_id, order_number, status, payment_status, payment_method, \
             razorpay_order_id, shipping_address_id, billing_address_id, subtotal, \
             discount_amount, discount_code, shipping_amount, tax_amount, total_amount, notes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(self.user_id)
        .bind(self.order_number)
        .bind(self.status.as_str())
        .bind(self.payment_status.as_str())
        .bind(self.payment_method.as_str())
        .bind(self.razorpay_order_id)
        .bind(self.shipping_address_id)
        .bind(self.billing_address_id)
        .bind(self.subtotal)
        .bind(self.discount_amount)
        .bind(self.discount_code)
        .bind(self.shipping_amount)
        .bind(self.tax_amount)
        .bind(self.total_amount)
        .bind(self.notes)
        .fetch_one(&mut **tx)
        .await?)
    }
}

impl Order {
    pub const fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
            .parse()
            .expect("Order status in database is outside the closed set")
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
            .parse()
            .expect("Payment status in database is outside the closed set")
    }

    pub fn payment_method(&self) -> PaymentMethod {
        self.payment_method
            .parse()
            .expect("Payment method in database is outside the closed set")
    }

    /// Whether stock was already reserved for this order: captured online
    /// payments reserve on confirmation, COD reserves at placement.
    pub fn stock_reserved(&self) -> bool {
        self.payment_status() == PaymentStatus::Paid
            || self.payment_method() == PaymentMethod::Cod
    }

    /// Select an order by ID, scoped to its owner.
    pub async fn select_one_for_user(
        id: Uuid,
        user_id: Uuid,
        db_client: &ConnectionPool,
    ) -> Result<Option<Self>, DatabaseError> {
        Ok(sqlx::query_as::<_, Self>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 AND user_id = $2"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(db_client)
        .await?)
    }

    /// Select an owner's order with its row locked for the remainder of the
    /// transaction. The lock serialises the verify-callback and webhook paths
    /// racing on the same order.
    pub async fn select_one_for_user_locked(
        id: Uuid,
        user_id: Uuid,
        tx: &mut Transaction<'_>,
    ) -> Result<Option<Self>, DatabaseError> {
        Ok(sqlx::query_as::<_, Self>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 AND user_id = $2 FOR UPDATE"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?)
    }

    /// Locked lookup by the gateway's own order id (webhook path).
    pub async fn select_by_gateway_order_id_locked(
        razorpay_order_id: &str,
        tx: &mut Transaction<'_>,
    ) -> Result<Option<Self>, DatabaseError> {
        Ok(sqlx::query_as::<_, Self>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE razorpay_order_id = $1 FOR UPDATE"
        ))
        .bind(razorpay_order_id)
        .fetch_optional(&mut **tx)
        .await?)
    }

    /// Locked lookup by the gateway payment id (refund.created path).
    pub async fn select_by_gateway_payment_id_locked(
        razorpay_payment_id: &str,
        tx: &mut Transaction<'_>,
    ) -> Result<Option<Self>, DatabaseError> {
        Ok(sqlx::query_as::<_, Self>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE razorpay_payment_id = $1 FOR UPDATE"
        ))
        .bind(razorpay_payment_id)
        .fetch_optional(&mut **tx)
        .await?)
    }

    /// Locked lookup by the gateway refund id (refund.processed/failed).
    pub async fn select_by_refund_id_locked(
        refund_id: &str,
        tx: &mut Transaction<'_>,
    ) -> Result<Option<Self>, DatabaseError> {
        Ok(sqlx::query_as::<_, Self>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE refund_id = $1 FOR UPDATE"
        ))
        .bind(refund_id)
        .fetch_optional(&mut **tx)
        .await?)
    }

    /// Page through a user's orders, newest first, optionally filtered by
    /// status. Returns the page and the unfiltered total for pagination.
    pub async fn select_page_for_user(
        user_id: Uuid,
        status: Option<OrderStatus>,
        limit: i64,
        offset: i64,
        db_client: &ConnectionPool,
    ) -> Result<(Vec<Self>, i64), DatabaseError> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, Self>(&format!(
                    "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 AND status = $2 \
                     ORDER BY created_at DESC LIMIT $3 OFFSET $4"
                ))
                .bind(user_id)
                .bind(status.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(db_client)
                .await?
            }
            None => {
                sqlx::query_as::<_, Self>(&format!(
                    "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 \
                     ORDER BY created_at DESC LIMIT $2 OFFSET $3"
                ))
                .bind(user_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(db_client)
                .await?
            }
        };
        let total: i64 = match status {
            Some(status) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE user_id = $1 AND status = $2")
                    .bind(user_id)
                    .bind(status.as_str())
                    .fetch_one(db_client)
                    .await?
            }
            None => sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(db_client)
                .await?,
        };
        Ok((rows, total))
    }

    /// Whether an order number is already taken, for collision checking.
    pub async fn order_number_exists(
        order_number: &str,
        db_client: &ConnectionPool,
    ) -> Result<bool, DatabaseError> {
        Ok(
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM orders WHERE order_number = $1)")
                .bind(order_number)
                .fetch_one(db_client)
                .await?,
        )
    }

    /// Apply the paid transition to the stored row: payment status `paid`,
    /// fulfilment advanced out of `pending_payment` only, payment id and
    /// `confirmed_at` stamped if absent.
    pub async fn apply_paid(
        id: Uuid,
        razorpay_payment_id: Option<&str>,
        executor: impl PgExecutor<'_>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE orders SET payment_status = 'paid', \
             status = CASE WHEN status = 'pending_payment' THEN 'pending' ELSE status END, \
             razorpay_payment_id = COALESCE($1, razorpay_payment_id), \
             confirmed_at = COALESCE(confirmed_at, NOW()), updated_at = NOW() WHERE id = $2",
        )
        .bind(razorpay_payment_id)
        .bind(id)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Record a money-flow transition without touching fulfilment status.
    pub async fn set_payment_status(
        id: Uuid,
        payment_status: PaymentStatus,
        executor: impl PgExecutor<'_>,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE orders SET payment_status = $1, updated_at = NOW() WHERE id = $2")
            .bind(payment_status.as_str())
            .bind(id)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Record that the gateway opened a refund for this order.
    pub async fn set_refund_initiated(
        id: Uuid,
        refund_id: &str,
        executor: impl PgExecutor<'_>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE orders SET payment_status = 'refund_pending', refund_id = $1, \
             updated_at = NOW() WHERE id = $2",
        )
        .bind(refund_id)
        .bind(id)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Flip the order to cancelled with the given money-flow outcome.
    pub async fn apply_cancelled(
        id: Uuid,
        payment_status: PaymentStatus,
        reason: Option<&str>,
        executor: impl PgExecutor<'_>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE orders SET status = 'cancelled', payment_status = $1, \
             cancellation_reason = $2, cancelled_at = NOW(), updated_at = NOW() WHERE id = $3",
        )
        .bind(payment_status.as_str())
        .bind(reason)
        .bind(id)
        .execute(executor)
        .await?;
        Ok(())
    }
}

/// An immutable snapshot of a cart line at order-creation time. The audit
/// record even if the catalog price later changes.
#[derive(sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub variant_name: Option<String>,
    pub quantity: i64,
    pub unit_price: i64,
    pub total_price: i64,
}

/// INSERT model for an `order_items` row.
pub struct OrderItemInsert {
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub variant_name: Option<String>,
    pub quantity: i64,
    pub unit_price: i64,
    pub total_price: i64,
}

impl OrderItemInsert {
    pub async fn store(self, tx: &mut Transaction<'_>) -> Result<OrderItem, DatabaseError> {
        Ok(sqlx::query_as::<_, OrderItem>(
            "INSERT INTO order_items (order_id, product_id, variant_id, variant_name, quantity, \
             unit_price, total_price) VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING id, order_id, product_id, variant_id, variant_name, quantity, unit_price, \
             total_price",
        )
        .bind(self.order_id)
        .bind(self.product_id)
        .bind(self.variant_id)
        .bind(self.variant_name)
        .bind(self.quantity)
        .bind(self.unit_price)
        .bind(self.total_price)
        .fetch_one(&mut **tx)
        .await?)
    }
}

impl OrderItem {
    pub const fn id(&self) -> Uuid {
        self.id
    }

    pub async fn select_all(
        order_id: Uuid,
        executor: impl PgExecutor<'_>,
    ) -> Result<Vec<Self>, DatabaseError> {
        Ok(sqlx::query_as::<_, Self>(
            "SELECT id, order_id, product_id, variant_id, variant_name, quantity, unit_price, \
             total_price FROM order_items WHERE order_id = $1",
        )
        .bind(order_id)
        .fetch_all(executor)
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_round_trip_through_strings() {
        for status in [
            OrderStatus::PendingPayment,
            OrderStatus::Pending,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::OutForDelivery,
            OrderStatus::Delivered,
            OrderStatus::Completed,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Paid,
            PaymentStatus::Failed,
            PaymentStatus::RefundPending,
            PaymentStatus::Refunded,
            PaymentStatus::RefundFailed,
            PaymentStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<PaymentStatus>().unwrap(), status);
        }
        assert!("definitely_not_a_status".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn only_pending_orders_are_cancellable() {
        assert!(OrderStatus::PendingPayment.is_cancellable());
        assert!(OrderStatus::Pending.is_cancellable());
        assert!(!OrderStatus::Processing.is_cancellable());
        assert!(!OrderStatus::Shipped.is_cancellable());
        assert!(!OrderStatus::Delivered.is_cancellable());
        assert!(!OrderStatus::Cancelled.is_cancellable());
    }

    #[test]
    fn payment_confirmation_only_advances_pending_payment() {
        assert_eq!(
            OrderStatus::PendingPayment.after_payment_confirmed(),
            OrderStatus::Pending
        );
        // A straggling webhook must not move a shipped order backwards.
        assert_eq!(
            OrderStatus::Shipped.after_payment_confirmed(),
            OrderStatus::Shipped
        );
        assert_eq!(
            OrderStatus::Cancelled.after_payment_confirmed(),
            OrderStatus::Cancelled
        );
    }

    #[test]
    fn orders_serialize_with_camel_case_keys() {
        let order = Order {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            order_number: String::from("SF-A1B2C3D4"),
            status: String::from("pending"),
            payment_status: String::from("paid"),
            payment_method: String::from("razorpay"),
            razorpay_order_id: Some(String::from("order_N9z1XgJLjR")),
            razorpay_payment_id: Some(String::from("pay_29QQoUBi66xm2f")),
            refund_id: None,
            shipping_address_id: Uuid::new_v4(),
            billing_address_id: Uuid::new_v4(),
            subtotal: 250_000,
            discount_amount: 0,
            discount_code: None,
            shipping_amount: 50_000,
            tax_amount: 45_000,
            total_amount: 345_000,
            notes: None,
            cancellation_reason: None,
            created_at: time::macros::datetime!(2026-08-01 12:00:00),
            confirmed_at: Some(time::macros::datetime!(2026-08-01 12:05:00)),
            shipped_at: None,
            delivered_at: None,
            cancelled_at: None,
        };
        let value = serde_json::to_value(&order).unwrap();
        assert_eq!(value["orderNumber"], "SF-A1B2C3D4");
        assert_eq!(value["paymentStatus"], "paid");
        assert_eq!(value["totalAmount"], 345_000);
        assert!(value.get("order_number").is_none());
        assert!(value.get("payment_status").is_none());

        let item = OrderItem {
            id: Uuid::new_v4(),
            order_id: order.id,
            product_id: Uuid::new_v4(),
            variant_id: None,
            variant_name: None,
            quantity: 2,
            unit_price: 125_000,
            total_price: 250_000,
        };
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["unitPrice"], 125_000);
        assert!(value.get("unit_price").is_none());
    }

    #[test]
    fn payment_status_graph_is_forward_only() {
        use PaymentStatus::{Cancelled, Failed, Paid, Pending, RefundFailed, RefundPending, Refunded};
        assert!(Pending.can_advance_to(Paid));
        assert!(Pending.can_advance_to(Failed));
        assert!(Pending.can_advance_to(Cancelled));
        assert!(Paid.can_advance_to(RefundPending));
        assert!(RefundPending.can_advance_to(Refunded));
        assert!(RefundPending.can_advance_to(RefundFailed));
        // No re-entry into paid, no skipping the refund pipeline.
        assert!(!Paid.can_advance_to(Paid));
        assert!(!Paid.can_advance_to(Pending));
        assert!(!Refunded.can_advance_to(Paid));
        assert!(!Paid.can_advance_to(Refunded));
        assert!(!Failed.can_advance_to(Paid));
    }
}
