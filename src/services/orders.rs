//! Order retrieval and owner-initiated cancellation. Once persisted, an
//! order is mutated only here, by the payment verifier and by the webhook
//! reconciler.
use serde::Serialize;
use time::PrimitiveDateTime;
use tracing::info;
use uuid::Uuid;

use crate::db::{
    self,
    models::{
        address::Address,
        order::{Order, OrderItem, OrderStatus, PaymentMethod, PaymentStatus},
        product::{Product, ProductVariant},
    },
};

/// An order with its line snapshots and address details, for the detail view.
pub struct OrderDetail {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub shipping_address: Option<Address>,
    pub billing_address: Option<Address>,
}

/// A page of a user's orders with their lines, newest first.
pub struct OrderPage {
    pub orders: Vec<(Order, Vec<OrderItem>)>,
    pub total: i64,
}

pub async fn get_order(
    order_id: Uuid,
    user_id: Uuid,
    db_conn: &db::ConnectionPool,
) -> Result<Option<OrderDetail>, db::errors::DatabaseError> {
    let Some(order) = Order::select_one_for_user(order_id, user_id, db_conn).await? else {
        return Ok(None);
    };
    let items = OrderItem::select_all(order.id(), db_conn).await?;
    let shipping_address = Address::select_one(order.shipping_address_id, db_conn).await?;
    let billing_address = Address::select_one(order.billing_address_id, db_conn).await?;
    Ok(Some(OrderDetail {
        order,
        items,
        shipping_address,
        billing_address,
    }))
}

pub async fn list_orders(
    user_id: Uuid,
    status: Option<OrderStatus>,
    page: i64,
    per_page: i64,
    db_conn: &db::ConnectionPool,
) -> Result<OrderPage, db::errors::DatabaseError> {
    let offset = (page - 1) * per_page;
    let (orders, total) =
        Order::select_page_for_user(user_id, status, per_page, offset, db_conn).await?;
    let mut with_items = Vec::with_capacity(orders.len());
    for order in orders {
        let items = OrderItem::select_all(order.id(), db_conn).await?;
        with_items.push((order, items));
    }
    Ok(OrderPage {
        orders: with_items,
        total,
    })
}

/// Outcome of a cancellation, distinguishing whether money must flow back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancellationOutcome {
    /// Nothing was ever charged.
    Cancelled,
    /// Payment was captured; a refund has been queued for reconciliation.
    RefundPending,
}

/// Cancel a not-yet-fulfilled order owned by the user. Restores stock when
/// payment was captured (online `paid` or COD, which reserves at placement).
/// Actual refund issuance happens out-of-band and is reconciled via the
/// webhook path.
pub async fn cancel_order(
    order_id: Uuid,
    user_id: Uuid,
    reason: Option<&str>,
    db_conn: &db::ConnectionPool,
) -> Result<CancellationOutcome, errors::OrderCancellationError> {
    let mut tx = db_conn.begin().await.map_err(db::errors::DatabaseError::from)?;
    let order = Order::select_one_for_user_locked(order_id, user_id, &mut tx)
        .await?
        .ok_or(errors::OrderCancellationError::OrderNonExistent { user_id, order_id })?;
    let status = order.status();
    if !status.is_cancellable() {
        return Err(errors::OrderCancellationError::NotCancellable { current: status });
    }

    if order.stock_reserved() {
        let items = OrderItem::select_all(order.id(), &mut *tx).await?;
        for item in &items {
            match item.variant_id {
                Some(variant_id) => {
                    ProductVariant::increment_stock(variant_id, item.quantity, &mut *tx).await?;
                }
                None => {
                    Product::increment_stock(item.product_id, item.quantity, &mut *tx).await?;
                }
            }
        }
    }

    let outcome = if order.payment_status() == PaymentStatus::Paid {
        CancellationOutcome::RefundPending
    } else {
        CancellationOutcome::Cancelled
    };
    let next_payment_status = match outcome {
        CancellationOutcome::RefundPending => PaymentStatus::RefundPending,
        CancellationOutcome::Cancelled => PaymentStatus::Cancelled,
    };
    Order::apply_cancelled(order.id(), next_payment_status, reason, &mut *tx).await?;
    tx.commit().await.map_err(db::errors::DatabaseError::from)?;
    info!(order_number = %order.order_number, ?outcome, "order cancelled");
    Ok(outcome)
}

/// One step of the tracking timeline shown to the customer.
#[derive(Serialize, PartialEq, Eq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TimelineStep {
    pub status: &'static str,
    pub label: &'static str,
    pub date: Option<PrimitiveDateTime>,
    pub completed: bool,
}

/// Derive the tracking timeline from an order's status and timestamps.
/// Cancelled orders show the placement step plus a terminal cancelled entry.
pub fn tracking_timeline(order: &Order) -> Vec<TimelineStep> {
    let status = order.status();
    let mut timeline = vec![TimelineStep {
        status: "ordered",
        label: "Order Placed",
        date: Some(order.created_at),
        completed: true,
    }];

    if status == OrderStatus::Cancelled {
        timeline.push(TimelineStep {
            status: "cancelled",
            label: "Cancelled",
            date: order.cancelled_at,
            completed: true,
        });
        return timeline;
    }

    let paid = order.payment_status() == PaymentStatus::Paid
        || order.payment_method() == PaymentMethod::Cod;
    let reached = |stage: OrderStatus| stage_rank(status) >= stage_rank(stage);

    timeline.push(TimelineStep {
        status: "confirmed",
        label: "Payment Confirmed",
        date: order.confirmed_at.or(Some(order.created_at)).filter(|_| paid),
        completed: paid,
    });
    timeline.push(TimelineStep {
        status: "processing",
        label: "Order Processing",
        date: order.confirmed_at.filter(|_| reached(OrderStatus::Processing)),
        completed: reached(OrderStatus::Processing),
    });
    timeline.push(TimelineStep {
        status: "shipped",
        label: "Shipped",
        date: order.shipped_at.filter(|_| reached(OrderStatus::Shipped)),
        completed: reached(OrderStatus::Shipped),
    });
    timeline.push(TimelineStep {
        status: "out_for_delivery",
        label: "Out for Delivery",
        date: order.shipped_at.filter(|_| reached(OrderStatus::OutForDelivery)),
        completed: reached(OrderStatus::OutForDelivery),
    });
    timeline.push(TimelineStep {
        status: "delivered",
        label: "Delivered",
        date: order.delivered_at.filter(|_| reached(OrderStatus::Delivered)),
        completed: reached(OrderStatus::Delivered),
    });
    timeline
}

/// Position of a status along the fulfilment pipeline.
const fn stage_rank(status: OrderStatus) -> u8 {
    match status {
        OrderStatus::PendingPayment => 0,
        OrderStatus::Pending => 1,
        OrderStatus::Processing => 2,
        OrderStatus::Shipped => 3,
        OrderStatus::OutForDelivery => 4,
        OrderStatus::Delivered | OrderStatus::Completed => 5,
        OrderStatus::Cancelled => 0,
    }
}

pub mod errors {
    use crate::db::{errors::DatabaseError, models::order::OrderStatus};
    use thiserror::Error;
    use uuid::Uuid;

    #[derive(Error, Debug)]
    pub enum OrderCancellationError {
        #[error(transparent)]
        DatabaseError(#[from] DatabaseError),
        #[error("Order does not exist for this user")]
        OrderNonExistent { user_id: Uuid, order_id: Uuid },
        #[error("Order cannot be cancelled while {current}")]
        NotCancellable { current: OrderStatus },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_ranks_are_strictly_ordered_along_the_pipeline() {
        assert!(stage_rank(OrderStatus::PendingPayment) < stage_rank(OrderStatus::Pending));
        assert!(stage_rank(OrderStatus::Pending) < stage_rank(OrderStatus::Processing));
        assert!(stage_rank(OrderStatus::Processing) < stage_rank(OrderStatus::Shipped));
        assert!(stage_rank(OrderStatus::Shipped) < stage_rank(OrderStatus::OutForDelivery));
        assert!(stage_rank(OrderStatus::OutForDelivery) < stage_rank(OrderStatus::Delivered));
        assert_eq!(
            stage_rank(OrderStatus::Delivered),
            stage_rank(OrderStatus::Completed)
        );
    }
}
