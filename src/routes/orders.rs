//! Routes for order creation, retrieval, payment verification and
//! cancellation. Everything here requires an authenticated customer session.
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::{
    db::models::{
        address::Address,
        order::{Order, OrderItem, OrderStatus, PaymentMethod},
    },
    middleware::session::session_middleware,
    services::{
        checkout::{self, CheckoutRequest, GatewayCheckoutParams},
        orders::{self, CancellationOutcome, TimelineStep},
        payments::{self, PaidOutcome},
        sessions::CustomerSession,
    },
    state::AppState,
    utils::httperror::HttpError,
};

pub fn create_router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/", post(create_order))
        .route("/{order_id}", get(retrieve_order))
        .route("/{order_id}/verify-payment", post(verify_payment))
        .route("/{order_id}/cancel", post(cancel_order))
        .route("/{order_id}/track", get(track_order))
        .layer(from_fn_with_state(state.clone(), session_middleware))
}

#[derive(Deserialize)]
struct ListOrdersQuery {
    status: Option<String>,
    page: Option<i64>,
    per_page: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderWithItems {
    #[serde(flatten)]
    order: Order,
    items: Vec<OrderItem>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListOrdersResponse {
    orders: Vec<OrderWithItems>,
    page: i64,
    per_page: i64,
    total: i64,
}

async fn list_orders(
    State(state): State<AppState>,
    Extension(session): Extension<CustomerSession>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<ListOrdersResponse>, HttpError> {
    let status = match query.status {
        Some(ref raw) => Some(raw.parse::<OrderStatus>().map_err(|_err| {
            HttpError::new(
                StatusCode::BAD_REQUEST,
                Some(format!("Unknown order status: {raw}")),
            )
        })?),
        None => None,
    };
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(10).clamp(1, 50);
    let result = orders::list_orders(session.user_id(), status, page, per_page, &state.db_conn)
        .await?;
    Ok(Json(ListOrdersResponse {
        orders: result
            .orders
            .into_iter()
            .map(|(order, items)| OrderWithItems { order, items })
            .collect(),
        page,
        per_page,
        total: result.total,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateOrderRequest {
    shipping_address_id: Uuid,
    billing_address_id: Option<Uuid>,
    payment_method: String,
    notes: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GatewayParamsResponse {
    order_id: String,
    amount: i64,
    currency: String,
    key_id: String,
}

impl From<GatewayCheckoutParams> for GatewayParamsResponse {
    fn from(params: GatewayCheckoutParams) -> Self {
        Self {
            order_id: params.gateway_order_id,
            amount: params.amount,
            currency: params.currency,
            key_id: params.key_id,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateOrderResponse {
    order: Order,
    #[serde(skip_serializing_if = "Option::is_none")]
    razorpay: Option<GatewayParamsResponse>,
}

async fn create_order(
    State(state): State<AppState>,
    Extension(session): Extension<CustomerSession>,
    Json(body): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CreateOrderResponse>), HttpError> {
    let payment_method = body.payment_method.parse::<PaymentMethod>().map_err(|_err| {
        HttpError::new(
            StatusCode::BAD_REQUEST,
            Some(format!("Unsupported payment method: {}", body.payment_method)),
        )
    })?;
    let draft = checkout::assemble_order(
        session.user_id(),
        &CheckoutRequest {
            shipping_address_id: body.shipping_address_id,
            billing_address_id: body.billing_address_id,
            payment_method,
            notes: body.notes,
        },
        &state.checkout_config,
        &state.db_conn,
    )
    .await?;
    let placed = checkout::place_order(draft, &state.gateway, &state.db_conn).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateOrderResponse {
            order: placed.order,
            razorpay: placed.gateway.map(GatewayParamsResponse::from),
        }),
    ))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RetrieveOrderResponse {
    #[serde(flatten)]
    order: Order,
    items: Vec<OrderItem>,
    shipping_address: Option<Address>,
    billing_address: Option<Address>,
}

async fn retrieve_order(
    State(state): State<AppState>,
    Extension(session): Extension<CustomerSession>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<RetrieveOrderResponse>, HttpError> {
    let detail = orders::get_order(order_id, session.user_id(), &state.db_conn)
        .await?
        .ok_or_else(|| {
            warn!(
                "User {} requested order {order_id}, which does not exist for them.",
                session.user_id()
            );
            // 404 either way, so order ids cannot be probed across users.
            HttpError::from(StatusCode::NOT_FOUND)
        })?;
    Ok(Json(RetrieveOrderResponse {
        order: detail.order,
        items: detail.items,
        shipping_address: detail.shipping_address,
        billing_address: detail.billing_address,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyPaymentRequest {
    razorpay_payment_id: String,
    razorpay_signature: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyPaymentResponse {
    payment_status: &'static str,
    already_paid: bool,
}

async fn verify_payment(
    State(state): State<AppState>,
    Extension(session): Extension<CustomerSession>,
    Path(order_id): Path<Uuid>,
    Json(body): Json<VerifyPaymentRequest>,
) -> Result<Json<VerifyPaymentResponse>, HttpError> {
    let outcome = payments::verify_payment(
        session.user_id(),
        order_id,
        &body.razorpay_payment_id,
        &body.razorpay_signature,
        &state.db_conn,
    )
    .await?;
    Ok(Json(VerifyPaymentResponse {
        payment_status: "paid",
        already_paid: outcome == PaidOutcome::AlreadyPaid,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelOrderRequest {
    reason: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CancelOrderResponse {
    status: &'static str,
    refund_pending: bool,
}

async fn cancel_order(
    State(state): State<AppState>,
    Extension(session): Extension<CustomerSession>,
    Path(order_id): Path<Uuid>,
    // The body is entirely optional; a bare POST cancels without a reason.
    body: Option<Json<CancelOrderRequest>>,
) -> Result<Json<CancelOrderResponse>, HttpError> {
    let reason = body.and_then(|Json(body)| body.reason);
    let outcome = orders::cancel_order(
        order_id,
        session.user_id(),
        reason.as_deref(),
        &state.db_conn,
    )
    .await?;
    Ok(Json(CancelOrderResponse {
        status: "cancelled",
        refund_pending: outcome == CancellationOutcome::RefundPending,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TrackOrderResponse {
    order_number: String,
    status: OrderStatus,
    timeline: Vec<TimelineStep>,
}

async fn track_order(
    State(state): State<AppState>,
    Extension(session): Extension<CustomerSession>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<TrackOrderResponse>, HttpError> {
    let detail = orders::get_order(order_id, session.user_id(), &state.db_conn)
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(TrackOrderResponse {
        order_number: detail.order.order_number.clone(),
        status: detail.order.status(),
        timeline: orders::tracking_timeline(&detail.order),
    }))
}

impl From<checkout::errors::OrderAssemblyError> for HttpError {
    fn from(error: checkout::errors::OrderAssemblyError) -> Self {
        use checkout::errors::OrderAssemblyError;
        match error {
            OrderAssemblyError::DatabaseError(err) => err.into(),
            OrderAssemblyError::EmptyCart => Self::new(
                StatusCode::BAD_REQUEST,
                Some(String::from("Cart is empty")),
            ),
            OrderAssemblyError::ProductUnavailable { name } => Self::new(
                StatusCode::CONFLICT,
                Some(format!("{name} is no longer available")),
            ),
            OrderAssemblyError::InsufficientStock { name, available } => Self::new(
                StatusCode::CONFLICT,
                Some(format!("Only {available} of {name} in stock")),
            ),
            OrderAssemblyError::InvalidAddress => {
                warn!("Checkout with an address that does not belong to the user.");
                // 400 not 403: address ids are not guessable secrets.
                Self::new(
                    StatusCode::BAD_REQUEST,
                    Some(String::from("Invalid address")),
                )
            }
            OrderAssemblyError::OrderNumberExhausted => {
                warn!("Could not generate a unique order number after several attempts.");
                Self::from(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

impl From<checkout::errors::OrderPlacementError> for HttpError {
    fn from(error: checkout::errors::OrderPlacementError) -> Self {
        use checkout::errors::OrderPlacementError;
        match error {
            OrderPlacementError::DatabaseError(err) => err.into(),
            OrderPlacementError::GatewayError(err) => {
                warn!("Payment gateway error while placing order: {err}");
                // Gateway details stay in the log, never in the response.
                Self::new(
                    StatusCode::BAD_GATEWAY,
                    Some(String::from("Payment gateway is unavailable")),
                )
            }
            OrderPlacementError::StockConflict { product_id } => {
                warn!("Stock for product {product_id} changed while placing an order.");
                Self::new(
                    StatusCode::CONFLICT,
                    Some(String::from("Stock changed while placing the order")),
                )
            }
        }
    }
}

impl From<payments::errors::PaymentVerificationError> for HttpError {
    fn from(error: payments::errors::PaymentVerificationError) -> Self {
        use payments::errors::PaymentVerificationError;
        match error {
            PaymentVerificationError::DatabaseError(err) => err.into(),
            PaymentVerificationError::OrderNonExistent { user_id, order_id } => {
                warn!("User {user_id} attempted to verify payment for unknown order {order_id}.");
                Self::from(StatusCode::NOT_FOUND)
            }
            PaymentVerificationError::NotAGatewayOrder(order_id) => {
                warn!("Payment verification for order {order_id}, which has no gateway order.");
                Self::new(
                    StatusCode::BAD_REQUEST,
                    Some(String::from("Order does not use online payment")),
                )
            }
            PaymentVerificationError::SignatureMismatch(order_id) => {
                warn!("Payment signature mismatch for order {order_id}.");
                Self::new(
                    StatusCode::BAD_REQUEST,
                    Some(String::from("Payment verification failed")),
                )
            }
        }
    }
}

impl From<orders::errors::OrderCancellationError> for HttpError {
    fn from(error: orders::errors::OrderCancellationError) -> Self {
        use orders::errors::OrderCancellationError;
        match error {
            OrderCancellationError::DatabaseError(err) => err.into(),
            OrderCancellationError::OrderNonExistent { user_id, order_id } => {
                warn!("User {user_id} attempted to cancel unknown order {order_id}.");
                Self::from(StatusCode::NOT_FOUND)
            }
            OrderCancellationError::NotCancellable { current } => Self::new(
                StatusCode::CONFLICT,
                Some(format!("Order cannot be cancelled while {current}")),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CancelOrderRequest;

    #[test]
    fn cancellation_reason_is_optional() {
        // The handler takes Option<Json<CancelOrderRequest>>, so a bare POST
        // with no body already works; a body without a reason must too.
        let bare: CancelOrderRequest = serde_json::from_str("{}").unwrap();
        assert!(bare.reason.is_none());
        let with_reason: CancelOrderRequest =
            serde_json::from_str(r#"{"reason":"Ordered the wrong size"}"#).unwrap();
        assert_eq!(with_reason.reason.as_deref(), Some("Ordered the wrong size"));
    }
}
