//! Payment gateway integration: opening gateway orders, verifying the two
//! HMAC signature schemes, and the shared idempotent paid transition driven
//! by both the client callback and the webhook reconciler.
use hmac::{Hmac, Mac as _};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    constants::razorpay as constants,
    db::{
        self,
        models::{
            activity_log::ActivityLogInsert,
            cart::Cart,
            order::{Order, OrderItem, PaymentStatus},
            product::{Product, ProductVariant},
        },
    },
};

type HmacSha256 = Hmac<Sha256>;

/// Compute the lowercase-hex HMAC-SHA256 of a payload.
fn hmac_hex(secret: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex-encoded HMAC-SHA256 signature.
fn verify_hmac_hex(secret: &str, payload: &[u8], signature_hex: &str) -> bool {
    let Ok(submitted) = hex::decode(signature_hex) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload);
    mac.verify_slice(&submitted).is_ok()
}

/// Verify a client-submitted payment confirmation signature:
/// `HMAC-SHA256(secret, "{gateway_order_id}|{payment_id}")`.
pub fn verify_payment_signature(
    gateway_order_id: &str,
    payment_id: &str,
    signature_hex: &str,
    secret: &str,
) -> bool {
    let payload = format!("{gateway_order_id}|{payment_id}");
    verify_hmac_hex(secret, payload.as_bytes(), signature_hex)
}

/// Verify a webhook signature over the exact raw body bytes.
pub fn verify_webhook_signature(raw_body: &[u8], signature_hex: &str, secret: &str) -> bool {
    verify_hmac_hex(secret, raw_body, signature_hex)
}

/// A thin client for the gateway's order-creation endpoint. Holds no state
/// beyond credentials and the reusable HTTP connection pool.
#[derive(Clone)]
pub struct RazorpayClient {
    http: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

#[derive(Deserialize)]
struct GatewayOrderResponse {
    id: String,
}

#[derive(Deserialize)]
struct GatewayErrorResponse {
    error: Option<GatewayErrorBody>,
}

#[derive(Deserialize)]
struct GatewayErrorBody {
    description: Option<String>,
}

impl RazorpayClient {
    pub fn from_env() -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: constants::RAZORPAY_API_BASE.clone(),
            key_id: constants::RAZORPAY_KEY_ID.clone(),
            key_secret: constants::RAZORPAY_KEY_SECRET.clone(),
        }
    }

    /// The public key id handed to the browser payment widget.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Open a gateway-side order. `amount` is in paise. Returns the gateway
    /// order id; any non-2xx response or transport failure is a hard error.
    pub async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        receipt: &str,
        notes: serde_json::Value,
    ) -> Result<String, errors::PaymentGatewayError> {
        let response = self
            .http
            .post(format!("{}/v1/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&json!({
                "amount": amount,
                "currency": currency,
                "receipt": receipt,
                "notes": notes,
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .json::<GatewayErrorResponse>()
                .await
                .ok()
                .and_then(|body| body.error)
                .and_then(|error| error.description)
                .unwrap_or_else(|| String::from("gateway returned an error"));
            return Err(errors::PaymentGatewayError::Rejected { status, message });
        }
        Ok(response.json::<GatewayOrderResponse>().await?.id)
    }
}

/// Outcome of the shared paid transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaidOutcome {
    /// The order was already `paid`; nothing was touched.
    AlreadyPaid,
    /// The order transitioned to `paid` in this call.
    Transitioned,
}

/// The transition decision for a payment confirmation, given the order's
/// current payment status. Pure, so the double-delivery behaviour is
/// testable without a database.
const fn paid_outcome(current: PaymentStatus) -> PaidOutcome {
    match current {
        PaymentStatus::Paid => PaidOutcome::AlreadyPaid,
        _ => PaidOutcome::Transitioned,
    }
}

/// Whether a refund notification may move an order's payment status to
/// `target`. A redelivered `refund.created` while already `refund_pending`
/// passes so the gateway refund id still gets stamped; everything else
/// follows the forward-only graph, so a late or duplicated refund event can
/// never reopen a settled refund or restore stock twice.
const fn refund_event_applies(current: PaymentStatus, target: PaymentStatus) -> bool {
    matches!(
        (current, target),
        (PaymentStatus::RefundPending, PaymentStatus::RefundPending)
    ) || current.can_advance_to(target)
}

/// The paid transition both the client callback and the webhook paths run.
/// The caller must hold the order's row lock (`FOR UPDATE`) in `tx`; combined
/// with the early `paid` check this makes redundant delivery a no-op and
/// guarantees stock is decremented exactly once per order.
pub async fn apply_paid_transition(
    order: &Order,
    gateway_payment_id: Option<&str>,
    tx: &mut db::Transaction<'_>,
) -> Result<PaidOutcome, db::errors::DatabaseError> {
    if paid_outcome(order.payment_status()) == PaidOutcome::AlreadyPaid {
        return Ok(PaidOutcome::AlreadyPaid);
    }
    Order::apply_paid(order.id(), gateway_payment_id, &mut **tx).await?;
    let items = OrderItem::select_all(order.id(), &mut **tx).await?;
    for item in &items {
        match item.variant_id {
            Some(variant_id) => {
                ProductVariant::decrement_stock_clamped(variant_id, item.quantity, &mut **tx)
                    .await?;
            }
            None => {
                Product::decrement_stock_clamped(item.product_id, item.quantity, &mut **tx)
                    .await?;
            }
        }
    }
    Cart::delete_active_for_user(order.user_id, tx).await?;
    Ok(PaidOutcome::Transitioned)
}

/// Accept a client-submitted payment confirmation and transition the order
/// to paid. Idempotent: an already-`paid` order short-circuits to success.
pub async fn verify_payment(
    user_id: Uuid,
    order_id: Uuid,
    gateway_payment_id: &str,
    signature: &str,
    db_conn: &db::ConnectionPool,
) -> Result<PaidOutcome, errors::PaymentVerificationError> {
    let mut tx = db_conn.begin().await.map_err(db::errors::DatabaseError::from)?;
    let order = Order::select_one_for_user_locked(order_id, user_id, &mut tx)
        .await?
        .ok_or(errors::PaymentVerificationError::OrderNonExistent { user_id, order_id })?;
    if paid_outcome(order.payment_status()) == PaidOutcome::AlreadyPaid {
        // Both this path and the webhook may fire; the second is a no-op.
        return Ok(PaidOutcome::AlreadyPaid);
    }
    let Some(ref gateway_order_id) = order.razorpay_order_id else {
        return Err(errors::PaymentVerificationError::NotAGatewayOrder(order_id));
    };
    if !verify_payment_signature(
        gateway_order_id,
        gateway_payment_id,
        signature,
        &constants::RAZORPAY_KEY_SECRET,
    ) {
        return Err(errors::PaymentVerificationError::SignatureMismatch(order_id));
    }
    apply_paid_transition(&order, Some(gateway_payment_id), &mut tx).await?;
    tx.commit().await.map_err(db::errors::DatabaseError::from)?;
    info!(order_id = %order_id, "payment verified via client callback");
    Ok(PaidOutcome::Transitioned)
}

// ---------------------------------------------------------------------------
// Webhook reconciliation
// ---------------------------------------------------------------------------

/// The envelope the gateway posts to the webhook endpoint.
#[derive(Deserialize)]
pub struct WebhookEnvelope {
    pub event: String,
    #[serde(default)]
    pub payload: WebhookPayload,
}

#[derive(Deserialize, Default)]
pub struct WebhookPayload {
    pub payment: Option<Wrapped<PaymentEntity>>,
    pub order: Option<Wrapped<OrderEntity>>,
    pub refund: Option<Wrapped<RefundEntity>>,
}

#[derive(Deserialize)]
pub struct Wrapped<T> {
    pub entity: T,
}

#[derive(Deserialize)]
pub struct PaymentEntity {
    pub id: String,
    pub order_id: Option<String>,
    pub amount: Option<i64>,
    pub error_description: Option<String>,
}

#[derive(Deserialize)]
pub struct OrderEntity {
    pub id: String,
}

#[derive(Deserialize)]
pub struct RefundEntity {
    pub id: String,
    pub payment_id: Option<String>,
    pub amount: Option<i64>,
}

/// Dispatch one verified webhook event. Unknown event types and unknown
/// orders are logged and skipped; only infrastructure failures propagate,
/// and the route still answers 200 for those.
pub async fn reconcile_event(
    envelope: &WebhookEnvelope,
    db_conn: &db::ConnectionPool,
) -> Result<(), db::errors::DatabaseError> {
    match envelope.event.as_str() {
        "payment.captured" => match envelope.payload.payment {
            Some(ref payment) => handle_payment_captured(&payment.entity, db_conn).await,
            None => {
                warn!("payment.captured event without a payment entity");
                Ok(())
            }
        },
        "payment.failed" => match envelope.payload.payment {
            Some(ref payment) => handle_payment_failed(&payment.entity, db_conn).await,
            None => {
                warn!("payment.failed event without a payment entity");
                Ok(())
            }
        },
        "payment.authorized" => {
            // Authorized but not yet captured; nothing to record.
            if let Some(ref payment) = envelope.payload.payment {
                info!(payment_id = %payment.entity.id, "payment authorized");
            }
            Ok(())
        }
        "order.paid" => match envelope.payload.order {
            Some(ref order) => handle_order_paid(&order.entity, db_conn).await,
            None => {
                warn!("order.paid event without an order entity");
                Ok(())
            }
        },
        "refund.created" => match envelope.payload.refund {
            Some(ref refund) => handle_refund_created(&refund.entity, db_conn).await,
            None => {
                warn!("refund.created event without a refund entity");
                Ok(())
            }
        },
        "refund.processed" => match envelope.payload.refund {
            Some(ref refund) => handle_refund_processed(&refund.entity, db_conn).await,
            None => {
                warn!("refund.processed event without a refund entity");
                Ok(())
            }
        },
        "refund.failed" => match envelope.payload.refund {
            Some(ref refund) => handle_refund_failed(&refund.entity, db_conn).await,
            None => {
                warn!("refund.failed event without a refund entity");
                Ok(())
            }
        },
        other => {
            info!(event = other, "ignoring unhandled gateway event");
            Ok(())
        }
    }
}

async fn handle_payment_captured(
    payment: &PaymentEntity,
    db_conn: &db::ConnectionPool,
) -> Result<(), db::errors::DatabaseError> {
    let Some(ref gateway_order_id) = payment.order_id else {
        warn!(payment_id = %payment.id, "captured payment carries no order id");
        return Ok(());
    };
    let mut tx = db_conn.begin().await?;
    let Some(order) = Order::select_by_gateway_order_id_locked(gateway_order_id, &mut tx).await?
    else {
        // Webhooks can arrive for orders from another environment/test mode.
        warn!(payment_id = %payment.id, gateway_order_id, "no order for captured payment");
        return Ok(());
    };
    let outcome = apply_paid_transition(&order, Some(&payment.id), &mut tx).await?;
    if outcome == PaidOutcome::Transitioned {
        ActivityLogInsert {
            user_id: order.user_id,
            action: String::from("payment_captured"),
            entity_type: String::from("order"),
            entity_id: order.id(),
            details: json!({ "paymentId": payment.id, "amount": payment.amount }),
        }
        .store(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    info!(order_number = %order.order_number, ?outcome, "payment captured");
    Ok(())
}

async fn handle_payment_failed(
    payment: &PaymentEntity,
    db_conn: &db::ConnectionPool,
) -> Result<(), db::errors::DatabaseError> {
    let Some(ref gateway_order_id) = payment.order_id else {
        warn!(payment_id = %payment.id, "failed payment carries no order id");
        return Ok(());
    };
    let mut tx = db_conn.begin().await?;
    let Some(order) = Order::select_by_gateway_order_id_locked(gateway_order_id, &mut tx).await?
    else {
        warn!(payment_id = %payment.id, gateway_order_id, "no order for failed payment");
        return Ok(());
    };
    // A failure notification racing a capture must not regress `paid`.
    if order.payment_status() != PaymentStatus::Pending {
        return Ok(());
    }
    Order::set_payment_status(order.id(), PaymentStatus::Failed, &mut *tx).await?;
    ActivityLogInsert {
        user_id: order.user_id,
        action: String::from("payment_failed"),
        entity_type: String::from("order"),
        entity_id: order.id(),
        details: json!({
            "paymentId": payment.id,
            "reason": payment.error_description.as_deref().unwrap_or("Unknown error"),
        }),
    }
    .store(&mut *tx)
    .await?;
    tx.commit().await?;
    info!(order_number = %order.order_number, "payment failed");
    Ok(())
}

async fn handle_order_paid(
    gateway_order: &OrderEntity,
    db_conn: &db::ConnectionPool,
) -> Result<(), db::errors::DatabaseError> {
    let mut tx = db_conn.begin().await?;
    let Some(order) = Order::select_by_gateway_order_id_locked(&gateway_order.id, &mut tx).await?
    else {
        warn!(gateway_order_id = %gateway_order.id, "no order for order.paid event");
        return Ok(());
    };
    let outcome = apply_paid_transition(&order, None, &mut tx).await?;
    if outcome == PaidOutcome::Transitioned {
        ActivityLogInsert {
            user_id: order.user_id,
            action: String::from("order_paid"),
            entity_type: String::from("order"),
            entity_id: order.id(),
            details: json!({ "gatewayOrderId": gateway_order.id }),
        }
        .store(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    info!(order_number = %order.order_number, ?outcome, "order paid");
    Ok(())
}

async fn handle_refund_created(
    refund: &RefundEntity,
    db_conn: &db::ConnectionPool,
) -> Result<(), db::errors::DatabaseError> {
    let Some(ref payment_id) = refund.payment_id else {
        warn!(refund_id = %refund.id, "refund carries no payment id");
        return Ok(());
    };
    let mut tx = db_conn.begin().await?;
    let Some(order) = Order::select_by_gateway_payment_id_locked(payment_id, &mut tx).await?
    else {
        warn!(refund_id = %refund.id, payment_id, "no order for refund");
        return Ok(());
    };
    if !refund_event_applies(order.payment_status(), PaymentStatus::RefundPending) {
        warn!(
            refund_id = %refund.id,
            current = %order.payment_status(),
            "ignoring refund.created for order not awaiting a refund"
        );
        return Ok(());
    }
    Order::set_refund_initiated(order.id(), &refund.id, &mut *tx).await?;
    ActivityLogInsert {
        user_id: order.user_id,
        action: String::from("refund_initiated"),
        entity_type: String::from("order"),
        entity_id: order.id(),
        details: json!({ "refundId": refund.id, "amount": refund.amount }),
    }
    .store(&mut *tx)
    .await?;
    tx.commit().await?;
    info!(order_number = %order.order_number, "refund initiated");
    Ok(())
}

async fn handle_refund_processed(
    refund: &RefundEntity,
    db_conn: &db::ConnectionPool,
) -> Result<(), db::errors::DatabaseError> {
    let mut tx = db_conn.begin().await?;
    let Some(order) = Order::select_by_refund_id_locked(&refund.id, &mut tx).await? else {
        warn!(refund_id = %refund.id, "no order for processed refund");
        return Ok(());
    };
    // Restore stock only on the first processed notification.
    if !refund_event_applies(order.payment_status(), PaymentStatus::Refunded) {
        return Ok(());
    }
    Order::set_payment_status(order.id(), PaymentStatus::Refunded, &mut *tx).await?;
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
    ActivityLogInsert {
        user_id: order.user_id,
        action: String::from("refund_processed"),
        entity_type: String::from("order"),
        entity_id: order.id(),
        details: json!({ "refundId": refund.id, "amount": refund.amount }),
    }
    .store(&mut *tx)
    .await?;
    tx.commit().await?;
    info!(order_number = %order.order_number, "refund processed");
    Ok(())
}

async fn handle_refund_failed(
    refund: &RefundEntity,
    db_conn: &db::ConnectionPool,
) -> Result<(), db::errors::DatabaseError> {
    let mut tx = db_conn.begin().await?;
    let Some(order) = Order::select_by_refund_id_locked(&refund.id, &mut tx).await? else {
        warn!(refund_id = %refund.id, "no order for failed refund");
        return Ok(());
    };
    if !refund_event_applies(order.payment_status(), PaymentStatus::RefundFailed) {
        warn!(
            refund_id = %refund.id,
            current = %order.payment_status(),
            "ignoring refund.failed for order not awaiting a refund"
        );
        return Ok(());
    }
    Order::set_payment_status(order.id(), PaymentStatus::RefundFailed, &mut *tx).await?;
    ActivityLogInsert {
        user_id: order.user_id,
        action: String::from("refund_failed"),
        entity_type: String::from("order"),
        entity_id: order.id(),
        details: json!({ "refundId": refund.id }),
    }
    .store(&mut *tx)
    .await?;
    tx.commit().await?;
    info!(order_number = %order.order_number, "refund failed");
    Ok(())
}

pub mod errors {
    use crate::db::errors::DatabaseError;
    use thiserror::Error;
    use uuid::Uuid;

    /// Errors from the gateway order-creation call.
    #[derive(Error, Debug)]
    pub enum PaymentGatewayError {
        /// Transport-level failure reaching the gateway.
        #[error(transparent)]
        Transport(#[from] reqwest::Error),
        /// The gateway answered with a non-success status.
        #[error("payment gateway rejected the request ({status}): {message}")]
        Rejected { status: u16, message: String },
    }

    /// Errors from the client-callback payment verification.
    #[derive(Error, Debug)]
    pub enum PaymentVerificationError {
        #[error(transparent)]
        DatabaseError(#[from] DatabaseError),
        #[error("Order does not exist for this user")]
        OrderNonExistent { user_id: Uuid, order_id: Uuid },
        #[error("Order has no associated gateway order")]
        NotAGatewayOrder(Uuid),
        #[error("Payment signature did not match")]
        SignatureMismatch(Uuid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test_webhook_secret";

    #[test]
    fn payment_signature_round_trip() {
        let signature = hmac_hex(SECRET, b"order_N9z1XgJLjR|pay_29QQoUBi66xm2f");
        assert!(verify_payment_signature(
            "order_N9z1XgJLjR",
            "pay_29QQoUBi66xm2f",
            &signature,
            SECRET,
        ));
    }

    #[test]
    fn payment_signature_rejects_tampering() {
        let signature = hmac_hex(SECRET, b"order_N9z1XgJLjR|pay_29QQoUBi66xm2f");
        // Wrong payment id, wrong secret, malformed hex.
        assert!(!verify_payment_signature(
            "order_N9z1XgJLjR",
            "pay_different",
            &signature,
            SECRET,
        ));
        assert!(!verify_payment_signature(
            "order_N9z1XgJLjR",
            "pay_29QQoUBi66xm2f",
            &signature,
            "other_secret",
        ));
        assert!(!verify_payment_signature(
            "order_N9z1XgJLjR",
            "pay_29QQoUBi66xm2f",
            "not-hex!",
            SECRET,
        ));
    }

    #[test]
    fn webhook_signature_covers_exact_bytes() {
        let body = br#"{"event":"payment.captured","payload":{}}"#;
        let signature = hmac_hex(SECRET, body);
        assert!(verify_webhook_signature(body, &signature, SECRET));
        // Re-serialised JSON with different whitespace must not verify.
        let reserialised = br#"{"event": "payment.captured", "payload": {}}"#;
        assert!(!verify_webhook_signature(reserialised, &signature, SECRET));
    }

    #[test]
    fn webhook_envelope_decodes_payment_events() {
        let raw = r#"{
            "event": "payment.captured",
            "payload": {
                "payment": {
                    "entity": {
                        "id": "pay_1",
                        "order_id": "order_1",
                        "amount": 286000,
                        "error_description": null
                    }
                }
            }
        }"#;
        let envelope: WebhookEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.event, "payment.captured");
        let payment = envelope.payload.payment.unwrap().entity;
        assert_eq!(payment.id, "pay_1");
        assert_eq!(payment.order_id.as_deref(), Some("order_1"));
        assert_eq!(payment.amount, Some(286_000));
    }

    #[test]
    fn webhook_envelope_tolerates_missing_payload() {
        let envelope: WebhookEnvelope =
            serde_json::from_str(r#"{"event":"invoice.expired"}"#).unwrap();
        assert_eq!(envelope.event, "invoice.expired");
        assert!(envelope.payload.payment.is_none());
        assert!(envelope.payload.order.is_none());
        assert!(envelope.payload.refund.is_none());
    }

    #[test]
    fn redundant_payment_confirmation_is_a_no_op() {
        // First delivery transitions, any later one short-circuits, so the
        // stock decrement and cart deletion run at most once per order.
        assert_eq!(
            paid_outcome(PaymentStatus::Pending),
            PaidOutcome::Transitioned
        );
        assert_eq!(paid_outcome(PaymentStatus::Paid), PaidOutcome::AlreadyPaid);
    }

    #[test]
    fn refund_events_cannot_regress_payment_status() {
        use PaymentStatus::{Pending, Refunded, RefundFailed, RefundPending};

        assert!(refund_event_applies(
            PaymentStatus::Paid,
            RefundPending
        ));
        // A redelivered refund.created re-stamps the refund id.
        assert!(refund_event_applies(RefundPending, RefundPending));
        assert!(refund_event_applies(RefundPending, Refunded));
        assert!(refund_event_applies(RefundPending, RefundFailed));
        // A settled refund stays settled; stock is restored at most once.
        assert!(!refund_event_applies(Refunded, Refunded));
        assert!(!refund_event_applies(Refunded, RefundPending));
        assert!(!refund_event_applies(Refunded, RefundFailed));
        assert!(!refund_event_applies(RefundFailed, Refunded));
        // Refund events for a never-paid order are ignored.
        assert!(!refund_event_applies(Pending, Refunded));
        assert!(!refund_event_applies(Pending, RefundPending));
    }

    #[test]
    fn refund_envelope_decodes() {
        let raw = r#"{
            "event": "refund.processed",
            "payload": { "refund": { "entity": { "id": "rfnd_9", "payment_id": "pay_1", "amount": 1000 } } }
        }"#;
        let envelope: WebhookEnvelope = serde_json::from_str(raw).unwrap();
        let refund = envelope.payload.refund.unwrap().entity;
        assert_eq!(refund.id, "rfnd_9");
        assert_eq!(refund.payment_id.as_deref(), Some("pay_1"));
    }
}
