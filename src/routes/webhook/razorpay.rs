//! The payment gateway webhook endpoint. The signature covers the exact raw
//! body bytes, so the body is taken unparsed and only deserialized after the
//! signature checks out. Once authenticated, the endpoint always answers 200:
//! a non-2xx would make the gateway retry events we have already acted on.
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};
use tracing::{error, warn};

use crate::{
    constants::razorpay::RAZORPAY_WEBHOOK_SECRET,
    services::payments::{self, WebhookEnvelope},
    state::AppState,
};

const SIGNATURE_HEADER: &str = "x-razorpay-signature";

pub fn create_router() -> Router<AppState> {
    Router::new().route("/", post(razorpay_webhook_event))
}

async fn razorpay_webhook_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let Some(signature) = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        warn!("Webhook delivery without a usable {SIGNATURE_HEADER} header");
        return StatusCode::BAD_REQUEST;
    };
    if !payments::verify_webhook_signature(&body, signature, &RAZORPAY_WEBHOOK_SECRET) {
        warn!("Webhook delivery with an invalid signature");
        return StatusCode::BAD_REQUEST;
    }

    let envelope: WebhookEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(err) => {
            // Authenticated but malformed; acknowledge so it is not retried.
            warn!("Webhook body failed to parse: {err}");
            return StatusCode::OK;
        }
    };
    if let Err(err) = payments::reconcile_event(&envelope, &state.db_conn).await {
        // Still 200: the gateway retrying will not fix a database outage,
        // and the reconciler is idempotent if the event does come again.
        error!(event = %envelope.event, "Failed to reconcile webhook event: {err}");
    }
    StatusCode::OK
}
