//! Webhook API endpoints, used for reconciling payment gateway events.
use axum::Router;

use crate::state::AppState;

mod razorpay;

/// Creates a router for all webhook interfaces.
pub fn create_router() -> Router<AppState> {
    Router::new().nest("/razorpay", razorpay::create_router())
}
