//! Defines the state shared across the Axum application.
use crate::{
    db,
    services::{payments::RazorpayClient, sessions, totals::CheckoutConfig},
};

#[derive(Clone)]
/// The state struct shared across routers.
pub struct AppState {
    /// A database connection pool for getting new database connections.
    pub db_conn: db::ConnectionPool,
    /// A multiplexed connection for getting new session store connections.
    pub session_store_conn: sessions::store::Connection,
    /// The payment gateway client used to open gateway-side orders.
    pub gateway: RazorpayClient,
    /// Pricing tunables, resolved once at startup.
    pub checkout_config: CheckoutConfig,
}
