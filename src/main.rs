//! Service entry point: wires up logging, the database pool, the session
//! store and the payment gateway client, then serves the API.
use tracing::info;
use tracing_subscriber::EnvFilter;

mod constants;
mod db;
mod middleware;
mod routes;
mod services;
mod state;
mod utils;

use constants::api::{API_URI_PREFIX, BIND_ADDRESS};
use services::{payments::RazorpayClient, sessions, totals::CheckoutConfig};
use state::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let db_conn = db::connect()
        .await
        .expect("Failed to connect to the database");
    let session_store_conn = sessions::store::Connection::connect()
        .await
        .expect("Failed to connect to the session store");
    let state = AppState {
        db_conn,
        session_store_conn,
        gateway: RazorpayClient::from_env(),
        checkout_config: CheckoutConfig::from_env(),
    };

    let app = axum::Router::new()
        .route("/", axum::routing::get(root))
        .nest(
            &format!("{}/cart", *API_URI_PREFIX),
            routes::cart::create_router(),
        )
        .nest(
            &format!("{}/orders", *API_URI_PREFIX),
            routes::orders::create_router(&state),
        )
        .nest(
            &format!("{}/webhooks", *API_URI_PREFIX),
            routes::webhook::create_router(),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(BIND_ADDRESS.as_str())
        .await
        .expect("Failed to bind listener");
    info!("Listening on {}", *BIND_ADDRESS);
    axum::serve(listener, app)
        .await
        .expect("Failed to init Axum service");
}

async fn root() -> String {
    "Storefront API is running!".to_string()
}
