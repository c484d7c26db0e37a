use std::{env::var, sync::LazyLock};

use super::secrets::read_secret;

/// The public key identifier sent to the browser for the payment widget.
pub static RAZORPAY_KEY_ID: LazyLock<String> = LazyLock::new(|| {
    var("RAZORPAY_KEY_ID").expect("RAZORPAY_KEY_ID not set in environment variables.")
});

/// The private API secret, also the key for client-callback signatures.
pub static RAZORPAY_KEY_SECRET: LazyLock<String> = LazyLock::new(|| {
    var("RAZORPAY_KEY_SECRET").unwrap_or_else(|_| {
        let secret_path = var("RAZORPAY_KEY_SECRET_DOCKER_SECRET").expect(
            "Neither RAZORPAY_KEY_SECRET nor RAZORPAY_KEY_SECRET_DOCKER_SECRET provided in environment variables"
        );
        read_secret(&secret_path).expect("Failed to read RAZORPAY_KEY_SECRET docker secret")
    })
});

/// The shared secret for webhook signatures. Falls back to the API secret,
/// which is what the gateway uses when no dedicated webhook secret is set.
pub static RAZORPAY_WEBHOOK_SECRET: LazyLock<String> = LazyLock::new(|| {
    var("RAZORPAY_WEBHOOK_SECRET").unwrap_or_else(|_| RAZORPAY_KEY_SECRET.clone())
});

/// Base URL of the gateway REST API. Overridable so tests can point at a stub.
pub static RAZORPAY_API_BASE: LazyLock<String> = LazyLock::new(|| {
    var("RAZORPAY_API_BASE").unwrap_or_else(|_| String::from("https://api.razorpay.com"))
});
