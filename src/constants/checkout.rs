//! Tunables for checkout pricing. All monetary values are integer paise.
use std::{env::var, sync::LazyLock};

/// Orders with a subtotal at or above this get free shipping (₹5000).
pub static FREE_SHIPPING_THRESHOLD: LazyLock<i64> = LazyLock::new(|| {
    var("FREE_SHIPPING_THRESHOLD")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(500_000)
});

/// Flat shipping fee below the free-shipping threshold (₹500).
pub static FLAT_SHIPPING_FEE: LazyLock<i64> = LazyLock::new(|| {
    var("FLAT_SHIPPING_FEE")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(50_000)
});

/// GST rate in basis points applied to (subtotal - discount). 18% default.
pub static TAX_RATE_BASIS_POINTS: LazyLock<i64> = LazyLock::new(|| {
    var("TAX_RATE_BASIS_POINTS")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(1800)
});
