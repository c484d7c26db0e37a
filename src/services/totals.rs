//! Pure pricing arithmetic for carts and orders. Everything here is integer
//! paise; tax is rounded half-up to the smallest currency unit. Kept free of
//! database access so the invariants are unit-testable.
use crate::constants::checkout as constants;

/// Checkout pricing tunables, normally sourced from the environment but
/// passed explicitly so pricing can be exercised without it.
#[derive(Clone, Copy, Debug)]
pub struct CheckoutConfig {
    /// Subtotal (paise) at or above which shipping is free.
    pub free_shipping_threshold: i64,
    /// Flat shipping fee (paise) below the threshold.
    pub flat_shipping_fee: i64,
    /// Tax rate in basis points applied to (subtotal - discount).
    pub tax_rate_basis_points: i64,
}

impl CheckoutConfig {
    pub fn from_env() -> Self {
        Self {
            free_shipping_threshold: *constants::FREE_SHIPPING_THRESHOLD,
            flat_shipping_fee: *constants::FLAT_SHIPPING_FEE,
            tax_rate_basis_points: *constants::TAX_RATE_BASIS_POINTS,
        }
    }
}

/// A complete monetary breakdown. Always satisfies
/// `total = subtotal - discount + shipping + tax`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Totals {
    pub subtotal: i64,
    pub discount: i64,
    pub shipping: i64,
    pub tax: i64,
    pub total: i64,
}

/// Tax on a taxable amount, rounded half-up to the paise.
fn tax_on(taxable: i64, rate_basis_points: i64) -> i64 {
    (taxable * rate_basis_points + 5_000) / 10_000
}

/// Breakdown for an order: discount, then shipping by threshold, then tax on
/// the discounted subtotal.
pub fn order_totals(subtotal: i64, discount: i64, config: &CheckoutConfig) -> Totals {
    let discount = discount.min(subtotal).max(0);
    let taxable = subtotal - discount;
    let shipping = if subtotal >= config.free_shipping_threshold {
        0
    } else {
        config.flat_shipping_fee
    };
    let tax = tax_on(taxable, config.tax_rate_basis_points);
    Totals {
        subtotal,
        discount,
        shipping,
        tax,
        total: taxable + shipping + tax,
    }
}

/// Breakdown for a cart view. Shipping is not committed until checkout, so
/// it is always zero here.
pub fn cart_totals(subtotal: i64, discount: i64, config: &CheckoutConfig) -> Totals {
    let discount = discount.min(subtotal).max(0);
    let taxable = subtotal - discount;
    let tax = tax_on(taxable, config.tax_rate_basis_points);
    Totals {
        subtotal,
        discount,
        shipping: 0,
        tax,
        total: taxable + tax,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: CheckoutConfig = CheckoutConfig {
        free_shipping_threshold: 500_000,
        flat_shipping_fee: 50_000,
        tax_rate_basis_points: 1800,
    };

    #[test]
    fn total_equals_subtotal_minus_discount_plus_shipping_plus_tax() {
        for (subtotal, discount) in [(200_000, 0), (200_000, 20_000), (750_000, 100_000), (1, 0)] {
            let totals = order_totals(subtotal, discount, &CONFIG);
            assert_eq!(
                totals.total,
                totals.subtotal - totals.discount + totals.shipping + totals.tax
            );
        }
    }

    #[test]
    fn free_shipping_boundary() {
        // Exactly at the threshold ships free; one paise below pays the fee.
        assert_eq!(order_totals(500_000, 0, &CONFIG).shipping, 0);
        assert_eq!(order_totals(499_999, 0, &CONFIG).shipping, 50_000);
        assert_eq!(order_totals(500_001, 0, &CONFIG).shipping, 0);
    }

    #[test]
    fn tax_is_18_percent_of_discounted_subtotal() {
        let totals = order_totals(200_000, 0, &CONFIG);
        assert_eq!(totals.tax, 36_000);
        let discounted = order_totals(200_000, 50_000, &CONFIG);
        assert_eq!(discounted.tax, 27_000);
    }

    #[test]
    fn tax_rounds_half_up_to_the_paise() {
        // 18% of 3 paise is 0.54 -> 1 paise; of 1 paise is 0.18 -> 0.
        assert_eq!(order_totals(3, 0, &CONFIG).tax, 1);
        assert_eq!(order_totals(1, 0, &CONFIG).tax, 0);
    }

    #[test]
    fn discount_is_clamped_to_subtotal() {
        let totals = order_totals(100_000, 250_000, &CONFIG);
        assert_eq!(totals.discount, 100_000);
        assert_eq!(totals.total, totals.shipping + totals.tax);
    }

    #[test]
    fn cart_totals_carry_no_shipping() {
        let totals = cart_totals(499_999, 0, &CONFIG);
        assert_eq!(totals.shipping, 0);
        assert_eq!(totals.total, totals.subtotal + totals.tax);
    }

    #[test]
    fn end_to_end_cod_breakdown() {
        // Two units at ₹1000: subtotal ₹2000, flat shipping, 18% tax.
        let totals = order_totals(200_000, 0, &CONFIG);
        assert_eq!(
            totals,
            Totals {
                subtotal: 200_000,
                discount: 0,
                shipping: 50_000,
                tax: 36_000,
                total: 286_000,
            }
        );
    }
}
