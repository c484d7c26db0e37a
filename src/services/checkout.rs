//! Turning a cart into a priced, validated order: the assembler re-reads the
//! catalog and prices a draft without touching the store; the persister
//! writes the order atomically and, for COD, reserves stock in the same
//! transaction.
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::{
    db::{
        self,
        models::{
            address::Address,
            cart::{Cart, CartLineJoined, CartOwner},
            coupon::{Coupon, CouponUsage},
            order::{
                Order, OrderInsert, OrderItemInsert, OrderStatus, PaymentMethod, PaymentStatus,
            },
            product::{Product, ProductVariant},
        },
    },
    services::{
        payments::RazorpayClient,
        totals::{order_totals, CheckoutConfig, Totals},
    },
};

/// Validated input for order creation, produced at the route boundary.
pub struct CheckoutRequest {
    pub shipping_address_id: Uuid,
    /// Defaults to the shipping address when absent.
    pub billing_address_id: Option<Uuid>,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
}

/// One priced line of an order draft.
pub struct DraftLine {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub variant_name: Option<String>,
    pub quantity: i64,
    pub unit_price: i64,
    pub total_price: i64,
}

/// An in-memory order ready for persistence. Produced by [`assemble_order`];
/// holds no database state of its own.
pub struct OrderDraft {
    pub user_id: Uuid,
    pub cart_id: Uuid,
    pub order_number: String,
    pub payment_method: PaymentMethod,
    pub shipping_address_id: Uuid,
    pub billing_address_id: Uuid,
    pub totals: Totals,
    pub coupon: Option<AppliedCoupon>,
    pub lines: Vec<DraftLine>,
    pub notes: Option<String>,
}

/// The coupon consumed by this order, resolved at assembly time.
pub struct AppliedCoupon {
    pub coupon_id: Uuid,
    pub code: String,
}

/// A persisted order plus the client-side parameters for the payment widget
/// (online payment only).
pub struct PlacedOrder {
    pub order: Order,
    pub gateway: Option<GatewayCheckoutParams>,
}

pub struct GatewayCheckoutParams {
    pub gateway_order_id: String,
    /// Amount in paise, as the widget expects.
    pub amount: i64,
    pub currency: String,
    pub key_id: String,
}

const ORDER_NUMBER_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const ORDER_NUMBER_ATTEMPTS: u32 = 5;

/// Generate a candidate order number: `SF-` plus eight characters from an
/// alphabet with the ambiguous glyphs removed.
fn order_number_candidate() -> String {
    let mut raw: [u8; 8] = [0; 8];
    getrandom::fill(&mut raw).expect("Error getting OS random. Critical, aborting.");
    let suffix: String = raw
        .into_iter()
        .map(|byte| ORDER_NUMBER_ALPHABET[usize::from(byte) % ORDER_NUMBER_ALPHABET.len()] as char)
        .collect();
    format!("SF-{suffix}")
}

/// Generate an order number guaranteed unique at generation time.
async fn generate_order_number(
    db_conn: &db::ConnectionPool,
) -> Result<String, errors::OrderAssemblyError> {
    for _ in 0..ORDER_NUMBER_ATTEMPTS {
        let candidate = order_number_candidate();
        if !Order::order_number_exists(&candidate, db_conn).await? {
            return Ok(candidate);
        }
    }
    Err(errors::OrderAssemblyError::OrderNumberExhausted)
}

/// Validate and price the user's active cart into an [`OrderDraft`]. Reads
/// live catalog prices and stock; trusts nothing cached on the cart. Performs
/// no writes.
pub async fn assemble_order(
    user_id: Uuid,
    request: &CheckoutRequest,
    config: &CheckoutConfig,
    db_conn: &db::ConnectionPool,
) -> Result<OrderDraft, errors::OrderAssemblyError> {
    let owner = CartOwner::User(user_id);
    let cart = Cart::select_active(&owner, db_conn)
        .await?
        .ok_or(errors::OrderAssemblyError::EmptyCart)?;
    let lines = CartLineJoined::select_all(cart.id(), db_conn).await?;
    if lines.is_empty() {
        return Err(errors::OrderAssemblyError::EmptyCart);
    }

    let mut subtotal: i64 = 0;
    let mut draft_lines = Vec::with_capacity(lines.len());
    for line in &lines {
        if !line.is_active {
            return Err(errors::OrderAssemblyError::ProductUnavailable {
                name: line.product_name.clone(),
            });
        }
        if !line.can_fulfil() {
            return Err(errors::OrderAssemblyError::InsufficientStock {
                name: line.product_name.clone(),
                available: line.available_stock(),
            });
        }
        let unit_price = line.current_unit_price();
        let total_price = unit_price * line.quantity;
        subtotal += total_price;
        draft_lines.push(DraftLine {
            product_id: line.product_id,
            variant_id: line.variant_id,
            variant_name: line.variant_name.clone(),
            quantity: line.quantity,
            unit_price,
            total_price,
        });
    }

    // The coupon was validated at apply-time; here only the discount amount
    // is re-derived against the fresh subtotal.
    let mut discount: i64 = 0;
    let mut applied_coupon = None;
    if let Some(ref code) = cart.coupon_code {
        if let Some(coupon) = Coupon::select_by_code(code, db_conn).await? {
            discount = coupon.discount_for(subtotal);
            applied_coupon = Some(AppliedCoupon {
                coupon_id: coupon.id(),
                code: coupon.code,
            });
        }
    }

    let shipping_address = Address::select_one_owned(request.shipping_address_id, user_id, db_conn)
        .await?
        .ok_or(errors::OrderAssemblyError::InvalidAddress)?;
    let billing_address_id = match request.billing_address_id {
        Some(billing_id) => Address::select_one_owned(billing_id, user_id, db_conn)
            .await?
            .ok_or(errors::OrderAssemblyError::InvalidAddress)?
            .id(),
        None => shipping_address.id(),
    };

    Ok(OrderDraft {
        user_id,
        cart_id: cart.id(),
        order_number: generate_order_number(db_conn).await?,
        payment_method: request.payment_method,
        shipping_address_id: shipping_address.id(),
        billing_address_id,
        totals: order_totals(subtotal, discount, config),
        coupon: applied_coupon,
        lines: draft_lines,
        notes: request.notes.clone(),
    })
}

/// Persist an order draft. For online payment a gateway order is opened
/// first and stock stays untouched until payment confirmation; for COD,
/// stock is reserved and the cart deleted in the same transaction as the
/// order write.
pub async fn place_order(
    draft: OrderDraft,
    gateway: &RazorpayClient,
    db_conn: &db::ConnectionPool,
) -> Result<PlacedOrder, errors::OrderPlacementError> {
    let razorpay_order_id = match draft.payment_method {
        PaymentMethod::Razorpay => Some(
            gateway
                .create_order(
                    draft.totals.total,
                    "INR",
                    &draft.order_number,
                    json!({
                        "user_id": draft.user_id,
                        "order_number": draft.order_number,
                    }),
                )
                .await?,
        ),
        PaymentMethod::Cod => None,
    };

    let status = match draft.payment_method {
        PaymentMethod::Razorpay => OrderStatus::PendingPayment,
        PaymentMethod::Cod => OrderStatus::Pending,
    };

    let mut tx = db_conn.begin().await.map_err(db::errors::DatabaseError::from)?;
    let order = OrderInsert {
        user_id: draft.user_id,
        order_number: draft.order_number,
        status,
        payment_status: PaymentStatus::Pending,
        payment_method: draft.payment_method,
        razorpay_order_id: razorpay_order_id.clone(),
        shipping_address_id: draft.shipping_address_id,
        billing_address_id: draft.billing_address_id,
        subtotal: draft.totals.subtotal,
        discount_amount: draft.totals.discount,
        discount_code: draft.coupon.as_ref().map(|coupon| coupon.code.clone()),
        shipping_amount: draft.totals.shipping,
        tax_amount: draft.totals.tax,
        total_amount: draft.totals.total,
        notes: draft.notes,
    }
    .store(&mut tx)
    .await?;

    for line in &draft.lines {
        OrderItemInsert {
            order_id: order.id(),
            product_id: line.product_id,
            variant_id: line.variant_id,
            variant_name: line.variant_name.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            total_price: line.total_price,
        }
        .store(&mut tx)
        .await?;
    }

    if let Some(ref coupon) = draft.coupon {
        CouponUsage::insert(coupon.coupon_id, draft.user_id, order.id(), &mut tx).await?;
    }

    // COD has no payment-confirmation step, so this is the only point where
    // stock can be reserved. The guarded decrement re-checks availability
    // inside the transaction, closing the gap since assembly.
    if draft.payment_method == PaymentMethod::Cod {
        for line in &draft.lines {
            let decremented = match line.variant_id {
                Some(variant_id) => {
                    ProductVariant::guarded_decrement_stock(variant_id, line.quantity, &mut *tx)
                        .await?
                }
                None => {
                    Product::guarded_decrement_stock(line.product_id, line.quantity, &mut *tx)
                        .await?
                }
            };
            if !decremented {
                // Rolls back the whole order; the caller may safely retry.
                return Err(errors::OrderPlacementError::StockConflict {
                    product_id: line.product_id,
                });
            }
        }
        Cart::delete_with_items(draft.cart_id, &mut tx).await?;
    }

    tx.commit().await.map_err(db::errors::DatabaseError::from)?;
    info!(order_number = %order.order_number, method = %order.payment_method().as_str(), "order placed");

    let gateway_params = razorpay_order_id.map(|gateway_order_id| GatewayCheckoutParams {
        gateway_order_id,
        amount: order.total_amount,
        currency: String::from("INR"),
        key_id: gateway.key_id().to_owned(),
    });
    Ok(PlacedOrder {
        order,
        gateway: gateway_params,
    })
}

pub mod errors {
    use crate::db::errors::DatabaseError;
    use thiserror::Error;
    use uuid::Uuid;

    use super::super::payments::errors::PaymentGatewayError;

    /// Errors detected while validating and pricing the cart. All are found
    /// before any write occurs.
    #[derive(Error, Debug)]
    pub enum OrderAssemblyError {
        #[error(transparent)]
        DatabaseError(#[from] DatabaseError),
        #[error("Cart is empty")]
        EmptyCart,
        #[error("{name} is no longer available")]
        ProductUnavailable { name: String },
        #[error("Insufficient stock for {name}")]
        InsufficientStock { name: String, available: i64 },
        #[error("Shipping address does not belong to this user")]
        InvalidAddress,
        #[error("Could not generate a unique order number")]
        OrderNumberExhausted,
    }

    /// Errors during persistence. Any failure rolls back the entire write.
    #[derive(Error, Debug)]
    pub enum OrderPlacementError {
        #[error(transparent)]
        DatabaseError(#[from] DatabaseError),
        #[error(transparent)]
        GatewayError(#[from] PaymentGatewayError),
        #[error("Stock changed while placing the order")]
        StockConflict { product_id: Uuid },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_numbers_have_the_expected_shape() {
        let number = order_number_candidate();
        assert_eq!(number.len(), 11);
        assert!(number.starts_with("SF-"));
        assert!(number[3..]
            .bytes()
            .all(|byte| ORDER_NUMBER_ALPHABET.contains(&byte)));
    }

    #[test]
    fn order_number_alphabet_omits_ambiguous_glyphs() {
        for glyph in [b'0', b'O', b'1', b'I'] {
            assert!(!ORDER_NUMBER_ALPHABET.contains(&glyph));
        }
    }
}
