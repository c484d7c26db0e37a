//! Cart management for authenticated users and guests: line mutation, coupon
//! handling, and total recalculation. Totals are recomputed in Rust on every
//! mutation rather than by database triggers.
use time::{OffsetDateTime, PrimitiveDateTime};
use uuid::Uuid;

use crate::{
    db::{
        self,
        models::{
            cart::{Cart, CartItem, CartItemInsert, CartLineJoined, CartOwner},
            coupon::{Coupon, CouponUsage},
            product::{Product, ProductVariant},
        },
    },
    services::totals::{cart_totals, CheckoutConfig, Totals},
};

/// Quantity bounds for a single cart line.
pub const MIN_LINE_QUANTITY: i64 = 1;
pub const MAX_LINE_QUANTITY: i64 = 100;

/// A cart with its lines and display totals, as returned by every cart
/// operation.
pub struct CartView {
    pub cart: Option<Cart>,
    pub items: Vec<CartLineJoined>,
    pub totals: Totals,
}

/// Input for adding a line, validated at the route boundary and re-checked
/// here.
pub struct AddItemInput {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: i64,
    pub selected_color: Option<String>,
}

const EMPTY_TOTALS: Totals = Totals {
    subtotal: 0,
    discount: 0,
    shipping: 0,
    tax: 0,
    total: 0,
};

impl CartView {
    /// The view of an owner with no cart yet.
    pub const fn empty() -> Self {
        Self {
            cart: None,
            items: Vec::new(),
            totals: EMPTY_TOTALS,
        }
    }
}

fn now() -> PrimitiveDateTime {
    let current = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(current.date(), current.time())
}

/// Fetch the owner's active cart, or an empty view if none exists yet.
pub async fn get_cart(
    owner: &CartOwner,
    db_conn: &db::ConnectionPool,
) -> Result<CartView, errors::CartError> {
    let Some(cart) = Cart::select_active(owner, db_conn).await? else {
        return Ok(CartView::empty());
    };
    let items = CartLineJoined::select_all(cart.id(), db_conn).await?;
    let totals = Totals {
        subtotal: cart.subtotal,
        discount: cart.discount_total,
        shipping: 0,
        tax: cart.tax_total,
        total: cart.total,
    };
    Ok(CartView {
        cart: Some(cart),
        items,
        totals,
    })
}

/// Add a line to the owner's cart, creating the cart lazily and merging into
/// an existing line with the same product/variant/colour combination.
pub async fn add_item(
    owner: &CartOwner,
    input: AddItemInput,
    config: &CheckoutConfig,
    db_conn: &db::ConnectionPool,
) -> Result<CartView, errors::CartError> {
    if !(MIN_LINE_QUANTITY..=MAX_LINE_QUANTITY).contains(&input.quantity) {
        return Err(errors::CartError::QuantityOutOfRange);
    }
    let product = Product::select_one(input.product_id, db_conn)
        .await?
        .filter(|product| product.is_active)
        .ok_or(errors::CartError::ProductNonExistent(input.product_id))?;
    let variant = match input.variant_id {
        Some(variant_id) => Some(
            ProductVariant::select_one(variant_id, product.id(), db_conn)
                .await?
                .ok_or(errors::CartError::VariantNonExistent(variant_id))?,
        ),
        None => None,
    };
    let unit_price = product.price() + variant.as_ref().map_or(0, ProductVariant::price_modifier);
    let available = variant
        .as_ref()
        .map_or(product.stock_quantity(), ProductVariant::stock_quantity);

    let cart = match Cart::select_active(owner, db_conn).await? {
        Some(cart) => cart,
        None => Cart::create(owner, db_conn).await?,
    };

    let existing = CartItem::find_matching(
        cart.id(),
        product.id(),
        input.variant_id,
        input.selected_color.as_deref(),
        db_conn,
    )
    .await?;

    match existing {
        Some(item) => {
            let merged_quantity = item.quantity + input.quantity;
            if merged_quantity > MAX_LINE_QUANTITY {
                return Err(errors::CartError::QuantityOutOfRange);
            }
            if !product.can_fulfil(available, merged_quantity) {
                return Err(errors::CartError::InsufficientStock {
                    available,
                    already_in_cart: Some(item.quantity),
                });
            }
            CartItem::update_quantity(item.id(), merged_quantity, unit_price, db_conn).await?;
        }
        None => {
            if !product.can_fulfil(available, input.quantity) {
                return Err(errors::CartError::InsufficientStock {
                    available,
                    already_in_cart: None,
                });
            }
            CartItemInsert {
                cart_id: cart.id(),
                product_id: product.id(),
                variant_id: input.variant_id,
                quantity: input.quantity,
                unit_price,
                selected_color: input.selected_color,
            }
            .store(db_conn)
            .await?;
        }
    }

    recalculate(cart.id(), config, db_conn).await?;
    refreshed_view(cart.id(), db_conn).await
}

/// Change the quantity of a line in the owner's active cart.
pub async fn update_item(
    owner: &CartOwner,
    item_id: Uuid,
    quantity: i64,
    config: &CheckoutConfig,
    db_conn: &db::ConnectionPool,
) -> Result<CartView, errors::CartError> {
    if !(MIN_LINE_QUANTITY..=MAX_LINE_QUANTITY).contains(&quantity) {
        return Err(errors::CartError::QuantityOutOfRange);
    }
    let item = CartItem::select_one_owned(item_id, owner, db_conn)
        .await?
        .ok_or(errors::CartError::ItemNonExistent(item_id))?;
    let product = Product::select_one(item.product_id, db_conn)
        .await?
        .ok_or(errors::CartError::ProductNonExistent(item.product_id))?;
    let available = match item.variant_id {
        Some(variant_id) => ProductVariant::select_one(variant_id, product.id(), db_conn)
            .await?
            .map_or(product.stock_quantity(), |variant| variant.stock_quantity()),
        None => product.stock_quantity(),
    };
    if !product.can_fulfil(available, quantity) {
        return Err(errors::CartError::InsufficientStock {
            available,
            already_in_cart: None,
        });
    }
    CartItem::update_quantity(item.id(), quantity, item.unit_price, db_conn).await?;
    recalculate(item.cart_id, config, db_conn).await?;
    refreshed_view(item.cart_id, db_conn).await
}

/// Remove a line from the owner's active cart.
pub async fn remove_item(
    owner: &CartOwner,
    item_id: Uuid,
    config: &CheckoutConfig,
    db_conn: &db::ConnectionPool,
) -> Result<CartView, errors::CartError> {
    let item = CartItem::select_one_owned(item_id, owner, db_conn)
        .await?
        .ok_or(errors::CartError::ItemNonExistent(item_id))?;
    CartItem::delete(item.id(), db_conn).await?;
    recalculate(item.cart_id, config, db_conn).await?;
    refreshed_view(item.cart_id, db_conn).await
}

/// Empty the owner's cart: all lines removed, totals zeroed, coupon dropped.
/// The cart row itself is kept.
pub async fn clear_cart(
    owner: &CartOwner,
    db_conn: &db::ConnectionPool,
) -> Result<(), errors::CartError> {
    if let Some(cart) = Cart::select_active(owner, db_conn).await? {
        CartItem::delete_all(cart.id(), db_conn).await?;
        Cart::update_totals(cart.id(), 0, 0, 0, 0, None, db_conn).await?;
    }
    Ok(())
}

/// Validate and apply a coupon code to the owner's cart. Per-user usage
/// limits can only be checked for authenticated owners.
pub async fn apply_coupon(
    owner: &CartOwner,
    code: &str,
    config: &CheckoutConfig,
    db_conn: &db::ConnectionPool,
) -> Result<CartView, errors::CartError> {
    let cart = Cart::select_active(owner, db_conn)
        .await?
        .ok_or(errors::CartError::CartNonExistent)?;
    let normalised = code.to_uppercase();
    let coupon = Coupon::select_by_code(&normalised, db_conn)
        .await?
        .ok_or_else(|| errors::CartError::CouponNonExistent(normalised.clone()))?;

    let total_uses = CouponUsage::count_total(coupon.id(), db_conn).await?;
    let user_uses = match *owner {
        CartOwner::User(user_id) => {
            CouponUsage::count_for_user(coupon.id(), user_id, db_conn).await?
        }
        CartOwner::Guest(_) => 0,
    };
    coupon.validate(cart.subtotal, now(), total_uses, user_uses)?;

    Cart::update_totals(
        cart.id(),
        cart.subtotal,
        cart.discount_total,
        cart.tax_total,
        cart.total,
        Some(&coupon.code),
        db_conn,
    )
    .await?;
    recalculate(cart.id(), config, db_conn).await?;
    refreshed_view(cart.id(), db_conn).await
}

/// Drop the coupon from the owner's cart.
pub async fn remove_coupon(
    owner: &CartOwner,
    config: &CheckoutConfig,
    db_conn: &db::ConnectionPool,
) -> Result<CartView, errors::CartError> {
    let cart = Cart::select_active(owner, db_conn)
        .await?
        .ok_or(errors::CartError::CartNonExistent)?;
    Cart::update_totals(
        cart.id(),
        cart.subtotal,
        0,
        cart.tax_total,
        cart.total,
        None,
        db_conn,
    )
    .await?;
    recalculate(cart.id(), config, db_conn).await?;
    refreshed_view(cart.id(), db_conn).await
}

/// Total number of units across the owner's cart, for the header badge.
pub async fn item_count(
    owner: &CartOwner,
    db_conn: &db::ConnectionPool,
) -> Result<i64, errors::CartError> {
    Ok(CartItem::count_for_owner(owner, db_conn).await?)
}

/// Recompute and persist a cart's cached totals from its lines and coupon.
async fn recalculate(
    cart_id: Uuid,
    config: &CheckoutConfig,
    db_conn: &db::ConnectionPool,
) -> Result<(), errors::CartError> {
    let Some(cart) = Cart::select_one(cart_id, db_conn).await? else {
        return Ok(());
    };
    let lines = CartLineJoined::select_all(cart_id, db_conn).await?;
    let subtotal: i64 = lines.iter().map(|line| line.total_price).sum();
    let discount = match cart.coupon_code {
        Some(ref code) => Coupon::select_by_code(code, db_conn)
            .await?
            .map_or(0, |coupon| coupon.discount_for(subtotal)),
        None => 0,
    };
    let totals = cart_totals(subtotal, discount, config);
    Cart::update_totals(
        cart_id,
        totals.subtotal,
        totals.discount,
        totals.tax,
        totals.total,
        cart.coupon_code.as_deref(),
        db_conn,
    )
    .await?;
    Ok(())
}

async fn refreshed_view(
    cart_id: Uuid,
    db_conn: &db::ConnectionPool,
) -> Result<CartView, errors::CartError> {
    let cart = Cart::select_one(cart_id, db_conn)
        .await?
        .ok_or(errors::CartError::CartNonExistent)?;
    let items = CartLineJoined::select_all(cart_id, db_conn).await?;
    let totals = Totals {
        subtotal: cart.subtotal,
        discount: cart.discount_total,
        shipping: 0,
        tax: cart.tax_total,
        total: cart.total,
    };
    Ok(CartView {
        cart: Some(cart),
        items,
        totals,
    })
}

pub mod errors {
    use crate::db::{errors::DatabaseError, models::coupon::CouponRejection};
    use thiserror::Error;
    use uuid::Uuid;

    #[derive(Error, Debug)]
    pub enum CartError {
        #[error(transparent)]
        DatabaseError(#[from] DatabaseError),
        #[error("Product does not exist or is inactive")]
        ProductNonExistent(Uuid),
        #[error("Variant does not exist for this product")]
        VariantNonExistent(Uuid),
        #[error("Quantity must be between 1 and 100")]
        QuantityOutOfRange,
        #[error("Insufficient stock")]
        InsufficientStock {
            available: i64,
            already_in_cart: Option<i64>,
        },
        #[error("Cart item does not exist")]
        ItemNonExistent(Uuid),
        #[error("Cart is empty")]
        CartNonExistent,
        #[error("Coupon code not found")]
        CouponNonExistent(String),
        #[error(transparent)]
        CouponRejected(#[from] CouponRejection),
    }
}
