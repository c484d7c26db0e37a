//! Routes for cart management. Unlike the order routes these are reachable
//! without authentication: a guest is identified by an opaque cookie, and the
//! same handlers serve both kinds of owner.
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use axum_extra::extract::{cookie::Cookie, CookieJar};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::{
    constants::sessions::{GUEST_SESSION_COOKIE, SESSION_COOKIE},
    db::models::cart::{CartLineJoined, CartOwner},
    services::{
        carts::{self, AddItemInput, CartView},
        sessions::{self, CustomerSession},
    },
    state::AppState,
    utils::httperror::HttpError,
};

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart))
        .route("/", delete(clear_cart))
        .route("/count", get(count_items))
        .route("/items", post(add_item))
        .route("/items/{item_id}", put(update_item))
        .route("/items/{item_id}", delete(remove_item))
        .route("/coupon", post(apply_coupon))
        .route("/coupon", delete(remove_coupon))
}

/// Resolve the cart owner from the request cookies: an authenticated session
/// wins over a guest cookie. `None` means the request carries no usable
/// identity at all.
async fn resolve_owner(
    state: &AppState,
    cookie_jar: &CookieJar,
) -> Result<Option<CartOwner>, HttpError> {
    if let Some(session_cookie) = cookie_jar.get(SESSION_COOKIE) {
        let session =
            CustomerSession::get(session_cookie.value(), &mut state.session_store_conn.clone())
                .await
                .map_err(|err| {
                    warn!("Error loading session from store: {err}");
                    HttpError::from(StatusCode::INTERNAL_SERVER_ERROR)
                })?;
        if let Some(session) = session {
            return Ok(Some(CartOwner::User(session.user_id())));
        }
        // A stale session cookie degrades to guest handling rather than 401;
        // a visitor with an expired login can still browse and fill a cart.
    }
    Ok(cookie_jar
        .get(GUEST_SESSION_COOKIE)
        .map(|cookie| CartOwner::Guest(cookie.value().to_owned())))
}

/// Resolve the owner, minting a fresh guest identity when the request has
/// none. Returns the jar so a newly minted cookie reaches the client.
async fn ensure_owner(
    state: &AppState,
    cookie_jar: CookieJar,
) -> Result<(CartOwner, CookieJar), HttpError> {
    if let Some(owner) = resolve_owner(state, &cookie_jar).await? {
        return Ok((owner, cookie_jar));
    }
    let session_id = sessions::generate_guest_session_id();
    let cookie = Cookie::build((GUEST_SESSION_COOKIE, session_id.clone()))
        .path("/")
        .http_only(true)
        .build();
    Ok((CartOwner::Guest(session_id), cookie_jar.add(cookie)))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CartItemResponse {
    id: Uuid,
    product_id: Uuid,
    variant_id: Option<Uuid>,
    name: String,
    slug: String,
    variant_name: Option<String>,
    selected_color: Option<String>,
    quantity: i64,
    unit_price: i64,
    total_price: i64,
}

impl From<&CartLineJoined> for CartItemResponse {
    fn from(line: &CartLineJoined) -> Self {
        Self {
            id: line.item_id,
            product_id: line.product_id,
            variant_id: line.variant_id,
            name: line.product_name.clone(),
            slug: line.product_slug.clone(),
            variant_name: line.variant_name.clone(),
            selected_color: line.selected_color.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            total_price: line.total_price,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CartResponse {
    items: Vec<CartItemResponse>,
    subtotal: i64,
    discount: i64,
    tax: i64,
    total: i64,
    coupon_code: Option<String>,
    /// Present only when this response minted a new guest identity, so
    /// non-cookie clients can persist it themselves.
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
}

impl CartResponse {
    fn from_view(view: &CartView, session_id: Option<String>) -> Self {
        Self {
            items: view.items.iter().map(CartItemResponse::from).collect(),
            subtotal: view.totals.subtotal,
            discount: view.totals.discount,
            tax: view.totals.tax,
            total: view.totals.total,
            coupon_code: view
                .cart
                .as_ref()
                .and_then(|cart| cart.coupon_code.clone()),
            session_id,
        }
    }
}

async fn get_cart(
    State(state): State<AppState>,
    cookie_jar: CookieJar,
) -> Result<Json<CartResponse>, HttpError> {
    let view = match resolve_owner(&state, &cookie_jar).await? {
        Some(owner) => carts::get_cart(&owner, &state.db_conn).await?,
        None => CartView::empty(),
    };
    Ok(Json(CartResponse::from_view(&view, None)))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CartCountResponse {
    count: i64,
}

async fn count_items(
    State(state): State<AppState>,
    cookie_jar: CookieJar,
) -> Result<Json<CartCountResponse>, HttpError> {
    let count = match resolve_owner(&state, &cookie_jar).await? {
        Some(owner) => carts::item_count(&owner, &state.db_conn).await?,
        None => 0,
    };
    Ok(Json(CartCountResponse { count }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddItemRequest {
    product_id: Uuid,
    variant_id: Option<Uuid>,
    #[serde(default = "default_quantity")]
    quantity: i64,
    selected_color: Option<String>,
}

const fn default_quantity() -> i64 {
    1
}

async fn add_item(
    State(state): State<AppState>,
    cookie_jar: CookieJar,
    Json(body): Json<AddItemRequest>,
) -> Result<(CookieJar, Json<CartResponse>), HttpError> {
    let (owner, cookie_jar) = ensure_owner(&state, cookie_jar).await?;
    let session_id = match owner {
        CartOwner::Guest(ref session_id) => Some(session_id.clone()),
        CartOwner::User(_) => None,
    };
    let view = carts::add_item(
        &owner,
        AddItemInput {
            product_id: body.product_id,
            variant_id: body.variant_id,
            quantity: body.quantity,
            selected_color: body.selected_color,
        },
        &state.checkout_config,
        &state.db_conn,
    )
    .await?;
    Ok((
        cookie_jar,
        Json(CartResponse::from_view(&view, session_id)),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateItemRequest {
    quantity: i64,
}

async fn update_item(
    State(state): State<AppState>,
    cookie_jar: CookieJar,
    Path(item_id): Path<Uuid>,
    Json(body): Json<UpdateItemRequest>,
) -> Result<Json<CartResponse>, HttpError> {
    let owner = resolve_owner(&state, &cookie_jar)
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;
    let view = carts::update_item(
        &owner,
        item_id,
        body.quantity,
        &state.checkout_config,
        &state.db_conn,
    )
    .await?;
    Ok(Json(CartResponse::from_view(&view, None)))
}

async fn remove_item(
    State(state): State<AppState>,
    cookie_jar: CookieJar,
    Path(item_id): Path<Uuid>,
) -> Result<Json<CartResponse>, HttpError> {
    let owner = resolve_owner(&state, &cookie_jar)
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;
    let view = carts::remove_item(&owner, item_id, &state.checkout_config, &state.db_conn).await?;
    Ok(Json(CartResponse::from_view(&view, None)))
}

async fn clear_cart(
    State(state): State<AppState>,
    cookie_jar: CookieJar,
) -> Result<StatusCode, HttpError> {
    if let Some(owner) = resolve_owner(&state, &cookie_jar).await? {
        carts::clear_cart(&owner, &state.db_conn).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplyCouponRequest {
    code: String,
}

async fn apply_coupon(
    State(state): State<AppState>,
    cookie_jar: CookieJar,
    Json(body): Json<ApplyCouponRequest>,
) -> Result<Json<CartResponse>, HttpError> {
    let owner = resolve_owner(&state, &cookie_jar)
        .await?
        .ok_or(StatusCode::BAD_REQUEST)?;
    let view = carts::apply_coupon(&owner, &body.code, &state.checkout_config, &state.db_conn)
        .await?;
    Ok(Json(CartResponse::from_view(&view, None)))
}

async fn remove_coupon(
    State(state): State<AppState>,
    cookie_jar: CookieJar,
) -> Result<Json<CartResponse>, HttpError> {
    let owner = resolve_owner(&state, &cookie_jar)
        .await?
        .ok_or(StatusCode::BAD_REQUEST)?;
    let view = carts::remove_coupon(&owner, &state.checkout_config, &state.db_conn).await?;
    Ok(Json(CartResponse::from_view(&view, None)))
}

impl From<carts::errors::CartError> for HttpError {
    fn from(error: carts::errors::CartError) -> Self {
        use carts::errors::CartError;
        match error {
            CartError::DatabaseError(err) => err.into(),
            CartError::ProductNonExistent(product_id) => {
                warn!("Attempted to add product {product_id}, which does not exist or is inactive.");
                Self::new(
                    StatusCode::NOT_FOUND,
                    Some(String::from("Product not found")),
                )
            }
            CartError::VariantNonExistent(variant_id) => {
                warn!("Attempted to add variant {variant_id}, which does not exist.");
                Self::new(
                    StatusCode::NOT_FOUND,
                    Some(String::from("Variant not found")),
                )
            }
            CartError::QuantityOutOfRange => Self::new(
                StatusCode::BAD_REQUEST,
                Some(String::from("Quantity must be between 1 and 100")),
            ),
            CartError::InsufficientStock {
                available,
                already_in_cart,
            } => {
                let message = match already_in_cart {
                    Some(in_cart) => format!(
                        "Only {available} in stock ({in_cart} already in your cart)"
                    ),
                    None => format!("Only {available} in stock"),
                };
                Self::new(StatusCode::BAD_REQUEST, Some(message))
            }
            CartError::ItemNonExistent(item_id) => {
                warn!("Attempted to modify cart item {item_id}, which does not exist for this owner.");
                Self::new(
                    StatusCode::NOT_FOUND,
                    Some(String::from("Cart item not found")),
                )
            }
            CartError::CartNonExistent => Self::new(
                StatusCode::BAD_REQUEST,
                Some(String::from("Cart is empty")),
            ),
            CartError::CouponNonExistent(code) => Self::new(
                StatusCode::NOT_FOUND,
                Some(format!("Coupon {code} not found")),
            ),
            CartError::CouponRejected(rejection) => {
                Self::new(StatusCode::BAD_REQUEST, Some(rejection.to_string()))
            }
        }
    }
}
