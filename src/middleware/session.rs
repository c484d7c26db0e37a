//! Middleware used for checking user authentication.
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;
use tracing::warn;

use crate::{
    constants::sessions::SESSION_COOKIE, services::sessions::CustomerSession, state::AppState,
};

/// Middleware to parse a session cookie and identify the associated user. The
/// resolved [`CustomerSession`] is inserted as a request extension for the
/// handlers downstream.
pub async fn session_middleware(
    State(state): State<AppState>,
    cookie_jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let session_cookie = cookie_jar
        .get(SESSION_COOKIE)
        .ok_or(StatusCode::UNAUTHORIZED)?
        .value();
    let session = CustomerSession::get(session_cookie, &mut state.session_store_conn.clone())
        .await
        .map_err(|err| {
            warn!("Error loading session from store: {err}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or_else(|| {
            warn!("Invalid session token.");
            StatusCode::UNAUTHORIZED
        })?;
    req.extensions_mut().insert(session);
    Ok(next.run(req).await)
}
