//! Constants related to authentication and session handling.

/// Name of the cookie carrying the authenticated session token.
pub const SESSION_COOKIE: &str = "session";

/// Name of the cookie carrying the opaque guest cart identifier.
pub const GUEST_SESSION_COOKIE: &str = "guest_session";
