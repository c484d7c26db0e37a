//! Middleware applied to route subtrees.
pub mod session;
