//! Constants (primarily environment variables/secrets) used across the application.
pub mod api;
pub mod checkout;
pub mod db;
pub mod razorpay;
pub mod redis;
mod secrets;
pub mod sessions;
