//! Defines data models (structs) which map directly to rows in the database.
pub mod activity_log;
pub mod address;
pub mod cart;
pub mod coupon;
pub mod order;
pub mod product;
