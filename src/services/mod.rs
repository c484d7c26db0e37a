//! Services which define the core business logic behind the routes.
pub mod carts;
pub mod checkout;
pub mod orders;
pub mod payments;
pub mod sessions;
pub mod totals;
