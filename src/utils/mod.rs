//! Small helpers shared across routes.
pub mod httperror;
