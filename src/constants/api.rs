//! Constants related to the general configuration of the API and its deployment.
use std::{env::var, sync::LazyLock};

/// A prefix to prepend to any API paths to make them externally accessible.
pub static API_URI_PREFIX: LazyLock<String> =
    LazyLock::new(|| var("API_URI_PREFIX").unwrap_or_else(|_| String::from("/api/v1")));

/// The address and port the HTTP listener binds to.
pub static BIND_ADDRESS: LazyLock<String> =
    LazyLock::new(|| var("BIND_ADDRESS").unwrap_or_else(|_| String::from("0.0.0.0:8080")));
