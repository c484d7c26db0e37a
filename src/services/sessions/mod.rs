//! Session handling. The checkout core never parses credentials itself: the
//! session middleware resolves a cookie through this service and hands the
//! routes an already-authenticated identity.
pub mod store;
use core::fmt::Write as _;

use store::Connection;
use uuid::Uuid;

/// Generates a new 24-byte token using a CSPRNG.
fn generate_token() -> String {
    let mut token_buf: [u8; 24] = [0; 24];
    getrandom::fill(&mut token_buf).expect("Error getting OS random. Critical, aborting.");
    token_buf
        .into_iter()
        .fold(String::new(), |mut acc: String, x: u8| {
            write!(acc, "{x:02x}").unwrap();
            acc
        })
}

/// Generate an opaque identifier for a guest cart. Same CSPRNG shape as a
/// session token, but never stored server-side; the cookie itself is the
/// only handle.
pub fn generate_guest_session_id() -> String {
    generate_token()
}

/// A fully authenticated customer session, resolved from the session cookie.
/// Sessions are minted and revoked by the separate auth service; this core
/// only ever reads them.
#[derive(Clone)]
pub struct CustomerSession {
    user_id: Uuid,
}

impl CustomerSession {
    /// Look up a session by its token. `None` means the token is unknown or
    /// has expired.
    pub async fn get(
        token: &str,
        store_conn: &mut Connection,
    ) -> Result<Option<Self>, errors::SessionStorageError> {
        Ok(store_conn
            .user_id(token)
            .await?
            .map(|user_id| Self { user_id }))
    }

    pub const fn user_id(&self) -> Uuid {
        self.user_id
    }
}

pub mod errors {
    use thiserror::Error;

    /// An error returned by the underlying session store.
    #[derive(Error, Debug)]
    #[error(transparent)]
    pub struct SessionStorageError(#[from] super::store::StorageError);
}

#[cfg(test)]
mod tests {
    use super::generate_token;

    #[test]
    fn tokens_are_48_hex_chars_and_unique() {
        let first = generate_token();
        let second = generate_token();
        assert_eq!(first.len(), 48);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(first, second);
    }
}
