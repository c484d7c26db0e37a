//! Provides an abstracted interface to the underlying session store.
//! Accessible only within the session service; no other part of the code
//! should ever touch the store directly.
use crate::constants::redis as constants;
use redis::{aio::MultiplexedConnection, AsyncCommands as _, RedisError};
use uuid::Uuid;

#[derive(Clone)]
/// A connection to the session store. Safe to clone and share between tasks.
pub struct Connection(MultiplexedConnection);

pub type StorageError = RedisError;

fn key_for(token: &str) -> String {
    format!("session:{token}")
}

impl Connection {
    /// Initiate a new (multiplexed) connection to the session store.
    pub async fn connect() -> Result<Self, StorageError> {
        Ok(Self(
            redis::Client::open(constants::REDIS_URL.clone())?
                .get_multiplexed_async_connection()
                .await?,
        ))
    }

    /// Look up the user id stored under a token, if the token is live.
    pub(super) async fn user_id(&mut self, token: &str) -> Result<Option<Uuid>, StorageError> {
        let raw: Option<String> = self.0.get(key_for(token)).await?;
        Ok(raw.and_then(|value| value.parse().ok()))
    }
}
