use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from a shared counter store
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CounterStoreError {
    /// The store could not be reached
    #[error("Connection error: {0}")]
    Connection(String),

    /// The store answered but the command failed
    #[error("Command failed: {0}")]
    Command(String),
}

/// Result type alias for counter store operations
pub type CounterStoreResult<T> = Result<T, CounterStoreError>;

/// Atomic fixed-window counters shared by every gateway process.
#[async_trait]
pub trait CounterStore: Send + Sync + 'static {
    /// Increment the counter at `key` and return the new count.
    ///
    /// When the increment creates the key (count becomes 1) the key expires
    /// after `window`. Both steps happen atomically from the store's point of
    /// view; later increments never extend the expiry.
    async fn increment(&self, key: &str, window: Duration) -> CounterStoreResult<u64>;
}
