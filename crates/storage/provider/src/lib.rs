//! Storage abstraction.
//!
//! Each entity family gets a typed repository trait; a backend implements
//! all of them on one value. Two implementations ship with the runtime: the
//! in-memory provider (tests, dev nodes) and the SQL provider in
//! `strato-db`. Services own their repositories exclusively; cross-service
//! effects go through actions or bus messages, never direct writes.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod error;
pub mod providers;
pub mod traits;

pub use error::{ProviderError, ProviderResult};
use traits::account::AccountProvider;
use traits::automation::{JobProvider, TriggerProvider};
use traits::feed::FeedProvider;
use traits::function::{ExecutionProvider, FunctionProvider};
use traits::gasbank::GasBankProvider;
use traits::oracle::OracleProvider;
use traits::secret::SecretProvider;

/// Pagination window for list operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self { limit: 100, offset: 0 }
    }
}

/// The full repository surface a storage backend provides.
pub trait StorageProvider:
    AccountProvider
    + FunctionProvider
    + ExecutionProvider
    + JobProvider
    + TriggerProvider
    + OracleProvider
    + GasBankProvider
    + FeedProvider
    + SecretProvider
    + Send
    + Sync
{
}

impl<T> StorageProvider for T where
    T: AccountProvider
        + FunctionProvider
        + ExecutionProvider
        + JobProvider
        + TriggerProvider
        + OracleProvider
        + GasBankProvider
        + FeedProvider
        + SecretProvider
        + Send
        + Sync
{
}
