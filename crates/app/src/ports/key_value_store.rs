//! Key-value store port — durable storage for per-key histories and flags.

use std::future::Future;
use std::sync::Arc;

use mimic_domain::error::MimicError;

/// Durable string-keyed blob storage.
///
/// Histories are written one key at a time so that a single new event never
/// rewrites the whole table.
pub trait KeyValueStore: Send + Sync {
    /// Fetch the blob stored under `key`, if any.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, MimicError>> + Send;

    /// Insert or replace the blob stored under `key`.
    fn set(&self, key: &str, value: String)
    -> impl Future<Output = Result<(), MimicError>> + Send;

    /// Remove `key`. Removing a missing key is not an error.
    fn unset(&self, key: &str) -> impl Future<Output = Result<(), MimicError>> + Send;
}

impl<T: KeyValueStore> KeyValueStore for Arc<T> {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, MimicError>> + Send {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: String)
    -> impl Future<Output = Result<(), MimicError>> + Send {
        (**self).set(key, value)
    }

    fn unset(&self, key: &str) -> impl Future<Output = Result<(), MimicError>> + Send {
        (**self).unset(key)
    }
}
