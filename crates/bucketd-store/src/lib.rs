//! Durable single-file key-value namespace for bucketd.
//!
//! This crate provides the storage layer: a [`Store`] backed by one redb file
//! holding a single flat namespace, with one transaction per operation. Reads
//! run on MVCC snapshots and never block; writes are serialized and fsynced on
//! commit. A sidecar [`StoreLock`] keeps other processes out of the file and
//! gives [`Store::open`] a bounded acquisition timeout.

pub mod lock;
pub mod store;

pub use lock::StoreLock;
pub use store::{Store, StoreOptions, DEFAULT_LOCK_TIMEOUT, DEFAULT_NAMESPACE};

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out after {timeout:?} waiting for store lock '{path}'")]
    LockTimeout { path: String, timeout: Duration },
    #[error("store file is corrupted: {0}")]
    Corrupted(String),
    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),
    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),
    #[error("namespace error: {0}")]
    Table(#[from] redb::TableError),
    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),
}

/// Key-addressed access to a single namespace.
///
/// Each call is exactly one transaction. Implementations must be safe to call
/// from many request threads at once.
pub trait KvBackend: Send + Sync {
    /// Read the value for `key`. An absent key is `Ok(None)`, not an error.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Insert or overwrite `key`. Durable once this returns `Ok`.
    fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove `key`. Removing an absent key succeeds.
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display_lock_timeout() {
        let e = StoreError::LockTimeout {
            path: "/var/lib/bucketd/my.db.lock".to_owned(),
            timeout: Duration::from_secs(1),
        };
        let msg = e.to_string();
        assert!(msg.contains("my.db.lock"));
        assert!(msg.contains("1s"));
    }

    #[test]
    fn store_error_display_corrupted() {
        let e = StoreError::Corrupted("Invalid magic number".to_owned());
        assert!(e.to_string().contains("Invalid magic number"));
    }

    #[test]
    fn store_error_from_io() {
        let e: StoreError = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope").into();
        assert!(matches!(e, StoreError::Io(_)));
        assert!(e.to_string().contains("nope"));
    }
}
