//! Lifecycle management for a bucketd process.
//!
//! Opens the store once at startup and bootstraps its namespace, tracks
//! in-flight requests so shutdown can drain them within a grace period, and
//! turns SIGINT/SIGTERM into a shutdown request. The store is closed only
//! when no request can still reach it.

pub mod concurrency;
pub mod lifecycle;

pub use concurrency::{InFlight, InFlightGuard, ShutdownSignal, ShutdownTrigger};
pub use lifecycle::{Lifecycle, ShutdownReport, DEFAULT_GRACE_PERIOD};

use bucketd_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("cannot start: store '{path}' unavailable: {source}")]
    Startup {
        path: String,
        #[source]
        source: StoreError,
    },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("signal handler error: {0}")]
    Signal(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
