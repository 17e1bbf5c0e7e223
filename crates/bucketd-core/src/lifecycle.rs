use crate::concurrency::InFlight;
use crate::CoreError;
use bucketd_store::{Store, StoreOptions};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// How long shutdown waits for in-flight requests before abandoning them.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Outcome of [`Lifecycle::shutdown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Every admitted request finished within the grace period.
    pub drained: bool,
    /// Requests still running when the grace period ran out.
    pub abandoned: usize,
    /// The store was closed explicitly. When false, the OS releases the file
    /// at process exit.
    pub store_closed: bool,
    pub elapsed: Duration,
}

/// Owns the store handle and the in-flight request tracker for one process.
///
/// The store is opened once in [`start`](Self::start) and handed out as
/// `Arc<Store>` to whatever serves requests. [`shutdown`](Self::shutdown)
/// closes intake, drains, and closes the store only if it holds the last
/// reference, so the handle is never closed under a running transaction.
pub struct Lifecycle {
    store: Arc<Store>,
    in_flight: Arc<InFlight>,
    grace_period: Duration,
}

impl Lifecycle {
    /// Open the store and bootstrap its namespace. Any failure aborts startup.
    pub fn start(options: StoreOptions, grace_period: Duration) -> Result<Self, CoreError> {
        let path = options.path.display().to_string();
        let startup = |source| CoreError::Startup {
            path: path.clone(),
            source,
        };

        let store = Store::open(options).map_err(startup)?;
        store.ensure_namespace().map_err(startup)?;
        info!(
            "store ready at {} (namespace '{}')",
            store.path().display(),
            store.namespace()
        );

        Ok(Self {
            store: Arc::new(store),
            in_flight: InFlight::new(),
            grace_period,
        })
    }

    /// Shared store handle for request dispatch.
    pub fn store(&self) -> Arc<Store> {
        Arc::clone(&self.store)
    }

    pub fn in_flight(&self) -> Arc<InFlight> {
        Arc::clone(&self.in_flight)
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Stop intake, wait up to the grace period for admitted requests, then
    /// release the store.
    ///
    /// Callers must drop their own store handles first. A request that outlives
    /// the grace period is abandoned, not killed, and keeps the store open
    /// until the process exits.
    pub fn shutdown(self) -> ShutdownReport {
        let started = Instant::now();
        let Self {
            store,
            in_flight,
            grace_period,
        } = self;

        in_flight.close_intake();
        let abandoned = in_flight.wait_idle(grace_period);
        if abandoned > 0 {
            warn!(
                "grace period of {grace_period:?} elapsed with {abandoned} request(s) in flight, abandoning them"
            );
            return ShutdownReport {
                drained: false,
                abandoned,
                store_closed: false,
                elapsed: started.elapsed(),
            };
        }

        let store_closed = match Arc::try_unwrap(store) {
            Ok(store) => match store.close() {
                Ok(()) => true,
                Err(e) => {
                    error!("failed to close store: {e}");
                    false
                }
            },
            Err(shared) => {
                warn!(
                    "store still referenced {} time(s) after drain, leaving it to process exit",
                    Arc::strong_count(&shared) - 1
                );
                false
            }
        };

        let report = ShutdownReport {
            drained: true,
            abandoned: 0,
            store_closed,
            elapsed: started.elapsed(),
        };
        info!("shutdown complete in {:?}", report.elapsed);
        report
    }
}
