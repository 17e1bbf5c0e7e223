//! HTTP front end for bucketd.
//!
//! Serves a single route, `/{key}`, mapping GET, POST/PUT and DELETE onto one
//! store transaction each. Every keyed response is HTTP 200 with a JSON
//! envelope whose `code` is `1` (success), `-1` (failure) or `-500` (contained
//! fault); anything else is a plain-text 404.
//!
//! Requests pass through an interceptor [`Pipeline`]: the [`AccessLog`]
//! outermost, then [`Recovery`], then the [`Dispatcher`].

pub mod access_log;
pub mod config;
pub mod dispatch;
pub mod http;
pub mod pipeline;
pub mod router;

pub use access_log::AccessLog;
pub use config::{ConfigError, ServerConfig};
pub use dispatch::{Dispatcher, Envelope, Operation, Outcome, CODE_FAILED, CODE_FAULT, CODE_OK};
pub use http::{handle_request, App, HttpServer, TestServer};
pub use pipeline::{Interceptor, Next, Pipeline, Recovery, Reply, RequestInfo};
pub use router::{parse_key_route, KeyMethod};

use bucketd_core::{CoreError, Lifecycle, ShutdownReport, ShutdownSignal};
use bucketd_store::KvBackend;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {message}")]
    Bind { addr: String, message: String },
    #[error("failed to open access log {path}: {source}")]
    AccessLog {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run a server until `signal` fires, then shut down gracefully.
///
/// Startup opens the store before binding, so a locked or corrupted file
/// fails fast without ever listening.
pub fn serve(config: &ServerConfig, signal: &ShutdownSignal) -> Result<ShutdownReport, ServerError> {
    let lifecycle = Lifecycle::start(config.store_options(), config.grace_period())?;

    let access_log = AccessLog::open(&config.access_log).map_err(|e| ServerError::AccessLog {
        path: config.access_log.display().to_string(),
        source: e,
    })?;
    let backend: Arc<dyn KvBackend> = lifecycle.store();
    let in_flight = lifecycle.in_flight();
    let app = Arc::new(App::new(backend, access_log, Arc::clone(&in_flight)));

    let mut server = HttpServer::bind(&config.listen, app)?;
    info!("listening and serving HTTP on {}", server.local_addr());

    signal.wait();

    // Requests still arriving on open connections get a shutdown envelope
    // until the listener is gone.
    in_flight.close_intake();
    server.stop_accepting();
    drop(in_flight);
    let report = lifecycle.shutdown();
    drop(server);
    Ok(report)
}
