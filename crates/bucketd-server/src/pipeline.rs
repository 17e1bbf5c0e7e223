//! Request interceptors composed around the core dispatch call.
//!
//! A [`Pipeline`] runs its interceptors in order, outermost first. Each one
//! sees the request before handing off to [`Next`] and the [`Reply`] after it
//! comes back. Interceptors share nothing between requests beyond what they
//! own themselves (the access log sink).

use crate::dispatch::Outcome;
use chrono::{DateTime, Local};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

/// What the interceptors know about an inbound request.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: String,
    pub url: String,
    pub remote_addr: String,
    pub received_at: DateTime<Local>,
}

impl RequestInfo {
    pub fn new(method: impl Into<String>, url: impl Into<String>, remote_addr: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            remote_addr: remote_addr.into(),
            received_at: Local::now(),
        }
    }
}

/// A response ready to be written to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl Reply {
    /// Keyed routes always answer 200; the outcome lives in the envelope.
    pub fn outcome(outcome: &Outcome) -> Self {
        let body = serde_json::to_string(&outcome.envelope()).unwrap_or_else(|e| {
            format!(r#"{{"code":{},"message":"encoding failed: {e}"}}"#, outcome.code())
        });
        Self {
            status: 200,
            content_type: "application/json; charset=utf-8",
            body,
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: 404,
            content_type: "text/plain",
            body: "404 page not found".to_owned(),
        }
    }
}

/// The remainder of the pipeline after the current interceptor.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Interceptor>],
    endpoint: Box<dyn FnOnce() -> Reply + 'a>,
}

impl Next<'_> {
    pub fn run(self, req: &RequestInfo) -> Reply {
        match self.chain.split_first() {
            Some((first, rest)) => first.intercept(
                req,
                Next {
                    chain: rest,
                    endpoint: self.endpoint,
                },
            ),
            None => (self.endpoint)(),
        }
    }
}

pub trait Interceptor: Send + Sync {
    fn before(&self, _req: &RequestInfo) {}

    fn after(&self, _req: &RequestInfo, _reply: &mut Reply) {}

    fn intercept(&self, req: &RequestInfo, next: Next<'_>) -> Reply {
        self.before(req);
        let mut reply = next.run(req);
        self.after(req, &mut reply);
        reply
    }
}

#[derive(Default, Clone)]
pub struct Pipeline {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interceptor inside the ones already added.
    #[must_use]
    pub fn with(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub fn run<'a>(&'a self, req: &RequestInfo, endpoint: impl FnOnce() -> Reply + 'a) -> Reply {
        Next {
            chain: &self.interceptors,
            endpoint: Box::new(endpoint),
        }
        .run(req)
    }
}

/// Contains any fault raised further down the pipeline and turns it into a
/// `-500` envelope for this request only.
#[derive(Debug, Default, Clone, Copy)]
pub struct Recovery;

impl Interceptor for Recovery {
    fn intercept(&self, req: &RequestInfo, next: Next<'_>) -> Reply {
        match panic::catch_unwind(AssertUnwindSafe(|| next.run(req))) {
            Ok(reply) => reply,
            Err(payload) => {
                let message = fault_message(payload.as_ref());
                error!("fault while handling {} {}: {message}", req.method, req.url);
                Reply::outcome(&Outcome::Fault(message))
            }
        }
    }
}

fn fault_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown fault".to_owned()
    }
}
