use bucketd_store::{KvBackend, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

/// Envelope codes carried in every JSON response.
pub const CODE_OK: i32 = 1;
pub const CODE_FAILED: i32 = -1;
pub const CODE_FAULT: i32 = -500;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One key-addressed operation, mapped onto exactly one store transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Read { key: String },
    Write { key: String, body: Vec<u8> },
    Delete { key: String },
}

impl Operation {
    pub fn key(&self) -> &str {
        match self {
            Operation::Read { key } | Operation::Write { key, .. } | Operation::Delete { key } => {
                key
            }
        }
    }
}

/// Result of a dispatched operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Read succeeded. An absent key reads as the empty string.
    Value(String),
    /// Write or delete succeeded.
    Done,
    /// The payload was rejected before any transaction was issued.
    Invalid(String),
    /// The store (or the server) could not complete the operation.
    Failed(String),
    /// An unexpected fault was contained at the request boundary.
    Fault(String),
}

impl Outcome {
    pub fn code(&self) -> i32 {
        match self {
            Outcome::Value(_) | Outcome::Done => CODE_OK,
            Outcome::Invalid(_) | Outcome::Failed(_) => CODE_FAILED,
            Outcome::Fault(_) => CODE_FAULT,
        }
    }

    pub fn envelope(&self) -> Envelope {
        let code = self.code();
        match self {
            Outcome::Value(v) => Envelope {
                code,
                value: Some(v.clone()),
                message: None,
            },
            Outcome::Done => Envelope {
                code,
                value: None,
                message: None,
            },
            Outcome::Invalid(m) | Outcome::Failed(m) | Outcome::Fault(m) => Envelope {
                code,
                value: None,
                message: Some(m.clone()),
            },
        }
    }
}

/// JSON body of every keyed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Request body of a write. A missing or null `value`, or a `null` body,
/// writes the empty string.
#[derive(Debug, Default, Deserialize)]
struct WriteRequest {
    #[serde(default)]
    value: Option<String>,
}

/// Validates an operation and runs it as a single store transaction.
///
/// The backend is injected at construction; the dispatcher never opens or
/// closes it. Failures are returned, never retried.
pub struct Dispatcher {
    backend: Arc<dyn KvBackend>,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    pub fn execute(&self, op: Operation) -> Outcome {
        match self.run(op) {
            Ok(outcome) => outcome,
            Err(DispatchError::Validation(msg)) => {
                debug!("rejected payload: {msg}");
                Outcome::Invalid(msg)
            }
            Err(DispatchError::Store(e)) => {
                error!("store operation failed: {e}");
                Outcome::Failed(e.to_string())
            }
        }
    }

    fn run(&self, op: Operation) -> Result<Outcome, DispatchError> {
        match op {
            Operation::Read { key } => {
                let value = self.backend.get(&key)?;
                Ok(Outcome::Value(value.unwrap_or_default()))
            }
            Operation::Write { key, body } => {
                let req = parse_write(&body)?;
                self.backend.put(&key, req.value.as_deref().unwrap_or_default())?;
                Ok(Outcome::Done)
            }
            Operation::Delete { key } => {
                self.backend.delete(&key)?;
                Ok(Outcome::Done)
            }
        }
    }
}

fn parse_write(body: &[u8]) -> Result<WriteRequest, DispatchError> {
    serde_json::from_slice::<Option<WriteRequest>>(body)
        .map(Option::unwrap_or_default)
        .map_err(|e| DispatchError::Validation(e.to_string()))
}
