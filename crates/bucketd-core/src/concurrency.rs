use crate::CoreError;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug)]
struct InFlightState {
    active: usize,
    accepting: bool,
}

/// Counts requests that have been accepted and not yet finished.
///
/// Intake is a one-way gate: once [`close_intake`](Self::close_intake) runs,
/// [`try_enter`](Self::try_enter) refuses every new request while the ones
/// already admitted run to completion.
#[derive(Debug)]
pub struct InFlight {
    state: Mutex<InFlightState>,
    idle: Condvar,
}

impl Default for InFlight {
    fn default() -> Self {
        Self {
            state: Mutex::new(InFlightState {
                active: 0,
                accepting: true,
            }),
            idle: Condvar::new(),
        }
    }
}

impl InFlight {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, InFlightState> {
        // Counters stay consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit one request. `None` once intake is closed.
    pub fn try_enter(self: &Arc<Self>) -> Option<InFlightGuard> {
        let mut state = self.lock();
        if !state.accepting {
            return None;
        }
        state.active += 1;
        Some(InFlightGuard {
            tracker: Arc::clone(self),
        })
    }

    pub fn close_intake(&self) {
        let mut state = self.lock();
        if state.accepting {
            state.accepting = false;
            debug!("intake closed with {} request(s) in flight", state.active);
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.lock().accepting
    }

    pub fn active(&self) -> usize {
        self.lock().active
    }

    /// Block until no request is in flight or `timeout` elapses.
    /// Returns how many requests are still running.
    pub fn wait_idle(&self, timeout: Duration) -> usize {
        let state = self.lock();
        let (state, _) = self
            .idle
            .wait_timeout_while(state, timeout, |s| s.active > 0)
            .unwrap_or_else(PoisonError::into_inner);
        state.active
    }

    fn leave(&self) {
        let mut state = self.lock();
        state.active = state.active.saturating_sub(1);
        if state.active == 0 {
            self.idle.notify_all();
        }
    }
}

/// Marks one admitted request. Dropping it, including during unwinding,
/// ends the request.
#[derive(Debug)]
pub struct InFlightGuard {
    tracker: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.tracker.leave();
    }
}

/// Delivers a process shutdown request to whoever is waiting for it.
pub struct ShutdownSignal {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx }
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle that requests shutdown from any thread.
    pub fn trigger(&self) -> ShutdownTrigger {
        ShutdownTrigger {
            tx: self.tx.clone(),
        }
    }

    /// Route SIGINT and SIGTERM to this signal. A second signal while the
    /// first is being handled exits immediately with status 1.
    ///
    /// Only one handler can be installed per process.
    pub fn install_os_handler(&self) -> Result<(), CoreError> {
        let trigger = self.trigger();
        let mut requested = false;
        ctrlc::set_handler(move || {
            if requested {
                eprintln!("\nsecond signal received, exiting immediately");
                std::process::exit(1);
            }
            requested = true;
            info!("shutdown requested, draining in-flight requests...");
            trigger.fire();
        })
        .map_err(|e| CoreError::Signal(e.to_string()))
    }

    /// Block until shutdown is requested.
    pub fn wait(&self) {
        let _ = self.rx.recv();
    }

    /// Block up to `timeout`. Returns `true` if shutdown was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: Sender<()>,
}

impl ShutdownTrigger {
    pub fn fire(&self) {
        let _ = self.tx.send(());
    }
}
