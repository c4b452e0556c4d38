//! Readiness barrier shared by the bridges of one job.
//!
//! The transcoder may only start once every bridge reports "listening";
//! otherwise it can fail to find a named input the instant it starts.

use crate::error::{CoreError, CoreResult};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct GateState {
    expected: usize,
    arrived: usize,
    failures: Vec<String>,
}

/// Counts bridges that reached "listening" (or failed trying).
#[derive(Debug, Default)]
pub struct ReadinessGate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers one more bridge that must arrive before the gate opens.
    pub fn expect_one(&self) {
        self.lock().expected += 1;
    }

    /// Called by a bridge task once its endpoint is listening.
    pub fn arrive(&self) {
        self.lock().arrived += 1;
        self.cond.notify_all();
    }

    /// Called by a bridge task whose endpoint could not be created.
    pub fn fail(&self, reason: impl Into<String>) {
        let mut state = self.lock();
        state.arrived += 1;
        state.failures.push(reason.into());
        self.cond.notify_all();
    }

    /// Number of bridges that have arrived so far.
    pub fn arrived(&self) -> usize {
        self.lock().arrived
    }

    /// Blocks until every expected bridge arrived, one failed, or `timeout` elapsed.
    pub fn wait(&self, timeout: Duration) -> CoreResult<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(reason) = state.failures.first() {
                return Err(CoreError::BridgeSetup(reason.clone()));
            }
            if state.arrived >= state.expected {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(CoreError::BridgeSetup(format!(
                    "only {} of {} virtual inputs became ready within {:?}",
                    state.arrived, state.expected, timeout
                )));
            }
            state = self
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}
