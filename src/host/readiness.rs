//! Single-shot readiness signal with a FIFO queue of deferred actions.
//!
//! Used for the host's "context initialized" gate and each browser's
//! "DevTools ready" gate. Actions submitted before the gate opens are queued
//! and run in submission order when it opens; afterwards they run inline.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

type Deferred = Box<dyn FnOnce() + Send + 'static>;

enum GateState {
    Pending(VecDeque<Deferred>),
    Open,
    Failed(String),
}

struct GateInner {
    name: String,
    state: Mutex<GateState>,
    signal: watch::Sender<Option<Result<(), String>>>,
}

/// Clonable handle to a readiness gate
#[derive(Clone)]
pub struct ReadyGate {
    inner: Arc<GateInner>,
}

impl std::fmt::Debug for ReadyGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadyGate")
            .field("name", &self.inner.name)
            .field("open", &self.is_open())
            .finish()
    }
}

impl ReadyGate {
    pub fn new(name: impl Into<String>) -> Self {
        let (signal, _) = watch::channel(None);
        Self {
            inner: Arc::new(GateInner {
                name: name.into(),
                state: Mutex::new(GateState::Pending(VecDeque::new())),
                signal,
            }),
        }
    }

    /// Runs `action` now if the gate is open, or queues it.
    ///
    /// Returns false if the gate failed; the action is dropped unrun.
    /// Queued actions run under the gate's lock and must not submit to the
    /// same gate.
    pub fn run_or_defer<F>(&self, action: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.inner.state.lock();
            match &mut *state {
                GateState::Pending(queue) => {
                    queue.push_back(Box::new(action));
                    return true;
                }
                GateState::Failed(_) => return false,
                GateState::Open => {}
            }
        }

        action();
        true
    }

    /// Opens the gate and flushes queued actions in FIFO order.
    ///
    /// Opening twice, or opening a failed gate, does nothing.
    pub fn open(&self) {
        {
            let mut state = self.inner.state.lock();
            let queue = match &mut *state {
                GateState::Pending(queue) => std::mem::take(queue),
                GateState::Open | GateState::Failed(_) => return,
            };

            tracing::debug!(gate = %self.inner.name, queued = queue.len(), "Gate opened");

            // Queued actions run before anything submitted concurrently.
            for action in queue {
                action();
            }
            *state = GateState::Open;
        }

        self.inner.signal.send_replace(Some(Ok(())));
    }

    /// Fails the gate, dropping queued actions. Ignored once open.
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let dropped = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                GateState::Pending(queue) => {
                    let dropped = std::mem::take(queue);
                    *state = GateState::Failed(reason.clone());
                    dropped
                }
                GateState::Open | GateState::Failed(_) => return,
            }
        };

        tracing::debug!(
            gate = %self.inner.name,
            dropped = dropped.len(),
            "Gate failed: {}",
            reason
        );
        drop(dropped);

        self.inner.signal.send_replace(Some(Err(reason)));
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.inner.state.lock(), GateState::Open)
    }

    /// Failure reason if the gate failed.
    pub fn failure(&self) -> Option<String> {
        match &*self.inner.state.lock() {
            GateState::Failed(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    /// Number of actions waiting for the gate.
    pub fn pending_len(&self) -> usize {
        match &*self.inner.state.lock() {
            GateState::Pending(queue) => queue.len(),
            _ => 0,
        }
    }

    /// Waits until the gate opens or fails.
    pub async fn wait(&self) -> Result<(), String> {
        let mut signal = self.inner.signal.subscribe();
        let outcome = match signal.wait_for(|outcome| outcome.is_some()).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => return Err(format!("{} gate dropped", self.inner.name)),
        };
        outcome.unwrap_or_else(|| Err(format!("{} gate dropped", self.inner.name)))
    }
}
