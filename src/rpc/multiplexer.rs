// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Request/response correlation.
//!
//! Every outgoing request registers a pending call under a fresh id. The
//! reader task settles it when the matching response arrives, or fails all of
//! them when the process exits. Each call settles exactly once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::warn;

use super::error::RpcError;

type Settler<R> = oneshot::Sender<Result<R, RpcError>>;

struct State<R> {
    pending: HashMap<i64, Settler<R>>,
    closed: Option<RpcError>,
}

/// Correlates request ids with waiting callers.
pub struct Multiplexer<R> {
    next_id: AtomicI64,
    state: Mutex<State<R>>,
}

/// A registered request awaiting its response.
#[derive(Debug)]
pub struct PendingCall<R> {
    id: i64,
    rx: oneshot::Receiver<Result<R, RpcError>>,
}

impl<R> Default for Multiplexer<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Multiplexer<R> {
    /// Creates a multiplexer whose first id is 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            state: Mutex::new(State {
                pending: HashMap::new(),
                closed: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State<R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocates an id without registering a call (used for outgoing
    /// responses that share the sequence counter).
    pub fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Registers a new pending call under the next id.
    ///
    /// # Errors
    ///
    /// Returns the closing error if the process has already exited.
    pub fn register(&self) -> Result<PendingCall<R>, RpcError> {
        let mut state = self.state();
        if let Some(error) = &state.closed {
            return Err(error.clone());
        }

        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        state.pending.insert(id, tx);
        drop(state);

        Ok(PendingCall { id, rx })
    }

    /// Settles the call registered under `id`.
    ///
    /// Returns `false` (and logs) when no such call is outstanding, which
    /// covers duplicate and late responses.
    pub fn settle(&self, id: i64, outcome: Result<R, RpcError>) -> bool {
        let Some(sender) = self.state().pending.remove(&id) else {
            warn!("Received response for unknown request id: {}", id);
            return false;
        };

        // The caller may have stopped waiting; that is not an error here.
        let _ = sender.send(outcome);
        true
    }

    /// Drops a pending call without settling it (write failed, caller gave up).
    pub fn forget(&self, id: i64) -> bool {
        self.state().pending.remove(&id).is_some()
    }

    /// Fails every outstanding call with `error` and refuses new ones.
    ///
    /// Returns the number of calls that were settled.
    pub fn fail_all(&self, error: &RpcError) -> usize {
        let drained: Vec<_> = {
            let mut state = self.state();
            state.closed = Some(error.clone());
            state.pending.drain().collect()
        };

        let count = drained.len();
        for (_, sender) in drained {
            let _ = sender.send(Err(error.clone()));
        }
        count
    }

    /// Number of calls still waiting for a response.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.state().pending.len()
    }

    /// Whether the multiplexer has been closed by a process exit.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state().closed.is_some()
    }
}

impl<R> PendingCall<R> {
    /// The id the request must be sent with.
    #[must_use]
    pub const fn id(&self) -> i64 {
        self.id
    }

    /// Waits for the response.
    ///
    /// # Errors
    ///
    /// Returns whatever error the call was settled with.
    pub async fn wait(self) -> Result<R, RpcError> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(RpcError::Transport("response channel dropped".into())))
    }

    /// Waits for the response, giving up after `after`.
    ///
    /// The request itself cannot be retracted; on timeout the caller
    /// should `forget` the id so a late response is logged and dropped.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Timeout`] when the bound elapses.
    pub async fn wait_timeout(self, method: &str, after: Duration) -> Result<R, RpcError> {
        tokio::time::timeout(after, self.wait())
            .await
            .unwrap_or_else(|_| {
                Err(RpcError::Timeout {
                    method: method.to_string(),
                    after,
                })
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ids_are_monotonic_and_unique() {
        let mux = Multiplexer::<u32>::new();
        let a = mux.register().unwrap();
        let b = mux.register().unwrap();
        let c = mux.next_id();
        assert_eq!((a.id(), b.id(), c), (1, 2, 3));
        assert_eq!(mux.register().unwrap().id(), 4);
    }

    #[tokio::test]
    async fn test_settle_resolves_matching_call() {
        let mux = Multiplexer::<&str>::new();
        let call = mux.register().unwrap();
        assert!(mux.settle(call.id(), Ok("done")));
        assert_eq!(call.wait().await.unwrap(), "done");
        assert_eq!(mux.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_unknown_id_settles_nothing() {
        let mux = Multiplexer::<u8>::new();
        let call = mux.register().unwrap();
        assert!(!mux.settle(call.id() + 100, Ok(1)));
        assert_eq!(mux.outstanding(), 1);

        assert!(mux.settle(call.id(), Ok(2)));
        assert_eq!(call.wait().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_response_is_ignored() {
        let mux = Multiplexer::<u8>::new();
        let call = mux.register().unwrap();
        let id = call.id();
        assert!(mux.settle(id, Ok(1)));
        assert!(!mux.settle(id, Ok(2)));
        assert_eq!(call.wait().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_out_of_order_responses() {
        let mux = Multiplexer::<i64>::new();
        let calls: Vec<_> = (0..5).map(|_| mux.register().unwrap()).collect();
        for id in (1..=5).rev() {
            assert!(mux.settle(id, Ok(id * 10)));
        }
        for call in calls {
            let id = call.id();
            assert_eq!(call.wait().await.unwrap(), id * 10);
        }
    }

    #[tokio::test]
    async fn test_process_exit_fails_all_and_closes() {
        let mux = Multiplexer::<()>::new();
        let first = mux.register().unwrap();
        let second = mux.register().unwrap();
        mux.settle(first.id(), Ok(()));

        let exit = RpcError::ProcessExited { code: Some(3) };
        assert_eq!(mux.fail_all(&exit), 1);

        assert!(first.wait().await.is_ok());
        let err = second.wait().await.unwrap_err();
        assert_eq!(err.exit_code(), Some(3));

        assert!(mux.is_closed());
        assert!(matches!(mux.register(), Err(RpcError::ProcessExited { code: Some(3) })));
    }

    #[tokio::test]
    async fn test_remote_error_is_delivered() {
        let mux = Multiplexer::<()>::new();
        let call = mux.register().unwrap();
        mux.settle(
            call.id(),
            Err(RpcError::Remote {
                code: -32603,
                message: "boom".into(),
                data: None,
            }),
        );
        assert!(matches!(call.wait().await, Err(RpcError::Remote { code: -32603, .. })));
    }

    #[tokio::test]
    async fn test_wait_timeout_then_forget() {
        let mux = Multiplexer::<()>::new();
        let call = mux.register().unwrap();
        let id = call.id();
        let result = call.wait_timeout("textDocument/hover", Duration::from_millis(20)).await;
        assert!(matches!(result, Err(RpcError::Timeout { .. })));
        assert!(mux.forget(id));
        assert!(!mux.settle(id, Ok(())));
    }
}
