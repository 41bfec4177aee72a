// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! One-shot waits for named asynchronous events.
//!
//! A waiter is registered when [`EventBus::wait_for`] is called, not when the
//! returned future is first polled, so callers can register before sending
//! the request that triggers the event without racing the reader task.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use super::error::EventError;

type Settler = oneshot::Sender<Result<Value, EventError>>;

struct Waiter {
    token: u64,
    tx: Settler,
}

#[derive(Default)]
struct BusState {
    waiters: HashMap<String, Vec<Waiter>>,
    next_token: u64,
    cleared: Option<String>,
}

/// Registry of event name to single-fire continuations.
#[derive(Default)]
pub struct EventBus {
    state: Mutex<BusState>,
}

/// A registered wait; resolves on the first matching emit, timeout, or clear.
pub struct EventWait {
    bus: Arc<EventBus>,
    event: String,
    token: u64,
    timeout: Duration,
    rx: Option<oneshot::Receiver<Result<Value, EventError>>>,
}

impl EventBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a wait for `event`, bounded by `timeout`.
    ///
    /// On a cleared bus the returned wait fails immediately.
    #[must_use]
    pub fn wait_for(self: &Arc<Self>, event: &str, timeout: Duration) -> EventWait {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state();
        state.next_token += 1;
        let token = state.next_token;

        if let Some(reason) = &state.cleared {
            let _ = tx.send(Err(EventError::Cleared {
                event: event.to_string(),
                reason: reason.clone(),
            }));
        } else {
            state
                .waiters
                .entry(event.to_string())
                .or_default()
                .push(Waiter { token, tx });
        }
        drop(state);

        trace!("Waiting for '{}' event (token {}, {:?})", event, token, timeout);
        EventWait {
            bus: Arc::clone(self),
            event: event.to_string(),
            token,
            timeout,
            rx: Some(rx),
        }
    }

    /// Settles every waiter registered for `event` with `body`.
    ///
    /// Returns how many waiters were woken.
    pub fn emit(&self, event: &str, body: &Value) -> usize {
        let waiters = self.state().waiters.remove(event).unwrap_or_default();
        let count = waiters.len();
        for waiter in waiters {
            let _ = waiter.tx.send(Ok(body.clone()));
        }
        if count > 0 {
            debug!("Event '{}' woke {} waiter(s)", event, count);
        }
        count
    }

    /// Fails every outstanding waiter and refuses new ones.
    pub fn clear(&self, reason: &str) -> usize {
        let drained: Vec<(String, Vec<Waiter>)> = {
            let mut state = self.state();
            state.cleared = Some(reason.to_string());
            state.waiters.drain().collect()
        };

        let mut count = 0;
        for (event, waiters) in drained {
            for waiter in waiters {
                count += 1;
                let _ = waiter.tx.send(Err(EventError::Cleared {
                    event: event.clone(),
                    reason: reason.to_string(),
                }));
            }
        }
        count
    }

    /// Number of registered waiters across all events.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state().waiters.values().map(Vec::len).sum()
    }

    fn deregister(&self, event: &str, token: u64) {
        let mut state = self.state();
        if let Some(waiters) = state.waiters.get_mut(event) {
            waiters.retain(|w| w.token != token);
            if waiters.is_empty() {
                state.waiters.remove(event);
            }
        }
    }
}

impl EventWait {
    /// Waits for the event body.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Timeout`] if nothing arrived in time, or
    /// [`EventError::Cleared`] if the bus was torn down.
    pub async fn wait(mut self) -> Result<Value, EventError> {
        let Some(rx) = self.rx.take() else {
            return Err(self.cleared("wait already consumed"));
        };

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(self.cleared("event bus dropped")),
            Err(_) => {
                self.bus.deregister(&self.event, self.token);
                Err(EventError::Timeout {
                    event: self.event.clone(),
                    after: self.timeout,
                })
            }
        }
    }

    fn cleared(&self, reason: &str) -> EventError {
        EventError::Cleared {
            event: self.event.clone(),
            reason: reason.to_string(),
        }
    }
}

impl Drop for EventWait {
    fn drop(&mut self) {
        // A wait dropped before resolving must not linger in the table.
        self.bus.deregister(&self.event, self.token);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_wait_times_out_without_emit() {
        let bus = Arc::new(EventBus::new());
        let started = std::time::Instant::now();
        let result = bus.wait_for("stopped", Duration::from_millis(50)).wait().await;

        assert!(matches!(result, Err(EventError::Timeout { ref event, .. }) if event == "stopped"));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(bus.pending(), 0);
    }

    #[tokio::test]
    async fn test_emit_after_registration_resolves() {
        let bus = Arc::new(EventBus::new());
        let wait = bus.wait_for("stopped", Duration::from_millis(5000));

        let emitter = Arc::clone(&bus);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            emitter.emit("stopped", &json!({"reason": "breakpoint"}));
        });

        let body = wait.wait().await.unwrap();
        assert_eq!(body, json!({"reason": "breakpoint"}));
    }

    #[tokio::test]
    async fn test_emit_before_await_is_not_lost() {
        let bus = Arc::new(EventBus::new());
        let wait = bus.wait_for("initialized", Duration::from_millis(100));
        assert_eq!(bus.emit("initialized", &Value::Null), 1);
        assert_eq!(wait.wait().await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_emit_wakes_every_waiter_for_name_only() {
        let bus = Arc::new(EventBus::new());
        let a = bus.wait_for("stopped", Duration::from_secs(1));
        let b = bus.wait_for("stopped", Duration::from_secs(1));
        let other = bus.wait_for("terminated", Duration::from_millis(30));

        assert_eq!(bus.emit("stopped", &json!(1)), 2);
        assert_eq!(a.wait().await.unwrap(), json!(1));
        assert_eq!(b.wait().await.unwrap(), json!(1));
        assert!(matches!(other.wait().await, Err(EventError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_emit_without_waiters_is_noop() {
        let bus = EventBus::new();
        assert_eq!(bus.emit("output", &json!({"output": "hi"})), 0);
    }

    #[tokio::test]
    async fn test_clear_fails_outstanding_and_future_waits() {
        let bus = Arc::new(EventBus::new());
        let wait = bus.wait_for("stopped", Duration::from_secs(5));
        assert_eq!(bus.clear("adapter exited"), 1);

        assert!(matches!(
            wait.wait().await,
            Err(EventError::Cleared { ref reason, .. }) if reason == "adapter exited"
        ));
        assert!(matches!(
            bus.wait_for("stopped", Duration::from_secs(5)).wait().await,
            Err(EventError::Cleared { .. })
        ));
    }

    #[tokio::test]
    async fn test_dropped_wait_deregisters() {
        let bus = Arc::new(EventBus::new());
        let wait = bus.wait_for("stopped", Duration::from_secs(5));
        assert_eq!(bus.pending(), 1);
        drop(wait);
        assert_eq!(bus.pending(), 0);
    }
}
