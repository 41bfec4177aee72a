/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Debug-protocol client over an adapter subprocess.
//!
//! Responses settle the multiplexer by `request_seq`; every event is emitted
//! on the event bus by name. Breakpoints live in a [`BreakpointManager`]
//! shared with the owning session, so they survive between debug runs.

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::adapters::{AdapterProfile, LaunchTarget, no_arguments};
use super::breakpoints::{Breakpoint, BreakpointManager};
use crate::error::{BrokerError, BrokerResult};
use crate::protocol::DapMessage;
use crate::protocol::dap::{
    DapRequest, DapResponse, EvaluateBody, ScopesBody, SetBreakpointsBody, StackTraceBody,
    StoppedEventBody, ThreadsBody, VariablesBody,
};
use crate::rpc::{
    EventBus, EventError, EventWait, MessageSink, Multiplexer, Outbound, PendingCall, ProcessConnection,
    RpcError,
};

/// Breakpoint table shared between a session and its debug client.
pub type SharedBreakpoints = Arc<Mutex<BreakpointManager>>;

/// How a run of the debuggee came to rest.
#[derive(Debug, Clone)]
pub enum Halt {
    /// Halted; the decoded `stopped` body.
    Stopped(StoppedEventBody),
    /// The program ended.
    Terminated,
}

/// Whichever of the two waits resolves first.
///
/// # Errors
///
/// Returns the error of the first wait to fail (timeout or teardown).
pub async fn first_halt(stopped: EventWait, terminated: EventWait) -> Result<Halt, EventError> {
    tokio::select! {
        outcome = stopped.wait() => outcome.map(|body| Halt::Stopped(serde_json::from_value(body).unwrap_or_default())),
        outcome = terminated.wait() => outcome.map(|_| Halt::Terminated),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct DebugSink {
    label: String,
    calls: Arc<Multiplexer<DapResponse>>,
    events: Arc<EventBus>,
    last_thread: Arc<Mutex<Option<i64>>>,
    terminated: Arc<AtomicBool>,
}

impl MessageSink<DapMessage> for DebugSink {
    fn on_message(&self, message: DapMessage, outbound: &Outbound<DapMessage>) {
        match message {
            DapMessage::Response(response) => {
                let outcome = if response.success {
                    Ok(response.clone())
                } else {
                    Err(RpcError::Remote {
                        code: 0,
                        message: response
                            .message
                            .clone()
                            .unwrap_or_else(|| format!("'{}' failed", response.command)),
                        data: response.body.clone(),
                    })
                };
                self.calls.settle(response.request_seq, outcome);
            }
            DapMessage::Event(event) => {
                let body = event.body.unwrap_or(Value::Null);
                match event.event.as_str() {
                    "stopped" => {
                        if let Some(thread) = body.get("threadId").and_then(Value::as_i64) {
                            *lock(&self.last_thread) = Some(thread);
                        }
                    }
                    "terminated" | "exited" => self.terminated.store(true, Ordering::SeqCst),
                    "output" => {
                        if let Some(output) = body.get("output").and_then(Value::as_str) {
                            debug!("[{} output] {}", self.label, output.trim_end());
                        }
                    }
                    _ => {}
                }
                trace!("[{}] event {}", self.label, event.event);
                self.events.emit(&event.event, &body);
            }
            DapMessage::Request(request) => {
                debug!("[{}] declining reverse request '{}'", self.label, request.command);
                let reply = DapResponse::unsupported(self.calls.next_id(), &request);
                if let Err(e) = outbound.send(&DapMessage::Response(reply)) {
                    warn!("[{}] failed to answer reverse request: {}", self.label, e);
                }
            }
        }
    }

    fn on_exit(&self, code: Option<i32>) {
        self.terminated.store(true, Ordering::SeqCst);
        let failed = self.calls.fail_all(&RpcError::ProcessExited { code });
        let cleared = self.events.clear(&format!("debug adapter exited (code {code:?})"));
        if failed + cleared > 0 {
            warn!(
                "[{}] adapter exit failed {} request(s) and {} event wait(s)",
                self.label, failed, cleared
            );
        }
    }
}

/// A debug adapter process and the state of the debuggee it controls.
pub struct DebugClient {
    label: String,
    adapter_id: String,
    program: PathBuf,
    connection: ProcessConnection<DapMessage>,
    calls: Arc<Multiplexer<DapResponse>>,
    events: Arc<EventBus>,
    breakpoints: SharedBreakpoints,
    last_thread: Arc<Mutex<Option<i64>>>,
    terminated: Arc<AtomicBool>,
    capabilities: Mutex<Value>,
    request_timeout: Option<Duration>,
}

impl DebugClient {
    /// Spawns the adapter in `cwd`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Spawn`] if the adapter cannot be started.
    pub fn start(
        profile: &dyn AdapterProfile,
        program: &Path,
        cwd: &Path,
        breakpoints: SharedBreakpoints,
    ) -> Result<Self, RpcError> {
        let label = format!("dap:{}", profile.name());
        let calls = Arc::new(Multiplexer::new());
        let events = Arc::new(EventBus::new());
        let last_thread = Arc::new(Mutex::new(None));
        let terminated = Arc::new(AtomicBool::new(false));

        let sink = Arc::new(DebugSink {
            label: label.clone(),
            calls: calls.clone(),
            events: events.clone(),
            last_thread: last_thread.clone(),
            terminated: terminated.clone(),
        });
        let connection = ProcessConnection::spawn(&label, &profile.launch(cwd), sink)?;

        Ok(Self {
            label,
            adapter_id: profile.adapter_id().to_string(),
            program: program.to_path_buf(),
            connection,
            calls,
            events,
            breakpoints,
            last_thread,
            terminated,
            capabilities: Mutex::new(Value::Null),
            request_timeout: None,
        })
    }

    /// Bounds every request by `timeout`.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Queues a request and returns its pending call without waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the adapter has exited or the writer stopped.
    pub fn send_request(
        &self,
        command: &str,
        arguments: Value,
    ) -> Result<PendingCall<DapResponse>, RpcError> {
        let call = self.calls.register()?;
        let request = DapMessage::Request(DapRequest {
            seq: call.id(),
            command: command.to_string(),
            arguments: Some(arguments),
        });
        if let Err(e) = self.connection.send(&request) {
            self.calls.forget(call.id());
            return Err(e);
        }
        trace!("[{}] request {} seq={}", self.label, command, call.id());
        Ok(call)
    }

    async fn settle(&self, command: &str, call: PendingCall<DapResponse>) -> Result<DapResponse, RpcError> {
        match self.request_timeout {
            Some(after) => {
                let seq = call.id();
                let outcome = call.wait_timeout(command, after).await;
                if matches!(outcome, Err(RpcError::Timeout { .. })) {
                    self.calls.forget(seq);
                }
                outcome
            }
            None => call.wait().await,
        }
    }

    /// Sends a request and waits for a successful response.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Remote`] for `success: false`, or
    /// [`RpcError::ProcessExited`] if the adapter dies first.
    pub async fn request(&self, command: &str, arguments: Value) -> Result<DapResponse, RpcError> {
        let call = self.send_request(command, arguments)?;
        self.settle(command, call).await
    }

    /// Sends a request and decodes its body.
    ///
    /// # Errors
    ///
    /// As [`Self::request`], plus [`RpcError::InvalidResponse`].
    pub async fn request_body<T: DeserializeOwned>(
        &self,
        command: &str,
        arguments: Value,
    ) -> Result<T, RpcError> {
        let response = self.request(command, arguments).await?;
        let body = response.body.unwrap_or_else(no_arguments);
        serde_json::from_value(body).map_err(|e| RpcError::InvalidResponse {
            method: command.to_string(),
            reason: e.to_string(),
        })
    }

    /// Registers a wait for the next `event`.
    #[must_use]
    pub fn wait_for(&self, event: &str, timeout: Duration) -> EventWait {
        self.events.wait_for(event, timeout)
    }

    /// `initialize`, asking for 0-based lines and columns.
    ///
    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn initialize(&self) -> Result<Value, RpcError> {
        let response = self
            .request(
                "initialize",
                json!({
                    "clientID": "lcp-broker",
                    "clientName": "lcp-broker",
                    "adapterID": self.adapter_id,
                    "pathFormat": "path",
                    "linesStartAt1": false,
                    "columnsStartAt1": false,
                    "supportsVariableType": true,
                    "supportsRunInTerminalRequest": false,
                }),
            )
            .await?;
        let capabilities = response.body.unwrap_or(Value::Null);
        *lock(&self.capabilities) = capabilities.clone();
        Ok(capabilities)
    }

    /// Runs the whole launch handshake and waits for the first halt.
    ///
    /// `initialize` → `launch` (not awaited; some adapters answer it only
    /// after configuration) → `initialized` event → breakpoint sync →
    /// `configurationDone` → `launch` response → `stopped` or `terminated`.
    ///
    /// # Errors
    ///
    /// Returns a debug protocol error if any request fails, or a timeout if
    /// an event does not arrive within `bound`.
    pub async fn launch(
        &self,
        profile: &dyn AdapterProfile,
        target: &LaunchTarget,
        bound: Duration,
    ) -> BrokerResult<Halt> {
        let initialized = self.wait_for("initialized", bound);
        let capabilities = self.initialize().await.map_err(BrokerError::debug)?;

        let stopped = self.wait_for("stopped", bound);
        let terminated = self.wait_for("terminated", bound);
        let launch = self
            .send_request("launch", profile.launch_arguments(target))
            .map_err(BrokerError::debug)?;

        // A launch that fails outright may arrive before (or instead of) `initialized`.
        let initialized = initialized.wait();
        let launch = self.settle("launch", launch);
        tokio::pin!(initialized, launch);
        let mut launched = false;
        tokio::select! {
            outcome = &mut initialized => {
                outcome.map_err(BrokerError::debug_event)?;
            }
            outcome = &mut launch => {
                outcome.map_err(BrokerError::debug)?;
                launched = true;
                (&mut initialized).await.map_err(BrokerError::debug_event)?;
            }
        }
        self.sync_all_breakpoints().await?;

        if capabilities
            .get("supportsConfigurationDoneRequest")
            .and_then(Value::as_bool)
            .unwrap_or(true)
        {
            self.request("configurationDone", no_arguments())
                .await
                .map_err(BrokerError::debug)?;
        }
        if !launched {
            (&mut launch).await.map_err(BrokerError::debug)?;
        }

        let halt = first_halt(stopped, terminated)
            .await
            .map_err(BrokerError::debug_event)?;
        match &halt {
            Halt::Stopped(body) => {
                info!("[{}] launched {} ({})", self.label, self.program.display(), body.reason);
            }
            Halt::Terminated => {
                info!("[{}] {} ran to completion", self.label, self.program.display());
            }
        }
        Ok(halt)
    }

    /// Sends the full enabled list for `file` and records verification.
    ///
    /// # Errors
    ///
    /// Returns a debug protocol error if the adapter rejects the request.
    pub async fn sync_breakpoints(&self, file: &Path) -> BrokerResult<Vec<Breakpoint>> {
        let payload = lock(&self.breakpoints).sync_payload(file);
        let lines: Vec<u32> = payload.iter().map(|bp| bp.line).collect();
        let body: SetBreakpointsBody = self
            .request_body(
                "setBreakpoints",
                json!({
                    "source": {
                        "path": file,
                        "name": file.file_name().map(|n| n.to_string_lossy().to_string()),
                    },
                    "breakpoints": payload,
                    "lines": lines,
                    "sourceModified": false,
                }),
            )
            .await
            .map_err(BrokerError::debug)?;

        let mut manager = lock(&self.breakpoints);
        manager.apply_acknowledgments(file, &body.breakpoints);
        Ok(manager.get_by_file(file))
    }

    /// Syncs every file that has breakpoints.
    ///
    /// # Errors
    ///
    /// Stops at the first file the adapter rejects.
    pub async fn sync_all_breakpoints(&self) -> BrokerResult<()> {
        let files: Vec<PathBuf> = lock(&self.breakpoints).breakpoints_for_sync().into_keys().collect();
        for file in files {
            self.sync_breakpoints(&file).await?;
        }
        Ok(())
    }

    /// `threads`.
    ///
    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn threads(&self) -> Result<ThreadsBody, RpcError> {
        self.request_body("threads", no_arguments()).await
    }

    /// `stackTrace` for `thread`.
    ///
    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn stack_trace(&self, thread: i64) -> Result<StackTraceBody, RpcError> {
        self.request_body(
            "stackTrace",
            json!({ "threadId": thread, "startFrame": 0, "levels": 64 }),
        )
        .await
    }

    /// `scopes` for a frame.
    ///
    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn scopes(&self, frame_id: i64) -> Result<ScopesBody, RpcError> {
        self.request_body("scopes", json!({ "frameId": frame_id })).await
    }

    /// `variables` of a container.
    ///
    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn variables(&self, reference: i64) -> Result<VariablesBody, RpcError> {
        self.request_body("variables", json!({ "variablesReference": reference }))
            .await
    }

    /// `evaluate` in a frame.
    ///
    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn evaluate(
        &self,
        expression: &str,
        frame_id: Option<i64>,
        context: &str,
    ) -> Result<EvaluateBody, RpcError> {
        let mut arguments = json!({ "expression": expression, "context": context });
        if let Some(frame) = frame_id {
            arguments["frameId"] = json!(frame);
        }
        self.request_body("evaluate", arguments).await
    }

    /// Sends an execution-control command (`continue`, `next`, ...) for `thread`.
    ///
    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn resume(&self, command: &str, thread: i64) -> Result<DapResponse, RpcError> {
        self.request(command, json!({ "threadId": thread })).await
    }

    /// `pause` for `thread`.
    ///
    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn pause(&self, thread: i64) -> Result<DapResponse, RpcError> {
        self.request("pause", json!({ "threadId": thread })).await
    }

    /// The explicit thread, else the last one that stopped, else the first live one.
    ///
    /// # Errors
    ///
    /// Returns a debug protocol error if the adapter reports no threads.
    pub async fn resolve_thread(&self, explicit: Option<i64>) -> BrokerResult<i64> {
        if let Some(thread) = explicit.or_else(|| *lock(&self.last_thread)) {
            return Ok(thread);
        }
        let threads = self.threads().await.map_err(BrokerError::debug)?;
        threads
            .threads
            .first()
            .map(|t| t.id)
            .ok_or_else(|| BrokerError::DebugProtocol {
                message: "Debuggee has no threads".to_string(),
                details: None,
            })
    }

    /// Best-effort `disconnect`, then process termination and event bus
    /// teardown. Never fails.
    pub async fn disconnect(&self, bound: Duration) {
        if self.connection.is_alive() {
            let graceful = self.request(
                "disconnect",
                json!({ "restart": false, "terminateDebuggee": true }),
            );
            match tokio::time::timeout(bound, graceful).await {
                Ok(Ok(_)) => debug!("[{}] disconnected", self.label),
                Ok(Err(e)) => warn!("[{}] disconnect failed: {}", self.label, e),
                Err(_) => warn!("[{}] disconnect timed out after {:?}", self.label, bound),
            }
        }
        self.connection.terminate().await;
        self.events.clear("debug session stopped");
        self.calls.fail_all(&RpcError::Transport("debug session stopped".into()));
        self.terminated.store(true, Ordering::SeqCst);
        lock(&self.breakpoints).reset_verification();
        info!("[{}] stopped", self.label);
    }

    /// Whether the adapter process is still running.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.connection.is_alive()
    }

    /// Whether the debuggee has ended.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Program being debugged.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Shared breakpoint table.
    #[must_use]
    pub const fn breakpoints(&self) -> &SharedBreakpoints {
        &self.breakpoints
    }

    /// Adapter process id.
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.connection.pid()
    }
}
