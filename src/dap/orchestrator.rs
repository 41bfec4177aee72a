// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Atomic step-and-inspect.
//!
//! One call issues an execution-control request, waits for the debuggee to
//! stop (pausing it if the stop never comes), and gathers the stack and the
//! top frame's locals. Callers never observe the intermediate states.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

use super::client::{DebugClient, Halt, first_halt};
use crate::config::DebugConfig;
use crate::error::{BrokerError, BrokerResult};
use crate::position::to_one_based_signed;
use crate::protocol::dap::{Scope, StackFrame, StoppedEventBody, Variable};
use crate::rpc::EventError;

/// Execution-control request issued by a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepAction {
    /// Run until the next stop.
    Continue,
    /// Step over.
    Next,
    /// Step into.
    StepIn,
    /// Step out.
    StepOut,
}

impl StepAction {
    /// Debug-protocol command name.
    #[must_use]
    pub const fn command(self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Next => "next",
            Self::StepIn => "stepIn",
            Self::StepOut => "stepOut",
        }
    }
}

/// Bounds on the two stop waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepTimeouts {
    /// Wait after the action itself.
    pub stop: Duration,
    /// Wait after the fallback `pause`.
    pub pause: Duration,
}

impl Default for StepTimeouts {
    fn default() -> Self {
        Self {
            stop: Duration::from_secs(5),
            pause: Duration::from_secs(2),
        }
    }
}

impl From<&DebugConfig> for StepTimeouts {
    fn from(config: &DebugConfig) -> Self {
        Self {
            stop: Duration::from_millis(config.stop_timeout_ms),
            pause: Duration::from_millis(config.pause_timeout_ms),
        }
    }
}

/// Whether the debuggee is halted or gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DebugStatus {
    /// Halted and inspectable.
    Stopped,
    /// Program finished during the step.
    Terminated,
}

/// One stack frame, 1-based.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameInfo {
    /// Frame id for `evaluate`.
    pub id: i64,
    /// Function name.
    pub name: String,
    /// Source file, if known.
    pub file: Option<PathBuf>,
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
}

impl From<&StackFrame> for FrameInfo {
    fn from(frame: &StackFrame) -> Self {
        Self {
            id: frame.id,
            name: frame.name.clone(),
            file: frame
                .source
                .as_ref()
                .and_then(|s| s.path.as_ref())
                .map(PathBuf::from),
            line: to_one_based_signed(frame.line),
            column: to_one_based_signed(frame.column),
        }
    }
}

/// One local variable.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableInfo {
    /// Name.
    pub name: String,
    /// Rendered value.
    pub value: String,
    /// Type name, if reported.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    /// Non-zero when the value can be expanded.
    pub variables_reference: i64,
}

impl From<Variable> for VariableInfo {
    fn from(variable: Variable) -> Self {
        Self {
            name: variable.name,
            value: variable.value,
            type_name: variable.type_name,
            variables_reference: variable.variables_reference,
        }
    }
}

/// Snapshot returned by every step, recomputed from scratch each time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugState {
    /// Halted or finished.
    pub status: DebugStatus,
    /// Stop reason (`entry`, `breakpoint`, `step`, `pause`, ...).
    pub reason: Option<String>,
    /// Thread that stopped.
    pub thread_id: Option<i64>,
    /// File of the top frame.
    pub current_file: Option<PathBuf>,
    /// 1-based line of the top frame.
    pub current_line: Option<u32>,
    /// Call stack, innermost first.
    pub frames: Vec<FrameInfo>,
    /// Locals of the top frame.
    pub locals: Vec<VariableInfo>,
    /// Set when the stop came from the fallback pause.
    pub forced_pause: bool,
}

impl DebugState {
    fn terminated() -> Self {
        Self {
            status: DebugStatus::Terminated,
            reason: Some("terminated".to_string()),
            thread_id: None,
            current_file: None,
            current_line: None,
            frames: Vec::new(),
            locals: Vec::new(),
            forced_pause: false,
        }
    }
}

/// State after a launch: the entry stop, or termination if the program ran
/// to the end without halting.
///
/// # Errors
///
/// Returns a debug protocol error if gathering the stack fails.
pub async fn settle_launch(client: &DebugClient, halt: Halt) -> BrokerResult<DebugState> {
    match halt {
        Halt::Stopped(body) => gather_state(client, &body, false).await,
        Halt::Terminated => Ok(DebugState::terminated()),
    }
}

/// Issues `action` on `thread` and returns the state at the next stop.
///
/// # Errors
///
/// Returns [`BrokerError::Timeout`] if neither the action nor the fallback
/// pause produced a stop, or a debug protocol error from any request.
pub async fn step(
    client: &DebugClient,
    action: StepAction,
    thread: Option<i64>,
    timeouts: StepTimeouts,
) -> BrokerResult<DebugState> {
    if client.is_terminated() {
        return Ok(DebugState::terminated());
    }
    let thread = client.resolve_thread(thread).await?;

    let stopped = client.wait_for("stopped", timeouts.stop);
    let terminated = client.wait_for("terminated", timeouts.stop);
    client
        .resume(action.command(), thread)
        .await
        .map_err(BrokerError::debug)?;

    match first_halt(stopped, terminated).await {
        Ok(Halt::Stopped(body)) => gather_state(client, &body, false).await,
        Ok(Halt::Terminated) => Ok(DebugState::terminated()),
        Err(EventError::Timeout { .. }) => {
            warn!(
                "No stop within {:?} after '{}'; pausing thread {}",
                timeouts.stop,
                action.command(),
                thread
            );
            force_pause(client, thread, timeouts.pause).await
        }
        Err(cleared) => Err(BrokerError::debug_event(cleared)),
    }
}

async fn force_pause(client: &DebugClient, thread: i64, bound: Duration) -> BrokerResult<DebugState> {
    let stopped = client.wait_for("stopped", bound);
    client.pause(thread).await.map_err(BrokerError::debug)?;
    match stopped.wait().await {
        Ok(body) => gather_state(client, &decode_stop(body), true).await,
        Err(EventError::Timeout { .. }) => Err(BrokerError::Timeout(format!(
            "Execution could not be confirmed stopped: no stop event within {bound:?} after pause"
        ))),
        Err(cleared) => Err(BrokerError::debug_event(cleared)),
    }
}

fn decode_stop(body: Value) -> StoppedEventBody {
    serde_json::from_value(body).unwrap_or_default()
}

/// Collects stack, scopes and locals for a stop.
///
/// # Errors
///
/// Returns a debug protocol error if any of the three requests fails.
pub async fn gather_state(
    client: &DebugClient,
    stop: &StoppedEventBody,
    forced_pause: bool,
) -> BrokerResult<DebugState> {
    let thread = client.resolve_thread(stop.thread_id).await?;
    let trace = client.stack_trace(thread).await.map_err(BrokerError::debug)?;
    let frames: Vec<FrameInfo> = trace.stack_frames.iter().map(FrameInfo::from).collect();

    let locals = match frames.first() {
        Some(top) => {
            let scopes = client.scopes(top.id).await.map_err(BrokerError::debug)?;
            match pick_locals(&scopes.scopes) {
                Some(scope) => client
                    .variables(scope.variables_reference)
                    .await
                    .map_err(BrokerError::debug)?
                    .variables
                    .into_iter()
                    .map(VariableInfo::from)
                    .collect(),
                None => Vec::new(),
            }
        }
        None => Vec::new(),
    };

    debug!("Stopped ({}) with {} frame(s)", stop.reason, frames.len());
    Ok(DebugState {
        status: DebugStatus::Stopped,
        reason: Some(stop.reason.clone()),
        thread_id: Some(thread),
        current_file: frames.first().and_then(|f| f.file.clone()),
        current_line: frames.first().map(|f| f.line),
        frames,
        locals,
        forced_pause,
    })
}

fn pick_locals(scopes: &[Scope]) -> Option<&Scope> {
    scopes
        .iter()
        .find(|s| s.name.eq_ignore_ascii_case("locals"))
        .or_else(|| scopes.first())
}
