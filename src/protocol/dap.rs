// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Debug Adapter Protocol envelopes and the request/response bodies the
//! broker uses.
//!
//! Only the fields the broker reads or writes are modelled; everything else
//! passes through as raw JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Any message on a debug-protocol stream, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DapMessage {
    /// Request from either side.
    Request(DapRequest),
    /// Response to an earlier request.
    Response(DapResponse),
    /// Asynchronous event from the adapter.
    Event(DapEvent),
}

/// A DAP request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DapRequest {
    /// Sequence number of this message.
    pub seq: i64,
    /// Command name.
    pub command: String,
    /// Command arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// A DAP response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DapResponse {
    /// Sequence number of this message.
    pub seq: i64,
    /// Sequence number of the request being answered.
    pub request_seq: i64,
    /// Whether the request succeeded.
    pub success: bool,
    /// Command that was answered.
    pub command: String,
    /// Error text when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Response payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// A DAP event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DapEvent {
    /// Sequence number of this message.
    pub seq: i64,
    /// Event name.
    pub event: String,
    /// Event payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl DapResponse {
    /// Builds a failure response to a reverse request we do not support.
    #[must_use]
    pub fn unsupported(seq: i64, request: &DapRequest) -> Self {
        Self {
            seq,
            request_seq: request.seq,
            success: false,
            command: request.command.clone(),
            message: Some(format!("'{}' is not supported by this client", request.command)),
            body: None,
        }
    }
}

/// Body of a `stopped` event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedEventBody {
    /// Why execution stopped (`breakpoint`, `step`, `pause`, `entry`, ...).
    #[serde(default)]
    pub reason: String,
    /// Thread that stopped.
    #[serde(default)]
    pub thread_id: Option<i64>,
    /// Additional human-readable detail.
    #[serde(default)]
    pub description: Option<String>,
    /// Whether every thread stopped.
    #[serde(default)]
    pub all_threads_stopped: Option<bool>,
    /// Breakpoints that triggered the stop.
    #[serde(default)]
    pub hit_breakpoint_ids: Option<Vec<i64>>,
}

/// One source breakpoint as sent in `setBreakpoints`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBreakpoint {
    /// Protocol line (0-based under this client's negotiation).
    pub line: u32,
    /// Break only when this expression is true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Break only after this many hits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hit_condition: Option<String>,
    /// Log instead of stopping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_message: Option<String>,
}

/// Adapter acknowledgment of one breakpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BreakpointAck {
    /// Whether the adapter could place it.
    #[serde(default)]
    pub verified: bool,
    /// Adapter message explaining an unverified breakpoint.
    #[serde(default)]
    pub message: Option<String>,
}

/// Body of a `setBreakpoints` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SetBreakpointsBody {
    /// Acknowledgments in the order the breakpoints were sent.
    #[serde(default)]
    pub breakpoints: Vec<BreakpointAck>,
}

/// Source reference inside a stack frame.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Source {
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// File system path.
    #[serde(default)]
    pub path: Option<String>,
}

/// One frame of a `stackTrace` response.
#[derive(Debug, Clone, Deserialize)]
pub struct StackFrame {
    /// Frame id for `scopes`/`evaluate`.
    pub id: i64,
    /// Function name.
    pub name: String,
    /// Source location.
    #[serde(default)]
    pub source: Option<Source>,
    /// Protocol line.
    #[serde(default)]
    pub line: i64,
    /// Protocol column.
    #[serde(default)]
    pub column: i64,
}

/// Body of a `stackTrace` response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceBody {
    /// Frames, innermost first.
    #[serde(default)]
    pub stack_frames: Vec<StackFrame>,
}

/// One scope of a `scopes` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    /// Scope name (`Locals`, `Globals`, ...).
    pub name: String,
    /// Handle for `variables`.
    pub variables_reference: i64,
    /// Whether fetching is expensive.
    #[serde(default)]
    pub expensive: bool,
}

/// Body of a `scopes` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScopesBody {
    /// Scopes of the frame.
    #[serde(default)]
    pub scopes: Vec<Scope>,
}

/// One variable of a `variables` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    /// Variable name.
    pub name: String,
    /// Rendered value.
    pub value: String,
    /// Type name if the adapter reports one.
    #[serde(default, rename = "type")]
    pub type_name: Option<String>,
    /// Non-zero when the value has children.
    #[serde(default)]
    pub variables_reference: i64,
}

/// Body of a `variables` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VariablesBody {
    /// Variables of the container.
    #[serde(default)]
    pub variables: Vec<Variable>,
}

/// Body of an `evaluate` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateBody {
    /// Rendered result.
    pub result: String,
    /// Type name if reported.
    #[serde(default, rename = "type")]
    pub type_name: Option<String>,
    /// Non-zero when the result has children.
    #[serde(default)]
    pub variables_reference: i64,
}

/// One entry of a `threads` response.
#[derive(Debug, Clone, Deserialize)]
pub struct Thread {
    /// Thread id.
    pub id: i64,
    /// Thread name.
    #[serde(default)]
    pub name: String,
}

/// Body of a `threads` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThreadsBody {
    /// Live threads.
    #[serde(default)]
    pub threads: Vec<Thread>,
}
