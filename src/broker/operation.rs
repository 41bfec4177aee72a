// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Wire form of the caller-facing operations.
//!
//! One JSON object per operation, discriminated by `op`:
//!
//! ```json
//! {"op": "debug_step", "sessionId": "18c...", "action": "next"}
//! ```

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::dap::{BreakpointId, StepAction};

const fn default_true() -> bool {
    true
}

/// A caller-facing operation. All lines and columns are 1-based.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Operation {
    /// Resumes `session_id`, or creates a session rooted at `workspace_root`.
    OpenSession {
        /// Existing session.
        #[serde(default)]
        session_id: Option<String>,
        /// Root for a new session.
        #[serde(default)]
        workspace_root: Option<PathBuf>,
    },
    /// Shuts down every client of a session and forgets it.
    StopSession {
        /// Session to stop.
        session_id: String,
    },
    /// Status of one session.
    SessionStatus {
        /// Session to describe.
        session_id: String,
    },
    /// Status of every session.
    ListSessions,
    /// Starts (or reuses) the analysis client for a file or language.
    ClientFor {
        /// Session.
        session_id: String,
        /// File whose language selects the server.
        #[serde(default)]
        file: Option<PathBuf>,
        /// Language ID, when no file is given.
        #[serde(default)]
        language: Option<String>,
    },
    /// Raw request to an analysis server.
    AnalysisRequest {
        /// Session.
        session_id: String,
        /// File to open first; also selects the server.
        #[serde(default)]
        file: Option<PathBuf>,
        /// Language ID, when no file is given.
        #[serde(default)]
        language: Option<String>,
        /// LSP method.
        method: String,
        /// LSP params, passed through untouched.
        #[serde(default)]
        params: Value,
    },
    /// `didOpen`, or a refresh if the file changed on disk.
    OpenFile {
        /// Session.
        session_id: String,
        /// File to open.
        file: PathBuf,
    },
    /// `didChange` with caller-supplied text.
    UpdateFile {
        /// Session.
        session_id: String,
        /// File to update.
        file: PathBuf,
        /// Full new text.
        text: String,
    },
    /// `didClose`.
    CloseFile {
        /// Session.
        session_id: String,
        /// File to close.
        file: PathBuf,
    },
    /// Pushed diagnostics for a file.
    Diagnostics {
        /// Session.
        session_id: String,
        /// File to check.
        file: PathBuf,
    },
    /// Hover at a position.
    Hover {
        /// Session.
        session_id: String,
        /// File.
        file: PathBuf,
        /// 1-based line.
        line: u32,
        /// 1-based column.
        column: u32,
    },
    /// Definition of the symbol at a position.
    Definition {
        /// Session.
        session_id: String,
        /// File.
        file: PathBuf,
        /// 1-based line.
        line: u32,
        /// 1-based column.
        column: u32,
    },
    /// Symbols named `name` in a file.
    FindSymbol {
        /// Session.
        session_id: String,
        /// File to search.
        file: PathBuf,
        /// Symbol name.
        name: String,
    },
    /// Starts the program under a debug adapter.
    DebugLaunch {
        /// Session.
        session_id: String,
        /// Program to run.
        program: PathBuf,
        /// Program arguments.
        #[serde(default)]
        args: Vec<String>,
        /// Extra environment.
        #[serde(default)]
        env: HashMap<String, String>,
        /// Working directory; defaults to the session root.
        #[serde(default)]
        cwd: Option<PathBuf>,
        /// Halt before the first line (default: true).
        #[serde(default = "default_true")]
        stop_on_entry: bool,
        /// Adapter language; detected from the program when absent.
        #[serde(default)]
        language: Option<String>,
    },
    /// Adds a breakpoint.
    AddBreakpoint {
        /// Session.
        session_id: String,
        /// Source file.
        file: PathBuf,
        /// 1-based line.
        line: u32,
        /// Break only when true.
        #[serde(default)]
        condition: Option<String>,
        /// Break only after this many hits.
        #[serde(default)]
        hit_condition: Option<String>,
        /// Log instead of stopping.
        #[serde(default)]
        log_message: Option<String>,
    },
    /// Removes a breakpoint.
    RemoveBreakpoint {
        /// Session.
        session_id: String,
        /// Breakpoint id.
        id: BreakpointId,
    },
    /// Enables a breakpoint.
    EnableBreakpoint {
        /// Session.
        session_id: String,
        /// Breakpoint id.
        id: BreakpointId,
    },
    /// Disables a breakpoint without forgetting it.
    DisableBreakpoint {
        /// Session.
        session_id: String,
        /// Breakpoint id.
        id: BreakpointId,
    },
    /// Breakpoints of the session, optionally for one file.
    ListBreakpoints {
        /// Session.
        session_id: String,
        /// Only this file.
        #[serde(default)]
        file: Option<PathBuf>,
    },
    /// Removes every breakpoint.
    ClearBreakpoints {
        /// Session.
        session_id: String,
    },
    /// Step and inspect.
    DebugStep {
        /// Session.
        session_id: String,
        /// Execution-control action.
        action: StepAction,
        /// Thread; defaults to the one that last stopped.
        #[serde(default)]
        thread_id: Option<i64>,
    },
    /// Evaluates an expression in a frame.
    DebugEvaluate {
        /// Session.
        session_id: String,
        /// Expression.
        expression: String,
        /// Frame; defaults to the top frame.
        #[serde(default)]
        frame_id: Option<i64>,
        /// `repl`, `watch` or `hover` (default: `repl`).
        #[serde(default)]
        context: Option<String>,
    },
    /// Disconnects the debug adapter.
    DebugStop {
        /// Session.
        session_id: String,
    },
}

impl Operation {
    /// Wire name, for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::OpenSession { .. } => "open_session",
            Self::StopSession { .. } => "stop_session",
            Self::SessionStatus { .. } => "session_status",
            Self::ListSessions => "list_sessions",
            Self::ClientFor { .. } => "client_for",
            Self::AnalysisRequest { .. } => "analysis_request",
            Self::OpenFile { .. } => "open_file",
            Self::UpdateFile { .. } => "update_file",
            Self::CloseFile { .. } => "close_file",
            Self::Diagnostics { .. } => "diagnostics",
            Self::Hover { .. } => "hover",
            Self::Definition { .. } => "definition",
            Self::FindSymbol { .. } => "find_symbol",
            Self::DebugLaunch { .. } => "debug_launch",
            Self::AddBreakpoint { .. } => "add_breakpoint",
            Self::RemoveBreakpoint { .. } => "remove_breakpoint",
            Self::EnableBreakpoint { .. } => "enable_breakpoint",
            Self::DisableBreakpoint { .. } => "disable_breakpoint",
            Self::ListBreakpoints { .. } => "list_breakpoints",
            Self::ClearBreakpoints { .. } => "clear_breakpoints",
            Self::DebugStep { .. } => "debug_step",
            Self::DebugEvaluate { .. } => "debug_evaluate",
            Self::DebugStop { .. } => "debug_stop",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_debug_step() {
        let op: Operation = serde_json::from_value(json!({
            "op": "debug_step",
            "sessionId": "abc",
            "action": "stepIn",
        }))
        .unwrap();
        assert_eq!(op.name(), "debug_step");
        let Operation::DebugStep {
            session_id,
            action,
            thread_id,
        } = op
        else {
            unreachable!("parsed as debug_step");
        };
        assert_eq!(session_id, "abc");
        assert_eq!(action, StepAction::StepIn);
        assert_eq!(thread_id, None);
    }

    #[test]
    fn test_debug_launch_defaults() {
        let op: Operation = serde_json::from_value(json!({
            "op": "debug_launch",
            "sessionId": "abc",
            "program": "sample.py",
        }))
        .unwrap();
        let Operation::DebugLaunch {
            args,
            env,
            cwd,
            stop_on_entry,
            ..
        } = op
        else {
            unreachable!("parsed as debug_launch");
        };
        assert!(args.is_empty() && env.is_empty() && cwd.is_none());
        assert!(stop_on_entry);
    }

    #[test]
    fn test_add_breakpoint_options() {
        let op: Operation = serde_json::from_value(json!({
            "op": "add_breakpoint",
            "sessionId": "abc",
            "file": "sample.py",
            "line": 53,
            "hitCondition": "3",
        }))
        .unwrap();
        assert!(matches!(
            op,
            Operation::AddBreakpoint { line: 53, hit_condition: Some(ref h), .. } if h == "3"
        ));
    }

    #[test]
    fn test_list_sessions_and_unknown_op() {
        let op: Operation = serde_json::from_value(json!({"op": "list_sessions"})).unwrap();
        assert_eq!(op.name(), "list_sessions");
        assert!(serde_json::from_value::<Operation>(json!({"op": "explode"})).is_err());
        assert!(serde_json::from_value::<Operation>(json!({"op": "stop_session"})).is_err());
    }
}
