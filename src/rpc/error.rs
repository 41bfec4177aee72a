// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Transport-level error types shared by both protocol clients.

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Failure of a request sent through a process-backed client.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// The upstream process could not be started.
    #[error("Failed to spawn {program}: {reason}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// OS error text.
        reason: String,
    },

    /// The upstream process exited while the request was outstanding.
    #[error("Process exited{}", exit_suffix(.code))]
    ProcessExited {
        /// Exit code if the process exited normally.
        code: Option<i32>,
    },

    /// The upstream tool answered with an error.
    #[error("Server error [{code}]: {message}")]
    Remote {
        /// Protocol error code (0 for debug adapters, which have none).
        code: i64,
        /// Error text.
        message: String,
        /// Structured detail, if any.
        data: Option<Value>,
    },

    /// Writing to the process failed or the stream is closed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// An opt-in per-request timeout elapsed.
    #[error("Request '{method}' timed out after {after:?}")]
    Timeout {
        /// Method or command name.
        method: String,
        /// Configured bound.
        after: Duration,
    },

    /// The response did not have the expected shape.
    #[error("Invalid response to '{method}': {reason}")]
    InvalidResponse {
        /// Method or command name.
        method: String,
        /// Decoding error text.
        reason: String,
    },
}

fn exit_suffix(code: &Option<i32>) -> String {
    code.map_or_else(|| " (killed by signal)".to_string(), |c| format!(" with code {c}"))
}

impl RpcError {
    /// Exit code carried by a process-exit error.
    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        match self {
            Self::ProcessExited { code } => *code,
            _ => None,
        }
    }
}

/// Failure of an event wait.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventError {
    /// No matching event arrived within the bound.
    #[error("Timed out after {after:?} waiting for '{event}' event")]
    Timeout {
        /// Event name.
        event: String,
        /// Bound that elapsed.
        after: Duration,
    },

    /// The bus was torn down while waiting.
    #[error("Stopped waiting for '{event}': {reason}")]
    Cleared {
        /// Event name.
        event: String,
        /// Why the bus was cleared.
        reason: String,
    },
}
