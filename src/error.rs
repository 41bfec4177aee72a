// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Caller-facing error taxonomy and the structured outcome envelope.

use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::rpc::{EventError, RpcError};

/// Result alias for broker operations.
pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

/// Errors returned by caller-facing operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// No live session has this id.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// A path does not exist or is not a file.
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// No symbol with that name exists in the file.
    #[error("Symbol '{symbol}' not found in {file}")]
    SymbolNotFound {
        /// Requested symbol name.
        symbol: String,
        /// File searched.
        file: String,
    },

    /// The language server returned an error or is unavailable.
    #[error("{message}")]
    AnalysisProtocol {
        /// User-facing description.
        message: String,
        /// Underlying detail (error code, exit code).
        details: Option<Value>,
    },

    /// The debug adapter returned an error, is unavailable, or no debug
    /// session is active.
    #[error("{message}")]
    DebugProtocol {
        /// User-facing description.
        message: String,
        /// Underlying detail.
        details: Option<Value>,
    },

    /// An event wait exceeded its bound.
    #[error("{0}")]
    Timeout(String),

    /// A caller-supplied argument is unusable.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Anything unexpected.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable machine-readable error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// See [`BrokerError::SessionNotFound`].
    SessionNotFound,
    /// See [`BrokerError::FileNotFound`].
    FileNotFound,
    /// See [`BrokerError::SymbolNotFound`].
    SymbolNotFound,
    /// See [`BrokerError::AnalysisProtocol`].
    AnalysisProtocolError,
    /// See [`BrokerError::DebugProtocol`].
    DebugProtocolError,
    /// See [`BrokerError::Timeout`].
    Timeout,
    /// See [`BrokerError::InvalidArgument`].
    InvalidArgument,
    /// See [`BrokerError::Internal`].
    InternalError,
}

impl BrokerError {
    /// Translates a language-server transport failure.
    #[must_use]
    pub fn analysis(language: &str, error: RpcError) -> Self {
        let (message, details) = describe(&format!("{language} language server"), &error);
        Self::AnalysisProtocol { message, details }
    }

    /// Translates a debug-adapter transport failure.
    #[must_use]
    pub fn debug(error: RpcError) -> Self {
        let (message, details) = describe("debug adapter", &error);
        Self::DebugProtocol { message, details }
    }

    /// Translates a failed event wait on the debug adapter.
    #[must_use]
    pub fn debug_event(error: EventError) -> Self {
        match error {
            EventError::Timeout { .. } => Self::Timeout(error.to_string()),
            EventError::Cleared { .. } => Self::DebugProtocol {
                message: "Debug adapter unexpectedly terminated".to_string(),
                details: Some(json!({ "reason": error.to_string() })),
            },
        }
    }

    /// The error used whenever a debug operation needs a session that is not there.
    #[must_use]
    pub fn no_debug_session() -> Self {
        Self::DebugProtocol {
            message: "No active debug session".to_string(),
            details: None,
        }
    }

    /// Machine-readable kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::SessionNotFound(_) => ErrorKind::SessionNotFound,
            Self::FileNotFound(_) => ErrorKind::FileNotFound,
            Self::SymbolNotFound { .. } => ErrorKind::SymbolNotFound,
            Self::AnalysisProtocol { .. } => ErrorKind::AnalysisProtocolError,
            Self::DebugProtocol { .. } => ErrorKind::DebugProtocolError,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// Structured detail for the outcome envelope.
    #[must_use]
    pub fn details(&self) -> Option<Value> {
        match self {
            Self::AnalysisProtocol { details, .. } | Self::DebugProtocol { details, .. } => {
                details.clone()
            }
            Self::SessionNotFound(id) => Some(json!({ "sessionId": id })),
            Self::SymbolNotFound { symbol, file } => Some(json!({ "symbol": symbol, "file": file })),
            _ => None,
        }
    }
}

fn describe(subject: &str, error: &RpcError) -> (String, Option<Value>) {
    match error {
        RpcError::ProcessExited { code } => (
            format!("{} unexpectedly terminated", capitalize(subject)),
            Some(json!({ "exitCode": code })),
        ),
        RpcError::Spawn { program, reason } => (
            format!("Failed to start {subject} ({program}): {reason}"),
            Some(json!({ "program": program })),
        ),
        RpcError::Remote { code, message, data } => (
            format!("{} error: {message}", capitalize(subject)),
            Some(json!({ "code": code, "data": data })),
        ),
        RpcError::Timeout { method, after } => (
            format!("{} did not answer '{method}' within {after:?}", capitalize(subject)),
            None,
        ),
        RpcError::Transport(_) | RpcError::InvalidResponse { .. } => {
            (format!("{} unavailable: {error}", capitalize(subject)), None)
        }
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

impl From<std::io::Error> for BrokerError {
    fn from(error: std::io::Error) -> Self {
        Self::Internal(error.to_string())
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(error: serde_json::Error) -> Self {
        Self::InvalidArgument(error.to_string())
    }
}

/// Error body of a failed [`Outcome`].
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    /// Machine-readable kind.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Envelope every caller-facing operation resolves to.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    /// Whether the operation produced a usable result.
    pub success: bool,
    /// Result data on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Outcome {
    /// Wraps an operation result, serializing success data.
    pub fn from_result<T: Serialize>(result: BrokerResult<T>) -> Self {
        match result.and_then(|value| serde_json::to_value(value).map_err(BrokerError::from)) {
            Ok(data) => Self {
                success: true,
                data: Some(data),
                error: None,
            },
            Err(error) => Self::failure(&error),
        }
    }

    /// Builds a failed outcome.
    #[must_use]
    pub fn failure(error: &BrokerError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody {
                kind: error.kind(),
                message: error.to_string(),
                details: error.details(),
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;

    #[test]
    fn test_process_exit_is_translated_with_code() {
        let error = BrokerError::analysis("python", RpcError::ProcessExited { code: Some(137) });
        assert_eq!(error.kind(), ErrorKind::AnalysisProtocolError);
        assert_eq!(error.to_string(), "Python language server unexpectedly terminated");
        assert_eq!(error.details(), Some(json!({ "exitCode": 137 })));
    }

    #[test]
    fn test_debug_timeout_maps_to_timeout_kind() {
        let error = BrokerError::debug_event(EventError::Timeout {
            event: "stopped".into(),
            after: std::time::Duration::from_secs(2),
        });
        assert_eq!(error.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_outcome_envelope_shape() {
        let ok = serde_json::to_value(Outcome::from_result(Ok(json!({"line": 53})))).unwrap();
        assert_eq!(ok, json!({"success": true, "data": {"line": 53}}));

        let err: BrokerResult<()> = Err(BrokerError::SessionNotFound("abc".into()));
        let failed = serde_json::to_value(Outcome::from_result(err)).unwrap();
        assert_eq!(
            failed,
            json!({
                "success": false,
                "error": {
                    "kind": "session_not_found",
                    "message": "Session not found: abc",
                    "details": {"sessionId": "abc"}
                }
            })
        );
    }

    #[test]
    fn test_no_debug_session_kind() {
        assert_eq!(BrokerError::no_debug_session().kind(), ErrorKind::DebugProtocolError);
    }
}
