// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Caller-facing facade.
//!
//! Every operation resolves to a typed result; [`Broker::handle`] wraps it in
//! an [`Outcome`] envelope so nothing a caller sends can escape as a panic or
//! a transport error.

mod analysis;
/// LSP results reshaped for callers.
pub mod convert;
mod debugging;
/// Serde form of the operations.
pub mod operation;

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::Config;
use crate::dap::BreakpointOptions;
use crate::error::{BrokerResult, Outcome};
use crate::session::{SessionRegistry, SessionStatus};

pub use analysis::{ClosedFile, DiagnosticsReport, SymbolSearch};
pub use debugging::{ClearedBreakpoints, DebugStopped, Evaluation, LaunchRequest};
pub use operation::Operation;

/// Result of `stop_session`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStopped {
    /// Stopped session.
    pub session_id: String,
    /// Clients that failed to shut down cleanly.
    pub shutdown_failures: Vec<String>,
}

/// Entry point for every caller-facing operation.
pub struct Broker {
    sessions: Arc<SessionRegistry>,
}

impl Broker {
    /// Creates a broker with no sessions.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            sessions: Arc::new(SessionRegistry::new(Arc::new(config))),
        }
    }

    /// Starts the idle-session sweep. Needs a running tokio runtime.
    pub fn start(&self) {
        self.sessions.start_sweeper();
    }

    /// Session registry.
    #[must_use]
    pub const fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Stops the sweep and every session.
    pub async fn shutdown(&self) {
        self.sessions.shutdown_all().await;
    }

    /// Runs one operation and wraps its result.
    #[allow(clippy::too_many_lines, reason = "One match arm per operation")]
    pub async fn handle(&self, operation: Operation) -> Outcome {
        let name = operation.name();
        debug!("Handling {}", name);

        let outcome = match operation {
            Operation::OpenSession {
                session_id,
                workspace_root,
            } => Outcome::from_result(
                self.open_session(session_id.as_deref(), workspace_root)
                    .await,
            ),
            Operation::StopSession { session_id } => {
                Outcome::from_result(self.stop_session(&session_id).await)
            }
            Operation::SessionStatus { session_id } => {
                Outcome::from_result(self.session_status(&session_id).await)
            }
            Operation::ListSessions => Outcome::from_result(Ok(self.list_sessions().await)),
            Operation::ClientFor {
                session_id,
                file,
                language,
            } => Outcome::from_result(
                self.client_for(&session_id, file.as_deref(), language.as_deref())
                    .await,
            ),
            Operation::AnalysisRequest {
                session_id,
                file,
                language,
                method,
                params,
            } => Outcome::from_result(
                self.analysis_request(
                    &session_id,
                    file.as_deref(),
                    language.as_deref(),
                    &method,
                    params,
                )
                .await,
            ),
            Operation::OpenFile { session_id, file } => {
                Outcome::from_result(self.open_file(&session_id, &file).await)
            }
            Operation::UpdateFile {
                session_id,
                file,
                text,
            } => Outcome::from_result(self.update_file(&session_id, &file, text).await),
            Operation::CloseFile { session_id, file } => {
                Outcome::from_result(self.close_file(&session_id, &file).await)
            }
            Operation::Diagnostics { session_id, file } => {
                Outcome::from_result(self.diagnostics(&session_id, &file).await)
            }
            Operation::Hover {
                session_id,
                file,
                line,
                column,
            } => Outcome::from_result(self.hover(&session_id, &file, line, column).await),
            Operation::Definition {
                session_id,
                file,
                line,
                column,
            } => Outcome::from_result(self.definition(&session_id, &file, line, column).await),
            Operation::FindSymbol {
                session_id,
                file,
                name,
            } => Outcome::from_result(self.find_symbol(&session_id, &file, &name).await),
            Operation::DebugLaunch {
                session_id,
                program,
                args,
                env,
                cwd,
                stop_on_entry,
                language,
            } => Outcome::from_result(
                self.debug_launch(
                    &session_id,
                    LaunchRequest {
                        program,
                        args,
                        env,
                        cwd,
                        stop_on_entry,
                        language,
                    },
                )
                .await,
            ),
            Operation::AddBreakpoint {
                session_id,
                file,
                line,
                condition,
                hit_condition,
                log_message,
            } => Outcome::from_result(
                self.add_breakpoint(
                    &session_id,
                    &file,
                    line,
                    BreakpointOptions {
                        condition,
                        hit_condition,
                        log_message,
                    },
                )
                .await,
            ),
            Operation::RemoveBreakpoint { session_id, id } => {
                Outcome::from_result(self.remove_breakpoint(&session_id, id).await)
            }
            Operation::EnableBreakpoint { session_id, id } => {
                Outcome::from_result(self.set_breakpoint_enabled(&session_id, id, true).await)
            }
            Operation::DisableBreakpoint { session_id, id } => {
                Outcome::from_result(self.set_breakpoint_enabled(&session_id, id, false).await)
            }
            Operation::ListBreakpoints { session_id, file } => {
                Outcome::from_result(self.list_breakpoints(&session_id, file.as_deref()))
            }
            Operation::ClearBreakpoints { session_id } => {
                Outcome::from_result(self.clear_breakpoints(&session_id).await)
            }
            Operation::DebugStep {
                session_id,
                action,
                thread_id,
            } => Outcome::from_result(self.debug_step(&session_id, action, thread_id).await),
            Operation::DebugEvaluate {
                session_id,
                expression,
                frame_id,
                context,
            } => Outcome::from_result(
                self.debug_evaluate(&session_id, &expression, frame_id, context.as_deref())
                    .await,
            ),
            Operation::DebugStop { session_id } => {
                Outcome::from_result(self.debug_stop(&session_id).await)
            }
        };

        if let Some(error) = &outcome.error {
            warn!("{} failed: {}", name, error.message);
        }
        outcome
    }

    /// Resumes `session_id`, or creates a session at `workspace_root`.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` for an unknown id, `FileNotFound` for a
    /// missing root, or `InvalidArgument` when neither is given.
    pub async fn open_session(
        &self,
        session_id: Option<&str>,
        workspace_root: Option<PathBuf>,
    ) -> BrokerResult<SessionStatus> {
        let session = self
            .sessions
            .create_or_resume(session_id, workspace_root.as_deref())?;
        Ok(session.status().await)
    }

    /// Shuts down and forgets a session.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` for an unknown id.
    pub async fn stop_session(&self, session_id: &str) -> BrokerResult<SessionStopped> {
        let shutdown_failures = self.sessions.delete(session_id).await?;
        Ok(SessionStopped {
            session_id: session_id.to_string(),
            shutdown_failures,
        })
    }

    /// Status of one session.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` for an unknown id.
    pub async fn session_status(&self, session_id: &str) -> BrokerResult<SessionStatus> {
        Ok(self.sessions.get(session_id)?.status().await)
    }

    /// Status of every session, oldest first.
    pub async fn list_sessions(&self) -> Vec<SessionStatus> {
        let mut statuses = Vec::new();
        for session in self.sessions.sessions() {
            statuses.push(session.status().await);
        }
        statuses
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn broker() -> Broker {
        Broker::new(Config::default())
    }

    #[tokio::test]
    async fn test_open_resume_stop() {
        let dir = tempfile::tempdir().unwrap();
        let broker = broker();

        let opened = broker
            .open_session(None, Some(dir.path().to_path_buf()))
            .await
            .unwrap();
        let resumed = broker
            .open_session(Some(&opened.session_id), None)
            .await
            .unwrap();
        assert_eq!(opened.session_id, resumed.session_id);
        assert_eq!(broker.list_sessions().await.len(), 1);

        let stopped = broker.stop_session(&opened.session_id).await.unwrap();
        assert!(stopped.shutdown_failures.is_empty());
        assert!(broker.list_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_handle_wraps_errors() {
        let broker = broker();
        let outcome = broker
            .handle(Operation::SessionStatus {
                session_id: "missing".into(),
            })
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.unwrap().kind, ErrorKind::SessionNotFound);
    }

    #[tokio::test]
    async fn test_handle_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let broker = broker();
        let op: Operation = serde_json::from_value(json!({
            "op": "open_session",
            "workspaceRoot": dir.path(),
        }))
        .unwrap();

        let outcome = broker.handle(op).await;
        assert!(outcome.success);
        let data = outcome.data.unwrap();
        assert!(data["sessionId"].is_string());
        assert_eq!(data["debugging"], false);
        broker.shutdown().await;
        assert!(broker.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_debug_ops_need_a_debug_session() {
        let dir = tempfile::tempdir().unwrap();
        let broker = broker();
        let session = broker
            .open_session(None, Some(dir.path().to_path_buf()))
            .await
            .unwrap();

        let outcome = broker
            .handle(Operation::DebugStep {
                session_id: session.session_id.clone(),
                action: crate::dap::StepAction::Next,
                thread_id: None,
            })
            .await;
        let error = outcome.error.unwrap();
        assert_eq!(error.kind, ErrorKind::DebugProtocolError);
        assert_eq!(error.message, "No active debug session");
    }
}
