// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Debug-side operations: launch, breakpoints, step, evaluate, stop.

use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

use super::Broker;
use crate::dap::adapters;
use crate::dap::orchestrator::{self, DebugState, StepAction, StepTimeouts};
use crate::dap::{
    Breakpoint, BreakpointId, BreakpointManager, BreakpointOptions, DebugClient, LaunchTarget,
};
use crate::error::{BrokerError, BrokerResult};
use crate::lsp::detect_language_id;
use crate::session::Session;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Arguments of `debug_launch`.
#[derive(Debug, Clone, Default)]
pub struct LaunchRequest {
    /// Program to run, absolute or relative to the session root.
    pub program: PathBuf,
    /// Program arguments.
    pub args: Vec<String>,
    /// Extra environment.
    pub env: HashMap<String, String>,
    /// Working directory; defaults to the session root.
    pub cwd: Option<PathBuf>,
    /// Halt before the first line.
    pub stop_on_entry: bool,
    /// Adapter language; detected from the program when absent.
    pub language: Option<String>,
}

/// Result of `debug_evaluate`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    /// Evaluated expression.
    pub expression: String,
    /// Rendered value.
    pub result: String,
    /// Type name, if reported.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    /// Non-zero when the value can be expanded.
    pub variables_reference: i64,
}

/// Result of `clear_breakpoints`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearedBreakpoints {
    /// Number of breakpoints removed.
    pub cleared: usize,
}

/// Result of `debug_stop`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugStopped {
    /// Program that was being debugged.
    pub program: PathBuf,
}

fn canonical_file(session: &Session, file: &Path) -> BrokerResult<PathBuf> {
    let path = session.resolve_path(file);
    let canonical = path
        .canonicalize()
        .map_err(|_| BrokerError::FileNotFound(path.display().to_string()))?;
    if canonical.is_file() {
        Ok(canonical)
    } else {
        Err(BrokerError::FileNotFound(canonical.display().to_string()))
    }
}

fn unknown_breakpoint(id: BreakpointId) -> BrokerError {
    BrokerError::InvalidArgument(format!("No breakpoint with id {id}"))
}

/// Sends the current list for `file` if a live debuggee is attached.
async fn resync(session: &Session, file: &Path) -> BrokerResult<()> {
    if let Some(client) = session.current_debug_client().await
        && client.is_alive()
        && !client.is_terminated()
    {
        client.sync_breakpoints(file).await?;
    }
    Ok(())
}

fn current(session: &Session, id: BreakpointId) -> BrokerResult<Breakpoint> {
    lock(session.breakpoints())
        .get(id)
        .cloned()
        .ok_or_else(|| unknown_breakpoint(id))
}

impl Broker {
    /// Starts `program` under the adapter for its language and returns the
    /// state at the first halt. Any earlier debug client of the session is
    /// disconnected first.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` for a missing program, a debug protocol error if
    /// no adapter is known or the handshake fails, or `Timeout`.
    pub async fn debug_launch(&self, session_id: &str, request: LaunchRequest) -> BrokerResult<DebugState> {
        let session = self.sessions.get(session_id)?;
        let config = session.config();
        let program = canonical_file(&session, &request.program)?;
        let language = request
            .language
            .clone()
            .unwrap_or_else(|| detect_language_id(&program).to_string());
        let adapter = adapters::resolve(&language, &config.adapter).ok_or_else(|| {
            BrokerError::DebugProtocol {
                message: format!("No debug adapter available for '{language}'"),
                details: None,
            }
        })?;

        if let Some(previous) = session.replace_debug_client(None).await {
            info!("[{}] replacing debug session for {}", session.id(), previous.program().display());
            previous.disconnect(config.shutdown_bound()).await;
        }

        let client = DebugClient::start(
            adapter.as_ref(),
            &program,
            session.root(),
            session.breakpoints().clone(),
        )
        .map_err(BrokerError::debug)?
        .with_request_timeout(config.request_bound());
        let client = Arc::new(client);

        let target = LaunchTarget {
            program,
            args: request.args,
            env: request.env,
            cwd: request
                .cwd
                .map_or_else(|| session.root().to_path_buf(), |cwd| session.resolve_path(&cwd)),
            stop_on_entry: request.stop_on_entry,
        };

        let state = match client
            .launch(adapter.as_ref(), &target, config.launch_bound())
            .await
        {
            Ok(halt) => orchestrator::settle_launch(&client, halt).await,
            Err(e) => Err(e),
        };
        match state {
            Ok(state) => {
                session.replace_debug_client(Some(client)).await;
                Ok(state)
            }
            Err(e) => {
                warn!("[{}] launch of {} failed: {}", session.id(), target.program.display(), e);
                client.disconnect(config.shutdown_bound()).await;
                Err(e)
            }
        }
    }

    /// Adds a breakpoint at a 1-based line and returns it, verified if a
    /// debuggee acknowledged it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for line 0, `FileNotFound`, or a debug
    /// protocol error if the resync is rejected.
    pub async fn add_breakpoint(
        &self,
        session_id: &str,
        file: &Path,
        line: u32,
        options: BreakpointOptions,
    ) -> BrokerResult<Breakpoint> {
        if line == 0 {
            return Err(BrokerError::InvalidArgument(
                "Breakpoint lines are 1-based".to_string(),
            ));
        }
        let session = self.sessions.get(session_id)?;
        let file = canonical_file(&session, file)?;
        let id = lock(session.breakpoints()).add(&file, line, options).id;
        resync(&session, &file).await?;
        current(&session, id)
    }

    /// Removes a breakpoint and returns it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an unknown id.
    pub async fn remove_breakpoint(&self, session_id: &str, id: BreakpointId) -> BrokerResult<Breakpoint> {
        let session = self.sessions.get(session_id)?;
        let removed = lock(session.breakpoints())
            .remove(id)
            .ok_or_else(|| unknown_breakpoint(id))?;
        resync(&session, &removed.file).await?;
        Ok(removed)
    }

    /// Enables or disables a breakpoint.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an unknown id.
    pub async fn set_breakpoint_enabled(
        &self,
        session_id: &str,
        id: BreakpointId,
        enabled: bool,
    ) -> BrokerResult<Breakpoint> {
        let session = self.sessions.get(session_id)?;
        let file = lock(session.breakpoints())
            .set_enabled(id, enabled)
            .ok_or_else(|| unknown_breakpoint(id))?
            .file;
        resync(&session, &file).await?;
        current(&session, id)
    }

    /// Breakpoints of the session, optionally for one file.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` or `FileNotFound`.
    pub fn list_breakpoints(&self, session_id: &str, file: Option<&Path>) -> BrokerResult<Vec<Breakpoint>> {
        let session = self.sessions.get(session_id)?;
        match file {
            Some(file) => {
                let file = canonical_file(&session, file)?;
                Ok(lock(session.breakpoints()).get_by_file(&file))
            }
            None => Ok(lock(session.breakpoints()).list()),
        }
    }

    /// Removes every breakpoint, telling a live debuggee about each file.
    ///
    /// # Errors
    ///
    /// Returns a debug protocol error if a resync is rejected.
    pub async fn clear_breakpoints(&self, session_id: &str) -> BrokerResult<ClearedBreakpoints> {
        let session = self.sessions.get(session_id)?;
        let (cleared, files) = {
            let mut manager: MutexGuard<'_, BreakpointManager> = lock(session.breakpoints());
            let cleared = manager.list().len();
            (cleared, manager.clear())
        };
        for file in files {
            resync(&session, &file).await?;
        }
        Ok(ClearedBreakpoints { cleared })
    }

    /// Issues a step and returns the state at the next stop.
    ///
    /// # Errors
    ///
    /// Returns a debug protocol error when no debug session is active, or
    /// `Timeout` if the debuggee could not be stopped.
    pub async fn debug_step(
        &self,
        session_id: &str,
        action: StepAction,
        thread_id: Option<i64>,
    ) -> BrokerResult<DebugState> {
        let session = self.sessions.get(session_id)?;
        let client = session.debug_client().await?;
        orchestrator::step(
            &client,
            action,
            thread_id,
            StepTimeouts::from(&session.config().debug),
        )
        .await
    }

    /// Evaluates `expression`, in the top frame unless `frame_id` is given.
    ///
    /// # Errors
    ///
    /// Returns a debug protocol error when no debug session is active or the
    /// adapter rejects the expression.
    pub async fn debug_evaluate(
        &self,
        session_id: &str,
        expression: &str,
        frame_id: Option<i64>,
        context: Option<&str>,
    ) -> BrokerResult<Evaluation> {
        let session = self.sessions.get(session_id)?;
        let client = session.debug_client().await?;
        let frame_id = match frame_id {
            Some(frame) => Some(frame),
            None => top_frame(&client).await?,
        };
        let body = client
            .evaluate(expression, frame_id, context.unwrap_or("repl"))
            .await
            .map_err(BrokerError::debug)?;
        Ok(Evaluation {
            expression: expression.to_string(),
            result: body.result,
            type_name: body.type_name,
            variables_reference: body.variables_reference,
        })
    }

    /// Disconnects the debug adapter and terminates the debuggee.
    ///
    /// # Errors
    ///
    /// Returns a debug protocol error when no debug session is active.
    pub async fn debug_stop(&self, session_id: &str) -> BrokerResult<DebugStopped> {
        let session = self.sessions.get(session_id)?;
        let client = session
            .replace_debug_client(None)
            .await
            .ok_or_else(BrokerError::no_debug_session)?;
        client.disconnect(session.config().shutdown_bound()).await;
        Ok(DebugStopped {
            program: client.program().to_path_buf(),
        })
    }
}

async fn top_frame(client: &DebugClient) -> BrokerResult<Option<i64>> {
    if client.is_terminated() {
        return Ok(None);
    }
    let thread = client.resolve_thread(None).await?;
    let trace = client.stack_trace(thread).await.map_err(BrokerError::debug)?;
    Ok(trace.stack_frames.first().map(|frame| frame.id))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::ErrorKind;

    async fn broker_with_file() -> (Broker, String, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.py"), "x = 1\ny = 2\n").unwrap();
        let broker = Broker::new(Config::default());
        let id = broker
            .open_session(None, Some(dir.path().to_path_buf()))
            .await
            .unwrap()
            .session_id;
        (broker, id, dir)
    }

    #[tokio::test]
    async fn test_breakpoints_before_launch() {
        let (broker, id, _dir) = broker_with_file().await;

        let first = broker
            .add_breakpoint(&id, Path::new("app.py"), 2, BreakpointOptions::default())
            .await
            .unwrap();
        let second = broker
            .add_breakpoint(&id, Path::new("app.py"), 2, BreakpointOptions::default())
            .await
            .unwrap();
        assert_ne!(first.id, second.id);
        assert!(!first.verified);
        assert!(first.file.is_absolute());

        let disabled = broker.set_breakpoint_enabled(&id, first.id, false).await.unwrap();
        assert!(!disabled.enabled);
        assert_eq!(broker.list_breakpoints(&id, Some(Path::new("app.py"))).unwrap().len(), 2);

        broker.remove_breakpoint(&id, second.id).await.unwrap();
        assert_eq!(broker.clear_breakpoints(&id).await.unwrap().cleared, 1);
        assert!(broker.list_breakpoints(&id, None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_breakpoint_argument_errors() {
        let (broker, id, _dir) = broker_with_file().await;

        let zero = broker
            .add_breakpoint(&id, Path::new("app.py"), 0, BreakpointOptions::default())
            .await
            .unwrap_err();
        assert_eq!(zero.kind(), ErrorKind::InvalidArgument);

        let missing = broker
            .add_breakpoint(&id, Path::new("gone.py"), 3, BreakpointOptions::default())
            .await
            .unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::FileNotFound);

        let unknown = broker.remove_breakpoint(&id, 99).await.unwrap_err();
        assert_eq!(unknown.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_launch_without_adapter() {
        let (broker, id, dir) = broker_with_file().await;
        std::fs::write(dir.path().join("notes.txt"), "hi").unwrap();

        let error = broker
            .debug_launch(
                &id,
                LaunchRequest {
                    program: PathBuf::from("notes.txt"),
                    stop_on_entry: true,
                    ..LaunchRequest::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::DebugProtocolError);
        assert!(error.to_string().contains("No debug adapter"));
    }

    #[tokio::test]
    async fn test_stop_without_debug_session() {
        let (broker, id, _dir) = broker_with_file().await;
        let error = broker.debug_stop(&id).await.unwrap_err();
        assert_eq!(error.to_string(), "No active debug session");
    }
}
