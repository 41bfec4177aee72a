// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Debug operations against mockdap.
//!
//! mockdap walks `tests/fixtures/sample.py` line by line; line 53 is the
//! body of a six-iteration loop over `i`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lcp_broker::broker::LaunchRequest;
use lcp_broker::config::{AdapterConfig, Config};
use lcp_broker::dap::{BreakpointOptions, DebugState, DebugStatus, StepAction};
use lcp_broker::error::ErrorKind;
use lcp_broker::{Broker, BrokerError, Operation};
use serde_json::json;

const LOOP_BODY: u32 = 53;

fn fixtures() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures")
}

struct Debuggee {
    broker: Broker,
    session: String,
    program: PathBuf,
}

impl Debuggee {
    async fn new(extra_args: &[&str]) -> Result<Self> {
        let mut args = vec![
            "--loop-line".to_string(),
            LOOP_BODY.to_string(),
            "--loop-count".to_string(),
            "6".to_string(),
        ];
        args.extend(extra_args.iter().map(ToString::to_string));

        let mut config = Config::default();
        config.debug.stop_timeout_ms = 300;
        config.debug.pause_timeout_ms = 300;
        config.debug.launch_timeout_ms = 5000;
        config.adapter.insert(
            "python".to_string(),
            AdapterConfig {
                command: env!("CARGO_BIN_EXE_mockdap").to_string(),
                args,
                adapter_id: Some("mockdap".to_string()),
                launch_defaults: None,
            },
        );

        let root = fixtures().canonicalize()?;
        let broker = Broker::new(config);
        let session = broker.open_session(None, Some(root.clone())).await?.session_id;
        Ok(Self {
            broker,
            session,
            program: root.join("sample.py"),
        })
    }

    async fn launch(&self, stop_on_entry: bool) -> Result<DebugState, BrokerError> {
        self.broker
            .debug_launch(
                &self.session,
                LaunchRequest {
                    program: PathBuf::from("sample.py"),
                    stop_on_entry,
                    ..LaunchRequest::default()
                },
            )
            .await
    }

    async fn step(&self, action: StepAction) -> Result<DebugState, BrokerError> {
        self.broker.debug_step(&self.session, action, None).await
    }

    async fn break_at(&self, line: u32, condition: Option<&str>) -> Result<u64> {
        let breakpoint = self
            .broker
            .add_breakpoint(
                &self.session,
                Path::new("sample.py"),
                line,
                BreakpointOptions {
                    condition: condition.map(ToString::to_string),
                    ..BreakpointOptions::default()
                },
            )
            .await?;
        Ok(breakpoint.id)
    }
}

fn local(state: &DebugState, name: &str) -> Option<String> {
    state
        .locals
        .iter()
        .find(|v| v.name == name)
        .map(|v| v.value.clone())
}

#[tokio::test]
async fn test_launch_stops_on_entry() -> Result<()> {
    let dbg = Debuggee::new(&[]).await?;

    let state = dbg.launch(true).await?;
    assert_eq!(state.status, DebugStatus::Stopped);
    assert_eq!(state.reason.as_deref(), Some("entry"));
    assert_eq!(state.current_line, Some(1));
    assert_eq!(state.current_file.as_deref(), Some(dbg.program.as_path()));
    assert_eq!(state.frames.len(), 1);
    assert!(!state.forced_pause);

    let status = dbg.broker.session_status(&dbg.session).await?;
    assert!(status.debugging);
    assert_eq!(status.debug_program.as_deref(), Some(dbg.program.as_path()));

    dbg.broker.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_breakpoint_set_before_launch_is_hit() -> Result<()> {
    let dbg = Debuggee::new(&[]).await?;
    let id = dbg.break_at(LOOP_BODY, None).await?;

    let listed = dbg.broker.list_breakpoints(&dbg.session, None)?;
    assert!(!listed[0].verified);

    let state = dbg.launch(false).await?;
    assert_eq!(state.reason.as_deref(), Some("breakpoint"));
    assert_eq!(state.current_line, Some(LOOP_BODY));
    assert_eq!(local(&state, "i").as_deref(), Some("0"));

    let listed = dbg.broker.list_breakpoints(&dbg.session, Some(Path::new("sample.py")))?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, id);
    assert!(listed[0].verified);

    let state = dbg.step(StepAction::Continue).await?;
    assert_eq!(state.current_line, Some(LOOP_BODY));
    assert_eq!(local(&state, "i").as_deref(), Some("1"));

    let evaluated = dbg
        .broker
        .debug_evaluate(&dbg.session, "i", None, None)
        .await?;
    assert_eq!(evaluated.result, "1");
    assert_eq!(evaluated.type_name.as_deref(), Some("int"));

    dbg.broker.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_breakpoint_added_at_entry_is_hit() -> Result<()> {
    let dbg = Debuggee::new(&[]).await?;
    let state = dbg.launch(true).await?;
    assert_eq!(state.reason.as_deref(), Some("entry"));

    let id = dbg.break_at(LOOP_BODY, None).await?;
    let listed = dbg.broker.list_breakpoints(&dbg.session, None)?;
    let breakpoint = listed
        .iter()
        .find(|bp| bp.id == id)
        .context("breakpoint listed")?;
    assert!(breakpoint.verified);

    let state = dbg.step(StepAction::Continue).await?;
    assert_eq!(state.status, DebugStatus::Stopped);
    assert_eq!(state.reason.as_deref(), Some("breakpoint"));
    assert_eq!(state.current_line, Some(LOOP_BODY));

    let evaluated = dbg
        .broker
        .debug_evaluate(&dbg.session, "i", None, None)
        .await?;
    assert_eq!(evaluated.result, "0");

    dbg.broker.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_conditional_breakpoint() -> Result<()> {
    let dbg = Debuggee::new(&[]).await?;
    dbg.break_at(LOOP_BODY, Some("i == 3")).await?;

    let state = dbg.launch(false).await?;
    assert_eq!(state.current_line, Some(LOOP_BODY));
    assert_eq!(local(&state, "i").as_deref(), Some("3"));

    dbg.broker.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_step_reports_the_next_line() -> Result<()> {
    let dbg = Debuggee::new(&[]).await?;
    dbg.launch(true).await?;

    let state = dbg.step(StepAction::Next).await?;
    assert_eq!(state.status, DebugStatus::Stopped);
    assert_eq!(state.reason.as_deref(), Some("step"));
    assert_eq!(state.current_line, Some(2));
    assert_eq!(state.thread_id, Some(1));

    dbg.broker.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_silent_step_falls_back_to_pause() -> Result<()> {
    let dbg = Debuggee::new(&["--ignore-steps"]).await?;
    dbg.launch(true).await?;

    let state = dbg.step(StepAction::StepIn).await?;
    assert_eq!(state.status, DebugStatus::Stopped);
    assert_eq!(state.reason.as_deref(), Some("pause"));
    assert!(state.forced_pause);
    assert_eq!(state.current_line, Some(1));

    dbg.broker.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_unconfirmed_stop_is_a_timeout() -> Result<()> {
    let dbg = Debuggee::new(&["--ignore-steps", "--ignore-pause"]).await?;
    dbg.launch(true).await?;

    let result = dbg.step(StepAction::Next).await;
    let error = result.err().context("expected a timeout")?;
    assert_eq!(error.kind(), ErrorKind::Timeout);
    assert!(error.to_string().contains("could not be confirmed stopped"), "{error}");

    dbg.broker.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_run_to_completion() -> Result<()> {
    let dbg = Debuggee::new(&[]).await?;

    let state = dbg.launch(false).await?;
    assert_eq!(state.status, DebugStatus::Terminated);
    assert!(state.frames.is_empty());

    // Stepping a finished program reports termination again.
    let state = dbg.step(StepAction::Next).await?;
    assert_eq!(state.status, DebugStatus::Terminated);

    dbg.broker.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_disabled_breakpoint_is_skipped() -> Result<()> {
    let dbg = Debuggee::new(&[]).await?;
    let id = dbg.break_at(LOOP_BODY, None).await?;

    let state = dbg.launch(false).await?;
    assert_eq!(state.current_line, Some(LOOP_BODY));

    let disabled = dbg
        .broker
        .set_breakpoint_enabled(&dbg.session, id, false)
        .await?;
    assert!(!disabled.enabled);
    assert!(!disabled.verified);

    let state = dbg.step(StepAction::Continue).await?;
    assert_eq!(state.status, DebugStatus::Terminated);

    dbg.broker.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_out_of_range_breakpoint_stays_unverified() -> Result<()> {
    let dbg = Debuggee::new(&[]).await?;
    dbg.launch(true).await?;

    let id = dbg.break_at(400, None).await?;
    let listed = dbg.broker.list_breakpoints(&dbg.session, None)?;
    let breakpoint = listed
        .iter()
        .find(|bp| bp.id == id)
        .context("breakpoint listed")?;
    assert!(!breakpoint.verified);
    assert!(breakpoint.message.as_deref().is_some_and(|m| m.contains("out of range")));

    let removed = dbg.broker.remove_breakpoint(&dbg.session, id).await?;
    assert_eq!(removed.line, 400);
    assert!(dbg.broker.list_breakpoints(&dbg.session, None)?.is_empty());

    dbg.broker.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_breakpoints_survive_between_runs() -> Result<()> {
    let dbg = Debuggee::new(&[]).await?;
    dbg.break_at(LOOP_BODY, None).await?;

    dbg.launch(false).await?;
    let stopped = dbg.broker.debug_stop(&dbg.session).await?;
    assert_eq!(stopped.program, dbg.program);
    assert!(!dbg.broker.list_breakpoints(&dbg.session, None)?[0].verified);

    let state = dbg.launch(false).await?;
    assert_eq!(state.current_line, Some(LOOP_BODY));
    assert_eq!(local(&state, "i").as_deref(), Some("0"));

    let cleared = dbg.broker.clear_breakpoints(&dbg.session).await?;
    assert_eq!(cleared.cleared, 1);

    dbg.broker.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_debug_errors() -> Result<()> {
    let dbg = Debuggee::new(&[]).await?;
    dbg.launch(true).await?;

    let unknown = dbg
        .broker
        .debug_evaluate(&dbg.session, "missing_name", None, None)
        .await;
    let error = unknown.err().context("expected an evaluation error")?;
    assert_eq!(error.kind(), ErrorKind::DebugProtocolError);
    assert!(error.to_string().contains("missing_name"), "{error}");

    dbg.broker.debug_stop(&dbg.session).await?;
    let after = dbg.step(StepAction::Next).await;
    assert_eq!(
        after.err().as_ref().map(BrokerError::kind),
        Some(ErrorKind::DebugProtocolError)
    );

    let zero = dbg.break_at(0, None).await;
    assert!(zero.is_err());

    dbg.broker.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_rejected_launch_leaves_no_debug_session() -> Result<()> {
    let dbg = Debuggee::new(&["--fail-launch", "program is not executable"]).await?;

    let error = dbg.launch(true).await.err().context("expected launch failure")?;
    assert_eq!(error.kind(), ErrorKind::DebugProtocolError);
    assert!(error.to_string().contains("program is not executable"), "{error}");
    assert!(!dbg.broker.session_status(&dbg.session).await?.debugging);

    dbg.broker.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_launch_errors_through_handle() -> Result<()> {
    let dbg = Debuggee::new(&[]).await?;

    let op: Operation = serde_json::from_value(json!({
        "op": "debug_launch",
        "sessionId": dbg.session,
        "program": "missing.py",
    }))?;
    let outcome = dbg.broker.handle(op).await;
    assert_eq!(
        outcome.error.context("expected error")?.kind,
        ErrorKind::FileNotFound
    );

    let op: Operation = serde_json::from_value(json!({
        "op": "debug_launch",
        "sessionId": dbg.session,
        "program": "sample.py",
        "language": "cobol",
    }))?;
    let outcome = dbg.broker.handle(op).await;
    let error = outcome.error.context("expected error")?;
    assert_eq!(error.kind, ErrorKind::DebugProtocolError);
    assert!(error.message.contains("cobol"));

    let op: Operation = serde_json::from_value(json!({
        "op": "debug_step",
        "sessionId": dbg.session,
        "action": "next",
    }))?;
    let outcome = dbg.broker.handle(op).await;
    assert!(!outcome.success);

    dbg.broker.shutdown().await;
    Ok(())
}
