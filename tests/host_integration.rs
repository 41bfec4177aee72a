// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! End-to-end tests of the `lcp-broker` binary: one JSON operation per
//! stdin line, one outcome per stdout line.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};

struct BrokerProcess {
    child: std::process::Child,
    stdin: Option<std::process::ChildStdin>,
    stdout: BufReader<std::process::ChildStdout>,
}

impl BrokerProcess {
    fn spawn(home: &Path) -> Result<Self> {
        let mockls = env!("CARGO_BIN_EXE_mockls");
        let mockdap = format!(
            "python:{} --loop-line 53 --loop-count 6",
            env!("CARGO_BIN_EXE_mockdap")
        );
        let mut child = Command::new(env!("CARGO_BIN_EXE_lcp-broker"))
            .arg("--lsp")
            .arg(format!("python:{mockls} --no-diagnostics"))
            .arg("--adapter")
            .arg(mockdap)
            .env("XDG_CONFIG_HOME", home)
            .env("HOME", home)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn lcp-broker")?;

        let stdin = child.stdin.take().context("Failed to get stdin")?;
        let stdout = BufReader::new(child.stdout.take().context("Failed to get stdout")?);
        Ok(Self {
            child,
            stdin: Some(stdin),
            stdout,
        })
    }

    fn call(&mut self, operation: &Value) -> Result<Value> {
        let stdin = self.stdin.as_mut().context("Stdin already closed")?;
        writeln!(stdin, "{}", serde_json::to_string(operation)?)?;
        stdin.flush()?;
        self.read_outcome()
    }

    fn call_raw(&mut self, line: &str) -> Result<Value> {
        let stdin = self.stdin.as_mut().context("Stdin already closed")?;
        writeln!(stdin, "{line}")?;
        stdin.flush()?;
        self.read_outcome()
    }

    fn read_outcome(&mut self) -> Result<Value> {
        let mut line = String::new();
        if self.stdout.read_line(&mut line)? == 0 {
            bail!("lcp-broker closed stdout");
        }
        serde_json::from_str(&line).context("Outcome is not JSON")
    }

    fn finish(mut self) -> Result<()> {
        drop(self.stdin.take());
        let status = self.child.wait()?;
        if !status.success() {
            bail!("lcp-broker exited with {status}");
        }
        Ok(())
    }
}

#[test]
fn test_session_analysis_and_debug_over_stdio() -> Result<()> {
    let home = tempfile::tempdir()?;
    let root = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .canonicalize()?;
    let mut broker = BrokerProcess::spawn(home.path())?;

    let opened = broker.call(&json!({ "op": "open_session", "workspaceRoot": root }))?;
    assert_eq!(opened["success"], true, "{opened}");
    let session = opened["data"]["sessionId"]
        .as_str()
        .context("sessionId")?
        .to_string();

    let symbols = broker.call(&json!({
        "op": "find_symbol", "sessionId": session, "file": "sample.py", "name": "increment"
    }))?;
    assert_eq!(symbols["data"]["matches"][0]["container"], "Counter", "{symbols}");

    let breakpoint = broker.call(&json!({
        "op": "add_breakpoint", "sessionId": session, "file": "sample.py", "line": 53
    }))?;
    assert_eq!(breakpoint["data"]["line"], 53, "{breakpoint}");

    let launched = broker.call(&json!({
        "op": "debug_launch", "sessionId": session, "program": "sample.py", "stopOnEntry": false
    }))?;
    assert_eq!(launched["data"]["status"], "stopped", "{launched}");
    assert_eq!(launched["data"]["currentLine"], 53);

    let stepped = broker.call(&json!({
        "op": "debug_step", "sessionId": session, "action": "continue"
    }))?;
    assert_eq!(stepped["data"]["locals"][0]["value"], "1", "{stepped}");

    let stopped = broker.call(&json!({ "op": "stop_session", "sessionId": session }))?;
    assert_eq!(stopped["success"], true, "{stopped}");

    let missing = broker.call(&json!({ "op": "session_status", "sessionId": session }))?;
    assert_eq!(missing["error"]["kind"], "session_not_found", "{missing}");

    broker.finish()
}

#[test]
fn test_malformed_lines_do_not_stop_the_host() -> Result<()> {
    let home = tempfile::tempdir()?;
    let mut broker = BrokerProcess::spawn(home.path())?;

    let garbage = broker.call_raw("this is not json")?;
    assert_eq!(garbage["success"], false);
    assert_eq!(garbage["error"]["kind"], "invalid_argument");

    let listed = broker.call(&json!({ "op": "list_sessions" }))?;
    assert_eq!(listed["data"], json!([]));

    broker.finish()
}
