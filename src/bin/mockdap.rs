// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! A scripted debug adapter for testing.
//!
//! "Runs" the launched program by walking its lines top to bottom. One
//! line can be marked as a loop body that executes `--loop-count` times
//! with a local `i`, so breakpoints, stepping and evaluation have something
//! to observe. Flags make steps or pauses go quiet to exercise the
//! broker's fallbacks.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;

use clap::Parser;
use lcp_broker::protocol::FrameCodec;
use lcp_broker::protocol::dap::{DapEvent, DapMessage, DapRequest, DapResponse};
use serde_json::{Value, json};

/// Mock debug adapter for integration testing.
#[derive(Parser, Debug, Default, Clone)]
#[command(name = "mockdap")]
struct Args {
    /// 1-based line that is the body of a `for i in range(..)` loop.
    #[arg(long)]
    loop_line: Option<u32>,

    /// Iterations of the loop body.
    #[arg(long, default_value_t = 0)]
    loop_count: i64,

    /// Acknowledge step requests without ever stopping.
    #[arg(long)]
    ignore_steps: bool,

    /// Acknowledge `pause` without stopping.
    #[arg(long)]
    ignore_pause: bool,

    /// Reject `launch` with this message.
    #[arg(long)]
    fail_launch: Option<String>,
}

const THREAD: i64 = 1;
const FRAME: i64 = 1;
const LOCALS: i64 = 10;
const GLOBALS: i64 = 11;

/// One executed line, with the loop variable if it is in scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tick {
    line: u32,
    i: Option<i64>,
}

/// The execution trace for a program of `total` lines.
fn trace(total: u32, loop_line: Option<u32>, loop_count: i64) -> Vec<Tick> {
    let mut ticks = Vec::new();
    let mut i = None;
    for line in 1..=total {
        match loop_line {
            Some(body) if body == line && body > 1 => {
                for k in 0..loop_count {
                    i = Some(k);
                    ticks.push(Tick { line: body - 1, i });
                    ticks.push(Tick { line: body, i });
                }
            }
            Some(body) if body == line + 1 => {}
            _ => ticks.push(Tick { line, i }),
        }
    }
    ticks
}

#[derive(Debug, Clone)]
struct Breakpoint {
    line: u32,
    condition: Option<String>,
}

/// Supports `i == N` and `i >= N`; anything else is always true.
fn condition_holds(condition: &str, i: Option<i64>) -> bool {
    let parse = |rest: &str| rest.trim().parse::<i64>().ok();
    let condition = condition.trim();
    if let Some(rest) = condition.strip_prefix("i ==").and_then(parse) {
        return i == Some(rest);
    }
    if let Some(rest) = condition.strip_prefix("i >=").and_then(parse) {
        return i.is_some_and(|i| i >= rest);
    }
    true
}

enum Phase {
    Configuring,
    Running,
    Ended,
}

struct MockAdapter {
    args: Args,
    out: Box<dyn Write>,
    seq: i64,
    lines_start_at1: bool,
    program: PathBuf,
    stop_on_entry: bool,
    pending_launch: Option<DapRequest>,
    breakpoints: HashMap<PathBuf, Vec<Breakpoint>>,
    ticks: Vec<Tick>,
    position: usize,
    phase: Phase,
}

impl MockAdapter {
    fn new(args: Args, out: Box<dyn Write>) -> Self {
        Self {
            args,
            out,
            seq: 0,
            lines_start_at1: true,
            program: PathBuf::new(),
            stop_on_entry: false,
            pending_launch: None,
            breakpoints: HashMap::new(),
            ticks: Vec::new(),
            position: 0,
            phase: Phase::Configuring,
        }
    }

    fn run(&mut self, reader: &mut dyn Read) {
        let mut codec = FrameCodec::<DapMessage>::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = match reader.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            for message in codec.decode(&chunk[..n]) {
                if let DapMessage::Request(request) = message
                    && !self.handle(&request)
                {
                    return;
                }
            }
        }
    }

    fn write(&mut self, message: &DapMessage) {
        let Ok(frame) = FrameCodec::encode(message) else {
            return;
        };
        let _ = self.out.write_all(&frame);
        let _ = self.out.flush();
    }

    fn next_seq(&mut self) -> i64 {
        self.seq += 1;
        self.seq
    }

    fn respond(&mut self, request: &DapRequest, body: Value) {
        let seq = self.next_seq();
        self.write(&DapMessage::Response(DapResponse {
            seq,
            request_seq: request.seq,
            success: true,
            command: request.command.clone(),
            message: None,
            body: Some(body),
        }));
    }

    fn reject(&mut self, request: &DapRequest, message: String) {
        let seq = self.next_seq();
        self.write(&DapMessage::Response(DapResponse {
            seq,
            request_seq: request.seq,
            success: false,
            command: request.command.clone(),
            message: Some(message),
            body: None,
        }));
    }

    fn event(&mut self, event: &str, body: Value) {
        let seq = self.next_seq();
        self.write(&DapMessage::Event(DapEvent {
            seq,
            event: event.to_string(),
            body: Some(body),
        }));
    }

    /// Adapter lines to 1-based.
    const fn from_wire(&self, line: u32) -> u32 {
        if self.lines_start_at1 { line } else { line + 1 }
    }

    /// 1-based lines to the adapter's base.
    const fn to_wire(&self, line: u32) -> u32 {
        if self.lines_start_at1 { line } else { line - 1 }
    }

    fn current(&self) -> Option<Tick> {
        self.ticks.get(self.position).copied()
    }

    /// Returns `false` once the adapter should exit.
    fn handle(&mut self, request: &DapRequest) -> bool {
        let arguments = request.arguments.clone().unwrap_or(Value::Null);
        match request.command.as_str() {
            "initialize" => {
                self.lines_start_at1 = arguments
                    .get("linesStartAt1")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                self.respond(
                    request,
                    json!({
                        "supportsConfigurationDoneRequest": true,
                        "supportsConditionalBreakpoints": true,
                        "supportsEvaluateForHovers": true,
                    }),
                );
                self.event("initialized", json!({}));
            }
            "launch" => {
                if let Some(message) = self.args.fail_launch.clone() {
                    self.reject(request, message);
                    return true;
                }
                self.program = arguments
                    .get("program")
                    .and_then(Value::as_str)
                    .map(PathBuf::from)
                    .unwrap_or_default();
                self.stop_on_entry = arguments
                    .get("stopOnEntry")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let total = std::fs::read_to_string(&self.program)
                    .map(|text| u32::try_from(text.lines().count()).unwrap_or(u32::MAX))
                    .unwrap_or(0);
                self.ticks = trace(total, self.args.loop_line, self.args.loop_count);
                // Answered after configurationDone.
                self.pending_launch = Some(request.clone());
            }
            "setBreakpoints" => self.set_breakpoints(request, &arguments),
            "configurationDone" => {
                self.respond(request, json!({}));
                if let Some(launch) = self.pending_launch.take() {
                    self.respond(&launch, json!({}));
                    self.phase = Phase::Running;
                    self.event("process", json!({ "name": self.program, "startMethod": "launch" }));
                    self.event("thread", json!({ "reason": "started", "threadId": THREAD }));
                    if self.stop_on_entry {
                        self.stopped("entry");
                    } else {
                        self.run_to_breakpoint(0);
                    }
                }
            }
            "continue" => {
                self.respond(request, json!({ "allThreadsContinued": true }));
                self.run_to_breakpoint(self.position + 1);
            }
            "next" | "stepIn" | "stepOut" => {
                self.respond(request, json!({}));
                if !self.args.ignore_steps {
                    self.step();
                }
            }
            "pause" => {
                self.respond(request, json!({}));
                if !self.args.ignore_pause && matches!(self.phase, Phase::Running) {
                    self.stopped("pause");
                }
            }
            "threads" => self.respond(
                request,
                json!({ "threads": [{ "id": THREAD, "name": "MainThread" }] }),
            ),
            "stackTrace" => self.stack_trace(request),
            "scopes" => self.respond(
                request,
                json!({ "scopes": [
                    { "name": "Locals", "variablesReference": LOCALS, "expensive": false },
                    { "name": "Globals", "variablesReference": GLOBALS, "expensive": false },
                ]}),
            ),
            "variables" => self.variables(request, &arguments),
            "evaluate" => self.evaluate(request, &arguments),
            "disconnect" => {
                self.respond(request, json!({}));
                return false;
            }
            other => self.reject(request, format!("mockdap: unsupported command '{other}'")),
        }
        true
    }

    fn set_breakpoints(&mut self, request: &DapRequest, arguments: &Value) {
        let path = arguments
            .pointer("/source/path")
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .unwrap_or_default();
        let requested = arguments
            .get("breakpoints")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let total = std::fs::read_to_string(&path)
            .map(|text| text.lines().count())
            .unwrap_or(0);

        let mut placed = Vec::new();
        let mut acks = Vec::new();
        for bp in &requested {
            let wire = bp
                .get("line")
                .and_then(Value::as_u64)
                .and_then(|l| u32::try_from(l).ok())
                .unwrap_or(0);
            let line = self.from_wire(wire);
            if line == 0 || line as usize > total {
                acks.push(json!({ "verified": false, "message": format!("Line {line} is out of range") }));
                continue;
            }
            placed.push(Breakpoint {
                line,
                condition: bp.get("condition").and_then(Value::as_str).map(String::from),
            });
            acks.push(json!({ "verified": true, "line": wire }));
        }
        self.breakpoints.insert(path, placed);
        self.respond(request, json!({ "breakpoints": acks }));
    }

    fn run_to_breakpoint(&mut self, from: usize) {
        let empty = Vec::new();
        let breakpoints = self.breakpoints.get(&self.program).unwrap_or(&empty);
        let hit = self.ticks.iter().enumerate().skip(from).find(|(_, tick)| {
            breakpoints.iter().any(|bp| {
                bp.line == tick.line
                    && bp.condition.as_deref().is_none_or(|c| condition_holds(c, tick.i))
            })
        });
        match hit.map(|(index, _)| index) {
            Some(index) => {
                self.position = index;
                self.stopped("breakpoint");
            }
            None => self.finish(),
        }
    }

    fn step(&mut self) {
        if self.position + 1 < self.ticks.len() {
            self.position += 1;
            self.stopped("step");
        } else {
            self.finish();
        }
    }

    fn stopped(&mut self, reason: &str) {
        self.event(
            "stopped",
            json!({ "reason": reason, "threadId": THREAD, "allThreadsStopped": true }),
        );
    }

    fn finish(&mut self) {
        self.phase = Phase::Ended;
        self.position = self.ticks.len();
        self.event("exited", json!({ "exitCode": 0 }));
        self.event("terminated", json!({}));
    }

    fn stack_trace(&mut self, request: &DapRequest) {
        let Some(tick) = self.current() else {
            self.reject(request, "mockdap: program is not running".to_string());
            return;
        };
        let name = self
            .program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let column = self.to_wire(1);
        self.respond(
            request,
            json!({
                "stackFrames": [{
                    "id": FRAME,
                    "name": "<module>",
                    "source": { "name": name, "path": self.program },
                    "line": self.to_wire(tick.line),
                    "column": column,
                }],
                "totalFrames": 1,
            }),
        );
    }

    fn variables(&mut self, request: &DapRequest, arguments: &Value) {
        let reference = arguments
            .get("variablesReference")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let variables = match reference {
            LOCALS => self
                .current()
                .and_then(|tick| tick.i)
                .map(|i| vec![json!({ "name": "i", "value": i.to_string(), "type": "int", "variablesReference": 0 })])
                .unwrap_or_default(),
            GLOBALS => vec![json!({
                "name": "__name__", "value": "'__main__'", "type": "str", "variablesReference": 0
            })],
            _ => Vec::new(),
        };
        self.respond(request, json!({ "variables": variables }));
    }

    fn evaluate(&mut self, request: &DapRequest, arguments: &Value) {
        let expression = arguments
            .get("expression")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        let local = self.current().and_then(|tick| tick.i);
        let value = match expression.as_str() {
            "i" => local.map(|i| (i.to_string(), "int")),
            "__name__" => Some(("'__main__'".to_string(), "str")),
            literal => literal.parse::<i64>().ok().map(|n| (n.to_string(), "int")),
        };
        match value {
            Some((result, type_name)) => self.respond(
                request,
                json!({ "result": result, "type": type_name, "variablesReference": 0 }),
            ),
            None => self.reject(request, format!("NameError: name '{expression}' is not defined")),
        }
    }
}

fn main() {
    let args = Args::parse();
    let mut adapter = MockAdapter::new(args, Box::new(std::io::stdout()));
    adapter.run(&mut std::io::stdin().lock());
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    reason = "Tests use expect/unwrap for clear failure messages"
)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_trace_repeats_loop_body() {
        let ticks = trace(5, Some(3), 2);
        let lines: Vec<u32> = ticks.iter().map(|t| t.line).collect();
        assert_eq!(lines, vec![1, 2, 3, 2, 3, 4, 5]);
        assert_eq!(ticks[1].i, Some(0));
        assert_eq!(ticks[4].i, Some(1));
        assert_eq!(ticks[5].i, Some(1));
    }

    #[test]
    fn test_trace_without_loop() {
        let lines: Vec<u32> = trace(3, None, 0).iter().map(|t| t.line).collect();
        assert_eq!(lines, vec![1, 2, 3]);
    }

    #[test]
    fn test_conditions() {
        assert!(condition_holds("i == 3", Some(3)));
        assert!(!condition_holds("i == 3", Some(2)));
        assert!(condition_holds("i >= 2", Some(4)));
        assert!(!condition_holds("i >= 2", None));
        assert!(condition_holds("anything", None));
    }

    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_launch_is_answered_after_configuration_done() {
        let dir = tempfile::tempdir().unwrap();
        let program = dir.path().join("prog.py");
        std::fs::write(&program, "a = 1\nb = 2\n").unwrap();

        let request = |seq: i64, command: &str, arguments: Value| {
            FrameCodec::encode(&DapMessage::Request(DapRequest {
                seq,
                command: command.into(),
                arguments: Some(arguments),
            }))
            .unwrap()
        };
        let mut input = Vec::new();
        input.extend_from_slice(&request(1, "initialize", json!({ "linesStartAt1": false })));
        input.extend_from_slice(&request(2, "launch", json!({ "program": program, "stopOnEntry": true })));
        input.extend_from_slice(&request(3, "configurationDone", json!({})));
        input.extend_from_slice(&request(4, "stackTrace", json!({ "threadId": 1 })));

        let buffer = Arc::new(Mutex::new(Vec::new()));
        MockAdapter::new(Args::default(), Box::new(Shared(buffer.clone()))).run(&mut input.as_slice());
        let output = buffer.lock().unwrap().clone();
        let messages = FrameCodec::<DapMessage>::new().decode(&output);

        let order: Vec<String> = messages
            .iter()
            .map(|m| match m {
                DapMessage::Response(r) => format!("response:{}", r.command),
                DapMessage::Event(e) => format!("event:{}", e.event),
                DapMessage::Request(r) => format!("request:{}", r.command),
            })
            .collect();
        assert_eq!(
            order,
            vec![
                "response:initialize",
                "event:initialized",
                "response:configurationDone",
                "response:launch",
                "event:process",
                "event:thread",
                "event:stopped",
                "response:stackTrace",
            ]
        );
        let DapMessage::Response(trace) = &messages[7] else {
            unreachable!("stackTrace response");
        };
        let body = trace.body.as_ref().unwrap();
        assert_eq!(body["stackFrames"][0]["line"], 0);
    }
}
