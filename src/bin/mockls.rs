// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! A configurable mock language server for testing.
//!
//! Understands just enough Python (`def`, `class`, indentation) to answer
//! hover, definition and document symbol requests, and publishes one error
//! diagnostic per `undefined_name` it sees. CLI flags control timing and
//! failure modes. No tokio; deferred notifications use `std::thread`.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use lcp_broker::protocol::FrameCodec;
use serde_json::{Value, json};

/// Mock language server for integration testing.
#[derive(Parser, Debug, Default)]
#[command(name = "mockls")]
struct Args {
    /// Sleep before every response (milliseconds).
    #[arg(long, default_value_t = 0)]
    response_delay: u64,

    /// Delay before publishing diagnostics (milliseconds).
    #[arg(long, default_value_t = 0)]
    diagnostics_delay: u64,

    /// Never publish diagnostics.
    #[arg(long)]
    no_diagnostics: bool,

    /// Emit `$/progress` begin/end after `initialized`, this far apart (milliseconds).
    #[arg(long, default_value_t = 0)]
    indexing_delay: u64,

    /// Exit with status 1 after n responses (simulate crash).
    #[arg(long)]
    drop_after: Option<u64>,

    /// Never respond to this method (repeatable).
    #[arg(long)]
    hang_on: Vec<String>,

    /// Return `InternalError` for this method (repeatable).
    #[arg(long)]
    fail_on: Vec<String>,

    /// Send `workspace/configuration` and an unknown request after `initialize`.
    #[arg(long)]
    server_requests: bool,
}

/// Thread-safe output. Stdout in production, a shared buffer in tests.
type Writer = Arc<Mutex<Box<dyn Write + Send>>>;

fn send(writer: &Writer, message: &Value) {
    let Ok(frame) = FrameCodec::<Value>::encode(message) else {
        return;
    };
    let Ok(mut out) = writer.lock() else { return };
    let _ = out.write_all(&frame);
    let _ = out.flush();
}

struct MockServer {
    args: Args,
    documents: HashMap<String, String>,
    responses: u64,
    writer: Writer,
    next_id: Arc<AtomicI64>,
}

impl MockServer {
    fn new(args: Args, writer: Writer) -> Self {
        Self {
            args,
            documents: HashMap::new(),
            responses: 0,
            writer,
            next_id: Arc::new(AtomicI64::new(1000)),
        }
    }

    fn run(&mut self, reader: &mut dyn Read) {
        let mut codec = FrameCodec::<Value>::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = match reader.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            for message in codec.decode(&chunk[..n]) {
                self.dispatch(&message);
            }
        }
    }

    fn dispatch(&mut self, message: &Value) {
        let Some(method) = message.get("method").and_then(Value::as_str) else {
            // A response to one of our own requests.
            return;
        };
        let params = message.get("params").cloned().unwrap_or(Value::Null);
        match message.get("id") {
            Some(id) => self.request(id.clone(), method, &params),
            None => self.notification(method, &params),
        }
    }

    fn request(&mut self, id: Value, method: &str, params: &Value) {
        if self.args.hang_on.iter().any(|m| m == method) {
            return;
        }
        if self.args.response_delay > 0 {
            std::thread::sleep(Duration::from_millis(self.args.response_delay));
        }
        if self.args.fail_on.iter().any(|m| m == method) {
            self.respond(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32603, "message": format!("mockls: configured to fail on {method}") }
            }));
            return;
        }

        let result = match method {
            "initialize" => initialize_result(),
            "shutdown" => Value::Null,
            "textDocument/hover" => self.hover(params).unwrap_or(Value::Null),
            "textDocument/definition" => self.definition(params).unwrap_or(Value::Null),
            "textDocument/documentSymbol" => self.symbols(params).unwrap_or(Value::Null),
            "mockls/echo" => params.clone(),
            _ => {
                self.respond(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": -32601, "message": format!("mockls: method not found: {method}") }
                }));
                return;
            }
        };
        self.respond(json!({ "jsonrpc": "2.0", "id": id, "result": result }));

        if method == "initialize" && self.args.server_requests {
            self.server_requests();
        }
    }

    fn notification(&mut self, method: &str, params: &Value) {
        let uri = params
            .pointer("/textDocument/uri")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match method {
            "initialized" if self.args.indexing_delay > 0 => self.simulate_indexing(),
            "textDocument/didOpen" => {
                let text = params
                    .pointer("/textDocument/text")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                self.documents.insert(uri.clone(), text.to_string());
                self.publish(&uri);
            }
            "textDocument/didChange" => {
                if let Some(text) = params
                    .get("contentChanges")
                    .and_then(Value::as_array)
                    .and_then(|changes| changes.last())
                    .and_then(|change| change.get("text"))
                    .and_then(Value::as_str)
                {
                    self.documents.insert(uri.clone(), text.to_string());
                }
                self.publish(&uri);
            }
            "textDocument/didClose" => {
                self.documents.remove(&uri);
            }
            "exit" => std::process::exit(0),
            _ => {}
        }
    }

    fn respond(&mut self, response: Value) {
        send(&self.writer, &response);
        self.responses += 1;
        if let Some(max) = self.args.drop_after
            && self.responses >= max
        {
            std::process::exit(1);
        }
    }

    fn hover(&self, params: &Value) -> Option<Value> {
        let (uri, line, column) = position(params)?;
        let text = self.documents.get(uri)?;
        let word = word_at(text, line, column)?;
        let kind = outline(text)
            .iter()
            .find(|symbol| symbol.name == word)
            .map_or("variable", |symbol| symbol.kind_name());
        Some(json!({
            "contents": { "kind": "markdown", "value": format!("```python\n({kind}) {word}\n```") }
        }))
    }

    fn definition(&self, params: &Value) -> Option<Value> {
        let (uri, line, column) = position(params)?;
        let text = self.documents.get(uri)?;
        let word = word_at(text, line, column)?;
        let symbol = outline(text).into_iter().find(|symbol| symbol.name == word)?;
        Some(json!([{ "uri": uri, "range": symbol.selection_range() }]))
    }

    fn symbols(&self, params: &Value) -> Option<Value> {
        let uri = params.pointer("/textDocument/uri").and_then(Value::as_str)?;
        let text = self.documents.get(uri)?;
        Some(nest(&outline(text)))
    }

    fn publish(&self, uri: &str) {
        if self.args.no_diagnostics {
            return;
        }
        let Some(text) = self.documents.get(uri) else {
            return;
        };
        let message = json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": { "uri": uri, "diagnostics": diagnostics(text) }
        });
        let delay = self.args.diagnostics_delay;
        if delay == 0 {
            send(&self.writer, &message);
        } else {
            let writer = self.writer.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(delay));
                send(&writer, &message);
            });
        }
    }

    fn simulate_indexing(&self) {
        let writer = self.writer.clone();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let delay = self.args.indexing_delay;
        std::thread::spawn(move || {
            let token = "mockls-indexing";
            send(
                &writer,
                &json!({
                    "jsonrpc": "2.0", "id": id,
                    "method": "window/workDoneProgress/create",
                    "params": { "token": token }
                }),
            );
            send(
                &writer,
                &json!({
                    "jsonrpc": "2.0", "method": "$/progress",
                    "params": { "token": token, "value": { "kind": "begin", "title": "Indexing" } }
                }),
            );
            std::thread::sleep(Duration::from_millis(delay));
            send(
                &writer,
                &json!({
                    "jsonrpc": "2.0", "method": "$/progress",
                    "params": { "token": token, "value": { "kind": "end" } }
                }),
            );
        });
    }

    fn server_requests(&self) {
        let configuration = self.next_id.fetch_add(1, Ordering::SeqCst);
        send(
            &self.writer,
            &json!({
                "jsonrpc": "2.0", "id": configuration,
                "method": "workspace/configuration",
                "params": { "items": [{ "section": "python" }, { "section": "mockls" }] }
            }),
        );
        let unknown = self.next_id.fetch_add(1, Ordering::SeqCst);
        send(
            &self.writer,
            &json!({ "jsonrpc": "2.0", "id": unknown, "method": "mockls/unknown", "params": {} }),
        );
    }
}

fn initialize_result() -> Value {
    json!({
        "capabilities": {
            "hoverProvider": true,
            "definitionProvider": true,
            "documentSymbolProvider": true,
            "textDocumentSync": { "openClose": true, "change": 1 }
        },
        "serverInfo": { "name": "mockls", "version": env!("CARGO_PKG_VERSION") }
    })
}

fn position(params: &Value) -> Option<(&str, usize, usize)> {
    let uri = params.pointer("/textDocument/uri").and_then(Value::as_str)?;
    let line = params.pointer("/position/line").and_then(Value::as_u64)?;
    let column = params.pointer("/position/character").and_then(Value::as_u64)?;
    Some((uri, usize::try_from(line).ok()?, usize::try_from(column).ok()?))
}

const fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn word_at(text: &str, line: usize, column: usize) -> Option<String> {
    let bytes = text.lines().nth(line)?.as_bytes();
    if column >= bytes.len() || !is_word_byte(bytes[column]) {
        return None;
    }
    let start = bytes[..column]
        .iter()
        .rposition(|&b| !is_word_byte(b))
        .map_or(0, |i| i + 1);
    let end = bytes[column..]
        .iter()
        .position(|&b| !is_word_byte(b))
        .map_or(bytes.len(), |i| column + i);
    String::from_utf8(bytes[start..end].to_vec()).ok()
}

/// A `def` or `class` found by scanning lines.
#[derive(Debug, Clone)]
struct Outline {
    name: String,
    class: bool,
    indent: usize,
    line: usize,
    name_column: usize,
    last_line: usize,
    last_column: usize,
}

impl Outline {
    const fn kind_name(&self) -> &'static str {
        if self.class { "class" } else { "function" }
    }

    const fn kind(&self) -> u32 {
        // LSP SymbolKind: Class = 5, Function = 12.
        if self.class { 5 } else { 12 }
    }

    fn selection_range(&self) -> Value {
        json!({
            "start": { "line": self.line, "character": self.name_column },
            "end": { "line": self.line, "character": self.name_column + self.name.len() }
        })
    }

    fn range(&self) -> Value {
        json!({
            "start": { "line": self.line, "character": self.indent },
            "end": { "line": self.last_line, "character": self.last_column }
        })
    }
}

fn outline(text: &str) -> Vec<Outline> {
    let lines: Vec<&str> = text.lines().collect();
    let mut found = Vec::new();
    for (index, raw) in lines.iter().enumerate() {
        let trimmed = raw.trim_start();
        let indent = raw.len() - trimmed.len();
        let (class, rest) = if let Some(rest) = trimmed.strip_prefix("class ") {
            (true, rest)
        } else if let Some(rest) = trimmed.strip_prefix("def ") {
            (false, rest)
        } else {
            continue;
        };
        let name: String = rest
            .bytes()
            .take_while(|&b| is_word_byte(b))
            .map(char::from)
            .collect();
        if name.is_empty() {
            continue;
        }

        // The body runs until the next non-blank line at the same or lower indent.
        let mut last_line = index;
        for (offset, body) in lines.iter().enumerate().skip(index + 1) {
            let body_indent = body.len() - body.trim_start().len();
            if !body.trim().is_empty() && body_indent <= indent {
                break;
            }
            if !body.trim().is_empty() {
                last_line = offset;
            }
        }

        found.push(Outline {
            name_column: indent + (trimmed.len() - rest.len()),
            name,
            class,
            indent,
            line: index,
            last_line,
            last_column: lines[last_line].len(),
        });
    }
    found
}

/// Builds `DocumentSymbol[]`, nesting each entry under the closest enclosing one.
fn nest(symbols: &[Outline]) -> Value {
    fn build(symbols: &[Outline], index: usize) -> (Value, usize) {
        let parent = &symbols[index];
        let mut children = Vec::new();
        let mut next = index + 1;
        while next < symbols.len()
            && symbols[next].indent > parent.indent
            && symbols[next].line <= parent.last_line
        {
            let (child, after) = build(symbols, next);
            children.push(child);
            next = after;
        }
        let symbol = json!({
            "name": parent.name,
            "kind": parent.kind(),
            "range": parent.range(),
            "selectionRange": parent.selection_range(),
            "children": children,
        });
        (symbol, next)
    }

    let mut top = Vec::new();
    let mut index = 0;
    while index < symbols.len() {
        let (symbol, next) = build(symbols, index);
        top.push(symbol);
        index = next;
    }
    Value::Array(top)
}

fn diagnostics(text: &str) -> Value {
    let needle = "undefined_name";
    let found: Vec<Value> = text
        .lines()
        .enumerate()
        .filter_map(|(line, content)| {
            let column = content.find(needle)?;
            Some(json!({
                "range": {
                    "start": { "line": line, "character": column },
                    "end": { "line": line, "character": column + needle.len() }
                },
                "severity": 1,
                "code": "undefined-variable",
                "source": "mockls",
                "message": format!("\"{needle}\" is not defined")
            }))
        })
        .collect();
    Value::Array(found)
}

fn main() {
    let args = Args::parse();
    let writer: Writer = Arc::new(Mutex::new(Box::new(std::io::stdout())));
    let mut server = MockServer::new(args, writer);
    server.run(&mut std::io::stdin().lock());
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    reason = "Tests use expect/unwrap for clear failure messages"
)]
mod tests {
    use super::*;

    const SOURCE: &str = "class Greeter:\n    def greet(self, name):\n        return name\n\n\ndef main():\n    Greeter().greet(undefined_name)\n";

    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0
                .lock()
                .map_err(|e| std::io::Error::other(e.to_string()))?
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn run(args: Args, input: &[Value]) -> Vec<Value> {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer: Writer = Arc::new(Mutex::new(Box::new(Shared(buffer.clone()))));
        let mut bytes = Vec::new();
        for message in input {
            bytes.extend_from_slice(&FrameCodec::<Value>::encode(message).unwrap());
        }
        MockServer::new(args, writer).run(&mut bytes.as_slice());
        let output = buffer.lock().unwrap().clone();
        FrameCodec::<Value>::new().decode(&output)
    }

    fn open(uri: &str) -> Value {
        json!({
            "jsonrpc": "2.0", "method": "textDocument/didOpen",
            "params": { "textDocument": { "uri": uri, "languageId": "python", "version": 1, "text": SOURCE } }
        })
    }

    #[test]
    fn test_outline_nests_methods_in_classes() {
        let symbols = nest(&outline(SOURCE));
        assert_eq!(symbols[0]["name"], "Greeter");
        assert_eq!(symbols[0]["kind"], 5);
        assert_eq!(symbols[0]["children"][0]["name"], "greet");
        assert_eq!(symbols[0]["children"][0]["selectionRange"]["start"]["character"], 8);
        assert_eq!(symbols[1]["name"], "main");
        assert_eq!(symbols[1]["range"]["end"]["line"], 6);
    }

    #[test]
    fn test_open_publishes_diagnostics() {
        let messages = run(Args::default(), &[open("file:///w/app.py")]);
        assert_eq!(messages[0]["method"], "textDocument/publishDiagnostics");
        let diagnostics = messages[0]["params"]["diagnostics"].as_array().unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0]["range"]["start"]["line"], 6);
    }

    #[test]
    fn test_hover_and_definition() {
        let at = |id: i64, method: &str| {
            json!({
                "jsonrpc": "2.0", "id": id, "method": method,
                "params": { "textDocument": { "uri": "file:///w/app.py" }, "position": { "line": 6, "character": 16 } }
            })
        };
        let messages = run(
            Args {
                no_diagnostics: true,
                ..Args::default()
            },
            &[open("file:///w/app.py"), at(1, "textDocument/hover"), at(2, "textDocument/definition")],
        );
        assert!(
            messages[0]["result"]["contents"]["value"]
                .as_str()
                .unwrap()
                .contains("(function) greet")
        );
        assert_eq!(messages[1]["result"][0]["range"]["start"]["line"], 1);
    }

    #[test]
    fn test_fail_on_and_unknown_method() {
        let messages = run(
            Args {
                fail_on: vec!["textDocument/hover".into()],
                ..Args::default()
            },
            &[
                json!({ "jsonrpc": "2.0", "id": 1, "method": "textDocument/hover", "params": {} }),
                json!({ "jsonrpc": "2.0", "id": 2, "method": "nope", "params": {} }),
            ],
        );
        assert_eq!(messages[0]["error"]["code"], -32603);
        assert_eq!(messages[1]["error"]["code"], -32601);
    }

    #[test]
    fn test_word_at() {
        assert_eq!(word_at("x = foo_bar(1)", 0, 6).as_deref(), Some("foo_bar"));
        assert_eq!(word_at("x = foo_bar(1)", 0, 1), None);
        assert_eq!(word_at("x", 3, 0), None);
    }
}
