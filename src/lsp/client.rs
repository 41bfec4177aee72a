/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use lsp_types::{
    ClientCapabilities, DidChangeTextDocumentParams, DidCloseTextDocumentParams,
    DidOpenTextDocumentParams, DocumentSymbolParams, DocumentSymbolResponse,
    GotoDefinitionParams, GotoDefinitionResponse, Hover, HoverParams, InitializeParams,
    InitializeResult, InitializedParams, ProgressParams, WorkspaceFolder,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use super::servers::ServerProfile;
use super::state::{ProgressTracker, ServerState, ServerStatus};
use super::uri::path_to_uri;
use crate::protocol::jsonrpc::{
    NotificationMessage, RequestId, RequestMessage, ResponseMessage,
};
use crate::protocol::JsonRpcMessage;
use crate::rpc::{MessageSink, Multiplexer, Outbound, ProcessConnection, RpcError};

type NotificationHandler = Box<dyn Fn(&Value) + Send + Sync>;
type HandlerTable = Arc<RwLock<HashMap<String, NotificationHandler>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Routes inbound JSON-RPC traffic from one server process.
struct AnalysisSink {
    label: String,
    calls: Arc<Multiplexer<Value>>,
    handlers: HandlerTable,
    state: Arc<AtomicU8>,
}

impl AnalysisSink {
    fn answer(&self, request: RequestMessage, outbound: &Outbound<JsonRpcMessage>) {
        debug!("[{}] server request: {}", self.label, request.method);
        let response = match request.method.as_str() {
            "window/workDoneProgress/create"
            | "client/registerCapability"
            | "client/unregisterCapability" => ResponseMessage::success(request.id, Value::Null),
            "workspace/configuration" => {
                let items = request
                    .params
                    .get("items")
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len);
                ResponseMessage::success(request.id, Value::Array(vec![Value::Null; items]))
            }
            method => ResponseMessage::method_not_found(request.id, method),
        };
        if let Err(e) = outbound.send(&JsonRpcMessage::Response(response)) {
            warn!("[{}] failed to answer server request: {}", self.label, e);
        }
    }
}

impl MessageSink<JsonRpcMessage> for AnalysisSink {
    fn on_message(&self, message: JsonRpcMessage, outbound: &Outbound<JsonRpcMessage>) {
        match message {
            JsonRpcMessage::Response(response) => {
                let Some(RequestId::Number(id)) = response.id else {
                    warn!("[{}] response with non-numeric id: {:?}", self.label, response.id);
                    return;
                };
                let outcome = match response.error {
                    Some(error) => Err(RpcError::Remote {
                        code: error.code,
                        message: error.message,
                        data: error.data,
                    }),
                    None => Ok(response.result.unwrap_or(Value::Null)),
                };
                self.calls.settle(id, outcome);
            }
            JsonRpcMessage::Notification(notification) => {
                let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
                match handlers.get(&notification.method) {
                    Some(handler) => handler(&notification.params),
                    None => trace!("[{}] unhandled notification: {}", self.label, notification.method),
                }
            }
            JsonRpcMessage::Request(request) => self.answer(request, outbound),
        }
    }

    fn on_exit(&self, code: Option<i32>) {
        self.state.store(ServerState::Dead.as_u8(), Ordering::SeqCst);
        let failed = self.calls.fail_all(&RpcError::ProcessExited { code });
        if failed > 0 {
            warn!("[{}] failed {} pending request(s) on exit", self.label, failed);
        }
    }
}

/// A language server process speaking JSON-RPC over stdio.
pub struct AnalysisClient {
    language: String,
    server: String,
    root: PathBuf,
    capabilities: ClientCapabilities,
    initialization_options: Option<Value>,
    connection: ProcessConnection<JsonRpcMessage>,
    calls: Arc<Multiplexer<Value>>,
    handlers: HandlerTable,
    state: Arc<AtomicU8>,
    progress: Arc<Mutex<ProgressTracker>>,
    request_timeout: Option<Duration>,
    started: Instant,
}

impl AnalysisClient {
    /// Spawns the server described by `profile` with `root` as working directory.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Spawn`] if the process cannot be started.
    pub fn start(language: &str, profile: &dyn ServerProfile, root: &Path) -> Result<Self, RpcError> {
        let calls = Arc::new(Multiplexer::new());
        let handlers: HandlerTable = Arc::new(RwLock::new(HashMap::new()));
        let state = Arc::new(AtomicU8::new(ServerState::Initializing.as_u8()));
        let label = format!("{}:{}", language, profile.name());

        let sink = Arc::new(AnalysisSink {
            label: label.clone(),
            calls: calls.clone(),
            handlers: handlers.clone(),
            state: state.clone(),
        });
        let connection = ProcessConnection::spawn(&label, &profile.launch(root), sink)?;

        let client = Self {
            language: language.to_string(),
            server: profile.name().to_string(),
            root: root.to_path_buf(),
            capabilities: profile.capabilities(),
            initialization_options: profile.initialization_options(),
            connection,
            calls,
            handlers,
            state,
            progress: Arc::new(Mutex::new(ProgressTracker::default())),
            request_timeout: None,
            started: Instant::now(),
        };
        client.install_builtin_handlers();
        Ok(client)
    }

    /// Bounds every request by `timeout`. `None` waits until the server answers or exits.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn install_builtin_handlers(&self) {
        let progress = self.progress.clone();
        let state = self.state.clone();
        self.on_notification("$/progress", move |params| {
            let Ok(params) = serde_json::from_value::<ProgressParams>(params.clone()) else {
                return;
            };
            let mut tracker = lock(&progress);
            tracker.update(&params);
            let current = ServerState::from_u8(state.load(Ordering::SeqCst));
            if current == ServerState::Dead || current == ServerState::Initializing {
                return;
            }
            let next = if tracker.is_busy() {
                ServerState::Indexing
            } else {
                ServerState::Ready
            };
            state.store(next.as_u8(), Ordering::SeqCst);
        });

        let label = self.label();
        self.on_notification("window/logMessage", move |params| {
            if let Some(message) = params.get("message").and_then(Value::as_str) {
                debug!("[{}] {}", label, message);
            }
        });
    }

    /// Registers `handler` for a server notification, replacing any previous one.
    pub fn on_notification<F>(&self, method: &str, handler: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(method.to_string(), Box::new(handler));
    }

    /// Performs the `initialize` handshake and sends `initialized`.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the handshake or exits.
    pub async fn initialize(&self) -> Result<InitializeResult, RpcError> {
        let root_uri = path_to_uri(&self.root)
            .map_err(|e| RpcError::Transport(format!("invalid workspace root: {e}")))?;

        let params = InitializeParams {
            process_id: Some(std::process::id()),
            capabilities: self.capabilities.clone(),
            initialization_options: self.initialization_options.clone(),
            workspace_folders: Some(vec![WorkspaceFolder {
                uri: root_uri,
                name: self
                    .root
                    .file_name()
                    .map_or_else(|| "workspace".to_string(), |s| s.to_string_lossy().to_string()),
            }]),
            ..Default::default()
        };

        let result: InitializeResult = self.request("initialize", params).await?;

        self.notify("initialized", InitializedParams {})?;

        let ready = if lock(&self.progress).is_busy() {
            ServerState::Indexing
        } else {
            ServerState::Ready
        };
        let _ = self.state.compare_exchange(
            ServerState::Initializing.as_u8(),
            ready.as_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        info!("[{}] initialized", self.label());
        Ok(result)
    }

    /// Sends a request and waits for its raw result.
    ///
    /// # Errors
    ///
    /// Returns the server's error response, [`RpcError::ProcessExited`] if
    /// the server dies first, or [`RpcError::Timeout`] when a request
    /// timeout is configured and elapses.
    pub async fn request_value(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let call = self.calls.register()?;
        let id = call.id();
        let message = JsonRpcMessage::Request(RequestMessage::new(id, method, params));
        if let Err(e) = self.connection.send(&message) {
            self.calls.forget(id);
            return Err(e);
        }
        trace!("[{}] request {} id={}", self.label(), method, id);

        match self.request_timeout {
            Some(after) => {
                let outcome = call.wait_timeout(method, after).await;
                if matches!(outcome, Err(RpcError::Timeout { .. })) {
                    self.calls.forget(id);
                }
                outcome
            }
            None => call.wait().await,
        }
    }

    /// Sends a typed request.
    ///
    /// # Errors
    ///
    /// As [`Self::request_value`], plus [`RpcError::InvalidResponse`] when
    /// the result does not match `R`.
    pub async fn request<P, R>(&self, method: &str, params: P) -> Result<R, RpcError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params).map_err(|e| RpcError::Transport(e.to_string()))?;
        let value = self.request_value(method, params).await?;
        serde_json::from_value(value).map_err(|e| RpcError::InvalidResponse {
            method: method.to_string(),
            reason: e.to_string(),
        })
    }

    /// Queues a notification.
    ///
    /// # Errors
    ///
    /// Returns an error if the params cannot be serialized or the writer has stopped.
    pub fn notify<P: Serialize>(&self, method: &str, params: P) -> Result<(), RpcError> {
        let params = serde_json::to_value(params).map_err(|e| RpcError::Transport(e.to_string()))?;
        self.connection
            .send(&JsonRpcMessage::Notification(NotificationMessage::new(method, params)))
    }

    /// `textDocument/didOpen`.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer has stopped.
    pub fn did_open(&self, params: DidOpenTextDocumentParams) -> Result<(), RpcError> {
        self.notify("textDocument/didOpen", params)
    }

    /// `textDocument/didChange`.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer has stopped.
    pub fn did_change(&self, params: DidChangeTextDocumentParams) -> Result<(), RpcError> {
        self.notify("textDocument/didChange", params)
    }

    /// `textDocument/didClose`.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer has stopped.
    pub fn did_close(&self, params: DidCloseTextDocumentParams) -> Result<(), RpcError> {
        self.notify("textDocument/didClose", params)
    }

    /// `textDocument/hover`.
    ///
    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn hover(&self, params: HoverParams) -> Result<Option<Hover>, RpcError> {
        self.request("textDocument/hover", params).await
    }

    /// `textDocument/definition`.
    ///
    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn definition(
        &self,
        params: GotoDefinitionParams,
    ) -> Result<Option<GotoDefinitionResponse>, RpcError> {
        self.request("textDocument/definition", params).await
    }

    /// `textDocument/documentSymbol`.
    ///
    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn document_symbols(
        &self,
        params: DocumentSymbolParams,
    ) -> Result<Option<DocumentSymbolResponse>, RpcError> {
        self.request("textDocument/documentSymbol", params).await
    }

    /// Graceful `shutdown` + `exit`, then unconditional termination.
    ///
    /// Never fails; a graceful step that errors or exceeds `bound` is logged.
    pub async fn shutdown(&self, bound: Duration) {
        if self.is_alive() {
            match tokio::time::timeout(bound, self.request_value("shutdown", Value::Null)).await {
                Ok(Ok(_)) => {
                    if let Err(e) = self.notify("exit", Value::Null) {
                        debug!("[{}] exit notification not sent: {}", self.label(), e);
                    }
                }
                Ok(Err(e)) => warn!("[{}] shutdown request failed: {}", self.label(), e),
                Err(_) => warn!("[{}] shutdown request timed out after {:?}", self.label(), bound),
            }
        }
        self.connection.terminate().await;
        self.state.store(ServerState::Dead.as_u8(), Ordering::SeqCst);
    }

    /// Language this client serves.
    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Label used in logs.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}:{}", self.language, self.server)
    }

    /// Whether the process is still running.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.connection.is_alive()
            && ServerState::from_u8(self.state.load(Ordering::SeqCst)) != ServerState::Dead
    }

    /// Current readiness.
    #[must_use]
    pub fn state(&self) -> ServerState {
        if self.connection.is_alive() {
            ServerState::from_u8(self.state.load(Ordering::SeqCst))
        } else {
            ServerState::Dead
        }
    }

    /// Status snapshot.
    #[must_use]
    pub fn status(&self) -> ServerStatus {
        ServerStatus {
            language: self.language.clone(),
            server: self.server.clone(),
            state: self.state(),
            progress: lock(&self.progress).oldest_title().map(ToString::to_string),
            pending_requests: self.calls.outstanding(),
            pid: self.connection.pid(),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}
