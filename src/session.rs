// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Session registry.
//!
//! A session groups one workspace root's analysis clients (at most one per
//! language), at most one debug client, its open files, pushed diagnostics
//! and breakpoints. Sessions idle past the configured threshold are swept,
//! which shuts their clients down exactly like an explicit delete.

use chrono::{DateTime, Utc};
use lsp_types::{Diagnostic, PublishDiagnosticsParams};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dap::{BreakpointManager, DebugClient, SharedBreakpoints};
use crate::error::{BrokerError, BrokerResult};
use crate::lsp::servers;
use crate::lsp::{
    AnalysisClient, FileState, OpenFiles, ServerStatus, TextDocumentSink, detect_language_id,
    server_language, uri_to_path,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type DiagnosticsCache = Arc<Mutex<HashMap<PathBuf, Vec<Diagnostic>>>>;

/// One logical session.
pub struct Session {
    id: String,
    root: PathBuf,
    created_at: DateTime<Utc>,
    last_accessed: Mutex<Instant>,
    config: Arc<Config>,
    clients: tokio::sync::Mutex<HashMap<String, Arc<AnalysisClient>>>,
    debug: tokio::sync::Mutex<Option<Arc<DebugClient>>>,
    breakpoints: SharedBreakpoints,
    files: OpenFiles,
    diagnostics: DiagnosticsCache,
}

/// Status snapshot of a session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    /// Session id.
    pub session_id: String,
    /// Workspace root.
    pub root: PathBuf,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Seconds since last access.
    pub idle_secs: u64,
    /// One entry per analysis client.
    pub servers: Vec<ServerStatus>,
    /// Whether a debug client is attached.
    pub debugging: bool,
    /// Program under the debugger.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_program: Option<PathBuf>,
    /// Open files.
    pub open_files: Vec<PathBuf>,
    /// Number of breakpoints, enabled or not.
    pub breakpoints: usize,
}

impl Session {
    fn new(id: String, root: PathBuf, config: Arc<Config>) -> Self {
        Self {
            id,
            root,
            created_at: Utc::now(),
            last_accessed: Mutex::new(Instant::now()),
            files: OpenFiles::new(config.file_idle_delay()),
            config,
            clients: tokio::sync::Mutex::new(HashMap::new()),
            debug: tokio::sync::Mutex::new(None),
            breakpoints: Arc::new(Mutex::new(BreakpointManager::new())),
            diagnostics: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Opaque id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Canonical workspace root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Broker configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Refreshes the last-access time.
    pub fn touch(&self) {
        *lock(&self.last_accessed) = Instant::now();
    }

    /// Time since the last access.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        lock(&self.last_accessed).elapsed()
    }

    /// Resolves a caller path against the workspace root.
    #[must_use]
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Returns the live client for `language`, spawning and initializing one
    /// if there is none or the previous one died.
    ///
    /// # Errors
    ///
    /// Returns an analysis error if no server is known for the language or it
    /// fails to start.
    pub async fn analysis_client(&self, language: &str) -> BrokerResult<Arc<AnalysisClient>> {
        let language = server_language(language);
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(language) {
            if client.is_alive() {
                return Ok(client.clone());
            }
            warn!("[{}] {} server died, restarting", self.id, language);
            clients.remove(language);
        }

        let profile = servers::resolve(language, &self.config.server).ok_or_else(|| {
            BrokerError::AnalysisProtocol {
                message: format!("No language server available for '{language}'"),
                details: None,
            }
        })?;

        info!("[{}] starting {} server for {}", self.id, profile.name(), language);
        let client = AnalysisClient::start(language, profile.as_ref(), &self.root)
            .map_err(|e| BrokerError::analysis(language, e))?
            .with_request_timeout(self.config.request_bound());
        self.route_diagnostics(&client);

        let client = Arc::new(client);
        if let Err(e) = client.initialize().await {
            client.shutdown(self.config.shutdown_bound()).await;
            return Err(BrokerError::analysis(language, e));
        }

        clients.insert(language.to_string(), client.clone());
        Ok(client)
    }

    /// Client serving the language of `path`.
    ///
    /// # Errors
    ///
    /// See [`Self::analysis_client`].
    pub async fn analysis_client_for(&self, path: &Path) -> BrokerResult<Arc<AnalysisClient>> {
        self.analysis_client(detect_language_id(path)).await
    }

    fn route_diagnostics(&self, client: &AnalysisClient) {
        let diagnostics = self.diagnostics.clone();
        let label = client.label();
        client.on_notification("textDocument/publishDiagnostics", move |params| {
            match serde_json::from_value::<PublishDiagnosticsParams>(params.clone()) {
                Ok(published) => {
                    if let Some(path) = uri_to_path(&published.uri) {
                        debug!(
                            "[{}] {} diagnostic(s) for {}",
                            label,
                            published.diagnostics.len(),
                            path.display()
                        );
                        lock(&diagnostics).insert(path, published.diagnostics);
                    }
                }
                Err(e) => warn!("[{}] malformed publishDiagnostics: {}", label, e),
            }
        });
    }

    /// Opens (or refreshes) `path` in the client for its language.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::FileNotFound`] or an analysis error.
    pub async fn open_file(&self, path: &Path) -> BrokerResult<(Arc<AnalysisClient>, FileState)> {
        let path = self.resolve_path(path);
        let client = self.analysis_client_for(&path).await?;
        let sink: Arc<dyn TextDocumentSink> = client.clone();
        let state = self.files.ensure_open(&path, &sink).await?;
        Ok((client, state))
    }

    /// Replaces the client's view of `path` with `text`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::FileNotFound`] or an analysis error.
    pub async fn update_file(&self, path: &Path, text: String) -> BrokerResult<FileState> {
        let path = self.resolve_path(path);
        let client = self.analysis_client_for(&path).await?;
        let sink: Arc<dyn TextDocumentSink> = client;
        self.files.update(&path, text, &sink).await
    }

    /// Closes `path`; `false` if it was not open.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::FileNotFound`] if the path does not exist.
    pub async fn close_file(&self, path: &Path) -> BrokerResult<bool> {
        self.files.close(&self.resolve_path(path)).await
    }

    /// Open files.
    #[must_use]
    pub const fn files(&self) -> &OpenFiles {
        &self.files
    }

    /// Last diagnostics pushed for a canonical path.
    #[must_use]
    pub fn diagnostics_for(&self, path: &Path) -> Vec<Diagnostic> {
        lock(&self.diagnostics).get(path).cloned().unwrap_or_default()
    }

    /// Breakpoints, kept across debug runs.
    #[must_use]
    pub const fn breakpoints(&self) -> &SharedBreakpoints {
        &self.breakpoints
    }

    /// The active debug client.
    ///
    /// # Errors
    ///
    /// Returns a debug protocol error when no debug session is running.
    pub async fn debug_client(&self) -> BrokerResult<Arc<DebugClient>> {
        self.debug
            .lock()
            .await
            .clone()
            .ok_or_else(BrokerError::no_debug_session)
    }

    /// The active debug client, if any.
    pub async fn current_debug_client(&self) -> Option<Arc<DebugClient>> {
        self.debug.lock().await.clone()
    }

    /// Installs a debug client, returning the one it replaces.
    pub async fn replace_debug_client(&self, client: Option<Arc<DebugClient>>) -> Option<Arc<DebugClient>> {
        std::mem::replace(&mut *self.debug.lock().await, client)
    }

    /// Status snapshot.
    pub async fn status(&self) -> SessionStatus {
        let servers = self
            .clients
            .lock()
            .await
            .values()
            .map(|client| client.status())
            .collect();
        let debug = self.current_debug_client().await;
        SessionStatus {
            session_id: self.id.clone(),
            root: self.root.clone(),
            created_at: self.created_at,
            idle_secs: self.idle_for().as_secs(),
            servers,
            debugging: debug.is_some(),
            debug_program: debug.map(|d| d.program().to_path_buf()),
            open_files: self.files.paths(),
            breakpoints: lock(&self.breakpoints).list().len(),
        }
    }

    /// Shuts down every owned client. Failures are collected, not fatal.
    async fn shutdown(&self) -> Vec<String> {
        let bound = self.config.shutdown_bound();
        let mut failures = Vec::new();

        self.files.clear();

        let clients: Vec<(String, Arc<AnalysisClient>)> = self.clients.lock().await.drain().collect();
        let tasks: Vec<(String, JoinHandle<()>)> = clients
            .into_iter()
            .map(|(language, client)| {
                (language, tokio::spawn(async move { client.shutdown(bound).await }))
            })
            .collect();

        if let Some(debug) = self.replace_debug_client(None).await {
            debug.disconnect(bound).await;
        }

        for (language, task) in tasks {
            if let Err(e) = task.await {
                failures.push(format!("{language}: {e}"));
            }
        }
        failures
    }
}

/// Owner of every live session.
pub struct SessionRegistry {
    config: Arc<Config>,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    counter: AtomicU64,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
            sweeper: Mutex::new(None),
        }
    }

    /// Broker configuration.
    #[must_use]
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    fn generate_id(&self) -> String {
        use std::time::{SystemTime, UNIX_EPOCH};

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis();
        let sequence = self.counter.fetch_add(1, Ordering::SeqCst);

        format!(
            "{:x}{:x}{:04x}",
            u32::try_from(now & u128::from(u32::MAX)).unwrap_or(0),
            std::process::id(),
            sequence
        )
    }

    /// Creates a session rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::FileNotFound`] if the root is not a directory.
    pub fn create(&self, root: &Path) -> BrokerResult<Arc<Session>> {
        let root = root
            .canonicalize()
            .map_err(|_| BrokerError::FileNotFound(root.display().to_string()))?;
        if !root.is_dir() {
            return Err(BrokerError::InvalidArgument(format!(
                "Workspace root is not a directory: {}",
                root.display()
            )));
        }

        let session = Arc::new(Session::new(self.generate_id(), root, self.config.clone()));
        info!("Created session {} for {}", session.id, session.root.display());
        lock(&self.sessions).insert(session.id.clone(), session.clone());
        Ok(session)
    }

    /// Looks up a session and refreshes its access time.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::SessionNotFound`].
    pub fn get(&self, id: &str) -> BrokerResult<Arc<Session>> {
        let session = lock(&self.sessions)
            .get(id)
            .cloned()
            .ok_or_else(|| BrokerError::SessionNotFound(id.to_string()))?;
        session.touch();
        Ok(session)
    }

    /// Resumes `id` if given, otherwise creates a session at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidArgument`] when neither is given.
    pub fn create_or_resume(&self, id: Option<&str>, root: Option<&Path>) -> BrokerResult<Arc<Session>> {
        match (id, root) {
            (Some(id), _) => self.get(id),
            (None, Some(root)) => self.create(root),
            (None, None) => Err(BrokerError::InvalidArgument(
                "Either a session id or a workspace root is required".to_string(),
            )),
        }
    }

    /// Removes a session after shutting down its clients.
    ///
    /// Returns the individual shutdown failures, if any.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::SessionNotFound`].
    pub async fn delete(&self, id: &str) -> BrokerResult<Vec<String>> {
        let session = lock(&self.sessions)
            .remove(id)
            .ok_or_else(|| BrokerError::SessionNotFound(id.to_string()))?;
        let failures = session.shutdown().await;
        if failures.is_empty() {
            info!("Deleted session {}", id);
        } else {
            warn!("Deleted session {} with {} shutdown failure(s)", id, failures.len());
        }
        Ok(failures)
    }

    /// Deletes every session idle longer than the configured threshold.
    pub async fn sweep_once(&self) -> Vec<String> {
        let threshold = self.config.session_idle_timeout();
        let idle: Vec<String> = lock(&self.sessions)
            .values()
            .filter(|s| s.idle_for() > threshold)
            .map(|s| s.id.clone())
            .collect();

        for id in &idle {
            info!("Evicting idle session {}", id);
            if let Err(e) = self.delete(id).await {
                debug!("Session {} already gone: {}", id, e);
            }
        }
        idle
    }

    /// Starts the periodic idle sweep.
    pub fn start_sweeper(self: &Arc<Self>) {
        let registry: Weak<Self> = Arc::downgrade(self);
        let period = self.config.sweep_period();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.sweep_once().await;
            }
        });
        if let Some(previous) = lock(&self.sweeper).replace(handle) {
            previous.abort();
        }
    }

    /// Stops the sweep and deletes every session.
    pub async fn shutdown_all(&self) {
        if let Some(sweeper) = lock(&self.sweeper).take() {
            sweeper.abort();
        }
        let ids: Vec<String> = lock(&self.sessions).keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.delete(&id).await {
                debug!("Session {} already gone: {}", id, e);
            }
        }
    }

    /// Every live session, without refreshing access times.
    #[must_use]
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<Arc<Session>> = lock(&self.sessions).values().cloned().collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// Whether there are no sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
