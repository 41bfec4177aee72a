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

//! Files a session has opened in its analysis clients.
//!
//! Each open file carries an idle timer. Touching the file again cancels the
//! timer and arms a fresh one; when a timer fires the file is closed in the
//! client it was opened in.

use lsp_types::{
    DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    TextDocumentContentChangeEvent, TextDocumentIdentifier, TextDocumentItem, Uri,
    VersionedTextDocumentIdentifier,
};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::client::AnalysisClient;
use super::uri::{detect_language_id, path_to_uri};
use crate::error::{BrokerError, BrokerResult};
use crate::rpc::RpcError;

/// Receiver of text document synchronization notifications.
pub trait TextDocumentSink: Send + Sync + 'static {
    /// `textDocument/didOpen`.
    fn did_open(&self, params: DidOpenTextDocumentParams) -> Result<(), RpcError>;
    /// `textDocument/didChange`.
    fn did_change(&self, params: DidChangeTextDocumentParams) -> Result<(), RpcError>;
    /// `textDocument/didClose`.
    fn did_close(&self, params: DidCloseTextDocumentParams) -> Result<(), RpcError>;
    /// Whether notifications can still be delivered.
    fn is_alive(&self) -> bool;
}

impl TextDocumentSink for AnalysisClient {
    fn did_open(&self, params: DidOpenTextDocumentParams) -> Result<(), RpcError> {
        Self::did_open(self, params)
    }

    fn did_change(&self, params: DidChangeTextDocumentParams) -> Result<(), RpcError> {
        Self::did_change(self, params)
    }

    fn did_close(&self, params: DidCloseTextDocumentParams) -> Result<(), RpcError> {
        Self::did_close(self, params)
    }

    fn is_alive(&self) -> bool {
        Self::is_alive(self)
    }
}

/// What a sync call sent to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    /// `didOpen`.
    Opened,
    /// `didChange` with the full new text.
    Changed,
    /// Nothing; the client already has the current text.
    Unchanged,
}

/// Result of opening or updating a file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileState {
    /// Canonical path.
    pub path: PathBuf,
    /// `file://` URI sent to the server.
    pub uri: String,
    /// Language ID sent in `didOpen`.
    pub language_id: String,
    /// Document version after this call.
    pub version: i32,
    /// Notification sent by this call.
    pub action: SyncAction,
}

struct OpenDocument {
    uri: Uri,
    language_id: String,
    version: i32,
    content: String,
    mtime: Option<SystemTime>,
    // Set when the caller supplied in-memory text; disk is ignored until close.
    edited: bool,
    generation: u64,
    client: Weak<dyn TextDocumentSink>,
    close_timer: Option<JoinHandle<()>>,
}

impl OpenDocument {
    fn state(&self, path: &Path, action: SyncAction) -> FileState {
        FileState {
            path: path.to_path_buf(),
            uri: self.uri.as_str().to_string(),
            language_id: self.language_id.clone(),
            version: self.version,
            action,
        }
    }

    fn change_params(&self) -> DidChangeTextDocumentParams {
        DidChangeTextDocumentParams {
            text_document: VersionedTextDocumentIdentifier {
                uri: self.uri.clone(),
                version: self.version,
            },
            content_changes: vec![TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text: self.content.clone(),
            }],
        }
    }

    fn open_params(&self) -> DidOpenTextDocumentParams {
        DidOpenTextDocumentParams {
            text_document: TextDocumentItem {
                uri: self.uri.clone(),
                language_id: self.language_id.clone(),
                version: self.version,
                text: self.content.clone(),
            },
        }
    }

    fn belongs_to(&self, client: &Arc<dyn TextDocumentSink>) -> bool {
        self.client
            .upgrade()
            .is_some_and(|current| std::ptr::addr_eq(Arc::as_ptr(&current), Arc::as_ptr(client)))
    }

    /// Sends `didClose` if the owning client is still around.
    fn send_close(&self) {
        if let Some(timer) = &self.close_timer {
            timer.abort();
        }
        let Some(client) = self.client.upgrade() else {
            return;
        };
        if !client.is_alive() {
            return;
        }
        let params = DidCloseTextDocumentParams {
            text_document: TextDocumentIdentifier {
                uri: self.uri.clone(),
            },
        };
        if let Err(e) = client.did_close(params) {
            warn!("Failed to send didClose for {}: {}", self.uri.as_str(), e);
        }
    }
}

type Documents = Arc<Mutex<HashMap<PathBuf, OpenDocument>>>;

fn lock(documents: &Documents) -> MutexGuard<'_, HashMap<PathBuf, OpenDocument>> {
    documents.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Open files of one session.
pub struct OpenFiles {
    documents: Documents,
    idle_close: Option<Duration>,
    next_generation: Mutex<u64>,
}

impl OpenFiles {
    /// Creates an empty set; `idle_close` of `None` disables auto-close.
    #[must_use]
    pub fn new(idle_close: Option<Duration>) -> Self {
        Self {
            documents: Arc::new(Mutex::new(HashMap::new())),
            idle_close,
            next_generation: Mutex::new(0),
        }
    }

    /// Opens `path` in `client`, or refreshes it if the file changed on disk.
    ///
    /// Every call counts as an access and restarts the idle timer.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::FileNotFound`] if the path is not a readable
    /// file, or an analysis error if the notification cannot be sent.
    pub async fn ensure_open(
        &self,
        path: &Path,
        client: &Arc<dyn TextDocumentSink>,
    ) -> BrokerResult<FileState> {
        let path = canonical_file(path).await?;
        let mtime = tokio::fs::metadata(&path).await.ok().and_then(|m| m.modified().ok());

        {
            let mut documents = lock(&self.documents);
            let current = documents
                .get_mut(&path)
                .filter(|doc| doc.belongs_to(client) && (doc.edited || doc.mtime == mtime));
            if let Some(doc) = current {
                trace!("Document already open: {}", path.display());
                self.arm_timer(&path, doc);
                return Ok(doc.state(&path, SyncAction::Unchanged));
            }
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| BrokerError::FileNotFound(format!("{}: {e}", path.display())))?;
        self.apply(&path, client, content, mtime, false)
    }

    /// Replaces the client's view of `path` with caller-supplied `text`.
    ///
    /// # Errors
    ///
    /// As [`Self::ensure_open`].
    pub async fn update(
        &self,
        path: &Path,
        text: String,
        client: &Arc<dyn TextDocumentSink>,
    ) -> BrokerResult<FileState> {
        let path = canonical_file(path).await?;
        self.apply(&path, client, text, None, true)
    }

    fn apply(
        &self,
        path: &Path,
        client: &Arc<dyn TextDocumentSink>,
        content: String,
        mtime: Option<SystemTime>,
        edited: bool,
    ) -> BrokerResult<FileState> {
        let mut documents = lock(&self.documents);

        if let Some(doc) = documents.get_mut(path).filter(|doc| doc.belongs_to(client)) {
            if doc.content == content {
                doc.mtime = mtime.or(doc.mtime);
                doc.edited |= edited;
                self.arm_timer(path, doc);
                return Ok(doc.state(path, SyncAction::Unchanged));
            }
            doc.version += 1;
            doc.content = content;
            doc.mtime = mtime;
            doc.edited |= edited;
            debug!("Document changed: {} (v{})", path.display(), doc.version);
            client.did_change(doc.change_params()).map_err(|e| notify_error(&doc.language_id, e))?;
            self.arm_timer(path, doc);
            return Ok(doc.state(path, SyncAction::Changed));
        }

        // Either new, or left over from a client that has since been replaced.
        if let Some(stale) = documents.remove(path) {
            stale.send_close();
        }

        let uri = path_to_uri(path).map_err(|e| BrokerError::InvalidArgument(e.to_string()))?;
        let mut doc = OpenDocument {
            uri,
            language_id: detect_language_id(path).to_string(),
            version: 1,
            content,
            mtime,
            edited,
            generation: 0,
            client: Arc::downgrade(client),
            close_timer: None,
        };
        debug!("Opening document: {} ({})", path.display(), doc.language_id);
        client.did_open(doc.open_params()).map_err(|e| notify_error(&doc.language_id, e))?;
        self.arm_timer(path, &mut doc);
        let state = doc.state(path, SyncAction::Opened);
        documents.insert(path.to_path_buf(), doc);
        Ok(state)
    }

    /// Closes `path`. Returns `false` if it was not open.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::FileNotFound`] if the path does not exist.
    pub async fn close(&self, path: &Path) -> BrokerResult<bool> {
        let path = canonical_file(path).await?;
        let removed = lock(&self.documents).remove(&path);
        Ok(removed.is_some_and(|doc| {
            debug!("Closing document: {}", path.display());
            doc.send_close();
            true
        }))
    }

    /// Whether `path` (already canonical) is open.
    #[must_use]
    pub fn is_open(&self, path: &Path) -> bool {
        lock(&self.documents).contains_key(path)
    }

    /// Canonical paths of every open file, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = lock(&self.documents).keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Forgets every file without notifying clients (used at session teardown).
    pub fn clear(&self) -> usize {
        let drained: Vec<OpenDocument> = lock(&self.documents).drain().map(|(_, d)| d).collect();
        for doc in &drained {
            if let Some(timer) = &doc.close_timer {
                timer.abort();
            }
        }
        drained.len()
    }

    fn arm_timer(&self, path: &Path, doc: &mut OpenDocument) {
        if let Some(timer) = doc.close_timer.take() {
            timer.abort();
        }
        let generation = {
            let mut next = self.next_generation.lock().unwrap_or_else(PoisonError::into_inner);
            *next += 1;
            *next
        };
        doc.generation = generation;

        let Some(delay) = self.idle_close else {
            return;
        };
        let documents = Arc::clone(&self.documents);
        let path = path.to_path_buf();
        doc.close_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // A touch that raced the wake-up bumped the generation.
            let expired = {
                let mut documents = lock(&documents);
                match documents.get(&path) {
                    Some(doc) if doc.generation == generation => documents.remove(&path),
                    _ => None,
                }
            };
            if let Some(mut doc) = expired {
                debug!("Auto-closing idle document: {}", path.display());
                doc.close_timer = None;
                doc.send_close();
            }
        }));
    }
}

impl Drop for OpenFiles {
    fn drop(&mut self) {
        self.clear();
    }
}

async fn canonical_file(path: &Path) -> BrokerResult<PathBuf> {
    let canonical = tokio::fs::canonicalize(path)
        .await
        .map_err(|_| BrokerError::FileNotFound(path.display().to_string()))?;
    let metadata = tokio::fs::metadata(&canonical)
        .await
        .map_err(|_| BrokerError::FileNotFound(path.display().to_string()))?;
    if metadata.is_file() {
        Ok(canonical)
    } else {
        Err(BrokerError::FileNotFound(path.display().to_string()))
    }
}

fn notify_error(language_id: &str, error: RpcError) -> BrokerError {
    BrokerError::analysis(language_id, error)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl TextDocumentSink for Recorder {
        fn did_open(&self, params: DidOpenTextDocumentParams) -> Result<(), RpcError> {
            self.sent
                .lock()
                .unwrap()
                .push(format!("open v{}", params.text_document.version));
            Ok(())
        }

        fn did_change(&self, params: DidChangeTextDocumentParams) -> Result<(), RpcError> {
            self.sent
                .lock()
                .unwrap()
                .push(format!("change v{}", params.text_document.version));
            Ok(())
        }

        fn did_close(&self, _params: DidCloseTextDocumentParams) -> Result<(), RpcError> {
            self.sent.lock().unwrap().push("close".into());
            Ok(())
        }

        fn is_alive(&self) -> bool {
            true
        }
    }

    fn python_file(text: &str) -> NamedTempFile {
        let mut file = NamedTempFile::with_suffix(".py").unwrap();
        write!(file, "{text}").unwrap();
        file
    }

    #[tokio::test]
    async fn test_open_then_unchanged() {
        let file = python_file("print('hello')\n");
        let recorder = Arc::new(Recorder::default());
        let sink: Arc<dyn TextDocumentSink> = recorder.clone();
        let files = OpenFiles::new(None);

        let first = files.ensure_open(file.path(), &sink).await.unwrap();
        assert_eq!(first.action, SyncAction::Opened);
        assert_eq!(first.language_id, "python");
        assert_eq!(first.version, 1);

        let second = files.ensure_open(file.path(), &sink).await.unwrap();
        assert_eq!(second.action, SyncAction::Unchanged);
        assert_eq!(recorder.sent(), vec!["open v1"]);
    }

    #[tokio::test]
    async fn test_change_on_disk_sends_did_change() {
        let file = python_file("x = 1\n");
        let recorder = Arc::new(Recorder::default());
        let sink: Arc<dyn TextDocumentSink> = recorder.clone();
        let files = OpenFiles::new(None);

        files.ensure_open(file.path(), &sink).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::write(file.path(), "x = 2\n").unwrap();

        let state = files.ensure_open(file.path(), &sink).await.unwrap();
        assert_eq!(state.action, SyncAction::Changed);
        assert_eq!(state.version, 2);
        assert_eq!(recorder.sent(), vec!["open v1", "change v2"]);
    }

    #[tokio::test]
    async fn test_update_overrides_disk() {
        let file = python_file("x = 1\n");
        let recorder = Arc::new(Recorder::default());
        let sink: Arc<dyn TextDocumentSink> = recorder.clone();
        let files = OpenFiles::new(None);

        let state = files.update(file.path(), "x = 42\n".into(), &sink).await.unwrap();
        assert_eq!(state.action, SyncAction::Opened);
        let state = files.update(file.path(), "x = 43\n".into(), &sink).await.unwrap();
        assert_eq!(state.action, SyncAction::Changed);

        let state = files.ensure_open(file.path(), &sink).await.unwrap();
        assert_eq!(state.action, SyncAction::Unchanged);
        assert_eq!(recorder.sent(), vec!["open v1", "change v2"]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let file = python_file("pass\n");
        let recorder = Arc::new(Recorder::default());
        let sink: Arc<dyn TextDocumentSink> = recorder.clone();
        let files = OpenFiles::new(None);

        files.ensure_open(file.path(), &sink).await.unwrap();
        assert!(files.close(file.path()).await.unwrap());
        assert!(!files.close(file.path()).await.unwrap());
        assert_eq!(recorder.sent(), vec!["open v1", "close"]);
        assert!(files.paths().is_empty());
    }

    #[tokio::test]
    async fn test_missing_file() {
        let sink: Arc<dyn TextDocumentSink> = Arc::new(Recorder::default());
        let files = OpenFiles::new(None);
        let result = files.ensure_open(Path::new("/definitely/not/here.py"), &sink).await;
        assert!(matches!(result, Err(BrokerError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn test_idle_file_is_auto_closed() {
        let file = python_file("pass\n");
        let recorder = Arc::new(Recorder::default());
        let sink: Arc<dyn TextDocumentSink> = recorder.clone();
        let files = OpenFiles::new(Some(Duration::from_millis(80)));

        let state = files.ensure_open(file.path(), &sink).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert!(!files.is_open(&state.path));
        assert_eq!(recorder.sent(), vec!["open v1", "close"]);
    }

    #[tokio::test]
    async fn test_reaccess_cancels_pending_close() {
        let file = python_file("pass\n");
        let recorder = Arc::new(Recorder::default());
        let sink: Arc<dyn TextDocumentSink> = recorder.clone();
        let files = OpenFiles::new(Some(Duration::from_millis(200)));

        let state = files.ensure_open(file.path(), &sink).await.unwrap();
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            files.ensure_open(file.path(), &sink).await.unwrap();
        }

        assert!(files.is_open(&state.path));
        assert_eq!(recorder.sent(), vec!["open v1"]);
    }

    #[tokio::test]
    async fn test_replaced_client_gets_fresh_open() {
        let file = python_file("pass\n");
        let old = Arc::new(Recorder::default());
        let new = Arc::new(Recorder::default());
        let old_sink: Arc<dyn TextDocumentSink> = old.clone();
        let new_sink: Arc<dyn TextDocumentSink> = new.clone();
        let files = OpenFiles::new(None);

        files.ensure_open(file.path(), &old_sink).await.unwrap();
        let state = files.ensure_open(file.path(), &new_sink).await.unwrap();

        assert_eq!(state.action, SyncAction::Opened);
        assert_eq!(old.sent(), vec!["open v1", "close"]);
        assert_eq!(new.sent(), vec!["open v1"]);
    }
}
