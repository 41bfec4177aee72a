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

//! Analysis-side operations.

use lsp_types::{
    DocumentSymbolParams, GotoDefinitionParams, HoverParams, PartialResultParams, Position,
    TextDocumentIdentifier, TextDocumentPositionParams, Uri, WorkDoneProgressParams,
};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::Broker;
use super::convert::{self, DiagnosticInfo, HoverInfo, LocationInfo, SymbolMatch};
use crate::error::{BrokerError, BrokerResult};
use crate::lsp::{AnalysisClient, FileState, ServerStatus, SyncAction};
use crate::position::to_zero_based;
use crate::session::Session;

/// Result of `close_file`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedFile {
    /// File the caller named.
    pub path: PathBuf,
    /// `false` if it was not open.
    pub closed: bool,
}

/// Result of `diagnostics`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsReport {
    /// Canonical path.
    pub path: PathBuf,
    /// Last set the server pushed.
    pub diagnostics: Vec<DiagnosticInfo>,
}

/// Result of `find_symbol`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolSearch {
    /// Requested name.
    pub name: String,
    /// File searched.
    pub path: PathBuf,
    /// Every match, in document order.
    pub matches: Vec<SymbolMatch>,
    /// More than one symbol matched.
    pub ambiguous: bool,
}

fn position(line: u32, column: u32) -> Position {
    Position {
        line: to_zero_based(i64::from(line)),
        character: to_zero_based(i64::from(column)),
    }
}

fn document(state: &FileState) -> BrokerResult<TextDocumentIdentifier> {
    state
        .uri
        .parse::<Uri>()
        .map(|uri| TextDocumentIdentifier { uri })
        .map_err(|e| BrokerError::Internal(format!("Invalid document URI {}: {e}", state.uri)))
}

impl Broker {
    async fn target_client(
        session: &Session,
        file: Option<&Path>,
        language: Option<&str>,
    ) -> BrokerResult<Arc<AnalysisClient>> {
        match (file, language) {
            (Some(file), _) => session.analysis_client_for(&session.resolve_path(file)).await,
            (None, Some(language)) => session.analysis_client(language).await,
            (None, None) => Err(BrokerError::InvalidArgument(
                "Either a file or a language is required".to_string(),
            )),
        }
    }

    /// Starts or reuses the analysis client for a file or language.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when neither is given, or an analysis error
    /// if the server cannot be started.
    pub async fn client_for(
        &self,
        session_id: &str,
        file: Option<&Path>,
        language: Option<&str>,
    ) -> BrokerResult<ServerStatus> {
        let session = self.sessions.get(session_id)?;
        let client = Self::target_client(&session, file, language).await?;
        Ok(client.status())
    }

    /// Sends `method` to the server untouched and returns its raw result.
    ///
    /// With a file, the file is opened first so the server has its text.
    ///
    /// # Errors
    ///
    /// Returns an analysis error carrying the server's code on failure.
    pub async fn analysis_request(
        &self,
        session_id: &str,
        file: Option<&Path>,
        language: Option<&str>,
        method: &str,
        params: Value,
    ) -> BrokerResult<Value> {
        let session = self.sessions.get(session_id)?;
        let client = match file {
            Some(file) => session.open_file(file).await?.0,
            None => Self::target_client(&session, None, language).await?,
        };
        debug!("[{}] passthrough {}", client.label(), method);
        client
            .request_value(method, params)
            .await
            .map_err(|e| BrokerError::analysis(client.language(), e))
    }

    /// Opens a file, or refreshes it if it changed on disk.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` or an analysis error.
    pub async fn open_file(&self, session_id: &str, file: &Path) -> BrokerResult<FileState> {
        let session = self.sessions.get(session_id)?;
        Ok(session.open_file(file).await?.1)
    }

    /// Replaces the server's view of a file with `text`.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` or an analysis error.
    pub async fn update_file(&self, session_id: &str, file: &Path, text: String) -> BrokerResult<FileState> {
        self.sessions.get(session_id)?.update_file(file, text).await
    }

    /// Closes a file.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` if the path does not exist.
    pub async fn close_file(&self, session_id: &str, file: &Path) -> BrokerResult<ClosedFile> {
        let closed = self.sessions.get(session_id)?.close_file(file).await?;
        Ok(ClosedFile {
            path: file.to_path_buf(),
            closed,
        })
    }

    /// Opens a file and returns the diagnostics the server pushed for it.
    ///
    /// Waits the settle delay only when this call sent new text.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` or an analysis error.
    pub async fn diagnostics(&self, session_id: &str, file: &Path) -> BrokerResult<DiagnosticsReport> {
        let session = self.sessions.get(session_id)?;
        let (_, state) = session.open_file(file).await?;
        if state.action != SyncAction::Unchanged {
            tokio::time::sleep(session.config().diagnostics_settle()).await;
        }
        let diagnostics = session
            .diagnostics_for(&state.path)
            .iter()
            .map(DiagnosticInfo::from)
            .collect();
        Ok(DiagnosticsReport {
            path: state.path,
            diagnostics,
        })
    }

    /// Hover at a 1-based position; `None` when the server has nothing.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` or an analysis error.
    pub async fn hover(
        &self,
        session_id: &str,
        file: &Path,
        line: u32,
        column: u32,
    ) -> BrokerResult<Option<HoverInfo>> {
        let session = self.sessions.get(session_id)?;
        let (client, state) = session.open_file(file).await?;
        let params = HoverParams {
            text_document_position_params: TextDocumentPositionParams {
                text_document: document(&state)?,
                position: position(line, column),
            },
            work_done_progress_params: WorkDoneProgressParams::default(),
        };
        let hover = client
            .hover(params)
            .await
            .map_err(|e| BrokerError::analysis(client.language(), e))?;
        Ok(hover.as_ref().map(HoverInfo::from))
    }

    /// Definition of the symbol at a 1-based position.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` or an analysis error.
    pub async fn definition(
        &self,
        session_id: &str,
        file: &Path,
        line: u32,
        column: u32,
    ) -> BrokerResult<Vec<LocationInfo>> {
        let session = self.sessions.get(session_id)?;
        let (client, state) = session.open_file(file).await?;
        let params = GotoDefinitionParams {
            text_document_position_params: TextDocumentPositionParams {
                text_document: document(&state)?,
                position: position(line, column),
            },
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };
        let response = client
            .definition(params)
            .await
            .map_err(|e| BrokerError::analysis(client.language(), e))?;
        Ok(response.as_ref().map(convert::locations).unwrap_or_default())
    }

    /// Symbols named `name` in a file. Several matches are a success with
    /// `ambiguous` set.
    ///
    /// # Errors
    ///
    /// Returns `SymbolNotFound` when nothing matches.
    pub async fn find_symbol(&self, session_id: &str, file: &Path, name: &str) -> BrokerResult<SymbolSearch> {
        let session = self.sessions.get(session_id)?;
        let (client, state) = session.open_file(file).await?;
        let params = DocumentSymbolParams {
            text_document: document(&state)?,
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };
        let response = client
            .document_symbols(params)
            .await
            .map_err(|e| BrokerError::analysis(client.language(), e))?;

        let matches = response
            .as_ref()
            .map(|r| convert::find_symbols(r, name))
            .unwrap_or_default();
        if matches.is_empty() {
            return Err(BrokerError::SymbolNotFound {
                symbol: name.to_string(),
                file: state.path.display().to_string(),
            });
        }
        Ok(SymbolSearch {
            name: name.to_string(),
            path: state.path,
            ambiguous: matches.len() > 1,
            matches,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;

    #[test]
    fn test_position_converts_to_zero_based() {
        assert_eq!(position(53, 1), Position { line: 52, character: 0 });
        assert_eq!(position(0, 0), Position { line: 0, character: 0 });
    }

    #[test]
    fn test_document_identifier_from_state() {
        let state = FileState {
            path: PathBuf::from("/work/app.py"),
            uri: "file:///work/app.py".into(),
            language_id: "python".into(),
            version: 1,
            action: SyncAction::Opened,
        };
        assert_eq!(document(&state).unwrap().uri.as_str(), "file:///work/app.py");
    }
}
