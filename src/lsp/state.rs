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

//! Language server readiness and work-done progress tracking.

use lsp_types::{NumberOrString, ProgressParams, ProgressParamsValue, WorkDoneProgress};
use serde::Serialize;
use std::collections::HashMap;

/// Overall server readiness state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    /// Spawned, handshake not finished.
    Initializing,
    /// Handshake done, server reports work in progress.
    Indexing,
    /// Ready to handle requests.
    Ready,
    /// Process gone.
    Dead,
}

impl ServerState {
    /// Create from atomic u8 value.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Initializing,
            1 => Self::Indexing,
            2 => Self::Ready,
            _ => Self::Dead,
        }
    }

    /// Convert to atomic u8 value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Initializing => 0,
            Self::Indexing => 1,
            Self::Ready => 2,
            Self::Dead => 3,
        }
    }
}

/// Status snapshot of one analysis client.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    /// Language the client serves.
    pub language: String,
    /// Server profile name.
    pub server: String,
    /// Readiness.
    pub state: ServerState,
    /// Title of the longest-running progress operation, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    /// Requests awaiting a response.
    pub pending_requests: usize,
    /// OS process id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Seconds since spawn.
    pub uptime_secs: u64,
}

/// Active `$/progress` operations keyed by token.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    active: HashMap<NumberOrString, String>,
    order: Vec<NumberOrString>,
}

impl ProgressTracker {
    /// Applies one progress notification.
    pub fn update(&mut self, params: &ProgressParams) {
        let ProgressParamsValue::WorkDone(progress) = &params.value;
        match progress {
            WorkDoneProgress::Begin(begin) => {
                if self.active.insert(params.token.clone(), begin.title.clone()).is_none() {
                    self.order.push(params.token.clone());
                }
            }
            WorkDoneProgress::Report(_) => {}
            WorkDoneProgress::End(_) => {
                self.active.remove(&params.token);
                self.order.retain(|t| t != &params.token);
            }
        }
    }

    /// Whether any operation is running.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        !self.active.is_empty()
    }

    /// Title of the oldest running operation.
    #[must_use]
    pub fn oldest_title(&self) -> Option<&str> {
        self.order
            .first()
            .and_then(|token| self.active.get(token))
            .map(String::as_str)
    }
}
