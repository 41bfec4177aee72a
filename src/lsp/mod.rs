// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

/// Analysis-protocol client over a server subprocess.
pub mod client;
/// Per-session open file tracking with idle auto-close.
pub mod documents;
/// Built-in and configured server profiles.
pub mod servers;
/// Server state and progress tracking.
pub mod state;
/// Path, URI and language ID helpers.
pub mod uri;

pub use client::AnalysisClient;
pub use documents::{FileState, OpenFiles, SyncAction, TextDocumentSink};
pub use servers::ServerProfile;
pub use state::{ServerState, ServerStatus};
pub use uri::{detect_language_id, path_to_uri, server_language, uri_to_path};
