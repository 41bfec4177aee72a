// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! LCP broker: language servers (LSP) and debug adapters (DAP) behind
//! synchronous, session-scoped operations.
//!
//! Each upstream tool runs as a child process speaking `Content-Length`
//! framed JSON. The broker correlates responses, turns debug events into
//! bounded waits, and keeps per-session clients, open files and breakpoints
//! alive between calls.

/// Caller-facing operations and the outcome envelope.
pub mod broker;
/// Configuration handling for servers, adapters and timeouts.
pub mod config;
/// Debug adapter client, breakpoints and step orchestration.
pub mod dap;
/// Caller-facing error taxonomy.
pub mod error;
/// Language server client, profiles and open documents.
pub mod lsp;
/// 1-based / 0-based coordinate conversion.
pub mod position;
/// Wire framing and message shapes.
pub mod protocol;
/// Process transport, request correlation and event waits.
pub mod rpc;
/// Session registry and idle eviction.
pub mod session;

pub use broker::{Broker, Operation};
pub use config::Config;
pub use error::{BrokerError, BrokerResult, Outcome};
