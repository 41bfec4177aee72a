// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

/// Transport and event error types.
pub mod error;
/// One-shot named event waits with timeouts.
pub mod event_bus;
/// Request id allocation and response correlation.
pub mod multiplexer;
/// Child process ownership and framed stdio I/O.
pub mod process;

pub use error::{EventError, RpcError};
pub use event_bus::{EventBus, EventWait};
pub use multiplexer::{Multiplexer, PendingCall};
pub use process::{LaunchSpec, MessageSink, Outbound, ProcessConnection};
