// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

/// Built-in and configured debug adapter profiles.
pub mod adapters;
/// Breakpoint table and sync payloads.
pub mod breakpoints;
/// Debug-protocol client over an adapter subprocess.
pub mod client;
/// Step-and-inspect orchestration.
pub mod orchestrator;

pub use adapters::{AdapterProfile, LaunchTarget};
pub use breakpoints::{Breakpoint, BreakpointId, BreakpointManager, BreakpointOptions};
pub use client::{DebugClient, Halt, SharedBreakpoints};
pub use orchestrator::{DebugState, DebugStatus, FrameInfo, StepAction, StepTimeouts, VariableInfo};
