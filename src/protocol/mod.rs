// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

/// `Content-Length` frame codec shared by both protocols.
pub mod codec;
/// Debug Adapter Protocol message shapes.
pub mod dap;
/// JSON-RPC 2.0 message shapes for the analysis protocol.
pub mod jsonrpc;

pub use codec::FrameCodec;
pub use dap::DapMessage;
pub use jsonrpc::JsonRpcMessage;
