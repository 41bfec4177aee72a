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

//! JSON-RPC 2.0 envelopes used by the analysis protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC error code for an unsupported method.
pub const METHOD_NOT_FOUND: i64 = -32601;

const fn default_null() -> Value {
    Value::Null
}

fn version() -> String {
    "2.0".to_string()
}

/// Any message on an analysis-protocol stream.
///
/// Variant order matters for untagged decoding: a request carries both `id`
/// and `method`, a notification only `method`, a response only `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// Request expecting a response.
    Request(RequestMessage),
    /// Fire-and-forget notification.
    Notification(NotificationMessage),
    /// Response to an earlier request.
    Response(ResponseMessage),
}

/// A JSON-RPC request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMessage {
    /// Protocol version, always `"2.0"`.
    pub jsonrpc: String,
    /// Correlation id.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default = "default_null")]
    pub params: Value,
}

/// A JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    /// Protocol version, always `"2.0"`.
    pub jsonrpc: String,
    /// Id of the request being answered; `null` for unparseable requests.
    pub id: Option<RequestId>,
    /// Result on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

/// A JSON-RPC notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    /// Protocol version, always `"2.0"`.
    pub jsonrpc: String,
    /// Notification name.
    pub method: String,
    /// Notification parameters.
    #[serde(default = "default_null")]
    pub params: Value,
}

/// Request ids are numbers when we allocate them, but servers may use strings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id.
    Number(i64),
    /// String id.
    String(String),
}

/// Error object of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    /// Error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl RequestMessage {
    /// Builds a request with the given id.
    #[must_use]
    pub fn new(id: i64, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: version(),
            id: RequestId::Number(id),
            method: method.to_string(),
            params,
        }
    }
}

impl NotificationMessage {
    /// Builds a notification.
    #[must_use]
    pub fn new(method: &str, params: Value) -> Self {
        Self {
            jsonrpc: version(),
            method: method.to_string(),
            params,
        }
    }
}

impl ResponseMessage {
    /// Builds a successful response.
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: version(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// Builds an error response for a server-initiated request we do not handle.
    #[must_use]
    pub fn method_not_found(id: RequestId, method: &str) -> Self {
        Self {
            jsonrpc: version(),
            id: Some(id),
            result: None,
            error: Some(ResponseError {
                code: METHOD_NOT_FOUND,
                message: format!("Method '{method}' not supported by client"),
                data: None,
            }),
        }
    }
}
