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

//! `Content-Length` framing shared by the analysis and debug protocols.

use bytes::{Buf, Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use tracing::{error, trace};

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Largest body a peer may announce. Anything bigger is treated as garbage.
const MAX_CONTENT_LENGTH: usize = 64 * 1024 * 1024;

/// Result of scanning the buffer for one frame.
enum Scan {
    /// Not enough data buffered yet.
    Incomplete,
    /// A complete body was extracted.
    Frame(Bytes),
    /// A header block without a usable `Content-Length` was discarded.
    /// Lengths over [`MAX_CONTENT_LENGTH`] count as unusable.
    Malformed(String),
}

/// Incremental decoder and stateless encoder for one message shape.
///
/// `M` is the protocol's message type; the codec never looks inside it.
pub struct FrameCodec<M> {
    buffer: BytesMut,
    _message: PhantomData<fn() -> M>,
}

impl<M> Default for FrameCodec<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> FrameCodec<M> {
    /// Creates a codec with an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            _message: PhantomData,
        }
    }

    /// Number of bytes waiting for the rest of their frame.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl<M: DeserializeOwned> FrameCodec<M> {
    /// Appends a chunk and returns every message completed by it, in order.
    ///
    /// Bodies that are not valid JSON for `M` are logged and dropped; the
    /// stream continues with the next frame.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<M> {
        self.buffer.extend_from_slice(chunk);

        let mut messages = Vec::new();
        loop {
            match self.scan() {
                Scan::Incomplete => break,
                Scan::Malformed(headers) => {
                    error!("Discarding frame with unusable headers: {:?}", headers);
                }
                Scan::Frame(body) => {
                    trace!("Frame body: {}", String::from_utf8_lossy(&body));
                    match serde_json::from_slice::<M>(&body) {
                        Ok(message) => messages.push(message),
                        Err(e) => error!("Dropping undecodable message: {}", e),
                    }
                }
            }
        }
        messages
    }

    fn scan(&mut self) -> Scan {
        let Some(header_len) = self
            .buffer
            .windows(HEADER_TERMINATOR.len())
            .position(|w| w == HEADER_TERMINATOR)
        else {
            return Scan::Incomplete;
        };

        let headers = String::from_utf8_lossy(&self.buffer[..header_len]).into_owned();
        let body_start = header_len + HEADER_TERMINATOR.len();
        let Some((content_length, frame_end)) = content_length(&headers)
            .filter(|&length| length <= MAX_CONTENT_LENGTH)
            .and_then(|length| Some((length, body_start.checked_add(length)?)))
        else {
            self.buffer.advance(body_start);
            return Scan::Malformed(headers);
        };

        if self.buffer.len() < frame_end {
            return Scan::Incomplete;
        }

        self.buffer.advance(body_start);
        Scan::Frame(self.buffer.split_to(content_length).freeze())
    }
}

impl<M: Serialize> FrameCodec<M> {
    /// Serializes a message and prepends its `Content-Length` header.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be serialized to JSON.
    pub fn encode(message: &M) -> serde_json::Result<Bytes> {
        let body = serde_json::to_vec(message)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        let mut framed = BytesMut::with_capacity(header.len() + body.len());
        framed.extend_from_slice(header.as_bytes());
        framed.extend_from_slice(&body);
        Ok(framed.freeze())
    }
}

/// Extracts the `Content-Length` value from a header block.
fn content_length(headers: &str) -> Option<usize> {
    headers.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}
