// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The typed error surface for the protocol engine (§7).
//!
//! Internal library code returns `Result<T, ChatError>`; binaries and tests
//! compose these with `anyhow::Result` via `.context(...)` at the boundary.

use thiserror::Error;

/// The single flag byte that opens every PDU payload.
pub type Flag = u8;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Malformed PDU or payload: declared lengths don't fit, a `text` field
    /// never terminates in NUL, or the flag byte doesn't match a known shape.
    #[error("protocol error on flag {flag:?}: {reason}")]
    ProtocolError {
        flag: Option<Flag>,
        reason: String,
    },

    /// The peer performed an orderly close (EOF with no partial record).
    #[error("peer closed the connection")]
    PeerClosed,

    /// The transport reported an I/O error other than a clean close.
    #[error("connection lost: {0}")]
    ConnectionLost(#[from] std::io::Error),

    /// `recv`'s declared payload length exceeds the caller's buffer limit.
    #[error("payload of {got} bytes exceeds max {max}")]
    BufferTooSmall { got: usize, max: usize },

    /// Registration requested a handle already held by another connection.
    #[error("handle {0:?} is already registered")]
    DuplicateHandle(String),

    /// Registration requested a handle of length 0 or >100 bytes.
    #[error("handle length {0} is out of bounds (1..=100)")]
    InvalidHandle(usize),

    /// A unicast/multicast destination does not resolve to a live connection.
    #[error("unknown destination handle {0:?}")]
    UnknownDestination(String),

    /// Client-side user input didn't match the command grammar.
    #[error("invalid command: {0}")]
    BadCommand(String),
}

impl ChatError {
    pub fn protocol(flag: Option<Flag>, reason: impl Into<String>) -> Self {
        ChatError::ProtocolError {
            flag,
            reason: reason.into(),
        }
    }
}
