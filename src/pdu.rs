// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! PDU framing (§4.1): a 2-byte big-endian total-length header (the length
//! includes the header itself) followed by an opaque payload.
//!
//! `send`/`recv` operate on any split async stream half, so the codec and
//! engine layers above can be exercised against an in-memory
//! `tokio::io::duplex` pipe in unit tests without a real socket.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ChatError;

/// Length of the wire header in bytes.
pub const HEADER_LEN: usize = 2;

/// Largest payload a PDU can carry: `u16::MAX` total length minus the header.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize - HEADER_LEN;

/// Sends one PDU carrying `payload` as a single coalesced buffer: the 2-byte
/// length header followed immediately by the payload bytes.
///
/// `payload` must be nonempty (a PDU always opens with a flag byte) and no
/// larger than [`MAX_PAYLOAD_LEN`].
pub async fn send<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), ChatError> {
    assert!(!payload.is_empty(), "PDU payload must carry at least a flag byte");
    assert!(payload.len() <= MAX_PAYLOAD_LEN, "PDU payload too large to frame");

    let total_len = (payload.len() + HEADER_LEN) as u16;
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&total_len.to_be_bytes());
    frame.extend_from_slice(payload);

    writer.write_all(&frame).await?;
    Ok(())
}

/// Receives one complete PDU payload, bounded by `max_payload` bytes.
///
/// Returns `Ok(None)` on an orderly peer close observed before any header
/// byte arrives. A close mid-record (header or payload partially read) is
/// reported as [`ChatError::ProtocolError`], per the "partial-read is an
/// error" rule (§4.1).
pub async fn recv<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_payload: usize,
) -> Result<Option<Vec<u8>>, ChatError> {
    let mut header = [0u8; HEADER_LEN];
    match read_exact_or_eof(reader, &mut header).await? {
        ReadOutcome::Eof => return Ok(None),
        ReadOutcome::Partial => {
            return Err(ChatError::protocol(None, "connection closed mid-header"));
        },
        ReadOutcome::Full => {},
    }

    let total_len = u16::from_be_bytes(header) as usize;
    let payload_len = total_len
        .checked_sub(HEADER_LEN)
        .ok_or_else(|| ChatError::protocol(None, "declared length shorter than header"))?;

    if payload_len == 0 {
        return Err(ChatError::protocol(None, "payload must carry a flag byte"));
    }
    if payload_len > max_payload {
        return Err(ChatError::BufferTooSmall {
            got: payload_len,
            max: max_payload,
        });
    }

    let mut payload = vec![0u8; payload_len];
    match read_exact_or_eof(reader, &mut payload).await? {
        ReadOutcome::Eof => {
            Err(ChatError::protocol(None, "connection closed mid-payload"))
        },
        ReadOutcome::Partial => {
            Err(ChatError::protocol(None, "connection closed mid-payload"))
        },
        ReadOutcome::Full => Ok(Some(payload)),
    }
}

enum ReadOutcome {
    /// Zero bytes were read before any byte of `buf` arrived.
    Eof,
    /// Some but not all of `buf` was filled before the peer closed.
    Partial,
    /// `buf` was filled completely.
    Full,
}

async fn read_exact_or_eof<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<ReadOutcome, ChatError> {
    let mut filled = 0usize;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Ok(if filled == 0 {
                ReadOutcome::Eof
            } else {
                ReadOutcome::Partial
            });
        }
        filled += n;
    }
    Ok(ReadOutcome::Full)
}
