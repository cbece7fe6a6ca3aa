// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The flag-tagged message grammar (§3, §4.2): pure, stateless encode/decode
//! between PDU payload bytes and a tagged [`Message`].
//!
//! Decode is total: any malformed payload yields [`ChatError::ProtocolError`]
//! with the offending flag attached. Encode is infallible once the caller's
//! inputs satisfy the invariants checked by [`Handle::new`] and
//! [`Message::encode`].

use crate::error::{ChatError, Flag};

pub const FLAG_REGISTER: Flag = 1;
pub const FLAG_REGISTER_ACCEPTED: Flag = 2;
pub const FLAG_REGISTER_REJECTED: Flag = 3;
pub const FLAG_BROADCAST: Flag = 4;
pub const FLAG_UNICAST: Flag = 5;
pub const FLAG_MULTICAST: Flag = 6;
pub const FLAG_UNKNOWN_DESTINATION: Flag = 7;
pub const FLAG_LIST_REQUEST: Flag = 10;
pub const FLAG_LIST_HEADER: Flag = 11;
pub const FLAG_LIST_ENTRY: Flag = 12;
pub const FLAG_LIST_TERMINATOR: Flag = 13;

/// Minimum and maximum byte length of a handle (§3).
pub const HANDLE_MIN_LEN: usize = 1;
pub const HANDLE_MAX_LEN: usize = 100;

/// Minimum and maximum destination count for a multicast (§3, client side).
pub const MULTICAST_MIN_DESTS: usize = 1;
pub const MULTICAST_MAX_DESTS: usize = 9;

/// A validated handle: nonempty, ≤100 bytes, no embedded NUL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(String);

impl Handle {
    pub fn new(raw: impl Into<String>) -> Result<Self, ChatError> {
        let raw = raw.into();
        let len = raw.len();
        if !(HANDLE_MIN_LEN..=HANDLE_MAX_LEN).contains(&len) {
            return Err(ChatError::InvalidHandle(len));
        }
        if raw.as_bytes().contains(&0) {
            return Err(ChatError::protocol(None, "handle contains an embedded NUL"));
        }
        Ok(Handle(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The 11 flag-tagged message shapes from §3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Flag 1, C→S: register a handle.
    Register { handle: Handle },
    /// Flag 2, S→C: registration accepted.
    RegisterAccepted,
    /// Flag 3, S→C: registration rejected (duplicate or invalid).
    RegisterRejected,
    /// Flag 4, C↔S: broadcast text from `sender` to everyone else.
    Broadcast { sender: Handle, text: Vec<u8> },
    /// Flag 5, C↔S: unicast text from `sender` to one `dest`.
    Unicast {
        sender: Handle,
        dest: Handle,
        text: Vec<u8>,
    },
    /// Flag 6, C↔S: multicast text from `sender` to 1..=255 destinations (the
    /// client enforces 2..=9; the server forwards whatever shape it parses).
    Multicast {
        sender: Handle,
        dests: Vec<Handle>,
        text: Vec<u8>,
    },
    /// Flag 7, S→C: `dest_handle` does not resolve to a live connection.
    UnknownDestination { dest_handle: Handle },
    /// Flag 10, C→S: request the current roster.
    ListRequest,
    /// Flag 11, S→C: roster header carrying the entry count.
    ListHeader { count: u32 },
    /// Flag 12, S→C: one roster entry.
    ListEntry { handle: Handle },
    /// Flag 13, S→C: roster terminator.
    ListTerminator,
}

impl Message {
    /// The flag byte this message encodes as.
    pub fn flag(&self) -> Flag {
        match self {
            Message::Register { .. } => FLAG_REGISTER,
            Message::RegisterAccepted => FLAG_REGISTER_ACCEPTED,
            Message::RegisterRejected => FLAG_REGISTER_REJECTED,
            Message::Broadcast { .. } => FLAG_BROADCAST,
            Message::Unicast { .. } => FLAG_UNICAST,
            Message::Multicast { .. } => FLAG_MULTICAST,
            Message::UnknownDestination { .. } => FLAG_UNKNOWN_DESTINATION,
            Message::ListRequest => FLAG_LIST_REQUEST,
            Message::ListHeader { .. } => FLAG_LIST_HEADER,
            Message::ListEntry { .. } => FLAG_LIST_ENTRY,
            Message::ListTerminator => FLAG_LIST_TERMINATOR,
        }
    }

    /// Encodes this message into a PDU payload (flag byte + body).
    pub fn encode(&self) -> Result<Vec<u8>, ChatError> {
        let mut buf = vec![self.flag()];
        match self {
            Message::Register { handle } => push_handle(&mut buf, handle)?,
            Message::RegisterAccepted
            | Message::RegisterRejected
            | Message::ListRequest
            | Message::ListTerminator => {},
            Message::Broadcast { sender, text } => {
                push_handle(&mut buf, sender)?;
                push_text(&mut buf, text)?;
            },
            Message::Unicast { sender, dest, text } => {
                push_handle(&mut buf, sender)?;
                buf.push(1);
                push_handle(&mut buf, dest)?;
                push_text(&mut buf, text)?;
            },
            Message::Multicast {
                sender,
                dests,
                text,
            } => {
                if dests.is_empty() || dests.len() > u8::MAX as usize {
                    return Err(ChatError::protocol(
                        Some(FLAG_MULTICAST),
                        format!("destination count {} out of range", dests.len()),
                    ));
                }
                push_handle(&mut buf, sender)?;
                buf.push(dests.len() as u8);
                for dest in dests {
                    push_handle(&mut buf, dest)?;
                }
                push_text(&mut buf, text)?;
            },
            Message::UnknownDestination { dest_handle } => {
                push_handle(&mut buf, dest_handle)?
            },
            Message::ListHeader { count } => buf.extend_from_slice(&count.to_be_bytes()),
            Message::ListEntry { handle } => push_handle(&mut buf, handle)?,
        }
        Ok(buf)
    }

    /// Decodes a PDU payload into a [`Message`]. Total: every malformed shape
    /// yields [`ChatError::ProtocolError`] carrying the flag byte that was read
    /// (if any).
    pub fn decode(payload: &[u8]) -> Result<Message, ChatError> {
        let mut cursor = Cursor::new(payload);
        let flag = cursor.take_u8(None)?;

        let msg = match flag {
            FLAG_REGISTER => Message::Register {
                handle: cursor.take_handle(flag)?,
            },
            FLAG_REGISTER_ACCEPTED => Message::RegisterAccepted,
            FLAG_REGISTER_REJECTED => Message::RegisterRejected,
            FLAG_BROADCAST => {
                let sender = cursor.take_handle(flag)?;
                let text = cursor.take_text(flag)?;
                Message::Broadcast { sender, text }
            },
            FLAG_UNICAST => {
                let sender = cursor.take_handle(flag)?;
                let n = cursor.take_u8(Some(flag))?;
                if n != 1 {
                    return Err(ChatError::protocol(
                        Some(flag),
                        format!("unicast destination count must be 1, got {n}"),
                    ));
                }
                let dest = cursor.take_handle(flag)?;
                let text = cursor.take_text(flag)?;
                Message::Unicast { sender, dest, text }
            },
            FLAG_MULTICAST => {
                let sender = cursor.take_handle(flag)?;
                let n = cursor.take_u8(Some(flag))?;
                if n == 0 {
                    return Err(ChatError::protocol(
                        Some(flag),
                        "multicast destination count must be >= 1",
                    ));
                }
                let mut dests = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    dests.push(cursor.take_handle(flag)?);
                }
                let text = cursor.take_text(flag)?;
                Message::Multicast {
                    sender,
                    dests,
                    text,
                }
            },
            FLAG_UNKNOWN_DESTINATION => Message::UnknownDestination {
                dest_handle: cursor.take_handle(flag)?,
            },
            FLAG_LIST_REQUEST => Message::ListRequest,
            FLAG_LIST_HEADER => Message::ListHeader {
                count: cursor.take_u32(flag)?,
            },
            FLAG_LIST_ENTRY => Message::ListEntry {
                handle: cursor.take_handle(flag)?,
            },
            FLAG_LIST_TERMINATOR => Message::ListTerminator,
            other => {
                return Err(ChatError::protocol(
                    Some(other),
                    format!("unrecognized flag {other}"),
                ));
            },
        };

        cursor.expect_exhausted(flag)?;
        Ok(msg)
    }
}

fn push_handle(buf: &mut Vec<u8>, handle: &Handle) -> Result<(), ChatError> {
    let bytes = handle.as_str().as_bytes();
    if bytes.len() > HANDLE_MAX_LEN {
        return Err(ChatError::InvalidHandle(bytes.len()));
    }
    buf.push(bytes.len() as u8);
    buf.extend_from_slice(bytes);
    Ok(())
}

fn push_text(buf: &mut Vec<u8>, text: &[u8]) -> Result<(), ChatError> {
    if text.contains(&0) {
        return Err(ChatError::protocol(None, "text must not contain an embedded NUL"));
    }
    buf.extend_from_slice(text);
    buf.push(0);
    Ok(())
}

/// A cursor over a payload being decoded, tracking the offset so every
/// failure can report how far parsing got.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    fn take_u8(&mut self, flag: Option<Flag>) -> Result<u8, ChatError> {
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or_else(|| ChatError::protocol(flag, "payload ended early"))?;
        self.pos += 1;
        Ok(byte)
    }

    fn take_u32(&mut self, flag: Flag) -> Result<u32, ChatError> {
        let slice = self.take_slice(flag, 4)?;
        let arr: [u8; 4] = slice
            .try_into()
            .map_err(|_| ChatError::protocol(Some(flag), "truncated count field"))?;
        Ok(u32::from_be_bytes(arr))
    }

    fn take_slice(&mut self, flag: Flag, len: usize) -> Result<&'a [u8], ChatError> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or_else(|| ChatError::protocol(Some(flag), "length overflow"))?;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| ChatError::protocol(Some(flag), "declared length exceeds payload"))?;
        self.pos = end;
        Ok(slice)
    }

    fn take_handle(&mut self, flag: Flag) -> Result<Handle, ChatError> {
        let hlen = self.take_u8(Some(flag))? as usize;
        let bytes = self.take_slice(flag, hlen)?;
        let text = std::str::from_utf8(bytes)
            .map_err(|_| ChatError::protocol(Some(flag), "handle is not valid UTF-8"))?;
        Handle::new(text)
    }

    /// Reads the NUL-terminated `text` field: everything from the cursor to
    /// the first NUL byte, which must exist at or before the payload end.
    fn take_text(&mut self, flag: Flag) -> Result<Vec<u8>, ChatError> {
        let rest = &self.bytes[self.pos..];
        let nul_at = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| ChatError::protocol(Some(flag), "text field missing NUL terminator"))?;
        let text = rest[..nul_at].to_vec();
        self.pos += nul_at + 1;
        Ok(text)
    }

    fn expect_exhausted(&self, flag: Flag) -> Result<(), ChatError> {
        if self.pos != self.bytes.len() {
            return Err(ChatError::protocol(
                Some(flag),
                format!("{} trailing bytes after payload", self.bytes.len() - self.pos),
            ));
        }
        Ok(())
    }
}
