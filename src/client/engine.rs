// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The client-side state machine (§4.5): registration handshake, command
//! grammar, and inbound dispatch multiplexed against standard input.
//!
//! Grounded on `client/client.rs`'s `read_loop`/prompt-driven interactive
//! session, adapted from a request/response-per-ITT model to a free-running
//! chat session multiplexing stdin and the socket with `tokio::select!`.

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader},
    net::TcpStream,
};
use tracing::debug;

use crate::{
    codec::{Handle, Message, MULTICAST_MAX_DESTS},
    error::ChatError,
    pdu,
};

const MAX_PAYLOAD_LEN: usize = 8192;
const MULTICAST_MIN_DESTS_CLIENT: usize = 2;
const PROMPT: &str = "$: ";

/// How a client session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientOutcome {
    /// The server closed the connection after registration, or stdin hit EOF.
    Closed,
    /// Registration was rejected (duplicate or invalid handle).
    RegistrationRejected,
    /// The server closed the connection before replying to registration.
    RegistrationInterrupted,
}

impl ClientOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            ClientOutcome::Closed => 0,
            ClientOutcome::RegistrationRejected | ClientOutcome::RegistrationInterrupted => 1,
        }
    }
}

/// Runs one client session to completion: registers `handle` over `stream`,
/// prints `greeting`, then serves the interactive prompt until the server
/// closes the connection or stdin reaches EOF.
pub async fn run(stream: TcpStream, handle: Handle, greeting: &str) -> Result<ClientOutcome, ChatError> {
    let (mut reader, mut writer) = stream.into_split();

    let register = Message::Register {
        handle: handle.clone(),
    };
    pdu::send(&mut writer, &register.encode()?).await?;

    match pdu::recv(&mut reader, MAX_PAYLOAD_LEN).await? {
        None => return Ok(ClientOutcome::RegistrationInterrupted),
        Some(payload) => match Message::decode(&payload)? {
            Message::RegisterAccepted => {},
            Message::RegisterRejected => return Ok(ClientOutcome::RegistrationRejected),
            other => {
                return Err(ChatError::protocol(
                    Some(other.flag()),
                    "unexpected reply to registration",
                ));
            },
        },
    }

    println!("{greeting}");
    print!("{PROMPT}");
    flush_stdout();

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = stdin.next_line() => {
                match line.map_err(ChatError::ConnectionLost)? {
                    None => return Ok(ClientOutcome::Closed),
                    Some(line) => {
                        handle_command(&line, &handle, &mut reader, &mut writer).await?;
                        print!("{PROMPT}");
                        flush_stdout();
                    },
                }
            },
            inbound = pdu::recv(&mut reader, MAX_PAYLOAD_LEN) => {
                match inbound {
                    Ok(None) | Err(ChatError::ConnectionLost(_)) => {
                        println!("Server Terminated");
                        return Ok(ClientOutcome::Closed);
                    },
                    Ok(Some(payload)) => {
                        handle_inbound(&payload);
                        print!("{PROMPT}");
                        flush_stdout();
                    },
                    Err(e) => {
                        debug!(error = %e, "dropping malformed inbound PDU");
                        print!("{PROMPT}");
                        flush_stdout();
                    },
                }
            },
        }
    }
}

async fn handle_command<R, W>(
    line: &str,
    own_handle: &Handle,
    reader: &mut R,
    writer: &mut W,
) -> Result<(), ChatError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match parse_command(line, own_handle) {
        Ok(None) => {
            print_help();
            Ok(())
        },
        Ok(Some(msg)) => {
            let is_list = matches!(msg, Message::ListRequest);
            pdu::send(writer, &msg.encode()?).await?;
            if is_list {
                assemble_list(reader).await?;
            }
            Ok(())
        },
        Err(ChatError::BadCommand(reason)) => {
            println!("Invalid command: {reason}");
            Ok(())
        },
        Err(e) => Err(e),
    }
}

/// Reads the full flag-11/flag-12×count/flag-13 sequence (§4.4, §4.5) and
/// prints the roster. Blocks on the socket for the duration of the reply,
/// matching the reference client's behavior during list-assembly.
async fn assemble_list<R: AsyncRead + Unpin>(reader: &mut R) -> Result<(), ChatError> {
    let count = match pdu::recv(reader, MAX_PAYLOAD_LEN).await? {
        None => return Err(ChatError::PeerClosed),
        Some(payload) => match Message::decode(&payload)? {
            Message::ListHeader { count } => count,
            other => {
                return Err(ChatError::protocol(
                    Some(other.flag()),
                    "expected list header",
                ));
            },
        },
    };
    println!("Number of clients: {count}");

    for _ in 0..count {
        match pdu::recv(reader, MAX_PAYLOAD_LEN).await? {
            None => return Err(ChatError::PeerClosed),
            Some(payload) => match Message::decode(&payload) {
                Ok(Message::ListEntry { handle }) => println!("{handle}"),
                _ => debug!("skipping non-entry PDU during list assembly"),
            },
        }
    }

    // Terminator: read and discard regardless of its exact shape.
    let _ = pdu::recv(reader, MAX_PAYLOAD_LEN).await?;
    Ok(())
}

fn handle_inbound(payload: &[u8]) {
    match Message::decode(payload) {
        Ok(Message::Broadcast { sender, text }) => print_chat(&sender, &text),
        Ok(Message::Unicast { sender, text, .. }) => print_chat(&sender, &text),
        Ok(Message::Multicast { sender, text, .. }) => print_chat(&sender, &text),
        Ok(Message::UnknownDestination { dest_handle }) => {
            println!("Client with handle {dest_handle} does not exist.");
        },
        Ok(other) => debug!(flag = %other.flag(), "ignoring unexpected inbound message"),
        Err(e) => debug!(error = %e, "dropping malformed inbound PDU"),
    }
}

fn print_chat(sender: &Handle, text: &[u8]) {
    println!("{sender}: {}", String::from_utf8_lossy(text));
}

fn print_help() {
    println!("%M dest text...   send a unicast message");
    println!("%B text...        broadcast to everyone");
    println!("%C k d1..dk text  multicast to k destinations (2..=9)");
    println!("%L                list connected clients");
    println!("%H                show this help");
}

fn flush_stdout() {
    use std::io::Write;
    let _ = std::io::stdout().flush();
}

/// A cursor over one input line that yields whitespace-separated tokens
/// while preserving the exact trailing text (internal spacing included) once
/// the required tokens have been consumed.
struct Tokenizer<'a> {
    rest: &'a str,
}

impl<'a> Tokenizer<'a> {
    fn new(s: &'a str) -> Self {
        Tokenizer { rest: s }
    }

    fn next_token(&mut self) -> Option<&'a str> {
        self.rest = self.rest.trim_start();
        if self.rest.is_empty() {
            return None;
        }
        let end = self.rest.find(char::is_whitespace).unwrap_or(self.rest.len());
        let (token, remainder) = self.rest.split_at(end);
        self.rest = remainder;
        Some(token)
    }

    fn remaining_text(&self) -> &'a str {
        self.rest.trim_start()
    }
}

fn parse_command(line: &str, own_handle: &Handle) -> Result<Option<Message>, ChatError> {
    let mut tokens = Tokenizer::new(line);
    let cmd = tokens
        .next_token()
        .ok_or_else(|| ChatError::BadCommand("empty input".to_string()))?;

    match cmd.to_ascii_uppercase().as_str() {
        "%M" => {
            let dest = tokens
                .next_token()
                .ok_or_else(|| ChatError::BadCommand("%M requires a destination".to_string()))?;
            let dest = Handle::new(dest)
                .map_err(|_| ChatError::BadCommand("invalid destination handle".to_string()))?;
            let text = tokens.remaining_text().as_bytes().to_vec();
            Ok(Some(Message::Unicast {
                sender: own_handle.clone(),
                dest,
                text,
            }))
        },
        "%B" => {
            let text = tokens.remaining_text().as_bytes().to_vec();
            Ok(Some(Message::Broadcast {
                sender: own_handle.clone(),
                text,
            }))
        },
        "%C" => {
            let k_tok = tokens
                .next_token()
                .ok_or_else(|| ChatError::BadCommand("%C requires a destination count".to_string()))?;
            let k: usize = k_tok
                .parse()
                .map_err(|_| ChatError::BadCommand("destination count must be a number".to_string()))?;
            if !(MULTICAST_MIN_DESTS_CLIENT..=MULTICAST_MAX_DESTS).contains(&k) {
                return Err(ChatError::BadCommand(format!(
                    "destination count {k} out of range (2..=9)"
                )));
            }
            let mut dests = Vec::with_capacity(k);
            for _ in 0..k {
                let d = tokens
                    .next_token()
                    .ok_or_else(|| ChatError::BadCommand("too few destinations".to_string()))?;
                let d = Handle::new(d)
                    .map_err(|_| ChatError::BadCommand("invalid destination handle".to_string()))?;
                dests.push(d);
            }
            let text = tokens.remaining_text().as_bytes().to_vec();
            Ok(Some(Message::Multicast {
                sender: own_handle.clone(),
                dests,
                text,
            }))
        },
        "%L" => Ok(Some(Message::ListRequest)),
        "%H" => Ok(None),
        other => Err(ChatError::BadCommand(format!("unrecognized command {other:?}"))),
    }
}
