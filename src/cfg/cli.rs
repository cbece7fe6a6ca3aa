// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Command-line surfaces for the two binaries (§4.6, §6), parsed with
//! `clap::Parser` derive macros rather than hand-rolled `std::env::args()`
//! scanning.

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};

use crate::codec::{HANDLE_MAX_LEN, HANDLE_MIN_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// `chat-server [port] [--bind HOST] [--log-level LEVEL] [--log-format text|json]`
#[derive(Debug, Parser)]
#[command(name = "chat-server", about = "Relay server for the handle-based chat protocol")]
pub struct ServerArgs {
    /// TCP port to listen on. 0 lets the OS assign one.
    #[arg(default_value_t = 0)]
    pub port: u16,

    #[arg(long, default_value = "127.0.0.1")]
    pub bind: String,

    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// `chat-client <handle> <server-host> <server-port> [clientID] [--log-level LEVEL] [--log-format text|json]`
#[derive(Debug, Parser)]
#[command(name = "chat-client", about = "Interactive client for the handle-based chat protocol")]
pub struct ClientArgs {
    pub handle: String,
    pub host: String,
    pub port: u16,

    /// Decorative identifier, echoed only in the greeting line.
    pub client_id: Option<String>,

    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl ServerArgs {
    pub fn validate(&self) -> Result<()> {
        Ok(())
    }
}

impl ClientArgs {
    /// Rejects an out-of-bounds handle at the CLI boundary, before a
    /// connection is even attempted, mirroring the codec's own invariant.
    pub fn validate(&self) -> Result<()> {
        let len = self.handle.len();
        if !(HANDLE_MIN_LEN..=HANDLE_MAX_LEN).contains(&len) {
            bail!("handle length {len} is out of bounds (1..={HANDLE_MAX_LEN})");
        }
        Ok(())
    }
}
