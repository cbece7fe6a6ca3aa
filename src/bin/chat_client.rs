// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpStream;
use tracing::error;

use chat_protocol_rs::{
    cfg,
    client::{self, ClientOutcome},
    codec::Handle,
};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = cfg::ClientArgs::parse();
    args.validate()?;
    cfg::init_tracing(&args.log_level, args.log_format)?;

    let handle = Handle::new(args.handle.clone()).context("invalid handle")?;
    let stream = TcpStream::connect((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("connecting to {}:{}", args.host, args.port))?;

    let greeting = match &args.client_id {
        Some(id) => format!(
            "Connected to Server {} on Port {} as Client {} (ID {id})",
            args.host, args.port, handle
        ),
        None => format!(
            "Connected to Server {} on Port {} as Client {}",
            args.host, args.port, handle
        ),
    };

    match client::run(stream, handle, &greeting).await {
        Ok(ClientOutcome::Closed) => Ok(ExitCode::from(0)),
        Ok(ClientOutcome::RegistrationRejected) => {
            println!("handle in use");
            Ok(ExitCode::from(1))
        },
        Ok(ClientOutcome::RegistrationInterrupted) => {
            println!("Server closed the connection before registration completed");
            Ok(ExitCode::from(1))
        },
        Err(e) => {
            error!(error = %e, "chat-client session ended with an error");
            println!("Server Terminated");
            Ok(ExitCode::from(0))
        },
    }
}
