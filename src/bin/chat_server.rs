// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;

use chat_protocol_rs::{cfg, server};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cfg::ServerArgs::parse();
    args.validate()?;
    cfg::init_tracing(&args.log_level, args.log_format)?;

    let addr = format!("{}:{}", args.bind, args.port)
        .parse()
        .with_context(|| format!("parsing bind address {}:{}", args.bind, args.port))?;

    if let Err(e) = server::run_until_ctrl_c(addr).await {
        error!(error = %e, "chat-server exited with an error");
        return Err(e);
    }
    Ok(())
}
