// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The accept loop (§4.4, §5): binds one listening socket and spawns one
//! [`ConnectionTask`] per accepted connection, shutting down cleanly on
//! Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::server::engine::{ConnectionTask, Shared};

/// Runs the accept loop on `listener` until `shutdown` is cancelled (by the
/// caller, typically in response to Ctrl-C). Returns once every in-flight
/// connection task has been spawned off; it does not wait for them to finish.
pub async fn run(listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
    let shared = Arc::new(Shared::new());
    let local_addr = listener
        .local_addr()
        .context("reading listener local address")?;
    info!(addr = %local_addr, "chat server listening");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("shutdown requested, no longer accepting connections");
                return Ok(());
            },
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    },
                };
                info!(%peer, "accepted connection");
                let shared = Arc::clone(&shared);
                let conn_shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let (reader, writer) = stream.into_split();
                    ConnectionTask::run(shared, reader, writer, conn_shutdown).await;
                });
            },
        }
    }
}

/// Convenience wrapper for the `chat-server` binary: binds `addr`, then runs
/// the accept loop until Ctrl-C is received.
pub async fn run_until_ctrl_c(addr: std::net::SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding listener on {addr}"))?;
    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown_signal.cancel();
        }
    });
    run(listener, shutdown).await
}
