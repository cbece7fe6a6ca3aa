// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-connection outbound mailbox (§4.4's concurrency constraint on writes).
//!
//! Every connection owns one mpsc channel feeding a single writer task, so
//! concurrent producers (the connection's own replies, broadcast/multicast
//! fan-out from other connections, list-reply sequences) serialize onto the
//! wire in enqueue order without any of them locking the raw socket.
//!
//! Grounded on `client/client.rs`'s per-ITT `sending`/`reciver` channel pair,
//! generalized from "one channel per in-flight request" to "one channel per
//! connection".

use tokio::{
    io::AsyncWrite,
    sync::mpsc::{self, error::SendError},
};
use tracing::warn;

use crate::pdu;

/// A single PDU payload, a contiguous batch of payloads that must reach the
/// wire with nothing else interleaved, or a request to close the connection
/// after any already-queued payloads have been flushed.
enum Item {
    Payload(Vec<u8>),
    Batch(Vec<Vec<u8>>),
    Close,
}

/// The sending half of a connection's mailbox. Cheap to clone; every clone
/// feeds the same writer task.
#[derive(Clone)]
pub struct MailboxSender {
    tx: mpsc::Sender<Item>,
}

impl MailboxSender {
    /// Enqueues one PDU payload (the flag byte plus body, not yet
    /// length-prefixed — `pdu::send` does the framing). A full mailbox
    /// applies backpressure to this one connection only.
    pub async fn send(&self, payload: Vec<u8>) -> Result<(), SendError<()>> {
        self.tx
            .send(Item::Payload(payload))
            .await
            .map_err(|_| SendError(()))
    }

    /// Enqueues several payloads as one contiguous batch: they travel as a
    /// single channel item, so no other producer's payload can land between
    /// them no matter how the writer task is scheduled. This is how a list
    /// reply (§4.4) stays atomic on the wire.
    pub async fn send_batch(&self, payloads: Vec<Vec<u8>>) -> Result<(), SendError<()>> {
        self.tx
            .send(Item::Batch(payloads))
            .await
            .map_err(|_| SendError(()))
    }

    /// Requests the writer task to close the connection once the mailbox is
    /// drained.
    pub async fn close(&self) {
        let _ = self.tx.send(Item::Close).await;
    }
}

/// Spawns the writer task for one connection and returns a handle to feed it.
///
/// The returned `JoinHandle` resolves once the writer task exits (peer
/// closed, I/O error, or an explicit `close()`).
pub fn spawn_writer<W>(mut writer: W, conn_label: String) -> (MailboxSender, tokio::task::JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Item>(64);
    let handle = tokio::spawn(async move {
        'drain: while let Some(item) = rx.recv().await {
            match item {
                Item::Payload(payload) => {
                    if let Err(e) = pdu::send(&mut writer, &payload).await {
                        warn!(conn = %conn_label, error = %e, "write failed, closing mailbox");
                        break;
                    }
                },
                Item::Batch(payloads) => {
                    for payload in payloads {
                        if let Err(e) = pdu::send(&mut writer, &payload).await {
                            warn!(conn = %conn_label, error = %e, "write failed, closing mailbox");
                            break 'drain;
                        }
                    }
                },
                Item::Close => break,
            }
        }
    });
    (MailboxSender { tx }, handle)
}
