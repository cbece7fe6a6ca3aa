// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The server-side per-connection state machine and routing rules (§4.4).
//!
//! Grounded on `client/client.rs`'s `read_loop`: a loop that reads one PDU,
//! inspects a header field, and dispatches — here the header field is the
//! flag byte and the dispatch targets are the routing rules of §4.4 instead
//! of per-ITT reply channels.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    codec::{Handle, Message, FLAG_REGISTER},
    error::ChatError,
    pdu,
    registry::{ConnId, ConnIdGenerator, Registry},
    server::mailbox::{spawn_writer, MailboxSender},
};

/// Largest payload the server will accept from a client (generous enough for
/// a 100-byte handle, 9 destinations, and a long message).
const MAX_PAYLOAD_LEN: usize = 8192;

/// State shared by every connection task on one server.
pub struct Shared {
    pub registry: Registry,
    pub mailboxes: DashMap<ConnId, MailboxSender>,
    pub conn_ids: ConnIdGenerator,
}

impl Shared {
    pub fn new() -> Self {
        Shared {
            registry: Registry::new(),
            mailboxes: DashMap::new(),
            conn_ids: ConnIdGenerator::new(),
        }
    }
}

impl Default for Shared {
    fn default() -> Self {
        Self::new()
    }
}

/// The per-connection state machine (§4.4). `Unregistered`/`Registered` map
/// directly onto §4.4; `Closed` is implicit in the task simply returning.
enum ConnState {
    Unregistered,
    Registered(Handle),
}

/// Owns one accepted connection end to end: registration handshake, then the
/// receive/dispatch loop, then registry cleanup on close.
pub struct ConnectionTask {
    shared: Arc<Shared>,
    conn: ConnId,
    state: ConnState,
    mailbox: MailboxSender,
}

impl ConnectionTask {
    /// Runs one connection to completion. `reader`/`writer` are the split
    /// halves of the accepted stream. `shutdown` lets the accept loop (or a
    /// Ctrl-C handler) request an orderly close of this connection without
    /// waiting on it to send anything first.
    pub async fn run<R, W>(shared: Arc<Shared>, reader: R, writer: W, shutdown: CancellationToken)
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let conn = shared.conn_ids.next();
        let span = info_span!("connection", conn = %conn);
        async {
            let (mailbox, writer_handle) = spawn_writer(writer, conn.to_string());
            shared.mailboxes.insert(conn, mailbox.clone());

            let mut task = ConnectionTask {
                shared: Arc::clone(&shared),
                conn,
                state: ConnState::Unregistered,
                mailbox,
            };
            task.serve(reader, shutdown).await;

            shared.mailboxes.remove(&conn);
            if let Some(handle) = shared.registry.remove_by_conn(conn) {
                info!(handle = %handle, "connection closed, handle released");
            }
            task.mailbox.close().await;
            let _ = writer_handle.await;
        }
        .instrument(span)
        .await;
    }

    async fn serve<R: AsyncRead + Unpin>(&mut self, mut reader: R, shutdown: CancellationToken) {
        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("shutdown requested, closing connection");
                    return;
                },
                received = pdu::recv(&mut reader, MAX_PAYLOAD_LEN) => received,
            };

            match received {
                Ok(None) => {
                    debug!("peer closed");
                    return;
                },
                Ok(Some(payload)) => {
                    let attempted_register = matches!(self.state, ConnState::Unregistered)
                        && payload.first() == Some(&FLAG_REGISTER);
                    match Message::decode(&payload) {
                        Ok(msg) => self.dispatch(msg).await,
                        Err(_) if attempted_register => {
                            warn!("rejecting malformed or out-of-bounds registration attempt");
                            self.reject_registration().await;
                            return;
                        },
                        Err(ChatError::ProtocolError { flag, reason }) => {
                            warn!(?flag, reason, "dropping malformed PDU, closing connection");
                            return;
                        },
                        Err(e) => {
                            warn!(error = %e, "decode failed, closing connection");
                            return;
                        },
                    }
                },
                Err(ChatError::BufferTooSmall { got, max }) => {
                    warn!(got, max, "oversized PDU, closing connection");
                    return;
                },
                Err(e) => {
                    debug!(error = %e, "recv failed, closing connection");
                    return;
                },
            }
        }
    }

    async fn dispatch(&mut self, msg: Message) {
        match (&self.state, msg) {
            (ConnState::Unregistered, Message::Register { handle }) => {
                self.handle_register(handle).await;
            },
            (ConnState::Unregistered, _other) => {
                // Conservative per §4.4/§9: ignore, don't close, never relay.
                debug!("ignoring non-registration PDU from unregistered connection");
            },
            (ConnState::Registered(_), Message::Register { .. }) => {
                debug!("ignoring re-registration attempt on already-registered connection");
            },
            (ConnState::Registered(sender), Message::Broadcast { text, .. }) => {
                let sender = sender.clone();
                self.route_broadcast(&sender, &text).await;
            },
            (ConnState::Registered(sender), Message::Unicast { dest, text, .. }) => {
                let sender = sender.clone();
                self.route_unicast(&sender, &dest, &text).await;
            },
            (ConnState::Registered(sender), Message::Multicast { dests, text, .. }) => {
                let sender = sender.clone();
                self.route_multicast(&sender, &dests, &text).await;
            },
            (ConnState::Registered(_), Message::ListRequest) => {
                self.route_list().await;
            },
            (ConnState::Registered(_), _other) => {
                debug!("ignoring server-direction-only flag from a registered connection");
            },
        }
    }

    async fn handle_register(&mut self, handle: Handle) {
        match self.shared.registry.add(handle.as_str(), self.conn) {
            Ok(()) => {
                info!(handle = %handle, "registered");
                self.state = ConnState::Registered(handle);
                self.send_to_self(Message::RegisterAccepted).await;
            },
            Err(_) => {
                info!(handle = %handle, "registration rejected: duplicate handle");
                self.reject_registration().await;
            },
        }
    }

    /// Sends flag 3 and closes the mailbox: the shared tail of both
    /// registration-failure paths (duplicate handle, invalid handle length).
    async fn reject_registration(&mut self) {
        self.send_to_self(Message::RegisterRejected).await;
        self.mailbox.close().await;
    }

    /// Broadcast (§4.4): relay verbatim to every registered conn except the
    /// sender. Re-encodes the message once and fans out the same bytes.
    async fn route_broadcast(&self, sender: &Handle, text: &[u8]) {
        let msg = Message::Broadcast {
            sender: sender.clone(),
            text: text.to_vec(),
        };
        let Ok(payload) = msg.encode() else {
            warn!("failed to re-encode broadcast payload");
            return;
        };
        for (_, conn) in self.shared.registry.snapshot() {
            if conn == self.conn {
                continue;
            }
            self.deliver(conn, payload.clone()).await;
        }
    }

    /// Unicast (§4.4): forward verbatim to the one destination, or emit a
    /// flag-7 error to the sender if it doesn't resolve.
    async fn route_unicast(&self, sender: &Handle, dest: &Handle, text: &[u8]) {
        let msg = Message::Unicast {
            sender: sender.clone(),
            dest: dest.clone(),
            text: text.to_vec(),
        };
        let Ok(payload) = msg.encode() else {
            warn!("failed to re-encode unicast payload");
            return;
        };
        match self.shared.registry.lookup_by_handle(dest.as_str()) {
            Some(dest_conn) => self.deliver(dest_conn, payload).await,
            None => self.send_unknown_destination(dest.clone()).await,
        }
    }

    /// Multicast (§4.4): resolve each destination independently, in request
    /// order, forwarding the *original* unmodified payload to every resolved
    /// recipient and one flag-7 per unresolved destination, also in order.
    async fn route_multicast(&self, sender: &Handle, dests: &[Handle], text: &[u8]) {
        let msg = Message::Multicast {
            sender: sender.clone(),
            dests: dests.to_vec(),
            text: text.to_vec(),
        };
        let Ok(payload) = msg.encode() else {
            warn!("failed to re-encode multicast payload");
            return;
        };
        for dest in dests {
            match self.shared.registry.lookup_by_handle(dest.as_str()) {
                Some(dest_conn) => self.deliver(dest_conn, payload.clone()).await,
                None => self.send_unknown_destination(dest.clone()).await,
            }
        }
    }

    /// List (§4.4): an atomic snapshot, sent as one contiguous batch so no
    /// other writer can interleave a packet into the middle of the sequence.
    async fn route_list(&self) {
        let entries = self.shared.registry.snapshot();
        let mut batch = Vec::with_capacity(entries.len() + 2);
        let header = Message::ListHeader {
            count: entries.len() as u32,
        };
        batch.push(header.encode().expect("list header always encodes"));
        for (handle, _) in entries {
            let Ok(handle) = Handle::new(handle) else {
                continue;
            };
            let entry = Message::ListEntry { handle };
            batch.push(entry.encode().expect("list entry always encodes"));
        }
        batch.push(
            Message::ListTerminator
                .encode()
                .expect("list terminator always encodes"),
        );
        if let Some(mailbox) = self.shared.mailboxes.get(&self.conn) {
            if mailbox.send_batch(batch).await.is_err() {
                debug!("mailbox closed before list reply could be sent");
            }
        }
    }

    async fn send_unknown_destination(&self, dest_handle: Handle) {
        let msg = Message::UnknownDestination { dest_handle };
        self.send_to_self(msg).await;
    }

    async fn send_to_self(&self, msg: Message) {
        let Ok(payload) = msg.encode() else {
            warn!("failed to encode outbound message");
            return;
        };
        self.deliver(self.conn, payload).await;
    }

    async fn deliver(&self, conn: ConnId, payload: Vec<u8>) {
        let Some(mailbox) = self.shared.mailboxes.get(&conn) else {
            return;
        };
        // Send failures to one recipient never abort routing to the others
        // (§4.4/§7): the mailbox is already severed by the time the writer
        // task notices, so a failed send here just means that recipient is
        // on its way out.
        if mailbox.send(payload).await.is_err() {
            debug!(conn = %conn, "dropping message, recipient mailbox closed");
        }
    }
}
