//! Exercises the server engine's dispatch and routing rules over in-memory
//! `tokio::io::duplex` pipes, without binding a real socket.

use std::sync::Arc;

use chat_protocol_rs::{
    codec::{Handle, Message},
    pdu,
    server::{ConnectionTask, Shared},
};
use tokio::io::{duplex, DuplexStream};
use tokio_util::sync::CancellationToken;

const MAX: usize = 8192;

async fn connect(shared: &Arc<Shared>) -> DuplexStream {
    let (server_stream, client_stream) = duplex(MAX);
    let (server_r, server_w) = tokio::io::split(server_stream);
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        ConnectionTask::run(shared, server_r, server_w, CancellationToken::new()).await;
    });
    client_stream
}

async fn register(conn: &mut DuplexStream, handle: &str) -> Message {
    let msg = Message::Register {
        handle: Handle::new(handle).expect("valid handle in test fixture"),
    };
    pdu::send(conn, &msg.encode().expect("encode failed"))
        .await
        .expect("send failed");
    recv(conn).await
}

async fn recv(conn: &mut DuplexStream) -> Message {
    let payload = pdu::recv(conn, MAX)
        .await
        .expect("recv failed")
        .expect("peer closed unexpectedly");
    Message::decode(&payload).expect("decode failed")
}

async fn send(conn: &mut DuplexStream, msg: Message) {
    pdu::send(conn, &msg.encode().expect("encode failed"))
        .await
        .expect("send failed");
}

#[tokio::test]
async fn registration_accepted_then_duplicate_rejected() {
    let shared = Arc::new(Shared::new());
    let mut alice = connect(&shared).await;
    assert_eq!(register(&mut alice, "alice").await, Message::RegisterAccepted);

    let mut bob = connect(&shared).await;
    assert_eq!(register(&mut bob, "alice").await, Message::RegisterRejected);
}

#[tokio::test]
async fn broadcast_reaches_every_other_registered_connection() {
    let shared = Arc::new(Shared::new());
    let mut alice = connect(&shared).await;
    register(&mut alice, "alice").await;
    let mut bob = connect(&shared).await;
    register(&mut bob, "bob").await;

    send(
        &mut alice,
        Message::Broadcast {
            sender: Handle::new("alice").expect("valid handle"),
            text: b"hi all".to_vec(),
        },
    )
    .await;

    let got = recv(&mut bob).await;
    assert_eq!(
        got,
        Message::Broadcast {
            sender: Handle::new("alice").expect("valid handle"),
            text: b"hi all".to_vec(),
        }
    );
}

#[tokio::test]
async fn unicast_to_unknown_destination_yields_flag_seven() {
    let shared = Arc::new(Shared::new());
    let mut alice = connect(&shared).await;
    register(&mut alice, "alice").await;

    send(
        &mut alice,
        Message::Unicast {
            sender: Handle::new("alice").expect("valid handle"),
            dest: Handle::new("carol").expect("valid handle"),
            text: b"hello".to_vec(),
        },
    )
    .await;

    let got = recv(&mut alice).await;
    assert_eq!(
        got,
        Message::UnknownDestination {
            dest_handle: Handle::new("carol").expect("valid handle")
        }
    );
}

#[tokio::test]
async fn roster_listing_preserves_registration_order() {
    let shared = Arc::new(Shared::new());
    let mut alice = connect(&shared).await;
    register(&mut alice, "alice").await;
    let mut bob = connect(&shared).await;
    register(&mut bob, "bob").await;
    let mut carol = connect(&shared).await;
    register(&mut carol, "carol").await;

    send(&mut alice, Message::ListRequest).await;

    assert_eq!(recv(&mut alice).await, Message::ListHeader { count: 3 });
    assert_eq!(
        recv(&mut alice).await,
        Message::ListEntry {
            handle: Handle::new("alice").expect("valid handle")
        }
    );
    assert_eq!(
        recv(&mut alice).await,
        Message::ListEntry {
            handle: Handle::new("bob").expect("valid handle")
        }
    );
    assert_eq!(
        recv(&mut alice).await,
        Message::ListEntry {
            handle: Handle::new("carol").expect("valid handle")
        }
    );
    assert_eq!(recv(&mut alice).await, Message::ListTerminator);
}

#[tokio::test]
async fn non_registration_pdu_from_unregistered_connection_is_ignored_not_closed() {
    let shared = Arc::new(Shared::new());
    let mut conn = connect(&shared).await;

    send(
        &mut conn,
        Message::Broadcast {
            sender: Handle::new("ghost").expect("valid handle"),
            text: b"not allowed yet".to_vec(),
        },
    )
    .await;

    // The connection must still be alive and able to register afterward.
    assert_eq!(register(&mut conn, "alice").await, Message::RegisterAccepted);
}

#[tokio::test]
async fn registration_with_zero_length_handle_sends_flag_three() {
    use chat_protocol_rs::codec::FLAG_REGISTER;

    let shared = Arc::new(Shared::new());
    let mut conn = connect(&shared).await;

    // Hand-craft a flag-1 payload with a declared handle length of 0, which
    // `Handle::new` rejects; `Message::Register` can't construct this shape
    // directly since its constructor validates the handle first.
    pdu::send(&mut conn, &[FLAG_REGISTER, 0])
        .await
        .expect("send failed");

    assert_eq!(recv(&mut conn).await, Message::RegisterRejected);
}
