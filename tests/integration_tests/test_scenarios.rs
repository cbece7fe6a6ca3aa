//! End-to-end scenarios driven over real `TcpStream` connections against a
//! real `TcpListener`-bound server, one per scenario in the design docs.

use chat_protocol_rs::codec::{Handle, Message};
use serial_test::serial;

use super::common::{recv, register, send, TestServer};

#[tokio::test]
#[serial]
async fn registration_race_duplicate_handle_is_rejected() {
    let server = TestServer::start().await;

    let mut a = server.connect().await;
    assert_eq!(register(&mut a, "alice").await, Message::RegisterAccepted);

    let mut b = server.connect().await;
    assert_eq!(register(&mut b, "alice").await, Message::RegisterRejected);

    server.shutdown().await;
}

#[tokio::test]
#[serial]
async fn unicast_delivery_carries_sender_and_text() {
    let server = TestServer::start().await;

    let mut a = server.connect().await;
    register(&mut a, "alice").await;
    let mut b = server.connect().await;
    register(&mut b, "bob").await;

    send(
        &mut a,
        Message::Unicast {
            sender: Handle::new("alice").expect("valid handle"),
            dest: Handle::new("bob").expect("valid handle"),
            text: b"hi".to_vec(),
        },
    )
    .await;

    assert_eq!(
        recv(&mut b).await,
        Message::Unicast {
            sender: Handle::new("alice").expect("valid handle"),
            dest: Handle::new("bob").expect("valid handle"),
            text: b"hi".to_vec(),
        }
    );

    server.shutdown().await;
}

#[tokio::test]
#[serial]
async fn unicast_to_unknown_destination_notifies_sender() {
    let server = TestServer::start().await;

    let mut a = server.connect().await;
    register(&mut a, "alice").await;

    send(
        &mut a,
        Message::Unicast {
            sender: Handle::new("alice").expect("valid handle"),
            dest: Handle::new("carol").expect("valid handle"),
            text: b"hello".to_vec(),
        },
    )
    .await;

    assert_eq!(
        recv(&mut a).await,
        Message::UnknownDestination {
            dest_handle: Handle::new("carol").expect("valid handle")
        }
    );

    server.shutdown().await;
}

#[tokio::test]
#[serial]
async fn multicast_with_partial_hits_forwards_and_reports_misses() {
    let server = TestServer::start().await;

    let mut a = server.connect().await;
    register(&mut a, "alice").await;
    let mut b = server.connect().await;
    register(&mut b, "bob").await;
    let mut d = server.connect().await;
    register(&mut d, "dave").await;

    send(
        &mut a,
        Message::Multicast {
            sender: Handle::new("alice").expect("valid handle"),
            dests: vec![
                Handle::new("bob").expect("valid handle"),
                Handle::new("carol").expect("valid handle"),
                Handle::new("dave").expect("valid handle"),
            ],
            text: b"hey".to_vec(),
        },
    )
    .await;

    let expected = Message::Multicast {
        sender: Handle::new("alice").expect("valid handle"),
        dests: vec![
            Handle::new("bob").expect("valid handle"),
            Handle::new("carol").expect("valid handle"),
            Handle::new("dave").expect("valid handle"),
        ],
        text: b"hey".to_vec(),
    };
    assert_eq!(recv(&mut b).await, expected.clone());
    assert_eq!(recv(&mut d).await, expected);
    assert_eq!(
        recv(&mut a).await,
        Message::UnknownDestination {
            dest_handle: Handle::new("carol").expect("valid handle")
        }
    );

    server.shutdown().await;
}

#[tokio::test]
#[serial]
async fn roster_listing_reflects_registration_order() {
    let server = TestServer::start().await;

    let mut a = server.connect().await;
    register(&mut a, "alice").await;
    let mut b = server.connect().await;
    register(&mut b, "bob").await;
    let mut c = server.connect().await;
    register(&mut c, "carol").await;

    send(&mut a, Message::ListRequest).await;

    assert_eq!(recv(&mut a).await, Message::ListHeader { count: 3 });
    for expected in ["alice", "bob", "carol"] {
        assert_eq!(
            recv(&mut a).await,
            Message::ListEntry {
                handle: Handle::new(expected).expect("valid handle")
            }
        );
    }
    assert_eq!(recv(&mut a).await, Message::ListTerminator);

    server.shutdown().await;
}

#[tokio::test]
#[serial]
async fn closing_a_connection_frees_its_handle_for_reuse() {
    let server = TestServer::start().await;

    let a = server.connect().await;
    let mut a = a;
    register(&mut a, "alice").await;
    drop(a);

    // Give the server a moment to observe the close and garbage-collect.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let mut b = server.connect().await;
    assert_eq!(register(&mut b, "alice").await, Message::RegisterAccepted);

    server.shutdown().await;
}
