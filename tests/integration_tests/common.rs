//! Shared scaffolding for integration tests: a real server bound to an
//! ephemeral port, torn down via `CancellationToken` at the end of the test.

use std::net::SocketAddr;

use chat_protocol_rs::{
    codec::{Handle, Message},
    pdu,
};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: CancellationToken,
    handle: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
        let addr = listener.local_addr().expect("local_addr failed");
        let shutdown = CancellationToken::new();
        let shutdown_for_server = shutdown.clone();
        let handle = tokio::spawn(async move { chat_protocol_rs::server::run(listener, shutdown_for_server).await });
        TestServer {
            addr,
            shutdown,
            handle,
        }
    }

    pub async fn connect(&self) -> TcpStream {
        TcpStream::connect(self.addr).await.expect("connect failed")
    }

    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.handle.await;
    }
}

pub const MAX: usize = 8192;

pub async fn register(conn: &mut TcpStream, handle: &str) -> Message {
    let msg = Message::Register {
        handle: Handle::new(handle).expect("valid handle in test fixture"),
    };
    pdu::send(conn, &msg.encode().expect("encode failed"))
        .await
        .expect("send failed");
    recv(conn).await
}

pub async fn recv(conn: &mut TcpStream) -> Message {
    let payload = pdu::recv(conn, MAX)
        .await
        .expect("recv failed")
        .expect("peer closed unexpectedly");
    Message::decode(&payload).expect("decode failed")
}

pub async fn send(conn: &mut TcpStream, msg: Message) {
    pdu::send(conn, &msg.encode().expect("encode failed"))
        .await
        .expect("send failed");
}
