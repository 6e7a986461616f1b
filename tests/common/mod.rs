use std::{future::Future, net::SocketAddr, time::Duration};

use futures_util::SinkExt;
use http::{HeaderMap, Uri};
use lavanode::{
    config::{ManagerOptions, NodeOptions},
    events::Event,
};
use serde_json::Value;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{mpsc, oneshot},
    time,
};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        Message,
    },
    WebSocketStream,
};

/// How long tests wait for something to happen.
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// A websocket connection accepted by the fake backend.
pub struct Connection {
    pub uri: Uri,
    pub headers: HeaderMap,
    pub socket: WebSocketStream<TcpStream>,
}

impl Connection {
    pub async fn send_json(&mut self, value: Value) {
        self.socket
            .send(Message::text(value.to_string()))
            .await
            .unwrap();
    }
}

/// Starts a fake backend that accepts websocket connections on a random
/// port and hands them to the test.
pub async fn backend() -> (SocketAddr, mpsc::UnboundedReceiver<Connection>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let (connections, receiver) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let (request_tx, request_rx) = oneshot::channel();
            let callback =
                move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                    let _ = request_tx.send((request.uri().clone(), request.headers().clone()));
                    Ok(response)
                };

            let Ok(socket) = accept_hdr_async(stream, callback).await else {
                continue;
            };
            let Ok((uri, headers)) = request_rx.await else {
                continue;
            };
            if connections
                .send(Connection {
                    uri,
                    headers,
                    socket,
                })
                .is_err()
            {
                break;
            }
        }
    });

    (address, receiver)
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn node_options(address: SocketAddr) -> NodeOptions {
    let mut options = NodeOptions::new(address.ip().to_string());
    options.port = address.port();
    options.retry_delay = Duration::from_millis(50);
    options
}

pub fn manager_options() -> ManagerOptions {
    let mut options = ManagerOptions::new("42");
    options.auto_play = false;
    options
}

pub async fn within<F: Future>(future: F) -> F::Output {
    time::timeout(TIMEOUT, future)
        .await
        .expect("timed out waiting")
}

/// Receives events until one matches.
pub async fn wait_for<P>(events: &mut mpsc::UnboundedReceiver<Event>, predicate: P) -> Event
where
    P: Fn(&Event) -> bool,
{
    within(async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
}

/// Polls until `condition` holds.
pub async fn eventually<C>(condition: C)
where
    C: Fn() -> bool,
{
    within(async {
        while !condition() {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
}
