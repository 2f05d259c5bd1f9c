//! Scripted loopback WebSocket server for transport tests.

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};

use crate::protocol::Request;

pub(crate) type ServerWs = WebSocketStream<TcpStream>;

/// Bind a loopback listener, run `script` against the first connection,
/// and return the `ws://` url to dial.
pub(crate) async fn scripted_server<F, Fut>(script: F) -> String
where
    F: FnOnce(ServerWs) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        script(ws).await;
    });
    format!("ws://{addr}")
}

/// Read frames until the next text frame and parse it as a request.
pub(crate) async fn read_request(ws: &mut ServerWs) -> Request {
    loop {
        match ws.next().await.expect("connection ended").unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Close(_) => panic!("connection closed while expecting a request"),
            _ => {}
        }
    }
}

/// Send one JSON value as a text frame.
pub(crate) async fn send_json(ws: &mut ServerWs, value: serde_json::Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}
