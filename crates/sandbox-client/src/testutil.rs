//! Test doubles: a canned control-plane responder and a scripted
//! WebSocket server.

use futures::{SinkExt, StreamExt};
use sandbox_rpc::Request;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};

pub(crate) type ServerWs = WebSocketStream<TcpStream>;

/// Serve `body` as the JSON response to every control-plane request.
pub(crate) async fn http_stub(body: serde_json::Value) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let payload = body.to_string();
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let payload = payload.clone();
            tokio::spawn(async move {
                read_http_request(&mut stream).await;
                let resp = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
                    payload.len(),
                );
                let _ = stream.write_all(resp.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    format!("http://{addr}")
}

/// Consume one HTTP request: headers plus any announced body.
async fn read_http_request(stream: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let mut head_end = None;
    let mut body_len = 0usize;
    loop {
        if let Some(end) = head_end {
            if buf.len() >= end + body_len {
                return;
            }
        }
        let Ok(n) = stream.read(&mut chunk).await else {
            return;
        };
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        if head_end.is_none() {
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                head_end = Some(pos + 4);
                let head = String::from_utf8_lossy(&buf[..pos]).into_owned();
                body_len = head
                    .lines()
                    .find_map(|line| {
                        let lower = line.to_ascii_lowercase();
                        lower
                            .strip_prefix("content-length:")
                            .and_then(|v| v.trim().parse().ok())
                    })
                    .unwrap_or(0);
            }
        }
    }
}

/// Bind a loopback listener, run `script` against the first WebSocket
/// connection, and return the `ws://` url to dial.
pub(crate) async fn scripted_ws<F, Fut>(script: F) -> String
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
