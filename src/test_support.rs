//! Throwaway HTTP responder for client tests.

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub struct HttpReply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
    /// Keep the socket open after the body instead of closing it.
    pub hold_open: bool,
}

impl HttpReply {
    pub fn json(status: u16, body: &str) -> Self {
        HttpReply {
            status,
            content_type: "application/json",
            body: body.to_string(),
            hold_open: false,
        }
    }

    pub fn event_stream(body: &str) -> Self {
        HttpReply {
            status: 200,
            content_type: "text/event-stream",
            body: body.to_string(),
            hold_open: false,
        }
    }

    pub fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }
}

/// Serve a single connection with `reply`. Returns the API base url and a
/// handle resolving to the raw request text.
pub async fn serve_once(reply: HttpReply) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;

        let head = format!(
            "HTTP/1.1 {} X\r\ncontent-type: {}\r\nconnection: close\r\n\r\n",
            reply.status, reply.content_type
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(reply.body.as_bytes()).await.unwrap();
        socket.flush().await.unwrap();

        if reply.hold_open {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        let _ = socket.shutdown().await;
        request
    });

    (format!("http://{}/api", addr), handle)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            return String::from_utf8_lossy(&buf).into_owned();
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
    let content_length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    String::from_utf8_lossy(&buf).into_owned()
}
