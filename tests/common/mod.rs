//! Loopback stand-ins for the device and completion APIs.
//!
//! Each fake answers one request per connection and records what it saw.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use neurorelay::http::{Endpoint, StatusCode};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// One request as the fake received it.
#[derive(Debug, Clone)]
pub struct Seen {
    pub method: String,
    /// Path plus query, e.g. `/api/read?duration=250`.
    pub target: String,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    /// The body as JSON, or `Null` if it was empty or not JSON.
    pub body: Value,
}

impl Seen {
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or_default()
    }
}

/// What the fake sends back.
pub struct Reply {
    status: StatusCode,
    content_type: &'static str,
    body: Vec<u8>,
}

impl Reply {
    pub fn json(status: StatusCode, body: &Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.to_string().into_bytes(),
        }
    }

    pub fn text(status: StatusCode, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn events(body: &str) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: "text/event-stream",
            body: body.as_bytes().to_vec(),
        }
    }
}

pub struct FakeApi {
    endpoint: Endpoint,
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl FakeApi {
    /// Listens on `127.0.0.1:0`; the endpoint carries `prefix` as its path.
    pub async fn start<F>(prefix: &str, respond: F) -> Self
    where
        F: Fn(&Seen) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let respond = Arc::new(respond);

        let log = Arc::clone(&seen);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let respond = Arc::clone(&respond);
                let log = Arc::clone(&log);
                tokio::spawn(async move {
                    let _ = answer(socket, respond.as_ref(), &log).await;
                });
            }
        });

        Self {
            endpoint: Endpoint::parse(&format!("http://{addr}{prefix}")).unwrap(),
            seen,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    /// `"METHOD target"` for every request so far.
    pub fn targets(&self) -> Vec<String> {
        self.seen()
            .iter()
            .map(|s| format!("{} {}", s.method, s.target))
            .collect()
    }
}

/// An address nobody is listening on.
pub async fn dead_addr() -> SocketAddr {
    TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap()
}

async fn answer<F>(mut socket: TcpStream, respond: &F, log: &Mutex<Vec<Seen>>) -> io::Result<()>
where
    F: Fn(&Seen) -> Reply,
{
    let mut buf = BytesMut::with_capacity(4096);
    let (head_len, content_length, mut seen) = loop {
        if socket.read_buf(&mut buf).await? == 0 {
            return Ok(());
        }
        let mut headers = [httparse::EMPTY_HEADER; 32];
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(&buf) {
            Ok(httparse::Status::Complete(len)) => {
                let header = |name: &str| {
                    req.headers
                        .iter()
                        .find(|h| h.name.eq_ignore_ascii_case(name))
                        .and_then(|h| std::str::from_utf8(h.value).ok())
                        .map(str::to_owned)
                };
                let content_length = header("content-length")
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(0);
                let seen = Seen {
                    method: req.method.unwrap_or_default().to_owned(),
                    target: req.path.unwrap_or_default().to_owned(),
                    authorization: header("authorization"),
                    content_type: header("content-type"),
                    body: Value::Null,
                };
                break (len, content_length, seen);
            }
            Ok(httparse::Status::Partial) => continue,
            Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
        }
    };

    while buf.len() < head_len + content_length {
        if socket.read_buf(&mut buf).await? == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
    }
    let body = &buf[head_len..head_len + content_length];
    seen.body = serde_json::from_slice(body).unwrap_or(Value::Null);

    let reply = respond(&seen);
    log.lock().unwrap().push(seen);

    let head = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        reply.status,
        reply.content_type,
        reply.body.len()
    );
    socket.write_all(head.as_bytes()).await?;
    socket.write_all(&reply.body).await?;
    socket.shutdown().await
}
