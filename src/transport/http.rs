//! Minimal HTTP/1.1 framing for the exchange server

use super::{Result, TransportError};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest request head we buffer
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

const MAX_HEADERS: usize = 32;
const READ_CHUNK: usize = 8192;

/// A fully read request
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    /// First header with this name, case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Path without its query string
    pub fn route_path(&self) -> &str {
        self.path.split('?').next().unwrap_or_default()
    }
}

/// A response to serialize back to the client
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// JSON body with a matching content type
    pub fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::new(status)
                .with_header("Content-Type", "application/json")
                .with_body(body),
            Err(e) => Self::error(500, &e.to_string()),
        }
    }

    /// `{"error": reason}` with the given status
    pub fn error(status: u16, reason: &str) -> Self {
        let body = serde_json::json!({ "error": reason }).to_string();
        Self::new(status)
            .with_header("Content-Type", "application/json")
            .with_body(body.into_bytes())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Wire form; the connection is always closed afterwards
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, reason_phrase(self.status));
        for (name, value) in &self.headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        head.push_str(&format!(
            "Content-Length: {}\r\nConnection: close\r\n\r\n",
            self.body.len()
        ));

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// Parsed request line and headers
struct Head {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    length: usize,
}

fn parse_head(buf: &[u8]) -> Result<Option<Head>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    let length = match req.parse(buf) {
        Ok(httparse::Status::Complete(length)) => length,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(TransportError::Malformed(e.to_string())),
    };

    let method = req
        .method
        .ok_or_else(|| TransportError::Malformed("missing method".to_string()))?
        .to_string();
    let path = req
        .path
        .ok_or_else(|| TransportError::Malformed("missing path".to_string()))?
        .to_string();
    let headers = req
        .headers
        .iter()
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).trim().to_string(),
            )
        })
        .collect();

    Ok(Some(Head {
        method,
        path,
        headers,
        length,
    }))
}

fn content_length(headers: &[(String, String)]) -> Result<usize> {
    let mut length = 0;
    for (name, value) in headers {
        if name.eq_ignore_ascii_case("Transfer-Encoding") {
            return Err(TransportError::Malformed(format!(
                "unsupported transfer encoding '{}'",
                value
            )));
        }
        if name.eq_ignore_ascii_case("Content-Length") {
            length = value
                .parse()
                .map_err(|_| TransportError::Malformed(format!("bad content length '{}'", value)))?;
        }
    }
    Ok(length)
}

/// Read one request: the head up to [`MAX_HEAD_SIZE`], then a
/// `Content-Length` body of at most `max_body` bytes
pub async fn read_request<S>(stream: &mut S, max_body: usize) -> Result<Request>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(READ_CHUNK);
    let mut chunk = vec![0u8; READ_CHUNK];

    let head = loop {
        if let Some(head) = parse_head(&buf)? {
            break head;
        }
        if buf.len() >= MAX_HEAD_SIZE {
            return Err(TransportError::HeadTooLarge {
                limit: MAX_HEAD_SIZE,
            });
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(TransportError::ConnectionClosed);
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let length = content_length(&head.headers)?;
    if length > max_body {
        return Err(TransportError::BodyTooLarge {
            size: length,
            limit: max_body,
        });
    }

    let mut body = buf.split_off(head.length);
    while body.len() < length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(TransportError::ConnectionClosed);
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(length);

    Ok(Request {
        method: head.method,
        path: head.path,
        headers: head.headers,
        body,
    })
}

pub async fn write_response<S>(stream: &mut S, response: &Response) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(&response.to_bytes()).await?;
    stream.flush().await
}
