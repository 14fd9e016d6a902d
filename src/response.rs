use once_cell::sync::OnceCell;
use std::io;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::ServerConfig;

/// The `Server:` header line is the same for every response in a process's
/// lifetime, so it is rendered once and reused, mirroring the teacher's
/// `OnceCell`-backed header-template statics.
static SERVER_HEADER_LINE: OnceCell<String> = OnceCell::new();

pub enum Framing {
    /// `Content-Length` framing; body is exactly `len` bytes.
    Identity(u64),
    /// `Transfer-Encoding: chunked` framing.
    Chunked,
    /// No body at all (304, HEAD already handled upstream, short errors).
    None,
}

pub enum BodySource {
    Bytes(Vec<u8>),
    Reader(Pin<Box<dyn AsyncRead + Send>>),
    Empty,
}

/// A response under construction. Headers are appended in the order
/// handlers supply them; the encoder always adds `Date`, `Server`, and
/// `Connection` itself.
pub struct Response {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub framing: Framing,
    pub body: BodySource,
}

impl Response {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            headers: Vec::new(),
            framing: Framing::None,
            body: BodySource::Empty,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_bytes(mut self, content_type: &str, bytes: Vec<u8>) -> Self {
        self.headers.push(("Content-Type".to_string(), content_type.to_string()));
        self.framing = Framing::Identity(bytes.len() as u64);
        self.body = BodySource::Bytes(bytes);
        self
    }

    /// Same as `with_bytes` but framed as chunked rather than
    /// `Content-Length`, for listing bodies generated on the fly.
    pub fn with_bytes_chunked(mut self, content_type: &str, bytes: Vec<u8>) -> Self {
        self.headers.push(("Content-Type".to_string(), content_type.to_string()));
        self.framing = Framing::Chunked;
        self.body = BodySource::Bytes(bytes);
        self
    }

    pub fn with_chunked_reader(mut self, content_type: &str, reader: Pin<Box<dyn AsyncRead + Send>>) -> Self {
        self.headers.push(("Content-Type".to_string(), content_type.to_string()));
        self.framing = Framing::Chunked;
        self.body = BodySource::Reader(reader);
        self
    }

    pub fn plain_error(status: u16, reason: &'static str, message: &str) -> Self {
        let body = message.as_bytes().to_vec();
        Response::new(status, reason).with_bytes("text/plain; charset=utf-8", body)
    }
}

fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        301 => "Moved Permanently",
        304 => "Not Modified",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        412 => "Precondition Failed",
        413 => "Request Entity Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        505 => "HTTP Version Not Supported",
        _ => "Unknown",
    }
}

pub fn error_response(status: u16, message: &str) -> Response {
    Response::plain_error(status, status_reason(status), message)
}

const CHUNK_SIZE: usize = 8192;

/// Writes the full response to `stream`. Broken-pipe conditions are
/// swallowed (returned as `Ok(())`): they are transport noise, never a
/// loggable server error.
pub async fn write_response(
    stream: &mut TcpStream,
    resp: Response,
    suppress_body: bool,
    cfg: &ServerConfig,
    keep_alive: bool,
) -> io::Result<()> {
    let mut head = format!("HTTP/1.1 {} {}\r\n", resp.status, resp.reason);
    head.push_str(&format!("Date: {}\r\n", httpdate::fmt_http_date(std::time::SystemTime::now())));
    head.push_str(SERVER_HEADER_LINE.get_or_init(|| format!("Server: {}\r\n", cfg.server_software)));
    head.push_str(&format!("Connection: {}\r\n", if keep_alive { "keep-alive" } else { "close" }));
    for (name, value) in &resp.headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    match resp.framing {
        Framing::Identity(len) => head.push_str(&format!("Content-Length: {}\r\n", len)),
        Framing::Chunked => head.push_str("Transfer-Encoding: chunked\r\n"),
        Framing::None => {}
    }
    head.push_str("\r\n");

    let result = write_all_swallow_broken_pipe(stream, head.as_bytes()).await?;
    if !result {
        return Ok(());
    }

    if suppress_body {
        return stream.flush().await.or_else(ignore_broken_pipe);
    }

    let chunked = matches!(resp.framing, Framing::Chunked);

    match resp.body {
        BodySource::Bytes(bytes) if chunked => {
            for chunk in bytes.chunks(CHUNK_SIZE) {
                if !write_chunk(stream, chunk).await? {
                    return Ok(());
                }
            }
            if !write_all_swallow_broken_pipe(stream, b"0\r\n\r\n").await? {
                return Ok(());
            }
        }
        BodySource::Bytes(bytes) => {
            if !write_all_swallow_broken_pipe(stream, &bytes).await? {
                return Ok(());
            }
        }
        BodySource::Reader(mut reader) => {
            let mut buf = vec![0u8; CHUNK_SIZE];
            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                if !write_chunk(stream, &buf[..n]).await? {
                    return Ok(());
                }
            }
            if !write_all_swallow_broken_pipe(stream, b"0\r\n\r\n").await? {
                return Ok(());
            }
        }
        BodySource::Empty => {}
    }

    stream.flush().await.or_else(ignore_broken_pipe)
}

async fn write_chunk(stream: &mut TcpStream, data: &[u8]) -> io::Result<bool> {
    let frame = format!("{:x}\r\n", data.len());
    if !write_all_swallow_broken_pipe(stream, frame.as_bytes()).await? {
        return Ok(false);
    }
    if !write_all_swallow_broken_pipe(stream, data).await? {
        return Ok(false);
    }
    write_all_swallow_broken_pipe(stream, b"\r\n").await
}

fn ignore_broken_pipe(e: io::Error) -> io::Result<()> {
    if e.kind() == io::ErrorKind::BrokenPipe {
        Ok(())
    } else {
        Err(e)
    }
}

/// Returns `Ok(true)` if the write succeeded, `Ok(false)` if it failed with
/// a broken pipe (caller should stop writing further, but it is not an
/// error), `Err` for anything else.
async fn write_all_swallow_broken_pipe(stream: &mut TcpStream, buf: &[u8]) -> io::Result<bool> {
    match stream.write_all(buf).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(false),
        Err(e) => Err(e),
    }
}
