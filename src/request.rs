use crate::error::{ServerError, Result};
use rustc_hash::FxHashMap;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Head,
    Get,
    Post,
    Other,
}

impl Method {
    fn parse(raw: &str) -> Self {
        match raw {
            "HEAD" => Method::Head,
            "GET" => Method::Get,
            "POST" => Method::Post,
            _ => Method::Other,
        }
    }
}

/// A fully parsed and validated HTTP/1.1 request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub raw_method: String,
    pub path: String,
    pub query: String,
    pub version: String,
    pub headers: FxHashMap<String, String>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|s| s.as_str())
    }

    pub fn wants_close(&self) -> bool {
        self.header("connection").map(|v| v.eq_ignore_ascii_case("close")).unwrap_or(false)
    }
}

/// Reads one request off `stream`, or `Ok(None)` for a clean idle
/// disconnect. A timeout before any byte arrives is quiet; any timeout
/// afterward is a protocol error.
pub async fn read_request(
    stream: &mut TcpStream,
    idle_timeout: Duration,
    recv_timeout: Duration,
    max_body_bytes: u64,
) -> Result<Option<Request>> {
    let mut probe = [0u8; 1];
    match timeout(idle_timeout, stream.peek(&mut probe)).await {
        Ok(Ok(0)) => return Ok(None),
        Ok(Ok(_)) => {}
        Ok(Err(e)) => return Err(ServerError::Io(e)),
        Err(_) => return Ok(None),
    }

    let mut reader = BufReader::new(stream);

    let mut line = String::new();
    match timeout(recv_timeout, reader.read_line(&mut line)).await {
        Ok(Ok(0)) => return Ok(None),
        Ok(Ok(_)) => {}
        Ok(Err(e)) => return Err(ServerError::Io(e)),
        Err(_) => return Err(ServerError::Protocol("timed out reading request line")),
    }

    let (raw_method, raw_path, version) = parse_request_line(&line)?;
    let method = Method::parse(&raw_method);

    let (path, query) = match raw_path.split_once('?') {
        Some((p, q)) => (p.to_string(), q.to_string()),
        None => (raw_path, String::new()),
    };

    let mut headers = FxHashMap::default();
    loop {
        let mut header_line = String::new();
        match timeout(recv_timeout, reader.read_line(&mut header_line)).await {
            Ok(Ok(0)) => return Err(ServerError::Protocol("connection closed mid-headers")),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(ServerError::Io(e)),
            Err(_) => return Err(ServerError::Protocol("timed out reading headers")),
        }
        let trimmed = header_line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        let (key, value) = trimmed
            .split_once(':')
            .ok_or(ServerError::Protocol("header line missing colon"))?;
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        if key.is_empty() || value.is_empty() {
            return Err(ServerError::Protocol("empty header key or value"));
        }
        headers.insert(key, value.to_string());
    }

    validate(&raw_method, &version, &headers)?;

    let body = if headers.get("transfer-encoding").map(|v| v.eq_ignore_ascii_case("chunked")).unwrap_or(false) {
        read_chunked_body(&mut reader, recv_timeout, max_body_bytes).await?
    } else if let Some(len) = headers.get("content-length") {
        let len: u64 = len
            .parse()
            .map_err(|_| ServerError::Protocol("invalid content-length"))?;
        if len > max_body_bytes {
            return Err(ServerError::policy(413));
        }
        read_fixed_body(&mut reader, recv_timeout, len).await?
    } else {
        Vec::new()
    };

    Ok(Some(Request {
        method,
        raw_method,
        path,
        query,
        version,
        headers,
        body,
    }))
}

fn parse_request_line(line: &str) -> Result<(String, String, String)> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    let mut parts = trimmed.split(' ').filter(|p| !p.is_empty());
    let method = parts.next().ok_or(ServerError::Protocol("missing method"))?;
    let url = parts.next().ok_or(ServerError::Protocol("missing url"))?;
    let version = parts.next().ok_or(ServerError::Protocol("missing version"))?;
    if parts.next().is_some() {
        return Err(ServerError::Protocol("malformed request line"));
    }
    Ok((method.to_string(), url.to_string(), version.to_string()))
}

fn validate(raw_method: &str, version: &str, headers: &FxHashMap<String, String>) -> Result<()> {
    if !matches!(raw_method, "HEAD" | "GET" | "POST") {
        return Err(ServerError::policy(501));
    }
    if version != "HTTP/1.1" {
        return Err(ServerError::policy(505));
    }
    if !headers.contains_key("host") {
        return Err(ServerError::Protocol("missing Host header"));
    }
    Ok(())
}

async fn read_fixed_body(
    reader: &mut BufReader<&mut TcpStream>,
    recv_timeout: Duration,
    len: u64,
) -> Result<Vec<u8>> {
    let mut body = vec![0u8; len as usize];
    match timeout(recv_timeout, reader.read_exact(&mut body)).await {
        Ok(Ok(_)) => Ok(body),
        Ok(Err(_)) => Err(ServerError::Protocol("short body read")),
        Err(_) => Err(ServerError::Protocol("timed out reading body")),
    }
}

async fn read_chunked_body(
    reader: &mut BufReader<&mut TcpStream>,
    recv_timeout: Duration,
    max_body_bytes: u64,
) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let mut size_line = String::new();
        match timeout(recv_timeout, reader.read_line(&mut size_line)).await {
            Ok(Ok(0)) => return Err(ServerError::Protocol("connection closed mid-chunk")),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(ServerError::Io(e)),
            Err(_) => return Err(ServerError::Protocol("timed out reading chunk size")),
        }
        let size_str = size_line.trim_end_matches(['\r', '\n']);
        let size_str = size_str.split(';').next().unwrap_or(size_str);
        let size = u64::from_str_radix(size_str.trim(), 16)
            .map_err(|_| ServerError::Protocol("invalid chunk size"))?;
        if size == 0 {
            let mut trailer = String::new();
            let _ = timeout(recv_timeout, reader.read_line(&mut trailer)).await;
            break;
        }
        if body.len() as u64 + size > max_body_bytes {
            return Err(ServerError::policy(413));
        }
        let mut chunk = vec![0u8; size as usize];
        match timeout(recv_timeout, reader.read_exact(&mut chunk)).await {
            Ok(Ok(_)) => body.extend_from_slice(&chunk),
            Ok(Err(_)) => return Err(ServerError::Protocol("short chunk read")),
            Err(_) => return Err(ServerError::Protocol("timed out reading chunk")),
        }
        let mut crlf = [0u8; 2];
        match timeout(recv_timeout, reader.read_exact(&mut crlf)).await {
            Ok(Ok(_)) => {}
            Ok(Err(_)) => return Err(ServerError::Protocol("missing chunk trailer")),
            Err(_) => return Err(ServerError::Protocol("timed out reading chunk trailer")),
        }
    }
    Ok(body)
}
