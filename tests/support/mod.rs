use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream as StdTcpStream};
use std::sync::Arc;

use httpd::config::ServerConfig;
use httpd::logger::Logger;
use httpd::mime::MimeTable;

/// Starts the full server (listener + acceptor + workers) on an ephemeral
/// port against `cfg`, returning the address to connect to. The server
/// task is detached; the test process exiting tears it down.
pub async fn spawn_server(mut cfg: ServerConfig) -> SocketAddr {
    cfg.port = 0;
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    cfg.port = addr.port();
    cfg.server_addr = addr.ip().to_string();

    let cfg = Arc::new(cfg);
    let mime = Arc::new(MimeTable::with_overrides(&cfg.mime_overrides));
    let logger = Logger::open("-").unwrap();

    tokio::spawn(async move {
        let _ = httpd::server::serve(listener, cfg, mime, logger).await;
    });

    addr
}

/// Sends a raw request over a fresh blocking connection and returns the
/// full response bytes read until the peer closes or `read_timeout`
/// elapses.
pub fn raw_request(addr: SocketAddr, request: &str) -> Vec<u8> {
    let mut stream = StdTcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(std::time::Duration::from_secs(2))).unwrap();
    stream.write_all(request.as_bytes()).unwrap();
    let mut buf = Vec::new();
    let _ = stream.read_to_end(&mut buf);
    buf
}

/// Like `raw_request` but keeps the connection open and lets the caller
/// send further requests / read further responses over it.
pub fn connect(addr: SocketAddr) -> StdTcpStream {
    let stream = StdTcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(std::time::Duration::from_secs(2))).unwrap();
    stream
}

pub fn read_response_head(stream: &mut StdTcpStream) -> (u16, Vec<u8>) {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.push(byte[0]);
        if buf.ends_with(b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&buf);
    let status = text
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(0);
    (status, buf)
}
