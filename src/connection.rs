use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::logger::Logger;
use crate::mime::MimeTable;
use crate::request::{self, Method};
use crate::response::{self, error_response, Framing};
use crate::router;

/// Owns one accepted connection end to end: parse, route, encode, then
/// loop for keep-alive. Never propagates a request error past this
/// function; every outcome becomes a written response before the next
/// iteration or a silent exit.
pub async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    cfg: Arc<ServerConfig>,
    mime: Arc<MimeTable>,
    logger: Logger,
) {
    let idle_timeout = Duration::from_secs(cfg.idle_timeout_s);
    let recv_timeout = Duration::from_secs(cfg.recv_timeout_s);
    let peer = peer_addr.ip().to_string();

    loop {
        match request::read_request(&mut stream, idle_timeout, recv_timeout, cfg.max_body_bytes).await {
            Ok(None) => break,
            Ok(Some(req)) => {
                let keep_alive = cfg.keep_alive && !req.wants_close();
                let is_head = req.method == Method::Head;
                let method = req.raw_method.clone();
                let path = req.path.clone();

                let resp = match router::route(&req, &cfg, &mime, &peer).await {
                    Ok(resp) => resp,
                    Err(e) => {
                        log_request_error(&logger, &e);
                        error_response(e.status(), &e.to_string())
                    }
                };

                let status = resp.status;
                let body_len = match resp.framing {
                    Framing::Identity(len) => len,
                    _ => 0,
                };

                match response::write_response(&mut stream, resp, is_head, &cfg, keep_alive).await {
                    Ok(()) => {
                        logger.request(&peer, &method, &path, status, body_len);
                        if !keep_alive {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            Err(e) => {
                log_request_error(&logger, &e);
                let resp = error_response(e.status(), &e.to_string());
                let _ = response::write_response(&mut stream, resp, false, &cfg, false).await;
                break;
            }
        }
    }
}

/// Transport (broken pipe / reset) is never logged at error severity;
/// everything else is.
fn log_request_error(logger: &Logger, e: &ServerError) {
    if let ServerError::Io(io_err) = e {
        if io_err.kind() == std::io::ErrorKind::BrokenPipe {
            return;
        }
    }
    logger.error(&e.to_string());
}
