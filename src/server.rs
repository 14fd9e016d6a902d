use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Semaphore;

use crate::config::ServerConfig;
use crate::connection::handle_connection;
use crate::logger::Logger;
use crate::mime::MimeTable;
use crate::response::{error_response, write_response};

/// Binds the listen socket and runs the accept loop, enforcing
/// `max_conn` via a semaphore and rejecting overflow with an immediate
/// 503. Runs until Ctrl-C/SIGTERM, then removes the HTML cache directory
/// and returns.
pub async fn run(cfg: Arc<ServerConfig>, mime: Arc<MimeTable>, logger: Logger) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", cfg.port)).await?;
    println!("httpd listening on http://0.0.0.0:{}", cfg.port);
    serve(listener, cfg, mime, logger).await
}

/// Runs the accept loop on an already-bound listener. Split out from
/// `run` so tests can bind an ephemeral port and discover its address
/// before the loop starts.
pub async fn serve(listener: TcpListener, cfg: Arc<ServerConfig>, mime: Arc<MimeTable>, logger: Logger) -> std::io::Result<()> {
    let semaphore = Arc::new(Semaphore::new(cfg.max_conn));

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((mut stream, peer_addr)) => {
                        let _ = stream.set_nodelay(true);
                        match semaphore.clone().try_acquire_owned() {
                            Ok(permit) => {
                                let cfg = cfg.clone();
                                let mime = mime.clone();
                                let logger = logger.clone();
                                tokio::spawn(async move {
                                    let _permit = permit;
                                    handle_connection(stream, peer_addr, cfg, mime, logger).await;
                                });
                            }
                            Err(_) => {
                                let resp = error_response(503, "server is at capacity");
                                let _ = write_response(&mut stream, resp, false, &cfg, false).await;
                                logger.error("rejected connection: max_conn reached");
                            }
                        }
                    }
                    Err(_) => continue,
                }
            }
            _ = shutdown_signal() => {
                println!("shutdown signal received, stopping server");
                break;
            }
        }
    }

    if cfg.html_cache {
        let _ = std::fs::remove_dir_all(&cfg.html_cache_dir);
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
