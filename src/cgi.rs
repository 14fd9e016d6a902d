use std::collections::HashMap;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, ReadBuf};
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::{timeout, Duration};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::request::Request;
use crate::response::Response;

fn interpreter_for(ext: &str) -> Option<&'static str> {
    match ext {
        "php" => Some("php-cgi"),
        "pl" => Some("perl"),
        "py" => Some("python3"),
        _ => None,
    }
}

/// The distinct interpreter binaries startup needs to find on `PATH` for
/// `extensions` to be servable. Extensions with no registered interpreter
/// fall back to executing the script itself, whose own executability is
/// checked per-request rather than at startup.
pub fn required_interpreters(extensions: &[String]) -> Vec<&'static str> {
    let mut found = Vec::new();
    for ext in extensions {
        if let Some(interp) = interpreter_for(&ext.to_ascii_lowercase()) {
            if !found.contains(&interp) {
                found.push(interp);
            }
        }
    }
    found
}

/// True if `name` resolves to an executable file somewhere on `PATH`.
pub fn interpreter_on_path(name: &str) -> bool {
    let Some(path_var) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|dir| is_executable(&dir.join(name)))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0).unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// True when `path` should be dispatched to the CGI executor rather than
/// served as a static file.
pub fn is_cgi_target(cfg: &ServerConfig, path: &Path) -> bool {
    if !cfg.cgi.enable {
        return false;
    }
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase();
    cfg.cgi.extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext))
}

fn build_env(script_path: &Path, req: &Request, cfg: &ServerConfig, peer_addr: &str) -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert("GATEWAY_INTERFACE".into(), "CGI/1.1".into());
    env.insert("SERVER_SOFTWARE".into(), cfg.server_software.clone());
    env.insert("SERVER_PROTOCOL".into(), "HTTP/1.1".into());
    env.insert("SERVER_NAME".into(), req.header("host").unwrap_or(&cfg.server_addr).to_string());
    env.insert("SERVER_ADDR".into(), cfg.server_addr.clone());
    env.insert("SERVER_PORT".into(), cfg.port.to_string());
    env.insert("DOCUMENT_ROOT".into(), cfg.doc_root.to_string_lossy().into_owned());
    env.insert("REDIRECT_STATUS".into(), "1".into());
    env.insert("REQUEST_METHOD".into(), req.raw_method.clone());

    let request_uri = if req.query.is_empty() {
        req.path.clone()
    } else {
        format!("{}?{}", req.path, req.query)
    };
    env.insert("REQUEST_URI".into(), request_uri);
    env.insert("SCRIPT_FILENAME".into(), script_path.to_string_lossy().into_owned());
    let script_name = script_path
        .strip_prefix(&cfg.doc_root)
        .map(|p| format!("/{}", p.to_string_lossy()))
        .unwrap_or_else(|_| req.path.clone());
    env.insert("SCRIPT_NAME".into(), script_name);
    env.insert("QUERY_STRING".into(), req.query.clone());
    env.insert("REMOTE_ADDR".into(), peer_addr.to_string());
    env.insert("REMOTE_HOST".into(), "NULL".into());
    env.insert("CONTENT_TYPE".into(), req.header("content-type").unwrap_or("").to_string());
    env.insert(
        "CONTENT_LENGTH".into(),
        if req.body.is_empty() { "NULL".into() } else { req.body.len().to_string() },
    );

    for (key, value) in &req.headers {
        if matches!(key.as_str(), "connection" | "content-length" | "content-type") {
            continue;
        }
        let http_key = format!("HTTP_{}", key.to_ascii_uppercase().replace('-', "_"));
        env.insert(http_key, value.clone());
    }
    env
}

async fn read_cgi_headers(
    reader: &mut BufReader<ChildStdout>,
) -> Result<(u16, String, Vec<(String, String)>)> {
    let mut status = 200u16;
    let mut reason = "Ok".to_string();
    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await.map_err(ServerError::Io)?;
        if n == 0 {
            return Err(ServerError::Server("CGI process closed stdout before headers completed".into()));
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        let (key, value) = trimmed
            .split_once(':')
            .ok_or_else(|| ServerError::Server("malformed CGI header line".into()))?;
        let key = key.trim();
        let value = value.trim().to_string();
        if key.eq_ignore_ascii_case("status") {
            let mut parts = value.splitn(2, ' ');
            if let Some(code_str) = parts.next() {
                if let Ok(code) = code_str.parse::<u16>() {
                    status = code;
                    let rest = parts.next().unwrap_or("").trim().to_string();
                    reason = if rest.is_empty() { "Ok".to_string() } else { rest };
                }
            }
        } else {
            headers.push((key.to_string(), value));
        }
    }
    Ok((status, reason, headers))
}

/// An `AsyncRead` over a CGI child's remaining stdout that keeps the child
/// (and thus its pipes) alive for as long as the stream is read. Aborts
/// the watchdog task on drop so a child that finishes well within its
/// deadline doesn't leave a sleeper around to `SIGKILL` whatever PID the
/// OS has since reassigned.
struct CgiBody {
    reader: BufReader<ChildStdout>,
    _child: Child,
    watchdog: tokio::task::JoinHandle<()>,
}

impl AsyncRead for CgiBody {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        Pin::new(&mut this.reader).poll_read(cx, buf)
    }
}

impl Drop for CgiBody {
    fn drop(&mut self) {
        self.watchdog.abort();
    }
}

/// Spawns the interpreter (or the script itself, if no interpreter is
/// registered for its extension) for `script_path`, feeds it the request
/// body, and streams its response back as chunked HTTP.
pub async fn execute(script_path: &Path, req: &Request, cfg: &ServerConfig, peer_addr: &str) -> Result<Response> {
    let ext = script_path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase();

    let mut command = match interpreter_for(&ext) {
        Some(interp) => {
            let mut c = Command::new(interp);
            c.arg(script_path);
            c
        }
        None => Command::new(script_path),
    };

    let env = build_env(script_path, req, cfg, peer_addr);
    command
        .env_clear()
        .envs(env)
        .current_dir(&cfg.doc_root)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::null());

    let mut child = command
        .spawn()
        .map_err(|e| ServerError::Server(format!("failed to spawn CGI process: {}", e)))?;

    if let Some(mut stdin) = child.stdin.take() {
        let body = req.body.clone();
        tokio::spawn(async move {
            let _ = stdin.write_all(&body).await;
        });
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ServerError::Server("CGI process had no stdout".into()))?;
    let mut reader = BufReader::new(stdout);

    let deadline = Duration::from_secs(cfg.cgi.timeout_s.max(1));

    let (status, reason, mut headers) = match timeout(deadline, read_cgi_headers(&mut reader)).await {
        Ok(Ok(parsed)) => parsed,
        Ok(Err(e)) => {
            let _ = child.kill().await;
            return Err(e);
        }
        Err(_) => {
            let _ = child.kill().await;
            return Err(ServerError::Server("CGI process timed out producing headers".into()));
        }
    };

    let content_type_pos = headers.iter().position(|(k, _)| k.eq_ignore_ascii_case("content-type"));
    let content_type = match content_type_pos {
        Some(pos) => headers.remove(pos).1,
        None => {
            let _ = child.kill().await;
            return Err(ServerError::Server("CGI response missing Content-Type".into()));
        }
    };

    let watchdog_pid = child.id();
    let watchdog = tokio::spawn(async move {
        tokio::time::sleep(deadline).await;
        if let Some(pid) = watchdog_pid {
            #[cfg(unix)]
            unsafe {
                libc::kill(pid as i32, libc::SIGKILL);
            }
            #[cfg(not(unix))]
            let _ = pid;
        }
    });

    let mut resp = Response::new(status, reason);
    for (name, value) in headers {
        resp = resp.header(name, value);
    }
    let body = CgiBody { reader, _child: child, watchdog };
    Ok(resp.with_chunked_reader(&content_type, Box::pin(body)))
}
