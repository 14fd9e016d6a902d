use std::path::{Path, PathBuf};

use crate::cgi;
use crate::compress;
use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::listing;
use crate::mime::MimeTable;
use crate::request::{Method, Request};
use crate::response::{error_response, Response};

/// Percent-decodes and resolves a request path under `doc_root`,
/// rejecting `..` traversal outright.
fn resolve_path(cfg: &ServerConfig, req_path: &str) -> Result<PathBuf> {
    let decoded = urlencoding::decode(req_path).map_err(|_| ServerError::Protocol("invalid percent-encoding in path"))?;
    let mut candidate = cfg.doc_root.clone();
    for segment in decoded.split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        if segment == ".." {
            return Err(ServerError::policy(403));
        }
        candidate.push(segment);
    }
    Ok(candidate)
}

/// True if any path component between `doc_root` and `target` (inclusive
/// of `target` itself) is a symlink. Checking only the final component
/// would miss a symlinked intermediate directory that walks the served
/// path outside `doc_root`.
fn has_symlink_component(doc_root: &Path, target: &Path) -> bool {
    let Ok(rel) = target.strip_prefix(doc_root) else {
        return false;
    };
    let mut current = doc_root.to_path_buf();
    for component in rel.components() {
        current.push(component);
        if std::fs::symlink_metadata(&current).map(|m| m.file_type().is_symlink()).unwrap_or(false) {
            return true;
        }
    }
    false
}

/// Dispatches a validated request to the static handler, the directory
/// listing path, or a redirect.
pub async fn route(req: &Request, cfg: &ServerConfig, mime: &MimeTable, peer_addr: &str) -> Result<Response> {
    if req.method == Method::Other {
        return Ok(error_response(501, "method not implemented"));
    }

    let target = resolve_path(cfg, &req.path)?;

    if !cfg.follow_symlinks && has_symlink_component(&cfg.doc_root, &target) {
        return Ok(error_response(403, "symlink traversal is not permitted"));
    }

    let final_name = target.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if final_name.starts_with('.') && !cfg.allow_hidden {
        return Ok(error_response(403, "hidden paths are not served"));
    }

    let meta = match std::fs::metadata(&target) {
        Ok(m) => m,
        Err(_) => return Ok(error_response(404, "not found")),
    };

    if meta.is_dir() {
        if !req.path.ends_with('/') {
            let location = format!("http://{}:{}{}/", cfg.server_addr, cfg.port, req.path);
            return Ok(Response::new(301, "Moved Permanently").header("Location", location));
        }
        let index_path = target.join(&cfg.index_filename);
        if index_path.is_file() {
            return serve_target(&index_path, req, cfg, mime, peer_addr).await;
        }
        return listing::serve(&target, &req.path, cfg).await;
    }

    if req.method == Method::Post && !cgi::is_cgi_target(cfg, &target) {
        return Ok(error_response(405, "POST is only accepted for CGI scripts"));
    }

    serve_target(&target, req, cfg, mime, peer_addr).await
}

async fn serve_target(target: &Path, req: &Request, cfg: &ServerConfig, mime: &MimeTable, peer_addr: &str) -> Result<Response> {
    if cgi::is_cgi_target(cfg, target) {
        return cgi::execute(target, req, cfg, peer_addr).await;
    }
    serve_static(target, req, cfg, mime).await
}

async fn serve_static(target: &Path, req: &Request, cfg: &ServerConfig, mime: &MimeTable) -> Result<Response> {
    let meta = std::fs::metadata(target).map_err(|_| ServerError::policy(404))?;
    let content_type = mime.lookup(target);

    let etag = cfg.http_cache.then(|| compute_etag(&meta, cfg));
    if let Some(etag) = &etag {
        if let Some(candidate) = req.header("if-none-match") {
            if candidate == etag || candidate == "*" {
                return Ok(Response::new(304, "Not Modified").header("ETag", etag.clone()));
            }
        }
    }

    let body = std::fs::read(target).map_err(|e| ServerError::Server(e.to_string()))?;
    let (body, compressed) =
        compress::maybe_compress(cfg, target, &content_type, req.header("accept-encoding"), body).await?;

    let mut resp = Response::new(200, "OK");
    if let Some(etag) = etag {
        resp = resp.header("ETag", etag).header("Cache-Control", format!("max-age={}", cfg.http_cache_age_s));
    }
    Ok(finish_body(resp, &content_type, body, compressed))
}

fn finish_body(resp: Response, content_type: &str, body: Vec<u8>, compressed: bool) -> Response {
    if compressed {
        resp.header("Content-Encoding", "gzip")
            .header("Vary", "Accept-Encoding")
            .with_bytes_chunked(content_type, body)
    } else {
        resp.with_bytes(content_type, body)
    }
}

#[cfg(unix)]
fn compute_etag(meta: &std::fs::Metadata, cfg: &ServerConfig) -> String {
    use std::os::unix::fs::MetadataExt;
    format!("\"{:x}-{:x}-{}\"", meta.mtime(), meta.ino(), cfg.server_software)
}

#[cfg(not(unix))]
fn compute_etag(meta: &std::fs::Metadata, cfg: &ServerConfig) -> String {
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("\"{:x}-{:x}-{}\"", mtime, meta.len(), cfg.server_software)
}
