use std::fs;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::time::SystemTime;

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::lock::DirLock;
use crate::mime::MimeTable;
use crate::response::Response;

struct Row {
    name: String,
    is_dir: bool,
    is_symlink_to_dir: bool,
    hidden: bool,
    size: u64,
    modified: SystemTime,
}

/// Renders the `Index of <path>` HTML page for `dir`. Ordering:
/// `../` first, then hidden entries (if enabled) as their own group,
/// then directories before files, each group sorted lexically ascending.
fn render_html(dir: &Path, url_path: &str, allow_hidden: bool) -> std::io::Result<String> {
    let mut rows = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let link_meta = entry.metadata()?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let hidden = name.starts_with('.');
        if hidden && !allow_hidden {
            continue;
        }
        let is_symlink = link_meta.file_type().is_symlink();
        let followed = if is_symlink { fs::metadata(entry.path()).ok() } else { None };
        let is_dir = followed.as_ref().map(|m| m.is_dir()).unwrap_or_else(|| link_meta.is_dir());
        rows.push(Row {
            name,
            is_dir,
            is_symlink_to_dir: is_symlink && is_dir,
            hidden,
            size: followed.as_ref().unwrap_or(&link_meta).len(),
            modified: link_meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        });
    }
    rows.sort_by(|a, b| (!a.hidden, !a.is_dir, &a.name).cmp(&(!b.hidden, !b.is_dir, &b.name)));

    let mut html = String::new();
    html.push_str(&format!(
        "<!DOCTYPE html>\n<html>\n<head><title>Index of {path}</title></head>\n<body>\n<h1>Index of {path}</h1>\n<table>\n",
        path = html_escape(url_path)
    ));
    html.push_str("<tr><th>Name</th><th>Last Modified</th><th>Size</th><th>Type</th></tr>\n");

    if url_path != "/" {
        html.push_str("<tr><td><a href=\"../\">../</a></td><td></td><td>-</td><td>Directory</td></tr>\n");
    }

    for row in rows {
        let href = if row.is_dir { format!("{}/", row.name) } else { row.name.clone() };
        let kind = if row.is_symlink_to_dir {
            MimeTable::symlink_directory_label().to_string()
        } else if row.is_dir {
            "Directory".to_string()
        } else {
            "File".to_string()
        };
        let size_label = if row.is_dir { "-".to_string() } else { format_size(row.size) };
        html.push_str(&format!(
            "<tr><td><a href=\"{href}\">{name}</a></td><td>{modified}</td><td>{size}</td><td>{kind}</td></tr>\n",
            href = html_escape(&href),
            name = html_escape(&row.name),
            modified = httpdate::fmt_http_date(row.modified),
            size = size_label,
            kind = kind,
        ));
    }

    html.push_str("</table>\n</body>\n</html>\n");
    Ok(html)
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "K", "M", "G"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{}{}", bytes, UNITS[0])
    } else {
        format!("{:.1}{}", size, UNITS[unit])
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

/// Keys the on-disk listing cache by a hash of the full directory path
/// rather than a lossily-stripped rendering of it, so distinct
/// directories whose paths differ only in where a `/` falls (e.g.
/// `sub/a` vs `suba`) never collide onto the same cache file.
fn cache_file_for(cfg: &ServerConfig, dir: &Path) -> std::path::PathBuf {
    let mut hasher = rustc_hash::FxHasher::default();
    dir.hash(&mut hasher);
    cfg.html_cache_dir.join(format!("{:016x}.html", hasher.finish()))
}

/// A directory that cannot be searched/read is a policy rejection (403),
/// not a server failure; anything else renders as 500.
fn map_listing_error(e: std::io::Error) -> ServerError {
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        ServerError::policy(403)
    } else {
        ServerError::Server(format!("failed to render listing: {}", e))
    }
}

/// Serves a directory listing, consulting and refreshing the on-disk
/// cache (if enabled) under the filesystem-visible lock.
pub async fn serve(dir: &Path, url_path: &str, cfg: &ServerConfig) -> Result<Response> {
    if !cfg.html_cache {
        let html = render_html(dir, url_path, cfg.allow_hidden).map_err(map_listing_error)?;
        return Ok(Response::new(200, "OK").with_bytes_chunked("text/html; charset=utf-8", html.into_bytes()));
    }

    let cache_file = cache_file_for(cfg, dir);
    let needs_refresh = match (fs::metadata(&cache_file), fs::metadata(dir)) {
        (Ok(cache_meta), Ok(dir_meta)) => {
            let cache_mtime = cache_meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            let dir_mtime = dir_meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            dir_mtime > cache_mtime
        }
        _ => true,
    };

    if needs_refresh {
        fs::create_dir_all(&cfg.html_cache_dir)
            .map_err(|e| ServerError::Server(format!("failed to create html cache dir: {}", e)))?;
        let lock = DirLock::acquire(&cache_file)
            .await
            .map_err(|e| ServerError::Server(format!("failed to acquire listing lock: {}", e)))?;
        // Re-check under lock: another process may have refreshed it already.
        let still_stale = match (fs::metadata(&cache_file), fs::metadata(dir)) {
            (Ok(cache_meta), Ok(dir_meta)) => {
                dir_meta.modified().unwrap_or(SystemTime::UNIX_EPOCH)
                    > cache_meta.modified().unwrap_or(SystemTime::UNIX_EPOCH)
            }
            _ => true,
        };
        if still_stale {
            let html = render_html(dir, url_path, cfg.allow_hidden).map_err(map_listing_error)?;
            fs::write(&cache_file, html.as_bytes())
                .map_err(|e| ServerError::Server(format!("failed to write listing cache: {}", e)))?;
        }
        drop(lock);
    }

    let bytes = fs::read(&cache_file).map_err(|e| ServerError::Server(format!("failed to read listing cache: {}", e)))?;
    Ok(Response::new(200, "OK").with_bytes("text/html; charset=utf-8", bytes))
}
