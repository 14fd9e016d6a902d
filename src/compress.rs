use flate2::write::GzEncoder;
use flate2::Compression;
use std::hash::{Hash, Hasher};
use std::io::Write;
use std::path::Path;
use std::time::SystemTime;

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::lock::DirLock;

/// Whether `accept_encoding` (the client's raw header value) lists gzip.
fn accepts_gzip(accept_encoding: Option<&str>) -> bool {
    accept_encoding
        .map(|v| v.split(',').any(|tok| tok.trim().eq_ignore_ascii_case("gzip") || tok.trim().starts_with("gzip;")))
        .unwrap_or(false)
}

fn type_matches(content_type: &str, configured: &[String]) -> bool {
    let base = content_type.split(';').next().unwrap_or(content_type).trim();
    configured.iter().any(|t| t.eq_ignore_ascii_case(base))
}

fn gzip(bytes: &[u8], level: u32) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level));
    encoder.write_all(bytes)?;
    encoder.finish()
}

/// Keys the on-disk gzip cache by a hash of the full file path, avoiding
/// the collisions a lossily-stripped path would produce between distinct
/// files (e.g. `sub/a.html` vs `suba.html`).
fn cache_path_for(cfg: &ServerConfig, file_path: &Path) -> std::path::PathBuf {
    let mut hasher = rustc_hash::FxHasher::default();
    file_path.hash(&mut hasher);
    cfg.html_cache_dir.join(format!("{:016x}.gz", hasher.finish()))
}

/// Applies the optional gzip override to a static file's body. Returns
/// `(bytes, did_compress)`; the caller is responsible for setting
/// `Content-Encoding`/`Vary` and switching to chunked framing when
/// `did_compress` is true.
pub async fn maybe_compress(
    cfg: &ServerConfig,
    file_path: &Path,
    content_type: &str,
    accept_encoding: Option<&str>,
    body: Vec<u8>,
) -> Result<(Vec<u8>, bool)> {
    if !cfg.compress.enable
        || !type_matches(content_type, &cfg.compress.types)
        || (body.len() as u64) < cfg.compress.min_size
        || !accepts_gzip(accept_encoding)
    {
        return Ok((body, false));
    }

    if !cfg.compress.cache {
        let compressed = gzip(&body, cfg.compress.level).map_err(|e| ServerError::Server(e.to_string()))?;
        return Ok((compressed, true));
    }

    std::fs::create_dir_all(&cfg.html_cache_dir).map_err(|e| ServerError::Server(e.to_string()))?;
    let cache_path = cache_path_for(cfg, file_path);
    let source_mtime = std::fs::metadata(file_path)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let fresh = std::fs::metadata(&cache_path)
        .and_then(|m| m.modified())
        .map(|cached_mtime| cached_mtime >= source_mtime)
        .unwrap_or(false);

    if !fresh {
        let lock = DirLock::acquire(&cache_path).await.map_err(|e| ServerError::Server(e.to_string()))?;
        let still_stale = std::fs::metadata(&cache_path)
            .and_then(|m| m.modified())
            .map(|cached_mtime| cached_mtime < source_mtime)
            .unwrap_or(true);
        if still_stale {
            let compressed = gzip(&body, cfg.compress.level).map_err(|e| ServerError::Server(e.to_string()))?;
            std::fs::write(&cache_path, &compressed).map_err(|e| ServerError::Server(e.to_string()))?;
        }
        drop(lock);
    }

    let compressed = std::fs::read(&cache_path).map_err(|e| ServerError::Server(e.to_string()))?;
    Ok((compressed, true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_gzip_in_accept_encoding() {
        assert!(accepts_gzip(Some("gzip, deflate")));
        assert!(accepts_gzip(Some("br, gzip;q=0.8")));
        assert!(!accepts_gzip(Some("br, deflate")));
        assert!(!accepts_gzip(None));
    }

    #[test]
    fn matches_base_content_type_ignoring_charset() {
        let types = vec!["text/html".to_string()];
        assert!(type_matches("text/html; charset=utf-8", &types));
        assert!(!type_matches("image/png", &types));
    }

    #[tokio::test]
    async fn skips_when_below_min_size() {
        let mut cfg = ServerConfig::default();
        cfg.compress.enable = true;
        cfg.compress.min_size = 1_000_000;
        let (bytes, compressed) = maybe_compress(&cfg, Path::new("/tmp/a.html"), "text/html", Some("gzip"), b"hi".to_vec())
            .await
            .unwrap();
        assert!(!compressed);
        assert_eq!(bytes, b"hi");
    }

    #[tokio::test]
    async fn compresses_eligible_body() {
        let mut cfg = ServerConfig::default();
        cfg.compress.enable = true;
        cfg.compress.min_size = 1;
        let body = "x".repeat(100).into_bytes();
        let (bytes, compressed) = maybe_compress(&cfg, Path::new("/tmp/a.html"), "text/html", Some("gzip"), body.clone())
            .await
            .unwrap();
        assert!(compressed);
        assert!(bytes.len() < body.len());
    }
}
