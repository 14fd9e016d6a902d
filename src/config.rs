use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Policy knobs for the optional CGI override hook.
#[derive(Debug, Clone)]
pub struct CgiConfig {
    pub enable: bool,
    pub extensions: Vec<String>,
    pub timeout_s: u64,
}

impl Default for CgiConfig {
    fn default() -> Self {
        Self {
            enable: false,
            extensions: Vec::new(),
            timeout_s: 300,
        }
    }
}

/// Policy knobs for the optional gzip override hook.
#[derive(Debug, Clone)]
pub struct CompressConfig {
    pub enable: bool,
    pub types: Vec<String>,
    pub level: u32,
    pub min_size: u64,
    pub cache: bool,
}

impl Default for CompressConfig {
    fn default() -> Self {
        Self {
            enable: false,
            types: vec!["text/html".into(), "text/css".into(), "text/plain".into(), "application/javascript".into()],
            level: 6,
            min_size: 1024,
            cache: false,
        }
    }
}

/// Immutable, validated server settings. Shared via `Arc` and swapped
/// wholesale on reload so in-flight requests keep using the snapshot they
/// started with.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub max_conn: usize,
    pub keep_alive: bool,
    pub idle_timeout_s: u64,
    pub recv_timeout_s: u64,
    pub max_body_bytes: u64,
    pub http_cache: bool,
    pub http_cache_age_s: u64,
    pub index_filename: String,
    pub allow_hidden: bool,
    pub follow_symlinks: bool,
    pub html_cache: bool,
    pub html_cache_dir: PathBuf,
    pub doc_root: PathBuf,
    pub server_software: String,
    pub server_addr: String,
    pub cgi: CgiConfig,
    pub compress: CompressConfig,
    pub log_file: String,
    pub mime_overrides: HashMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            max_conn: 12,
            keep_alive: true,
            idle_timeout_s: 30,
            recv_timeout_s: 5,
            max_body_bytes: 16384,
            http_cache: false,
            http_cache_age_s: 200,
            index_filename: "index.html".into(),
            allow_hidden: false,
            follow_symlinks: false,
            html_cache: false,
            html_cache_dir: std::env::temp_dir().join(format!("httpd-{}", std::process::id())),
            doc_root: PathBuf::from("."),
            server_software: format!("httpd/{}", env!("CARGO_PKG_VERSION")),
            server_addr: "127.0.0.1".into(),
            cgi: CgiConfig::default(),
            compress: CompressConfig::default(),
            log_file: "/dev/null".into(),
            mime_overrides: HashMap::new(),
        }
    }
}

impl ServerConfig {
    /// Loads a `KEY=value` config file, layering it onto defaults.
    ///
    /// `path` being absent is only tolerated when `required` is false (the
    /// implicit default config path); an explicitly named, missing or
    /// unparsable file is always fatal.
    pub fn load(path: Option<&Path>, required: bool) -> Result<Self> {
        let mut cfg = ServerConfig::default();
        if let Some(detected) = detect_local_ip() {
            cfg.server_addr = detected;
        }

        let contents = match path {
            Some(p) => match std::fs::read_to_string(p) {
                Ok(s) => Some(s),
                Err(e) if !required => {
                    let _ = e;
                    None
                }
                Err(e) => return Err(e).with_context(|| format!("reading config file {}", p.display())),
            },
            None => None,
        };

        let Some(contents) = contents else {
            return Ok(cfg);
        };

        let mut errors = Vec::new();
        for (lineno, raw_line) in contents.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                errors.push(format!("line {}: missing '=' in {:?}", lineno + 1, raw_line));
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            if let Some(ext) = key.strip_prefix("MIME.") {
                cfg.mime_overrides.insert(ext.to_ascii_lowercase(), value.to_string());
                continue;
            }
            if let Err(e) = apply_key(&mut cfg, key, value) {
                errors.push(format!("line {}: {}", lineno + 1, e));
            }
        }

        if !errors.is_empty() {
            bail!("invalid configuration:\n{}", errors.join("\n"));
        }

        Ok(cfg)
    }

    /// Re-reads `path` and returns a fresh, independently validated config.
    /// Not wired to a signal by the minimal CLI, but callers holding a
    /// `Mutex<Arc<ServerConfig>>` can swap in the result so in-flight
    /// requests keep using the `Arc` snapshot they started with.
    pub fn reload(path: &Path) -> Result<Self> {
        Self::load(Some(path), true)
    }

    pub fn apply_cli(&mut self, port: Option<u16>, doc_root: Option<PathBuf>, verbose: bool) -> Result<()> {
        if let Some(p) = port {
            self.port = p;
        }
        if let Some(root) = doc_root {
            self.doc_root = root;
        }
        self.doc_root = self
            .doc_root
            .canonicalize()
            .with_context(|| format!("document root {} does not exist", self.doc_root.display()))?;
        if verbose {
            self.log_file = "-".into();
        }
        Ok(())
    }
}

/// Best-effort local-address detection for the `server_addr` default.
/// Connecting a UDP socket does not send any packets; it only asks the
/// kernel which local interface would carry traffic to the given
/// destination, which is enough to pick a sensible non-loopback default
/// without any extra dependency. Falls back to the `127.0.0.1` already set
/// by `ServerConfig::default` if the host has no route (e.g. a sandboxed
/// build); `SERVER_ADDR=` in the config file always overrides whatever
/// this picks.
fn detect_local_ip() -> Option<String> {
    use std::net::UdpSocket;
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip().to_string())
}

fn parse_bool(key: &str, value: &str) -> Result<bool, String> {
    match value {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(format!("{} must be 0 or 1, got {:?}", key, value)),
    }
}

fn parse_u64(key: &str, value: &str) -> Result<u64, String> {
    value
        .parse::<u64>()
        .map_err(|_| format!("{} must be a non-negative integer, got {:?}", key, value))
}

fn apply_key(cfg: &mut ServerConfig, key: &str, value: &str) -> Result<(), String> {
    match key {
        "MAX_CONN" => cfg.max_conn = parse_u64(key, value)? as usize,
        "PORT" => {
            cfg.port = value
                .parse::<u16>()
                .map_err(|_| format!("PORT must be a 16-bit port number, got {:?}", value))?
        }
        "HTTP_KEEP_ALIVE" => cfg.keep_alive = parse_bool(key, value)?,
        "HTTP_TIMEOUT" => cfg.idle_timeout_s = parse_u64(key, value)?,
        "HTTP_RECV_TIMEOUT" => cfg.recv_timeout_s = parse_u64(key, value)?,
        "HTTP_BODY_SIZE" => cfg.max_body_bytes = parse_u64(key, value)?,
        "HTTP_CACHE" => cfg.http_cache = parse_bool(key, value)?,
        "HTTP_CACHE_AGE" => cfg.http_cache_age_s = parse_u64(key, value)?,
        "INDEX_FILE" => cfg.index_filename = value.to_string(),
        "HIDDEN_FILES" => cfg.allow_hidden = parse_bool(key, value)?,
        "FOLLOW_SYMLINKS" => cfg.follow_symlinks = parse_bool(key, value)?,
        "HTML_CACHE" => cfg.html_cache = parse_bool(key, value)?,
        "HTML_CACHE_DIR" => cfg.html_cache_dir = PathBuf::from(value),
        "LOG_FILE" => cfg.log_file = value.to_string(),
        "SERVER_ADDR" => cfg.server_addr = value.to_string(),
        "CGI_ENABLE" => cfg.cgi.enable = parse_bool(key, value)?,
        "CGI_EXTS" => cfg.cgi.extensions = value.split(',').map(|s| s.trim().to_string()).collect(),
        "CGI_TIMEOUT" => cfg.cgi.timeout_s = parse_u64(key, value)?,
        "COMPRESS" => cfg.compress.enable = parse_bool(key, value)?,
        "COMPRESS_TYPES" => cfg.compress.types = value.split(',').map(|s| s.trim().to_string()).collect(),
        "COMPRESS_LEVEL" => cfg.compress.level = parse_u64(key, value)? as u32,
        "COMPRESS_MIN_SIZE" => cfg.compress.min_size = parse_u64(key, value)?,
        "COMPRESS_CACHE" => cfg.compress.cache = parse_bool(key, value)?,
        _ => return Err(format!("unknown configuration key {:?}", key)),
    }
    Ok(())
}
