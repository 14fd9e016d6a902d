use rustc_hash::FxHashMap;
use std::path::Path;

/// Extension-indexed MIME lookup. Built-ins are layered with
/// configuration overrides (`MIME.<ext>=<type>` lines) at startup; lookup
/// never allocates beyond the returned `String` clone.
#[derive(Debug, Clone)]
pub struct MimeTable {
    entries: FxHashMap<String, String>,
    default: String,
}

impl MimeTable {
    pub fn new() -> Self {
        let mut entries = FxHashMap::default();
        for (ext, mime) in BUILTIN {
            entries.insert((*ext).to_string(), (*mime).to_string());
        }
        Self {
            entries,
            default: "application/octet-stream".to_string(),
        }
    }

    pub fn with_overrides(overrides: &std::collections::HashMap<String, String>) -> Self {
        let mut table = Self::new();
        for (ext, mime) in overrides {
            table.entries.insert(ext.to_ascii_lowercase(), mime.clone());
        }
        table
    }

    /// Resolve the MIME type for a path: table entry by extension, else
    /// the table's default, else octet-stream. The extension is everything
    /// after the first remaining `.`, so `archive.tar.gz` looks up
    /// `tar.gz` rather than just `gz`.
    pub fn lookup(&self, path: &Path) -> String {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return self.default.clone();
        };
        let name = name.to_ascii_lowercase();
        let name = name.strip_prefix('.').unwrap_or(&name);
        match name.find('.') {
            Some(pos) if pos + 1 < name.len() => {
                let ext = &name[pos + 1..];
                self.entries.get(ext).cloned().unwrap_or_else(|| self.default.clone())
            }
            _ => self.default.clone(),
        }
    }

    pub fn symlink_directory_label() -> &'static str {
        "symbolic link->Directory"
    }
}

impl Default for MimeTable {
    fn default() -> Self {
        Self::new()
    }
}

const BUILTIN: &[(&str, &str)] = &[
    ("html", "text/html; charset=utf-8"),
    ("htm", "text/html; charset=utf-8"),
    ("css", "text/css; charset=utf-8"),
    ("js", "text/javascript; charset=utf-8"),
    ("json", "application/json; charset=utf-8"),
    ("xml", "application/xml; charset=utf-8"),
    ("txt", "text/plain; charset=utf-8"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
    ("ico", "image/x-icon"),
    ("pdf", "application/pdf"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("ttf", "font/ttf"),
    ("eot", "application/vnd.ms-fontobject"),
    ("php", "application/x-httpd-php"),
];
