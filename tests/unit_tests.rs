use httpd::mime::MimeTable;
use std::path::Path;

#[test]
fn html_mime_types() {
    let mime = MimeTable::new();
    assert_eq!(mime.lookup(Path::new("index.html")), "text/html; charset=utf-8");
    assert_eq!(mime.lookup(Path::new("page.htm")), "text/html; charset=utf-8");
    assert_eq!(mime.lookup(Path::new("INDEX.HTML")), "text/html; charset=utf-8");
}

#[test]
fn css_and_js_mime_types() {
    let mime = MimeTable::new();
    assert_eq!(mime.lookup(Path::new("style.css")), "text/css; charset=utf-8");
    assert_eq!(mime.lookup(Path::new("STYLE.CSS")), "text/css; charset=utf-8");
    assert_eq!(mime.lookup(Path::new("app.js")), "text/javascript; charset=utf-8");
}

#[test]
fn image_mime_types() {
    let mime = MimeTable::new();
    assert_eq!(mime.lookup(Path::new("image.png")), "image/png");
    assert_eq!(mime.lookup(Path::new("photo.jpg")), "image/jpeg");
    assert_eq!(mime.lookup(Path::new("photo.jpeg")), "image/jpeg");
    assert_eq!(mime.lookup(Path::new("icon.gif")), "image/gif");
    assert_eq!(mime.lookup(Path::new("logo.svg")), "image/svg+xml");
    assert_eq!(mime.lookup(Path::new("favicon.ico")), "image/x-icon");
}

#[test]
fn font_mime_types() {
    let mime = MimeTable::new();
    assert_eq!(mime.lookup(Path::new("font.woff")), "font/woff");
    assert_eq!(mime.lookup(Path::new("font.woff2")), "font/woff2");
    assert_eq!(mime.lookup(Path::new("font.ttf")), "font/ttf");
}

#[test]
fn no_extension_or_unknown_extension_falls_back_to_octet_stream() {
    let mime = MimeTable::new();
    assert_eq!(mime.lookup(Path::new("Dockerfile")), "application/octet-stream");
    assert_eq!(mime.lookup(Path::new("file.unknown")), "application/octet-stream");
}

#[test]
fn path_with_directories_uses_final_component_extension() {
    let mime = MimeTable::new();
    assert_eq!(mime.lookup(Path::new("/css/main.css")), "text/css; charset=utf-8");
    assert_eq!(mime.lookup(Path::new("/images/logo.png")), "image/png");
}

#[test]
fn mime_overrides_replace_builtin_entries() {
    let mut overrides = std::collections::HashMap::new();
    overrides.insert("html".to_string(), "text/x-custom-html".to_string());
    let mime = MimeTable::with_overrides(&overrides);
    assert_eq!(mime.lookup(Path::new("index.html")), "text/x-custom-html");
}
