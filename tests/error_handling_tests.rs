mod support;

use httpd::config::ServerConfig;

fn base_config(doc_root: &std::path::Path) -> ServerConfig {
    let mut cfg = ServerConfig::default();
    cfg.doc_root = doc_root.to_path_buf();
    cfg
}

#[tokio::test]
async fn missing_file_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let addr = support::spawn_server(base_config(dir.path())).await;
    let response = support::raw_request(addr, "GET /nope.txt HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n");
    assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 404"));
}

#[tokio::test]
async fn hidden_file_is_403_by_default() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".secret"), b"x").unwrap();
    let addr = support::spawn_server(base_config(dir.path())).await;
    let response = support::raw_request(addr, "GET /.secret HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n");
    assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 403"));
}

#[tokio::test]
async fn missing_host_header_is_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
    let addr = support::spawn_server(base_config(dir.path())).await;
    let response = support::raw_request(addr, "GET /a.txt HTTP/1.1\r\nConnection: close\r\n\r\n");
    assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 400"));
}

#[tokio::test]
async fn http_1_0_is_version_not_supported() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
    let addr = support::spawn_server(base_config(dir.path())).await;
    let response = support::raw_request(addr, "GET /a.txt HTTP/1.0\r\nHost: x\r\nConnection: close\r\n\r\n");
    assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 505"));
}

#[tokio::test]
async fn malformed_request_line_is_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let addr = support::spawn_server(base_config(dir.path())).await;
    let response = support::raw_request(addr, "GET /a.txt\r\nHost: x\r\nConnection: close\r\n\r\n");
    assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 400"));
}

#[tokio::test]
async fn connection_overload_returns_503() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
    let mut cfg = base_config(dir.path());
    cfg.max_conn = 1;
    let addr = support::spawn_server(cfg).await;

    // Hold one connection open without sending a full request so the
    // worker stays alive and the semaphore permit stays taken.
    let _held = support::connect(addr);
    std::thread::sleep(std::time::Duration::from_millis(100));

    let response = support::raw_request(addr, "GET /a.txt HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n");
    assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 503"));
}
