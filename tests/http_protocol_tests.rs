mod support;

use httpd::config::ServerConfig;

fn base_config(doc_root: &std::path::Path) -> ServerConfig {
    let mut cfg = ServerConfig::default();
    cfg.doc_root = doc_root.to_path_buf();
    cfg
}

#[tokio::test]
async fn repeated_spaces_in_request_line_are_tolerated() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"hi").unwrap();
    let addr = support::spawn_server(base_config(dir.path())).await;

    let response = support::raw_request(addr, "GET  /a.txt  HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n");
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 200"));
}

#[tokio::test]
async fn truly_malformed_request_line_is_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let addr = support::spawn_server(base_config(dir.path())).await;

    let response = support::raw_request(addr, "INVALID REQUEST\r\nHost: x\r\nConnection: close\r\n\r\n");
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 400"));
}

#[tokio::test]
async fn chunked_request_body_is_reassembled() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = base_config(dir.path());
    cfg.cgi.enable = true;
    cfg.cgi.extensions = vec!["sh".into()];
    let script = dir.path().join("echo.sh");
    std::fs::write(&script, "#!/bin/sh\nprintf 'Content-Type: text/plain\\r\\n\\r\\n'\ncat\n").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    let addr = support::spawn_server(cfg).await;

    let request = concat!(
        "POST /echo.sh HTTP/1.1\r\n",
        "Host: x\r\n",
        "Transfer-Encoding: chunked\r\n",
        "Connection: close\r\n",
        "\r\n",
        "5\r\nhello\r\n",
        "6\r\n world\r\n",
        "0\r\n\r\n",
    );
    let response = support::raw_request(addr, request);
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 200"));
    assert!(text.contains("hello world"));
}

#[tokio::test]
async fn connection_close_header_prevents_reuse() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"hi").unwrap();
    let addr = support::spawn_server(base_config(dir.path())).await;

    let mut stream = support::connect(addr);
    use std::io::{Read, Write};
    stream.write_all(b"GET /a.txt HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").unwrap();
    let (status, _) = support::read_response_head(&mut stream);
    assert_eq!(status, 200);

    // The server must have closed its write half; a further read returns EOF.
    let mut buf = [0u8; 16];
    let n = stream.read(&mut buf).unwrap_or(0);
    assert_eq!(n, 0);
}

#[tokio::test]
async fn default_keep_alive_allows_pipelined_requests() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"hi").unwrap();
    let addr = support::spawn_server(base_config(dir.path())).await;

    let mut stream = support::connect(addr);
    use std::io::Write;
    stream.write_all(b"GET /a.txt HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
    let (status1, _) = support::read_response_head(&mut stream);
    assert_eq!(status1, 200);

    stream.write_all(b"GET /a.txt HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").unwrap();
    let (status2, _) = support::read_response_head(&mut stream);
    assert_eq!(status2, 200);
}

#[tokio::test]
async fn idle_connection_with_no_bytes_closes_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = base_config(dir.path());
    cfg.idle_timeout_s = 1;
    let addr = support::spawn_server(cfg).await;

    let mut stream = support::connect(addr);
    use std::io::Read;
    let mut buf = [0u8; 16];
    let n = stream.read(&mut buf).unwrap_or(0);
    assert_eq!(n, 0);
}
