//! End-to-end tests driving a live server over real sockets with a plain
//! blocking client, covering keep-alive, connection close, error responses,
//! and requests split across writes.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sable::net::Reactor;
use sable::{describe_failure, ExecutorPool, Server};

static DIR_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "sable-server-test-{}-{}",
        std::process::id(),
        DIR_COUNTER.fetch_add(1, Ordering::SeqCst)
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Bind a server on an ephemeral port, detach its accept loop, and return
/// the address plus the document root to populate.
fn start_server() -> (SocketAddr, PathBuf) {
    let reactor = Reactor::new().unwrap();
    let executors = Arc::new(ExecutorPool::new(2, Some(2), None));
    let doc_root = scratch_dir();

    let server = Server::bind(&reactor, "127.0.0.1:0", executors.clone(), doc_root.clone())
        .unwrap();
    let addr = server.local_addr().unwrap();

    server.into_task().via(executors.get()).detach(|failure| {
        eprintln!("server task failed: {}", describe_failure(&failure));
    });

    (addr, doc_root)
}

fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

fn send_request(stream: &mut TcpStream, target: &str, extra_headers: &[&str]) {
    let mut request = format!("GET {} HTTP/1.1\r\nHost: test\r\n", target);
    for header in extra_headers {
        request.push_str(header);
        request.push_str("\r\n");
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes()).unwrap();
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Read exactly one response: headers through the blank line, then a body of
/// the advertised Content-Length.
fn read_response(stream: &mut TcpStream) -> (String, Vec<u8>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    let header_end = loop {
        if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).unwrap();
        assert!(n > 0, "connection closed before the header block finished");
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let content_length: usize = head
        .lines()
        .find_map(|line| line.strip_prefix("Content-Length: "))
        .expect("response had no Content-Length")
        .parse()
        .unwrap();

    let mut body = buf[header_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).unwrap();
        assert!(n > 0, "connection closed mid-body");
        body.extend_from_slice(&chunk[..n]);
    }
    assert_eq!(body.len(), content_length);
    (head, body)
}

#[test]
fn serves_file_bytes() {
    let (addr, doc_root) = start_server();
    std::fs::write(doc_root.join("index.html"), b"<h1>served</h1>").unwrap();

    let mut stream = connect(addr);
    send_request(&mut stream, "/index.html", &[]);
    let (head, body) = read_response(&mut stream);

    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("Content-Type: text/html"));
    assert_eq!(body, b"<h1>served</h1>");
}

/// Without `Connection: close` the socket is reused: a second request on the
/// same stream gets its own complete response.
#[test]
fn keep_alive_reuses_the_connection() {
    let (addr, doc_root) = start_server();
    std::fs::write(doc_root.join("a.txt"), b"first").unwrap();
    std::fs::write(doc_root.join("b.txt"), b"second").unwrap();

    let mut stream = connect(addr);

    send_request(&mut stream, "/a.txt", &[]);
    let (head, body) = read_response(&mut stream);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body, b"first");

    send_request(&mut stream, "/b.txt", &[]);
    let (head, body) = read_response(&mut stream);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body, b"second");
}

/// `Connection: close` yields one response and then EOF.
#[test]
fn connection_close_ends_the_session() {
    let (addr, doc_root) = start_server();
    std::fs::write(doc_root.join("one.txt"), b"only").unwrap();

    let mut stream = connect(addr);
    send_request(&mut stream, "/one.txt", &["Connection: close"]);
    let (head, body) = read_response(&mut stream);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body, b"only");

    let mut rest = [0u8; 16];
    let n = stream.read(&mut rest).unwrap();
    assert_eq!(n, 0, "server left the connection open after close");
}

#[test]
fn missing_file_is_404() {
    let (addr, _doc_root) = start_server();

    let mut stream = connect(addr);
    send_request(&mut stream, "/absent.html", &[]);
    let (head, _body) = read_response(&mut stream);
    assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
}

/// Path traversal is rejected even when the target file exists.
#[test]
fn traversal_is_rejected() {
    let (addr, doc_root) = start_server();
    std::fs::write(doc_root.join("b"), b"reachable").unwrap();

    let mut stream = connect(addr);
    send_request(&mut stream, "/a/../b", &[]);
    let (head, _body) = read_response(&mut stream);
    assert!(head.starts_with("HTTP/1.1 400 Bad Request\r\n"));
}

/// A grammar violation gets 400 and the connection is closed regardless of
/// keep-alive.
#[test]
fn malformed_request_is_400_then_eof() {
    let (addr, _doc_root) = start_server();

    let mut stream = connect(addr);
    stream.write_all(b"GET\x01 / HTTP/1.1\r\n\r\n").unwrap();
    let (head, _body) = read_response(&mut stream);
    assert!(head.starts_with("HTTP/1.1 400 Bad Request\r\n"));

    let mut rest = [0u8; 16];
    let n = stream.read(&mut rest).unwrap();
    assert_eq!(n, 0);
}

#[test]
fn directory_path_serves_stock_page() {
    let (addr, _doc_root) = start_server();

    let mut stream = connect(addr);
    send_request(&mut stream, "/", &[]);
    let (head, body) = read_response(&mut stream);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(String::from_utf8(body).unwrap().contains("<h1>Hello</h1>"));
}

/// A request split across two writes produces the same response as a single
/// write: the parser holds its state between reads.
#[test]
fn request_split_across_writes() {
    let (addr, doc_root) = start_server();
    std::fs::write(doc_root.join("split.txt"), b"in pieces").unwrap();

    let mut stream = connect(addr);
    stream.write_all(b"GET /split.txt HTT").unwrap();
    stream.flush().unwrap();
    thread::sleep(Duration::from_millis(50));
    stream.write_all(b"P/1.1\r\nHost: test\r\n\r\n").unwrap();

    let (head, body) = read_response(&mut stream);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body, b"in pieces");
}
