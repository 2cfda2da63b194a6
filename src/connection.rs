//! Per-connection request handling.
//!
//! A [`Connection`] owns one accepted socket and drives its read → parse →
//! respond cycle as a single task. The cycle is strictly sequential; nothing
//! here is touched by more than one thread at a time.

use std::fs;
use std::path::{Path, PathBuf};

use crate::awaitable::{read_some, write_all};
use crate::http::response::mime_for_extension;
use crate::http::{ParseResult, Request, RequestParser, Response, Status};
use crate::net::TcpStream;

/// Fixed read buffer size per connection.
const READ_BUFFER_SIZE: usize = 1024;

pub struct Connection {
    stream: TcpStream,
    doc_root: PathBuf,
    parser: RequestParser,
    request: Request,
}

impl Connection {
    pub fn new(stream: TcpStream, doc_root: PathBuf) -> Self {
        Connection {
            stream,
            doc_root,
            parser: RequestParser::new(),
            request: Request::default(),
        }
    }

    /// Serve requests on this socket until the peer goes away, a request
    /// fails to parse, or keep-alive ends. I/O errors terminate the loop;
    /// the socket is shut down when the connection drops.
    pub async fn run(mut self) {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            let n = match read_some(&mut self.stream, &mut buf).await {
                Ok(0) => {
                    log::debug!("peer closed the connection");
                    break;
                }
                Ok(n) => n,
                Err(err) => {
                    log::debug!("read failed: {}", err);
                    break;
                }
            };

            let (result, _) = self.parser.parse(&mut self.request, &buf[..n]);
            match result {
                ParseResult::Complete => {
                    let response = handle_request(&self.request, &self.doc_root);
                    if let Err(err) = write_all(&mut self.stream, &response.to_bytes()).await {
                        log::debug!("write failed: {}", err);
                        break;
                    }
                    if !is_keep_alive(&self.request) {
                        break;
                    }
                    self.request.clear();
                    self.parser.reset();
                }
                ParseResult::Invalid => {
                    let response = Response::stock(Status::BadRequest);
                    if let Err(err) = write_all(&mut self.stream, &response.to_bytes()).await {
                        log::debug!("write failed: {}", err);
                    }
                    break;
                }
                ParseResult::Partial => continue,
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = self.stream.shutdown();
    }
}

/// Build the response for one parsed request: decode the path, guard against
/// traversal, and serve either the stock page or a file under the document
/// root.
fn handle_request(request: &Request, doc_root: &Path) -> Response {
    let path = match decode_url(&request.uri) {
        Some(path) => path,
        None => return Response::stock(Status::BadRequest),
    };

    // Only absolute paths, and never ones that climb out of the root.
    if path.is_empty() || !path.starts_with('/') || path.contains("..") {
        return Response::stock(Status::BadRequest);
    }

    if path.ends_with('/') {
        return Response::stock(Status::Ok);
    }

    let extension = extension_of(&path);
    let full_path = doc_root.join(&path[1..]);
    match fs::read(&full_path) {
        Ok(content) => Response::with_content(Status::Ok, content, mime_for_extension(extension)),
        Err(_) => Response::stock(Status::NotFound),
    }
}

/// The extension after the final dot, provided the dot falls inside the last
/// path segment.
fn extension_of(path: &str) -> &str {
    match (path.rfind('.'), path.rfind('/')) {
        (Some(dot), Some(slash)) if dot > slash => &path[dot + 1..],
        (Some(dot), None) => &path[dot + 1..],
        _ => "",
    }
}

/// Percent-decode a request target. `%XX` decodes to a byte and `+` to a
/// space; a truncated escape fails the request, while a malformed hex pair
/// drops the `%` and keeps the pair as literals.
fn decode_url(input: &str) -> Option<String> {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '%' => {
                if i + 3 <= chars.len() {
                    let hex: String = chars[i + 1..i + 3].iter().collect();
                    if let Ok(value) = u8::from_str_radix(&hex, 16) {
                        out.push(value as char);
                        i += 2;
                    }
                } else {
                    return None;
                }
            }
            '+' => out.push(' '),
            c => out.push(c),
        }
        i += 1;
    }
    Some(out)
}

/// The connection stays alive unless a header named `Connection` carries the
/// value `close`. The match is deliberately exact.
fn is_keep_alive(request: &Request) -> bool {
    !request
        .headers
        .iter()
        .any(|header| header.name == "Connection" && header.value == "close")
}
