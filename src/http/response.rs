//! Response formatting: fixed status lines, stock bodies, MIME lookup.

use crate::http::request::Header;

const NAME_VALUE_SEPARATOR: &str = ": ";
const CRLF: &str = "\r\n";

/// The status codes this server emits. Anything else is reported as an
/// internal server error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Created,
    Accepted,
    NoContent,
    MultipleChoices,
    MovedPermanently,
    MovedTemporarily,
    NotModified,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    InternalServerError,
    NotImplemented,
    BadGateway,
    ServiceUnavailable,
}

impl Status {
    /// Map a numeric code onto a supported status; unknown codes collapse to
    /// 500.
    pub fn from_code(code: u16) -> Status {
        match code {
            200 => Status::Ok,
            201 => Status::Created,
            202 => Status::Accepted,
            204 => Status::NoContent,
            300 => Status::MultipleChoices,
            301 => Status::MovedPermanently,
            302 => Status::MovedTemporarily,
            304 => Status::NotModified,
            400 => Status::BadRequest,
            401 => Status::Unauthorized,
            403 => Status::Forbidden,
            404 => Status::NotFound,
            500 => Status::InternalServerError,
            501 => Status::NotImplemented,
            502 => Status::BadGateway,
            503 => Status::ServiceUnavailable,
            _ => Status::InternalServerError,
        }
    }

    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::Created => 201,
            Status::Accepted => 202,
            Status::NoContent => 204,
            Status::MultipleChoices => 300,
            Status::MovedPermanently => 301,
            Status::MovedTemporarily => 302,
            Status::NotModified => 304,
            Status::BadRequest => 400,
            Status::Unauthorized => 401,
            Status::Forbidden => 403,
            Status::NotFound => 404,
            Status::InternalServerError => 500,
            Status::NotImplemented => 501,
            Status::BadGateway => 502,
            Status::ServiceUnavailable => 503,
        }
    }

    /// The fixed status line emitted for this status, terminator included.
    pub fn status_line(self) -> &'static str {
        match self {
            Status::Ok => "HTTP/1.1 200 OK\r\n",
            Status::Created => "HTTP/1.1 201 Created\r\n",
            Status::Accepted => "HTTP/1.1 202 Accepted\r\n",
            Status::NoContent => "HTTP/1.1 204 No Content\r\n",
            Status::MultipleChoices => "HTTP/1.1 300 Multiple Choices\r\n",
            Status::MovedPermanently => "HTTP/1.1 301 Moved Permanently\r\n",
            Status::MovedTemporarily => "HTTP/1.1 302 Moved Temporarily\r\n",
            Status::NotModified => "HTTP/1.1 304 Not Modified\r\n",
            Status::BadRequest => "HTTP/1.1 400 Bad Request\r\n",
            Status::Unauthorized => "HTTP/1.1 401 Unauthorized\r\n",
            Status::Forbidden => "HTTP/1.1 403 Forbidden\r\n",
            Status::NotFound => "HTTP/1.1 404 Not Found\r\n",
            Status::InternalServerError => "HTTP/1.1 500 Internal Server Error\r\n",
            Status::NotImplemented => "HTTP/1.1 501 Not Implemented\r\n",
            Status::BadGateway => "HTTP/1.1 502 Bad Gateway\r\n",
            Status::ServiceUnavailable => "HTTP/1.1 503 Service Unavailable\r\n",
        }
    }

    /// The stock HTML page served when a response is built from a bare
    /// status.
    pub fn stock_body(self) -> &'static str {
        match self {
            Status::Ok => {
                "<html><head><title>Hello</title></head><body><h1>Hello</h1></body></html>"
            }
            Status::Created => {
                "<html><head><title>Created</title></head><body><h1>201 Created</h1></body></html>"
            }
            Status::Accepted => {
                "<html><head><title>Accepted</title></head><body><h1>202 Accepted</h1></body></html>"
            }
            Status::NoContent => {
                "<html><head><title>No Content</title></head><body><h1>204 No Content</h1></body></html>"
            }
            Status::MultipleChoices => {
                "<html><head><title>Multiple Choices</title></head><body><h1>300 Multiple Choices</h1></body></html>"
            }
            Status::MovedPermanently => {
                "<html><head><title>Moved Permanently</title></head><body><h1>301 Moved Permanently</h1></body></html>"
            }
            Status::MovedTemporarily => {
                "<html><head><title>Moved Temporarily</title></head><body><h1>302 Moved Temporarily</h1></body></html>"
            }
            Status::NotModified => {
                "<html><head><title>Not Modified</title></head><body><h1>304 Not Modified</h1></body></html>"
            }
            Status::BadRequest => {
                "<html><head><title>Bad Request</title></head><body><h1>400 Bad Request</h1></body></html>"
            }
            Status::Unauthorized => {
                "<html><head><title>Unauthorized</title></head><body><h1>401 Unauthorized</h1></body></html>"
            }
            Status::Forbidden => {
                "<html><head><title>Forbidden</title></head><body><h1>403 Forbidden</h1></body></html>"
            }
            Status::NotFound => {
                "<html><head><title>Not Found</title></head><body><h1>404 Not Found</h1></body></html>"
            }
            Status::InternalServerError => {
                "<html><head><title>Internal Server Error</title></head><body><h1>500 Internal Server Error</h1></body></html>"
            }
            Status::NotImplemented => {
                "<html><head><title>Not Implemented</title></head><body><h1>501 Not Implemented</h1></body></html>"
            }
            Status::BadGateway => {
                "<html><head><title>Bad Gateway</title></head><body><h1>502 Bad Gateway</h1></body></html>"
            }
            Status::ServiceUnavailable => {
                "<html><head><title>Service Unavailable</title></head><body><h1>503 Service Unavailable</h1></body></html>"
            }
        }
    }
}

/// MIME type for a file extension; unknown extensions are served as plain
/// text.
pub fn mime_for_extension(extension: &str) -> &'static str {
    match extension {
        "gif" => "image/gif",
        "htm" => "text/html",
        "html" => "text/html",
        "jpg" => "image/jpeg",
        "png" => "image/png",
        _ => "text/plain",
    }
}

/// An outgoing response: status line, headers, body.
#[derive(Debug)]
pub struct Response {
    status: Status,
    headers: Vec<Header>,
    content: Vec<u8>,
}

impl Response {
    /// A response carrying the status's stock HTML page.
    pub fn stock(status: Status) -> Response {
        Response::with_content(status, status.stock_body().as_bytes().to_vec(), "text/html")
    }

    /// A response carrying `content` tagged with `content_type`.
    pub fn with_content(status: Status, content: Vec<u8>, content_type: &str) -> Response {
        let headers = vec![
            Header {
                name: "Content-Length".to_owned(),
                value: content.len().to_string(),
            },
            Header {
                name: "Content-Type".to_owned(),
                value: content_type.to_owned(),
            },
        ];
        Response {
            status,
            headers,
            content,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Serialize to the wire format: status line, `Name: value` lines, blank
    /// line, body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(64 + self.content.len());
        bytes.extend_from_slice(self.status.status_line().as_bytes());
        for header in &self.headers {
            bytes.extend_from_slice(header.name.as_bytes());
            bytes.extend_from_slice(NAME_VALUE_SEPARATOR.as_bytes());
            bytes.extend_from_slice(header.value.as_bytes());
            bytes.extend_from_slice(CRLF.as_bytes());
        }
        bytes.extend_from_slice(CRLF.as_bytes());
        bytes.extend_from_slice(&self.content);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_lines() {
        assert_eq!(Status::Ok.status_line(), "HTTP/1.1 200 OK\r\n");
        assert_eq!(Status::NotFound.status_line(), "HTTP/1.1 404 Not Found\r\n");
        assert_eq!(
            Status::ServiceUnavailable.status_line(),
            "HTTP/1.1 503 Service Unavailable\r\n"
        );
    }

    /// Unknown numeric codes fall back to the 500 status line.
    #[test]
    fn test_unknown_code_falls_back_to_500() {
        let status = Status::from_code(418);
        assert_eq!(status, Status::InternalServerError);
        assert_eq!(
            status.status_line(),
            "HTTP/1.1 500 Internal Server Error\r\n"
        );
    }

    #[test]
    fn test_code_roundtrip() {
        for code in [200, 201, 202, 204, 300, 301, 302, 304, 400, 401, 403, 404, 500, 501, 502, 503]
        {
            assert_eq!(Status::from_code(code).code(), code);
        }
    }

    #[test]
    fn test_mime_lookup() {
        assert_eq!(mime_for_extension("html"), "text/html");
        assert_eq!(mime_for_extension("png"), "image/png");
        assert_eq!(mime_for_extension("zip"), "text/plain");
        assert_eq!(mime_for_extension(""), "text/plain");
    }

    #[test]
    fn test_serialization_layout() {
        let response = Response::with_content(Status::Ok, b"hi".to_vec(), "text/plain");
        let bytes = response.to_bytes();
        let expected =
            b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nContent-Type: text/plain\r\n\r\nhi";
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_stock_response_has_html_body() {
        let response = Response::stock(Status::BadRequest);
        let text = String::from_utf8(response.to_bytes()).unwrap();
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(text.contains("Content-Type: text/html"));
        assert!(text.ends_with("</html>"));
    }
}
