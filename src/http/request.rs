//! Incremental HTTP request parsing.
//!
//! [`RequestParser`] is a deterministic state machine consuming one byte at a
//! time, so a request may arrive split across any number of reads. State is
//! preserved between calls; [`RequestParser::reset`] is an explicit operation
//! invoked between requests on a kept-alive connection, never implicit.

/// One `name: value` header line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// A parsed request line plus header block. Headers keep their wire order,
/// duplicates included; the parser appends to this incrementally.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: String,
    pub uri: String,
    pub version_major: u32,
    pub version_minor: u32,
    pub headers: Vec<Header>,
}

impl Request {
    /// Clear all parsed state, ready for the next request on the same
    /// connection.
    pub fn clear(&mut self) {
        self.method.clear();
        self.uri.clear();
        self.version_major = 0;
        self.version_minor = 0;
        self.headers.clear();
    }
}

/// Result of feeding bytes to the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseResult {
    /// A full request line and header block has been consumed.
    Complete,
    /// The input violated the request grammar.
    Invalid,
    /// More input is required.
    Partial,
}

#[derive(Debug, Clone, Copy)]
enum State {
    MethodStart,
    Method,
    Uri,
    VersionH,
    VersionT1,
    VersionT2,
    VersionP,
    VersionSlash,
    VersionMajorStart,
    VersionMajor,
    VersionMinorStart,
    VersionMinor,
    RequestLineEnd,
    HeaderLineStart,
    HeaderLws,
    HeaderName,
    SpaceBeforeValue,
    HeaderValue,
    HeaderLineEnd,
    FinalLineEnd,
}

/// Byte-at-a-time request parser.
pub struct RequestParser {
    state: State,
}

impl RequestParser {
    pub fn new() -> Self {
        RequestParser {
            state: State::MethodStart,
        }
    }

    /// Reset to the initial parser state.
    pub fn reset(&mut self) {
        self.state = State::MethodStart;
    }

    /// Feed `input` into the parser, mutating `req` as tokens accumulate.
    ///
    /// Returns the parse result and the number of bytes consumed; on
    /// [`ParseResult::Partial`] the whole input was consumed and the parser
    /// expects the next read to continue where this one stopped.
    pub fn parse(&mut self, req: &mut Request, input: &[u8]) -> (ParseResult, usize) {
        for (index, &byte) in input.iter().enumerate() {
            let result = self.consume(req, byte);
            if result != ParseResult::Partial {
                return (result, index + 1);
            }
        }
        (ParseResult::Partial, input.len())
    }

    fn consume(&mut self, req: &mut Request, input: u8) -> ParseResult {
        match self.state {
            State::MethodStart => {
                if !is_char(input) || is_ctl(input) || is_tspecial(input) {
                    ParseResult::Invalid
                } else {
                    self.state = State::Method;
                    req.method.push(input as char);
                    ParseResult::Partial
                }
            }
            State::Method => {
                if input == b' ' {
                    self.state = State::Uri;
                    ParseResult::Partial
                } else if !is_char(input) || is_ctl(input) || is_tspecial(input) {
                    ParseResult::Invalid
                } else {
                    req.method.push(input as char);
                    ParseResult::Partial
                }
            }
            State::Uri => {
                if input == b' ' {
                    self.state = State::VersionH;
                    ParseResult::Partial
                } else if is_ctl(input) {
                    ParseResult::Invalid
                } else {
                    req.uri.push(input as char);
                    ParseResult::Partial
                }
            }
            State::VersionH => self.expect(input, b'H', State::VersionT1),
            State::VersionT1 => self.expect(input, b'T', State::VersionT2),
            State::VersionT2 => self.expect(input, b'T', State::VersionP),
            State::VersionP => self.expect(input, b'P', State::VersionSlash),
            State::VersionSlash => {
                if input == b'/' {
                    req.version_major = 0;
                    req.version_minor = 0;
                    self.state = State::VersionMajorStart;
                    ParseResult::Partial
                } else {
                    ParseResult::Invalid
                }
            }
            State::VersionMajorStart => {
                if is_digit(input) {
                    req.version_major = accumulate(req.version_major, input);
                    self.state = State::VersionMajor;
                    ParseResult::Partial
                } else {
                    ParseResult::Invalid
                }
            }
            State::VersionMajor => {
                if input == b'.' {
                    self.state = State::VersionMinorStart;
                    ParseResult::Partial
                } else if is_digit(input) {
                    req.version_major = accumulate(req.version_major, input);
                    ParseResult::Partial
                } else {
                    ParseResult::Invalid
                }
            }
            State::VersionMinorStart => {
                if is_digit(input) {
                    req.version_minor = accumulate(req.version_minor, input);
                    self.state = State::VersionMinor;
                    ParseResult::Partial
                } else {
                    ParseResult::Invalid
                }
            }
            State::VersionMinor => {
                if input == b'\r' {
                    self.state = State::RequestLineEnd;
                    ParseResult::Partial
                } else if is_digit(input) {
                    req.version_minor = accumulate(req.version_minor, input);
                    ParseResult::Partial
                } else {
                    ParseResult::Invalid
                }
            }
            State::RequestLineEnd => self.expect(input, b'\n', State::HeaderLineStart),
            State::HeaderLineStart => {
                if input == b'\r' {
                    self.state = State::FinalLineEnd;
                    ParseResult::Partial
                } else if !req.headers.is_empty() && (input == b' ' || input == b'\t') {
                    // Folded continuation of the previous header's value.
                    self.state = State::HeaderLws;
                    ParseResult::Partial
                } else if !is_char(input) || is_ctl(input) || is_tspecial(input) {
                    ParseResult::Invalid
                } else {
                    req.headers.push(Header::default());
                    self.push_to_name(req, input);
                    self.state = State::HeaderName;
                    ParseResult::Partial
                }
            }
            State::HeaderLws => {
                if input == b'\r' {
                    self.state = State::HeaderLineEnd;
                    ParseResult::Partial
                } else if input == b' ' || input == b'\t' {
                    ParseResult::Partial
                } else if is_ctl(input) {
                    ParseResult::Invalid
                } else {
                    self.state = State::HeaderValue;
                    self.push_to_value(req, input);
                    ParseResult::Partial
                }
            }
            State::HeaderName => {
                if input == b':' {
                    self.state = State::SpaceBeforeValue;
                    ParseResult::Partial
                } else if !is_char(input) || is_ctl(input) || is_tspecial(input) {
                    ParseResult::Invalid
                } else {
                    self.push_to_name(req, input);
                    ParseResult::Partial
                }
            }
            State::SpaceBeforeValue => self.expect(input, b' ', State::HeaderValue),
            State::HeaderValue => {
                if input == b'\r' {
                    self.state = State::HeaderLineEnd;
                    ParseResult::Partial
                } else if is_ctl(input) {
                    ParseResult::Invalid
                } else {
                    self.push_to_value(req, input);
                    ParseResult::Partial
                }
            }
            State::HeaderLineEnd => self.expect(input, b'\n', State::HeaderLineStart),
            State::FinalLineEnd => {
                if input == b'\n' {
                    ParseResult::Complete
                } else {
                    ParseResult::Invalid
                }
            }
        }
    }

    fn expect(&mut self, input: u8, wanted: u8, next: State) -> ParseResult {
        if input == wanted {
            self.state = next;
            ParseResult::Partial
        } else {
            ParseResult::Invalid
        }
    }

    fn push_to_name(&mut self, req: &mut Request, input: u8) {
        if let Some(header) = req.headers.last_mut() {
            header.name.push(input as char);
        }
    }

    fn push_to_value(&mut self, req: &mut Request, input: u8) {
        if let Some(header) = req.headers.last_mut() {
            header.value.push(input as char);
        }
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        RequestParser::new()
    }
}

/// Plain ASCII, the only bytes request tokens may carry.
fn is_char(c: u8) -> bool {
    c <= 127
}

/// HTTP control characters.
fn is_ctl(c: u8) -> bool {
    c <= 31 || c == 127
}

/// Separator punctuation forbidden inside tokens.
fn is_tspecial(c: u8) -> bool {
    matches!(
        c,
        b'(' | b')'
            | b'<'
            | b'>'
            | b'@'
            | b','
            | b';'
            | b':'
            | b'\\'
            | b'"'
            | b'/'
            | b'['
            | b']'
            | b'?'
            | b'='
            | b'{'
            | b'}'
            | b' '
            | b'\t'
    )
}

fn is_digit(c: u8) -> bool {
    c.is_ascii_digit()
}

fn accumulate(current: u32, digit: u8) -> u32 {
    current
        .wrapping_mul(10)
        .wrapping_add(u32::from(digit - b'0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANONICAL: &[u8] = b"GET /index.html HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n";

    fn parse_whole(input: &[u8]) -> (ParseResult, Request) {
        let mut parser = RequestParser::new();
        let mut req = Request::default();
        let (result, _) = parser.parse(&mut req, input);
        (result, req)
    }

    fn parse_byte_at_a_time(input: &[u8]) -> (ParseResult, Request) {
        let mut parser = RequestParser::new();
        let mut req = Request::default();
        for &byte in input {
            let (result, _) = parser.parse(&mut req, &[byte]);
            if result != ParseResult::Partial {
                return (result, req);
            }
        }
        (ParseResult::Partial, req)
    }

    fn assert_same_parse(whole: &(ParseResult, Request), chunked: &(ParseResult, Request)) {
        assert_eq!(whole.0, chunked.0);
        assert_eq!(whole.1.method, chunked.1.method);
        assert_eq!(whole.1.uri, chunked.1.uri);
        assert_eq!(whole.1.version_major, chunked.1.version_major);
        assert_eq!(whole.1.version_minor, chunked.1.version_minor);
        assert_eq!(whole.1.headers, chunked.1.headers);
    }

    #[test]
    fn test_canonical_request() {
        let (result, req) = parse_whole(CANONICAL);
        assert_eq!(result, ParseResult::Complete);
        assert_eq!(req.method, "GET");
        assert_eq!(req.uri, "/index.html");
        assert_eq!(req.version_major, 1);
        assert_eq!(req.version_minor, 1);
        assert_eq!(req.headers.len(), 2);
        assert_eq!(req.headers[0].name, "Host");
        assert_eq!(req.headers[0].value, "x");
        assert_eq!(req.headers[1].name, "Connection");
        assert_eq!(req.headers[1].value, "close");
    }

    /// Feeding bytes one at a time must produce exactly the same result and
    /// request as one whole-buffer parse.
    #[test]
    fn test_streaming_invariance() {
        let inputs: [&[u8]; 4] = [
            CANONICAL,
            b"POST /submit HTTP/1.0\r\nContent-Length: 0\r\n\r\n",
            b"GET /x HTTP/12.34\r\n\r\n",
            b"BAD\x01REQUEST",
        ];
        for input in inputs {
            let whole = parse_whole(input);
            let chunked = parse_byte_at_a_time(input);
            assert_same_parse(&whole, &chunked);
        }
    }

    /// A stream split mid-header stays partial, then completes with the same
    /// request a single read would have produced.
    #[test]
    fn test_split_across_reads() {
        let (first, second) = CANONICAL.split_at(30);
        let mut parser = RequestParser::new();
        let mut req = Request::default();

        let (result, consumed) = parser.parse(&mut req, first);
        assert_eq!(result, ParseResult::Partial);
        assert_eq!(consumed, first.len());

        let (result, _) = parser.parse(&mut req, second);
        assert_eq!(result, ParseResult::Complete);

        let (_, whole) = parse_whole(CANONICAL);
        assert_eq!(req.headers, whole.headers);
        assert_eq!(req.uri, whole.uri);
    }

    #[test]
    fn test_rejects_forbidden_token_bytes() {
        let (result, _) = parse_whole(b"G(T / HTTP/1.1\r\n\r\n");
        assert_eq!(result, ParseResult::Invalid);

        let (result, _) = parse_whole(b"GET /ok HTTP/1.1\r\nBad\x7fName: v\r\n\r\n");
        assert_eq!(result, ParseResult::Invalid);

        // Control byte inside the URI.
        let (result, _) = parse_whole(b"GET /\x02 HTTP/1.1\r\n\r\n");
        assert_eq!(result, ParseResult::Invalid);
    }

    #[test]
    fn test_rejects_malformed_version() {
        let (result, _) = parse_whole(b"GET / HTTPS/1.1\r\n\r\n");
        assert_eq!(result, ParseResult::Invalid);

        let (result, _) = parse_whole(b"GET / HTTP/x.1\r\n\r\n");
        assert_eq!(result, ParseResult::Invalid);
    }

    #[test]
    fn test_multidigit_version() {
        let (result, req) = parse_whole(b"GET / HTTP/10.12\r\n\r\n");
        assert_eq!(result, ParseResult::Complete);
        assert_eq!(req.version_major, 10);
        assert_eq!(req.version_minor, 12);
    }

    /// Duplicate headers are kept, in wire order.
    #[test]
    fn test_duplicate_headers_preserved() {
        let (result, req) =
            parse_whole(b"GET / HTTP/1.1\r\nX: 1\r\nY: 2\r\nX: 3\r\n\r\n");
        assert_eq!(result, ParseResult::Complete);
        let names: Vec<&str> = req.headers.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, ["X", "Y", "X"]);
        assert_eq!(req.headers[2].value, "3");
    }

    /// A line starting with whitespace folds into the previous header value.
    #[test]
    fn test_folded_header_value() {
        let (result, req) =
            parse_whole(b"GET / HTTP/1.1\r\nX: one\r\n  two\r\n\r\n");
        assert_eq!(result, ParseResult::Complete);
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.headers[0].value, "onetwo");
    }

    /// Completion reports how much of the buffer was consumed, so pipelined
    /// bytes after the blank line are left for the caller.
    #[test]
    fn test_consumed_count_stops_at_completion() {
        let mut input = CANONICAL.to_vec();
        input.extend_from_slice(b"GET /next HTTP/1.1\r\n");

        let mut parser = RequestParser::new();
        let mut req = Request::default();
        let (result, consumed) = parser.parse(&mut req, &input);
        assert_eq!(result, ParseResult::Complete);
        assert_eq!(consumed, CANONICAL.len());
    }

    /// Reset is explicit: without it the parser stays in its terminal state,
    /// with it the same parser handles the next request.
    #[test]
    fn test_reset_between_requests() {
        let mut parser = RequestParser::new();
        let mut req = Request::default();
        let (result, _) = parser.parse(&mut req, CANONICAL);
        assert_eq!(result, ParseResult::Complete);

        parser.reset();
        req.clear();
        let (result, _) = parser.parse(&mut req, b"GET /two HTTP/1.1\r\n\r\n");
        assert_eq!(result, ParseResult::Complete);
        assert_eq!(req.uri, "/two");
        assert_eq!(req.headers.len(), 0);
    }
}
