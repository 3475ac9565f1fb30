//! Incremental HTTP/1.x request decoder
//!
//! Turns a byte stream into request fragments: one `Head`, zero or more
//! `Body` chunks, then `End`. Only framing is handled here (Content-Length and
//! chunked transfer coding); bodies are passed through untouched.

use bytes::{Buf, Bytes, BytesMut};
use http::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{Method, Version};

use crate::common::{GatewayError, Result};

/// Most headers a request may carry
const MAX_HEADERS: usize = 100;

/// Longest accepted chunk-size or trailer line
const MAX_CHUNK_LINE: usize = 4096;

/// A parsed request line plus headers
#[derive(Debug, Clone, PartialEq)]
pub struct RequestHead {
    /// Request method
    pub method: Method,
    /// Request target exactly as sent
    pub uri: String,
    /// Protocol version
    pub version: Version,
    /// Request headers
    pub headers: HeaderMap,
}

impl RequestHead {
    /// Whether the connection stays open after this request
    ///
    /// HTTP/1.1 defaults to keep-alive, HTTP/1.0 only keeps the connection
    /// when asked to.
    pub fn is_keep_alive(&self) -> bool {
        let tokens = self
            .headers
            .get_all(CONNECTION)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(|token| token.trim().to_ascii_lowercase())
            .collect::<Vec<_>>();

        if tokens.iter().any(|token| token == "close") {
            return false;
        }
        match self.version {
            Version::HTTP_11 => true,
            _ => tokens.iter().any(|token| token == "keep-alive"),
        }
    }

    /// Whether the body uses chunked transfer coding
    pub fn is_chunked(&self) -> bool {
        self.headers
            .get_all(TRANSFER_ENCODING)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .last()
            .map(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
            .unwrap_or(false)
    }

    /// Declared body length
    pub fn content_length(&self) -> Result<Option<u64>> {
        match self.headers.get(CONTENT_LENGTH) {
            None => Ok(None),
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|text| text.trim().parse::<u64>().ok())
                .map(Some)
                .ok_or_else(|| GatewayError::HttpParse(format!("invalid content-length: {:?}", value))),
        }
    }

    /// Serialize the head back to wire format
    pub fn encode(&self) -> Bytes {
        let version = match self.version {
            Version::HTTP_10 => "HTTP/1.0",
            _ => "HTTP/1.1",
        };

        let mut out = BytesMut::with_capacity(256);
        out.extend_from_slice(self.method.as_str().as_bytes());
        out.extend_from_slice(b" ");
        out.extend_from_slice(self.uri.as_bytes());
        out.extend_from_slice(b" ");
        out.extend_from_slice(version.as_bytes());
        out.extend_from_slice(b"\r\n");
        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_str().as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.freeze()
    }
}

/// A decoded piece of an HTTP request
#[derive(Debug, Clone, PartialEq)]
pub enum HttpFragment {
    /// Request line and headers
    Head(RequestHead),
    /// A piece of the request body
    Body(Bytes),
    /// End of the current request
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Head,
    Fixed(u64),
    ChunkSize,
    ChunkData(u64),
    ChunkCrlf,
    Trailers,
    End,
}

/// Incremental request decoder
#[derive(Debug)]
pub struct HttpDecoder {
    buf: BytesMut,
    state: DecodeState,
    max_head_size: usize,
}

impl HttpDecoder {
    /// Create a decoder rejecting heads larger than `max_head_size`
    pub fn new(max_head_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            state: DecodeState::Head,
            max_head_size,
        }
    }

    /// Append bytes read from the connection
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Give up decoding and return the undecoded bytes
    pub fn into_remaining(self) -> Bytes {
        self.buf.freeze()
    }

    /// Decode the next fragment, or `None` when more bytes are needed
    pub fn decode(&mut self) -> Result<Option<HttpFragment>> {
        loop {
            match self.state {
                DecodeState::Head => return self.decode_head(),
                DecodeState::Fixed(remaining) => {
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    let chunk = self.take_body(remaining);
                    let left = remaining - chunk.len() as u64;
                    self.state = if left == 0 { DecodeState::End } else { DecodeState::Fixed(left) };
                    return Ok(Some(HttpFragment::Body(chunk)));
                }
                DecodeState::ChunkSize => {
                    let line = match self.take_line()? {
                        Some(line) => line,
                        None => return Ok(None),
                    };
                    let size = parse_chunk_size(&line)?;
                    self.state = if size == 0 { DecodeState::Trailers } else { DecodeState::ChunkData(size) };
                }
                DecodeState::ChunkData(remaining) => {
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    let chunk = self.take_body(remaining);
                    let left = remaining - chunk.len() as u64;
                    self.state = if left == 0 { DecodeState::ChunkCrlf } else { DecodeState::ChunkData(left) };
                    return Ok(Some(HttpFragment::Body(chunk)));
                }
                DecodeState::ChunkCrlf => {
                    if self.buf.len() < 2 {
                        return Ok(None);
                    }
                    if &self.buf[..2] != b"\r\n" {
                        return Err(GatewayError::HttpParse("missing CRLF after chunk data".to_string()));
                    }
                    self.buf.advance(2);
                    self.state = DecodeState::ChunkSize;
                }
                DecodeState::Trailers => {
                    let line = match self.take_line()? {
                        Some(line) => line,
                        None => return Ok(None),
                    };
                    // Trailer fields are skipped, an empty line ends the message.
                    if line.is_empty() {
                        self.state = DecodeState::End;
                    }
                }
                DecodeState::End => {
                    self.state = DecodeState::Head;
                    return Ok(Some(HttpFragment::End));
                }
            }
        }
    }

    fn decode_head(&mut self) -> Result<Option<HttpFragment>> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut request = httparse::Request::new(&mut headers);
        let consumed = match request.parse(&self.buf) {
            Ok(httparse::Status::Complete(consumed)) => consumed,
            Ok(httparse::Status::Partial) => {
                if self.buf.len() > self.max_head_size {
                    return Err(GatewayError::HttpParse(format!(
                        "request head exceeds {} bytes",
                        self.max_head_size
                    )));
                }
                return Ok(None);
            }
            Err(e) => return Err(GatewayError::HttpParse(e.to_string())),
        };

        if consumed > self.max_head_size {
            return Err(GatewayError::HttpParse(format!(
                "request head exceeds {} bytes",
                self.max_head_size
            )));
        }

        let head = build_head(&request)?;
        self.buf.advance(consumed);

        self.state = if head.is_chunked() {
            DecodeState::ChunkSize
        } else {
            match head.content_length()? {
                Some(0) | None => DecodeState::End,
                Some(length) => DecodeState::Fixed(length),
            }
        };

        Ok(Some(HttpFragment::Head(head)))
    }

    fn take_body(&mut self, remaining: u64) -> Bytes {
        let n = (self.buf.len() as u64).min(remaining) as usize;
        self.buf.split_to(n).freeze()
    }

    fn take_line(&mut self) -> Result<Option<BytesMut>> {
        match self.buf.windows(2).position(|w| w == b"\r\n") {
            Some(end) => {
                let line = self.buf.split_to(end);
                self.buf.advance(2);
                Ok(Some(line))
            }
            None if self.buf.len() > MAX_CHUNK_LINE => {
                Err(GatewayError::HttpParse("chunk line too long".to_string()))
            }
            None => Ok(None),
        }
    }
}

fn build_head(request: &httparse::Request<'_, '_>) -> Result<RequestHead> {
    let method = request
        .method
        .ok_or_else(|| GatewayError::HttpParse("missing method".to_string()))?;
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|e| GatewayError::HttpParse(format!("invalid method: {}", e)))?;

    let uri = request
        .path
        .ok_or_else(|| GatewayError::HttpParse("missing request target".to_string()))?
        .to_string();

    let version = match request.version {
        Some(0) => Version::HTTP_10,
        Some(1) => Version::HTTP_11,
        other => return Err(GatewayError::HttpParse(format!("unsupported HTTP version: {:?}", other))),
    };

    let mut headers = HeaderMap::with_capacity(request.headers.len());
    for header in request.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|e| GatewayError::HttpParse(format!("invalid header name: {}", e)))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|e| GatewayError::HttpParse(format!("invalid header value: {}", e)))?;
        headers.append(name, value);
    }

    Ok(RequestHead { method, uri, version, headers })
}

fn parse_chunk_size(line: &[u8]) -> Result<u64> {
    let text = std::str::from_utf8(line)
        .map_err(|_| GatewayError::HttpParse("chunk size is not ASCII".to_string()))?;
    // Chunk extensions are ignored.
    let size = text.split(';').next().unwrap_or("").trim();
    u64::from_str_radix(size, 16)
        .map_err(|_| GatewayError::HttpParse(format!("invalid chunk size: {:?}", size)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(decoder: &mut HttpDecoder) -> Vec<HttpFragment> {
        let mut out = Vec::new();
        while let Some(fragment) = decoder.decode().unwrap() {
            out.push(fragment);
        }
        out
    }

    fn body_of(fragments: &[HttpFragment]) -> Vec<u8> {
        fragments
            .iter()
            .filter_map(|f| match f {
                HttpFragment::Body(b) => Some(b.to_vec()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn test_request_without_body() {
        let mut decoder = HttpDecoder::new(1024);
        decoder.feed(b"GET /index.html?x=1 HTTP/1.1\r\nHost: example.com\r\n\r\n");
        let fragments = decode_all(&mut decoder);

        assert_eq!(fragments.len(), 2);
        match &fragments[0] {
            HttpFragment::Head(head) => {
                assert_eq!(head.method, Method::GET);
                assert_eq!(head.uri, "/index.html?x=1");
                assert_eq!(head.headers.get("host").unwrap(), "example.com");
                assert!(head.is_keep_alive());
            }
            other => panic!("expected head, got {:?}", other),
        }
        assert_eq!(fragments[1], HttpFragment::End);
        assert!(decoder.into_remaining().is_empty());
    }

    #[test]
    fn test_content_length_body_split_across_feeds() {
        let mut decoder = HttpDecoder::new(1024);
        decoder.feed(b"POST /submit HTTP/1.1\r\nContent-Length: 11\r\n\r\nhello");
        let mut fragments = decode_all(&mut decoder);
        decoder.feed(b" world");
        fragments.extend(decode_all(&mut decoder));

        assert_eq!(body_of(&fragments), b"hello world");
        assert_eq!(fragments.last(), Some(&HttpFragment::End));
    }

    #[test]
    fn test_chunked_body_with_extension_and_trailer() {
        let mut decoder = HttpDecoder::new(1024);
        decoder.feed(b"POST /c HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n");
        decoder.feed(b"5;ext=1\r\nhello\r\n6\r\n world\r\n0\r\nX-Trailer: yes\r\n\r\n");
        let fragments = decode_all(&mut decoder);

        assert_eq!(body_of(&fragments), b"hello world");
        assert_eq!(fragments.last(), Some(&HttpFragment::End));
        assert!(decoder.into_remaining().is_empty());
    }

    #[test]
    fn test_pipelined_requests() {
        let mut decoder = HttpDecoder::new(1024);
        decoder.feed(b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n");
        let heads: Vec<String> = decode_all(&mut decoder)
            .into_iter()
            .filter_map(|f| match f {
                HttpFragment::Head(head) => Some(head.uri),
                _ => None,
            })
            .collect();
        assert_eq!(heads, vec!["/a", "/b"]);
    }

    #[test]
    fn test_partial_head_waits() {
        let mut decoder = HttpDecoder::new(1024);
        decoder.feed(b"GET / HTTP/1.1\r\nHost: a");
        assert!(decoder.decode().unwrap().is_none());
        decoder.feed(b"\r\n\r\n");
        assert!(matches!(decoder.decode().unwrap(), Some(HttpFragment::Head(_))));
    }

    #[test]
    fn test_oversized_head_rejected() {
        let mut decoder = HttpDecoder::new(32);
        decoder.feed(b"GET / HTTP/1.1\r\nX-Padding: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        assert!(matches!(decoder.decode(), Err(GatewayError::HttpParse(_))));
    }

    #[test]
    fn test_malformed_input_rejected() {
        let mut decoder = HttpDecoder::new(1024);
        decoder.feed(b"GET / HTTP/1.1\r\nContent-Length: abc\r\n\r\n");
        assert!(matches!(decoder.decode(), Err(GatewayError::HttpParse(_))));

        let mut decoder = HttpDecoder::new(1024);
        decoder.feed(b"GET / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n");
        assert!(matches!(decoder.decode().unwrap(), Some(HttpFragment::Head(_))));
        assert!(matches!(decoder.decode(), Err(GatewayError::HttpParse(_))));
    }

    #[test]
    fn test_remaining_bytes_after_head() {
        let mut decoder = HttpDecoder::new(1024);
        decoder.feed(b"GET /ws HTTP/1.1\r\nUpgrade: websocket\r\n\r\n\x81\x05hello");
        assert!(matches!(decoder.decode().unwrap(), Some(HttpFragment::Head(_))));
        assert_eq!(&decoder.into_remaining()[..], b"\x81\x05hello");
    }

    #[test]
    fn test_keep_alive_rules() {
        let mut decoder = HttpDecoder::new(1024);
        decoder.feed(b"GET / HTTP/1.0\r\n\r\n");
        let head = match decoder.decode().unwrap() {
            Some(HttpFragment::Head(head)) => head,
            other => panic!("expected head, got {:?}", other),
        };
        assert!(!head.is_keep_alive());

        let mut decoder = HttpDecoder::new(1024);
        decoder.feed(b"GET / HTTP/1.1\r\nConnection: Close\r\n\r\n");
        match decoder.decode().unwrap() {
            Some(HttpFragment::Head(head)) => assert!(!head.is_keep_alive()),
            other => panic!("expected head, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_head() {
        let mut decoder = HttpDecoder::new(1024);
        decoder.feed(b"GET /chat HTTP/1.1\r\nHost: a\r\nUpgrade: websocket\r\n\r\n");
        let head = match decoder.decode().unwrap() {
            Some(HttpFragment::Head(head)) => head,
            other => panic!("expected head, got {:?}", other),
        };
        assert_eq!(
            &head.encode()[..],
            b"GET /chat HTTP/1.1\r\nhost: a\r\nupgrade: websocket\r\n\r\n"
        );
    }
}
