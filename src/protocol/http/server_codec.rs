//! Server-side HTTP codec: request parsing and response encoding

use super::{Headers, HttpRequest, HttpResponse, Method, StatusCode, content_types, names};
use bytes::{Buf, BytesMut};
use std::str::{self, FromStr};

pub(super) const HTTP_VERSION: &str = "HTTP/1.1";
pub(super) const EVENT_VERSION: &str = "EVENT/1.0";

/// Errors during HTTP parsing
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid request line: {0}")]
    InvalidRequestLine(String),

    #[error("Invalid method: {0}")]
    InvalidMethod(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid Content-Length: {0}")]
    InvalidContentLength(String),

    #[error("Body too large: {size} > {max}")]
    BodyTooLarge { size: usize, max: usize },

    #[error("Invalid UTF-8 in headers")]
    InvalidUtf8,
}

/// Maximum allowed request body
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Maximum header section size (64 KB)
const MAX_HEADER_SIZE: usize = 64 * 1024;

/// Server-side HTTP codec
///
/// Sans-IO: `feed()` appends decrypted bytes, `decode()` yields complete
/// requests as they become available.
pub struct HttpServerCodec {
    buffer: BytesMut,
}

impl HttpServerCodec {
    /// Create a new server codec
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Feed bytes into the internal buffer
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Get current buffer length
    #[must_use]
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Remove and return unparsed bytes
    ///
    /// Used when the transport switches to encrypted framing: anything the
    /// controller pipelined after the last plaintext request is ciphertext.
    pub fn take_buffer(&mut self) -> Vec<u8> {
        self.buffer.split().to_vec()
    }

    /// Attempt to decode a complete request
    ///
    /// Returns `Ok(None)` if more data is needed.
    ///
    /// # Errors
    /// Returns `ParseError` if the request is malformed.
    pub fn decode(&mut self) -> Result<Option<HttpRequest>, ParseError> {
        let Some(header_end) = find_header_end(&self.buffer) else {
            if self.buffer.len() > MAX_HEADER_SIZE {
                return Err(ParseError::InvalidHeader("Headers too large".into()));
            }
            return Ok(None);
        };

        let header_str =
            str::from_utf8(&self.buffer[..header_end]).map_err(|_| ParseError::InvalidUtf8)?;
        let (method, uri, headers) = parse_request_head(header_str)?;

        let content_length = match headers.get(names::CONTENT_LENGTH) {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .map_err(|_| ParseError::InvalidContentLength(v.to_string()))?,
            None => 0,
        };
        if content_length > MAX_BODY_SIZE {
            return Err(ParseError::BodyTooLarge {
                size: content_length,
                max: MAX_BODY_SIZE,
            });
        }

        if self.buffer.len() < header_end + 4 + content_length {
            return Ok(None);
        }

        self.buffer.advance(header_end + 4);
        let body = self.buffer.split_to(content_length).to_vec();

        Ok(Some(HttpRequest {
            method,
            uri,
            headers,
            body,
        }))
    }
}

impl Default for HttpServerCodec {
    fn default() -> Self {
        Self::new()
    }
}

pub(super) fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

pub(super) fn parse_header_lines<'a>(
    lines: impl Iterator<Item = &'a str>,
) -> Result<Headers, ParseError> {
    let mut headers = Headers::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ParseError::InvalidHeader(line.to_string()))?;
        headers.insert(name.trim(), value.trim());
    }
    Ok(headers)
}

fn parse_request_head(header_str: &str) -> Result<(Method, String, Headers), ParseError> {
    let mut lines = header_str.split("\r\n");

    let request_line = lines
        .next()
        .filter(|l| !l.is_empty())
        .ok_or_else(|| ParseError::InvalidRequestLine("Empty request".into()))?;

    let parts: Vec<&str> = request_line.split_whitespace().collect();
    let [method, uri, version] = parts.as_slice() else {
        return Err(ParseError::InvalidRequestLine(request_line.to_string()));
    };

    let method =
        Method::from_str(method).map_err(|()| ParseError::InvalidMethod((*method).to_string()))?;
    if !version.starts_with("HTTP/") {
        return Err(ParseError::InvalidRequestLine(format!(
            "Invalid protocol: {version}"
        )));
    }

    Ok((method, (*uri).to_string(), parse_header_lines(lines)?))
}

/// Builder for HTTP responses and event notifications
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    version: &'static str,
    status: StatusCode,
    headers: Headers,
    body: Vec<u8>,
}

impl ResponseBuilder {
    /// Create a new response builder with the given status
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            version: HTTP_VERSION,
            status,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Create an OK (200) response
    #[must_use]
    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    /// Create an `EVENT/1.0 200 OK` notification
    #[must_use]
    pub fn event() -> Self {
        Self {
            version: EVENT_VERSION,
            ..Self::ok()
        }
    }

    /// Add a custom header
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set a TLV8 pairing body
    #[must_use]
    pub fn tlv_body(self, body: Vec<u8>) -> Self {
        self.binary_body(body, content_types::PAIRING_TLV8)
    }

    /// Set a HAP JSON body
    #[must_use]
    pub fn json_body(self, body: &serde_json::Value) -> Self {
        self.binary_body(body.to_string().into_bytes(), content_types::HAP_JSON)
    }

    /// Set a binary body
    #[must_use]
    pub fn binary_body(mut self, body: Vec<u8>, content_type: &str) -> Self {
        self.body = body;
        self.headers.insert(names::CONTENT_TYPE, content_type);
        self
    }

    /// Build into an `HttpResponse`
    #[must_use]
    pub fn build(mut self) -> HttpResponse {
        self.headers
            .insert(names::CONTENT_LENGTH, self.body.len().to_string());

        HttpResponse {
            version: self.version.to_string(),
            status: self.status,
            reason: self.status.reason().to_string(),
            headers: self.headers,
            body: self.body,
        }
    }

    /// Encode directly to bytes
    #[must_use]
    pub fn encode(self) -> Vec<u8> {
        encode_response(&self.build())
    }
}

/// Encode a response or event to bytes
#[must_use]
pub fn encode_response(response: &HttpResponse) -> Vec<u8> {
    let mut output = Vec::with_capacity(128 + response.body.len());

    output.extend_from_slice(
        format!(
            "{} {} {}\r\n",
            response.version,
            response.status.as_u16(),
            response.reason
        )
        .as_bytes(),
    );
    for (name, value) in response.headers.iter() {
        output.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    output.extend_from_slice(b"\r\n");
    output.extend_from_slice(&response.body);

    output
}
