//! Controller-side parsing of responses and `EVENT/1.0` notifications

use super::server_codec::{find_header_end, parse_header_lines};
use super::{HttpResponse, Method, ParseError, StatusCode, names};
use bytes::{Buf, BytesMut};
use std::str;

/// Incremental response parser used by the simulated controller
#[derive(Debug, Default)]
pub struct HttpClientCodec {
    buffer: BytesMut,
}

impl HttpClientCodec {
    /// Create an empty codec
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed decrypted bytes
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Remove and return unparsed bytes
    pub fn take_buffer(&mut self) -> Vec<u8> {
        self.buffer.split().to_vec()
    }

    /// Attempt to decode one complete response or event
    ///
    /// # Errors
    /// Returns `ParseError` if the status line or headers are malformed.
    pub fn decode(&mut self) -> Result<Option<HttpResponse>, ParseError> {
        let Some(header_end) = find_header_end(&self.buffer) else {
            return Ok(None);
        };
        let head = str::from_utf8(&self.buffer[..header_end]).map_err(|_| ParseError::InvalidUtf8)?;
        let mut lines = head.split("\r\n");
        let status_line = lines.next().unwrap_or_default();

        let mut parts = status_line.splitn(3, ' ');
        let (Some(version), Some(code), reason) = (parts.next(), parts.next(), parts.next()) else {
            return Err(ParseError::InvalidRequestLine(status_line.to_string()));
        };
        let code: u16 = code
            .parse()
            .map_err(|_| ParseError::InvalidRequestLine(status_line.to_string()))?;
        let version = version.to_string();
        let reason = reason.unwrap_or_default().to_string();
        let headers = parse_header_lines(lines)?;

        let content_length = headers.content_length().unwrap_or(0);
        if self.buffer.len() < header_end + 4 + content_length {
            return Ok(None);
        }
        self.buffer.advance(header_end + 4);
        let body = self.buffer.split_to(content_length).to_vec();

        Ok(Some(HttpResponse {
            version,
            status: StatusCode(code),
            reason,
            headers,
            body,
        }))
    }
}

/// Encode a request as a controller would send it
#[must_use]
pub fn encode_request(
    method: Method,
    uri: &str,
    content_type: Option<&str>,
    body: &[u8],
) -> Vec<u8> {
    let mut head = format!("{} {} HTTP/1.1\r\nHost: accessory.local\r\n", method.as_str(), uri);
    if let Some(content_type) = content_type {
        head.push_str(&format!("{}: {}\r\n", names::CONTENT_TYPE, content_type));
    }
    head.push_str(&format!("{}: {}\r\n\r\n", names::CONTENT_LENGTH, body.len()));

    let mut output = head.into_bytes();
    output.extend_from_slice(body);
    output
}
