//! HTTP/1.1 message types for the accessory's request/response exchange
//!
//! Requests are parsed directly from the decrypted byte stream; responses and
//! `EVENT/1.0` notifications are encoded back into bytes for the secure session.

mod client_codec;
mod headers;
mod server_codec;


pub use client_codec::{HttpClientCodec, encode_request};
pub use headers::{Headers, content_types, names};
pub use server_codec::{HttpServerCodec, ParseError, ResponseBuilder, encode_response};

use std::str::FromStr;

/// HTTP request methods used by controllers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET (accessory database, characteristic reads)
    Get,
    /// POST (pairing endpoints, resource requests)
    Post,
    /// PUT (characteristic writes, prepare)
    Put,
    /// DELETE
    Delete,
}

impl Method {
    /// Convert to wire string
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl FromStr for Method {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            _ => Err(()),
        }
    }
}

/// HTTP status codes used by the accessory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200);
    pub const NO_CONTENT: StatusCode = StatusCode(204);
    pub const MULTI_STATUS: StatusCode = StatusCode(207);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const METHOD_NOT_ALLOWED: StatusCode = StatusCode(405);
    pub const UNPROCESSABLE_ENTITY: StatusCode = StatusCode(422);
    pub const CONNECTION_AUTHORIZATION_REQUIRED: StatusCode = StatusCode(470);
    pub const INTERNAL_ERROR: StatusCode = StatusCode(500);
    pub const SERVICE_UNAVAILABLE: StatusCode = StatusCode(503);

    /// Check if this is a success status (2xx)
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.0)
    }

    /// Get status code as u16
    #[must_use]
    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Reason phrase
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self.0 {
            200 => "OK",
            204 => "No Content",
            207 => "Multi-Status",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            422 => "Unprocessable Entity",
            470 => "Connection Authorization Required",
            500 => "Internal Server Error",
            503 => "Service Unavailable",
            _ => "Unknown",
        }
    }
}

/// A parsed HTTP request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Request method
    pub method: Method,
    /// Request target including any query string
    pub uri: String,
    /// Request headers
    pub headers: Headers,
    /// Request body (may be empty)
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Path component of the target without the query string
    #[must_use]
    pub fn path(&self) -> &str {
        self.uri.split('?').next().unwrap_or_default()
    }

    /// Raw query string, if any
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.uri.split_once('?').map(|(_, q)| q)
    }
}

/// An HTTP response or event message
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Protocol token, `HTTP/1.1` for responses and `EVENT/1.0` for notifications
    pub version: String,
    /// Status code
    pub status: StatusCode,
    /// Reason phrase (e.g., "OK")
    pub reason: String,
    /// Response headers
    pub headers: Headers,
    /// Response body (may be empty)
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Check if response indicates success
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// True for `EVENT/1.0` notifications
    #[must_use]
    pub fn is_event(&self) -> bool {
        self.version == server_codec::EVENT_VERSION
    }
}
