//! HTTP transaction parsing.
//!
//! Parses HTTP/1.x request/response pairs out of a reassembled TCP byte stream, including
//! pipelined requests, `Content-Length`-delimited bodies, and `Transfer-Encoding: chunked`
//! bodies. Body bytes are captured up to a configured cap (see
//! [`crate::config::DetectConfig::body_capture_limit`]); bytes beyond the cap are counted but
//! dropped, so the detection engine's body buffers only ever hold a bounded prefix of the
//! message.

pub(crate) mod parser;
mod transaction;

pub use self::transaction::{HttpRequest, HttpResponse};

use serde::Serialize;

/// Parsed HTTP transaction contents.
#[derive(Debug, Default, Serialize)]
pub struct Http {
    /// Pipelined depth into the connection of this transaction (0-indexed).
    pub trans_depth: usize,
    /// HTTP Request.
    pub request: HttpRequest,
    /// HTTP Response.
    pub response: HttpResponse,
}

impl Http {
    /// Returns the request URI, or `""` if it does not exist.
    pub fn uri(&self) -> &str {
        self.request.uri.as_deref().unwrap_or("")
    }

    /// Returns the HTTP method, or `""` if it does not exist.
    pub fn method(&self) -> &str {
        self.request.method.as_deref().unwrap_or("")
    }

    /// Returns the HTTP request version, or `""` if it does not exist.
    pub fn request_version(&self) -> &str {
        self.request.version.as_deref().unwrap_or("")
    }

    /// Returns the user agent string, or `""` if it does not exist.
    pub fn user_agent(&self) -> &str {
        self.request.user_agent.as_deref().unwrap_or("")
    }

    /// Returns the raw `Cookie` header value, or `""` if it does not exist.
    pub fn cookie(&self) -> &str {
        self.request.cookie.as_deref().unwrap_or("")
    }

    /// Returns the `Host` header value, or `""` if it does not exist.
    pub fn host(&self) -> &str {
        self.request.host.as_deref().unwrap_or("")
    }

    /// Returns the captured request body bytes (bounded by the body capture limit).
    pub fn request_body(&self) -> &[u8] {
        &self.request.body
    }

    /// Returns the captured response body bytes (bounded by the body capture limit).
    pub fn response_body(&self) -> &[u8] {
        &self.response.body
    }

    /// Returns the raw request header block (request line + headers, CRLF-terminated).
    pub fn request_headers_raw(&self) -> &[u8] {
        &self.request.headers_raw
    }

    /// Returns the raw response header block.
    pub fn response_headers_raw(&self) -> &[u8] {
        &self.response.headers_raw
    }

    /// Returns the HTTP status code, or `0` if it does not exist.
    pub fn status_code(&self) -> u16 {
        self.response.status_code.unwrap_or(0)
    }

    /// `true` once both the request and response have been fully parsed (headers + body).
    pub fn is_complete(&self) -> bool {
        self.request.complete && self.response.complete
    }
}
