//! HTTP request/response line+header parsing and body accumulation.

use anyhow::{bail, Result};
use httparse::{Status, EMPTY_HEADER};
use serde::Serialize;

const NUM_OF_HEADERS: usize = 32;

/// Outcome of feeding more bytes of a message (headers and/or body) to a half of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FeedResult {
    /// Header block isn't complete yet; wait for more bytes.
    NeedMoreHeaders,
    /// Headers parsed, but the body isn't complete yet (more bytes or a closing FIN needed).
    NeedMoreBody,
    /// Message (headers + body, if any) is fully parsed.
    Complete,
    /// Malformed input that cannot be interpreted as HTTP.
    Malformed,
}

/// An HTTP Request.
#[derive(Debug, Default, Serialize)]
pub struct HttpRequest {
    pub method: Option<String>,
    pub uri: Option<String>,
    pub version: Option<String>,
    pub user_agent: Option<String>,
    pub cookie: Option<String>,
    pub host: Option<String>,
    pub content_length: Option<usize>,
    pub content_type: Option<String>,
    pub transfer_encoding: Option<String>,
    /// Raw bytes of the request line + headers, as they appeared on the wire.
    #[serde(skip)]
    pub headers_raw: Vec<u8>,
    /// Captured body bytes, bounded by the configured body capture limit.
    #[serde(skip)]
    pub body: Vec<u8>,
    /// Total body bytes seen so far, including any beyond the capture limit.
    pub body_len_seen: usize,
    /// `true` once the request (headers and body) is fully parsed.
    pub complete: bool,
    #[serde(skip)]
    pub(crate) chunked_state: ChunkedState,
}

/// An HTTP Response.
#[derive(Debug, Default, Serialize)]
pub struct HttpResponse {
    pub version: Option<String>,
    pub status_code: Option<u16>,
    pub status_msg: Option<String>,
    pub content_length: Option<usize>,
    pub content_type: Option<String>,
    pub transfer_encoding: Option<String>,
    #[serde(skip)]
    pub headers_raw: Vec<u8>,
    #[serde(skip)]
    pub body: Vec<u8>,
    pub body_len_seen: usize,
    pub complete: bool,
    #[serde(skip)]
    pub(crate) chunked_state: ChunkedState,
}

/// State for a minimal chunked-transfer-encoding decoder.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ChunkedState {
    /// Bytes remaining in the chunk currently being consumed (`None` = need a new chunk-size
    /// line).
    pub(crate) remaining: Option<usize>,
}

impl HttpRequest {
    /// Attempts to parse the request line + headers from the start of `buf`. On success, returns
    /// the byte offset where the header block ends (start of body).
    pub(crate) fn parse_headers(&mut self, buf: &[u8]) -> Result<Option<usize>> {
        let mut headers = [EMPTY_HEADER; NUM_OF_HEADERS];
        let mut req = httparse::Request::new(&mut headers[..]);
        let status = req.parse(buf);
        let header_end = match status {
            Ok(Status::Complete(n)) => n,
            Ok(Status::Partial) => return Ok(None),
            Err(_) => bail!("malformed HTTP request"),
        };

        self.method = req.method.map(|m| m.to_owned());
        self.uri = req.path.map(|p| p.to_owned());
        self.version = req.version.map(|v| format!("HTTP/1.{}", v));
        self.headers_raw = buf[..header_end].to_vec();
        for hdr in req.headers.iter() {
            apply_common_header(
                hdr,
                &mut self.user_agent,
                &mut self.host,
                &mut self.content_length,
                &mut self.content_type,
                &mut self.transfer_encoding,
                Some(&mut self.cookie),
            );
        }
        Ok(Some(header_end))
    }
}

impl HttpResponse {
    pub(crate) fn parse_headers(&mut self, buf: &[u8]) -> Result<Option<usize>> {
        let mut headers = [EMPTY_HEADER; NUM_OF_HEADERS];
        let mut resp = httparse::Response::new(&mut headers[..]);
        let status = resp.parse(buf);
        let header_end = match status {
            Ok(Status::Complete(n)) => n,
            Ok(Status::Partial) => return Ok(None),
            Err(_) => bail!("malformed HTTP response"),
        };

        self.version = resp.version.map(|v| format!("HTTP/1.{}", v));
        self.status_code = resp.code;
        self.status_msg = resp.reason.map(|r| r.to_owned());
        self.headers_raw = buf[..header_end].to_vec();
        for hdr in resp.headers.iter() {
            apply_common_header(
                hdr,
                &mut None,
                &mut None,
                &mut self.content_length,
                &mut self.content_type,
                &mut self.transfer_encoding,
                None,
            );
        }
        Ok(Some(header_end))
    }
}

#[allow(clippy::too_many_arguments)]
fn apply_common_header(
    hdr: &httparse::Header,
    user_agent: &mut Option<String>,
    host: &mut Option<String>,
    content_length: &mut Option<usize>,
    content_type: &mut Option<String>,
    transfer_encoding: &mut Option<String>,
    cookie: Option<&mut Option<String>>,
) {
    let name = hdr.name.to_lowercase();
    match name.as_str() {
        "user-agent" => *user_agent = Some(String::from_utf8_lossy(hdr.value).into_owned()),
        "host" => *host = Some(String::from_utf8_lossy(hdr.value).into_owned()),
        "cookie" => {
            if let Some(slot) = cookie {
                *slot = Some(String::from_utf8_lossy(hdr.value).into_owned());
            }
        }
        "content-length" => {
            if let Ok(s) = std::str::from_utf8(hdr.value) {
                *content_length = s.trim().parse::<usize>().ok();
            }
        }
        "content-type" => *content_type = Some(String::from_utf8_lossy(hdr.value).into_owned()),
        "transfer-encoding" => {
            *transfer_encoding = Some(String::from_utf8_lossy(hdr.value).to_lowercase())
        }
        _ => (),
    }
}
