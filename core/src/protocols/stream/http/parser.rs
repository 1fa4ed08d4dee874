// modified from https://github.com/rusticata/rusticata/blob/master/src/http.rs
//! HTTP transaction parser.
//!
//! Consumes the byte stream the reassembly store hands to the application inspector in each
//! direction, using [httparse](https://docs.rs/httparse) for request/response lines and headers.
//! Handles pipelined requests (several outstanding transactions at once), `Content-Length`
//! bodies, and `Transfer-Encoding: chunked` bodies. Captured body bytes are bounded by
//! `body_capture_limit`; anything beyond the cap is still counted (`body_len_seen`) but dropped,
//! so memory use stays bounded regardless of how large a message body is.

use super::transaction::{ChunkedState, FeedResult};
use super::Http;

use std::collections::HashMap;

/// Default cap, in bytes, on body content retained per message.
pub const DEFAULT_BODY_CAPTURE_LIMIT: usize = 1 << 16;

#[derive(Debug, Default)]
struct DirState {
    /// Bytes accumulated while waiting for the header block to complete.
    header_buf: Vec<u8>,
    /// Transaction ID currently receiving bytes, once headers are parsed.
    active: Option<usize>,
    /// Body bytes fed in but not yet consumable (e.g. a chunk-size line or trailing CRLF split
    /// across two reassembly messages). Prepended to the next call's data.
    body_carry: Vec<u8>,
}

#[derive(Debug)]
pub struct HttpParser {
    /// Outstanding (not yet fully consumed) transactions, keyed by transaction ID.
    pending: HashMap<usize, Http>,
    /// ID of the oldest transaction still awaiting a response (request/response pairing order).
    current_trans: usize,
    /// Next transaction ID to assign to a new request.
    next_id: usize,
    ctos: DirState,
    stoc: DirState,
    body_capture_limit: usize,
}

impl Default for HttpParser {
    fn default() -> Self {
        HttpParser::new(DEFAULT_BODY_CAPTURE_LIMIT)
    }
}

impl HttpParser {
    pub fn new(body_capture_limit: usize) -> Self {
        HttpParser {
            pending: HashMap::new(),
            current_trans: 0,
            next_id: 0,
            ctos: DirState::default(),
            stoc: DirState::default(),
            body_capture_limit,
        }
    }

    /// Returns `true` if `data` looks like the start of an HTTP/1.x request line.
    pub fn probe(data: &[u8]) -> bool {
        if data.len() < 4 {
            return false;
        }
        matches!(
            &data[..4],
            b"OPTI" | b"GET " | b"HEAD" | b"POST" | b"PUT " | b"PATC" | b"COPY" | b"MOVE"
                | b"DELE" | b"LINK" | b"UNLI" | b"TRAC" | b"WRAP"
        )
    }

    /// Feeds reassembled client-to-server bytes. Returns the ID of the most recently touched
    /// transaction, if any.
    pub fn process_ctos(&mut self, data: &[u8]) -> Option<usize> {
        let mut remaining = std::mem::take(&mut self.ctos.body_carry);
        remaining.extend_from_slice(data);
        let mut touched = None;
        loop {
            if self.ctos.active.is_none() {
                self.ctos.header_buf.append(&mut remaining);
                let buf = std::mem::take(&mut self.ctos.header_buf);
                let id = self.next_id;
                let mut http = Http {
                    trans_depth: id,
                    ..Default::default()
                };
                match http.request.parse_headers(&buf) {
                    Ok(Some(header_end)) => {
                        remaining = buf[header_end..].to_vec();
                        self.next_id += 1;
                        self.pending.insert(id, http);
                        self.ctos.active = Some(id);
                        touched = Some(id);
                    }
                    Ok(None) => {
                        self.ctos.header_buf = buf;
                        return touched;
                    }
                    Err(_) => {
                        log::warn!("discarding malformed HTTP request line/headers");
                        return touched;
                    }
                }
            }
            if remaining.is_empty() {
                return touched;
            }
            let id = self.ctos.active.unwrap();
            let cap = self.body_capture_limit;
            let http = match self.pending.get_mut(&id) {
                Some(h) => h,
                None => return touched,
            };
            let (result, consumed) = feed_body(
                &remaining,
                &mut http.request.body,
                &mut http.request.body_len_seen,
                &mut http.request.chunked_state,
                http.request.transfer_encoding.as_deref() == Some("chunked"),
                http.request.content_length,
                cap,
            );
            touched = Some(id);
            remaining.drain(..consumed);
            match result {
                FeedResult::Complete => {
                    http.request.complete = true;
                    self.ctos.active = None;
                }
                FeedResult::Malformed => {
                    log::warn!("discarding malformed chunked request body");
                    self.ctos.active = None;
                }
                _ => {
                    // Not enough bytes to make further progress; wait for the next feed.
                    self.ctos.body_carry = remaining;
                    return touched;
                }
            }
        }
    }

    /// Feeds reassembled server-to-client bytes. Returns the ID of the most recently touched
    /// transaction, if any.
    pub fn process_stoc(&mut self, data: &[u8]) -> Option<usize> {
        let mut remaining = std::mem::take(&mut self.stoc.body_carry);
        remaining.extend_from_slice(data);
        let mut touched = None;
        loop {
            if self.stoc.active.is_none() {
                if !self.pending.contains_key(&self.current_trans) {
                    if !remaining.is_empty() {
                        log::warn!("HTTP response with no outstanding request");
                    }
                    return touched;
                }
                self.stoc.header_buf.append(&mut remaining);
                let buf = std::mem::take(&mut self.stoc.header_buf);
                let id = self.current_trans;
                let header_end = {
                    let http = self.pending.get_mut(&id).unwrap();
                    match http.response.parse_headers(&buf) {
                        Ok(Some(n)) => n,
                        Ok(None) => {
                            self.stoc.header_buf = buf;
                            return touched;
                        }
                        Err(_) => {
                            log::warn!("discarding malformed HTTP response line/headers");
                            return touched;
                        }
                    }
                };
                remaining = buf[header_end..].to_vec();
                self.stoc.active = Some(id);
                touched = Some(id);
            }
            if remaining.is_empty() {
                return touched;
            }
            let id = self.stoc.active.unwrap();
            let cap = self.body_capture_limit;
            let http = match self.pending.get_mut(&id) {
                Some(h) => h,
                None => return touched,
            };
            let (result, consumed) = feed_body(
                &remaining,
                &mut http.response.body,
                &mut http.response.body_len_seen,
                &mut http.response.chunked_state,
                http.response.transfer_encoding.as_deref() == Some("chunked"),
                http.response.content_length,
                cap,
            );
            touched = Some(id);
            remaining.drain(..consumed);
            match result {
                FeedResult::Complete => {
                    http.response.complete = true;
                    self.stoc.active = None;
                    self.current_trans = id + 1;
                }
                FeedResult::Malformed => {
                    log::warn!("discarding malformed chunked response body");
                    self.stoc.active = None;
                    self.current_trans = id + 1;
                }
                _ => {
                    self.stoc.body_carry = remaining;
                    return touched;
                }
            }
        }
    }

    /// Signals that the connection is closing; a response with no `Content-Length` and no
    /// chunked encoding is considered complete at end-of-stream (HTTP/1.0 semantics).
    pub fn close(&mut self) {
        if let Some(id) = self.stoc.active {
            if let Some(http) = self.pending.get_mut(&id) {
                if http.response.content_length.is_none()
                    && http.response.transfer_encoding.as_deref() != Some("chunked")
                {
                    http.response.complete = true;
                }
            }
        }
        self.stoc.active = None;
    }

    /// Returns a reference to transaction `id`, if it has begun.
    pub fn transaction(&self, id: usize) -> Option<&Http> {
        self.pending.get(&id)
    }

    /// Removes transaction `id` if its request and response are both complete.
    pub fn remove_transaction(&mut self, id: usize) -> Option<Http> {
        if self.pending.get(&id)?.is_complete() {
            self.pending.remove(&id)
        } else {
            None
        }
    }

    /// Removes all outstanding transactions regardless of completion (connection teardown).
    pub fn drain_transactions(&mut self) -> Vec<Http> {
        self.pending.drain().map(|(_, http)| http).collect()
    }
}

/// Feeds as much of `data` as belongs to the current message body. Returns the parse outcome and
/// the number of bytes of `data` consumed (always `data.len()` except when a chunked body runs
/// past a chunk's terminal CRLF with too few trailing bytes available).
#[allow(clippy::too_many_arguments)]
fn feed_body(
    data: &[u8],
    body: &mut Vec<u8>,
    body_len_seen: &mut usize,
    chunked_state: &mut ChunkedState,
    chunked: bool,
    content_length: Option<usize>,
    cap: usize,
) -> (FeedResult, usize) {
    if chunked {
        return feed_chunked(data, body, body_len_seen, chunked_state, cap);
    }
    if let Some(total) = content_length {
        let remaining_wanted = total.saturating_sub(*body_len_seen);
        let take = remaining_wanted.min(data.len());
        push_capped(body, &data[..take], cap);
        *body_len_seen += take;
        if *body_len_seen >= total {
            return (FeedResult::Complete, take);
        }
        return (FeedResult::NeedMoreBody, take);
    }
    // No framing information: treat as "no body" (request side default; response side is
    // resolved at connection close via `HttpParser::close`).
    (FeedResult::Complete, 0)
}

fn feed_chunked(
    data: &[u8],
    body: &mut Vec<u8>,
    body_len_seen: &mut usize,
    state: &mut ChunkedState,
    cap: usize,
) -> (FeedResult, usize) {
    let mut pos = 0;
    loop {
        if let Some(remaining) = state.remaining {
            if remaining == 0 {
                if data.len() - pos < 2 {
                    return (FeedResult::NeedMoreBody, pos);
                }
                pos += 2; // trailing CRLF after chunk data
                state.remaining = None;
                continue;
            }
            let take = remaining.min(data.len() - pos);
            push_capped(body, &data[pos..pos + take], cap);
            *body_len_seen += take;
            pos += take;
            state.remaining = Some(remaining - take);
            if remaining - take > 0 {
                return (FeedResult::NeedMoreBody, pos);
            }
            continue;
        }
        let nl = match data[pos..].iter().position(|&b| b == b'\n') {
            Some(off) => pos + off,
            None => return (FeedResult::NeedMoreBody, pos),
        };
        let line = &data[pos..nl];
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let size_str = std::str::from_utf8(line)
            .ok()
            .and_then(|s| s.split(';').next())
            .unwrap_or("");
        let size = match usize::from_str_radix(size_str.trim(), 16) {
            Ok(s) => s,
            Err(_) => return (FeedResult::Malformed, data.len()),
        };
        pos = nl + 1;
        if size == 0 {
            return (FeedResult::Complete, pos);
        }
        state.remaining = Some(size);
    }
}

fn push_capped(body: &mut Vec<u8>, data: &[u8], cap: usize) {
    if body.len() >= cap {
        return;
    }
    let room = cap - body.len();
    let take = room.min(data.len());
    body.extend_from_slice(&data[..take]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_request_response_pair() {
        let mut parser = HttpParser::new(1024);
        parser.process_ctos(b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n");
        let id = parser
            .process_stoc(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello")
            .unwrap();
        let http = parser.remove_transaction(id).unwrap();
        assert_eq!(http.method(), "GET");
        assert_eq!(http.uri(), "/index.html");
        assert_eq!(http.status_code(), 200);
        assert_eq!(http.response_body(), b"hello");
    }

    #[test]
    fn pipelined_requests_pair_in_order() {
        let mut parser = HttpParser::new(1024);
        parser.process_ctos(b"GET /a HTTP/1.1\r\nHost: h\r\n\r\nGET /b HTTP/1.1\r\nHost: h\r\n\r\n");
        parser.process_stoc(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
        parser.process_stoc(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n");
        let first = parser.remove_transaction(0).unwrap();
        let second = parser.remove_transaction(1).unwrap();
        assert_eq!(first.uri(), "/a");
        assert_eq!(first.status_code(), 200);
        assert_eq!(second.uri(), "/b");
        assert_eq!(second.status_code(), 404);
    }

    #[test]
    fn chunked_body_reassembled_across_feeds() {
        let mut parser = HttpParser::new(1024);
        parser.process_ctos(b"POST /up HTTP/1.1\r\nHost: h\r\nTransfer-Encoding: chunked\r\n\r\n");
        parser.process_ctos(b"4\r\nWiki\r\n");
        let id = parser.process_ctos(b"5\r\npedia\r\n0\r\n\r\n").unwrap();
        let http = parser.transaction(id).unwrap();
        assert!(http.request.complete);
        assert_eq!(http.request_body(), b"Wikipedia");
    }
}
