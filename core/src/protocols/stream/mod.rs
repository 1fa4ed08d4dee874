//! Types for parsing and manipulating stream-level network protocols.
//!
//! The engine parses HTTP/1.x request/response pairs out of reassembled TCP byte streams. Unlike
//! a multi-protocol registry, the application inspector ([`crate::inspect`]) owns the
//! [`http::parser::HttpParser`] directly and feeds it bytes as the reassembly store emits them.

pub mod http;

use crate::conntrack::conn_id::FiveTuple;
use http::parser::HttpParser;

/// Per-connection application-layer parsing state.
#[derive(Debug)]
pub struct ConnData {
    /// The connection 5-tuple.
    pub five_tuple: FiveTuple,
    /// The HTTP parser for this connection.
    pub(crate) parser: HttpParser,
}

impl ConnData {
    pub(crate) fn new(five_tuple: FiveTuple, body_capture_limit: usize) -> Self {
        ConnData {
            five_tuple,
            parser: HttpParser::new(body_capture_limit),
        }
    }
}
