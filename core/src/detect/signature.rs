//! Signature data model: what a rule checks and how its predicates are ordered.

use regex::bytes::Regex;

/// Which part of an HTTP transaction a predicate inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Buffer {
    Uri,
    Method,
    Host,
    UserAgent,
    Cookie,
    RequestHeaders,
    RequestBody,
    ResponseHeaders,
    ResponseBody,
    StatCode,
}

/// A `content`/`uricontent` byte-pattern match, with its positional modifiers.
#[derive(Debug, Clone)]
pub struct ContentMatch {
    pub pattern: Vec<u8>,
    pub negated: bool,
    pub nocase: bool,
    /// Minimum offset into the buffer the match may start at (absolute; ignored if `relative`).
    pub offset: usize,
    /// Maximum offset into the buffer the match must end by (absolute; ignored if `relative`).
    pub depth: Option<usize>,
    /// Minimum gap from the previous predicate's match end (makes this match relative).
    pub distance: Option<i64>,
    /// Maximum gap from the previous predicate's match end (makes this match relative).
    pub within: Option<usize>,
}

impl ContentMatch {
    pub fn is_relative(&self) -> bool {
        self.distance.is_some() || self.within.is_some()
    }
}

/// A `pcre` regular-expression match.
#[derive(Debug, Clone)]
pub struct PcreMatch {
    pub regex: Regex,
    pub negated: bool,
}

/// A `urilen` length check against the request URI.
#[derive(Debug, Clone, Copy)]
pub enum UriLenMode {
    Eq(usize),
    Lt(usize),
    Gt(usize),
    Range(usize, usize),
}

impl UriLenMode {
    pub fn matches(&self, len: usize) -> bool {
        match *self {
            UriLenMode::Eq(n) => len == n,
            UriLenMode::Lt(n) => len < n,
            UriLenMode::Gt(n) => len > n,
            UriLenMode::Range(lo, hi) => len >= lo && len <= hi,
        }
    }
}

/// One predicate evaluated against a particular buffer.
#[derive(Debug, Clone)]
pub enum Predicate {
    Content(ContentMatch),
    Pcre(PcreMatch),
    UriLen(UriLenMode),
}

/// A predicate paired with the buffer it inspects, in the order it appeared in the rule.
#[derive(Debug, Clone)]
pub struct BufferPredicate {
    pub buffer: Buffer,
    pub predicate: Predicate,
}

/// What to do when a signature matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Alert,
    Drop,
    Pass,
}

/// A loaded, ready-to-evaluate signature.
#[derive(Debug, Clone)]
pub struct Signature {
    pub sid: u32,
    pub rev: u32,
    pub msg: String,
    pub action: Action,
    pub classtype: Option<String>,
    /// Ordered list of predicates. Predicates sharing a buffer evaluate as a single ordered chain
    /// (so `distance`/`within` can reference the previous predicate's match); predicates on
    /// different buffers are independent and all must match for the signature to fire.
    pub predicates: Vec<BufferPredicate>,
}

impl Signature {
    /// Groups predicates by buffer, preserving each buffer's first-appearance order and the
    /// relative order of its own predicates (so `distance`/`within` chains stay intact even if
    /// the rule interleaves predicates on other buffers in between).
    pub(crate) fn buffer_groups(&self) -> Vec<(Buffer, Vec<&Predicate>)> {
        let mut groups: Vec<(Buffer, Vec<&Predicate>)> = Vec::new();
        for bp in &self.predicates {
            match groups.iter_mut().find(|(buf, _)| *buf == bp.buffer) {
                Some((_, preds)) => preds.push(&bp.predicate),
                None => groups.push((bp.buffer, vec![&bp.predicate])),
            }
        }
        groups
    }
}
