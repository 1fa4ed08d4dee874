//! Signature evaluation against completed HTTP transactions.

use super::signature::{Buffer, ContentMatch, Predicate, Signature, UriLenMode};
use crate::protocols::stream::http::Http;

/// A signature that matched a transaction.
#[derive(Debug, Clone)]
pub struct Match {
    pub sid: u32,
    pub rev: u32,
    pub msg: String,
}

/// Holds the loaded signature set and matches it against transactions as they complete.
pub struct Engine {
    signatures: Vec<Signature>,
}

impl Engine {
    pub fn new(signatures: Vec<Signature>) -> Self {
        Engine { signatures }
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Evaluates every loaded signature against `http`, returning those that fire.
    pub fn evaluate(&self, http: &Http) -> Vec<Match> {
        self.signatures
            .iter()
            .filter(|sig| signature_matches(sig, http))
            .map(|sig| Match {
                sid: sig.sid,
                rev: sig.rev,
                msg: sig.msg.clone(),
            })
            .collect()
    }
}

fn signature_matches(sig: &Signature, http: &Http) -> bool {
    sig.buffer_groups()
        .into_iter()
        .all(|(buffer, preds)| evaluate_group(buffer_bytes(http, buffer).as_ref(), &preds))
}

fn buffer_bytes<'a>(http: &'a Http, buffer: Buffer) -> std::borrow::Cow<'a, [u8]> {
    use std::borrow::Cow;
    match buffer {
        Buffer::Uri => Cow::Borrowed(http.uri().as_bytes()),
        Buffer::Method => Cow::Borrowed(http.method().as_bytes()),
        Buffer::Host => Cow::Borrowed(http.host().as_bytes()),
        Buffer::UserAgent => Cow::Borrowed(http.user_agent().as_bytes()),
        Buffer::Cookie => Cow::Borrowed(http.cookie().as_bytes()),
        Buffer::RequestHeaders => Cow::Borrowed(http.request_headers_raw()),
        Buffer::RequestBody => Cow::Borrowed(http.request_body()),
        Buffer::ResponseHeaders => Cow::Borrowed(http.response_headers_raw()),
        Buffer::ResponseBody => Cow::Borrowed(http.response_body()),
        Buffer::StatCode => Cow::Owned(http.status_code().to_string().into_bytes()),
    }
}

/// Evaluates one buffer's predicate group. `urilen` checks and negated content/pcre are
/// independent of position; the remaining (positive) content/pcre predicates form an ordered
/// chain searched with backtracking so `distance`/`within` can reference the previous match.
fn evaluate_group(buf: &[u8], preds: &[&Predicate]) -> bool {
    let mut chain = Vec::new();
    let mut independent_negated = Vec::new();

    for p in preds {
        match p {
            Predicate::UriLen(mode) => {
                if !mode.matches(buf.len()) {
                    return false;
                }
            }
            Predicate::Content(c) if c.negated => independent_negated.push(*p),
            Predicate::Pcre(p) if p.negated => independent_negated.push(*p),
            _ => chain.push(*p),
        }
    }

    for p in &independent_negated {
        if predicate_occurs(buf, p) {
            return false;
        }
    }

    backtrack(buf, &chain, 0, None)
}

fn predicate_occurs(buf: &[u8], p: &Predicate) -> bool {
    match p {
        Predicate::Content(c) => find_content(buf, c, 0).is_some(),
        Predicate::Pcre(p) => p.regex.is_match(buf),
        Predicate::UriLen(_) => false,
    }
}

/// Searches `chain[idx..]` for a satisfying assignment of match positions, backtracking to the
/// next occurrence of an earlier predicate when a later one can't find a position honoring its
/// relative modifiers.
fn backtrack(buf: &[u8], chain: &[&Predicate], idx: usize, prev_end: Option<usize>) -> bool {
    if idx == chain.len() {
        return true;
    }

    match chain[idx] {
        Predicate::Content(c) => {
            let mut search_from = relative_start(prev_end, c.distance, c.offset);
            loop {
                let Some((start, end)) = find_content(buf, c, search_from) else {
                    return false;
                };
                if !within_bound(prev_end, start, end, c.within) {
                    return false;
                }
                if prev_end.is_none() {
                    if let Some(depth) = c.depth {
                        if end > depth {
                            search_from = start + 1;
                            continue;
                        }
                    }
                }
                if backtrack(buf, chain, idx + 1, Some(end)) {
                    return true;
                }
                search_from = start + 1;
            }
        }
        Predicate::Pcre(p) => {
            let search_from = prev_end.unwrap_or(0);
            if search_from > buf.len() {
                return false;
            }
            match p.regex.find_at(buf, search_from) {
                Some(m) => backtrack(buf, chain, idx + 1, Some(m.end())),
                None => false,
            }
        }
        Predicate::UriLen(_) => backtrack(buf, chain, idx + 1, prev_end),
    }
}

fn relative_start(prev_end: Option<usize>, distance: Option<i64>, offset: usize) -> usize {
    match prev_end {
        None => offset,
        Some(prev_end) => match distance {
            Some(d) => (prev_end as i64 + d).max(0) as usize,
            None => prev_end,
        },
    }
}

/// Checks a match's position against its predicate's `within` modifier. Relative to a previous
/// predicate in the chain, `within` bounds how far past that match's end this one may start; on
/// the first predicate of a buffer (no previous match to be relative to), `within` instead caps
/// how far into the buffer this match may end — an absolute depth.
fn within_bound(
    prev_end: Option<usize>,
    match_start: usize,
    match_end: usize,
    within: Option<usize>,
) -> bool {
    match (prev_end, within) {
        (Some(prev_end), Some(w)) => match_start <= prev_end + w,
        (None, Some(w)) => match_end <= w,
        (_, None) => true,
    }
}

/// Finds the first occurrence of `c.pattern` in `buf` at or after `from`, returning its
/// `(start, end)` byte range.
fn find_content(buf: &[u8], c: &ContentMatch, from: usize) -> Option<(usize, usize)> {
    if from > buf.len() || c.pattern.is_empty() || c.pattern.len() > buf.len() - from {
        return None;
    }
    let haystack = &buf[from..];
    let needle = &c.pattern[..];
    let window_match = |window: &[u8]| -> bool {
        if c.nocase {
            window.eq_ignore_ascii_case(needle)
        } else {
            window == needle
        }
    };
    haystack
        .windows(needle.len())
        .position(window_match)
        .map(|pos| (from + pos, from + pos + needle.len()))
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse_rule;
    use super::*;
    use crate::protocols::stream::http::{HttpRequest, HttpResponse};

    fn http_with_uri(uri: &str) -> Http {
        Http {
            trans_depth: 0,
            request: HttpRequest {
                uri: Some(uri.to_string()),
                ..Default::default()
            },
            response: HttpResponse::default(),
        }
    }

    #[test]
    fn simple_content_match_fires() {
        let sig = parse_rule(
            r#"alert tcp any any -> any any (msg:"m"; http.uri; content:"/admin"; sid:1; rev:1;)"#,
        )
        .unwrap();
        let engine = Engine::new(vec![sig]);
        let matches = engine.evaluate(&http_with_uri("/admin/login"));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].sid, 1);
    }

    #[test]
    fn content_not_present_does_not_fire() {
        let sig = parse_rule(
            r#"alert tcp any any -> any any (msg:"m"; http.uri; content:"/admin"; sid:1; rev:1;)"#,
        )
        .unwrap();
        let engine = Engine::new(vec![sig]);
        assert!(engine.evaluate(&http_with_uri("/index")).is_empty());
    }

    #[test]
    fn distance_within_chain_requires_order_and_proximity() {
        let sig = parse_rule(
            r#"alert tcp any any -> any any (msg:"m"; http.uri; content:"foo"; content:"bar"; distance:0; within:3; sid:1; rev:1;)"#,
        )
        .unwrap();
        let engine = Engine::new(vec![sig]);
        assert_eq!(engine.evaluate(&http_with_uri("/foobar")).len(), 1);
        assert!(engine.evaluate(&http_with_uri("/foo----bar")).is_empty());
    }

    #[test]
    fn negated_content_requires_absence() {
        let sig = parse_rule(
            r#"alert tcp any any -> any any (msg:"m"; http.uri; content:!"admin"; sid:1; rev:1;)"#,
        )
        .unwrap();
        let engine = Engine::new(vec![sig]);
        assert_eq!(engine.evaluate(&http_with_uri("/index")).len(), 1);
        assert!(engine.evaluate(&http_with_uri("/admin")).is_empty());
    }

    #[test]
    fn within_on_first_predicate_is_an_absolute_depth_cap() {
        let sig = parse_rule(
            r#"alert tcp any any -> any any (msg:"m"; http.uri; content:"bar"; within:5; sid:1; rev:1;)"#,
        )
        .unwrap();
        let engine = Engine::new(vec![sig]);
        assert_eq!(engine.evaluate(&http_with_uri("/bar")).len(), 1);
        assert!(engine.evaluate(&http_with_uri("/foofoobar")).is_empty());
    }

    #[test]
    fn urilen_range_gate() {
        let sig = parse_rule(
            r#"alert tcp any any -> any any (msg:"m"; urilen:1-5; sid:1; rev:1;)"#,
        )
        .unwrap();
        let engine = Engine::new(vec![sig]);
        assert_eq!(engine.evaluate(&http_with_uri("/ab")).len(), 1);
        assert!(engine.evaluate(&http_with_uri("/abcdefgh")).is_empty());
    }
}
