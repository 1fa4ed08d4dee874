//! Parses signature files into loaded [`Signature`]s.

use super::signature::{
    Action, Buffer, BufferPredicate, ContentMatch, PcreMatch, Predicate, Signature, UriLenMode,
};

use anyhow::{anyhow, bail, Context, Result};
use pest::iterators::Pair;
use pest::Parser;
use regex::bytes::RegexBuilder;

#[derive(Parser)]
#[grammar = "detect/grammar.pest"]
struct SignatureParser;

/// Parses every `.rules`-style file in `paths` into a flat list of signatures. Blank lines and
/// lines starting with `#` are skipped.
pub fn load_signatures<P: AsRef<std::path::Path>>(paths: &[P]) -> Result<Vec<Signature>> {
    let mut out = Vec::new();
    for path in paths {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading rules file {}", path.display()))?;
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let sig = parse_rule(line).with_context(|| {
                format!("{}:{}: invalid signature: {}", path.display(), lineno + 1, line)
            })?;
            out.push(sig);
        }
    }
    Ok(out)
}

/// Parses a single signature line.
pub fn parse_rule(line: &str) -> Result<Signature> {
    let mut pairs = SignatureParser::parse(Rule::rule, line).map_err(|e| anyhow!("{}", e))?;
    let rule_pair = pairs.next().ok_or_else(|| anyhow!("empty rule"))?;

    let mut action = None;
    let mut current_buffer = Buffer::RequestHeaders;
    let mut has_buffer = false;
    let mut predicates: Vec<BufferPredicate> = Vec::new();
    let mut msg = String::new();
    let mut sid = None;
    let mut rev = 0u32;
    let mut classtype = None;

    for inner in rule_pair.into_inner() {
        match inner.as_rule() {
            Rule::action => {
                action = Some(match inner.as_str() {
                    "alert" => Action::Alert,
                    "drop" => Action::Drop,
                    "pass" => Action::Pass,
                    other => bail!("unknown action {:?}", other),
                });
            }
            Rule::option => {
                apply_option(
                    inner,
                    &mut current_buffer,
                    &mut has_buffer,
                    &mut predicates,
                    &mut msg,
                    &mut sid,
                    &mut rev,
                    &mut classtype,
                )?;
            }
            _ => {}
        }
    }

    Ok(Signature {
        sid: sid.ok_or_else(|| anyhow!("signature missing required `sid`"))?,
        rev,
        msg,
        action: action.ok_or_else(|| anyhow!("signature missing action"))?,
        classtype,
        predicates,
    })
}

#[allow(clippy::too_many_arguments)]
fn apply_option(
    option: Pair<Rule>,
    current_buffer: &mut Buffer,
    has_buffer: &mut bool,
    predicates: &mut Vec<BufferPredicate>,
    msg: &mut String,
    sid: &mut Option<u32>,
    rev: &mut u32,
    classtype: &mut Option<String>,
) -> Result<()> {
    let inner = option
        .into_inner()
        .next()
        .ok_or_else(|| anyhow!("empty option"))?;

    match inner.as_rule() {
        Rule::sticky_buffer => {
            *current_buffer = match inner.as_str() {
                "http.uri" => Buffer::Uri,
                "http.method" => Buffer::Method,
                "http.host" => Buffer::Host,
                "http.user_agent" => Buffer::UserAgent,
                "http.cookie" => Buffer::Cookie,
                "http.client_body" => Buffer::RequestBody,
                "http.server_body" => Buffer::ResponseBody,
                "http.header" => Buffer::RequestHeaders,
                "http.response_header" => Buffer::ResponseHeaders,
                "http.stat_code" => Buffer::StatCode,
                other => bail!("unknown sticky buffer {:?}", other),
            };
            *has_buffer = true;
        }
        Rule::bare_option => {
            // Only `nocase` today; it modifies the most recently pushed content predicate.
            if let Some(bp) = predicates.last_mut() {
                if let Predicate::Content(c) = &mut bp.predicate {
                    c.nocase = true;
                }
            }
        }
        Rule::kv_option => {
            let mut kv = inner.into_inner();
            let key = kv.next().ok_or_else(|| anyhow!("missing option key"))?.as_str();
            let value = kv.next().ok_or_else(|| anyhow!("missing value for {:?}", key))?;
            match key {
                "msg" => *msg = unquote(value.as_str()),
                "sid" => *sid = Some(value.as_str().parse().context("parsing sid")?),
                "rev" => *rev = value.as_str().parse().context("parsing rev")?,
                "classtype" => *classtype = Some(unquote(value.as_str())),
                "content" => {
                    if !*has_buffer {
                        bail!("`content` requires a preceding sticky buffer (e.g. http.uri;)");
                    }
                    let (negated, text) = unquote_negatable(value.as_str());
                    predicates.push(BufferPredicate {
                        buffer: *current_buffer,
                        predicate: Predicate::Content(ContentMatch {
                            pattern: text.into_bytes(),
                            negated,
                            nocase: false,
                            offset: 0,
                            depth: None,
                            distance: None,
                            within: None,
                        }),
                    });
                }
                "pcre" => {
                    if !*has_buffer {
                        bail!("`pcre` requires a preceding sticky buffer (e.g. http.uri;)");
                    }
                    let (negated, body, flags) = parse_pcre_literal(value.as_str())?;
                    let mut builder = RegexBuilder::new(&body);
                    for flag in flags.chars() {
                        match flag {
                            'i' => {
                                builder.case_insensitive(true);
                            }
                            's' => {
                                builder.dot_matches_new_line(true);
                            }
                            'm' => {
                                builder.multi_line(true);
                            }
                            _ => bail!("unsupported pcre flag {:?}", flag),
                        }
                    }
                    let regex = builder
                        .build()
                        .with_context(|| format!("compiling pcre {:?}", body))?;
                    predicates.push(BufferPredicate {
                        buffer: *current_buffer,
                        predicate: Predicate::Pcre(PcreMatch { regex, negated }),
                    });
                }
                "urilen" => {
                    let mode = parse_urilen(value.as_str())?;
                    predicates.push(BufferPredicate {
                        buffer: Buffer::Uri,
                        predicate: Predicate::UriLen(mode),
                    });
                }
                "offset" => set_content_field(predicates, |c| {
                    c.offset = value.as_str().parse().context("parsing offset")?;
                    check_depth_offset(c)
                })?,
                "depth" => set_content_field(predicates, |c| {
                    c.depth = Some(value.as_str().parse().context("parsing depth")?);
                    check_depth_offset(c)
                })?,
                "distance" => set_content_field(predicates, |c| {
                    c.distance = Some(value.as_str().parse().context("parsing distance")?);
                    Ok(())
                })?,
                "within" => set_content_field(predicates, |c| {
                    c.within = Some(value.as_str().parse().context("parsing within")?);
                    Ok(())
                })?,
                other => bail!("unknown option key {:?}", other),
            }
        }
        _ => {}
    }
    Ok(())
}

fn set_content_field(
    predicates: &mut [BufferPredicate],
    apply: impl FnOnce(&mut ContentMatch) -> Result<()>,
) -> Result<()> {
    let last = predicates
        .last_mut()
        .ok_or_else(|| anyhow!("modifier with no preceding content match"))?;
    match &mut last.predicate {
        Predicate::Content(c) => apply(c),
        _ => bail!("modifier applied to a non-content predicate"),
    }
}

/// Rejects a `depth` that can never be satisfied given the predicate's `offset`: a match can't
/// end by `depth` if it isn't even allowed to start until `offset`.
fn check_depth_offset(c: &ContentMatch) -> Result<()> {
    if let Some(depth) = c.depth {
        if depth > 0 && depth <= c.offset {
            bail!(
                "`depth` ({}) must be greater than `offset` ({})",
                depth,
                c.offset
            );
        }
    }
    Ok(())
}

fn unquote(s: &str) -> String {
    let s = s.strip_prefix('"').unwrap_or(s);
    let s = s.strip_suffix('"').unwrap_or(s);
    s.replace("\\\"", "\"")
}

/// Parses a `content`-style quoted value, stripping a leading `!` negation marker.
fn unquote_negatable(s: &str) -> (bool, String) {
    let (negated, rest) = match s.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    (negated, unquote(rest))
}

/// Parses a `pcre`-style value (`!"/regex/flags"`), returning `(negated, body, flags)`.
fn parse_pcre_literal(s: &str) -> Result<(bool, String, String)> {
    let (negated, rest) = match s.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let rest = rest
        .strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .ok_or_else(|| anyhow!("malformed pcre literal {:?}", s))?;
    let rest = rest
        .strip_prefix('/')
        .ok_or_else(|| anyhow!("pcre literal must start with /"))?;
    let slash = rest
        .rfind('/')
        .ok_or_else(|| anyhow!("pcre literal missing closing /"))?;
    Ok((negated, rest[..slash].to_string(), rest[slash + 1..].to_string()))
}

fn parse_urilen(s: &str) -> Result<UriLenMode> {
    if let Some(n) = s.strip_prefix('<') {
        return Ok(UriLenMode::Lt(n.parse().context("parsing urilen")?));
    }
    if let Some(n) = s.strip_prefix('>') {
        return Ok(UriLenMode::Gt(n.parse().context("parsing urilen")?));
    }
    if let Some((lo, hi)) = s.split_once('-') {
        return Ok(UriLenMode::Range(
            lo.parse().context("parsing urilen range start")?,
            hi.parse().context("parsing urilen range end")?,
        ));
    }
    Ok(UriLenMode::Eq(s.parse().context("parsing urilen")?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_rule() {
        let sig = parse_rule(
            r#"alert tcp any any -> any any (msg:"test"; http.uri; content:"/admin"; nocase; sid:1; rev:1;)"#,
        )
        .unwrap();
        assert_eq!(sig.sid, 1);
        assert_eq!(sig.rev, 1);
        assert_eq!(sig.action, Action::Alert);
        assert_eq!(sig.predicates.len(), 1);
        match &sig.predicates[0].predicate {
            Predicate::Content(c) => {
                assert_eq!(c.pattern, b"/admin");
                assert!(c.nocase);
            }
            _ => panic!("expected content predicate"),
        }
    }

    #[test]
    fn parses_relative_content_chain() {
        let sig = parse_rule(
            r#"alert tcp any any -> any any (msg:"chain"; http.client_body; content:"foo"; content:"bar"; distance:0; within:10; sid:2; rev:1;)"#,
        )
        .unwrap();
        assert_eq!(sig.predicates.len(), 2);
        match &sig.predicates[1].predicate {
            Predicate::Content(c) => {
                assert_eq!(c.distance, Some(0));
                assert_eq!(c.within, Some(10));
            }
            _ => panic!("expected content predicate"),
        }
    }

    #[test]
    fn parses_response_header_buffer() {
        let sig = parse_rule(
            r#"alert tcp any any -> any any (msg:"setcookie"; http.response_header; content:"Set-Cookie"; sid:9; rev:1;)"#,
        )
        .unwrap();
        assert_eq!(sig.predicates.len(), 1);
        assert_eq!(sig.predicates[0].buffer, Buffer::ResponseHeaders);
    }

    #[test]
    fn parses_negated_pcre() {
        let sig = parse_rule(
            r#"alert tcp any any -> any any (msg:"neg"; http.uri; pcre:!"/\.php$/i"; sid:3; rev:1;)"#,
        )
        .unwrap();
        match &sig.predicates[0].predicate {
            Predicate::Pcre(p) => assert!(p.negated),
            _ => panic!("expected pcre predicate"),
        }
    }

    #[test]
    fn parses_urilen_range() {
        let sig =
            parse_rule(r#"alert tcp any any -> any any (msg:"len"; urilen:5-10; sid:4; rev:1;)"#)
                .unwrap();
        match &sig.predicates[0].predicate {
            Predicate::UriLen(UriLenMode::Range(lo, hi)) => {
                assert_eq!(*lo, 5);
                assert_eq!(*hi, 10);
            }
            _ => panic!("expected urilen predicate"),
        }
    }

    #[test]
    fn content_without_buffer_is_rejected() {
        let err = parse_rule(r#"alert tcp any any -> any any (msg:"x"; content:"a"; sid:5; rev:1;)"#);
        assert!(err.is_err());
    }

    #[test]
    fn depth_not_greater_than_offset_is_rejected() {
        let err = parse_rule(
            r#"alert tcp any any -> any any (msg:"x"; http.uri; content:"a"; offset:10; depth:5; sid:6; rev:1;)"#,
        );
        assert!(err.is_err());

        let err = parse_rule(
            r#"alert tcp any any -> any any (msg:"x"; http.uri; content:"a"; depth:5; offset:10; sid:7; rev:1;)"#,
        );
        assert!(err.is_err());

        let sig = parse_rule(
            r#"alert tcp any any -> any any (msg:"x"; http.uri; content:"a"; offset:2; depth:10; sid:8; rev:1;)"#,
        )
        .unwrap();
        assert_eq!(sig.sid, 8);
    }
}
