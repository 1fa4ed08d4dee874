//! Alert rendering and logging.
//!
//! Renders matched signatures to a line-oriented log file, one line per match, in a format
//! modeled on the classic `fast.log`/`http.log` style: bracketed `[**]`-delimited fields with a
//! timestamp, the firing signature, the request summary, and the connection's endpoints.

use crate::conntrack::conn_id::FiveTuple;
use crate::detect::engine::Match;
use crate::protocols::stream::http::Http;

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;

/// Writes matched signatures to the configured alert log.
pub struct AlertLogger {
    writer: BufWriter<File>,
}

impl AlertLogger {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .with_context(|| format!("opening alert log {}", path.as_ref().display()))?;
        Ok(AlertLogger {
            writer: BufWriter::new(file),
        })
    }

    /// Writes one line per match in `matches`.
    pub fn log(&mut self, five_tuple: &FiveTuple, http: &Http, matches: &[Match]) -> Result<()> {
        for m in matches {
            crate::stats::record_alert();
            writeln!(
                self.writer,
                "{} [**] [1:{}:{}] {} [**] {} {} [**] Host: {} UA: {} [**] {} -> {}",
                Utc::now().format("%m/%d/%Y-%H:%M:%S.%6f"),
                m.sid,
                m.rev,
                m.msg,
                http.method(),
                http.uri(),
                non_empty(http.host()),
                non_empty(http.user_agent()),
                five_tuple.orig,
                five_tuple.resp,
            )?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

fn non_empty(s: &str) -> &str {
    if s.is_empty() {
        "-"
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::stream::http::{HttpRequest, HttpResponse};
    use std::net::SocketAddr;

    #[test]
    fn writes_one_line_per_match() {
        let path = std::env::temp_dir().join(format!("sentrycore-alert-test-{}.log", std::process::id()));
        let mut logger = AlertLogger::open(&path).unwrap();
        let five_tuple = FiveTuple {
            orig: "10.0.0.1:1234".parse::<SocketAddr>().unwrap(),
            resp: "10.0.0.2:80".parse::<SocketAddr>().unwrap(),
            proto: 6,
        };
        let http = Http {
            trans_depth: 0,
            request: HttpRequest {
                method: Some("GET".into()),
                uri: Some("/admin".into()),
                ..Default::default()
            },
            response: HttpResponse::default(),
        };
        let matches = vec![Match {
            sid: 1,
            rev: 1,
            msg: "test alert".to_string(),
        }];
        logger.log(&five_tuple, &http, &matches).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("test alert"));
        assert!(contents.contains("/admin"));
        std::fs::remove_file(&path).ok();
    }
}
