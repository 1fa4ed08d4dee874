//! Wires the flow table, detection engine, and alert log into one pipeline stage.
//!
//! [`Inspector`] owns everything downstream of packet decoding: it feeds each packet to the
//! [`FlowTable`](crate::conntrack::FlowTable), evaluates the [`Engine`](crate::detect::Engine)
//! against every HTTP transaction the flow table completes, and renders matches to the
//! [`AlertLogger`](crate::alert::AlertLogger).

use crate::alert::AlertLogger;
use crate::conntrack::FlowTable;
use crate::detect::{build_engine, Engine};
use crate::memory::mbuf::Mbuf;
use crate::protocols::stream::http::Http;
use crate::{config::AppConfig, conntrack::conn_id::FiveTuple};

use anyhow::Result;

pub struct Inspector {
    flow_table: FlowTable,
    engine: Engine,
    alerts: AlertLogger,
}

impl Inspector {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let flow_table = FlowTable::new(&config.stream, config.detect.body_capture_limit);
        let engine = build_engine(&config.detect)?;
        let alerts = AlertLogger::open(&config.detect.alert_log)?;
        Ok(Inspector {
            flow_table,
            engine,
            alerts,
        })
    }

    /// Parses and tracks one packet, evaluating any HTTP transactions it completes.
    pub fn process_packet(&mut self, mbuf: Mbuf) -> Result<()> {
        let Some(ctxt) = self.flow_table.parse_packet(&mbuf) else {
            return Ok(());
        };
        let completed = self.flow_table.process(mbuf, ctxt);
        self.evaluate_all(completed)
    }

    /// Expires inactive connections, evaluating any HTTP transactions outstanding on them.
    pub fn check_inactive(&mut self) -> Result<()> {
        let completed = self.flow_table.check_inactive();
        self.evaluate_all(completed)
    }

    /// Drains every remaining connection, e.g. at the end of an offline run.
    pub fn finish(&mut self) -> Result<()> {
        let completed = self.flow_table.drain();
        self.evaluate_all(completed)
    }

    fn evaluate_all(&mut self, completed: Vec<(FiveTuple, Http)>) -> Result<()> {
        if self.engine.is_empty() {
            return Ok(());
        }
        for (five_tuple, http) in completed {
            let matches = self.engine.evaluate(&http);
            if !matches.is_empty() {
                self.alerts.log(&five_tuple, &http, &matches)?;
            }
        }
        Ok(())
    }
}
