//! Connection tracking: the TCP session state machine, stream reassembly, and HTTP parsing for
//! every live connection.
//!
//! One [`FlowTable`] is created per worker thread; since pcap-offline capture is read by a single
//! thread, a run creates exactly one.

pub(crate) mod flow;
pub mod conn_id;
pub mod ospolicy;
pub(crate) mod pdu;
pub mod reassembly;
pub mod tcp_sm;
mod timerwheel;

use self::conn_id::{ConnId, FiveTuple};
use self::flow::Flow;
use self::ospolicy::OsPolicyTable;
use self::pdu::{L4Context, L4Pdu};
use self::timerwheel::TimerWheel;
use crate::config::ConnTrackConfig;
use crate::memory::mbuf::Mbuf;
use crate::protocols::packet::tcp::TCP_PROTOCOL;
use crate::protocols::packet::udp::UDP_PROTOCOL;
use crate::protocols::stream::http::Http;

use std::cmp;
use std::time::{Duration, Instant};

use hashlink::linked_hash_map::{LinkedHashMap, RawEntryMut};

/// Tracks state for every live TCP and UDP connection and drives application-layer parsing.
pub struct FlowTable {
    config: TrackerConfig,
    table: LinkedHashMap<ConnId, Flow>,
    timerwheel: TimerWheel,
}

impl FlowTable {
    /// Creates a new, empty flow table. `body_capture_limit` bounds how many HTTP body bytes are
    /// retained per transaction for buffer matching (see
    /// [`crate::config::DetectConfig::body_capture_limit`]).
    pub fn new(config: &ConnTrackConfig, body_capture_limit: usize) -> Self {
        let config = TrackerConfig::from(config, body_capture_limit);
        let table = LinkedHashMap::with_capacity(config.max_connections);
        let timerwheel = TimerWheel::new(
            cmp::max(config.tcp_inactivity_timeout, config.udp_inactivity_timeout),
            config.timeout_resolution,
        );
        FlowTable {
            config,
            table,
            timerwheel,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.table.len()
    }

    /// Validates and parses a raw frame's transport-layer context, applying the checksum gate
    /// (dropping the packet entirely if checksum validation is enabled and fails) before tracking
    /// state is touched.
    pub fn parse_packet(&self, mbuf: &Mbuf) -> Option<L4Context> {
        match L4Context::new(mbuf, self.config.checksum_validation) {
            Ok(ctxt) => {
                if self.config.checksum_validation && !ctxt.checksum_valid {
                    log::debug!("dropping packet with invalid checksum");
                    crate::stats::record_checksum_drop();
                    return None;
                }
                crate::stats::record_packet(ctxt.proto == TCP_PROTOCOL, mbuf.data_len() as u64);
                Some(ctxt)
            }
            Err(e) => {
                log::trace!("unparseable packet: {}", e);
                crate::stats::record_unparseable_drop();
                None
            }
        }
    }

    /// Processes one incoming packet. Returns any HTTP transactions that completed as a result,
    /// each paired with the 5-tuple of the connection it belongs to.
    pub fn process(&mut self, mbuf: Mbuf, ctxt: L4Context) -> Vec<(FiveTuple, Http)> {
        let conn_id = ConnId::new(ctxt.src, ctxt.dst, ctxt.proto);
        match self.table.raw_entry_mut().from_key(&conn_id) {
            RawEntryMut::Occupied(mut occupied) => {
                let flow = occupied.get_mut();
                let dir = flow.packet_dir(&ctxt);
                flow.last_seen = Instant::now();
                flow.inactivity_window = match ctxt.proto {
                    TCP_PROTOCOL => self.config.tcp_inactivity_timeout,
                    _ => self.config.udp_inactivity_timeout,
                };
                let pdu = L4Pdu::new(mbuf, ctxt, dir);
                let completed = flow.process(pdu);
                if flow.terminated() {
                    let (_, mut flow) = occupied.remove_entry();
                    let mut all = completed;
                    all.extend(flow.drain());
                    return all;
                }
                completed
            }
            RawEntryMut::Vacant(_) => {
                if self.size() >= self.config.max_connections {
                    log::error!("flow table full, dropping packet");
                    return Vec::new();
                }
                let os_policy = self.config.os_policy.lookup(ctxt.dst.ip());
                let flow = match ctxt.proto {
                    TCP_PROTOCOL => Flow::new_tcp(
                        &ctxt,
                        os_policy,
                        self.config.reassembly_depth,
                        self.config.tcp_establish_timeout,
                        self.config.body_capture_limit,
                    )
                    .or_else(|| {
                        if self.config.midstream {
                            Some(Flow::new_tcp_midstream(
                                &ctxt,
                                os_policy,
                                self.config.reassembly_depth,
                                self.config.tcp_inactivity_timeout,
                                self.config.body_capture_limit,
                            ))
                        } else {
                            None
                        }
                    }),
                    UDP_PROTOCOL => Some(Flow::new_udp(
                        &ctxt,
                        self.config.udp_inactivity_timeout,
                        self.config.body_capture_limit,
                    )),
                    _ => None,
                };
                let Some(mut flow) = flow else {
                    return Vec::new();
                };
                crate::stats::record_new_connection(ctxt.proto == TCP_PROTOCOL);
                let pdu = L4Pdu::new(mbuf, ctxt, true);
                let completed = flow.process(pdu);
                if !flow.terminated() {
                    self.timerwheel
                        .insert(&conn_id, flow.last_seen, flow.inactivity_window);
                    self.table.insert(conn_id, flow);
                }
                completed
            }
        }
    }

    /// Drains all remaining connections, e.g. at the end of an offline run.
    pub fn drain(&mut self) -> Vec<(FiveTuple, Http)> {
        log::info!("draining flow table ({} connections)", self.table.len());
        let mut out = Vec::new();
        for (_, mut flow) in self.table.drain() {
            out.extend(flow.drain());
        }
        out
    }

    /// Checks for and removes inactive connections. Cheap to call every iteration of the
    /// processing loop; only does work once per configured timeout-check period.
    pub fn check_inactive(&mut self) -> Vec<(FiveTuple, Http)> {
        let mut out = Vec::new();
        self.timerwheel.check_inactive(&mut self.table, &mut |mut flow| {
            out.extend(flow.drain());
        });
        out
    }
}

/// Resolved, unit-bearing connection tracking configuration.
struct TrackerConfig {
    max_connections: usize,
    udp_inactivity_timeout: Duration,
    tcp_inactivity_timeout: Duration,
    tcp_establish_timeout: Duration,
    timeout_resolution: Duration,
    reassembly_depth: usize,
    checksum_validation: bool,
    midstream: bool,
    os_policy: OsPolicyTable,
    body_capture_limit: usize,
}

impl TrackerConfig {
    fn from(config: &ConnTrackConfig, body_capture_limit: usize) -> Self {
        TrackerConfig {
            max_connections: config.max_connections,
            udp_inactivity_timeout: Duration::from_millis(config.udp_inactivity_timeout as u64),
            tcp_inactivity_timeout: Duration::from_millis(config.tcp_inactivity_timeout as u64),
            tcp_establish_timeout: Duration::from_millis(config.tcp_establish_timeout as u64),
            timeout_resolution: Duration::from_millis(config.timeout_resolution as u64),
            reassembly_depth: config.reassembly_depth,
            checksum_validation: config.checksum_validation,
            midstream: config.midstream,
            os_policy: config.os_policy_table(),
            body_capture_limit,
        }
    }
}
