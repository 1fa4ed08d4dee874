//! Per-connection state: TCP session state machine, reassembly, and application-layer parsing.

use std::time::{Duration, Instant};

use super::conn_id::FiveTuple;
use super::ospolicy::OsPolicy;
use super::pdu::{L4Context, L4Pdu};
use super::reassembly::Reassembler;
use super::tcp_sm::{TcpState, TcpStateMachine};
use crate::protocols::packet::tcp::{ACK, FIN, RST, SYN};
use crate::protocols::stream::http::Http;
use crate::protocols::stream::ConnData;

/// TCP-specific per-connection state.
pub(crate) struct TcpFlowState {
    pub(crate) sm: TcpStateMachine,
    /// Reassembler for client -> server bytes.
    pub(crate) ctos: Reassembler,
    /// Reassembler for server -> client bytes.
    pub(crate) stoc: Reassembler,
}

pub(crate) enum L4FlowState {
    Tcp(Box<TcpFlowState>),
    Udp,
}

/// All state tracked for one connection (TCP or UDP).
pub(crate) struct Flow {
    pub(crate) five_tuple: FiveTuple,
    pub(crate) last_seen: Instant,
    pub(crate) inactivity_window: Duration,
    l4: L4FlowState,
    pub(crate) conn: ConnData,
}

impl Flow {
    /// Starts tracking a new TCP connection from an observed client SYN. Returns `None` if `ctxt`
    /// is not a bare SYN (the caller should fall back to [`Flow::new_tcp_midstream`] if midstream
    /// pickup is enabled).
    pub(crate) fn new_tcp(
        ctxt: &L4Context,
        os_policy: OsPolicy,
        reassembly_depth: usize,
        inactivity_window: Duration,
        body_capture_limit: usize,
    ) -> Option<Self> {
        if ctxt.flags & SYN == 0 || ctxt.flags & ACK != 0 || ctxt.flags & RST != 0 {
            return None;
        }
        let window_scale = ctxt.tcp_options.window_scale.unwrap_or(0);
        let sm = TcpStateMachine::new_on_syn(ctxt.seq_no, window_scale, os_policy);
        let mut ctos = Reassembler::new(os_policy, reassembly_depth);
        ctos.init(ctxt.seq_no.wrapping_add(1));
        let stoc = Reassembler::new(os_policy, reassembly_depth);
        let five_tuple = FiveTuple {
            orig: ctxt.src,
            resp: ctxt.dst,
            proto: ctxt.proto,
        };
        Some(Flow {
            conn: ConnData::new(five_tuple, body_capture_limit),
            five_tuple,
            last_seen: Instant::now(),
            inactivity_window,
            l4: L4FlowState::Tcp(Box::new(TcpFlowState {
                sm,
                ctos,
                stoc,
            })),
        })
    }

    /// Starts tracking a TCP connection already in progress (no SYN observed). Assumes the
    /// connection is established; the reassemblers are initialized lazily from the first segment
    /// observed in each direction.
    pub(crate) fn new_tcp_midstream(
        ctxt: &L4Context,
        os_policy: OsPolicy,
        reassembly_depth: usize,
        inactivity_window: Duration,
        body_capture_limit: usize,
    ) -> Self {
        let (client_seq, server_seq) = (ctxt.seq_no, 0);
        let sm = TcpStateMachine::new_midstream(client_seq, server_seq, os_policy);
        let mut ctos = Reassembler::new(os_policy, reassembly_depth);
        ctos.init(ctxt.seq_no);
        let stoc = Reassembler::new(os_policy, reassembly_depth);
        let five_tuple = FiveTuple {
            orig: ctxt.src,
            resp: ctxt.dst,
            proto: ctxt.proto,
        };
        Flow {
            conn: ConnData::new(five_tuple, body_capture_limit),
            five_tuple,
            last_seen: Instant::now(),
            inactivity_window,
            l4: L4FlowState::Tcp(Box::new(TcpFlowState { sm, ctos, stoc })),
        }
    }

    pub(crate) fn new_udp(
        ctxt: &L4Context,
        inactivity_window: Duration,
        body_capture_limit: usize,
    ) -> Self {
        let five_tuple = FiveTuple {
            orig: ctxt.src,
            resp: ctxt.dst,
            proto: ctxt.proto,
        };
        Flow {
            conn: ConnData::new(five_tuple, body_capture_limit),
            five_tuple,
            last_seen: Instant::now(),
            inactivity_window,
            l4: L4FlowState::Udp,
        }
    }

    /// `true` if the packet described by `ctxt` travels from this connection's originator to its
    /// responder.
    pub(crate) fn packet_dir(&self, ctxt: &L4Context) -> bool {
        self.five_tuple.orig == ctxt.src
    }

    /// Feeds one packet to the connection. Returns any HTTP transactions that completed as a
    /// result (request and response both fully parsed, or drained at connection teardown),
    /// paired with this connection's 5-tuple.
    pub(crate) fn process(&mut self, pdu: L4Pdu) -> Vec<(FiveTuple, Http)> {
        match &mut self.l4 {
            L4FlowState::Tcp(_) => self.process_tcp(pdu),
            L4FlowState::Udp => Vec::new(),
        }
    }

    fn process_tcp(&mut self, pdu: L4Pdu) -> Vec<(FiveTuple, Http)> {
        let dir = pdu.dir;
        let seq = pdu.seq_no();
        let ack = pdu.ack_no();
        let flags = pdu.flags();
        let length = pdu.length() as u32;
        let window = pdu.window();
        let ts_opt = pdu.ctxt.tcp_options.timestamps;
        let payload = pdu.payload().ok().map(|p| p.to_vec());

        let L4FlowState::Tcp(tcp) = &mut self.l4 else {
            return Vec::new();
        };
        tcp.sm.on_segment(dir, seq, ack, flags, length, window);
        if !tcp.ctos.is_initialized() {
            tcp.ctos.init(seq);
        }
        if !tcp.stoc.is_initialized() {
            tcp.stoc.init(seq);
        }
        let paws_ok = tcp.sm.validate_timestamp(dir, ts_opt);

        let mut completed = Vec::new();
        let deliverable_state = matches!(
            tcp.sm.state,
            TcpState::Established
                | TcpState::FinWait1
                | TcpState::FinWait2
                | TcpState::CloseWait
                | TcpState::Closing
                | TcpState::LastAck
        );
        if let Some(data) = payload {
            if !data.is_empty() && paws_ok && deliverable_state {
                let messages = if dir {
                    tcp.ctos.insert(seq, data)
                } else {
                    tcp.stoc.insert(seq, data)
                };
                for msg in messages {
                    let touched = if dir {
                        self.conn.parser.process_ctos(&msg.data)
                    } else {
                        self.conn.parser.process_stoc(&msg.data)
                    };
                    if let Some(id) = touched {
                        if let Some(http) = self.conn.parser.remove_transaction(id) {
                            crate::stats::record_http_transaction();
                            completed.push((self.five_tuple, http));
                        }
                    }
                }
            } else if !paws_ok {
                log::debug!("dropping segment failing PAWS check for {}", self.five_tuple);
            }
        }

        if flags & FIN != 0 {
            self.conn.parser.close();
        }
        if tcp.sm.is_closed() {
            let five_tuple = self.five_tuple;
            completed.extend(
                self.conn
                    .parser
                    .drain_transactions()
                    .into_iter()
                    .map(move |http| (five_tuple, http)),
            );
        }
        completed
    }

    /// `true` if the connection has naturally terminated (RST, or both sides' FIN acked).
    pub(crate) fn terminated(&self) -> bool {
        match &self.l4 {
            L4FlowState::Tcp(tcp) => tcp.sm.is_closed(),
            L4FlowState::Udp => false,
        }
    }

    /// Drains and returns any outstanding HTTP transactions, regardless of completion. Called on
    /// connection teardown (timeout, table eviction, or run shutdown).
    pub(crate) fn drain(&mut self) -> Vec<(FiveTuple, Http)> {
        let five_tuple = self.five_tuple;
        self.conn
            .parser
            .drain_transactions()
            .into_iter()
            .map(move |http| (five_tuple, http))
            .collect()
    }
}
