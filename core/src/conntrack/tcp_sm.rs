//! TCP session state machine.
//!
//! Tracks each half of a TCP connection through the handshake, data transfer, and teardown,
//! mirroring the states a real TCP stack goes through (`stream-tcp.c`'s `TCP_*` enum) rather than
//! just inferring "established" from the first data segment. This lets the reassembly store
//! reject segments that arrive before a connection is actually open (or after it has closed) and
//! lets the engine pick up a connection already in progress (midstream) instead of discarding it.

use super::ospolicy::OsPolicy;
use crate::protocols::packet::tcp::{ACK, FIN, RST, SYN};

use serde::Serialize;

/// Connection-wide state, independent of which side sent the most recent packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TcpState {
    /// No SYN observed yet for this 5-tuple; only reached for connections picked up midstream.
    None,
    SynSent,
    SynRecv,
    Established,
    FinWait1,
    FinWait2,
    Closing,
    CloseWait,
    LastAck,
    TimeWait,
    Closed,
}

/// Per-direction sequence-number tracking used by the state machine and the reassembly store.
#[derive(Debug, Clone, Copy, Default)]
pub struct HalfStream {
    /// Initial sequence number.
    pub isn: u32,
    /// Next sequence number expected from this side.
    pub next_seq: u32,
    /// Highest sequence number + length seen from this side (right edge ever reached).
    pub max_seq_seen: u32,
    /// Most recent (TSval, TSecr) seen from this side, for PAWS.
    pub last_ts: Option<(u32, u32)>,
    /// Window scale shift negotiated for this side (0 if not negotiated / pre-established).
    pub window_scale: u8,
    /// Most recently advertised receive window from this side, scaled by `window_scale`. Used to
    /// bound RST acceptance on OS policies that accept any in-window RST rather than only one
    /// matching `next_seq` exactly.
    pub window: u32,
    /// `true` once a FIN has been seen from this side.
    pub fin_seen: bool,
}

/// Drives [`TcpState`] transitions for one connection.
///
/// Grounded in Suricata's `StreamTcpPacket` dispatch table: each state has its own handler that
/// only accepts the flag combinations that make sense for it, and unexpected flags (e.g. a second
/// SYN after the handshake, outside of the interpreted 4-way-handshake case) are logged and
/// otherwise ignored rather than treated as errors.
#[derive(Debug)]
pub struct TcpStateMachine {
    pub state: TcpState,
    pub client: HalfStream,
    pub server: HalfStream,
    /// `true` if this connection was first observed already in `Established` (no SYN seen).
    pub midstream: bool,
    /// `true` once a simultaneous-close / 4-way-handshake pattern has been detected and the
    /// roles have been swapped (a new SYN from the original server).
    pub four_whs: bool,
    /// Destination host's assumed TCP/IP stack, governing RST acceptance (see [`Self::rst_accepted`]).
    pub os_policy: OsPolicy,
    /// `true` once an ACK has been observed whose ack number doesn't match what the peer is
    /// expecting, suggesting an attacker is trying to desynchronize our view of the stream from
    /// the endpoint's. Some OS policies stop accepting RSTs once this is set. Also set by a
    /// final handshake ACK whose ack number doesn't match the server's ISN + 1, which leaves the
    /// connection stuck in `SynRecv` rather than sliding into `Established`.
    pub detection_evasion_suspected: bool,
}

impl TcpStateMachine {
    /// Starts a new state machine from an observed client SYN.
    pub fn new_on_syn(seq_no: u32, window_scale: u8, os_policy: OsPolicy) -> Self {
        TcpStateMachine {
            state: TcpState::SynSent,
            client: HalfStream {
                isn: seq_no,
                next_seq: seq_no.wrapping_add(1),
                max_seq_seen: seq_no.wrapping_add(1),
                window_scale,
                ..Default::default()
            },
            server: HalfStream::default(),
            midstream: false,
            four_whs: false,
            os_policy,
            detection_evasion_suspected: false,
        }
    }

    /// Starts a state machine for a connection first observed mid-stream (no SYN seen), assuming
    /// it is already established. Suricata calls this "midstream pickup" and, absent
    /// `stream.midstream = false`, treats the connection as fully open from the first packet.
    pub fn new_midstream(client_seq: u32, server_seq: u32, os_policy: OsPolicy) -> Self {
        TcpStateMachine {
            state: TcpState::Established,
            client: HalfStream {
                isn: client_seq,
                next_seq: client_seq,
                max_seq_seen: client_seq,
                // Midstream pickups assume the maximum window scale, since the handshake that
                // would have negotiated it was never observed.
                window_scale: 14,
                ..Default::default()
            },
            server: HalfStream {
                isn: server_seq,
                next_seq: server_seq,
                max_seq_seen: server_seq,
                window_scale: 14,
                ..Default::default()
            },
            midstream: true,
            four_whs: false,
            os_policy,
            detection_evasion_suspected: false,
        }
    }

    /// Advances the state machine on receipt of a segment. `dir == true` means client -> server
    /// (the connection originator is always "client" here, regardless of which side sent this
    /// particular packet).
    pub fn on_segment(
        &mut self,
        dir: bool,
        seq_no: u32,
        ack_no: u32,
        flags: u8,
        length: u32,
        window: u16,
    ) {
        use TcpState::*;
        let syn = flags & SYN != 0;
        let ack = flags & ACK != 0;
        let fin = flags & FIN != 0;
        let rst = flags & RST != 0;

        if ack && self.state == Established {
            let other_next_seq = if dir {
                self.server.next_seq
            } else {
                self.client.next_seq
            };
            if ack_no != 0 && ack_no != other_next_seq {
                self.detection_evasion_suspected = true;
            }
        }

        if rst {
            if self.rst_accepted(dir, seq_no) {
                self.state = Closed;
            }
            return;
        }

        match (self.state, dir) {
            (SynSent, false) if syn && ack => {
                self.server = HalfStream {
                    isn: seq_no,
                    next_seq: seq_no.wrapping_add(1),
                    max_seq_seen: seq_no.wrapping_add(1),
                    ..Default::default()
                };
                self.state = SynRecv;
            }
            // Simultaneous open: both sides sent a bare SYN.
            (SynSent, false) if syn && !ack => {
                self.server = HalfStream {
                    isn: seq_no,
                    next_seq: seq_no.wrapping_add(1),
                    max_seq_seen: seq_no.wrapping_add(1),
                    ..Default::default()
                };
                self.state = SynRecv;
                self.four_whs = true;
            }
            (SynRecv, true) if ack => {
                if ack_no == self.server.next_seq {
                    self.state = Established;
                } else {
                    self.detection_evasion_suspected = true;
                }
            }
            (_, _) if matches!(self.state, Established | SynRecv) && fin => {
                self.mark_fin(dir);
                self.state = if dir { FinWait1 } else { CloseWait };
            }
            (FinWait1, _) => {
                if fin && !dir {
                    self.mark_fin(dir);
                    self.state = Closing;
                } else if ack && !dir {
                    self.state = FinWait2;
                }
            }
            (FinWait2, false) if fin => {
                self.mark_fin(dir);
                self.state = TimeWait;
            }
            (Closing, _) if ack => {
                self.state = TimeWait;
            }
            (CloseWait, true) if fin => {
                self.mark_fin(dir);
                self.state = LastAck;
            }
            (LastAck, false) if ack => {
                self.state = Closed;
            }
            _ => {
                log::debug!(
                    "unexpected flags {:#04x} in state {:?} dir {}",
                    flags,
                    self.state,
                    dir
                );
            }
        }

        let half = if dir { &mut self.client } else { &mut self.server };
        let mut end = seq_no.wrapping_add(length);
        if syn || fin {
            end = end.wrapping_add(1);
        }
        if seq_ahead(end, half.max_seq_seen) {
            half.max_seq_seen = end;
        }
        half.window = (window as u32) << half.window_scale;
    }

    fn mark_fin(&mut self, dir: bool) {
        let half = if dir { &mut self.client } else { &mut self.server };
        half.fin_seen = true;
    }

    /// Whether a RST with this sequence number, arriving from `dir`, tears down the connection.
    ///
    /// Grounded in `stream-tcp.c`'s per-OS-policy RST validation (`StreamTcpPacketStateNone`
    /// RST handling, and `StreamTcpValidateRst`): strict stacks only accept a RST that lands
    /// exactly on the next expected byte, while Linux/Solaris-family stacks accept any RST inside
    /// the current receive window (and stop trusting RSTs at all once evasion is suspected).
    fn rst_accepted(&self, dir: bool, seq_no: u32) -> bool {
        let half = if dir { &self.client } else { &self.server };
        use OsPolicy::*;
        match self.os_policy {
            Hpux11 | Windows | Bsd | Macos | Windows2k3 | Vista | Irix | Hpux10 | First | Last => {
                seq_no == half.next_seq
            }
            Linux | OldLinux | Solaris => {
                if self.detection_evasion_suspected {
                    return false;
                }
                let window = half.window.max(1);
                seq_geq(seq_no, half.next_seq) && seq_lt(seq_no, half.next_seq.wrapping_add(window))
            }
        }
    }

    /// `true` once both sides have completed the close handshake or a RST was seen.
    pub fn is_closed(&self) -> bool {
        self.state == TcpState::Closed || self.state == TcpState::TimeWait
    }

    /// Validates a timestamp option against PAWS (Protection Against Wrapped Sequence numbers,
    /// RFC 7323 S5.3): a segment's TSval must not be strictly less than the last valid TSval seen
    /// from the same side, modulo wraparound. Grounded in `stream-tcp.c`'s `StreamTcpValidateTimestamp`.
    pub fn validate_timestamp(&mut self, dir: bool, ts: Option<(u32, u32)>) -> bool {
        let half = if dir { &mut self.client } else { &mut self.server };
        match (half.last_ts, ts) {
            (Some((last_tsval, _)), Some((tsval, tsecr))) => {
                if seq_ahead(tsval, last_tsval) || tsval == last_tsval {
                    half.last_ts = Some((tsval, tsecr));
                    true
                } else {
                    false
                }
            }
            (None, Some(pair)) => {
                half.last_ts = Some(pair);
                true
            }
            (_, None) => true,
        }
    }
}

/// Signed sequence-number comparison per RFC 1323: `a` is considered "ahead of or equal to" `b`
/// if the gap, interpreted as a signed 32-bit delta, is non-negative.
#[inline]
pub fn seq_ahead(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

#[inline]
pub fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

#[inline]
pub fn seq_leq(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) <= 0
}

#[inline]
pub fn seq_geq(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) >= 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handshake(os_policy: OsPolicy) -> TcpStateMachine {
        let mut sm = TcpStateMachine::new_on_syn(1000, 0, os_policy);
        sm.on_segment(false, 5000, 1001, SYN | ACK, 0, 65535);
        sm.on_segment(true, 1001, 5001, ACK, 0, 65535);
        sm
    }

    #[test]
    fn three_way_handshake_reaches_established() {
        let mut sm = TcpStateMachine::new_on_syn(1000, 0, OsPolicy::Linux);
        assert_eq!(sm.state, TcpState::SynSent);
        sm.on_segment(false, 5000, 1001, SYN | ACK, 0, 65535);
        assert_eq!(sm.state, TcpState::SynRecv);
        sm.on_segment(true, 1001, 5001, ACK, 0, 65535);
        assert_eq!(sm.state, TcpState::Established);
    }

    #[test]
    fn client_initiated_close_sequence() {
        let mut sm = handshake(OsPolicy::Linux);
        sm.on_segment(true, 1001, 5001, FIN | ACK, 0, 65535);
        assert_eq!(sm.state, TcpState::FinWait1);
        sm.on_segment(false, 5001, 1002, ACK, 0, 65535);
        assert_eq!(sm.state, TcpState::FinWait2);
        sm.on_segment(false, 5001, 1002, FIN | ACK, 0, 65535);
        assert_eq!(sm.state, TcpState::TimeWait);
    }

    #[test]
    fn rst_at_expected_seq_closes_strict_policy() {
        let mut sm = handshake(OsPolicy::Windows);
        sm.on_segment(true, 1001, 0, RST, 0, 65535);
        assert_eq!(sm.state, TcpState::Closed);
    }

    #[test]
    fn rst_off_by_one_rejected_by_strict_policy() {
        let mut sm = handshake(OsPolicy::Windows);
        sm.on_segment(true, 1050, 0, RST, 0, 65535);
        assert_eq!(sm.state, TcpState::Established);
    }

    #[test]
    fn rst_anywhere_in_window_closes_linux_policy() {
        let mut sm = handshake(OsPolicy::Linux);
        sm.on_segment(true, 1050, 0, RST, 0, 65535);
        assert_eq!(sm.state, TcpState::Closed);
    }

    #[test]
    fn evasion_suspected_ack_suppresses_linux_rst_but_not_windows() {
        let mut linux = handshake(OsPolicy::Linux);
        linux.on_segment(true, 1001, 99_999, ACK, 0, 65535);
        assert!(linux.detection_evasion_suspected);
        linux.on_segment(true, 1001, 0, RST, 0, 65535);
        assert_eq!(linux.state, TcpState::Established, "Linux ignores RST once evasion is suspected");

        let mut windows = handshake(OsPolicy::Windows);
        windows.on_segment(true, 1001, 99_999, ACK, 0, 65535);
        assert!(windows.detection_evasion_suspected);
        windows.on_segment(true, 1001, 0, RST, 0, 65535);
        assert_eq!(windows.state, TcpState::Closed, "Windows still honors an exact-seq RST");
    }

    #[test]
    fn final_handshake_ack_with_wrong_ack_no_stays_in_syn_recv() {
        let mut sm = TcpStateMachine::new_on_syn(1000, 0, OsPolicy::Linux);
        sm.on_segment(false, 5000, 1001, SYN | ACK, 0, 65535);
        assert_eq!(sm.state, TcpState::SynRecv);
        sm.on_segment(true, 1001, 4242, ACK, 0, 65535);
        assert_eq!(sm.state, TcpState::SynRecv, "bogus ack must not complete the handshake");
        assert!(sm.detection_evasion_suspected);
    }

    #[test]
    fn seq_comparisons_handle_wraparound() {
        assert!(seq_ahead(10u32.wrapping_sub(5), 0u32.wrapping_sub(5)));
        assert!(seq_lt(5, 10));
        assert!(seq_geq(u32::MAX, u32::MAX - 1));
    }

    #[test]
    fn paws_rejects_stale_timestamp() {
        let mut sm = TcpStateMachine::new_on_syn(1000, 0, OsPolicy::Linux);
        assert!(sm.validate_timestamp(true, Some((100, 1))));
        assert!(sm.validate_timestamp(true, Some((101, 1))));
        assert!(!sm.validate_timestamp(true, Some((50, 1))));
    }
}
