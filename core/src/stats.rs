//! Ambient run counters.
//!
//! A single-threaded run keeps these as plain thread-local cells rather than atomics; there's
//! only ever one packet-processing thread in the offline pipeline.

use std::cell::Cell;

thread_local! {
    static PACKETS_TOTAL: Cell<u64> = const { Cell::new(0) };
    static BYTES_TOTAL: Cell<u64> = const { Cell::new(0) };
    static TCP_PACKETS: Cell<u64> = const { Cell::new(0) };
    static UDP_PACKETS: Cell<u64> = const { Cell::new(0) };
    static CHECKSUM_DROPS: Cell<u64> = const { Cell::new(0) };
    static UNPARSEABLE_DROPS: Cell<u64> = const { Cell::new(0) };
    static TCP_NEW_CONNECTIONS: Cell<u64> = const { Cell::new(0) };
    static UDP_NEW_CONNECTIONS: Cell<u64> = const { Cell::new(0) };
    static REASSEMBLY_OOO_DROPS: Cell<u64> = const { Cell::new(0) };
    static HTTP_TRANSACTIONS: Cell<u64> = const { Cell::new(0) };
    static ALERTS_FIRED: Cell<u64> = const { Cell::new(0) };
}

trait CellExt {
    fn bump(&'static self);
    fn add(&'static self, n: u64);
}

impl CellExt for std::thread::LocalKey<Cell<u64>> {
    fn bump(&'static self) {
        self.add(1);
    }

    fn add(&'static self, n: u64) {
        self.with(|c| c.set(c.get() + n));
    }
}

pub(crate) fn record_packet(proto_is_tcp: bool, bytes: u64) {
    PACKETS_TOTAL.bump();
    BYTES_TOTAL.add(bytes);
    if proto_is_tcp {
        TCP_PACKETS.bump();
    } else {
        UDP_PACKETS.bump();
    }
}

pub(crate) fn record_checksum_drop() {
    CHECKSUM_DROPS.bump();
}

pub(crate) fn record_unparseable_drop() {
    UNPARSEABLE_DROPS.bump();
}

pub(crate) fn record_new_connection(proto_is_tcp: bool) {
    if proto_is_tcp {
        TCP_NEW_CONNECTIONS.bump();
    } else {
        UDP_NEW_CONNECTIONS.bump();
    }
}

pub(crate) fn record_reassembly_drop() {
    REASSEMBLY_OOO_DROPS.bump();
}

pub(crate) fn record_http_transaction() {
    HTTP_TRANSACTIONS.bump();
}

pub(crate) fn record_alert() {
    ALERTS_FIRED.bump();
}

/// A point-in-time snapshot of the run's counters.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct Stats {
    pub packets_total: u64,
    pub bytes_total: u64,
    pub tcp_packets: u64,
    pub udp_packets: u64,
    pub checksum_drops: u64,
    pub unparseable_drops: u64,
    pub tcp_new_connections: u64,
    pub udp_new_connections: u64,
    pub reassembly_ooo_drops: u64,
    pub http_transactions: u64,
    pub alerts_fired: u64,
}

/// Reads the current counter values without resetting them.
pub fn snapshot() -> Stats {
    Stats {
        packets_total: PACKETS_TOTAL.with(Cell::get),
        bytes_total: BYTES_TOTAL.with(Cell::get),
        tcp_packets: TCP_PACKETS.with(Cell::get),
        udp_packets: UDP_PACKETS.with(Cell::get),
        checksum_drops: CHECKSUM_DROPS.with(Cell::get),
        unparseable_drops: UNPARSEABLE_DROPS.with(Cell::get),
        tcp_new_connections: TCP_NEW_CONNECTIONS.with(Cell::get),
        udp_new_connections: UDP_NEW_CONNECTIONS.with(Cell::get),
        reassembly_ooo_drops: REASSEMBLY_OOO_DROPS.with(Cell::get),
        http_transactions: HTTP_TRANSACTIONS.with(Cell::get),
        alerts_fired: ALERTS_FIRED.with(Cell::get),
    }
}

/// Logs a one-line summary of the run's counters at `info` level.
pub fn log_summary() {
    let s = snapshot();
    log::info!(
        "packets={} bytes={} tcp_pkts={} udp_pkts={} checksum_drops={} unparseable_drops={} \
         tcp_conns={} udp_conns={} reassembly_drops={} http_txns={} alerts={}",
        s.packets_total,
        s.bytes_total,
        s.tcp_packets,
        s.udp_packets,
        s.checksum_drops,
        s.unparseable_drops,
        s.tcp_new_connections,
        s.udp_new_connections,
        s.reassembly_ooo_drops,
        s.http_transactions,
        s.alerts_fired,
    );
}
