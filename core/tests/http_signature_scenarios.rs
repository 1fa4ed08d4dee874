//! End-to-end coverage driving raw Ethernet/IPv4/TCP frames through the flow table and
//! evaluating the signatures that fire on the resulting HTTP transactions.

use std::net::Ipv4Addr;

use pnet::datalink::MacAddr;

use sentrycore::conntrack::ospolicy::OsPolicy;
use sentrycore::conntrack::FlowTable;
use sentrycore::config::ConnTrackConfig;
use sentrycore::detect::parser::parse_rule;
use sentrycore::detect::Engine;
use sentrycore::protocols::packet::tcp::{ACK, FIN, PSH, RST, SYN};
use sentrycore::protocols::stream::http::Http;
use sentrycore::Mbuf;

const CLIENT_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const SERVER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
const CLIENT_PORT: u16 = 51000;
const SERVER_PORT: u16 = 80;

#[allow(clippy::too_many_arguments)]
fn frame(
    src_ip: Ipv4Addr,
    src_port: u16,
    dst_ip: Ipv4Addr,
    dst_port: u16,
    seq: u32,
    ack: u32,
    flags: u8,
    window: u16,
    payload: &[u8],
) -> Vec<u8> {
    let tcp_len = 20 + payload.len();
    let total_len = 20 + tcp_len;
    let mut buf = Vec::with_capacity(14 + total_len);

    // Ethernet header.
    let dst_mac = MacAddr::new(0, 0, 0, 0, 0, 2);
    let src_mac = MacAddr::new(0, 0, 0, 0, 0, 1);
    buf.extend_from_slice(&[dst_mac.0, dst_mac.1, dst_mac.2, dst_mac.3, dst_mac.4, dst_mac.5]);
    buf.extend_from_slice(&[src_mac.0, src_mac.1, src_mac.2, src_mac.3, src_mac.4, src_mac.5]);
    buf.extend_from_slice(&0x0800u16.to_be_bytes());

    // IPv4 header, no options.
    buf.push(0x45);
    buf.push(0x00);
    buf.extend_from_slice(&(total_len as u16).to_be_bytes());
    buf.extend_from_slice(&0u16.to_be_bytes()); // identification
    buf.extend_from_slice(&0x4000u16.to_be_bytes()); // don't-fragment
    buf.push(64); // ttl
    buf.push(6); // tcp
    buf.extend_from_slice(&0u16.to_be_bytes()); // header checksum, unchecked in tests
    buf.extend_from_slice(&src_ip.octets());
    buf.extend_from_slice(&dst_ip.octets());

    // TCP header, no options.
    buf.extend_from_slice(&src_port.to_be_bytes());
    buf.extend_from_slice(&dst_port.to_be_bytes());
    buf.extend_from_slice(&seq.to_be_bytes());
    buf.extend_from_slice(&ack.to_be_bytes());
    buf.push(0x50); // data offset = 5, ns = 0
    buf.push(flags);
    buf.extend_from_slice(&window.to_be_bytes());
    buf.extend_from_slice(&0u16.to_be_bytes()); // checksum, unchecked in tests
    buf.extend_from_slice(&0u16.to_be_bytes()); // urgent pointer

    buf.extend_from_slice(payload);
    buf
}

/// Drives one connection's worth of hand-built frames, in order, through a [`FlowTable`] and
/// returns every HTTP transaction it hands back along the way.
struct Connection {
    table: FlowTable,
    pkt_no: u64,
}

impl Connection {
    fn new(config: &ConnTrackConfig) -> Self {
        Connection {
            table: FlowTable::new(config, 1 << 16),
            pkt_no: 0,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn send(
        &mut self,
        src_ip: Ipv4Addr,
        src_port: u16,
        dst_ip: Ipv4Addr,
        dst_port: u16,
        seq: u32,
        ack: u32,
        flags: u8,
        window: u16,
        payload: &[u8],
    ) -> Vec<Http> {
        let bytes = frame(src_ip, src_port, dst_ip, dst_port, seq, ack, flags, window, payload);
        let ts = 1_700_000_000_000_000i64 + self.pkt_no as i64;
        let mbuf = Mbuf::new(&bytes, self.pkt_no, ts);
        self.pkt_no += 1;
        let Some(ctxt) = self.table.parse_packet(&mbuf) else {
            return Vec::new();
        };
        self.table
            .process(mbuf, ctxt)
            .into_iter()
            .map(|(_, http)| http)
            .collect()
    }

    fn size(&self) -> usize {
        self.table.size()
    }
}

fn base_config() -> ConnTrackConfig {
    ConnTrackConfig {
        checksum_validation: false,
        ..Default::default()
    }
}

/// Runs a standard 3-way handshake, returning the client's next sequence number (1 past the SYN).
fn handshake(conn: &mut Connection) -> (u32, u32) {
    let client_isn = 1000u32;
    let server_isn = 9000u32;
    conn.send(CLIENT_IP, CLIENT_PORT, SERVER_IP, SERVER_PORT, client_isn, 0, SYN, 64240, &[]);
    conn.send(SERVER_IP, SERVER_PORT, CLIENT_IP, CLIENT_PORT, server_isn, client_isn + 1, SYN | ACK, 64240, &[]);
    conn.send(CLIENT_IP, CLIENT_PORT, SERVER_IP, SERVER_PORT, client_isn + 1, server_isn + 1, ACK, 64240, &[]);
    (client_isn + 1, server_isn + 1)
}

/// Sends a clean, symmetric close (client FIN first) and returns whatever transactions were
/// drained as a result. Stops as soon as the state machine reaches `TimeWait`/`Closed` (the
/// client's final ACK of the server's FIN is not needed to get there and is deliberately omitted
/// so the connection's entry is not resurrected by a stray post-teardown packet).
fn close(conn: &mut Connection, client_seq: u32, server_seq: u32) -> Vec<Http> {
    let mut out = Vec::new();
    out.extend(conn.send(CLIENT_IP, CLIENT_PORT, SERVER_IP, SERVER_PORT, client_seq, server_seq, FIN | ACK, 64240, &[]));
    out.extend(conn.send(SERVER_IP, SERVER_PORT, CLIENT_IP, CLIENT_PORT, server_seq, client_seq + 1, ACK, 64240, &[]));
    out.extend(conn.send(SERVER_IP, SERVER_PORT, CLIENT_IP, CLIENT_PORT, server_seq, client_seq + 1, FIN | ACK, 64240, &[]));
    out
}

#[test]
fn uri_content_match_fires_on_full_request_response_cycle() {
    let config = base_config();
    let mut conn = Connection::new(&config);
    let (mut client_seq, server_seq) = handshake(&mut conn);

    let mut transactions = Vec::new();

    let request = b"POST /one HTTP/1.0\r\nHost: example.com\r\nContent-Length: 1\r\n\r\nX";
    transactions.extend(conn.send(CLIENT_IP, CLIENT_PORT, SERVER_IP, SERVER_PORT, client_seq, server_seq, PSH | ACK, 64240, request));
    client_seq += request.len() as u32;

    let response = b"HTTP/1.0 200 OK\r\nContent-Length: 2\r\n\r\nok";
    transactions.extend(conn.send(SERVER_IP, SERVER_PORT, CLIENT_IP, CLIENT_PORT, server_seq, client_seq, PSH | ACK, 64240, response));
    let server_seq = server_seq + response.len() as u32;

    transactions.extend(close(&mut conn, client_seq, server_seq));
    assert_eq!(transactions.len(), 1);
    assert!(transactions[0].is_complete());

    let sig = parse_rule(
        r#"alert tcp any any -> any any (msg:"uri hit"; http.uri; content:"one"; sid:1; rev:1;)"#,
    )
    .unwrap();
    let engine = Engine::new(vec![sig]);
    let matches = engine.evaluate(&transactions[0]);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].sid, 1);
}

#[test]
fn relative_content_chain_requires_proximity_and_order() {
    let config = base_config();
    let mut conn = Connection::new(&config);
    let (mut client_seq, server_seq) = handshake(&mut conn);

    let mut transactions = Vec::new();

    let request = b"GET /now_this_is_is_big_big_string_now HTTP/1.0\r\nHost: example.com\r\n\r\n";
    transactions.extend(conn.send(CLIENT_IP, CLIENT_PORT, SERVER_IP, SERVER_PORT, client_seq, server_seq, PSH | ACK, 64240, request));
    client_seq += request.len() as u32;

    let response = b"HTTP/1.0 200 OK\r\nContent-Length: 0\r\n\r\n";
    transactions.extend(conn.send(SERVER_IP, SERVER_PORT, CLIENT_IP, CLIENT_PORT, server_seq, client_seq, PSH | ACK, 64240, response));
    let server_seq = server_seq + response.len() as u32;

    transactions.extend(close(&mut conn, client_seq, server_seq));
    assert_eq!(transactions.len(), 1);

    let sig = parse_rule(
        r#"alert tcp any any -> any any (msg:"chain hit"; http.uri; content:"this"; content:"is"; within:6; content:"big"; within:8; content:"string"; within:8; sid:2; rev:1;)"#,
    )
    .unwrap();
    let engine = Engine::new(vec![sig]);
    let matches = engine.evaluate(&transactions[0]);
    assert_eq!(matches.len(), 1);
}

#[test]
fn negated_uricontent_suppresses_match_when_pattern_is_present() {
    let config = base_config();
    let mut conn = Connection::new(&config);
    let (mut client_seq, server_seq) = handshake(&mut conn);

    let mut transactions = Vec::new();

    let request = b"GET /we_need_to_fix_this_and_yes_fix_this_now HTTP/1.0\r\nHost: example.com\r\n\r\n";
    transactions.extend(conn.send(CLIENT_IP, CLIENT_PORT, SERVER_IP, SERVER_PORT, client_seq, server_seq, PSH | ACK, 64240, request));
    client_seq += request.len() as u32;

    let response = b"HTTP/1.0 200 OK\r\nContent-Length: 0\r\n\r\n";
    transactions.extend(conn.send(SERVER_IP, SERVER_PORT, CLIENT_IP, CLIENT_PORT, server_seq, client_seq, PSH | ACK, 64240, response));
    let server_seq = server_seq + response.len() as u32;

    transactions.extend(close(&mut conn, client_seq, server_seq));
    assert_eq!(transactions.len(), 1);

    let sig = parse_rule(
        r#"alert tcp any any -> any any (msg:"neg hit"; http.uri; content:"fix"; content:"this"; within:6; content:!"and"; distance:0; sid:3; rev:1;)"#,
    )
    .unwrap();
    let engine = Engine::new(vec![sig]);
    let matches = engine.evaluate(&transactions[0]);
    assert!(matches.is_empty());
}

#[test]
fn body_pcre_matches_across_two_reassembled_chunks() {
    let config = base_config();
    let mut conn = Connection::new(&config);
    let (mut client_seq, server_seq) = handshake(&mut conn);

    let mut transactions = Vec::new();

    let request = b"POST /upload HTTP/1.0\r\nHost: example.com\r\nContent-Length: 0\r\n\r\n";
    transactions.extend(conn.send(CLIENT_IP, CLIENT_PORT, SERVER_IP, SERVER_PORT, client_seq, server_seq, PSH | ACK, 64240, request));
    client_seq += request.len() as u32;

    let body = b"token-begin-MARKER-token-end";
    let headers = b"HTTP/1.0 200 OK\r\nContent-Length: 29\r\n\r\n";
    let (first_half, second_half) = body.split_at(14);

    transactions.extend(conn.send(SERVER_IP, SERVER_PORT, CLIENT_IP, CLIENT_PORT, server_seq, client_seq, PSH | ACK, 64240, headers));
    let mut server_seq = server_seq + headers.len() as u32;
    transactions.extend(conn.send(SERVER_IP, SERVER_PORT, CLIENT_IP, CLIENT_PORT, server_seq, client_seq, PSH | ACK, 64240, first_half));
    server_seq += first_half.len() as u32;
    transactions.extend(conn.send(SERVER_IP, SERVER_PORT, CLIENT_IP, CLIENT_PORT, server_seq, client_seq, PSH | ACK, 64240, second_half));
    let server_seq = server_seq + second_half.len() as u32;

    transactions.extend(close(&mut conn, client_seq, server_seq));
    assert_eq!(transactions.len(), 1);

    let sig = parse_rule(
        r#"alert tcp any any -> any any (msg:"body hit"; http.server_body; pcre:"/begin-MARKER-token/"; sid:4; rev:1;)"#,
    )
    .unwrap();
    let engine = Engine::new(vec![sig]);
    let matches = engine.evaluate(&transactions[0]);
    assert_eq!(matches.len(), 1);
}

#[test]
fn midstream_pickup_evaluates_urilen_from_first_observed_packet() {
    let mut config = base_config();
    config.midstream = true;
    let mut conn = Connection::new(&config);

    let client_seq = 5000u32;
    let server_seq = 15000u32;

    let mut transactions = Vec::new();

    let request = b"GET /short HTTP/1.0\r\nHost: example.com\r\n\r\n";
    transactions.extend(conn.send(CLIENT_IP, CLIENT_PORT, SERVER_IP, SERVER_PORT, client_seq, server_seq, PSH | ACK, 64240, request));
    let client_seq = client_seq + request.len() as u32;

    let response = b"HTTP/1.0 200 OK\r\nContent-Length: 0\r\n\r\n";
    transactions.extend(conn.send(SERVER_IP, SERVER_PORT, CLIENT_IP, CLIENT_PORT, server_seq, client_seq, PSH | ACK, 64240, response));
    let server_seq = server_seq + response.len() as u32;

    transactions.extend(close(&mut conn, client_seq, server_seq));
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].uri(), "/short");

    let sig = parse_rule(
        r#"alert tcp any any -> any any (msg:"short uri"; urilen:<10; sid:5; rev:1;)"#,
    )
    .unwrap();
    let engine = Engine::new(vec![sig]);
    let matches = engine.evaluate(&transactions[0]);
    assert_eq!(matches.len(), 1);
}

#[test]
fn rst_acceptance_after_suspected_evasion_diverges_by_os_policy() {
    // Linux-family policies tolerate a mismatched ack in Established and, once evasion is
    // suspected, ignore a RST entirely even if its sequence number lands in-window.
    let mut linux_config = base_config();
    linux_config.default_os_policy = OsPolicy::Linux;
    let mut linux_conn = Connection::new(&linux_config);
    let (client_seq, server_seq) = handshake(&mut linux_conn);

    // An ACK with a bogus ack_no while established marks the connection as evasion-suspected.
    linux_conn.send(CLIENT_IP, CLIENT_PORT, SERVER_IP, SERVER_PORT, client_seq, server_seq + 5000, ACK, 64240, &[]);
    // A RST landing in-window is now ignored under Linux policy because evasion is suspected.
    linux_conn.send(SERVER_IP, SERVER_PORT, CLIENT_IP, CLIENT_PORT, server_seq + 50, client_seq, RST, 64240, &[]);
    assert_eq!(linux_conn.size(), 1, "Linux policy should have ignored the evasive RST");
    close(&mut linux_conn, client_seq, server_seq);
    assert_eq!(linux_conn.size(), 0);

    // Windows accepts a RST only at the exact expected sequence number, and evasion suspicion
    // does not change that — the same off-seq RST closes the connection immediately.
    let mut windows_config = base_config();
    windows_config.default_os_policy = OsPolicy::Windows;
    let mut windows_conn = Connection::new(&windows_config);
    let (client_seq, server_seq) = handshake(&mut windows_conn);
    windows_conn.send(CLIENT_IP, CLIENT_PORT, SERVER_IP, SERVER_PORT, client_seq, server_seq + 5000, ACK, 64240, &[]);
    windows_conn.send(SERVER_IP, SERVER_PORT, CLIENT_IP, CLIENT_PORT, server_seq, client_seq, RST, 64240, &[]);
    assert_eq!(windows_conn.size(), 0, "Windows policy accepts a RST exactly at next_seq regardless of evasion suspicion");
}
