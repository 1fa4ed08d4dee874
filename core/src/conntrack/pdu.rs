//! Transport-layer protocol data units handed from packet parsing to connection tracking.

use crate::memory::mbuf::Mbuf;
use crate::protocols::packet::checksum::{verify_tcp_ipv4, verify_tcp_ipv6};
use crate::protocols::packet::ethernet::Ethernet;
use crate::protocols::packet::ipv4::Ipv4;
use crate::protocols::packet::ipv6::Ipv6;
use crate::protocols::packet::tcp::{Tcp, TcpOptions, TCP_PROTOCOL};
use crate::protocols::packet::udp::{Udp, UDP_PROTOCOL};
use crate::protocols::packet::Packet;

use anyhow::{bail, Result};

use std::net::{IpAddr, SocketAddr};

/// A single transport-layer segment or datagram, with its payload location still expressed as an
/// offset/length into the owning [`Mbuf`] rather than copied out.
#[derive(Debug)]
pub struct L4Pdu {
    /// Packet buffer containing frame data.
    pub(crate) mbuf: Mbuf,
    /// Transport layer context.
    pub(crate) ctxt: L4Context,
    /// `true` if segment is in the direction of orig -> resp.
    pub(crate) dir: bool,
}

impl L4Pdu {
    pub(crate) fn new(mbuf: Mbuf, ctxt: L4Context, dir: bool) -> Self {
        L4Pdu { mbuf, ctxt, dir }
    }

    #[inline]
    pub(crate) fn mbuf_ref(&self) -> &Mbuf {
        &self.mbuf
    }

    #[inline]
    pub(crate) fn payload(&self) -> Result<&[u8]> {
        self.mbuf.get_data_slice(self.ctxt.offset, self.ctxt.length)
    }

    #[inline]
    pub(crate) fn offset(&self) -> usize {
        self.ctxt.offset
    }

    #[inline]
    pub(crate) fn length(&self) -> usize {
        self.ctxt.length
    }

    #[inline]
    pub(crate) fn seq_no(&self) -> u32 {
        self.ctxt.seq_no
    }

    #[inline]
    pub(crate) fn ack_no(&self) -> u32 {
        self.ctxt.ack_no
    }

    #[inline]
    pub(crate) fn flags(&self) -> u8 {
        self.ctxt.flags
    }

    #[inline]
    pub(crate) fn window(&self) -> u16 {
        self.ctxt.window
    }

    #[inline]
    pub(crate) fn checksum_valid(&self) -> bool {
        self.ctxt.checksum_valid
    }
}

/// Parsed transport-layer context from a packet, used for connection tracking and the TCP session
/// state machine.
#[derive(Debug, Clone)]
pub struct L4Context {
    /// Source socket address.
    pub(crate) src: SocketAddr,
    /// Destination socket address.
    pub(crate) dst: SocketAddr,
    /// L4 protocol.
    pub(crate) proto: usize,
    /// Offset into the mbuf where the L4 payload begins.
    pub(crate) offset: usize,
    /// Length of the payload in bytes.
    pub(crate) length: usize,
    /// Raw sequence number of the segment (TCP only).
    pub(crate) seq_no: u32,
    /// Raw acknowledgment number of the segment (TCP only).
    pub(crate) ack_no: u32,
    /// TCP flags.
    pub(crate) flags: u8,
    /// Advertised receive window, unscaled (TCP only).
    pub(crate) window: u16,
    /// Parsed TCP options, if any (TCP only).
    pub(crate) tcp_options: TcpOptions,
    /// `true` if the IPv4/TCP (or IPv6/TCP) checksum validated, or if validation was skipped.
    pub(crate) checksum_valid: bool,
}

impl L4Context {
    /// Parses transport-layer context out of `mbuf`. `verify_checksums` gates whether the IPv4
    /// header and TCP/UDP checksums are validated; when `false`, `checksum_valid` is always
    /// `true` (checksum offload is common in capture pipelines, where on-the-wire checksums are
    /// not meaningful).
    pub(crate) fn new(mbuf: &Mbuf, verify_checksums: bool) -> Result<Self> {
        let eth = mbuf.parse_to::<Ethernet>()?;
        if let Ok(ipv4) = eth.parse_to::<Ipv4>() {
            let ip_checksum_valid = !verify_checksums || ipv4.verify_checksum();
            if let Ok(tcp) = ipv4.parse_to::<Tcp>() {
                let payload_size = (ipv4.total_length() as usize)
                    .checked_sub(ipv4.header_len() + tcp.header_len())
                    .ok_or_else(|| anyhow::anyhow!("malformed packet"))?;
                let checksum_valid = ip_checksum_valid
                    && (!verify_checksums
                        || tcp
                            .segment_bytes(payload_size)
                            .is_some_and(|segment| {
                                verify_tcp_ipv4(ipv4.src_addr(), ipv4.dst_addr(), segment)
                            }));
                return Ok(L4Context {
                    src: SocketAddr::new(IpAddr::V4(ipv4.src_addr()), tcp.src_port()),
                    dst: SocketAddr::new(IpAddr::V4(ipv4.dst_addr()), tcp.dst_port()),
                    proto: TCP_PROTOCOL,
                    offset: tcp.next_header_offset(),
                    length: payload_size,
                    seq_no: tcp.seq_no(),
                    ack_no: tcp.ack_no(),
                    flags: tcp.flags(),
                    window: tcp.window(),
                    tcp_options: tcp.options(),
                    checksum_valid,
                });
            } else if let Ok(udp) = ipv4.parse_to::<Udp>() {
                let payload_size = (ipv4.total_length() as usize)
                    .checked_sub(ipv4.header_len() + udp.header_len())
                    .ok_or_else(|| anyhow::anyhow!("malformed packet"))?;
                return Ok(L4Context {
                    src: SocketAddr::new(IpAddr::V4(ipv4.src_addr()), udp.src_port()),
                    dst: SocketAddr::new(IpAddr::V4(ipv4.dst_addr()), udp.dst_port()),
                    proto: UDP_PROTOCOL,
                    offset: udp.next_header_offset(),
                    length: payload_size,
                    seq_no: 0,
                    ack_no: 0,
                    flags: 0,
                    window: 0,
                    tcp_options: TcpOptions::default(),
                    checksum_valid: ip_checksum_valid,
                });
            }
            bail!("not TCP or UDP");
        } else if let Ok(ipv6) = eth.parse_to::<Ipv6>() {
            // IPv6 carries no header checksum of its own.
            if let Ok(tcp) = ipv6.parse_to::<Tcp>() {
                let payload_size = (ipv6.payload_length() as usize)
                    .checked_sub(tcp.header_len())
                    .ok_or_else(|| anyhow::anyhow!("malformed packet"))?;
                let checksum_valid = !verify_checksums
                    || tcp.segment_bytes(payload_size).is_some_and(|segment| {
                        verify_tcp_ipv6(ipv6.src_addr(), ipv6.dst_addr(), segment)
                    });
                return Ok(L4Context {
                    src: SocketAddr::new(IpAddr::V6(ipv6.src_addr()), tcp.src_port()),
                    dst: SocketAddr::new(IpAddr::V6(ipv6.dst_addr()), tcp.dst_port()),
                    proto: TCP_PROTOCOL,
                    offset: tcp.next_header_offset(),
                    length: payload_size,
                    seq_no: tcp.seq_no(),
                    ack_no: tcp.ack_no(),
                    flags: tcp.flags(),
                    window: tcp.window(),
                    tcp_options: tcp.options(),
                    checksum_valid,
                });
            } else if let Ok(udp) = ipv6.parse_to::<Udp>() {
                let payload_size = (ipv6.payload_length() as usize)
                    .checked_sub(udp.header_len())
                    .ok_or_else(|| anyhow::anyhow!("malformed packet"))?;
                return Ok(L4Context {
                    src: SocketAddr::new(IpAddr::V6(ipv6.src_addr()), udp.src_port()),
                    dst: SocketAddr::new(IpAddr::V6(ipv6.dst_addr()), udp.dst_port()),
                    proto: UDP_PROTOCOL,
                    offset: udp.next_header_offset(),
                    length: payload_size,
                    seq_no: 0,
                    ack_no: 0,
                    flags: 0,
                    window: 0,
                    tcp_options: TcpOptions::default(),
                    checksum_valid: true,
                });
            }
            bail!("not TCP or UDP");
        } else {
            bail!("not IP");
        }
    }
}
