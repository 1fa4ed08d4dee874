//! Packet buffer manipulation.
//!
//! ## Remarks
//! Unlike the DPDK-backed buffer this module is adapted from, an [`Mbuf`] here owns its bytes
//! directly: packets are read from a `pcap` file rather than a NIC ring, so there is no mempool to
//! allocate from and no multi-segment chaining to represent.
//!
//! This module is adapted from
//! [capsule::Mbuf](https://docs.rs/capsule/0.1.5/capsule/struct.Mbuf.html).

use crate::protocols::packet::{Packet, PacketHeader, PacketParseError};

use std::fmt;

use anyhow::{bail, Result};
use thiserror::Error;

/// A packet buffer.
///
/// Represents a single Ethernet frame as read from the capture source.
#[derive(Clone)]
pub struct Mbuf {
    data: Vec<u8>,
    /// Monotonic capture index, used for ordering diagnostics and alert output.
    pub(crate) pkt_no: u64,
    /// Capture timestamp in microseconds since the Unix epoch.
    pub(crate) ts_micros: i64,
}

impl Mbuf {
    /// Creates a new `Mbuf` by copying `data`.
    pub fn new(data: &[u8], pkt_no: u64, ts_micros: i64) -> Mbuf {
        Mbuf {
            data: data.to_vec(),
            pkt_no,
            ts_micros,
        }
    }

    /// Returns the length of the data in the Mbuf.
    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    /// Returns the contents of the Mbuf as a byte slice.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns a byte slice of data with length `count` at `offset`.
    ///
    /// Errors if `offset` is greater than or equal to the buffer length or `count` exceeds the
    /// size of the data stored at `offset`.
    pub fn get_data_slice(&self, offset: usize, count: usize) -> Result<&[u8]> {
        if offset < self.data_len() {
            if let Some(end) = offset.checked_add(count) {
                if end <= self.data_len() {
                    return Ok(&self.data[offset..end]);
                }
            }
            bail!(MbufError::ReadPastBuffer)
        } else {
            bail!(MbufError::BadOffset)
        }
    }

    /// Reads the data at `offset` as `T`. Errors if `offset` is greater than or equal to the
    /// buffer length or the size of `T` exceeds the size of the data stored at `offset`.
    pub(crate) fn get_data<T: PacketHeader + Copy>(&self, offset: usize) -> Result<T> {
        let slice = self.get_data_slice(offset, T::size_of())?;
        let mut header = std::mem::MaybeUninit::<T>::uninit();
        // SAFETY: `T` is a `#[repr(C, packed)]` header type with no padding or invalid bit
        // patterns, and `slice` was checked to hold at least `size_of::<T>()` bytes.
        unsafe {
            std::ptr::copy_nonoverlapping(
                slice.as_ptr(),
                header.as_mut_ptr() as *mut u8,
                T::size_of(),
            );
            Ok(header.assume_init())
        }
    }
}

impl<'a> Packet<'a> for Mbuf {
    fn mbuf(&self) -> &Mbuf {
        self
    }

    fn header_len(&self) -> usize {
        0
    }

    fn next_header_offset(&self) -> usize {
        0
    }

    fn next_header(&self) -> Option<usize> {
        None
    }

    fn parse_from(_outer: &'a impl Packet<'a>) -> Result<Self>
    where
        Self: Sized,
    {
        // parse_from should never be called for Mbuf.
        bail!(PacketParseError::InvalidProtocol)
    }
}

impl fmt::Debug for Mbuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mbuf")
            .field("pkt_no", &self.pkt_no)
            .field("data_len", &self.data.len())
            .finish()
    }
}

// Displays the actual packet data of the frame.
impl fmt::Display for Mbuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.data.iter().enumerate() {
            write!(f, "{:02x} ", byte)?;
            if i % 16 == 15 {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub(crate) enum MbufError {
    #[error("Offset exceeds Mbuf buffer length")]
    BadOffset,

    #[error("Data read exceeds Mbuf buffer")]
    ReadPastBuffer,
}
