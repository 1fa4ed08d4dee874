//! Offline (pcap-file) capture loop.

use crate::config::OfflineConfig;
use crate::inspect::Inspector;
use crate::memory::mbuf::Mbuf;

use anyhow::{Context, Result};
use cpu_time::ProcessTime;
use pcap::Capture;

pub(crate) struct OfflineRuntime {
    options: OfflineConfig,
}

impl OfflineRuntime {
    pub(crate) fn new(options: OfflineConfig) -> Self {
        OfflineRuntime { options }
    }

    /// Reads every frame from the configured pcap file, feeding it to `inspector` in capture
    /// order. Frames longer than the configured snaplen are skipped (the capturing tool would
    /// have truncated them anyway).
    pub(crate) fn run(&self, inspector: &mut Inspector) -> Result<()> {
        log::info!("reading pcap file {}", self.options.pcap);

        let mut cap = Capture::from_file(&self.options.pcap)
            .with_context(|| format!("opening pcap file {}", self.options.pcap))?;
        let start = ProcessTime::try_now().context("reading process time")?;

        let mut nb_pkts: u64 = 0;
        let mut nb_bytes: u64 = 0;
        let mut pkt_no: u64 = 0;
        let check_every = 4096;

        while let Ok(frame) = cap.next() {
            if frame.header.len as usize > self.options.snaplen {
                log::trace!("skipping frame longer than snaplen");
                continue;
            }
            let ts_micros = frame.header.ts.tv_sec * 1_000_000 + frame.header.ts.tv_usec;
            let mbuf = Mbuf::new(frame.data, pkt_no, ts_micros);
            pkt_no += 1;
            nb_pkts += 1;
            nb_bytes += mbuf.data_len() as u64;

            inspector.process_packet(mbuf)?;
            if pkt_no % check_every == 0 {
                inspector.check_inactive()?;
            }
        }

        inspector.finish()?;

        let cpu_time = start.elapsed();
        log::info!(
            "processed {} packets, {} bytes in {:?}",
            nb_pkts,
            nb_bytes,
            cpu_time
        );
        Ok(())
    }
}
