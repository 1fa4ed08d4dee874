//! Top-level runtime: wires configuration, logging, and the offline capture loop together.

mod offline;
use self::offline::OfflineRuntime;

use crate::config::AppConfig;
use crate::inspect::Inspector;

use anyhow::Result;

/// Owns everything needed to process one pcap file end to end: configuration, the flow table /
/// detection engine / alert log (via [`Inspector`]), and the capture loop itself.
pub struct Runtime {
    inspector: Inspector,
    offline: OfflineRuntime,
}

impl Runtime {
    /// Builds a runtime from `config`. Initializes logging as a side effect.
    pub fn new(config: AppConfig) -> Result<Self> {
        crate::config::init_logging(&config.logging);
        log::info!("starting up");
        let offline = OfflineRuntime::new(config.offline.clone());
        let inspector = Inspector::new(&config)?;
        Ok(Runtime { inspector, offline })
    }

    /// Runs the capture loop to completion, logging a final stats summary.
    pub fn run(mut self) -> Result<()> {
        self.offline.run(&mut self.inspector)?;
        crate::stats::log_summary();
        log::info!("done");
        Ok(())
    }
}
