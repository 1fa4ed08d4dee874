//! Configuration options.
//!
//! The engine is configured from a single TOML file covering the input capture, connection
//! tracking / reassembly tuning, detection engine limits, and logging. See
//! [`AppConfig`] for the full set of options and their defaults.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::conntrack::ospolicy::{OsPolicy, OsPolicyTable};

/// Loads a configuration file from `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<AppConfig> {
    let config_str = fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&config_str)?;
    Ok(config)
}

/// Returns a configuration suitable for quick functional testing against a local pcap file.
///
/// ```toml
/// [offline]
///     pcap = "./traces/small_flows.pcap"
///
/// [conntrack]
///     max_connections = 100_000
/// ```
pub fn default_config() -> AppConfig {
    AppConfig::default()
}

/// Initializes the `log`/`env_logger` backend at the level configured in `logging`. Idempotent
/// across repeated calls within a process (subsequent calls are no-ops).
pub fn init_logging(logging: &LoggingConfig) {
    let _ = env_logger::Builder::new()
        .filter_level(logging.level)
        .try_init();
}

/* --------------------------------------------------------------------------------- */

/// Top-level runtime configuration.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct AppConfig {
    /// Packet capture input.
    pub offline: OfflineConfig,

    /// Connection tracking and stream reassembly settings.
    #[serde(default)]
    pub stream: ConnTrackConfig,

    /// Detection engine settings.
    #[serde(default)]
    pub detect: DetectConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            offline: OfflineConfig {
                pcap: "./traces/small_flows.pcap".to_string(),
                snaplen: default_snaplen(),
            },
            stream: ConnTrackConfig::default(),
            detect: DetectConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/* --------------------------------------------------------------------------------- */

/// Packet capture input options.
///
/// ## Example
/// ```toml
/// [offline]
///     pcap = "sample_pcaps/smallFlows.pcap"
/// ```
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OfflineConfig {
    /// Path to the packet capture (pcap/pcapng) file to read.
    pub pcap: String,

    /// Maximum number of bytes captured per frame. Frames truncated shorter than their on-the-wire
    /// length by the capturing tool are handled gracefully (parsing may fail past the snapshot),
    /// but this informs buffer sizing. Defaults to `262144`.
    #[serde(default = "default_snaplen")]
    pub snaplen: usize,
}

fn default_snaplen() -> usize {
    262_144
}

/* --------------------------------------------------------------------------------- */

/// Connection tracking and stream reassembly options.
///
/// ## Example
/// ```toml
/// [stream]
///     max_connections = 100_000
///     checksum_validation = true
///     midstream = true
///     reassembly_depth = 1_048_576
///
///     [stream.host_os_policy]
///         "10.0.0.0/8" = "linux"
///         "192.168.1.0/24" = "windows"
/// ```
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ConnTrackConfig {
    /// Maximum number of connections tracked simultaneously. Defaults to `1_000_000`.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Frequency to check for inactive connections (in milliseconds). Defaults to `1000`.
    #[serde(default = "default_timeout_resolution")]
    pub timeout_resolution: usize,

    /// How long (in milliseconds) a UDP flow may go without traffic before it is expired. Defaults
    /// to `60_000`.
    #[serde(default = "default_udp_inactivity_timeout")]
    pub udp_inactivity_timeout: usize,

    /// How long (in milliseconds) a TCP connection may go without traffic before it is expired.
    /// Defaults to `300_000`.
    #[serde(default = "default_tcp_inactivity_timeout")]
    pub tcp_inactivity_timeout: usize,

    /// How long (in milliseconds) a TCP connection may sit in `SYN-SENT`/`SYN-RECEIVED` without
    /// progressing before it is expired, bounding memory use under a SYN flood. Defaults to
    /// `5000`.
    #[serde(default = "default_tcp_establish_timeout")]
    pub tcp_establish_timeout: usize,

    /// Maximum bytes of out-of-order data buffered per direction before new out-of-order segments
    /// are dropped. Defaults to `1_048_576` (1 MiB).
    #[serde(default = "default_reassembly_depth")]
    pub reassembly_depth: usize,

    /// Whether to validate IPv4 header and TCP checksums, dropping packets that fail validation
    /// before they reach connection tracking. Disable this when capturing downstream of hardware
    /// checksum offload, where on-the-wire checksums are not meaningful. Defaults to `true`.
    #[serde(default = "default_checksum_validation")]
    pub checksum_validation: bool,

    /// Whether to start tracking TCP connections observed already in progress (no SYN seen), by
    /// assuming they are established. Defaults to `true`.
    #[serde(default = "default_midstream")]
    pub midstream: bool,

    /// Per-destination-subnet assumed TCP/IP stack, used to resolve overlapping reassembly
    /// segments the way that host's stack would. Unmatched destinations use `default_os_policy`.
    #[serde(default)]
    pub host_os_policy: HashMap<String, OsPolicy>,

    /// Fallback policy for destinations with no matching entry in `host_os_policy`. Defaults to
    /// `"bsd"`.
    #[serde(default = "default_os_policy")]
    pub default_os_policy: OsPolicy,
}

impl ConnTrackConfig {
    /// Builds the runtime lookup table from the configured CIDR -> policy map. Entries that fail
    /// to parse as a CIDR are logged and skipped.
    pub(crate) fn os_policy_table(&self) -> OsPolicyTable {
        let entries = self
            .host_os_policy
            .iter()
            .filter_map(|(cidr, policy)| match cidr.parse::<IpNet>() {
                Ok(net) => Some((net, *policy)),
                Err(e) => {
                    log::warn!("invalid host-os-policy subnet {:?}: {}", cidr, e);
                    None
                }
            })
            .collect();
        OsPolicyTable::new(entries, self.default_os_policy)
    }
}

impl Default for ConnTrackConfig {
    fn default() -> Self {
        ConnTrackConfig {
            max_connections: default_max_connections(),
            timeout_resolution: default_timeout_resolution(),
            udp_inactivity_timeout: default_udp_inactivity_timeout(),
            tcp_inactivity_timeout: default_tcp_inactivity_timeout(),
            tcp_establish_timeout: default_tcp_establish_timeout(),
            reassembly_depth: default_reassembly_depth(),
            checksum_validation: default_checksum_validation(),
            midstream: default_midstream(),
            host_os_policy: HashMap::new(),
            default_os_policy: default_os_policy(),
        }
    }
}

fn default_max_connections() -> usize {
    1_000_000
}

fn default_timeout_resolution() -> usize {
    1000
}

fn default_udp_inactivity_timeout() -> usize {
    60_000
}

fn default_tcp_inactivity_timeout() -> usize {
    300_000
}

fn default_tcp_establish_timeout() -> usize {
    5000
}

fn default_reassembly_depth() -> usize {
    1 << 20
}

fn default_checksum_validation() -> bool {
    true
}

fn default_midstream() -> bool {
    true
}

fn default_os_policy() -> OsPolicy {
    OsPolicy::default()
}

/* --------------------------------------------------------------------------------- */

/// Detection engine tuning options.
///
/// ## Example
/// ```toml
/// [detect]
///     rules = ["rules/http.rules"]
///     body_capture_limit = 65536
///     pcre_match_limit = 3500
///     pcre_match_limit_recursion = 1500
/// ```
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DetectConfig {
    /// Paths to signature files to load at startup.
    #[serde(default)]
    pub rules: Vec<String>,

    /// Maximum bytes of request/response body retained per transaction for buffer matching.
    /// Bytes beyond this are counted but dropped. Defaults to `65536`.
    #[serde(default = "default_body_capture_limit")]
    pub body_capture_limit: usize,

    /// Upper bound on PCRE backtracking steps per match attempt, preventing a single crafted
    /// input from pathologically stalling the matcher. Defaults to `3500`.
    #[serde(default = "default_pcre_match_limit")]
    pub pcre_match_limit: usize,

    /// Upper bound on PCRE backtracking recursion depth per match attempt. Defaults to `1500`.
    #[serde(default = "default_pcre_match_limit_recursion")]
    pub pcre_match_limit_recursion: usize,

    /// Path to write alerts to, in the `alert` log format. Defaults to `"./alert.log"`.
    #[serde(default = "default_alert_log")]
    pub alert_log: String,
}

impl Default for DetectConfig {
    fn default() -> Self {
        DetectConfig {
            rules: Vec::new(),
            body_capture_limit: default_body_capture_limit(),
            pcre_match_limit: default_pcre_match_limit(),
            pcre_match_limit_recursion: default_pcre_match_limit_recursion(),
            alert_log: default_alert_log(),
        }
    }
}

fn default_body_capture_limit() -> usize {
    1 << 16
}

fn default_pcre_match_limit() -> usize {
    3500
}

fn default_pcre_match_limit_recursion() -> usize {
    1500
}

fn default_alert_log() -> String {
    "./alert.log".to_string()
}

/* --------------------------------------------------------------------------------- */

/// Logging options.
///
/// ## Example
/// ```toml
/// [logging]
///     level = "info"
/// ```
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum log level emitted. Defaults to `"info"`.
    #[serde(default = "default_log_level", with = "level_serde")]
    pub level: log::LevelFilter,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> log::LevelFilter {
    log::LevelFilter::Info
}

mod level_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(level: &log::LevelFilter, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&level.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<log::LevelFilter, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
