//! Host operating-system reassembly policies.
//!
//! Real hosts disagree about how to resolve overlapping TCP segments, and an attacker who knows
//! which policy the monitored host uses can split an attack across overlapping segments so that
//! the engine reassembles something different from what the victim's TCP stack does. Suricata
//! resolves this by letting each destination subnet declare which OS it represents; the
//! reassembly store then replays that OS's overlap-resolution behavior instead of picking one
//! arbitrarily.

use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

/// Overlap-resolution behavior of a particular operating system's TCP/IP stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OsPolicy {
    Bsd,
    Linux,
    OldLinux,
    Solaris,
    Hpux10,
    Hpux11,
    Windows,
    Windows2k3,
    Vista,
    Macos,
    Irix,
    First,
    Last,
}

impl OsPolicy {
    /// How a new segment's data should be resolved against bytes already held for the same
    /// stream offset.
    ///
    /// `true` means the new segment's data wins and overwrites what is already buffered at the
    /// overlapping offsets; `false` means the original bytes are kept.
    pub fn new_data_wins(&self, new_seq: u32, new_len: usize, old_seq: u32, old_len: usize) -> bool {
        match self {
            // First-received data wins; never overwrite.
            OsPolicy::Bsd
            | OsPolicy::Macos
            | OsPolicy::Windows
            | OsPolicy::Windows2k3
            | OsPolicy::Vista
            | OsPolicy::Irix
            | OsPolicy::Hpux11
            | OsPolicy::First => false,
            // Last-received data always wins.
            OsPolicy::Last => true,
            // New data wins if it starts later in the stream or is longer than what's already
            // held; otherwise the original bytes are kept.
            OsPolicy::Linux | OsPolicy::OldLinux | OsPolicy::Solaris => {
                super::tcp_sm::seq_lt(old_seq, new_seq) || new_len > old_len
            }
            // HP-UX 10 behaves like BSD for overlap, but is kept distinct for clarity and future
            // divergence (e.g. different timestamp handling).
            OsPolicy::Hpux10 => false,
        }
    }
}

impl Default for OsPolicy {
    fn default() -> Self {
        OsPolicy::Bsd
    }
}

/// Maps destination subnets to the [`OsPolicy`] that subnet's hosts are assumed to run, per the
/// `host-os-policy` configuration section. Longest-prefix match wins; unmatched addresses fall
/// back to the configured default.
#[derive(Debug, Clone)]
pub struct OsPolicyTable {
    entries: Vec<(IpNet, OsPolicy)>,
    default: OsPolicy,
}

impl OsPolicyTable {
    pub fn new(entries: Vec<(IpNet, OsPolicy)>, default: OsPolicy) -> Self {
        OsPolicyTable { entries, default }
    }

    /// Returns the policy for `addr`, preferring the most specific (longest-prefix) match.
    pub fn lookup(&self, addr: IpAddr) -> OsPolicy {
        self.entries
            .iter()
            .filter(|(net, _)| net.contains(&addr))
            .max_by_key(|(net, _)| net.prefix_len())
            .map(|(_, policy)| *policy)
            .unwrap_or(self.default)
    }
}

impl Default for OsPolicyTable {
    fn default() -> Self {
        OsPolicyTable {
            entries: Vec::new(),
            default: OsPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_prefix_wins() {
        let table = OsPolicyTable::new(
            vec![
                ("10.0.0.0/8".parse().unwrap(), OsPolicy::Linux),
                ("10.0.0.0/24".parse().unwrap(), OsPolicy::Windows),
            ],
            OsPolicy::Bsd,
        );
        assert_eq!(table.lookup("10.0.0.5".parse().unwrap()), OsPolicy::Windows);
        assert_eq!(table.lookup("10.1.0.5".parse().unwrap()), OsPolicy::Linux);
        assert_eq!(table.lookup("8.8.8.8".parse().unwrap()), OsPolicy::Bsd);
    }

    #[test]
    fn linux_new_data_wins_if_longer() {
        assert!(OsPolicy::Linux.new_data_wins(100, 10, 100, 5));
        assert!(!OsPolicy::Linux.new_data_wins(100, 5, 100, 10));
    }

    #[test]
    fn linux_new_data_wins_if_it_starts_later_even_if_shorter() {
        // seq=105 len=5 arriving against an existing seq=100 len=10: starts later, so it wins
        // even though it's shorter, per the documented overlap-resolution rule.
        assert!(OsPolicy::Linux.new_data_wins(105, 5, 100, 10));
        assert!(!OsPolicy::Linux.new_data_wins(100, 10, 105, 5));
    }

    #[test]
    fn bsd_never_overwrites() {
        assert!(!OsPolicy::Bsd.new_data_wins(100, 100, 100, 1));
    }

    #[test]
    fn last_always_overwrites() {
        assert!(OsPolicy::Last.new_data_wins(100, 1, 100, 100));
    }
}
