//! Signature-based detection against completed HTTP transactions.
//!
//! Signatures are written in a Suricata-like rule syntax (sticky buffers, `content`/`pcre`
//! matches with relative-offset modifiers, `urilen`) and loaded once at startup from the paths
//! configured in [`crate::config::DetectConfig::rules`].

pub mod engine;
pub mod parser;
pub mod signature;

pub use self::engine::{Engine, Match};
pub use self::signature::{Action, Buffer, Signature};

use crate::config::DetectConfig;

use anyhow::Result;

/// Loads the signatures named in `config.rules` and builds a ready-to-evaluate [`Engine`].
pub fn build_engine(config: &DetectConfig) -> Result<Engine> {
    let signatures = parser::load_signatures(&config.rules)?;
    log::info!("loaded {} signature(s)", signatures.len());
    Ok(Engine::new(signatures))
}
