#![allow(clippy::needless_doctest_main)]

//! A passive, signature-based network intrusion detection engine for offline packet capture.
//!
//! The crate mirrors the pipeline a live tap would drive: packets are decoded
//! ([`protocols::packet`]), handed to a [`conntrack`] flow table that runs a TCP state machine
//! and reassembles byte streams, reassembled streams are fed to an application-layer parser
//! ([`protocols::stream`]) by the [`inspect`] module, and the resulting requests are evaluated
//! against loaded signatures by the [`detect`] engine. [`alert`] renders matches to the
//! configured alert log, and [`runtime`] ties the stages together over a `pcap` file.
//!
//! ```rust,no_run
//! use sentrycore::config::default_config;
//! use sentrycore::Runtime;
//!
//! let cfg = default_config();
//! let runtime = Runtime::new(cfg).unwrap();
//! runtime.run().unwrap();
//! ```

pub mod alert;
pub mod config;
pub mod conntrack;
pub mod detect;
pub mod inspect;
pub mod memory;
pub mod protocols;
mod runtime;
pub mod stats;
pub mod utils;

pub use self::conntrack::conn_id::{ConnId, FiveTuple};
pub use self::conntrack::pdu::L4Pdu;
pub use self::memory::mbuf::Mbuf;
pub use self::runtime::Runtime;

#[macro_use]
extern crate pest_derive;
