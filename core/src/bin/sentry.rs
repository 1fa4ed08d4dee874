//! Command-line entry point: reads a TOML config naming a pcap file and a signature set, runs
//! them through the detection engine, and writes matches to the configured alert log.

use sentrycore::config::load_config;
use sentrycore::Runtime;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
struct Args {
    /// Path to a TOML configuration file (see `sentrycore::config::AppConfig`).
    #[clap(short, long, parse(from_os_str), value_name = "FILE")]
    config: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args.config)?;
    let runtime = Runtime::new(config)?;
    runtime.run()
}
