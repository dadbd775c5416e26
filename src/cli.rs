//! Command-line interface of the `fleetgated` daemon.

use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "fleetgated",
    version,
    about = "HTTP control gateway for managed workstation fleets"
)]
pub struct Opts {
    /// Path to the configuration file.
    #[arg(short = 'f', long = "config", default_value = "fleetgate.toml")]
    pub config: PathBuf,

    /// Append logs to this file instead of standard error.
    #[arg(short = 'l', long = "logfile")]
    pub logfile: Option<PathBuf>,

    /// Verbosity: 0 errors only, 1 info, 2 debug, 3 and up trace.
    #[arg(short = 'd', long = "debug", default_value_t = 1)]
    pub debug: u8,
}

impl Opts {
    pub fn read() -> Opts {
        Opts::parse()
    }
}
