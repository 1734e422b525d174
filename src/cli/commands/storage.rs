use anyhow::Result;
use clap::{Arg, ArgMatches, Command};

pub const ARG_DB_MAX_CONNECTIONS: &str = "db-max-connections";
pub const ARG_DB_MAX_LIFETIME: &str = "db-max-lifetime";
pub const ARG_GC_INTERVAL: &str = "gc-interval";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub max_connections: u32,
    pub max_lifetime_seconds: u64,
    pub gc_interval_seconds: u64,
}

impl Options {
    /// # Errors
    /// Never fails in practice: every argument has a default.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            max_connections: matches
                .get_one::<u32>(ARG_DB_MAX_CONNECTIONS)
                .copied()
                .unwrap_or(5),
            max_lifetime_seconds: matches
                .get_one::<u64>(ARG_DB_MAX_LIFETIME)
                .copied()
                .unwrap_or(7200),
            gc_interval_seconds: matches
                .get_one::<u64>(ARG_GC_INTERVAL)
                .copied()
                .unwrap_or(600),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DB_MAX_CONNECTIONS)
                .long(ARG_DB_MAX_CONNECTIONS)
                .help("Maximum number of pooled database connections")
                .env("CUSTODIA_DB_MAX_CONNECTIONS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_DB_MAX_LIFETIME)
                .long(ARG_DB_MAX_LIFETIME)
                .help("Maximum lifetime of a pooled connection in seconds")
                .env("CUSTODIA_DB_MAX_LIFETIME")
                .default_value("7200")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_GC_INTERVAL)
                .long(ARG_GC_INTERVAL)
                .help("Seconds between token garbage collection sweeps (minimum 1)")
                .env("CUSTODIA_GC_INTERVAL")
                .default_value("600")
                .value_parser(clap::value_parser!(u64)),
        )
}
