use clap::{builder::ValueParser, Arg, ArgAction, Command};
use tracing::Level;

pub const ARG_VERBOSITY: &str = "verbosity";

/// Verbosity index, name and the tracing level it enables. Index 0 keeps the
/// subscriber's own default.
const LEVELS: [(&str, Option<Level>); 5] = [
    ("error", None),
    ("warn", Some(Level::WARN)),
    ("info", Some(Level::INFO)),
    ("debug", Some(Level::DEBUG)),
    ("trace", Some(Level::TRACE)),
];

/// Tracing level for a `-v` count or a `CUSTODIA_LOG_LEVEL` value; counts past
/// the table saturate at trace.
#[must_use]
pub fn level(verbosity: u8) -> Option<Level> {
    LEVELS
        .get(usize::from(verbosity))
        .map_or(Some(Level::TRACE), |(_, level)| *level)
}

fn parse_level(raw: &str) -> Result<u8, String> {
    let raw = raw.trim();
    let index = match raw.parse::<usize>() {
        Ok(index) => Some(index).filter(|index| *index < LEVELS.len()),
        Err(_) => LEVELS
            .iter()
            .position(|(name, _)| name.eq_ignore_ascii_case(raw)),
    };
    index
        .and_then(|index| u8::try_from(index).ok())
        .ok_or_else(|| {
            let names: Vec<&str> = LEVELS.iter().map(|(name, _)| *name).collect();
            format!("unknown log level `{raw}`, expected one of {} or 0-4", names.join(", "))
        })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Raise log verbosity, repeat up to -vvvv for trace")
            .long_help(
                "Raise log verbosity: -v warn, -vv info, -vvv debug, -vvvv trace. Without it only errors are logged. CUSTODIA_LOG_LEVEL takes a level name or its 0-4 index.",
            )
            .env("CUSTODIA_LOG_LEVEL")
            .global(true)
            .action(ArgAction::Count)
            .value_parser(ValueParser::from(parse_level)),
    )
}
