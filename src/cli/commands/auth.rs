use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_TOKEN_SECRET: &str = "token-secret";
pub const ARG_TOKEN_ISSUER: &str = "token-issuer";
pub const ARG_SESSION_TTL: &str = "session-ttl";
pub const ARG_TOTP_ISSUER: &str = "totp-issuer";

#[derive(Debug, Clone)]
pub struct Options {
    /// `None` means a random secret is generated at startup.
    pub token_secret: Option<SecretString>,
    pub token_issuer: String,
    pub session_ttl_seconds: u64,
    pub totp_issuer: String,
}

impl Options {
    /// # Errors
    /// Returns an error if a defaulted argument is missing or the TOTP issuer
    /// contains `:`, which authenticator labels cannot carry.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let string = |id: &str| -> Result<String> {
            matches
                .get_one::<String>(id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
        };
        let totp_issuer = string(ARG_TOTP_ISSUER)?;
        if totp_issuer.contains(':') {
            anyhow::bail!("--{ARG_TOTP_ISSUER} must not contain ':'");
        }
        Ok(Self {
            token_secret: matches
                .get_one::<String>(ARG_TOKEN_SECRET)
                .filter(|secret| !secret.is_empty())
                .map(|secret| SecretString::from(secret.clone())),
            token_issuer: string(ARG_TOKEN_ISSUER)?,
            session_ttl_seconds: matches
                .get_one::<u64>(ARG_SESSION_TTL)
                .copied()
                .unwrap_or(3600),
            totp_issuer,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TOKEN_SECRET)
                .long(ARG_TOKEN_SECRET)
                .help("HMAC secret used to sign session tokens")
                .long_help(
                    "HMAC secret used to sign session tokens. When omitted a random secret is generated, so sessions do not survive a restart.",
                )
                .env("CUSTODIA_TOKEN_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_TOKEN_ISSUER)
                .long(ARG_TOKEN_ISSUER)
                .help("Issuer claim of session tokens")
                .env("CUSTODIA_TOKEN_ISSUER")
                .default_value("custodia"),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL)
                .long(ARG_SESSION_TTL)
                .help("Session lifetime in seconds")
                .env("CUSTODIA_SESSION_TTL")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_TOTP_ISSUER)
                .long(ARG_TOTP_ISSUER)
                .help("Issuer label shown in authenticator apps")
                .env("CUSTODIA_TOTP_ISSUER")
                .default_value("custodia"),
        )
}
