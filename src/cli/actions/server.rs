use anyhow::{Context, Result};
use rand::{distributions::Alphanumeric, Rng};
use secrecy::SecretString;
use std::{fmt::Write, sync::Arc, time::Duration};
use tracing::{error, info, warn};
use url::Url;

use crate::api::{self, ApiState};
use crate::cli::telemetry;
use crate::clock::{Clock, SystemClock};
use crate::directory::{DirectoryBackend, MemoryDirectory};
use crate::gc::GcSweeper;
use crate::session::SessionManager;
use crate::store::{MemoryTokenBackend, PgStore, TokenBackend};
use crate::totp::TotpVerifier;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub db_max_connections: u32,
    pub db_max_lifetime_seconds: u64,
    pub gc_interval_seconds: u64,
    pub token_secret: Option<SecretString>,
    pub token_issuer: String,
    pub session_ttl_seconds: u64,
    pub totp_issuer: String,
}

/// Execute the server action.
/// # Errors
/// Returns an error if storage cannot be reached or prepared, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (tokens, directory) = open_backends(&args).await?;

    let sweeper = GcSweeper::new(tokens, Arc::clone(&clock))
        .with_interval(Duration::from_secs(args.gc_interval_seconds))
        .spawn();

    let secret = args.token_secret.unwrap_or_else(|| {
        warn!("No token secret configured, generated a random one; sessions will not survive a restart");
        random_secret()
    });
    let sessions = SessionManager::new(
        &secret,
        &args.token_issuer,
        Duration::from_secs(args.session_ttl_seconds),
        Arc::clone(&clock),
    );
    let totp = TotpVerifier::new(clock);
    let state = Arc::new(ApiState::new(directory, sessions, totp, &args.totp_issuer));

    let served = api::serve(args.port, state, shutdown_signal()).await;

    sweeper.shutdown().await;
    info!("Gracefully shutdown");
    telemetry::shutdown_tracer();

    served
}

async fn open_backends(
    args: &Args,
) -> Result<(Arc<dyn TokenBackend>, Arc<dyn DirectoryBackend>)> {
    if is_memory_dsn(&args.dsn) {
        warn!("Using in-process storage, nothing is persisted");
        let tokens: Arc<dyn TokenBackend> = Arc::new(MemoryTokenBackend::new());
        let directory: Arc<dyn DirectoryBackend> = Arc::new(MemoryDirectory::new());
        return Ok((tokens, directory));
    }

    let store = PgStore::connect(
        &args.dsn,
        args.db_max_connections,
        Duration::from_secs(args.db_max_lifetime_seconds),
    )
    .await
    .context("Failed to connect to database")?;
    store.migrate().await.context("Failed to prepare schema")?;

    let store = Arc::new(store);
    let tokens: Arc<dyn TokenBackend> = store.clone();
    let directory: Arc<dyn DirectoryBackend> = store;
    Ok((tokens, directory))
}

fn is_memory_dsn(dsn: &str) -> bool {
    Url::parse(dsn).is_ok_and(|url| url.scheme() == "memory")
}

fn random_secret() -> SecretString {
    let secret: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect();
    SecretString::from(secret)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received");
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("dsn", redact_dsn(&args.dsn)),
        ("db_max_connections", args.db_max_connections.to_string()),
        ("db_max_lifetime", format!("{}s", args.db_max_lifetime_seconds)),
        ("gc_interval", format!("{}s", args.gc_interval_seconds)),
        ("token_secret_set", args.token_secret.is_some().to_string()),
        ("token_issuer", args.token_issuer.clone()),
        ("session_ttl", format!("{}s", args.session_ttl_seconds)),
        ("totp_issuer", args.totp_issuer.clone()),
    ];
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} {} - {}\n\nStartup configuration:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in &entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ = write!(message, "\n  {key}:{padding} {value}");
    }
    info!("{message}");
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}
