//! Token store, GC sweeper and directory against a real Postgres.
//!
//! Each test starts its own container and is skipped when no container
//! runtime is reachable.

mod support;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use custodia::clock::{Clock, ManualClock};
use custodia::directory::DirectoryBackend;
use custodia::gc::GcSweeper;
use custodia::store::{Issued, NewCredential, PgStore, TokenBackend, TokenStore};
use custodia::Error;
use sqlx::Row;
use std::sync::Arc;
use support::{postgres::PostgresContainer, runtime};

fn start() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default()
}

struct Harness {
    _postgres: PostgresContainer,
    pg: Arc<PgStore>,
    store: TokenStore,
    clock: Arc<ManualClock>,
}

impl Harness {
    async fn new() -> Result<Option<Self>> {
        if let Err(err) = runtime::ensure_container_runtime() {
            eprintln!("Skipping Postgres integration test: {err}");
            return Ok(None);
        }

        let postgres = PostgresContainer::start().await?;
        postgres.wait_until_ready().await?;

        let pg = PgStore::connect(&postgres.dsn(), 4, std::time::Duration::from_secs(60))
            .await
            .context("Failed to connect to Postgres")?;
        pg.migrate().await.context("Failed to apply schema")?;
        let pg = Arc::new(pg);

        let clock = Arc::new(ManualClock::new(start()));
        let backend: Arc<dyn TokenBackend> = pg.clone();
        let shared_clock: Arc<dyn Clock> = clock.clone();
        let store = TokenStore::new(backend, shared_clock);

        Ok(Some(Self {
            _postgres: postgres,
            pg,
            store,
            clock,
        }))
    }

    fn sweeper(&self) -> GcSweeper {
        let backend: Arc<dyn TokenBackend> = self.pg.clone();
        let clock: Arc<dyn Clock> = self.clock.clone();
        GcSweeper::new(backend, clock)
    }

    async fn row_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM oauth2_token")
            .fetch_one(self.pg.pool())
            .await?;
        Ok(row.get("total"))
    }
}

fn pair(access: &str, refresh: &str) -> NewCredential {
    NewCredential::access(
        Issued::new(access, start(), Duration::hours(2)),
        Some(Issued::new(refresh, start(), Duration::days(3))),
        format!(r#"{{"access":"{access}"}}"#),
    )
}

fn code(value: &str, lifetime: Duration) -> NewCredential {
    NewCredential::code(
        Issued::new(value, start(), lifetime),
        format!(r#"{{"code":"{value}"}}"#),
    )
}

#[tokio::test]
async fn schema_bootstrap_runs_twice_and_rows_round_trip() -> Result<()> {
    let Some(harness) = Harness::new().await? else {
        return Ok(());
    };
    harness.pg.migrate().await?;

    harness.store.create(pair("A1", "R1")).await?;
    harness
        .store
        .create(code("C1", Duration::minutes(10)))
        .await?;

    assert_eq!(
        harness.store.lookup_by_access("A1").await?.as_deref(),
        Some(r#"{"access":"A1"}"#)
    );
    assert_eq!(
        harness.store.lookup_by_refresh("R1").await?.as_deref(),
        Some(r#"{"access":"A1"}"#)
    );
    assert_eq!(
        harness.store.lookup_by_code("C1").await?.as_deref(),
        Some(r#"{"code":"C1"}"#)
    );
    assert_eq!(harness.store.lookup_by_code("A1").await?, None);

    let row = sqlx::query("SELECT expired_at FROM oauth2_token WHERE access = 'A1'")
        .fetch_one(harness.pg.pool())
        .await?;
    let expired_at: DateTime<Utc> = row.get("expired_at");
    assert_eq!(expired_at, start() + Duration::days(3));

    Ok(())
}

#[tokio::test]
async fn unbounded_refresh_lifetime_is_stored() -> Result<()> {
    let Some(harness) = Harness::new().await? else {
        return Ok(());
    };

    let credential = NewCredential::access(
        Issued::new("A1", start(), Duration::days(1)),
        Some(Issued::new("R1", start(), Duration::MAX)),
        "{}",
    );
    harness.store.create(credential).await?;

    harness.clock.advance(Duration::days(365 * 100));
    assert_eq!(
        harness.store.lookup_by_refresh("R1").await?.as_deref(),
        Some("{}")
    );
    Ok(())
}

#[tokio::test]
async fn lookups_skip_expired_rows_before_gc() -> Result<()> {
    let Some(harness) = Harness::new().await? else {
        return Ok(());
    };

    harness
        .store
        .create(code("C1", Duration::minutes(10)))
        .await?;
    harness.clock.advance(Duration::minutes(10));

    assert_eq!(harness.store.lookup_by_code("C1").await?, None);
    assert_eq!(harness.row_count().await?, 1);
    Ok(())
}

#[tokio::test]
async fn revocation_is_per_identifier_and_idempotent() -> Result<()> {
    let Some(harness) = Harness::new().await? else {
        return Ok(());
    };
    harness.store.create(pair("A1", "R1")).await?;

    harness.store.revoke_by_access("A1").await?;
    harness.store.revoke_by_access("A1").await?;
    harness.store.revoke_by_access("never-issued").await?;

    assert_eq!(harness.store.lookup_by_access("A1").await?, None);
    assert!(harness.store.lookup_by_refresh("R1").await?.is_some());
    assert_eq!(harness.sweeper().sweep_once().await?, 0);

    harness.store.revoke_by_refresh("R1").await?;
    assert_eq!(harness.store.lookup_by_refresh("R1").await?, None);
    assert_eq!(harness.sweeper().sweep_once().await?, 1);
    assert_eq!(harness.row_count().await?, 0);
    Ok(())
}

#[tokio::test]
async fn duplicate_identifiers_are_constraint_errors() -> Result<()> {
    let Some(harness) = Harness::new().await? else {
        return Ok(());
    };
    harness.store.create(pair("A1", "R1")).await?;

    let duplicate = harness.store.create(pair("A1", "R2")).await;
    assert!(matches!(duplicate, Err(Error::Constraint(_))));

    // Cleared columns are not identifiers and may repeat.
    harness
        .store
        .create(NewCredential::access(
            Issued::new("A2", start(), Duration::hours(1)),
            None,
            "{}",
        ))
        .await?;
    harness
        .store
        .create(NewCredential::access(
            Issued::new("A3", start(), Duration::hours(1)),
            None,
            "{}",
        ))
        .await?;
    harness.store.revoke_by_access("A2").await?;
    harness.store.revoke_by_access("A3").await?;
    assert_eq!(harness.row_count().await?, 3);
    Ok(())
}

#[tokio::test]
async fn gc_deletes_exactly_the_eligible_rows() -> Result<()> {
    let Some(harness) = Harness::new().await? else {
        return Ok(());
    };

    // Five live rows, two that expire, one fully revoked.
    for index in 0..5 {
        harness
            .store
            .create(pair(&format!("A{index}"), &format!("R{index}")))
            .await?;
    }
    harness
        .store
        .create(code("C-short", Duration::minutes(1)))
        .await?;
    harness
        .store
        .create(code("C-also-short", Duration::minutes(5)))
        .await?;
    harness
        .store
        .create(code("C-revoked", Duration::days(1)))
        .await?;
    harness.store.revoke_by_code("C-revoked").await?;

    harness.clock.advance(Duration::minutes(5));

    let sweeper = harness.sweeper();
    assert_eq!(
        harness.pg.count_gc_eligible(harness.clock.now()).await?,
        3
    );
    assert_eq!(sweeper.sweep_once().await?, 3);
    assert_eq!(harness.row_count().await?, 5);
    assert_eq!(sweeper.sweep_once().await?, 0);

    for index in 0..5 {
        assert!(harness
            .store
            .lookup_by_access(&format!("A{index}"))
            .await?
            .is_some());
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_access_and_refresh_revocations_both_land() -> Result<()> {
    let Some(harness) = Harness::new().await? else {
        return Ok(());
    };

    for index in 0..20 {
        harness
            .store
            .create(pair(&format!("A{index}"), &format!("R{index}")))
            .await?;
    }

    let mut tasks = Vec::new();
    for index in 0..20 {
        let access = harness.store.clone();
        let refresh = harness.store.clone();
        tasks.push(tokio::spawn(async move {
            access.revoke_by_access(&format!("A{index}")).await
        }));
        tasks.push(tokio::spawn(async move {
            refresh.revoke_by_refresh(&format!("R{index}")).await
        }));
    }
    for task in tasks {
        task.await??;
    }

    let uncleared = sqlx::query(
        "SELECT COUNT(*) AS remaining FROM oauth2_token WHERE access <> '' OR refresh <> ''",
    )
    .fetch_one(harness.pg.pool())
    .await?;
    assert_eq!(uncleared.get::<i64, _>("remaining"), 0);
    assert_eq!(harness.sweeper().sweep_once().await?, 20);
    Ok(())
}

#[tokio::test]
async fn directory_reads_and_stored_token_updates() -> Result<()> {
    let Some(harness) = Harness::new().await? else {
        return Ok(());
    };
    let pool = harness.pg.pool();

    sqlx::query(
        "INSERT INTO oauth2_users (username, password, totp_secret, show_qrcode, is_admin) VALUES ($1, $2, '', FALSE, FALSE), ($3, $4, '', FALSE, TRUE)",
    )
    .bind("alice")
    .bind("wonderland")
    .bind("root")
    .bind("toor")
    .execute(pool)
    .await?;
    sqlx::query(
        "INSERT INTO oauth2_client (id, secret, domain, remark, username, bound_address) VALUES ('c-2', 's2', 'https://b.example', 'second', 'alice', '10.0.0.6'), ('c-1', 's1', 'https://a.example', 'first', 'alice', '10.0.0.5')",
    )
    .execute(pool)
    .await?;

    let directory: Arc<dyn DirectoryBackend> = harness.pg.clone();

    let alice = directory.user_by_credentials("alice", "wonderland").await?;
    let Some(alice) = alice else {
        panic!("alice should authenticate");
    };
    assert!(!alice.is_admin);
    let bound: Vec<&str> = alice
        .clients
        .iter()
        .map(|client| client.bound_address.as_str())
        .collect();
    assert_eq!(bound, ["10.0.0.5", "10.0.0.6"]);

    assert!(directory
        .user_by_credentials("alice", "wrong")
        .await?
        .is_none());
    assert!(directory
        .user_by_username("root")
        .await?
        .is_some_and(|user| user.is_admin && user.clients.is_empty()));

    directory.update_stored_token("alice", "session-token").await?;
    assert_eq!(
        directory
            .user_by_username("alice")
            .await?
            .map(|user| user.token),
        Some("session-token".to_string())
    );
    assert!(matches!(
        directory.update_stored_token("nobody", "t").await,
        Err(Error::NotFound(_))
    ));

    let client = directory.client_by_id("c-1").await?;
    assert_eq!(
        client.map(|c| (c.secret, c.username)),
        Some(("s1".to_string(), "alice".to_string()))
    );
    assert!(directory.client_by_id("missing").await?.is_none());
    assert_eq!(directory.all_clients().await?.len(), 2);
    Ok(())
}
