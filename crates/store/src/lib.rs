//! Durable personal-best storage keyed by `(track, car)`.
//!
//! The store is a single SQLite table behind the [`BestLapStore`] trait.
//! Connections are opened fresh per call and serialise through SQLite's own
//! locking, so callers on any thread stay consistent. Schema evolution runs
//! through a `schema_migrations` ledger: scripts are applied in filename
//! order inside a transaction and recorded by version, which makes applying
//! them twice a no-op.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Default database location relative to the install directory.
pub const DEFAULT_DB_PATH: &str = "data/telemetry.db";
/// Default directory holding `*.sql` migration scripts.
pub const DEFAULT_MIGRATIONS_DIR: &str = "data/migrations";

/// Compiled-in scripts used when no migrations directory exists on disk.
const BUILTIN_MIGRATIONS: &[(&str, &str)] =
    &[("0001_initial", include_str!("migrations/0001_initial.sql"))];

/// A stored personal best for one `(track, car)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PbRecord {
    pub track: String,
    pub car: String,
    pub laptime_ms: u32,
    pub recorded_at: DateTime<Utc>,
}

/// Failures of the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("lap time must be non-negative, got {0}")]
    InvalidLapTime(i64),

    #[error("stored lap time {0} out of range")]
    LapTimeOutOfRange(i64),

    #[error("unparseable timestamp `{0}`")]
    Timestamp(String),

    #[error("migration `{version}` failed: {source}")]
    Migration {
        version: String,
        source: rusqlite::Error,
    },
}

/// Contract the session engine records laps through.
pub trait BestLapStore {
    /// Stored PB for the pair, if any.
    fn load(&self, track: &str, car: &str) -> Result<Option<PbRecord>, StoreError>;

    /// Persist a lap, keeping only strictly faster times.
    ///
    /// Returns the active PB and whether this lap improved it. Negative lap
    /// times are refused up-front.
    fn record_lap(
        &self,
        track: &str,
        car: &str,
        laptime_ms: i64,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<(PbRecord, bool), StoreError>;

    /// Remove a stored PB; reports whether a row existed.
    fn delete(&self, track: &str, car: &str) -> Result<bool, StoreError>;
}

/// SQLite-backed [`BestLapStore`].
#[derive(Debug, Clone)]
pub struct PersonalBestStore {
    db_path: PathBuf,
    migrations_dir: PathBuf,
}

impl Default for PersonalBestStore {
    fn default() -> Self {
        Self::new(
            PathBuf::from(DEFAULT_DB_PATH),
            PathBuf::from(DEFAULT_MIGRATIONS_DIR),
        )
    }
}

impl PersonalBestStore {
    pub fn new(db_path: PathBuf, migrations_dir: PathBuf) -> Self {
        Self {
            db_path,
            migrations_dir,
        }
    }

    /// Open a connection, creating parent directories and applying any
    /// pending migrations.
    fn connect(&self) -> Result<Connection, StoreError> {
        if let Some(parent) = self.db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let mut conn = Connection::open(&self.db_path)?;
        apply_migrations(&mut conn, &self.migrations_dir)?;
        Ok(conn)
    }
}

impl BestLapStore for PersonalBestStore {
    fn load(&self, track: &str, car: &str) -> Result<Option<PbRecord>, StoreError> {
        let conn = self.connect()?;
        let row = conn
            .query_row(
                "SELECT track, car, laptime_ms, date FROM pb WHERE track = ?1 AND car = ?2",
                params![track, car],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        row.map(|(track, car, laptime_ms, date)| row_to_record(track, car, laptime_ms, &date))
            .transpose()
    }

    fn record_lap(
        &self,
        track: &str,
        car: &str,
        laptime_ms: i64,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<(PbRecord, bool), StoreError> {
        if laptime_ms < 0 {
            return Err(StoreError::InvalidLapTime(laptime_ms));
        }
        let laptime =
            u32::try_from(laptime_ms).map_err(|_| StoreError::LapTimeOutOfRange(laptime_ms))?;
        let recorded_at = timestamp.unwrap_or_else(Utc::now);

        let conn = self.connect()?;
        let existing = conn
            .query_row(
                "SELECT laptime_ms, date FROM pb WHERE track = ?1 AND car = ?2",
                params![track, car],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        if let Some((prior_ms, prior_date)) = existing
            && i64::from(laptime) >= prior_ms
        {
            let record = row_to_record(track.to_string(), car.to_string(), prior_ms, &prior_date)?;
            debug!(track, car, laptime_ms, prior_ms, "lap did not improve stored PB");
            return Ok((record, false));
        }

        conn.execute(
            "INSERT INTO pb(track, car, laptime_ms, date)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(track, car) DO UPDATE SET
                 laptime_ms = excluded.laptime_ms,
                 date = excluded.date",
            params![track, car, i64::from(laptime), recorded_at.to_rfc3339()],
        )?;
        info!(track, car, laptime_ms = laptime, "personal best recorded");

        Ok((
            PbRecord {
                track: track.to_string(),
                car: car.to_string(),
                laptime_ms: laptime,
                recorded_at,
            },
            true,
        ))
    }

    fn delete(&self, track: &str, car: &str) -> Result<bool, StoreError> {
        let conn = self.connect()?;
        let removed = conn.execute(
            "DELETE FROM pb WHERE track = ?1 AND car = ?2",
            params![track, car],
        )?;
        Ok(removed > 0)
    }
}

fn row_to_record(
    track: String,
    car: String,
    laptime_ms: i64,
    date: &str,
) -> Result<PbRecord, StoreError> {
    let laptime = u32::try_from(laptime_ms).map_err(|_| StoreError::LapTimeOutOfRange(laptime_ms))?;
    Ok(PbRecord {
        track,
        car,
        laptime_ms: laptime,
        recorded_at: parse_timestamp(date)?,
    })
}

/// Parse an ISO-8601 timestamp, treating zone-less values as UTC.
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| StoreError::Timestamp(raw.to_string()))
}

/// Apply every migration script not yet present in the ledger.
///
/// Scripts come from `migrations_dir` in filename order, or from the
/// compiled-in set when that directory does not exist. Each script runs in a
/// transaction and its version row is inserted before commit.
fn apply_migrations(conn: &mut Connection, migrations_dir: &Path) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (version TEXT PRIMARY KEY)",
    )?;

    for (version, sql) in enumerate_migrations(migrations_dir)? {
        let applied: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE version = ?1)",
            params![version],
            |row| row.get(0),
        )?;
        if applied {
            continue;
        }

        let tx = conn.transaction()?;
        tx.execute_batch(&sql).map_err(|source| StoreError::Migration {
            version: version.clone(),
            source,
        })?;
        tx.execute(
            "INSERT INTO schema_migrations(version) VALUES (?1)",
            params![version],
        )?;
        tx.commit()?;
        info!(version = %version, "applied schema migration");
    }
    Ok(())
}

fn enumerate_migrations(dir: &Path) -> Result<Vec<(String, String)>, StoreError> {
    if !dir.is_dir() {
        return Ok(BUILTIN_MIGRATIONS
            .iter()
            .map(|&(version, sql)| (version.to_string(), sql.to_string()))
            .collect());
    }

    let mut scripts = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "sql")
            && let Some(stem) = path.file_stem().and_then(|stem| stem.to_str())
        {
            scripts.push((stem.to_string(), fs::read_to_string(&path)?));
        }
    }
    scripts.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(scripts)
}
