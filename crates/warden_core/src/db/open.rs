//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file, read-only file, or in-memory SQLite connections.
//! - Configure connection pragmas required by the access storage.
//! - Trigger schema migrations before returning a writable connection.
//!
//! # Invariants
//! - Returned writable connections have migrations fully applied.
//! - Returned read-only connections are at the latest schema version.

use super::migrations::{apply_migrations, current_user_version, latest_version};
use super::{DbError, DbResult};
use log::{error, info};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::time::{Duration, Instant};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens a SQLite database file and applies all pending migrations.
///
/// # Side effects
/// - Creates the file when missing.
/// - Emits `db_open` logging events with duration and status.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode=file");

    let conn = Connection::open(path).map_err(|err| {
        log_open_failure("file", "db_open_failed", started_at, &err);
        DbError::from(err)
    })?;
    finish_open(conn, "file", started_at, bootstrap_connection)
}

/// Opens an existing SQLite database file without write access.
///
/// The schema is checked, never migrated.
pub fn open_db_readonly(path: impl AsRef<Path>) -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode=readonly");

    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(path, flags).map_err(|err| {
        log_open_failure("readonly", "db_open_failed", started_at, &err);
        DbError::from(err)
    })?;
    finish_open(conn, "readonly", started_at, check_readonly_connection)
}

/// Opens an in-memory SQLite database and applies all pending migrations.
pub fn open_db_in_memory() -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode=memory");

    let conn = Connection::open_in_memory().map_err(|err| {
        log_open_failure("memory", "db_open_failed", started_at, &err);
        DbError::from(err)
    })?;
    finish_open(conn, "memory", started_at, bootstrap_connection)
}

fn finish_open(
    mut conn: Connection,
    mode: &str,
    started_at: Instant,
    bootstrap: fn(&mut Connection) -> DbResult<()>,
) -> DbResult<Connection> {
    match bootstrap(&mut conn) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode={} duration_ms={}",
                mode,
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            log_open_failure(mode, "db_bootstrap_failed", started_at, &err);
            Err(err)
        }
    }
}

fn log_open_failure(mode: &str, error_code: &str, started_at: Instant, err: &dyn std::fmt::Display) {
    error!(
        "event=db_open module=db status=error mode={} duration_ms={} error_code={} error={}",
        mode,
        started_at.elapsed().as_millis(),
        error_code,
        err
    );
}

fn bootstrap_connection(conn: &mut Connection) -> DbResult<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    apply_migrations(conn)?;
    Ok(())
}

fn check_readonly_connection(conn: &mut Connection) -> DbResult<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    let db_version = current_user_version(conn)?;
    let latest = latest_version();
    if db_version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported: latest,
        });
    }
    if db_version < latest {
        return Err(DbError::OutdatedSchemaVersion {
            db_version,
            required: latest,
        });
    }
    Ok(())
}
