use std::path::Path;
use std::time::Duration;

use log::{debug, info};
use rusqlite::Connection;

use crate::config::DatabaseConfig;
use crate::error::StagewiseError;

pub struct Database;

impl Database {
    /// Opens the database that is about to be migrated.
    ///
    /// The file must already exist: the runner upgrades a database, it never
    /// creates one.
    pub fn open(path: &Path, config: &DatabaseConfig) -> Result<Connection, StagewiseError> {
        if !path.is_file() {
            return Err(StagewiseError::Error(format!(
                "Database '{}' does not exist or is not a file",
                path.display()
            )));
        }

        let conn = Connection::open(path)?;
        Self::configure(&conn, config)?;
        info!("Database opened at: {}", path.display());

        Ok(conn)
    }

    pub fn configure(conn: &Connection, config: &DatabaseConfig) -> Result<(), StagewiseError> {
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    /// Runs `f` inside `BEGIN IMMEDIATE`, committing on success and rolling
    /// back on any error. The error from `f` is returned unchanged.
    pub fn immediate_transaction<T, C, F>(ctx: &mut C, f: F) -> Result<T, StagewiseError>
    where
        C: AsConnection,
        F: FnOnce(&mut C) -> Result<T, StagewiseError>,
    {
        ctx.connection().execute_batch("BEGIN IMMEDIATE")?;

        match f(ctx) {
            Ok(value) => {
                ctx.connection().execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = ctx.connection().execute_batch("ROLLBACK") {
                    debug!("Rollback after failure also failed: {}", rollback_err);
                }
                Err(err)
            }
        }
    }
}

/// Anything that hands out the connection a transaction should be opened on.
pub trait AsConnection {
    fn connection(&self) -> &Connection;
}

impl AsConnection for Connection {
    fn connection(&self) -> &Connection {
        self
    }
}
