use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::Deserialize;

use crate::condition::SqlValue;
use crate::context::MigrationContext;
use crate::error::StagewiseError;

/// Loads fixed reference data once the ordinary steps have run.
pub trait DataLoader {
    /// Returns the number of records written.
    fn load(&self, ctx: &mut MigrationContext) -> Result<usize, StagewiseError>;

    fn describe(&self) -> String;
}

/// Loads nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoData;

impl DataLoader for NoData {
    fn load(&self, _ctx: &mut MigrationContext) -> Result<usize, StagewiseError> {
        Ok(0)
    }

    fn describe(&self) -> String {
        "no reference data".to_string()
    }
}

#[derive(Debug, Deserialize)]
struct DataFile {
    #[serde(default)]
    record: Vec<DataRecord>,
}

#[derive(Debug, Deserialize)]
struct DataRecord {
    table: String,
    values: BTreeMap<String, SqlValue>,
}

/// Reads `[[record]]` entries from TOML files and upserts each one. A record
/// that collides with an existing row on a primary or unique key updates
/// that row in place, so rows referencing it survive a reload and the
/// table converges on the same state however often the data is loaded.
///
/// ```toml
/// [[record]]
/// table = "res_groups"
/// values = { id = 12, name = "Procurement / Manager" }
/// ```
#[derive(Debug, Clone, Default)]
pub struct TomlDataLoader {
    files: Vec<PathBuf>,
}

impl TomlDataLoader {
    pub fn new(files: Vec<PathBuf>) -> Self {
        TomlDataLoader { files }
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    fn read(path: &Path) -> Result<DataFile, StagewiseError> {
        let text = fs::read_to_string(path).map_err(|e| {
            StagewiseError::Error(format!("Failed to read data file {}: {}", path.display(), e))
        })?;
        Ok(toml::from_str(&text)?)
    }

    fn load_record(ctx: &MigrationContext, record: &DataRecord) -> Result<(), StagewiseError> {
        if record.values.is_empty() {
            return Err(StagewiseError::InvalidPlan(format!(
                "data record for '{}' has no values",
                record.table
            )));
        }

        let probe = ctx.probe();
        let table = probe.checked_table(&record.table)?;
        let columns = record
            .values
            .keys()
            .map(|c| probe.checked_column(&table, c).map(|ident| ident.to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        let marks = vec!["?"; columns.len()].join(", ");
        let assignments = columns
            .iter()
            .map(|c| format!("{} = excluded.{}", c, c))
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT DO UPDATE SET {}",
            table,
            columns.join(", "),
            marks,
            assignments
        );
        ctx.conn()
            .execute(&sql, rusqlite::params_from_iter(record.values.values()))?;
        Ok(())
    }
}

impl DataLoader for TomlDataLoader {
    fn load(&self, ctx: &mut MigrationContext) -> Result<usize, StagewiseError> {
        let mut loaded = 0;
        for path in &self.files {
            let data = Self::read(path)?;
            debug!(
                "Loading {} record(s) from {}",
                data.record.len(),
                path.display()
            );
            for record in &data.record {
                Self::load_record(ctx, record)?;
                loaded += 1;
            }
        }
        if loaded > 0 {
            info!("Loaded {} reference record(s)", loaded);
        }
        Ok(loaded)
    }

    fn describe(&self) -> String {
        format!("{} reference data file(s)", self.files.len())
    }
}
