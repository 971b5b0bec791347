use std::cmp::Ordering;

use log::debug;
use rusqlite::{params, Connection, OptionalExtension};

use crate::config::RegistryConfig;
use crate::error::StagewiseError;
use crate::ident::Ident;

/// Read-only questions about the live schema.
///
/// Nothing is cached: every call goes to the catalog, so a probe always
/// reflects what earlier steps in the same run have done.
pub struct SchemaProbe<'a> {
    conn: &'a Connection,
    registry: &'a RegistryConfig,
}

impl<'a> SchemaProbe<'a> {
    pub fn new(conn: &'a Connection, registry: &'a RegistryConfig) -> Self {
        SchemaProbe { conn, registry }
    }

    pub fn table_exists(&self, table: &str) -> Result<bool, StagewiseError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?",
                [table],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn column_exists(&self, table: &str, column: &str) -> Result<bool, StagewiseError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2",
                params![table, column],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// User tables, in name order. SQLite's internal tables are left out.
    pub fn tables(&self) -> Result<Vec<String>, StagewiseError> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'
             ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    pub fn columns(&self, table: &str) -> Result<Vec<String>, StagewiseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
        let names = stmt
            .query_map([table], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    /// True when the registry lists `name` as installed at `min_version` or later.
    ///
    /// A database without a registry table has nothing installed.
    pub fn component_installed(&self, name: &str, min_version: &str) -> Result<bool, StagewiseError> {
        if !self.table_exists(&self.registry.table)? {
            debug!(
                "Component registry table '{}' not present, treating '{}' as not installed",
                self.registry.table, name
            );
            return Ok(false);
        }

        let table = Ident::parse(&self.registry.table)?;
        let name_column = Ident::parse(&self.registry.name_column)?;
        let state_column = Ident::parse(&self.registry.state_column)?;
        let version_column = Ident::parse(&self.registry.version_column)?;

        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1 AND {} = ?2",
            version_column, table, name_column, state_column
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let versions = stmt
            .query_map(params![name, self.registry.installed_state], |row| {
                row.get::<_, Option<String>>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let required = ComponentVersion::parse(min_version);
        Ok(versions
            .iter()
            .flatten()
            .any(|version| ComponentVersion::parse(version) >= required))
    }

    /// Validates `table` and confirms it exists.
    pub fn checked_table(&self, table: &str) -> Result<Ident, StagewiseError> {
        let ident = Ident::parse(table)?;
        if !self.table_exists(table)? {
            return Err(StagewiseError::UnknownIdentifier(format!("table '{}'", table)));
        }
        Ok(ident)
    }

    /// Validates `column` and confirms it exists on `table`.
    pub fn checked_column(&self, table: &Ident, column: &str) -> Result<Ident, StagewiseError> {
        let ident = Ident::parse(column)?;
        if !self.column_exists(table.as_str(), column)? {
            return Err(StagewiseError::UnknownIdentifier(format!(
                "column '{}.{}'",
                table.as_str(),
                column
            )));
        }
        Ok(ident)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Num(u64),
    Text(String),
}

impl Segment {
    fn parse(raw: &str) -> Self {
        match raw.parse::<u64>() {
            Ok(n) => Segment::Num(n),
            Err(_) => Segment::Text(raw.to_string()),
        }
    }
}

impl Ord for Segment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Segment::Num(a), Segment::Num(b)) => a.cmp(b),
            (Segment::Text(a), Segment::Text(b)) => a.cmp(b),
            (Segment::Num(_), Segment::Text(_)) => Ordering::Less,
            (Segment::Text(_), Segment::Num(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Dotted component version such as `8.0.1.1`.
///
/// Numeric segments compare numerically and missing trailing segments count
/// as zero, so `8.0.1` == `8.0.1.0` and `8.0.10` > `8.0.9`.
#[derive(Debug, Clone)]
pub struct ComponentVersion {
    segments: Vec<Segment>,
}

impl ComponentVersion {
    pub fn parse(raw: &str) -> Self {
        let segments = raw
            .trim()
            .split('.')
            .filter(|s| !s.is_empty())
            .map(Segment::parse)
            .collect();
        ComponentVersion { segments }
    }
}

impl Ord for ComponentVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.segments.len().max(other.segments.len());
        let zero = Segment::Num(0);
        for i in 0..len {
            let a = self.segments.get(i).unwrap_or(&zero);
            let b = other.segments.get(i).unwrap_or(&zero);
            match a.cmp(b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for ComponentVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ComponentVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ComponentVersion {}
