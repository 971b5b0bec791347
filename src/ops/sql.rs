use log::debug;
use serde::Deserialize;

use crate::condition::SqlValue;
use crate::context::MigrationContext;
use crate::error::StagewiseError;
use crate::step::Step;

use super::Operate;

const LEGACY_OPEN: &str = "{legacy:";

/// A single statement with bound parameters.
///
/// The only names that may be spliced into the text are preserved legacy
/// columns, written `{legacy:<table>.<field>}`. Each is resolved through the
/// legacy name resolver and must exist on `<table>` when the statement runs.
#[derive(Debug, Clone, Deserialize)]
pub struct SqlOp {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<SqlValue>,
}

impl SqlOp {
    pub fn new(sql: &str) -> Self {
        SqlOp {
            sql: sql.to_string(),
            params: Vec::new(),
        }
    }

    pub fn params(mut self, params: Vec<SqlValue>) -> Self {
        self.params = params;
        self
    }

    /// Replaces every `{legacy:table.field}` marker with the quoted, verified
    /// legacy column name.
    pub fn render(&self, ctx: &MigrationContext) -> Result<String, StagewiseError> {
        let probe = ctx.probe();
        let mut out = String::with_capacity(self.sql.len());
        let mut rest = self.sql.as_str();

        while let Some(start) = rest.find(LEGACY_OPEN) {
            out.push_str(&rest[..start]);
            let after = &rest[start + LEGACY_OPEN.len()..];
            let end = after.find('}').ok_or_else(|| {
                StagewiseError::Error(format!("Unterminated legacy marker in: {}", self.sql))
            })?;
            let reference = &after[..end];
            let (table, field) = reference.split_once('.').ok_or_else(|| {
                StagewiseError::Error(format!(
                    "Legacy marker '{}' must be written as table.field",
                    reference
                ))
            })?;
            let table = probe.checked_table(table.trim())?;
            let column = probe.checked_column(&table, &ctx.legacy_name(field.trim()))?;
            out.push_str(&column.to_string());
            rest = &after[end + 1..];
        }
        out.push_str(rest);

        Ok(out)
    }
}

impl Operate for SqlOp {
    fn apply(&self, step: &Step, ctx: &mut MigrationContext) -> Result<(), StagewiseError> {
        let sql = self.render(ctx)?;
        let changed = ctx
            .conn()
            .execute(&sql, rusqlite::params_from_iter(self.params.iter()))?;
        debug!("Step '{}': statement affected {} row(s)", step.id, changed);
        Ok(())
    }

    fn describe(&self) -> String {
        let first_line = self.sql.trim().lines().next().unwrap_or_default();
        format!("sql: {}", first_line)
    }
}
