use log::debug;
use serde::Deserialize;

use crate::condition::SqlValue;
use crate::context::MigrationContext;
use crate::error::StagewiseError;
use crate::step::Step;

use super::Operate;

/// Rewrites obsolete values of a column to their replacement.
#[derive(Debug, Clone, Deserialize)]
pub struct MapValues {
    pub table: String,
    pub column: String,
    pub from: Vec<SqlValue>,
    pub to: SqlValue,
}

impl Operate for MapValues {
    fn apply(&self, step: &Step, ctx: &mut MigrationContext) -> Result<(), StagewiseError> {
        if self.from.is_empty() {
            return Ok(());
        }

        let probe = ctx.probe();
        let table = probe.checked_table(&self.table)?;
        let column = probe.checked_column(&table, &self.column)?;

        let marks = vec!["?"; self.from.len()].join(", ");
        let sql = format!(
            "UPDATE {} SET {} = ? WHERE {} IN ({})",
            table, column, column, marks
        );

        let params = std::iter::once(&self.to).chain(self.from.iter());
        let changed = ctx
            .conn()
            .execute(&sql, rusqlite::params_from_iter(params))?;
        debug!(
            "Step '{}': mapped {} row(s) of {}.{} to '{}'",
            step.id, changed, self.table, self.column, self.to
        );
        Ok(())
    }

    fn describe(&self) -> String {
        format!("map values of {}.{} to '{}'", self.table, self.column, self.to)
    }
}

/// Gives NULL columns a value.
///
/// With `when_null`, all `columns` are set in one statement on the rows
/// where that column is NULL. Without it, each column is filled on its own
/// NULL rows.
#[derive(Debug, Clone, Deserialize)]
pub struct FillNull {
    pub table: String,
    pub columns: Vec<String>,
    pub value: SqlValue,
    #[serde(default)]
    pub when_null: Option<String>,
}

impl Operate for FillNull {
    fn apply(&self, step: &Step, ctx: &mut MigrationContext) -> Result<(), StagewiseError> {
        let probe = ctx.probe();
        let table = probe.checked_table(&self.table)?;
        let columns = self
            .columns
            .iter()
            .map(|c| probe.checked_column(&table, c))
            .collect::<Result<Vec<_>, _>>()?;

        let mut changed = 0;
        match &self.when_null {
            Some(guard) => {
                let guard = probe.checked_column(&table, guard)?;
                let assignments = columns
                    .iter()
                    .map(|c| format!("{} = ?1", c))
                    .collect::<Vec<_>>()
                    .join(", ");
                let sql = format!(
                    "UPDATE {} SET {} WHERE {} IS NULL",
                    table, assignments, guard
                );
                changed += ctx.conn().execute(&sql, [&self.value])?;
            }
            None => {
                for column in &columns {
                    let sql = format!(
                        "UPDATE {} SET {} = ?1 WHERE {} IS NULL",
                        table, column, column
                    );
                    changed += ctx.conn().execute(&sql, [&self.value])?;
                }
            }
        }

        debug!(
            "Step '{}': filled {} NULL value(s) in {}",
            step.id, changed, self.table
        );
        Ok(())
    }

    fn describe(&self) -> String {
        format!("fill NULL {}.{:?}", self.table, self.columns)
    }
}
