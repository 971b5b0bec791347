use log::debug;
use rusqlite::types::Value;
use serde::Deserialize;

use crate::condition::{Condition, WhereClause};
use crate::context::MigrationContext;
use crate::error::StagewiseError;
use crate::notify::Notice;
use crate::step::Step;

use super::Operate;

/// Raises a data-integrity notice when rows are left in a state the new
/// version cannot handle. `{count}` in the message is replaced by the number
/// of matching rows. Never modifies data.
#[derive(Debug, Clone, Deserialize)]
pub struct WarnCount {
    pub table: String,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default, rename = "where")]
    pub conditions: Vec<Condition>,
    pub message: String,
}

impl Operate for WarnCount {
    fn apply(&self, step: &Step, ctx: &mut MigrationContext) -> Result<(), StagewiseError> {
        let count: i64 = {
            let probe = ctx.probe();
            let table = probe.checked_table(&self.table)?;
            let clause = WhereClause::build(&probe, &table, &self.conditions)?;
            let sql = format!("SELECT COUNT(*) FROM {}{}", table, clause.sql);
            ctx.conn().query_row(
                &sql,
                rusqlite::params_from_iter(clause.params.iter()),
                |row| row.get(0),
            )?
        };

        debug!("Step '{}': {} row(s) of {} matched", step.id, count, self.table);
        if count > 0 {
            let message = self.message.replace("{count}", &count.to_string());
            ctx.notice(
                Notice::new(&step.id, message)
                    .module(step.module.as_deref())
                    .table(&self.table)
                    .column(self.column.as_deref()),
            );
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("warn on matching rows of {}", self.table)
    }
}

/// Raises one notice per matching row, so an operator can fix each record
/// by hand. `{column}` placeholders in the message are replaced by that
/// row's values for the listed columns. Rows are reported in order of
/// those columns.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportOrphans {
    pub table: String,
    pub columns: Vec<String>,
    #[serde(default, rename = "where")]
    pub conditions: Vec<Condition>,
    pub message: String,
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => r.to_string(),
        Value::Text(s) => s.clone(),
        Value::Blob(b) => format!("<{} bytes>", b.len()),
    }
}

impl Operate for ReportOrphans {
    fn apply(&self, step: &Step, ctx: &mut MigrationContext) -> Result<(), StagewiseError> {
        let rows: Vec<Vec<Value>> = {
            let probe = ctx.probe();
            let table = probe.checked_table(&self.table)?;
            let columns = self
                .columns
                .iter()
                .map(|c| probe.checked_column(&table, c).map(|ident| ident.to_string()))
                .collect::<Result<Vec<_>, _>>()?;
            if columns.is_empty() {
                return Err(StagewiseError::InvalidPlan(format!(
                    "report_orphans on '{}' lists no columns",
                    self.table
                )));
            }
            let clause = WhereClause::build(&probe, &table, &self.conditions)?;
            let sql = format!(
                "SELECT {cols} FROM {table}{filter} ORDER BY {cols}",
                cols = columns.join(", "),
                table = table,
                filter = clause.sql
            );
            let mut stmt = ctx.conn().prepare(&sql)?;
            let width = columns.len();
            let rows = stmt
                .query_map(rusqlite::params_from_iter(clause.params.iter()), |row| {
                    (0..width)
                        .map(|i| row.get::<_, Value>(i))
                        .collect::<rusqlite::Result<Vec<Value>>>()
                })?
                .collect::<Result<Vec<Vec<Value>>, _>>()?;
            rows
        };

        for row in rows {
            let mut message = self.message.clone();
            for (name, value) in self.columns.iter().zip(row.iter()) {
                message = message.replace(&format!("{{{}}}", name), &render_value(value));
            }
            ctx.notice(
                Notice::new(&step.id, message)
                    .module(step.module.as_deref())
                    .table(&self.table),
            );
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("report matching rows of {}", self.table)
    }
}
