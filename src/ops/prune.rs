use log::debug;
use serde::Deserialize;

use crate::condition::{Condition, WhereClause};
use crate::context::MigrationContext;
use crate::error::StagewiseError;
use crate::step::Step;
use crate::traverse::TreeWalker;

use super::Operate;

fn default_id_column() -> String {
    "id".to_string()
}

/// Deletes the rows matching `where`, together with every row that
/// references them through `parent_column`, recursively. Dependents are
/// deleted before the records they point at.
#[derive(Debug, Clone, Deserialize)]
pub struct PruneTree {
    pub table: String,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    pub parent_column: String,
    #[serde(rename = "where")]
    pub conditions: Vec<Condition>,
}

impl Operate for PruneTree {
    fn apply(&self, step: &Step, ctx: &mut MigrationContext) -> Result<(), StagewiseError> {
        if self.conditions.is_empty() {
            return Err(StagewiseError::InvalidPlan(format!(
                "prune_tree on '{}' needs at least one condition",
                self.table
            )));
        }

        let probe = ctx.probe();
        let table = probe.checked_table(&self.table)?;
        let id_column = probe.checked_column(&table, &self.id_column)?;
        let parent_column = probe.checked_column(&table, &self.parent_column)?;
        let clause = WhereClause::build(&probe, &table, &self.conditions)?;

        let roots = {
            let sql = format!(
                "SELECT {}.{} FROM {}{} ORDER BY {}.{}",
                table, id_column, table, clause.sql, table, id_column
            );
            let mut stmt = ctx.conn().prepare(&sql)?;
            let ids = stmt
                .query_map(rusqlite::params_from_iter(clause.params.iter()), |row| {
                    row.get::<_, i64>(0)
                })?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };

        let walker = TreeWalker::new(ctx.conn(), &table, &id_column, &parent_column);
        let doomed = walker.post_order_all(&roots)?;

        let delete_sql = format!("DELETE FROM {} WHERE {} = ?1", table, id_column);
        let mut delete = ctx.conn().prepare(&delete_sql)?;
        for id in &doomed {
            delete.execute([id])?;
        }

        debug!(
            "Step '{}': pruned {} row(s) from {} ({} matched directly)",
            step.id,
            doomed.len(),
            self.table,
            roots.len()
        );
        Ok(())
    }

    fn describe(&self) -> String {
        format!("prune {} and its dependents via {}", self.table, self.parent_column)
    }
}
