use log::debug;
use serde::Deserialize;

use crate::context::MigrationContext;
use crate::error::StagewiseError;
use crate::step::Step;

use super::Operate;

const SOURCE_ALIAS: &str = "stagewise_source";

/// One equality between a target column and a source column.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JoinPair {
    pub target: String,
    pub source: String,
}

/// Copies a column from related source rows onto target rows.
///
/// Rows are related when all join pairs hold, or any of them when
/// `match_any` is set. When several source rows relate to one target row,
/// the first by the source join columns (then the source column) wins, so
/// every application picks the same value. Rows that already carry that
/// value are left alone and a second application changes nothing.
#[derive(Debug, Clone, Deserialize)]
pub struct PropagateColumn {
    pub target_table: String,
    pub target_column: String,
    pub source_table: String,
    pub source_column: String,
    pub join: Vec<JoinPair>,
    #[serde(default)]
    pub match_any: bool,
}

impl Operate for PropagateColumn {
    fn apply(&self, step: &Step, ctx: &mut MigrationContext) -> Result<(), StagewiseError> {
        if self.join.is_empty() {
            return Err(StagewiseError::InvalidPlan(format!(
                "propagate_column into '{}' has no join pairs",
                self.target_table
            )));
        }
        if self.target_table == self.source_table || self.target_table == SOURCE_ALIAS {
            return Err(StagewiseError::InvalidPlan(format!(
                "propagate_column source and target are both '{}'",
                self.target_table
            )));
        }

        let probe = ctx.probe();
        let target = probe.checked_table(&self.target_table)?;
        let source = probe.checked_table(&self.source_table)?;
        let target_column = probe.checked_column(&target, &self.target_column)?;
        let source_column = probe.checked_column(&source, &self.source_column)?;

        let mut predicates = Vec::with_capacity(self.join.len());
        let mut order = Vec::with_capacity(self.join.len() + 1);
        for pair in &self.join {
            let t = probe.checked_column(&target, &pair.target)?;
            let s = probe.checked_column(&source, &pair.source)?;
            predicates.push(format!("{}.{} = {}.{}", target, t, SOURCE_ALIAS, s));
            order.push(format!("{}.{}", SOURCE_ALIAS, s));
        }
        order.push(format!("{}.{}", SOURCE_ALIAS, source_column));
        let joiner = if self.match_any { " OR " } else { " AND " };
        let join = predicates.join(joiner);

        let pick = format!(
            "SELECT {alias}.{sc} FROM {source} AS {alias} WHERE {join} ORDER BY {order} LIMIT 1",
            alias = SOURCE_ALIAS,
            sc = source_column,
            source = source,
            join = join,
            order = order.join(", "),
        );
        let sql = format!(
            "UPDATE {target} SET {tc} = ({pick}) \
             WHERE EXISTS (SELECT 1 FROM {source} AS {alias} WHERE {join}) \
             AND {target}.{tc} IS NOT ({pick})",
            target = target,
            tc = target_column,
            pick = pick,
            source = source,
            alias = SOURCE_ALIAS,
            join = join,
        );

        let changed = ctx.conn().execute(&sql, [])?;
        debug!(
            "Step '{}': propagated {}.{} onto {} row(s) of {}",
            step.id, self.source_table, self.source_column, changed, self.target_table
        );
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "propagate {}.{} to {}.{}",
            self.source_table, self.source_column, self.target_table, self.target_column
        )
    }
}
