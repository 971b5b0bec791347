use std::fmt;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::condition::{Condition, WhereClause};
use crate::context::MigrationContext;
use crate::error::StagewiseError;
use crate::notify::Notice;
use crate::ops::Operation;

/// When a step runs: in the ordered batch, or in the deferred pass that
/// follows it (and is repeated on every later invocation).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Ordinary,
    Deferred,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Ordinary => "ordinary",
            Phase::Deferred => "deferred",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ordinary" => Some(Phase::Ordinary),
            "deferred" => Some(Phase::Deferred),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of one step within one run.
///
/// A step is pending while it has no state at all. From there it is
/// `Running → Skipped`, `Running → Done` or `Running → Failed`. A failed
/// step aborts its batch.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Running,
    Skipped,
    Done,
    Failed,
}

impl StepState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepState::Running => "running",
            StepState::Skipped => "skipped",
            StepState::Done => "done",
            StepState::Failed => "failed",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "running" => Some(StepState::Running),
            "skipped" => Some(StepState::Skipped),
            "done" => Some(StepState::Done),
            "failed" => Some(StepState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StepState::Skipped | StepState::Done | StepState::Failed)
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a successful invocation of a step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Applied,
    Skipped { reason: String },
}

impl StepOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        StepOutcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn state(&self) -> StepState {
        match self {
            StepOutcome::Applied => StepState::Done,
            StepOutcome::Skipped { .. } => StepState::Skipped,
        }
    }
}

/// A guard a step evaluates before doing anything. All guards of a step
/// must hold, otherwise the step is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Precondition {
    TableExists {
        table: String,
    },
    ColumnExists {
        table: String,
        column: String,
    },
    /// The preserved column for `field` (see the legacy name resolver) is present.
    LegacyColumnExists {
        table: String,
        field: String,
    },
    ComponentInstalled {
        name: String,
        min_version: String,
    },
    /// At least one row of `table` matches every condition.
    RowExists {
        table: String,
        #[serde(default, rename = "where")]
        conditions: Vec<Condition>,
    },
}

impl Precondition {
    pub fn is_met(&self, ctx: &MigrationContext) -> Result<bool, StagewiseError> {
        let probe = ctx.probe();
        match self {
            Precondition::TableExists { table } => probe.table_exists(table),
            Precondition::ColumnExists { table, column } => probe.column_exists(table, column),
            Precondition::LegacyColumnExists { table, field } => {
                probe.column_exists(table, &ctx.legacy_name(field))
            }
            Precondition::ComponentInstalled { name, min_version } => {
                probe.component_installed(name, min_version)
            }
            Precondition::RowExists { table, conditions } => {
                if !probe.table_exists(table)? {
                    return Ok(false);
                }
                for condition in conditions {
                    if !probe.column_exists(table, condition.column())? {
                        return Ok(false);
                    }
                }
                let table = probe.checked_table(table)?;
                let clause = WhereClause::build(&probe, &table, conditions)?;
                let sql = format!("SELECT EXISTS (SELECT 1 FROM {}{})", table, clause.sql);
                let exists: bool = ctx.conn().query_row(
                    &sql,
                    rusqlite::params_from_iter(clause.params.iter()),
                    |row| row.get(0),
                )?;
                Ok(exists)
            }
        }
    }

    pub fn describe(&self, ctx: &MigrationContext) -> String {
        match self {
            Precondition::TableExists { table } => format!("table '{}' does not exist", table),
            Precondition::ColumnExists { table, column } => {
                format!("column '{}.{}' does not exist", table, column)
            }
            Precondition::LegacyColumnExists { table, field } => format!(
                "legacy column '{}.{}' does not exist",
                table,
                ctx.legacy_name(field)
            ),
            Precondition::ComponentInstalled { name, min_version } => format!(
                "component '{}' is not installed at version {} or later",
                name, min_version
            ),
            Precondition::RowExists { table, .. } => {
                format!("no matching rows in '{}'", table)
            }
        }
    }
}

fn default_true() -> bool {
    true
}

/// A named, versioned unit of migration work. Defined once, never mutated
/// after definition, and invoked any number of times.
#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    pub id: String,
    pub target_version: String,
    #[serde(default)]
    pub phase: Phase,
    #[serde(default = "default_true")]
    pub idempotent: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub disabled_reason: Option<String>,
    /// Host application component the step belongs to, for notices.
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default, rename = "require")]
    pub preconditions: Vec<Precondition>,
    /// Tables whose presence means a skipped component guard deserves a hint in the log.
    #[serde(default)]
    pub hint_tables: Vec<String>,
    #[serde(default, rename = "operation")]
    pub operations: Vec<Operation>,
}

impl Step {
    pub fn new(id: &str, target_version: &str) -> Self {
        Step {
            id: id.to_string(),
            target_version: target_version.to_string(),
            phase: Phase::Ordinary,
            idempotent: true,
            enabled: true,
            disabled_reason: None,
            module: None,
            preconditions: Vec::new(),
            hint_tables: Vec::new(),
            operations: Vec::new(),
        }
    }

    pub fn deferred(mut self) -> Self {
        self.phase = Phase::Deferred;
        self
    }

    pub fn non_idempotent(mut self) -> Self {
        self.idempotent = false;
        self
    }

    pub fn disabled(mut self, reason: &str) -> Self {
        self.enabled = false;
        self.disabled_reason = Some(reason.to_string());
        self
    }

    pub fn module(mut self, module: &str) -> Self {
        self.module = Some(module.to_string());
        self
    }

    pub fn require(mut self, precondition: Precondition) -> Self {
        self.preconditions.push(precondition);
        self
    }

    pub fn hint_table(mut self, table: &str) -> Self {
        self.hint_tables.push(table.to_string());
        self
    }

    pub fn operation(mut self, operation: impl Into<Operation>) -> Self {
        self.operations.push(operation.into());
        self
    }

    /// Checks the step's own guards, then applies its operations in order.
    ///
    /// Unmet guards are not an error: the step reports `Skipped` and touches
    /// nothing. Any failing operation is returned as-is; the caller owns the
    /// transaction and rolls it back.
    pub fn execute(&self, ctx: &mut MigrationContext) -> Result<StepOutcome, StagewiseError> {
        if !self.enabled {
            let reason = self
                .disabled_reason
                .as_deref()
                .unwrap_or("no reason recorded");
            ctx.notice(
                Notice::new(
                    &self.id,
                    format!(
                        "Step is disabled ({}); its migration was not applied. Operator decision required.",
                        reason
                    ),
                )
                .module(self.module.as_deref()),
            );
            return Ok(StepOutcome::skipped(format!("disabled: {}", reason)));
        }

        for precondition in &self.preconditions {
            if !precondition.is_met(ctx)? {
                let reason = precondition.describe(ctx);
                self.log_skip_hint(ctx, precondition)?;
                debug!("Step '{}' skipped: {}", self.id, reason);
                return Ok(StepOutcome::skipped(reason));
            }
        }

        for operation in &self.operations {
            debug!("Step '{}': {}", self.id, operation.describe());
            operation.apply(self, ctx)?;
        }

        info!("Step '{}' applied", self.id);
        Ok(StepOutcome::Applied)
    }

    fn log_skip_hint(
        &self,
        ctx: &MigrationContext,
        precondition: &Precondition,
    ) -> Result<(), StagewiseError> {
        if let Precondition::ComponentInstalled { name, .. } = precondition {
            for table in &self.hint_tables {
                if ctx.probe().table_exists(table)? {
                    debug!(
                        "Step '{}': component '{}' not installed or not properly migrated although '{}' exists; skipping",
                        self.id, name, table
                    );
                    break;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MemoryNotifier;
    use crate::config::Config;
    use crate::ops::SqlOp;
    use rusqlite::Connection;

    fn context() -> (MigrationContext, MemoryNotifier) {
        let sink = MemoryNotifier::new();
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE product_product (id INTEGER PRIMARY KEY, openupgrade_legacy_8_0_valuation TEXT);
             INSERT INTO product_product (openupgrade_legacy_8_0_valuation) VALUES ('real_time');
             CREATE TABLE ir_module_module (id INTEGER PRIMARY KEY, name TEXT, state TEXT, latest_version TEXT);
             INSERT INTO ir_module_module (name, state, latest_version) VALUES ('stock', 'installed', '8.0.1.0');
             CREATE TABLE marker (v INTEGER);",
        )
        .unwrap();
        let ctx = MigrationContext::new(conn, &Config::default(), Box::new(sink.clone()));
        (ctx, sink)
    }

    fn marker_count(ctx: &MigrationContext) -> i64 {
        ctx.conn()
            .query_row("SELECT COUNT(*) FROM marker", [], |row| row.get(0))
            .unwrap()
    }

    fn insert_marker() -> SqlOp {
        SqlOp::new("INSERT INTO marker (v) VALUES (1)")
    }

    #[test]
    fn test_state_strings_round_trip() {
        for state in [
            StepState::Running,
            StepState::Skipped,
            StepState::Done,
            StepState::Failed,
        ] {
            assert_eq!(StepState::from_string(state.as_str()), Some(state));
        }
        assert_eq!(StepState::from_string("DONE"), Some(StepState::Done));
        assert_eq!(StepState::from_string("bogus"), None);
        assert!(!StepState::Running.is_terminal());
        assert!(StepState::Failed.is_terminal());
        assert_eq!(Phase::from_string("Deferred"), Some(Phase::Deferred));
    }

    #[test]
    fn test_step_without_guards_applies() {
        let (mut ctx, _) = context();
        let step = Step::new("mark", "8.0").operation(insert_marker());
        assert_eq!(step.execute(&mut ctx).unwrap(), StepOutcome::Applied);
        assert_eq!(marker_count(&ctx), 1);
    }

    #[test]
    fn test_unmet_guard_skips_without_side_effects() {
        let (mut ctx, _) = context();
        let step = Step::new("mark", "8.0")
            .require(Precondition::LegacyColumnExists {
                table: "product_product".into(),
                field: "cost_method".into(),
            })
            .operation(insert_marker());

        let outcome = step.execute(&mut ctx).unwrap();
        assert_eq!(
            outcome,
            StepOutcome::skipped(
                "legacy column 'product_product.openupgrade_legacy_8_0_cost_method' does not exist"
            )
        );
        assert_eq!(outcome.state(), StepState::Skipped);
        assert_eq!(marker_count(&ctx), 0);
    }

    #[test]
    fn test_all_guards_must_hold() {
        let (mut ctx, _) = context();
        let step = Step::new("mark", "8.0")
            .require(Precondition::LegacyColumnExists {
                table: "product_product".into(),
                field: "valuation".into(),
            })
            .require(Precondition::ComponentInstalled {
                name: "stock".into(),
                min_version: "8.0.1.1".into(),
            })
            .hint_table("marker")
            .operation(insert_marker());

        assert!(matches!(step.execute(&mut ctx).unwrap(), StepOutcome::Skipped { .. }));
        assert_eq!(marker_count(&ctx), 0);

        ctx.conn()
            .execute("UPDATE ir_module_module SET latest_version = '8.0.1.1'", [])
            .unwrap();
        assert_eq!(step.execute(&mut ctx).unwrap(), StepOutcome::Applied);
        assert_eq!(marker_count(&ctx), 1);
    }

    #[test]
    fn test_row_exists_guard() {
        let (mut ctx, _) = context();
        let guard = Precondition::RowExists {
            table: "product_product".into(),
            conditions: vec![Condition::Eq {
                column: "openupgrade_legacy_8_0_valuation".into(),
                value: "real_time".into(),
            }],
        };
        assert!(guard.is_met(&ctx).unwrap());

        let missing_column = Precondition::RowExists {
            table: "product_product".into(),
            conditions: vec![Condition::IsNull { column: "nope".into() }],
        };
        assert!(!missing_column.is_met(&ctx).unwrap());

        let missing_table = Precondition::RowExists {
            table: "stock_move".into(),
            conditions: vec![],
        };
        assert!(!missing_table.is_met(&ctx).unwrap());

        let step = Step::new("mark", "8.0").require(guard).operation(insert_marker());
        assert_eq!(step.execute(&mut ctx).unwrap(), StepOutcome::Applied);
    }

    #[test]
    fn test_disabled_step_notifies_operator() {
        let (mut ctx, sink) = context();
        let step = Step::new("procurement_rules", "8.0")
            .deferred()
            .module("procurement")
            .disabled("rule assignment retired upstream")
            .operation(insert_marker());

        let outcome = step.execute(&mut ctx).unwrap();
        assert_eq!(
            outcome,
            StepOutcome::skipped("disabled: rule assignment retired upstream")
        );
        assert_eq!(marker_count(&ctx), 0);
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.notices()[0].module.as_deref(), Some("procurement"));
        assert!(sink.notices()[0].message.contains("Operator decision required"));
    }

    #[test]
    fn test_failing_operation_propagates() {
        let (mut ctx, _) = context();
        let step = Step::new("broken", "8.0")
            .operation(insert_marker())
            .operation(SqlOp::new("UPDATE no_such_table SET x = 1"));
        assert!(matches!(
            step.execute(&mut ctx),
            Err(StagewiseError::DatabaseError(_))
        ));
    }
}
