//! Parameterised operations that steps are built from.
//!
//! Each operation resolves every table and column name through the schema
//! probe before interpolating it, binds every value, and is safe to apply
//! repeatedly against the same database.

mod fill;
mod prune;
mod propagate;
mod relocate;
mod report;
mod sql;

use std::fmt;

use serde::Deserialize;

use crate::context::MigrationContext;
use crate::error::StagewiseError;
use crate::step::Step;

pub use fill::{FillNull, MapValues};
pub use propagate::{JoinPair, PropagateColumn};
pub use prune::PruneTree;
pub use relocate::RelocateLegacyColumn;
pub use report::{ReportOrphans, WarnCount};
pub use sql::SqlOp;

/// Behaviour shared by every operation.
pub trait Operate {
    /// Applies the operation inside the step's transaction.
    fn apply(&self, step: &Step, ctx: &mut MigrationContext) -> Result<(), StagewiseError>;

    /// Short human-readable summary for the log.
    fn describe(&self) -> String;
}

/// Function type for steps written in Rust rather than declared in a plan.
pub type CustomFn = fn(&mut MigrationContext, &Step) -> Result<(), StagewiseError>;

#[derive(Clone, Copy)]
pub struct CustomOp {
    pub name: &'static str,
    pub run: CustomFn,
}

impl CustomOp {
    pub const fn new(name: &'static str, run: CustomFn) -> Self {
        CustomOp { name, run }
    }
}

impl fmt::Debug for CustomOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomOp").field("name", &self.name).finish()
    }
}

impl Operate for CustomOp {
    fn apply(&self, step: &Step, ctx: &mut MigrationContext) -> Result<(), StagewiseError> {
        (self.run)(ctx, step)
    }

    fn describe(&self) -> String {
        format!("custom: {}", self.name)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    Sql(SqlOp),
    MapValues(MapValues),
    FillNull(FillNull),
    WarnCount(WarnCount),
    ReportOrphans(ReportOrphans),
    RelocateLegacyColumn(RelocateLegacyColumn),
    PropagateColumn(PropagateColumn),
    PruneTree(PruneTree),
    #[serde(skip)]
    Custom(CustomOp),
}

impl Operation {
    fn inner(&self) -> &dyn Operate {
        match self {
            Operation::Sql(op) => op,
            Operation::MapValues(op) => op,
            Operation::FillNull(op) => op,
            Operation::WarnCount(op) => op,
            Operation::ReportOrphans(op) => op,
            Operation::RelocateLegacyColumn(op) => op,
            Operation::PropagateColumn(op) => op,
            Operation::PruneTree(op) => op,
            Operation::Custom(op) => op,
        }
    }

    pub fn apply(&self, step: &Step, ctx: &mut MigrationContext) -> Result<(), StagewiseError> {
        self.inner().apply(step, ctx)
    }

    pub fn describe(&self) -> String {
        self.inner().describe()
    }
}

macro_rules! operation_from {
    ($($ty:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Operation {
                fn from(op: $ty) -> Self {
                    Operation::$variant(op)
                }
            }
        )*
    };
}

operation_from! {
    SqlOp => Sql,
    MapValues => MapValues,
    FillNull => FillNull,
    WarnCount => WarnCount,
    ReportOrphans => ReportOrphans,
    RelocateLegacyColumn => RelocateLegacyColumn,
    PropagateColumn => PropagateColumn,
    PruneTree => PruneTree,
    CustomOp => Custom,
}
