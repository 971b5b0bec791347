pub mod cli;
pub mod condition;
pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod ident;
pub mod ledger;
pub mod legacy;
pub mod loader;
pub mod logging;
pub mod notify;
pub mod ops;
pub mod plan;
pub mod probe;
pub mod runner;
pub mod step;
pub mod traverse;

pub use context::MigrationContext;
pub use error::StagewiseError;
pub use plan::Plan;
pub use runner::{RunReport, StageRunner};
pub use step::{Phase, Precondition, Step, StepOutcome, StepState};
