use log::{error, info, warn, Level};
use logging_timer::timer;
use serde::Serialize;

use crate::context::MigrationContext;
use crate::database::Database;
use crate::error::StagewiseError;
use crate::ledger::Ledger;
use crate::loader::{DataLoader, NoData};
use crate::notify::Notice;
use crate::plan::Plan;
use crate::step::{Phase, Step, StepOutcome, StepState};

/// How one step ended in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub id: String,
    pub phase: Phase,
    pub state: StepState,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub steps: Vec<StepReport>,
    pub notices: Vec<Notice>,
    pub records_loaded: usize,
}

impl RunReport {
    pub fn count(&self, state: StepState) -> usize {
        self.steps.iter().filter(|s| s.state == state).count()
    }

    pub fn state_of(&self, id: &str) -> Option<StepState> {
        self.steps.iter().find(|s| s.id == id).map(|s| s.state)
    }
}

/// Executes migration steps in order, one transaction per step.
///
/// The runner never evaluates a step's guards; it only orders, wraps,
/// records and stops. A failing step rolls back its own transaction and
/// aborts the rest of the batch. Rerunning the whole plan afterwards is safe
/// because every step guards itself.
pub struct StageRunner {
    loader: Box<dyn DataLoader>,
}

impl Default for StageRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl StageRunner {
    pub fn new() -> Self {
        StageRunner {
            loader: Box::new(NoData),
        }
    }

    pub fn with_loader(loader: Box<dyn DataLoader>) -> Self {
        StageRunner { loader }
    }

    /// Ordinary steps in order, then the reference data, then the deferred pass.
    pub fn run(&self, plan: &Plan, ctx: &mut MigrationContext) -> Result<RunReport, StagewiseError> {
        Ledger::ensure(ctx.conn())?;
        let mut report = RunReport::default();

        let ordinary = plan.phase(Phase::Ordinary);
        info!("Running {} ordinary step(s)", ordinary.len());
        self.run_steps(&ordinary, ctx, &mut report)?;

        report.records_loaded = self.load_data(ctx)?;

        let deferred = plan.phase(Phase::Deferred);
        info!("Running {} deferred step(s)", deferred.len());
        self.run_steps(&deferred, ctx, &mut report)?;

        report.notices = ctx.take_notices();
        self.log_summary(&report);
        Ok(report)
    }

    /// Only the deferred pass. Safe to call any number of times.
    pub fn run_deferred(&self, plan: &Plan, ctx: &mut MigrationContext) -> Result<RunReport, StagewiseError> {
        Ledger::ensure(ctx.conn())?;
        let mut report = RunReport::default();

        let deferred = plan.phase(Phase::Deferred);
        info!("Running {} deferred step(s)", deferred.len());
        self.run_steps(&deferred, ctx, &mut report)?;

        report.notices = ctx.take_notices();
        self.log_summary(&report);
        Ok(report)
    }

    /// Runs `steps` strictly in order, stopping at the first failure.
    pub fn run_steps(
        &self,
        steps: &[&Step],
        ctx: &mut MigrationContext,
        report: &mut RunReport,
    ) -> Result<(), StagewiseError> {
        for step in steps {
            let step_report = self.run_step(step, ctx)?;
            report.steps.push(step_report);
        }
        Ok(())
    }

    fn run_step(&self, step: &Step, ctx: &mut MigrationContext) -> Result<StepReport, StagewiseError> {
        let _tmr = timer!(Level::Debug; "StageRunner::run_step", "{}", step.id);

        if !step.idempotent && Ledger::state_of(ctx.conn(), &step.id)? == Some(StepState::Done) {
            info!("Step '{}' already applied, not repeating it", step.id);
            return Ok(StepReport {
                id: step.id.clone(),
                phase: step.phase,
                state: StepState::Skipped,
                detail: Some("already applied".to_string()),
            });
        }

        info!("Step '{}' ({}, target {}) running", step.id, step.phase, step.target_version);
        Ledger::record(ctx.conn(), step, StepState::Running, None)?;

        let result = Database::immediate_transaction(ctx, |ctx| {
            let outcome = step.execute(ctx)?;
            let detail = match &outcome {
                StepOutcome::Applied => None,
                StepOutcome::Skipped { reason } => Some(reason.as_str()),
            };
            Ledger::record(ctx.conn(), step, outcome.state(), detail)?;
            Ok(outcome)
        });

        match result {
            Ok(outcome) => {
                let detail = match outcome {
                    StepOutcome::Applied => None,
                    StepOutcome::Skipped { reason } => {
                        info!("Step '{}' skipped: {}", step.id, reason);
                        Some(reason)
                    }
                };
                Ok(StepReport {
                    id: step.id.clone(),
                    phase: step.phase,
                    state: if detail.is_some() {
                        StepState::Skipped
                    } else {
                        StepState::Done
                    },
                    detail,
                })
            }
            Err(err) => {
                error!("Step '{}' failed: {}", step.id, err);
                let message = err.to_string();
                if let Err(ledger_err) =
                    Ledger::record(ctx.conn(), step, StepState::Failed, Some(&message))
                {
                    warn!("Could not record failure of step '{}': {}", step.id, ledger_err);
                }
                Err(StagewiseError::step_failed(&step.id, err))
            }
        }
    }

    fn load_data(&self, ctx: &mut MigrationContext) -> Result<usize, StagewiseError> {
        let _tmr = timer!(Level::Debug; "StageRunner::load_data");
        info!("Loading {}", self.loader.describe());
        Database::immediate_transaction(ctx, |ctx| self.loader.load(ctx))
    }

    fn log_summary(&self, report: &RunReport) {
        info!(
            "Run finished: {} done, {} skipped, {} notice(s), {} reference record(s) loaded",
            report.count(StepState::Done),
            report.count(StepState::Skipped),
            report.notices.len(),
            report.records_loaded
        );
    }
}
