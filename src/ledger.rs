use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::error::StagewiseError;
use crate::step::{Phase, Step, StepState};

const CREATE_LEDGER_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS stagewise_ledger (
    step_id TEXT PRIMARY KEY,
    phase TEXT NOT NULL,
    target_version TEXT NOT NULL,
    state TEXT NOT NULL,
    runs INTEGER NOT NULL DEFAULT 0,
    last_run INTEGER NOT NULL,
    applied_at INTEGER,
    detail TEXT
);
"#;

/// One row of the ledger: the latest known state of a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub step_id: String,
    pub phase: Phase,
    pub target_version: String,
    pub state: StepState,
    pub runs: i64,
    pub last_run: i64,
    /// When the step last applied its operations, if it ever did.
    pub applied_at: Option<i64>,
    pub detail: Option<String>,
}

/// Persistent record of which steps ran and how they ended.
///
/// The ledger is bookkeeping: a step's own guards decide whether it does any
/// work. The one exception is a step declared non-idempotent, which is not
/// invoked again once the ledger shows it done.
///
/// A step is marked `running` before its transaction opens, so an
/// interrupted run leaves that state behind. Once a step has applied, a later
/// invocation that only skips keeps it `done`; a step without a row has not
/// run yet. `runs` counts finished invocations.
pub struct Ledger;

impl Ledger {
    pub fn ensure(conn: &Connection) -> Result<(), StagewiseError> {
        conn.execute_batch(CREATE_LEDGER_SQL)?;
        Ok(())
    }

    pub fn record(
        conn: &Connection,
        step: &Step,
        state: StepState,
        detail: Option<&str>,
    ) -> Result<(), StagewiseError> {
        conn.execute(
            "INSERT INTO stagewise_ledger (step_id, phase, target_version, state, runs, last_run, applied_at, detail)
             VALUES (?1, ?2, ?3, ?4, ?7, ?5, CASE WHEN ?4 = 'done' THEN ?5 END, ?6)
             ON CONFLICT(step_id) DO UPDATE SET
                phase = excluded.phase,
                target_version = excluded.target_version,
                state = CASE
                    WHEN excluded.state = 'skipped' AND applied_at IS NOT NULL THEN 'done'
                    ELSE excluded.state
                END,
                runs = runs + ?7,
                last_run = excluded.last_run,
                applied_at = CASE
                    WHEN excluded.state = 'done' THEN excluded.last_run
                    ELSE applied_at
                END,
                detail = CASE
                    WHEN excluded.state = 'skipped' AND applied_at IS NOT NULL THEN detail
                    ELSE excluded.detail
                END",
            params![
                step.id,
                step.phase.as_str(),
                step.target_version,
                state.as_str(),
                Utc::now().timestamp(),
                detail,
                i64::from(state.is_terminal()),
            ],
        )?;
        Ok(())
    }

    pub fn state_of(conn: &Connection, step_id: &str) -> Result<Option<StepState>, StagewiseError> {
        let state: Option<String> = conn
            .query_row(
                "SELECT state FROM stagewise_ledger WHERE step_id = ?",
                [step_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(state.as_deref().and_then(StepState::from_string))
    }

    pub fn entries(conn: &Connection) -> Result<Vec<LedgerEntry>, StagewiseError> {
        let mut stmt = conn.prepare(
            "SELECT step_id, phase, target_version, state, runs, last_run, applied_at, detail
             FROM stagewise_ledger
             ORDER BY last_run, step_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, Option<i64>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(step_id, phase, target_version, state, runs, last_run, applied_at, detail)| {
                let phase = Phase::from_string(&phase).ok_or_else(|| {
                    StagewiseError::Error(format!("Invalid phase '{}' in ledger", phase))
                })?;
                let state = StepState::from_string(&state).ok_or_else(|| {
                    StagewiseError::Error(format!("Invalid state '{}' in ledger", state))
                })?;
                Ok(LedgerEntry {
                    step_id,
                    phase,
                    target_version,
                    state,
                    runs,
                    last_run,
                    applied_at,
                    detail,
                })
            })
            .collect()
    }
}
