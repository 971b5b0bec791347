use rusqlite::Error as RusqliteError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StagewiseError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] RusqliteError),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] Box<figment::Error>),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid SQL identifier: '{0}'")]
    InvalidIdentifier(String),

    /// The identifier is well formed but the live schema has no such table or column.
    #[error("Unknown identifier: {0}")]
    UnknownIdentifier(String),

    #[error("Invalid migration plan: {0}")]
    InvalidPlan(String),

    /// A step failed while running; the remaining steps of the batch were not executed.
    #[error("Step '{step}' failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: Box<StagewiseError>,
    },

    #[error("Error: {0}")]
    Error(String),
}

impl StagewiseError {
    pub fn step_failed(step: &str, source: StagewiseError) -> Self {
        StagewiseError::StepFailed {
            step: step.to_string(),
            source: Box::new(source),
        }
    }

    /// The step identifier for a `StepFailed` error, if any.
    pub fn failed_step(&self) -> Option<&str> {
        match self {
            StagewiseError::StepFailed { step, .. } => Some(step),
            _ => None,
        }
    }
}

impl From<figment::Error> for StagewiseError {
    fn from(err: figment::Error) -> Self {
        StagewiseError::ConfigError(Box::new(err))
    }
}
