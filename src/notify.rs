use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use log::warn;
use serde::Serialize;

/// An operator-facing warning raised while migrating. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub step: String,
    pub module: Option<String>,
    pub table: Option<String>,
    pub column: Option<String>,
    pub message: String,
}

impl Notice {
    pub fn new(step: &str, message: impl Into<String>) -> Self {
        Notice {
            step: step.to_string(),
            module: None,
            table: None,
            column: None,
            message: message.into(),
        }
    }

    pub fn module(mut self, module: Option<&str>) -> Self {
        self.module = module.map(str::to_string);
        self
    }

    pub fn table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    pub fn column(mut self, column: Option<&str>) -> Self {
        self.column = column.map(str::to_string);
        self
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}", self.step)?;
        if let Some(module) = &self.module {
            write!(f, " {}", module)?;
        }
        match (&self.table, &self.column) {
            (Some(table), Some(column)) => write!(f, " {}.{}", table, column)?,
            (Some(table), None) => write!(f, " {}", table)?,
            _ => {}
        }
        write!(f, "] {}", self.message)
    }
}

/// Where operator warnings go. Fire-and-forget: a sink cannot fail a run.
pub trait Notifier {
    fn notify(&self, notice: &Notice);
}

/// Writes notices to the log at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: &Notice) {
        warn!("{}", notice);
    }
}

/// Keeps every notice in memory. Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct MemoryNotifier {
    notices: Rc<RefCell<Vec<Notice>>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.notices.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.notices.borrow().is_empty()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, notice: &Notice) {
        self.notices.borrow_mut().push(notice.clone());
    }
}
