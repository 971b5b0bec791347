use rusqlite::Connection;

use crate::config::{Config, RegistryConfig};
use crate::database::AsConnection;
use crate::legacy::LegacyNameResolver;
use crate::notify::{LogNotifier, Notice, Notifier};
use crate::probe::SchemaProbe;

/// Everything a migration run needs, passed explicitly to the runner and to
/// every step: the connection, the naming and registry settings, and the
/// operator notices raised so far.
pub struct MigrationContext {
    conn: Connection,
    registry: RegistryConfig,
    legacy: LegacyNameResolver,
    notifier: Box<dyn Notifier>,
    notices: Vec<Notice>,
}

impl MigrationContext {
    pub fn new(conn: Connection, config: &Config, notifier: Box<dyn Notifier>) -> Self {
        MigrationContext {
            conn,
            registry: config.registry.clone(),
            legacy: LegacyNameResolver::from_config(&config.legacy),
            notifier,
            notices: Vec::new(),
        }
    }

    /// Default settings, notices to the log.
    pub fn with_defaults(conn: Connection) -> Self {
        Self::new(conn, &Config::default(), Box::new(LogNotifier))
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn probe(&self) -> SchemaProbe<'_> {
        SchemaProbe::new(&self.conn, &self.registry)
    }

    pub fn legacy(&self) -> &LegacyNameResolver {
        &self.legacy
    }

    pub fn legacy_name(&self, original_field_name: &str) -> String {
        self.legacy.legacy_name(original_field_name)
    }

    /// Records a data-integrity notice and hands it to the sink.
    pub fn notice(&mut self, notice: Notice) {
        self.notifier.notify(&notice);
        self.notices.push(notice);
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }
}

impl AsConnection for MigrationContext {
    fn connection(&self) -> &Connection {
        &self.conn
    }
}
