use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::error::StagewiseError;

pub static CONFIG: OnceCell<Config> = OnceCell::new();

const ENV_PREFIX: &str = "STAGEWISE_";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub stagewise: String,
}

impl LoggingConfig {
    const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
    const STAGEWISE_LEVEL: &str = "info";

    fn ensure_valid(&mut self) {
        let str_original = self.stagewise.clone();
        self.stagewise = self.stagewise.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&self.stagewise.as_str()) {
            eprintln!(
                "Config error: stagewise log level of '{}' is invalid - using default of '{}'",
                str_original,
                Self::STAGEWISE_LEVEL
            );
            self.stagewise = Self::STAGEWISE_LEVEL.to_owned();
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            stagewise: Self::STAGEWISE_LEVEL.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: PathBuf::from("stagewise.db"),
            busy_timeout_ms: 5000,
        }
    }
}

/// Naming scheme for columns preserved across a release upgrade.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LegacyConfig {
    pub prefix: String,
    pub release: String,
}

impl Default for LegacyConfig {
    fn default() -> Self {
        LegacyConfig {
            prefix: "openupgrade_legacy".to_string(),
            release: "8.0".to_string(),
        }
    }
}

/// Location of the host application's installed-component registry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RegistryConfig {
    pub table: String,
    pub name_column: String,
    pub state_column: String,
    pub version_column: String,
    pub installed_state: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            table: "ir_module_module".to_string(),
            name_column: "name".to_string(),
            state_column: "state".to_string(),
            version_column: "latest_version".to_string(),
            installed_state: "installed".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub legacy: LegacyConfig,
    pub registry: RegistryConfig,
}

impl Config {
    /// Loads the configuration from `config.toml` in the app's data directory,
    /// or from `explicit_path` when one is given on the command line.
    ///
    /// An explicit file must exist and parse: migrating with settings other
    /// than the ones asked for is an error. A broken file in the data
    /// directory falls back to the defaults with a message on stderr. The
    /// default config is written to the data directory if no file exists there.
    pub fn load_config(
        project_dirs: Option<&ProjectDirs>,
        explicit_path: Option<&Path>,
    ) -> Result<Self, StagewiseError> {
        let mut config = match (explicit_path, project_dirs) {
            (Some(path), _) => {
                if !path.is_file() {
                    return Err(StagewiseError::Error(format!(
                        "Configuration file {} does not exist",
                        path.display()
                    )));
                }
                Self::figment(Some(path)).extract::<Config>()?
            }
            (None, dirs) => {
                let path = dirs.map(|dirs| dirs.data_local_dir().join("config.toml"));
                if let Some(path) = &path {
                    Self::write_default_if_missing(path);
                }
                Self::figment(path.as_deref())
                    .extract::<Config>()
                    .unwrap_or_else(|err| {
                        eprintln!(
                            "Could not load configuration: {}. Using default configuration.",
                            err
                        );
                        Config::default()
                    })
            }
        };

        config.ensure_valid();

        Ok(config)
    }

    /// Defaults, then the TOML file (if any), then `STAGEWISE_` environment variables.
    pub fn figment(config_path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// The config set at startup, or the defaults if none was set.
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(Config::default)
    }

    fn write_default_if_missing(config_path: &Path) {
        if config_path.exists() {
            return;
        }
        if let Some(parent) = config_path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                eprintln!(
                    "Failed to create configuration directory {}: {}",
                    parent.display(),
                    e
                );
            }
        }
        match toml::to_string_pretty(&Config::default()) {
            Ok(toml_string) => {
                if let Err(e) = fs::write(config_path, toml_string) {
                    eprintln!(
                        "Failed to write default config to {}: {}",
                        config_path.display(),
                        e
                    );
                }
            }
            Err(_) => eprintln!("Failed to serialize default config."),
        }
    }

    fn ensure_valid(&mut self) {
        self.logging.ensure_valid();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_without_file() {
        Jail::expect_with(|_jail| {
            let config = Config::load_config(None, None).unwrap();
            assert_eq!(config, Config::default());
            assert_eq!(config.registry.table, "ir_module_module");
            assert_eq!(config.legacy.release, "8.0");
            Ok(())
        });
    }

    #[test]
    fn test_file_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "stagewise.toml",
                r#"
                [legacy]
                prefix = "legacy"
                release = "9.0"

                [database]
                path = "erp.db"
                "#,
            )?;
            let config = Config::load_config(None, Some(Path::new("stagewise.toml"))).unwrap();
            assert_eq!(config.legacy.prefix, "legacy");
            assert_eq!(config.legacy.release, "9.0");
            assert_eq!(config.database.path, PathBuf::from("erp.db"));
            assert_eq!(config.database.busy_timeout_ms, 5000);
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("stagewise.toml", "[logging]\nstagewise = \"warn\"\n")?;
            jail.set_env("STAGEWISE_LOGGING__STAGEWISE", "debug");
            jail.set_env("STAGEWISE_REGISTRY__INSTALLED_STATE", "active");
            let config = Config::load_config(None, Some(Path::new("stagewise.toml"))).unwrap();
            assert_eq!(config.logging.stagewise, "debug");
            assert_eq!(config.registry.installed_state, "active");
            Ok(())
        });
    }

    #[test]
    fn test_invalid_log_level_falls_back() {
        Jail::expect_with(|jail| {
            jail.create_file("stagewise.toml", "[logging]\nstagewise = \" LOUD \"\n")?;
            let config = Config::load_config(None, Some(Path::new("stagewise.toml"))).unwrap();
            assert_eq!(config.logging.stagewise, "info");
            Ok(())
        });
    }

    #[test]
    fn test_log_level_is_normalized() {
        let mut logging = LoggingConfig {
            stagewise: " TRACE ".to_string(),
        };
        logging.ensure_valid();
        assert_eq!(logging.stagewise, "trace");
    }

    #[test]
    fn test_default_written_to_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        Config::write_default_if_missing(&path);
        let written = fs::read_to_string(&path).unwrap();
        let parsed: Config = toml::from_str(&written).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_malformed_explicit_file_is_error() {
        Jail::expect_with(|jail| {
            jail.create_file("stagewise.toml", "[database]\nbusy_timeout_ms = \"soon\"\n")?;
            let result = Config::load_config(None, Some(Path::new("stagewise.toml")));
            assert!(matches!(result, Err(StagewiseError::ConfigError(_))));

            jail.create_file("broken.toml", "[legacy\nprefix = ")?;
            let result = Config::load_config(None, Some(Path::new("broken.toml")));
            assert!(matches!(result, Err(StagewiseError::ConfigError(_))));
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        Jail::expect_with(|_jail| {
            let result = Config::load_config(None, Some(Path::new("absent.toml")));
            assert!(matches!(result, Err(StagewiseError::Error(_))));
            Ok(())
        });
    }
}
