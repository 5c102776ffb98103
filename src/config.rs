use std::path::PathBuf;

use anyhow::Result;

pub const DB_ENV: &str = "BIZLEDGER_DB";
pub const LOG_ENV: &str = "BIZLEDGER_LOG";
pub const LOG_DIR_ENV: &str = "BIZLEDGER_LOG_DIR";
pub const MODE_ENV: &str = "BIZLEDGER_ENV";

pub const DEFAULT_LOG_FILTER: &str = "bizledger=info,sqlx=warn";
const APP_DIR: &str = "bizledger";
const DB_FILE: &str = "bizledger.sqlite3";

/// Runtime settings. Resolution order is CLI flags, then environment, then defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub db_path: PathBuf,
    pub log_filter: String,
    pub log_dir: Option<PathBuf>,
    /// Masks unexpected error messages in responses.
    pub production: bool,
}

pub fn default_db_path() -> Result<PathBuf> {
    let base = dirs::data_dir().unwrap_or(std::env::current_dir()?);
    Ok(base.join(APP_DIR).join(DB_FILE))
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] but reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let db_path = match non_empty(DB_ENV) {
            Some(path) => PathBuf::from(path),
            None => default_db_path()?,
        };
        let log_filter = non_empty(LOG_ENV).unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        let log_dir = non_empty(LOG_DIR_ENV).map(PathBuf::from);
        let production = non_empty(MODE_ENV)
            .map(|mode| mode.trim().eq_ignore_ascii_case("production"))
            .unwrap_or(false);

        Ok(Config {
            db_path,
            log_filter,
            log_dir,
            production,
        })
    }

    pub fn with_overrides(
        mut self,
        db_path: Option<PathBuf>,
        log_dir: Option<PathBuf>,
        production: bool,
    ) -> Self {
        if let Some(db_path) = db_path {
            self.db_path = db_path;
        }
        if let Some(log_dir) = log_dir {
            self.log_dir = Some(log_dir);
        }
        self.production |= production;
        self
    }
}
