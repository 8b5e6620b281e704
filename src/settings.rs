use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{LedgrError, Result};
use crate::normalize::{AliasTable, ColumnRole};
use crate::source::SourceFilter;

pub const DB_FILE: &str = "ledgr.db";
pub const PASSWORD_ENV: &str = "LEDGR_STATEMENT_PASSWORD";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub data_dir: String,
    /// Directory of exported mail (.eml) and PDF statements used when `sync` gets no path.
    #[serde(default)]
    pub statements_dir: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default = "default_subject")]
    pub subject: Option<String>,
    /// Header text -> role, merged over the built-in alias table.
    #[serde(default)]
    pub extra_aliases: BTreeMap<String, ColumnRole>,
}

fn default_subject() -> Option<String> {
    Some("Statement".to_string())
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
            statements_dir: None,
            sender: None,
            subject: default_subject(),
            extra_aliases: BTreeMap::new(),
        }
    }
}

impl Settings {
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(DB_FILE)
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("ledgr")
}

fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
        .join("ledgr")
}

pub fn load_settings() -> Settings {
    load_settings_from(&settings_path())
}

fn load_settings_from(path: &Path) -> Settings {
    if !path.exists() {
        return Settings::default();
    }
    let content = std::fs::read_to_string(path).unwrap_or_default();
    match serde_json::from_str(&content) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable settings file");
            Settings::default()
        }
    }
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| LedgrError::Settings(e.to_string()))?;
    std::fs::write(settings_path(), format!("{json}\n"))?;
    Ok(())
}

pub fn shellexpand_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .to_string_lossy()
        .to_string()
}

/// Everything one `sync` needs, resolved from settings and command-line flags.
pub struct SyncConfig {
    pub statements_dir: PathBuf,
    pub filter: SourceFilter,
    pub aliases: AliasTable,
    pub password: Zeroizing<String>,
}

/// Flags given to `sync`; each one overrides the matching setting.
#[derive(Debug, Default)]
pub struct SyncOverrides {
    pub dir: Option<String>,
    pub sender: Option<String>,
    pub subject: Option<String>,
    pub since: Option<chrono::NaiveDate>,
    pub last: Option<usize>,
}

impl SyncConfig {
    pub fn resolve(
        settings: &Settings,
        overrides: SyncOverrides,
        password: Zeroizing<String>,
    ) -> Result<Self> {
        let dir = overrides
            .dir
            .or_else(|| settings.statements_dir.clone())
            .ok_or_else(|| {
                LedgrError::Settings(
                    "no statements directory: pass one to `ledgr sync` or set statements_dir in settings.json"
                        .to_string(),
                )
            })?;
        Ok(Self {
            statements_dir: PathBuf::from(shellexpand_path(&dir)),
            filter: SourceFilter {
                sender: overrides.sender.or_else(|| settings.sender.clone()),
                subject: overrides.subject.or_else(|| settings.subject.clone()),
                since: overrides.since,
                last: overrides.last,
            },
            aliases: AliasTable::with_extra(&settings.extra_aliases),
            password,
        })
    }
}

/// The statement password from the environment, else an interactive prompt.
pub fn statement_password() -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var(PASSWORD_ENV) {
        return Ok(Zeroizing::new(pw));
    }
    let pw = rpassword::prompt_password("Statement password: ")?;
    Ok(Zeroizing::new(pw))
}
