use crate::domain::free_slot::{WorkingWindow, WorkingWindowSpec};
use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const DAYBOOK_JSON: &str = "daybook.json";
const SUPPORTED_SCHEMA: u64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncWindow {
    pub months_back: u32,
    pub months_forward: u32,
}

impl Default for SyncWindow {
    fn default() -> Self {
        Self {
            months_back: 1,
            months_forward: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Relative paths resolve against the workspace root.
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "state/daybook.sqlite".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DaybookConfig {
    pub schema: u8,
    pub timezone: String,
    #[serde(default)]
    pub working_window: WorkingWindowSpec,
    #[serde(default)]
    pub sync_window: SyncWindow,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for DaybookConfig {
    fn default() -> Self {
        Self {
            schema: SUPPORTED_SCHEMA as u8,
            timezone: "UTC".to_string(),
            working_window: WorkingWindowSpec::default(),
            sync_window: SyncWindow::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl DaybookConfig {
    pub fn validate(&self) -> Result<(), InfraError> {
        self.time_zone()?;
        self.working_window()?;
        if self.storage.path.trim().is_empty() {
            return Err(InfraError::InvalidConfig(
                "storage.path must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn time_zone(&self) -> Result<Tz, InfraError> {
        self.timezone.trim().parse::<Tz>().map_err(|error| {
            InfraError::InvalidConfig(format!("unknown timezone '{}': {error}", self.timezone))
        })
    }

    pub fn working_window(&self) -> Result<WorkingWindow, InfraError> {
        self.working_window
            .validate()
            .and_then(|_| self.working_window.resolve())
            .map_err(InfraError::InvalidConfig)
    }

    pub fn storage_path(&self, workspace_root: &Path) -> PathBuf {
        let configured = PathBuf::from(self.storage.path.trim());
        if configured.is_absolute() {
            configured
        } else {
            workspace_root.join(configured)
        }
    }
}

pub fn ensure_default_config(config_dir: &Path) -> Result<(), InfraError> {
    fs::create_dir_all(config_dir)?;
    let path = config_dir.join(DAYBOOK_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&DaybookConfig::default())?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

pub fn load_config(config_dir: &Path) -> Result<DaybookConfig, InfraError> {
    let path = config_dir.join(DAYBOOK_JSON);
    let raw = fs::read_to_string(&path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SUPPORTED_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }

    let config: DaybookConfig = serde_json::from_value(parsed)?;
    config.validate()?;
    tracing::debug!(path = %path.display(), timezone = %config.timezone, "loaded config");
    Ok(config)
}
