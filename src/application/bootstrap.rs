use crate::application::planner::Planner;
use crate::infrastructure::config::{DaybookConfig, ensure_default_config, load_config};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::kv_store::SqliteKeyValueStore;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug)]
pub struct BootstrapResult {
    pub workspace_root: PathBuf,
    pub config: DaybookConfig,
    pub database_path: PathBuf,
}

/// Lays out `config/` and `state/` under `workspace_root`, writing a default
/// `daybook.json` on first run.
pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, InfraError> {
    let config_dir = workspace_root.join("config");
    let state_dir = workspace_root.join("state");

    fs::create_dir_all(&config_dir)?;
    fs::create_dir_all(&state_dir)?;

    ensure_default_config(&config_dir)?;
    let config = load_config(&config_dir)?;
    let database_path = config.storage_path(workspace_root);

    Ok(BootstrapResult {
        workspace_root: workspace_root.to_path_buf(),
        config,
        database_path,
    })
}

pub async fn bootstrap_planner(
    workspace_root: &Path,
) -> Result<Planner<SqliteKeyValueStore>, InfraError> {
    let bootstrap = bootstrap_workspace(workspace_root)?;
    let store = Arc::new(SqliteKeyValueStore::open(&bootstrap.database_path)?);
    tracing::info!(
        workspace_root = %bootstrap.workspace_root.display(),
        database_path = %bootstrap.database_path.display(),
        "workspace ready"
    );
    Planner::load(store, &bootstrap.config).await
}
