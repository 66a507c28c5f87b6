//! Resolves marchbox's config and data directories, honouring environment
//! overrides so tests and portable setups can relocate them.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use directories_next::ProjectDirs;

pub const ENV_CONFIG_DIR: &str = "MARCHBOX_CONFIG_DIR";
pub const ENV_DATA_DIR: &str = "MARCHBOX_DATA_DIR";

const QUALIFIER: &str = "org";
const ORGANISATION: &str = "marchbox";
const APPLICATION: &str = "marchbox";

#[derive(Debug, Clone)]
pub struct AppPaths {
    config_dir: PathBuf,
    data_dir: PathBuf,
}

impl AppPaths {
    pub fn discover() -> Result<Self> {
        let project_dirs = ProjectDirs::from(QUALIFIER, ORGANISATION, APPLICATION)
            .ok_or_else(|| anyhow!("failed to determine user directories"))?;

        let config_dir = resolve_directory(ENV_CONFIG_DIR, project_dirs.config_dir(), "config")?;
        let data_dir = resolve_directory(ENV_DATA_DIR, project_dirs.data_dir(), "data")?;

        Ok(Self {
            config_dir,
            data_dir,
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("marchbox.toml")
    }

    pub fn state_file(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    pub fn screenshot_dir(&self) -> PathBuf {
        self.data_dir.join("screenshots")
    }
}

fn resolve_directory(env_name: &str, default: &Path, label: &str) -> Result<PathBuf> {
    let dir = env_override(env_name).unwrap_or_else(|| default.to_path_buf());
    if !dir.exists() {
        fs::create_dir_all(&dir).with_context(|| {
            format!("failed to create marchbox {label} directory at {}", dir.display())
        })?;
    }
    Ok(dir)
}

fn env_override(name: &str) -> Option<PathBuf> {
    match env::var_os(name) {
        Some(value) if !value.is_empty() => Some(PathBuf::from(value)),
        _ => None,
    }
}
