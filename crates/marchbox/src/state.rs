use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use renderer::{PersistedState, StateSink};

/// JSON file holding the last session's camera, custom uniforms and SDF.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    keep_source: bool,
}

impl StateStore {
    pub fn new(path: PathBuf, keep_source: bool) -> Self {
        Self { path, keep_source }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<PersistedState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read state file at {}", self.path.display()))?;
        let state: PersistedState = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse state file at {}", self.path.display()))?;
        Ok(Some(state))
    }

    pub fn persist(&self, state: &PersistedState) -> Result<()> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("state path has no parent: {}", self.path.display()))?;
        fs::create_dir_all(dir).with_context(|| {
            format!(
                "failed to prepare directory for state file at {}",
                dir.display()
            )
        })?;

        let mut record = state.clone();
        if !self.keep_source {
            record.sdf_source = None;
        }
        let serialized =
            serde_json::to_string_pretty(&record).context("failed to serialize state to JSON")?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("failed to write state file to {}", self.path.display()))?;
        Ok(())
    }
}

impl StateSink for StateStore {
    fn save(&mut self, state: &PersistedState) -> Result<()> {
        self.persist(state)?;
        tracing::debug!(path = %self.path.display(), "saved session state");
        Ok(())
    }
}
