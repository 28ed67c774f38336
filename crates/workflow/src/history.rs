//! Recently used API configurations

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const MAX_ENTRIES: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// File name, used to pick the entry again
    pub name: String,
    pub path: PathBuf,
    pub last_used: DateTime<Utc>,
}

/// History of loaded configuration files, most recent first
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigHistory {
    entries: Vec<HistoryEntry>,
    #[serde(skip)]
    file: PathBuf,
}

impl ConfigHistory {
    /// `history.json` under the platform's local data directory
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_local_dir().map(|dir| dir.join("hub-batch").join("history.json"))
    }

    /// Load from a file; a missing file is an empty history
    pub fn load(file: &Path) -> Result<Self> {
        if !file.exists() {
            return Ok(Self {
                entries: Vec::new(),
                file: file.to_path_buf(),
            });
        }
        let text = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read history {}", file.display()))?;
        let mut history: Self = serde_json::from_str(&text)
            .with_context(|| format!("Invalid history file {}", file.display()))?;
        history.file = file.to_path_buf();
        Ok(history)
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.file.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&self.file, json)
            .with_context(|| format!("Failed to write history {}", self.file.display()))?;
        Ok(())
    }

    /// Move a configuration file to the front of the history
    pub fn record(&mut self, path: &Path) {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        self.entries.retain(|e| e.name != name);
        self.entries.insert(
            0,
            HistoryEntry {
                name,
                path,
                last_used: Utc::now(),
            },
        );
        self.entries.truncate(MAX_ENTRIES);
    }

    pub fn lookup(&self, name: &str) -> Option<&HistoryEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }
}
