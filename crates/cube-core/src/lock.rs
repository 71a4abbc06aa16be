//! Deploy state: which checkouts cube created and at which revision.
//!
//! Stored as `.cube/lock.json` in the program root. Only checkouts recorded here
//! are ever removed by a later deploy.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::CUBE_DIR;

const LOCK_FILE: &str = "lock.json";
const CURRENT_VERSION: &str = "1";

/// How a locked component entered the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockSource {
    Lib,
    Index,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    pub name: String,
    /// Checkout path relative to the program root, `/`-separated.
    pub path: String,
    pub url: String,
    pub rev: String,
    pub scm: String,
    pub source: LockSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lockfile {
    pub version: String,
    pub updated_at: DateTime<Utc>,
    pub components: Vec<LockEntry>,
}

impl Default for Lockfile {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION.to_string(),
            updated_at: Utc::now(),
            components: Vec::new(),
        }
    }
}

/// Path of the lock file for a program root.
pub fn lock_file(program_root: &Path) -> PathBuf {
    program_root.join(CUBE_DIR).join(LOCK_FILE)
}

/// Render a path relative to the program root in lock form.
pub fn relative_key(program_root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(program_root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

impl Lockfile {
    /// Load the lock file. A program that was never deployed has an empty lock.
    pub fn load(program_root: &Path) -> Result<Self> {
        let path = lock_file(program_root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let json = fs::read_to_string(&path)
            .with_context(|| format!("failed to read lock from {}", path.display()))?;
        let lock: Self = serde_json::from_str(&json)
            .with_context(|| format!("failed to deserialize lock {}", path.display()))?;
        if lock.version != CURRENT_VERSION {
            anyhow::bail!(
                "lock version mismatch: expected {}, found {}",
                CURRENT_VERSION,
                lock.version
            );
        }
        Ok(lock)
    }

    /// Save the lock, sorting entries by path and stamping `updated_at`.
    pub fn save(&mut self, program_root: &Path) -> Result<()> {
        let dir = program_root.join(CUBE_DIR);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        self.components.sort_by(|a, b| a.path.cmp(&b.path));
        self.updated_at = Utc::now();

        let path = lock_file(program_root);
        let json = serde_json::to_string_pretty(self).context("failed to serialize lock")?;
        fs::write(&path, json).with_context(|| format!("failed to write lock {}", path.display()))
    }

    pub fn find(&self, name: &str) -> Option<&LockEntry> {
        self.components.iter().find(|e| e.name == name)
    }

    pub fn find_path(&self, rel_path: &str) -> Option<&LockEntry> {
        self.components.iter().find(|e| e.path == rel_path)
    }

    /// Absolute checkout path of an entry.
    pub fn entry_path(program_root: &Path, entry: &LockEntry) -> PathBuf {
        entry
            .path
            .split('/')
            .fold(program_root.to_path_buf(), |acc, part| acc.join(part))
    }
}
