//! Key/value settings for programs and the user.
//!
//! Lookup order: `CUBE_<KEY>` environment variable → `<program>/.cube/config.toml`
//! → `$CUBE_HOME/config.toml` (default `~/.cube/config.toml`) → built-in defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::CUBE_DIR;

const CONFIG_FILE: &str = "config.toml";

pub const KEY_SCM: &str = "scm";
pub const KEY_COMPONENTS_DIR: &str = "components_dir";
pub const KEY_INDEX: &str = "index";
pub const KEY_MAKE: &str = "make";
pub const KEY_JOBS: &str = "jobs";

/// Which config file a setting is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Program,
    Global,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Program => write!(f, "program"),
            Scope::Global => write!(f, "global"),
        }
    }
}

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Env,
    Program,
    Global,
    Default,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Origin::Env => "env",
            Origin::Program => "program",
            Origin::Global => "global",
            Origin::Default => "default",
        };
        f.write_str(s)
    }
}

/// On-disk layout of a config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub settings: BTreeMap<String, String>,
}

impl ConfigFile {
    /// Read a config file. A missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Write the config file, creating its parent directory if needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("failed to write config {}", path.display()))
    }
}

/// Path of the program-scope config file.
pub fn program_config_path(program_root: &Path) -> PathBuf {
    program_root.join(CUBE_DIR).join(CONFIG_FILE)
}

/// Directory holding the global config: `$CUBE_HOME`, else `~/.cube`.
pub fn global_dir() -> Option<PathBuf> {
    if let Ok(home) = std::env::var("CUBE_HOME")
        && !home.is_empty()
    {
        return Some(PathBuf::from(home));
    }
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(|home| PathBuf::from(home).join(CUBE_DIR))
}

/// Path of the global config file, if a home directory is known.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|dir| dir.join(CONFIG_FILE))
}

/// Environment variable that overrides `key`.
pub fn env_key(key: &str) -> String {
    let mut var = String::from("CUBE_");
    for c in key.chars() {
        match c {
            '-' | '.' => var.push('_'),
            c => var.push(c.to_ascii_uppercase()),
        }
    }
    var
}

fn default_make() -> &'static str {
    if cfg!(windows) { "mingw32-make" } else { "make" }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

/// Built-in value for a known key.
pub fn default_value(key: &str) -> Option<String> {
    match key {
        KEY_SCM => Some("git".to_string()),
        KEY_COMPONENTS_DIR => Some("components".to_string()),
        KEY_MAKE => Some(default_make().to_string()),
        KEY_JOBS => Some(default_jobs().to_string()),
        _ => None,
    }
}

/// Check a key and, for known keys, its value.
pub fn validate(key: &str, value: &str) -> Result<()> {
    if key.is_empty()
        || !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        anyhow::bail!("invalid config key '{}'", key);
    }
    match key {
        KEY_SCM => {
            if value != "git" && value != "hg" {
                anyhow::bail!("scm must be 'git' or 'hg', got '{}'", value);
            }
        }
        KEY_JOBS => {
            let jobs: usize = value
                .parse()
                .map_err(|_| anyhow::anyhow!("jobs must be a positive integer, got '{}'", value))?;
            if jobs == 0 {
                anyhow::bail!("jobs must be a positive integer, got '{}'", value);
            }
        }
        KEY_COMPONENTS_DIR => {
            let path = Path::new(value);
            let escapes = path
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));
            if value.is_empty() || escapes {
                anyhow::bail!(
                    "components_dir must be a relative path inside the program, got '{}'",
                    value
                );
            }
        }
        _ => {}
    }
    Ok(())
}

/// Resolved settings for one invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    program_path: Option<PathBuf>,
    program: ConfigFile,
    global_path: Option<PathBuf>,
    global: ConfigFile,
}

impl Settings {
    /// Load program (if any) and global settings.
    pub fn load(program_root: Option<&Path>) -> Result<Self> {
        Self::load_with_global(program_root, global_config_path())
    }

    /// Load settings with an explicit global config location.
    pub fn load_with_global(
        program_root: Option<&Path>,
        global_path: Option<PathBuf>,
    ) -> Result<Self> {
        let program_path = program_root.map(program_config_path);
        let program = match &program_path {
            Some(p) => ConfigFile::load(p)?,
            None => ConfigFile::default(),
        };
        let global = match &global_path {
            Some(p) => ConfigFile::load(p)?,
            None => ConfigFile::default(),
        };
        Ok(Self {
            program_path,
            program,
            global_path,
            global,
        })
    }

    /// Resolve a key, reporting where the value came from.
    pub fn lookup(&self, key: &str) -> Option<(String, Origin)> {
        if let Ok(v) = std::env::var(env_key(key)) {
            return Some((v, Origin::Env));
        }
        if let Some(v) = self.program.settings.get(key) {
            return Some((v.clone(), Origin::Program));
        }
        if let Some(v) = self.global.settings.get(key) {
            return Some((v.clone(), Origin::Global));
        }
        default_value(key).map(|v| (v, Origin::Default))
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.lookup(key).map(|(v, _)| v)
    }

    /// Store a value in the given scope and persist it.
    pub fn set(&mut self, scope: Scope, key: &str, value: &str) -> Result<()> {
        validate(key, value)?;
        let (file, path) = self.scope_mut(scope)?;
        file.settings.insert(key.to_string(), value.to_string());
        file.save(&path)
    }

    /// Remove a value from the given scope. Returns false if it was not set.
    pub fn unset(&mut self, scope: Scope, key: &str) -> Result<bool> {
        let (file, path) = self.scope_mut(scope)?;
        if file.settings.remove(key).is_none() {
            return Ok(false);
        }
        file.save(&path)?;
        Ok(true)
    }

    /// Every key visible from this invocation with its effective value.
    pub fn list(&self) -> Vec<(String, String, Origin)> {
        let mut keys: Vec<String> = [KEY_SCM, KEY_COMPONENTS_DIR, KEY_INDEX, KEY_MAKE, KEY_JOBS]
            .iter()
            .map(|k| (*k).to_string())
            .chain(self.program.settings.keys().cloned())
            .chain(self.global.settings.keys().cloned())
            .collect();
        keys.sort();
        keys.dedup();
        keys.into_iter()
            .filter_map(|k| self.lookup(&k).map(|(v, origin)| (k, v, origin)))
            .collect()
    }

    fn scope_mut(&mut self, scope: Scope) -> Result<(&mut ConfigFile, PathBuf)> {
        match scope {
            Scope::Program => {
                let path = self
                    .program_path
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("not inside a cube program"))?;
                Ok((&mut self.program, path))
            }
            Scope::Global => {
                let path = self
                    .global_path
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("cannot locate a home directory"))?;
                Ok((&mut self.global, path))
            }
        }
    }

    fn checked(&self, key: &str) -> Result<Option<String>> {
        match self.get(key) {
            Some(v) => {
                validate(key, &v)?;
                Ok(Some(v))
            }
            None => Ok(None),
        }
    }

    /// SCM used for URLs that do not name one: `git` or `hg`.
    pub fn default_scm(&self) -> Result<String> {
        Ok(self
            .checked(KEY_SCM)?
            .unwrap_or_else(|| "git".to_string()))
    }

    /// Directory (relative to the program root) receiving index components.
    pub fn components_dir(&self) -> Result<PathBuf> {
        Ok(PathBuf::from(
            self.checked(KEY_COMPONENTS_DIR)?
                .unwrap_or_else(|| "components".to_string()),
        ))
    }

    /// Path or URL of the package index, if configured.
    pub fn index_source(&self) -> Option<String> {
        self.get(KEY_INDEX).filter(|s| !s.trim().is_empty())
    }

    pub fn make_program(&self) -> String {
        self.get(KEY_MAKE)
            .unwrap_or_else(|| default_make().to_string())
    }

    pub fn jobs(&self) -> Result<usize> {
        match self.checked(KEY_JOBS)? {
            Some(v) => Ok(v.parse()?),
            None => Ok(default_jobs()),
        }
    }
}
