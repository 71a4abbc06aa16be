//! Checkouts on disk: individual repositories and the program that owns them.

use cube_core::CUBE_DIR;
use cube_core::config::{ConfigFile, Settings, program_config_path};
use cube_core::index::PackageIndex;
use cube_core::lock::{Lockfile, relative_key};
use cube_scm::{Scm, ScmKind};
use std::path::{Component, Path, PathBuf};

use crate::error::{DeployError, Result};

/// A directory that may be under version control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repo {
    pub name: String,
    pub path: PathBuf,
    pub scm: Option<ScmKind>,
}

impl Repo {
    pub fn open(path: &Path) -> Self {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        Self {
            name,
            path: path.to_path_buf(),
            scm: ScmKind::detect(path),
        }
    }

    pub fn backend(&self) -> Option<Box<dyn Scm>> {
        self.scm.map(ScmKind::backend)
    }

    /// Checked-out revision, or `None` outside version control.
    pub fn revision(&self) -> Result<Option<String>> {
        match self.backend() {
            Some(scm) => Ok(Some(scm.revision(&self.path)?)),
            None => Ok(None),
        }
    }

    pub fn is_dirty(&self) -> Result<bool> {
        match self.backend() {
            Some(scm) => Ok(scm.is_dirty(&self.path)?),
            None => Ok(false),
        }
    }

    pub fn url(&self) -> Result<Option<String>> {
        match self.backend() {
            Some(scm) => Ok(scm.remote_url(&self.path)?),
            None => Ok(None),
        }
    }
}

/// Resolve `.` and `..` without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// A top-level application: the directory holding `.cube/`.
#[derive(Debug, Clone)]
pub struct Program {
    pub root: PathBuf,
    pub settings: Settings,
}

impl Program {
    pub fn is_program(path: &Path) -> bool {
        path.join(CUBE_DIR).is_dir()
    }

    /// Find the program containing `start` by walking up its ancestors.
    pub fn find(start: &Path) -> Result<Self> {
        let start = normalize(start);
        let root = start
            .ancestors()
            .find(|dir| Self::is_program(dir))
            .ok_or_else(|| DeployError::NotAProgram(start.display().to_string()))?;
        Self::open(root)
    }

    /// Open the program rooted at `root` with program and global settings.
    pub fn open(root: &Path) -> Result<Self> {
        let settings = Settings::load(Some(root))?;
        Ok(Self::with_settings(root, settings))
    }

    pub fn with_settings(root: &Path, settings: Settings) -> Self {
        Self {
            root: normalize(root),
            settings,
        }
    }

    /// Mark `root` as a program, keeping any existing config.
    pub fn init(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(|e| DeployError::io(root, e))?;
        let config = program_config_path(root);
        if !config.exists() {
            ConfigFile::default().save(&config)?;
        }
        Self::open(root)
    }

    pub fn name(&self) -> String {
        self.root
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("program")
            .to_string()
    }

    pub fn components_path(&self) -> Result<PathBuf> {
        Ok(self.root.join(self.settings.components_dir()?))
    }

    pub fn default_scm(&self) -> Result<ScmKind> {
        let name = self.settings.default_scm()?;
        name.parse()
            .map_err(|e: String| DeployError::Other(anyhow::anyhow!(e)))
    }

    /// The configured package index, if any.
    pub fn load_index(&self) -> Result<Option<PackageIndex>> {
        match self.settings.index_source() {
            Some(source) => Ok(Some(PackageIndex::load(&source)?)),
            None => Ok(None),
        }
    }

    pub fn lock(&self) -> Result<Lockfile> {
        Ok(Lockfile::load(&self.root)?)
    }

    /// Lock-style key of `path` relative to the program root.
    pub fn relative(&self, path: &Path) -> Option<String> {
        relative_key(&self.root, &normalize(path))
    }

    /// Whether `path` lies strictly inside the program root.
    pub fn contains(&self, path: &Path) -> bool {
        let path = normalize(path);
        path != self.root && path.starts_with(&self.root)
    }

    pub fn as_repo(&self) -> Repo {
        Repo::open(&self.root)
    }
}
