//! Source control backends for cube.
//!
//! [`Scm`] is the one seam between dependency synchronization and the version
//! control system holding a checkout. Git goes through `git2`; Mercurial shells out
//! to the `hg` executable.

pub mod git;
pub mod hg;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub use git::GitScm;
pub use hg::HgScm;

/// Errors from SCM operations.
#[derive(Debug, thiserror::Error)]
pub enum ScmError {
    #[error("git: {0}")]
    Git(#[from] git2::Error),
    #[error("`{program} {args}` failed ({status}): {stderr}")]
    Command {
        program: String,
        args: String,
        status: String,
        stderr: String,
    },
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: cannot fast-forward to upstream; update to an explicit revision")]
    NotFastForward { path: String },
    #[error("{path}: {reason}")]
    Unsupported { path: String, reason: String },
    #[error("{path}: unknown revision '{rev}'")]
    UnknownRevision { path: String, rev: String },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Supported version control systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScmKind {
    Git,
    Hg,
}

impl ScmKind {
    pub fn name(self) -> &'static str {
        match self {
            ScmKind::Git => "git",
            ScmKind::Hg => "hg",
        }
    }

    /// Detect the SCM of a checkout from its metadata directory.
    pub fn detect(path: &Path) -> Option<Self> {
        if path.join(".git").exists() {
            Some(ScmKind::Git)
        } else if path.join(".hg").exists() {
            Some(ScmKind::Hg)
        } else {
            None
        }
    }

    /// Pick the SCM for a repository URL.
    ///
    /// An explicit `git+` / `hg+` prefix wins, then a local checkout's metadata,
    /// then git-looking URLs; anything else falls back to `default`.
    pub fn from_url(url: &str, default: ScmKind) -> Self {
        if url.starts_with("hg+") {
            return ScmKind::Hg;
        }
        if url.starts_with("git+") {
            return ScmKind::Git;
        }
        if let Some(kind) = Self::detect(Path::new(url)) {
            return kind;
        }
        let trimmed = url.trim_end_matches('/');
        if trimmed.ends_with(".git") || url.starts_with("git@") || url.starts_with("git://") {
            return ScmKind::Git;
        }
        default
    }

    pub fn backend(self) -> Box<dyn Scm> {
        match self {
            ScmKind::Git => Box::new(GitScm),
            ScmKind::Hg => Box::new(HgScm::default()),
        }
    }
}

impl fmt::Display for ScmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScmKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "git" => Ok(ScmKind::Git),
            "hg" | "mercurial" => Ok(ScmKind::Hg),
            other => Err(format!("unsupported scm '{other}' (expected git or hg)")),
        }
    }
}

/// URL as handed to the backend, without an explicit scheme prefix.
pub fn clone_url(url: &str) -> &str {
    url.strip_prefix("git+")
        .or_else(|| url.strip_prefix("hg+"))
        .unwrap_or(url)
}

/// Operations cube needs from a version control system.
pub trait Scm {
    fn kind(&self) -> ScmKind;

    /// Create an empty repository at `path`.
    fn init(&self, path: &Path) -> Result<(), ScmError>;

    /// Clone `url` into `dest`, then check out `rev` when given.
    fn clone_repo(&self, url: &str, dest: &Path, rev: Option<&str>) -> Result<(), ScmError>;

    /// Full identifier of the checked-out revision.
    fn revision(&self, path: &Path) -> Result<String, ScmError>;

    /// Whether tracked files have uncommitted changes.
    fn is_dirty(&self, path: &Path) -> Result<bool, ScmError>;

    /// URL of the default remote, if configured.
    fn remote_url(&self, path: &Path) -> Result<Option<String>, ScmError>;

    /// Pull new history from the default remote without touching the working tree.
    fn fetch(&self, path: &Path) -> Result<(), ScmError>;

    /// Check out `rev` (commit, tag or branch).
    fn checkout(&self, path: &Path, rev: &str) -> Result<(), ScmError>;

    /// Whether `rev` resolves locally to the checked-out revision.
    fn is_at(&self, path: &Path, rev: &str) -> Result<bool, ScmError>;

    /// Fetch, then check out `rev`, or move the current branch to its upstream.
    fn update(&self, path: &Path, rev: Option<&str>) -> Result<(), ScmError> {
        self.fetch(path)?;
        match rev {
            Some(rev) => self.checkout(path, rev),
            None => self.fast_forward(path),
        }
    }

    /// Advance the current branch to its upstream head.
    fn fast_forward(&self, path: &Path) -> Result<(), ScmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_url() {
        assert_eq!(
            ScmKind::from_url("https://host/org/wifi.git", ScmKind::Hg),
            ScmKind::Git
        );
        assert_eq!(ScmKind::from_url("git@host:org/x", ScmKind::Hg), ScmKind::Git);
        assert_eq!(
            ScmKind::from_url("hg+https://host/x.git", ScmKind::Git),
            ScmKind::Hg
        );
        assert_eq!(
            ScmKind::from_url("https://host/hg/lwip", ScmKind::Hg),
            ScmKind::Hg
        );
        assert_eq!(
            ScmKind::from_url("https://host/hg/lwip", ScmKind::Git),
            ScmKind::Git
        );
    }

    #[test]
    fn test_from_url_local_checkout() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join(".hg")).unwrap();
        let url = tmp.path().to_str().unwrap();
        assert_eq!(ScmKind::from_url(url, ScmKind::Git), ScmKind::Hg);
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!("git".parse::<ScmKind>().unwrap(), ScmKind::Git);
        assert_eq!("Mercurial".parse::<ScmKind>().unwrap(), ScmKind::Hg);
        assert!("svn".parse::<ScmKind>().is_err());
        assert_eq!(ScmKind::Hg.to_string(), "hg");
    }

    #[test]
    fn test_clone_url() {
        assert_eq!(clone_url("hg+https://h/x"), "https://h/x");
        assert_eq!(clone_url("https://h/x"), "https://h/x");
    }
}
