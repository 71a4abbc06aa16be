//! Errors raised while resolving, synchronizing or building a program.

use cube_core::index::IndexError;
use cube_core::reference::ReferenceError;
use cube_scm::ScmError;

pub type Result<T, E = DeployError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("not inside a cube program (no .cube directory in {0} or its parents)")]
    NotAProgram(String),
    #[error(transparent)]
    Scm(#[from] ScmError),
    #[error(transparent)]
    Reference(#[from] ReferenceError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
    #[error("{path}: uncommitted changes (use --force to override)")]
    Dirty { path: String },
    #[error("{path}: already exists")]
    AlreadyExists { path: String },
    #[error("{name}: checkout path {path} is outside the program")]
    OutsideProgram { name: String, path: String },
    #[error("{by} lists index components but no index is configured (`cube config index <path-or-url>`)")]
    NoIndex { by: String },
    #[error("'{0}' is not referenced by any .lib or .codes file")]
    NotReferenced(String),
    #[error("build failed: `{command}` exited with {status}")]
    Build { command: String, status: String },
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DeployError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        DeployError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
