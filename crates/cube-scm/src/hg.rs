//! Mercurial backend driving the `hg` executable.

use std::path::Path;
use std::process::Command;

use crate::{Scm, ScmError, ScmKind, clone_url};

#[derive(Debug, Clone)]
pub struct HgScm {
    program: String,
}

impl Default for HgScm {
    fn default() -> Self {
        Self {
            program: "hg".to_string(),
        }
    }
}

impl HgScm {
    /// Use a specific `hg` executable.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Build the command for `args`, run non-interactively inside `cwd`.
    pub fn command(&self, cwd: Option<&Path>, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--noninteractive").args(args);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }

    fn run(&self, cwd: Option<&Path>, args: &[&str]) -> Result<String, ScmError> {
        tracing::debug!("{} {}", self.program, args.join(" "));
        let output = self
            .command(cwd, args)
            .output()
            .map_err(|source| ScmError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(ScmError::Command {
                program: self.program.clone(),
                args: args.join(" "),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Arguments of `hg clone`. Operands follow `--` so a url is never read as
    /// an option.
    fn clone_args<'a>(url: &'a str, dest: &'a str, rev: Option<&'a str>) -> Vec<&'a str> {
        let mut args = vec!["clone"];
        if let Some(rev) = rev {
            args.extend(["-u", rev]);
        }
        args.extend(["--", clone_url(url), dest]);
        args
    }

    fn node(&self, path: &Path, rev: &str) -> Result<String, ScmError> {
        self.run(Some(path), &["log", "-r", rev, "--template", "{node}"])
    }
}

impl Scm for HgScm {
    fn kind(&self) -> ScmKind {
        ScmKind::Hg
    }

    fn init(&self, path: &Path) -> Result<(), ScmError> {
        let path = path.to_string_lossy();
        self.run(None, &["init", &*path]).map(|_| ())
    }

    fn clone_repo(&self, url: &str, dest: &Path, rev: Option<&str>) -> Result<(), ScmError> {
        let dest = dest.to_string_lossy();
        self.run(None, &Self::clone_args(url, &dest, rev))
            .map(|_| ())
    }

    fn revision(&self, path: &Path) -> Result<String, ScmError> {
        self.node(path, ".")
    }

    fn is_dirty(&self, path: &Path) -> Result<bool, ScmError> {
        // -q hides untracked files
        Ok(!self.run(Some(path), &["status", "-q"])?.is_empty())
    }

    fn remote_url(&self, path: &Path) -> Result<Option<String>, ScmError> {
        match self.run(Some(path), &["paths", "default"]) {
            Ok(url) if !url.is_empty() => Ok(Some(url)),
            Ok(_) | Err(ScmError::Command { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn fetch(&self, path: &Path) -> Result<(), ScmError> {
        if self.remote_url(path)?.is_none() {
            return Ok(());
        }
        self.run(Some(path), &["pull"]).map(|_| ())
    }

    fn checkout(&self, path: &Path, rev: &str) -> Result<(), ScmError> {
        self.run(Some(path), &["update", "-C", "-r", rev]).map(|_| ())
    }

    fn is_at(&self, path: &Path, rev: &str) -> Result<bool, ScmError> {
        let current = self.revision(path)?;
        match self.node(path, rev) {
            Ok(node) => Ok(node == current),
            Err(ScmError::Command { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn fast_forward(&self, path: &Path) -> Result<(), ScmError> {
        self.run(Some(path), &["update"]).map(|_| ())
    }
}
