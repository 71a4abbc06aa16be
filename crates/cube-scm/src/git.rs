//! Git backend built on `git2`.

use git2::build::CheckoutBuilder;
use git2::{BranchType, ErrorCode, Repository, StatusOptions};
use std::path::Path;

use crate::{Scm, ScmError, ScmKind, clone_url};

const REMOTE: &str = "origin";

/// Git checkouts through libgit2.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitScm;

fn open(path: &Path) -> Result<Repository, ScmError> {
    Ok(Repository::open(path)?)
}

/// Resolve `rev` to a commit, preferring the remote-tracking branch of that name
/// so that branch references follow upstream after a fetch.
fn resolve<'r>(repo: &'r Repository, path: &Path, rev: &str) -> Result<git2::Commit<'r>, ScmError> {
    let tracking = format!("refs/remotes/{REMOTE}/{rev}");
    for spec in [tracking.as_str(), rev] {
        if let Ok(obj) = repo.revparse_single(spec) {
            return Ok(obj.peel_to_commit()?);
        }
    }
    Err(ScmError::UnknownRevision {
        path: path.display().to_string(),
        rev: rev.to_string(),
    })
}

fn force_checkout() -> CheckoutBuilder<'static> {
    let mut cb = CheckoutBuilder::new();
    cb.force();
    cb
}

impl Scm for GitScm {
    fn kind(&self) -> ScmKind {
        ScmKind::Git
    }

    fn init(&self, path: &Path) -> Result<(), ScmError> {
        Repository::init(path)?;
        Ok(())
    }

    fn clone_repo(&self, url: &str, dest: &Path, rev: Option<&str>) -> Result<(), ScmError> {
        tracing::debug!("git clone {} {}", url, dest.display());
        Repository::clone(clone_url(url), dest)?;
        if let Some(rev) = rev {
            self.checkout(dest, rev)?;
        }
        Ok(())
    }

    fn revision(&self, path: &Path) -> Result<String, ScmError> {
        let repo = open(path)?;
        let commit = repo.head()?.peel_to_commit()?;
        Ok(commit.id().to_string())
    }

    fn is_dirty(&self, path: &Path) -> Result<bool, ScmError> {
        let repo = open(path)?;
        let mut opts = StatusOptions::new();
        opts.include_untracked(false)
            .include_ignored(false)
            .exclude_submodules(true);
        let statuses = repo.statuses(Some(&mut opts))?;
        Ok(!statuses.is_empty())
    }

    fn remote_url(&self, path: &Path) -> Result<Option<String>, ScmError> {
        let repo = open(path)?;
        match repo.find_remote(REMOTE) {
            Ok(remote) => Ok(remote.url().map(str::to_string)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn fetch(&self, path: &Path) -> Result<(), ScmError> {
        let repo = open(path)?;
        let mut remote = match repo.find_remote(REMOTE) {
            Ok(remote) => remote,
            Err(e) if e.code() == ErrorCode::NotFound => {
                tracing::debug!("{}: no '{}' remote, nothing to fetch", path.display(), REMOTE);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        remote.fetch(&[] as &[&str], None, None)?;
        Ok(())
    }

    fn checkout(&self, path: &Path, rev: &str) -> Result<(), ScmError> {
        let repo = open(path)?;
        let commit = resolve(&repo, path, rev)?;
        repo.checkout_tree(commit.as_object(), Some(&mut force_checkout()))?;
        repo.set_head_detached(commit.id())?;
        tracing::debug!("{}: checked out {} ({})", path.display(), rev, commit.id());
        Ok(())
    }

    fn is_at(&self, path: &Path, rev: &str) -> Result<bool, ScmError> {
        let repo = open(path)?;
        let head = repo.head()?.peel_to_commit()?.id();
        match resolve(&repo, path, rev) {
            Ok(commit) => Ok(commit.id() == head),
            Err(ScmError::UnknownRevision { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn fast_forward(&self, path: &Path) -> Result<(), ScmError> {
        let repo = open(path)?;
        let head = repo.head()?;
        if !head.is_branch() {
            return Err(ScmError::Unsupported {
                path: path.display().to_string(),
                reason: "HEAD is detached; update to an explicit revision".to_string(),
            });
        }
        let branch_name = head.shorthand().unwrap_or_default().to_string();
        let ref_name = head.name().unwrap_or_default().to_string();
        let current = head.peel_to_commit()?.id();

        let branch = repo.find_branch(&branch_name, BranchType::Local)?;
        let upstream = match branch.upstream() {
            Ok(upstream) => upstream,
            Err(e) if e.code() == ErrorCode::NotFound => {
                tracing::debug!("{}: '{}' has no upstream", path.display(), branch_name);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let target = upstream.get().peel_to_commit()?.id();

        if target == current || repo.graph_descendant_of(current, target)? {
            return Ok(());
        }
        if !repo.graph_descendant_of(target, current)? {
            return Err(ScmError::NotFastForward {
                path: path.display().to_string(),
            });
        }

        repo.find_reference(&ref_name)?
            .set_target(target, "cube: fast-forward")?;
        repo.checkout_head(Some(&mut force_checkout()))?;
        tracing::debug!("{}: fast-forwarded {} to {}", path.display(), branch_name, target);
        Ok(())
    }
}
