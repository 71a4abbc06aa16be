//! Bring the working tree in line with the resolved component graph.
//!
//! Missing checkouts are cloned, checkouts at the wrong revision are updated and
//! checkouts cube created earlier but no longer referenced are removed. The lock
//! file records every checkout cube manages so that removal never touches a
//! directory the user created.

use cube_core::index::PackageIndex;
use cube_core::lock::{LockEntry, LockSource, Lockfile};
use cube_scm::{Scm, clone_url};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{DeployError, Result};
use crate::graph::{Component, Conflict, Source};
use crate::repo::{Program, Repo, normalize};
use crate::resolve::{Materializer, resolve};

/// Length of abbreviated revisions in reports.
const SHORT_REV: usize = 12;

fn short(rev: &str) -> String {
    rev.chars().take(SHORT_REV).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Create,
    Update { from: String, to: String },
    Keep,
    Skip { reason: String },
    Remove,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Create => f.write_str("create"),
            Action::Update { from, to } => write!(f, "update {from} -> {to}"),
            Action::Keep => f.write_str("keep"),
            Action::Skip { reason } => write!(f, "skip ({reason})"),
            Action::Remove => f.write_str("remove"),
        }
    }
}

/// What happened (or would happen) to one checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncAction {
    pub name: String,
    /// Checkout path relative to the program root.
    pub path: String,
    pub action: Action,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Update or remove checkouts even when they have uncommitted changes.
    pub force: bool,
    /// Report actions without touching the working tree or the lock.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub actions: Vec<SyncAction>,
    pub conflicts: Vec<Conflict>,
}

impl SyncReport {
    pub fn count(&self, matches: impl Fn(&Action) -> bool) -> usize {
        self.actions.iter().filter(|a| matches(&a.action)).count()
    }

    /// Whether the tree was already in sync.
    pub fn is_noop(&self) -> bool {
        self.actions.iter().all(|a| a.action == Action::Keep)
    }

    pub fn summary(&self) -> String {
        format!(
            "{} created, {} updated, {} removed, {} kept, {} skipped",
            self.count(|a| *a == Action::Create),
            self.count(|a| matches!(a, Action::Update { .. })),
            self.count(|a| *a == Action::Remove),
            self.count(|a| *a == Action::Keep),
            self.count(|a| matches!(a, Action::Skip { .. })),
        )
    }
}

/// [`Materializer`] that clones and updates checkouts, tracking them in the lock.
pub struct Synchronizer<'a> {
    program: &'a Program,
    options: SyncOptions,
    /// Lock entries keyed by relative path, seeded from the previous lock.
    entries: BTreeMap<String, LockEntry>,
    actions: Vec<SyncAction>,
}

impl<'a> Synchronizer<'a> {
    pub fn new(program: &'a Program, lock: &Lockfile, options: SyncOptions) -> Self {
        let entries = lock
            .components
            .iter()
            .map(|e| (e.path.clone(), e.clone()))
            .collect();
        Self {
            program,
            options,
            entries,
            actions: Vec::new(),
        }
    }

    fn relative(&self, path: &Path) -> String {
        self.program
            .relative(path)
            .unwrap_or_else(|| path.display().to_string())
    }

    fn record(&mut self, name: &str, path: String, action: Action) {
        match &action {
            Action::Keep => tracing::debug!("{path}: {action}"),
            Action::Skip { .. } => tracing::warn!("{path}: {action}"),
            _ => tracing::info!("{path}: {action}"),
        }
        self.actions.push(SyncAction {
            name: name.to_string(),
            path,
            action,
        });
    }

    fn lock_entry(component: &Component, rel: &str, url: &str, rev: String) -> LockEntry {
        let (source, version) = match &component.source {
            Source::Index { version } => (LockSource::Index, Some(version.to_string())),
            _ => (LockSource::Lib, None),
        };
        LockEntry {
            name: component.name.clone(),
            path: rel.to_string(),
            url: url.to_string(),
            rev,
            scm: component
                .scm
                .map(|k| k.name().to_string())
                .unwrap_or_default(),
            source,
            version,
        }
    }

    fn create(&mut self, component: &Component, url: &str, rel: String) -> Result<bool> {
        if self.options.dry_run {
            self.record(&component.name, rel, Action::Create);
            return Ok(false);
        }
        let kind = component
            .scm
            .ok_or_else(|| anyhow::anyhow!("{}: no source control for {url}", component.name))?;
        if let Some(parent) = component.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DeployError::io(parent, e))?;
        }
        let backend = kind.backend();
        tracing::info!("cloning {} into {}", url, rel);
        let cloned = backend
            .clone_repo(clone_url(url), &component.path, component.rev.as_deref())
            .and_then(|()| backend.revision(&component.path));
        let rev = match cloned {
            Ok(rev) => rev,
            Err(e) => {
                // The directory did not exist before the clone.
                if component.path.exists() {
                    tracing::warn!("{rel}: removing incomplete checkout");
                    std::fs::remove_dir_all(&component.path)
                        .map_err(|io| DeployError::io(&component.path, io))?;
                }
                return Err(e.into());
            }
        };
        self.entries
            .insert(rel.clone(), Self::lock_entry(component, &rel, url, rev));
        self.record(&component.name, rel, Action::Create);
        Ok(true)
    }

    /// Move a checkout to `rev`, or to its upstream head when `rev` is `None`.
    fn update(
        &self,
        backend: &dyn Scm,
        component: &Component,
        rev: Option<&str>,
        to: String,
    ) -> Result<Action> {
        let path = &component.path;
        if !self.options.force && backend.is_dirty(path)? {
            return Ok(Action::Skip {
                reason: format!("uncommitted changes, not updating to {to}"),
            });
        }
        let from = backend
            .revision(path)
            .map(|r| short(&r))
            .unwrap_or_default();
        if !self.options.dry_run {
            backend.update(path, rev)?;
        }
        Ok(Action::Update { from, to })
    }

    /// Delete locked checkouts outside `desired`, deepest first.
    fn remove_obsolete(&mut self, desired: &[PathBuf]) -> Result<()> {
        let root = self.program.root.clone();
        let mut obsolete: Vec<(String, PathBuf)> = self
            .entries
            .iter()
            .map(|(rel, e)| (rel.clone(), normalize(&Lockfile::entry_path(&root, e))))
            .filter(|(_, path)| !desired.contains(path))
            .collect();
        obsolete.sort_by_key(|(rel, _)| Reverse(rel.matches('/').count()));

        for (rel, path) in obsolete {
            let name = self.entries[&rel].name.clone();
            if !self.program.contains(&path) {
                tracing::warn!("{rel}: locked path lies outside the program, forgetting it");
                self.entries.remove(&rel);
                continue;
            }
            if !path.exists() {
                tracing::debug!("{rel}: already gone");
                self.entries.remove(&rel);
                continue;
            }
            if desired.iter().any(|d| d.starts_with(&path)) {
                self.record(
                    &name,
                    rel,
                    Action::Skip {
                        reason: "contains components still in use".to_string(),
                    },
                );
                continue;
            }
            if !self.options.force && Repo::open(&path).is_dirty()? {
                self.record(
                    &name,
                    rel,
                    Action::Skip {
                        reason: "uncommitted changes".to_string(),
                    },
                );
                continue;
            }
            if !self.options.dry_run {
                std::fs::remove_dir_all(&path).map_err(|e| DeployError::io(&path, e))?;
            }
            self.entries.remove(&rel);
            self.record(&name, rel, Action::Remove);
        }
        Ok(())
    }

    fn save(&self) -> Result<()> {
        let mut lock = Lockfile {
            components: self.entries.values().cloned().collect(),
            ..Lockfile::default()
        };
        lock.save(&self.program.root)?;
        Ok(())
    }
}

impl Materializer for Synchronizer<'_> {
    fn materialize(&mut self, component: &Component) -> Result<bool> {
        let rel = self.relative(&component.path);
        let Some(url) = component.url.clone() else {
            self.record(&component.name, rel, Action::Keep);
            return Ok(component.path.is_dir());
        };
        if !component.path.exists() {
            return self.create(component, &url, rel);
        }

        let repo = Repo::open(&component.path);
        let Some(backend) = repo.backend() else {
            self.record(
                &component.name,
                rel,
                Action::Skip {
                    reason: "exists but is not a checkout".to_string(),
                },
            );
            return Ok(true);
        };

        let locked = self.entries.get(&rel).cloned();
        let version = match &component.source {
            Source::Index { version } => Some(version.to_string()),
            _ => None,
        };

        let action = match (component.rev.as_deref(), &locked) {
            (_, Some(entry)) if entry.url != url => Action::Skip {
                reason: format!(
                    "checked out from {}; remove it to switch to {url}",
                    entry.url
                ),
            },
            (Some(rev), _) if !backend.is_at(&component.path, rev)? => {
                self.update(backend.as_ref(), component, Some(rev), rev.to_string())?
            }
            // Releases without a revision follow their upstream branch.
            (None, Some(entry)) if entry.version != version => {
                let to = version.clone().unwrap_or_else(|| "upstream".to_string());
                self.update(backend.as_ref(), component, None, to)?
            }
            _ => Action::Keep,
        };

        let skipped = matches!(action, Action::Skip { .. });
        if !self.options.dry_run && locked.is_some() && !skipped {
            let rev = backend.revision(&component.path)?;
            self.entries
                .insert(rel.clone(), Self::lock_entry(component, &rel, &url, rev));
        }
        self.record(&component.name, rel, action);
        Ok(true)
    }
}

/// Resolve `program` and synchronize its working tree.
pub fn deploy(
    program: &Program,
    index: Option<&PackageIndex>,
    options: SyncOptions,
) -> Result<SyncReport> {
    let lock = program.lock()?;
    let mut sync = Synchronizer::new(program, &lock, options);

    let resolution = match resolve(program, index, &mut sync) {
        Ok(resolution) => resolution,
        Err(e) => {
            // Keep track of whatever was cloned before the failure.
            if !options.dry_run {
                sync.save()?;
            }
            return Err(e);
        }
    };

    for (_, component) in resolution.graph.nodes() {
        if component.source == Source::Local {
            let rel = sync.relative(&component.path);
            sync.record(&component.name, rel, Action::Keep);
        }
    }

    let desired: Vec<PathBuf> = resolution.managed().map(|c| normalize(&c.path)).collect();
    sync.remove_obsolete(&desired)?;

    if !options.dry_run {
        sync.save()?;
    }
    Ok(SyncReport {
        actions: sync.actions,
        conflicts: resolution.conflicts,
    })
}
