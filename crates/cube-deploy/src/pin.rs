//! Write the working tree's state back into `.lib` files.

use cube_core::reference::{LibReference, validate_name};
use cube_core::walk;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{DeployError, Result};
use crate::repo::{Program, Repo, normalize};
use crate::scan::{Declared, scan_references};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinChange {
    /// A `.lib` revision now names the checked-out revision.
    Pinned {
        file: String,
        from: Option<String>,
        to: String,
    },
    /// A deployed checkout disappeared, so its `.lib` was deleted.
    Dropped { file: String },
    /// An unreferenced checkout got a new `.lib`.
    Added { file: String },
}

impl fmt::Display for PinChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinChange::Pinned { file, from, to } => match from {
                Some(from) => write!(f, "{file}: {from} -> {to}"),
                None => write!(f, "{file}: pinned to {to}"),
            },
            PinChange::Dropped { file } => write!(f, "{file}: removed"),
            PinChange::Added { file } => write!(f, "{file}: added"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PinReport {
    pub changes: Vec<PinChange>,
}

impl PinReport {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Reconcile the program's `.lib` files with its checkouts.
///
/// Revisions are rewritten to what is checked out, references to deployed
/// checkouts that no longer exist are dropped, and checkouts nobody references
/// get a reference of their own. Index components are left to their `.codes`
/// files.
pub fn pin(program: &Program) -> Result<PinReport> {
    let lock = program.lock()?;
    let skip = [program.components_path()?];
    let mut report = PinReport::default();
    let rel = |path: &Path| {
        program
            .relative(path)
            .unwrap_or_else(|| path.display().to_string())
    };

    let mut visited = BTreeSet::new();
    let mut pending = VecDeque::from([program.root.clone()]);
    while let Some(dir) = pending.pop_front() {
        if !visited.insert(dir.clone()) {
            continue;
        }
        let mut referenced: BTreeSet<PathBuf> = BTreeSet::new();

        for declared in scan_references(&dir, &skip)? {
            let Declared::Lib {
                file,
                mut reference,
                checkout,
            } = declared
            else {
                continue;
            };
            let checkout = normalize(&checkout);
            referenced.insert(checkout.clone());

            let repo = Repo::open(&checkout);
            let Some(backend) = repo.backend() else {
                let deployed = program
                    .relative(&checkout)
                    .is_some_and(|key| lock.find_path(&key).is_some());
                if deployed && !checkout.exists() {
                    std::fs::remove_file(&file).map_err(|e| DeployError::io(&file, e))?;
                    report.changes.push(PinChange::Dropped { file: rel(&file) });
                }
                continue;
            };

            if repo.is_dirty()? {
                tracing::warn!(
                    "{}: uncommitted changes are not captured by its revision",
                    rel(&checkout)
                );
            }
            let current = backend.revision(&checkout)?;
            let up_to_date = match reference.rev.as_deref() {
                Some(rev) => rev == current || backend.is_at(&checkout, rev)?,
                None => false,
            };
            if !up_to_date {
                let from = reference.rev.replace(current.clone());
                reference.write(file.parent().unwrap_or(&dir))?;
                report.changes.push(PinChange::Pinned {
                    file: rel(&file),
                    from,
                    to: current,
                });
            }
            pending.push_back(checkout);
        }

        for checkout in walk::checkouts(&dir, &skip) {
            if referenced.contains(&checkout) {
                continue;
            }
            let locked = program
                .relative(&checkout)
                .is_some_and(|key| lock.find_path(&key).is_some());
            if !locked && let Some(file) = add_reference(&checkout)? {
                report.changes.push(PinChange::Added { file: rel(&file) });
            }
            pending.push_back(checkout);
        }
    }

    Ok(report)
}

/// Write `<name>.lib` next to an unreferenced checkout.
fn add_reference(checkout: &Path) -> Result<Option<PathBuf>> {
    let repo = Repo::open(checkout);
    if validate_name(&repo.name).is_err() {
        tracing::warn!("{}: not a valid component name, skipping", checkout.display());
        return Ok(None);
    }
    let Some(url) = repo.url()? else {
        tracing::warn!("{}: no remote to reference, skipping", checkout.display());
        return Ok(None);
    };
    // A repository without commits has nothing to pin.
    let Ok(Some(rev)) = repo.revision() else {
        return Ok(None);
    };
    let Some(parent) = checkout.parent() else {
        return Ok(None);
    };
    Ok(Some(
        LibReference::new(repo.name.clone(), url, Some(rev)).write(parent)?,
    ))
}
