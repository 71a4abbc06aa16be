//! Breadth-first resolution of a program's component graph.
//!
//! Each visited component's checkout is scanned for `.lib` and `.codes` files.
//! Newly registered components are handed to a [`Materializer`], which decides
//! whether a checkout exists afterwards; only existing checkouts are scanned in
//! turn. Names from `.codes` files and `.mk` descriptors resolve against the
//! program's own components first, then the package index.

use cube_core::index::PackageIndex;
use cube_core::mk::{self, LocalComponent};
use cube_core::reference::validate_name;
use cube_scm::ScmKind;
use semver::VersionReq;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};

use crate::error::{DeployError, Result};
use crate::graph::{Component, ComponentGraph, Conflict, Insert, NodeId, Source};
use crate::repo::Program;
use crate::scan::{Declared, scan_references};

/// Brings a newly registered component to its declared state.
pub trait Materializer {
    /// Returns whether the component's checkout exists afterwards.
    fn materialize(&mut self, component: &Component) -> Result<bool>;
}

/// Leaves the tree untouched; reports what is already on disk.
#[derive(Debug, Default)]
pub struct Inspect;

impl Materializer for Inspect {
    fn materialize(&mut self, component: &Component) -> Result<bool> {
        Ok(component.path.is_dir())
    }
}

/// A resolved program graph.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub graph: ComponentGraph,
    pub root: NodeId,
    pub conflicts: Vec<Conflict>,
}

impl Resolution {
    /// Components whose checkouts synchronization manages.
    pub fn managed(&self) -> impl Iterator<Item = &Component> {
        self.graph
            .nodes()
            .map(|(_, c)| c)
            .filter(|c| c.is_managed())
    }
}

/// A name reference waiting to be resolved, with the file that declared it.
struct NameRef {
    name: String,
    req: VersionReq,
    by: String,
    required: bool,
}

struct Resolver<'a, M: Materializer> {
    program: &'a Program,
    index: Option<&'a PackageIndex>,
    local: BTreeMap<String, LocalComponent>,
    components_path: PathBuf,
    default_scm: ScmKind,
    materializer: &'a mut M,
    graph: ComponentGraph,
    conflicts: Vec<Conflict>,
    queue: VecDeque<NodeId>,
}

/// Resolve the component graph of `program`.
pub fn resolve<M: Materializer>(
    program: &Program,
    index: Option<&PackageIndex>,
    materializer: &mut M,
) -> Result<Resolution> {
    let components_path = program.components_path()?;
    let local = mk::scan(&program.root, std::slice::from_ref(&components_path));
    let mut resolver = Resolver {
        program,
        index,
        local,
        components_path,
        default_scm: program.default_scm()?,
        materializer,
        graph: ComponentGraph::new(),
        conflicts: Vec::new(),
        queue: VecDeque::new(),
    };

    let root = resolver
        .graph
        .insert(Component::root(program.name(), program.root.clone()))
        .id();
    resolver.queue.push_back(root);

    while let Some(id) = resolver.queue.pop_front() {
        resolver.visit(id)?;
    }

    if let Some(cycle) = resolver.graph.find_cycle() {
        return Err(DeployError::Cycle(cycle));
    }

    Ok(Resolution {
        graph: resolver.graph,
        root,
        conflicts: resolver.conflicts,
    })
}

impl<M: Materializer> Resolver<'_, M> {
    fn display(&self, path: &Path) -> String {
        self.program
            .relative(path)
            .unwrap_or_else(|| path.display().to_string())
    }

    fn visit(&mut self, id: NodeId) -> Result<()> {
        let component = self.graph.get(id).clone();
        tracing::debug!("resolving {}", component.describe());

        let mut names = Vec::new();
        match &component.source {
            // Local components live inside the root tree, which is scanned already.
            Source::Local => {
                if let Some(local) = self.local.get(&component.name) {
                    let by = format!("{} descriptor", component.name);
                    for dep in &local.descriptor.components {
                        names.push(NameRef {
                            name: dep.clone(),
                            req: VersionReq::STAR,
                            by: by.clone(),
                            required: false,
                        });
                    }
                }
            }
            Source::Root | Source::Lib { .. } | Source::Index { .. } => {
                if let Source::Index { version } = &component.source {
                    names.extend(self.release_dependencies(&component.name, version));
                }
                if component.path.is_dir() {
                    let skip = [self.components_path.clone()];
                    for declared in scan_references(&component.path, &skip)? {
                        match declared {
                            Declared::Lib {
                                file,
                                reference,
                                checkout,
                            } => {
                                let scm = ScmKind::from_url(&reference.url, self.default_scm);
                                let child = Component {
                                    name: reference.name,
                                    source: Source::Lib { file },
                                    path: checkout,
                                    url: Some(reference.url),
                                    rev: reference.rev,
                                    scm: Some(scm),
                                };
                                self.register(id, child)?;
                            }
                            Declared::Codes { file, name, req } => names.push(NameRef {
                                name,
                                req,
                                by: self.display(&file),
                                required: true,
                            }),
                        }
                    }
                }
            }
        }

        for name_ref in names {
            self.register_name(id, name_ref)?;
        }
        Ok(())
    }

    fn release_dependencies(&self, name: &str, version: &semver::Version) -> Vec<NameRef> {
        let Some(release) = self.index.and_then(|idx| {
            idx.components
                .get(name)?
                .releases
                .iter()
                .find(|r| &r.version == version)
        }) else {
            return Vec::new();
        };
        release
            .dependencies
            .iter()
            .map(|(dep, req)| NameRef {
                name: dep.clone(),
                req: req.clone(),
                by: format!("{name} {version}"),
                required: true,
            })
            .collect()
    }

    fn register_name(&mut self, parent: NodeId, name_ref: NameRef) -> Result<()> {
        // An index release already chosen for this name satisfies any requirement it matches.
        if let Some(existing) = self.graph.find(&name_ref.name) {
            let reuse = match &self.graph.get(existing).source {
                Source::Index { version } => name_ref.req.matches(version),
                Source::Local => true,
                _ => false,
            };
            if reuse {
                self.graph.add_edge(parent, existing);
                return Ok(());
            }
        }

        if let Some(local) = self.local.get(&name_ref.name) {
            let child = Component {
                name: name_ref.name,
                source: Source::Local,
                path: local.dir.clone(),
                url: None,
                rev: None,
                scm: None,
            };
            return self.register(parent, child);
        }

        // Index components are checked out under components_dir/<name>.
        if let Err(e) = validate_name(&name_ref.name) {
            if name_ref.required {
                return Err(e.into());
            }
            tracing::warn!("skipping '{}' (required by {}): {e}", name_ref.name, name_ref.by);
            return Ok(());
        }

        let Some(index) = self.index else {
            if name_ref.required {
                return Err(DeployError::NoIndex { by: name_ref.by });
            }
            tracing::warn!(
                "'{}' (required by {}) is not a local component and no index is configured",
                name_ref.name,
                name_ref.by
            );
            return Ok(());
        };

        if !index.contains(&name_ref.name) && !name_ref.required {
            tracing::warn!(
                "'{}' (required by {}) not found locally or in the index",
                name_ref.name,
                name_ref.by
            );
            return Ok(());
        }

        let release = index.select(&name_ref.name, &name_ref.req)?;
        let child = Component {
            path: self.components_path.join(&name_ref.name),
            scm: Some(ScmKind::from_url(&release.url, self.default_scm)),
            url: Some(release.url.clone()),
            rev: release.rev.clone(),
            source: Source::Index {
                version: release.version.clone(),
            },
            name: name_ref.name,
        };
        self.register(parent, child)
    }

    fn register(&mut self, parent: NodeId, child: Component) -> Result<()> {
        if child.is_managed() && !self.program.contains(&child.path) {
            return Err(DeployError::OutsideProgram {
                name: child.name,
                path: child.path.display().to_string(),
            });
        }

        match self.graph.insert(child) {
            Insert::New(id) => {
                self.graph.add_edge(parent, id);
                let component = self.graph.get(id);
                let exists = if component.is_managed() {
                    self.materializer.materialize(component)?
                } else {
                    true
                };
                if exists {
                    self.queue.push_back(id);
                }
            }
            Insert::Existing { id, conflict } => {
                self.graph.add_edge(parent, id);
                if let Some(conflict) = conflict {
                    tracing::warn!(
                        "conflicting declarations of '{}': keeping {}, ignoring {}",
                        conflict.name,
                        conflict.kept,
                        conflict.ignored
                    );
                    self.conflicts.push(conflict);
                }
            }
        }
        Ok(())
    }
}
