//! Program-level operations behind the `cube` subcommands.

use cube_core::config::{KEY_SCM, Scope, Settings};
use cube_core::mk;
use cube_core::reference::{CodesFile, LibReference, name_from_url, parse_requirement};
use cube_scm::{ScmKind, clone_url};
use std::path::{Path, PathBuf};

use crate::error::{DeployError, Result};
use crate::pin::{PinReport, pin};
use crate::repo::{Program, Repo, normalize};
use crate::resolve::{Inspect, resolve};
use crate::scan::{Declared, scan_references};
use crate::sync::{self, SyncOptions, SyncReport};

/// `.codes` file written by `cube add <name>`.
pub const PROGRAM_CODES: &str = "cube.codes";

/// SCM named by the global settings, for commands that run before a program exists.
fn configured_scm() -> Result<ScmKind> {
    let name = Settings::load(None)?.default_scm()?;
    name.parse()
        .map_err(|e: String| DeployError::Other(anyhow::anyhow!(e)))
}

/// Create a new program at `path`, under version control.
pub fn new_program(path: &Path, scm: Option<ScmKind>) -> Result<Program> {
    if Program::is_program(path) {
        return Err(DeployError::AlreadyExists {
            path: path.display().to_string(),
        });
    }
    std::fs::create_dir_all(path).map_err(|e| DeployError::io(path, e))?;

    let kind = match scm {
        Some(kind) => kind,
        None => configured_scm()?,
    };
    if ScmKind::detect(path).is_none() {
        kind.backend().init(path)?;
    }

    let mut program = Program::init(path)?;
    if scm.is_some() {
        program.settings.set(Scope::Program, KEY_SCM, kind.name())?;
    }
    tracing::info!("created {} program at {}", kind, program.root.display());
    Ok(program)
}

/// Whether an `add` target names a repository rather than an index component.
pub fn is_repository_url(target: &str) -> bool {
    target.contains(['/', '\\', ':']) || target.ends_with(".git")
}

/// Directory an imported program lands in when none is given.
pub fn import_destination(url: &str, cwd: &Path) -> Result<PathBuf> {
    let name = name_from_url(url)
        .ok_or_else(|| anyhow::anyhow!("cannot derive a directory name from '{url}'"))?;
    Ok(cwd.join(name))
}

/// Clone a program from `url` into `dest` and deploy its components.
pub fn import_program(
    url: &str,
    dest: &Path,
    options: SyncOptions,
) -> Result<(Program, SyncReport)> {
    if dest.exists() {
        return Err(DeployError::AlreadyExists {
            path: dest.display().to_string(),
        });
    }
    let (url, rev) = match url.split_once('#') {
        Some((url, rev)) => (url, Some(rev)),
        None => (url, None),
    };
    let kind = ScmKind::from_url(url, configured_scm()?);
    tracing::info!("importing {} into {}", url, dest.display());
    kind.backend().clone_repo(clone_url(url), dest, rev)?;

    let program = Program::init(dest)?;
    let report = deploy(&program, options)?;
    Ok((program, report))
}

/// Reference the repository at `url` (`url[#rev]`) from `dir` and deploy.
///
/// Returns the new `.lib` file.
pub fn add_url(
    program: &Program,
    url: &str,
    dir: &Path,
    options: SyncOptions,
) -> Result<(PathBuf, SyncReport)> {
    let bare = url.split('#').next().unwrap_or(url);
    let name = name_from_url(bare)
        .ok_or_else(|| anyhow::anyhow!("cannot derive a component name from '{bare}'"))?;
    let reference = LibReference::parse(&name, url)?;

    let dir = normalize(dir);
    let checkout = dir.join(&reference.name);
    if !program.contains(&checkout) {
        return Err(DeployError::OutsideProgram {
            name: reference.name,
            path: checkout.display().to_string(),
        });
    }
    let file = reference.file_in(&dir);
    if file.exists() {
        return Err(DeployError::AlreadyExists {
            path: file.display().to_string(),
        });
    }

    std::fs::create_dir_all(&dir).map_err(|e| DeployError::io(&dir, e))?;
    let file = reference.write(&dir)?;
    tracing::info!("added {}", reference.to_line());
    let report = deploy(program, options)?;
    Ok((file, report))
}

/// Require index component `name` from the program's `cube.codes` and deploy.
pub fn add_component(
    program: &Program,
    name: &str,
    req: Option<&str>,
    options: SyncOptions,
) -> Result<SyncReport> {
    let req = req.unwrap_or("").trim();
    let parsed = parse_requirement(req)
        .map_err(|e| anyhow::anyhow!("invalid requirement '{req}': {e}"))?;
    let codes_path = program.root.join(PROGRAM_CODES);

    let local = mk::scan(&program.root, &[program.components_path()?]);
    if !local.contains_key(name) {
        let index = program.load_index()?.ok_or_else(|| DeployError::NoIndex {
            by: PROGRAM_CODES.to_string(),
        })?;
        let release = index.select(name, &parsed)?;
        tracing::info!("{} resolves to {}", name, release.version);
    }

    let mut codes = CodesFile::read(&codes_path)?;
    if let Some(previous) = codes.insert(name, req)? {
        tracing::info!("{}: requirement '{}' replaced by '{}'", name, previous, req);
    }
    codes.write(&codes_path)?;
    deploy(program, options)
}

/// Drop every reference to `name` from the program tree, then deploy so the
/// checkout is removed.
pub fn remove(program: &Program, name: &str, options: SyncOptions) -> Result<SyncReport> {
    let mut found = false;
    let mut codes_files = Vec::new();
    for declared in scan_references(&program.root, &[program.components_path()?])? {
        match declared {
            Declared::Lib {
                file, reference, ..
            } if reference.name == name => {
                std::fs::remove_file(&file).map_err(|e| DeployError::io(&file, e))?;
                tracing::info!("deleted {}", file.display());
                found = true;
            }
            Declared::Codes { file, name: n, .. } if n == name => codes_files.push(file),
            _ => {}
        }
    }
    for file in codes_files {
        let mut codes = CodesFile::read(&file)?;
        if codes.remove(name) {
            codes.write(&file)?;
            tracing::info!("removed {} from {}", name, file.display());
            found = true;
        }
    }
    if !found {
        return Err(DeployError::NotReferenced(name.to_string()));
    }
    deploy(program, options)
}

/// Resolve the program and synchronize its working tree.
pub fn deploy(program: &Program, options: SyncOptions) -> Result<SyncReport> {
    let index = program.load_index()?;
    sync::deploy(program, index.as_ref(), options)
}

/// Update the program's own checkout to `rev` (or its upstream), then deploy.
pub fn update_program(
    program: &Program,
    rev: Option<&str>,
    options: SyncOptions,
) -> Result<SyncReport> {
    let repo = program.as_repo();
    if let Some(backend) = repo.backend() {
        if !options.force && backend.is_dirty(&repo.path)? {
            return Err(DeployError::Dirty {
                path: repo.path.display().to_string(),
            });
        }
        if !options.dry_run {
            backend.update(&repo.path, rev)?;
        }
    } else {
        tracing::warn!("{} is not under version control", repo.path.display());
    }
    deploy(program, options)
}

/// Rewrite reference files from the working tree.
pub fn sync_references(program: &Program) -> Result<PinReport> {
    pin(program)
}

/// State of one checkout in the program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoStatus {
    pub name: String,
    /// Path relative to the program root; empty for the root itself.
    pub path: String,
    pub scm: Option<ScmKind>,
    pub revision: Option<String>,
    pub dirty: bool,
}

fn repo_status(program: &Program, name: &str, path: &Path) -> Result<RepoStatus> {
    let repo = Repo::open(path);
    Ok(RepoStatus {
        name: name.to_string(),
        path: program.relative(path).unwrap_or_default(),
        scm: repo.scm,
        revision: repo.revision().ok().flatten(),
        dirty: repo.is_dirty()?,
    })
}

/// Status of the program and each component checkout present on disk.
pub fn status(program: &Program) -> Result<Vec<RepoStatus>> {
    let index = program.load_index()?;
    let resolution = resolve(program, index.as_ref(), &mut Inspect)?;
    let mut statuses = vec![repo_status(program, &program.name(), &program.root)?];
    for component in resolution.managed() {
        if component.path.is_dir() {
            statuses.push(repo_status(program, &component.name, &component.path)?);
        }
    }
    Ok(statuses)
}

/// Dependency tree of the program as currently on disk.
pub fn list(program: &Program) -> Result<String> {
    let index = program.load_index()?;
    let resolution = resolve(program, index.as_ref(), &mut Inspect)?;
    Ok(resolution.graph.render_tree(resolution.root))
}
