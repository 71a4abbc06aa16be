//! Discover the references a checkout declares.

use cube_core::reference::{CodesFile, LibReference, is_codes_file, is_lib_file};
use cube_core::walk;
use semver::VersionReq;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// A dependency declared by a reference file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Declared {
    /// `<name>.lib`: a repository checked out next to the file.
    Lib {
        file: PathBuf,
        reference: LibReference,
        checkout: PathBuf,
    },
    /// One entry of a `.codes` file: an index component.
    Codes {
        file: PathBuf,
        name: String,
        req: VersionReq,
    },
}

impl Declared {
    pub fn file(&self) -> &Path {
        match self {
            Declared::Lib { file, .. } | Declared::Codes { file, .. } => file,
        }
    }
}

/// References declared under `dir`, shallowest first, then in path order.
///
/// Hidden directories, nested checkouts and the directories in `skip` are not
/// searched.
pub fn scan_references(dir: &Path, skip: &[PathBuf]) -> Result<Vec<Declared>> {
    let mut files = walk::files(dir, skip);
    files.sort_by_key(|f| f.components().count());

    let mut declared = Vec::new();
    for file in files {
        let Some(file_name) = file.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if is_lib_file(file_name) {
            let reference = LibReference::read(&file)?;
            let checkout = file
                .parent()
                .unwrap_or(dir)
                .join(&reference.name);
            declared.push(Declared::Lib {
                file,
                reference,
                checkout,
            });
        } else if is_codes_file(file_name) {
            let codes = CodesFile::read(&file)?;
            for (name, req) in codes.requirements() {
                declared.push(Declared::Codes {
                    file: file.clone(),
                    name,
                    req,
                });
            }
        }
    }
    Ok(declared)
}
