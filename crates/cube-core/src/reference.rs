//! `.lib` and `.codes` reference files.
//!
//! A `<name>.lib` file holds one line, `url` or `url#rev`, and places the checkout
//! in the sibling directory `<name>`. A `.codes` file lists index components by
//! name with a semver requirement:
//!
//! ```json
//! { "components": { "wifi": "^1.2", "mqtt": "" } }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const LIB_EXTENSION: &str = "lib";
pub const CODES_EXTENSION: &str = "codes";

/// Errors from reading or writing reference files.
#[derive(Debug, thiserror::Error)]
pub enum ReferenceError {
    #[error("{file}: reference is empty")]
    Empty { file: String },
    #[error("{file}: reference has no url")]
    MissingUrl { file: String },
    #[error("{file}: '#' must be followed by a revision")]
    EmptyRevision { file: String },
    #[error("invalid reference name '{0}'")]
    InvalidName(String),
    #[error("invalid repository url '{0}'")]
    InvalidUrl(String),
    #[error("{file}: invalid requirement '{req}' for {name}: {reason}")]
    InvalidRequirement {
        file: String,
        name: String,
        req: String,
        reason: String,
    },
    #[error("{file}: malformed codes file: {reason}")]
    Malformed { file: String, reason: String },
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

fn io_err(path: &Path, source: std::io::Error) -> ReferenceError {
    ReferenceError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Check that `name` is usable as a single directory name.
pub fn validate_name(name: &str) -> Result<(), ReferenceError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '#'])
        || name.chars().any(char::is_whitespace);
    if bad {
        return Err(ReferenceError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Reject urls the SCM command line would read as options.
pub fn validate_url(url: &str) -> Result<(), ReferenceError> {
    if url.starts_with('-') {
        return Err(ReferenceError::InvalidUrl(url.to_string()));
    }
    Ok(())
}

/// Strip an explicit `git+` / `hg+` scheme prefix.
pub fn strip_scm_prefix(url: &str) -> &str {
    url.strip_prefix("git+")
        .or_else(|| url.strip_prefix("hg+"))
        .unwrap_or(url)
}

/// Derive a component name from a repository URL or path.
///
/// `https://host/org/wifi.git` → `wifi`, `git@host:org/mqtt` → `mqtt`. A URL
/// naming only a host has no component name.
pub fn name_from_url(url: &str) -> Option<String> {
    let url = strip_scm_prefix(url.trim());
    let path = match url.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map_or("", |(_, path)| path),
        None => url,
    };
    let last = path
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\', ':'])
        .next()?;
    let name = last.strip_suffix(".git").unwrap_or(last);
    validate_name(name).ok()?;
    Some(name.to_string())
}

/// One `.lib` reference: a repository URL pinned to an optional revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibReference {
    pub name: String,
    pub url: String,
    pub rev: Option<String>,
}

impl LibReference {
    pub fn new(name: impl Into<String>, url: impl Into<String>, rev: Option<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            rev,
        }
    }

    /// Parse the text of `<name>.lib`.
    pub fn parse(name: &str, text: &str) -> Result<Self, ReferenceError> {
        let file = format!("{name}.{LIB_EXTENSION}");
        validate_name(name)?;
        let line = text
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or_else(|| ReferenceError::Empty { file: file.clone() })?;

        let (url, rev) = match line.split_once('#') {
            Some((url, rev)) => {
                let rev = rev.trim();
                if rev.is_empty() {
                    return Err(ReferenceError::EmptyRevision { file });
                }
                (url.trim(), Some(rev.to_string()))
            }
            None => (line, None),
        };
        if url.is_empty() {
            return Err(ReferenceError::MissingUrl { file });
        }
        validate_url(url)?;

        Ok(Self::new(name, url, rev))
    }

    /// Serialized form: `url` or `url#rev`.
    pub fn to_line(&self) -> String {
        match &self.rev {
            Some(rev) => format!("{}#{}", self.url, rev),
            None => self.url.clone(),
        }
    }

    /// Read a `.lib` file; the name is the file stem.
    pub fn read(path: &Path) -> Result<Self, ReferenceError> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| ReferenceError::InvalidName(path.display().to_string()))?;
        let text = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        Self::parse(name, &text)
    }

    /// Path of this reference's `.lib` file inside `dir`.
    pub fn file_in(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.{}", self.name, LIB_EXTENSION))
    }

    /// Write `<dir>/<name>.lib` and return its path.
    pub fn write(&self, dir: &Path) -> Result<PathBuf, ReferenceError> {
        validate_name(&self.name)?;
        let path = self.file_in(dir);
        std::fs::write(&path, format!("{}\n", self.to_line())).map_err(|e| io_err(&path, e))?;
        Ok(path)
    }
}

/// Whether a file name denotes a `.codes` file.
pub fn is_codes_file(file_name: &str) -> bool {
    file_name == ".codes"
        || Path::new(file_name)
            .extension()
            .is_some_and(|e| e == CODES_EXTENSION)
}

/// Whether a file name denotes a `.lib` file.
pub fn is_lib_file(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .is_some_and(|e| e == LIB_EXTENSION)
        && !file_name.starts_with('.')
}

/// Contents of a `.codes` file: component name → semver requirement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodesFile {
    #[serde(default)]
    pub components: BTreeMap<String, String>,
}

impl CodesFile {
    pub fn parse(file: &str, text: &str) -> Result<Self, ReferenceError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let codes: Self = serde_json::from_str(text).map_err(|e| ReferenceError::Malformed {
            file: file.to_string(),
            reason: e.to_string(),
        })?;
        for (name, req) in &codes.components {
            validate_name(name)?;
            parse_requirement(req).map_err(|e| ReferenceError::InvalidRequirement {
                file: file.to_string(),
                name: name.clone(),
                req: req.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(codes)
    }

    /// Read a `.codes` file. A missing file is empty.
    pub fn read(path: &Path) -> Result<Self, ReferenceError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        Self::parse(&path.display().to_string(), &text)
    }

    pub fn write(&self, path: &Path) -> Result<(), ReferenceError> {
        let json = serde_json::to_string_pretty(self).map_err(|e| ReferenceError::Malformed {
            file: path.display().to_string(),
            reason: e.to_string(),
        })?;
        std::fs::write(path, json + "\n").map_err(|e| io_err(path, e))
    }

    /// Add or replace an entry. Returns the previous requirement.
    pub fn insert(&mut self, name: &str, req: &str) -> Result<Option<String>, ReferenceError> {
        validate_name(name)?;
        parse_requirement(req).map_err(|e| ReferenceError::InvalidRequirement {
            file: String::from("<codes>"),
            name: name.to_string(),
            req: req.to_string(),
            reason: e.to_string(),
        })?;
        Ok(self.components.insert(name.to_string(), req.to_string()))
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.components.remove(name).is_some()
    }

    /// Entries with their parsed requirements.
    pub fn requirements(&self) -> Vec<(String, semver::VersionReq)> {
        self.components
            .iter()
            .filter_map(|(name, req)| parse_requirement(req).ok().map(|r| (name.clone(), r)))
            .collect()
    }
}

/// Parse a requirement string; blank means any version.
pub fn parse_requirement(req: &str) -> Result<semver::VersionReq, semver::Error> {
    let req = req.trim();
    if req.is_empty() {
        Ok(semver::VersionReq::STAR)
    } else {
        semver::VersionReq::parse(req)
    }
}
