//! `.mk` component build descriptors.
//!
//! Only the two assignments that matter for dependency resolution are read:
//!
//! ```make
//! NAME := wifi
//! $(NAME)_COMPONENTS := lwip
//! $(NAME)_COMPONENTS += mbedtls
//! ```

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::walk;

/// Name and declared component dependencies of one descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Descriptor {
    pub name: String,
    pub components: Vec<String>,
}

/// Join backslash-continued lines and drop `#` comments.
fn logical_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for raw in text.lines() {
        let line = raw.split('#').next().unwrap_or("");
        if let Some(stripped) = line.trim_end().strip_suffix('\\') {
            current.push_str(stripped);
            current.push(' ');
            continue;
        }
        current.push_str(line);
        lines.push(std::mem::take(&mut current));
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Parse descriptor text. Returns `None` when no `NAME` is assigned.
pub fn parse(text: &str) -> Option<Descriptor> {
    static NAME_RE: OnceLock<Regex> = OnceLock::new();
    static COMPONENTS_RE: OnceLock<Regex> = OnceLock::new();
    let name_re = NAME_RE
        .get_or_init(|| Regex::new(r"^\s*NAME\s*[:?]?=\s*(\S+)\s*$").expect("valid regex"));
    let components_re = COMPONENTS_RE.get_or_init(|| {
        Regex::new(r"^\s*\$\(NAME\)_COMPONENTS\s*([:?+]?=)\s*(.*)$").expect("valid regex")
    });

    let mut name = None;
    let mut components: Vec<String> = Vec::new();
    for line in logical_lines(text) {
        if let Some(caps) = name_re.captures(&line) {
            name = Some(caps[1].to_string());
        } else if let Some(caps) = components_re.captures(&line) {
            if &caps[1] != "+=" {
                components.clear();
            }
            for dep in caps[2].split_whitespace() {
                if !components.iter().any(|c| c == dep) {
                    components.push(dep.to_string());
                }
            }
        }
    }

    name.map(|name| Descriptor { name, components })
}

/// Read and parse one descriptor file.
pub fn read(path: &Path) -> Result<Option<Descriptor>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(parse(&text))
}

/// A locally present component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalComponent {
    pub dir: PathBuf,
    pub descriptor: Descriptor,
}

/// Components declared by `.mk` files under `root`, keyed by name.
///
/// Nested checkouts and the directories in `skip` are not searched. When two
/// descriptors declare the same name, the first in path order is kept.
pub fn scan(root: &Path, skip: &[PathBuf]) -> BTreeMap<String, LocalComponent> {
    let mut registry: BTreeMap<String, LocalComponent> = BTreeMap::new();
    for path in walk::files(root, skip) {
        if path.extension().is_none_or(|e| e != "mk") {
            continue;
        }
        let descriptor = match read(&path) {
            Ok(Some(d)) => d,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!("skipping descriptor {}: {:#}", path.display(), e);
                continue;
            }
        };
        let dir = path.parent().unwrap_or(root).to_path_buf();
        if let Some(existing) = registry.get(&descriptor.name) {
            tracing::warn!(
                "component '{}' declared in both {} and {}; keeping the first",
                descriptor.name,
                existing.dir.display(),
                dir.display()
            );
            continue;
        }
        registry.insert(
            descriptor.name.clone(),
            LocalComponent { dir, descriptor },
        );
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_name_and_components() {
        let d = parse(
            "NAME := wifi\n\
             $(NAME)_SOURCES := wifi.c\n\
             $(NAME)_COMPONENTS := lwip \\\n    mbedtls\n\
             $(NAME)_COMPONENTS += ble lwip # trailing comment\n",
        )
        .unwrap();
        assert_eq!(d.name, "wifi");
        assert_eq!(d.components, vec!["lwip", "mbedtls", "ble"]);
    }

    #[test]
    fn test_assignment_replaces() {
        let d = parse("NAME = x\n$(NAME)_COMPONENTS += a\n$(NAME)_COMPONENTS := b\n").unwrap();
        assert_eq!(d.components, vec!["b"]);
    }

    #[test]
    fn test_no_name() {
        assert!(parse("$(NAME)_COMPONENTS := a\n").is_none());
        assert!(parse("# NAME := commented\n").is_none());
    }

    #[test]
    fn test_scan_registry() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("kernel/rhino")).unwrap();
        std::fs::create_dir_all(root.join("components/wifi")).unwrap();
        std::fs::create_dir_all(root.join("vendor/rhino")).unwrap();
        std::fs::write(root.join("kernel/rhino/rhino.mk"), "NAME := rhino\n").unwrap();
        std::fs::write(root.join("vendor/rhino/rhino.mk"), "NAME := rhino\n").unwrap();
        std::fs::write(root.join("components/wifi/wifi.mk"), "NAME := wifi\n").unwrap();
        std::fs::write(root.join("kernel/Makefile.mk"), "all:\n").unwrap();

        let registry = scan(root, &[root.join("components")]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry["rhino"].dir, root.join("kernel/rhino"));
    }
}
