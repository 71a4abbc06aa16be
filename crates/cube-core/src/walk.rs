//! Source-tree walking shared by reference and descriptor scans.

use std::path::{Path, PathBuf};

/// Whether `dir` is the root of a git or Mercurial checkout.
pub fn is_checkout(dir: &Path) -> bool {
    dir.join(".git").exists() || dir.join(".hg").exists()
}

/// Walker over `root` that never follows links, never enters hidden
/// directories or `skip`, and never looks inside a nested checkout. With
/// `yield_checkouts` a nested checkout's own directory is still reported.
fn walker(root: &Path, skip: &[PathBuf], yield_checkouts: bool) -> ignore::Walk {
    let skip = skip.to_vec();
    ignore::WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(move |entry| {
            if entry.depth() == 0 {
                return true;
            }
            if entry.depth() > 1 && entry.path().parent().is_some_and(is_checkout) {
                return false;
            }
            if !entry.file_type().is_some_and(|t| t.is_dir()) {
                return true;
            }
            let hidden = entry.file_name().to_str().is_some_and(|n| n.starts_with('.'));
            !hidden
                && !skip.iter().any(|s| s == entry.path())
                && (yield_checkouts || !is_checkout(entry.path()))
        })
        .build()
}

/// Files under `root`, sorted, without entering hidden directories, nested
/// checkouts or any directory in `skip`.
pub fn files(root: &Path, skip: &[PathBuf]) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walker(root, skip, false)
        .flatten()
        .filter(|e| e.file_type().is_some_and(|t| t.is_file()))
        .map(ignore::DirEntry::into_path)
        .collect();
    files.sort();
    files
}

/// Nested checkouts under `root` (not `root` itself), sorted, outside `skip`.
pub fn checkouts(root: &Path, skip: &[PathBuf]) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = walker(root, skip, true)
        .flatten()
        .filter(|e| e.depth() > 0 && e.file_type().is_some_and(|t| t.is_dir()))
        .filter(|e| is_checkout(e.path()))
        .map(ignore::DirEntry::into_path)
        .collect();
    found.sort();
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skips_nested_checkouts_and_hidden_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::create_dir_all(root.join("dep/.git")).unwrap();
        std::fs::create_dir_all(root.join(".cube")).unwrap();
        std::fs::create_dir_all(root.join("out")).unwrap();
        std::fs::write(root.join("src/a.lib"), "x").unwrap();
        std::fs::write(root.join("dep/b.lib"), "x").unwrap();
        std::fs::write(root.join(".cube/c.lib"), "x").unwrap();
        std::fs::write(root.join("out/d.lib"), "x").unwrap();
        std::fs::write(root.join(".codes"), "{}").unwrap();

        let found = files(root, &[root.join("out")]);
        assert_eq!(found, vec![root.join(".codes"), root.join("src/a.lib")]);
    }

    #[test]
    fn test_is_checkout() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!is_checkout(tmp.path()));
        std::fs::create_dir(tmp.path().join(".hg")).unwrap();
        assert!(is_checkout(tmp.path()));
    }

    #[test]
    fn test_checkouts() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("lib/wifi/.git")).unwrap();
        std::fs::create_dir_all(root.join("lib/wifi/inner/.git")).unwrap();
        std::fs::create_dir_all(root.join("ble/.hg")).unwrap();
        std::fs::create_dir_all(root.join("components/lwip/.git")).unwrap();
        std::fs::create_dir_all(root.join("src")).unwrap();

        let found = checkouts(root, &[root.join("components")]);
        assert_eq!(found, vec![root.join("ble"), root.join("lib/wifi")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_not_followed() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::create_dir_all(root.join("outside/ble/.git")).unwrap();
        std::fs::write(root.join("src/a.lib"), "x").unwrap();
        std::os::unix::fs::symlink(root, root.join("src/loop")).unwrap();
        std::os::unix::fs::symlink(root.join("outside"), root.join("src/linked")).unwrap();

        let src = root.join("src");
        assert_eq!(files(&src, &[]), vec![src.join("a.lib")]);
        assert!(checkouts(&src, &[]).is_empty());
    }
}
