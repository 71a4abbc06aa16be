use cube_scm::{GitScm, Scm, ScmError, ScmKind};
use git2::{Repository, Signature};
use std::path::Path;

/// Write `content` to `file` and commit it, returning the new commit id.
fn commit_file(repo: &Repository, file: &str, content: &str, message: &str) -> String {
    let workdir = repo.workdir().unwrap();
    std::fs::write(workdir.join(file), content).unwrap();
    let mut index = repo.index().unwrap();
    index.add_path(Path::new(file)).unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let sig = Signature::now("Cube Test", "test@example.com").unwrap();
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .unwrap()
        .to_string()
}

fn upstream_repo(dir: &Path) -> (Repository, String, String) {
    let repo = Repository::init(dir).unwrap();
    let first = commit_file(&repo, "README", "one\n", "first");
    repo.tag_lightweight(
        "v1.0.0",
        &repo.find_object(git2::Oid::from_str(&first).unwrap(), None).unwrap(),
        false,
    )
    .unwrap();
    let second = commit_file(&repo, "README", "two\n", "second");
    (repo, first, second)
}

#[test]
fn test_clone_tracks_head_and_remote() {
    let tmp = tempfile::tempdir().unwrap();
    let (_repo, _first, second) = upstream_repo(&tmp.path().join("upstream"));
    let dest = tmp.path().join("checkout");

    let git = GitScm;
    git.clone_repo(tmp.path().join("upstream").to_str().unwrap(), &dest, None)
        .unwrap();

    assert_eq!(ScmKind::detect(&dest), Some(ScmKind::Git));
    assert_eq!(git.revision(&dest).unwrap(), second);
    assert!(!git.is_dirty(&dest).unwrap());
    assert_eq!(
        git.remote_url(&dest).unwrap().as_deref(),
        tmp.path().join("upstream").to_str()
    );
}

#[test]
fn test_clone_at_tag_and_is_at() {
    let tmp = tempfile::tempdir().unwrap();
    let (_repo, first, second) = upstream_repo(&tmp.path().join("upstream"));
    let dest = tmp.path().join("checkout");

    let git = GitScm;
    git.clone_repo(
        tmp.path().join("upstream").to_str().unwrap(),
        &dest,
        Some("v1.0.0"),
    )
    .unwrap();

    assert_eq!(git.revision(&dest).unwrap(), first);
    assert_eq!(std::fs::read_to_string(dest.join("README")).unwrap(), "one\n");
    assert!(git.is_at(&dest, "v1.0.0").unwrap());
    assert!(git.is_at(&dest, &first).unwrap());
    assert!(!git.is_at(&dest, &second).unwrap());
    assert!(!git.is_at(&dest, "no-such-ref").unwrap());

    git.checkout(&dest, &second).unwrap();
    assert_eq!(std::fs::read_to_string(dest.join("README")).unwrap(), "two\n");
}

#[test]
fn test_unknown_revision() {
    let tmp = tempfile::tempdir().unwrap();
    upstream_repo(&tmp.path().join("upstream"));
    let dest = tmp.path().join("checkout");
    let git = GitScm;
    git.clone_repo(tmp.path().join("upstream").to_str().unwrap(), &dest, None)
        .unwrap();

    let err = git.checkout(&dest, "does-not-exist").unwrap_err();
    assert!(matches!(err, ScmError::UnknownRevision { .. }));
}

#[test]
fn test_dirty_ignores_untracked() {
    let tmp = tempfile::tempdir().unwrap();
    upstream_repo(&tmp.path().join("upstream"));
    let dest = tmp.path().join("checkout");
    let git = GitScm;
    git.clone_repo(tmp.path().join("upstream").to_str().unwrap(), &dest, None)
        .unwrap();

    std::fs::write(dest.join("untracked.txt"), "x").unwrap();
    assert!(!git.is_dirty(&dest).unwrap());

    std::fs::write(dest.join("README"), "edited\n").unwrap();
    assert!(git.is_dirty(&dest).unwrap());
}

#[test]
fn test_update_fast_forwards_branch() {
    let tmp = tempfile::tempdir().unwrap();
    let (upstream, _first, second) = upstream_repo(&tmp.path().join("upstream"));
    let dest = tmp.path().join("checkout");
    let git = GitScm;
    git.clone_repo(tmp.path().join("upstream").to_str().unwrap(), &dest, None)
        .unwrap();
    assert_eq!(git.revision(&dest).unwrap(), second);

    let third = commit_file(&upstream, "README", "three\n", "third");
    git.update(&dest, None).unwrap();

    assert_eq!(git.revision(&dest).unwrap(), third);
    assert_eq!(
        std::fs::read_to_string(dest.join("README")).unwrap(),
        "three\n"
    );

    // Already up to date: no-op
    git.update(&dest, None).unwrap();
    assert_eq!(git.revision(&dest).unwrap(), third);
}

#[test]
fn test_update_detached_head_needs_revision() {
    let tmp = tempfile::tempdir().unwrap();
    let (_upstream, first, _second) = upstream_repo(&tmp.path().join("upstream"));
    let dest = tmp.path().join("checkout");
    let git = GitScm;
    git.clone_repo(
        tmp.path().join("upstream").to_str().unwrap(),
        &dest,
        Some(first.as_str()),
    )
    .unwrap();

    let err = git.update(&dest, None).unwrap_err();
    assert!(matches!(err, ScmError::Unsupported { .. }));
}

#[test]
fn test_init_without_remote() {
    let tmp = tempfile::tempdir().unwrap();
    let git = GitScm;
    git.init(tmp.path()).unwrap();
    assert_eq!(ScmKind::detect(tmp.path()), Some(ScmKind::Git));
    assert!(git.remote_url(tmp.path()).unwrap().is_none());
    // No remote: fetch is a no-op
    git.fetch(tmp.path()).unwrap();
}
