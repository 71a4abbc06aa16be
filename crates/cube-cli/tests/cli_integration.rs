//! Integration tests for cube-cli functionality.
//! Tests the underlying library functions that the CLI commands invoke.

use cube_core::config::{Origin, Scope};
use cube_deploy::make::MakeCommand;
use cube_deploy::ops;
use cube_deploy::repo::Program;
use cube_deploy::sync::{Action, SyncOptions};
use cube_scm::ScmKind;
use git2::{Repository, Signature};
use std::path::Path;

fn commit_file(repo: &Repository, file: &str, content: &str) -> String {
    let workdir = repo.workdir().unwrap();
    std::fs::write(workdir.join(file), content).unwrap();
    let mut index = repo.index().unwrap();
    index.add_path(Path::new(file)).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::now("Cube Test", "test@example.com").unwrap();
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, "commit", &tree, &parents)
        .unwrap()
        .to_string()
}

#[test]
fn test_is_repository_url() {
    assert!(ops::is_repository_url("https://example.com/wifi.git"));
    assert!(ops::is_repository_url("git@example.com:org/wifi"));
    assert!(ops::is_repository_url("../wifi"));
    assert!(ops::is_repository_url("wifi.git"));
    assert!(!ops::is_repository_url("lwip"));
}

#[test]
fn test_import_destination() {
    let cwd = Path::new("/work");
    assert_eq!(
        ops::import_destination("https://example.com/org/blink.git", cwd).unwrap(),
        cwd.join("blink")
    );
    assert!(ops::import_destination("https://example.com/", cwd).is_err());
}

#[test]
fn test_new_program() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("app");
    let program = ops::new_program(&root, Some(ScmKind::Git)).unwrap();
    assert!(Program::is_program(&root));
    assert_eq!(program.name(), "app");
    assert_eq!(ScmKind::detect(&root), Some(ScmKind::Git));

    let (value, origin) = program.settings.lookup("scm").unwrap();
    assert_eq!(origin, Origin::Program);
    assert_eq!(value, "git");

    // A second `new` on the same directory is refused
    assert!(ops::new_program(&root, Some(ScmKind::Git)).is_err());
}

#[test]
fn test_config_program_scope() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("app");
    let mut program = ops::new_program(&root, Some(ScmKind::Git)).unwrap();

    program
        .settings
        .set(Scope::Program, "components_dir", "vendor")
        .unwrap();
    assert!(
        program
            .settings
            .set(Scope::Program, "components_dir", "../outside")
            .is_err()
    );

    let reopened = Program::find(&root).unwrap();
    assert_eq!(reopened.components_path().unwrap(), reopened.root.join("vendor"));
    let listed = reopened.settings.list();
    assert!(
        listed
            .iter()
            .any(|(k, v, o)| k == "components_dir" && v == "vendor" && *o == Origin::Program)
    );

    let mut settings = reopened.settings;
    assert!(settings.unset(Scope::Program, "components_dir").unwrap());
    assert!(!settings.unset(Scope::Program, "components_dir").unwrap());
}

#[test]
fn test_add_url_then_ls_and_status() {
    let tmp = tempfile::tempdir().unwrap();
    let upstream = tmp.path().join("upstream/wifi");
    let first = commit_file(&Repository::init(&upstream).unwrap(), "README", "one\n");

    let program = ops::new_program(&tmp.path().join("app"), Some(ScmKind::Git)).unwrap();
    let url = format!("{}#{}", upstream.display(), first);
    let (file, report) = ops::add_url(
        &program,
        &url,
        &program.root.join("lib"),
        SyncOptions::default(),
    )
    .unwrap();

    assert_eq!(file, program.root.join("lib/wifi.lib"));
    assert_eq!(report.actions.len(), 1);
    assert_eq!(report.actions[0].path, "lib/wifi");
    assert_eq!(report.actions[0].action, Action::Create);

    let tree = ops::list(&program).unwrap();
    assert_eq!(tree, format!("app\n  wifi @ {first}\n"));

    let statuses = ops::status(&program).unwrap();
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[0].path, "");
    assert_eq!(statuses[1].name, "wifi");
    assert_eq!(statuses[1].revision.as_deref(), Some(first.as_str()));
    assert!(!statuses[1].dirty);

    // The same reference cannot be added twice
    assert!(
        ops::add_url(&program, &url, &program.root.join("lib"), SyncOptions::default()).is_err()
    );
}

#[test]
fn test_add_url_outside_program() {
    let tmp = tempfile::tempdir().unwrap();
    let program = ops::new_program(&tmp.path().join("app"), Some(ScmKind::Git)).unwrap();
    let err = ops::add_url(
        &program,
        "https://example.com/wifi.git",
        tmp.path(),
        SyncOptions::default(),
    )
    .unwrap_err();
    assert!(err.to_string().contains("outside the program"));
}

#[test]
fn test_import_program_deploys_references() {
    let tmp = tempfile::tempdir().unwrap();
    let wifi = tmp.path().join("upstream/wifi");
    commit_file(&Repository::init(&wifi).unwrap(), "README", "wifi\n");
    let blink = tmp.path().join("upstream/blink");
    commit_file(
        &Repository::init(&blink).unwrap(),
        "wifi.lib",
        &format!("{}\n", wifi.display()),
    );

    let dest = tmp.path().join("work/blink");
    let (program, report) =
        ops::import_program(blink.to_str().unwrap(), &dest, SyncOptions::default()).unwrap();
    assert_eq!(program.name(), "blink");
    assert!(Program::is_program(&dest));
    assert_eq!(report.actions[0].name, "wifi");
    assert_eq!(report.actions[0].action, Action::Create);
    assert!(dest.join("wifi/README").is_file());

    assert!(ops::import_program(blink.to_str().unwrap(), &dest, SyncOptions::default()).is_err());
}

#[test]
fn test_make_command_uses_program_root() {
    let tmp = tempfile::tempdir().unwrap();
    let program = ops::new_program(&tmp.path().join("app"), Some(ScmKind::Git)).unwrap();
    let make = MakeCommand::new(&program).unwrap().args(["clean"]);
    assert!(make.display().contains(&format!("-C {}", program.root.display())));
    assert!(make.display().ends_with(" clean"));
}
