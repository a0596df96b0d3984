use std::fs;

use fakturator::cleanup::{clean_project, PROTECTED_PATHS};

#[test]
fn test_clean_never_deletes_protected_paths() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    for name in ["app", "config", "src"] {
        fs::create_dir_all(root.join(name)).unwrap();
        fs::write(root.join(name).join("keep.txt"), b"keep").unwrap();
    }
    for name in ["requirements.txt", "README.md", "Cargo.toml", "run.sh", "run.ps1"] {
        fs::write(root.join(name), b"keep").unwrap();
    }
    fs::create_dir_all(root.join("logs/screenshots")).unwrap();
    fs::create_dir_all(root.join("target/release")).unwrap();
    fs::create_dir_all(root.join(".venv")).unwrap();
    fs::write(root.join("fakturator.log"), b"old").unwrap();

    let outcome = clean_project(root, |_| true).unwrap();

    assert_eq!(outcome.planned, 4);
    assert_eq!(outcome.deleted, 4);
    for name in PROTECTED_PATHS {
        assert!(root.join(name).exists(), "{} was deleted", name);
    }
    assert!(root.join("config/keep.txt").exists());
    assert!(!root.join("logs").exists());
    assert!(!root.join("target").exists());
    assert!(!root.join(".venv").exists());
    assert!(!root.join("fakturator.log").exists());
}

#[test]
fn test_clean_requires_confirmation() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("logs")).unwrap();

    let outcome = clean_project(dir.path(), |plan| {
        assert_eq!(plan.targets.len(), 1);
        false
    })
    .unwrap();

    assert_eq!(outcome.deleted, 0);
    assert!(dir.path().join("logs").exists());
}
