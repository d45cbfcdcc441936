use std::path::Path;
use std::process::Command;

use relay_core::filter::PathFilter;
use relay_core::status::{BuildError, ChangeSetBuilder, RepoPath, StatusKind};
use tempfile::TempDir;

fn run_git(dir: &Path, args: &[&str]) {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&out.stderr)
    );
}

fn write(dir: &Path, rel: &str, text: &str) {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, text).unwrap();
}

/// Repo with one commit holding `src/app.py`, `lib/utils.py` and `old.py`.
fn init_test_repo() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    run_git(dir, &["init", "-q"]);
    run_git(dir, &["config", "user.email", "test@relay.dev"]);
    run_git(dir, &["config", "user.name", "Relay Test"]);
    write(dir, "src/app.py", "print('app')\n");
    write(dir, "lib/utils.py", "def util():\n    pass\n");
    write(dir, "old.py", "print('old module with enough text to detect a rename')\n");
    run_git(dir, &["add", "."]);
    run_git(dir, &["commit", "-q", "-m", "init"]);
    tmp
}

#[tokio::test]
async fn staged_unstaged_and_renamed_changes() {
    let repo = init_test_repo();
    let dir = repo.path();
    write(dir, "src/app.py", "print('changed')\n");
    run_git(dir, &["add", "src/app.py"]);
    write(dir, "lib/utils.py", "def util():\n    return 1\n");
    run_git(dir, &["mv", "old.py", "new.py"]);

    let set = ChangeSetBuilder::default().build(dir).await.unwrap();

    assert!(set.warnings().is_empty(), "{:?}", set.warnings());
    let rows: Vec<(String, String)> = set
        .entries()
        .iter()
        .map(|e| (e.code().to_string(), e.path().to_string()))
        .collect();
    assert_eq!(
        rows,
        [
            (" M".to_string(), "lib/utils.py".to_string()),
            ("R ".to_string(), "new.py".to_string()),
            ("M ".to_string(), "src/app.py".to_string()),
        ]
    );

    let renamed = set.get(&RepoPath::from("new.py")).unwrap();
    assert_eq!(renamed.kind(), StatusKind::Renamed);
    assert_eq!(renamed.renamed_from().unwrap().to_string(), "old.py");

    let staged = set.get(&RepoPath::from("src/app.py")).unwrap();
    assert!(staged.code().is_staged());
    assert!(!staged.code().is_unstaged());
    assert_eq!(set.absolute_path(staged), dir.join("src/app.py"));
}

#[tokio::test]
async fn untracked_files_are_listed_individually() {
    let repo = init_test_repo();
    let dir = repo.path();
    write(dir, "notes/todo.txt", "x\n");
    write(dir, "notes/deep/more.txt", "y\n");
    write(dir, "my file.txt", "z\n");

    let set = ChangeSetBuilder::default().build(dir).await.unwrap();

    let paths: Vec<String> = set.entries().iter().map(|e| e.path().to_string()).collect();
    assert!(paths.contains(&"notes/todo.txt".to_string()), "{paths:?}");
    assert!(paths.contains(&"notes/deep/more.txt".to_string()), "{paths:?}");
    assert!(paths.contains(&"my file.txt".to_string()), "{paths:?}");
    assert!(set.entries().iter().all(|e| e.kind() == StatusKind::Untracked));
}

#[tokio::test]
async fn clean_repo_gives_empty_set() {
    let repo = init_test_repo();
    let set = ChangeSetBuilder::default().build(repo.path()).await.unwrap();
    assert!(set.is_empty());
}

#[tokio::test]
async fn deleted_and_excluded_files_are_not_analysis_candidates() {
    let repo = init_test_repo();
    let dir = repo.path();
    std::fs::remove_file(dir.join("lib/utils.py")).unwrap();
    write(dir, "src/app.py", "print('changed')\n");
    write(dir, "package-lock.json", "{}\n");
    write(dir, "assets/logo.png", "png");

    let set = ChangeSetBuilder::default().build(dir).await.unwrap();
    let filter = PathFilter::with_defaults::<&str>(&[]).unwrap();
    let candidates: Vec<String> = set
        .analysis_candidates(&filter)
        .iter()
        .map(|e| e.path().to_string())
        .collect();

    assert_eq!(candidates, ["src/app.py"]);
}

#[tokio::test]
async fn plain_directory_is_not_a_repository() {
    let tmp = TempDir::new().unwrap();
    let err = ChangeSetBuilder::default().build(tmp.path()).await.unwrap_err();
    assert!(matches!(err, BuildError::NotARepository { .. }), "{err:?}");
}

#[tokio::test]
async fn missing_root_is_reported() {
    let tmp = TempDir::new().unwrap();
    let err = ChangeSetBuilder::default()
        .build(&tmp.path().join("gone"))
        .await
        .unwrap_err();
    assert!(matches!(err, BuildError::RootMissing { .. }), "{err:?}");
}
