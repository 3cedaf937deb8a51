//! Workspace verification against the in-memory sandbox.

use std::sync::Arc;

use modsmith_core::{Convention, Tree, Workspace, WorkspaceConfig, WorkspaceError};
use modsmith_test_utils::{BROKEN_GO, FakeSandbox, REVERSE_GO, Step};

fn go_workspace(sandbox: Arc<FakeSandbox>) -> Workspace {
    Workspace::new(WorkspaceConfig::new(Convention::Go, "reverser"), sandbox).unwrap()
}

#[tokio::test]
async fn verify_lists_functions_of_a_valid_module() {
    let sandbox = FakeSandbox::new();
    let log = sandbox.log();
    let ws = go_workspace(sandbox).write(REVERSE_GO);

    let out = ws.verify().await.unwrap();
    assert!(out.contains("reverse"), "{out}");

    assert_eq!(log.provisioned(), 1);
    assert_eq!(log.discarded(), 1);
    let commands = log.commands();
    assert_eq!(commands[0], "apk add curl docker-cli");
    assert!(commands.contains(&"/usr/local/bin/dagger init --name reverser --sdk go".to_string()));
    assert_eq!(commands.last().unwrap(), "/usr/local/bin/dagger functions");
}

#[tokio::test]
async fn runtime_version_is_exported_before_install() {
    let sandbox = FakeSandbox::new();
    let log = sandbox.log();
    let config = WorkspaceConfig::new(Convention::Go, "reverser").runtime_version("v0.16.0");
    let ws = Workspace::new(config, sandbox).unwrap().write(REVERSE_GO);

    ws.verify().await.unwrap();

    let steps = log.steps();
    let pinned = Step::Env("DAGGER_VERSION".into(), "v0.16.0".into());
    let set_at = steps.iter().position(|s| *s == pinned).unwrap();
    let apk_at = steps
        .iter()
        .position(|s| *s == Step::Command("apk add curl docker-cli".into()))
        .unwrap();
    assert!(set_at < apk_at, "{steps:?}");
}

#[tokio::test]
async fn module_dir_is_created_before_init() {
    let sandbox = FakeSandbox::new();
    let log = sandbox.log();
    go_workspace(sandbox).write(REVERSE_GO).verify().await.unwrap();

    let commands = log.commands();
    let mkdir = commands.iter().position(|c| c == "mkdir -p /mod").unwrap();
    let init = commands
        .iter()
        .position(|c| c.ends_with("dagger init --name reverser --sdk go"))
        .unwrap();
    assert!(mkdir < init, "{commands:?}");
}

#[tokio::test]
async fn failing_module_returns_stderr_not_error() {
    let ws = go_workspace(FakeSandbox::new()).write(BROKEN_GO);
    let check = ws.check().await.unwrap();
    assert!(!check.ok);
    assert_eq!(check.exit_code, Some(1));
    assert!(check.output.contains("syntax error"), "{}", check.output);

    let text = ws.test().await.unwrap();
    assert_eq!(text, check.output);
}

#[tokio::test]
async fn each_verification_uses_a_fresh_environment() {
    let sandbox = FakeSandbox::new();
    let log = sandbox.log();
    let ws = go_workspace(sandbox).write(REVERSE_GO);

    ws.verify().await.unwrap();
    ws.verify().await.unwrap();

    assert_eq!(log.provisioned(), 2);
    assert_eq!(log.discarded(), 2);
    let installs = log
        .commands()
        .iter()
        .filter(|c| c.as_str() == "apk add curl docker-cli")
        .count();
    assert_eq!(installs, 2);
}

#[tokio::test]
async fn verify_before_write_does_not_provision() {
    let sandbox = FakeSandbox::new();
    let log = sandbox.log();
    let err = go_workspace(sandbox).verify().await.unwrap_err();
    assert!(matches!(err, WorkspaceError::NotFound { .. }));
    assert_eq!(log.provisioned(), 0);
}

#[tokio::test]
async fn unavailable_sandbox_is_an_error() {
    let ws = go_workspace(FakeSandbox::unavailable()).write(REVERSE_GO);
    let err = ws.verify().await.unwrap_err();
    assert!(matches!(err, WorkspaceError::Sandbox(_)));
}

#[tokio::test]
async fn materialize_places_tree_and_canonical_file() {
    let tree = Tree::from_files([("README.md", "hello"), ("main.go", "stale")]);
    let ws = Workspace::with_tree(
        WorkspaceConfig::new(Convention::Go, "reverser"),
        tree,
        FakeSandbox::new(),
    )
    .unwrap()
    .write(REVERSE_GO);

    let env = ws.materialize().await.unwrap();
    assert_eq!(env.workdir(), "/mod");
    assert_eq!(env.read_file("main.go").await.unwrap(), REVERSE_GO);
    assert_eq!(env.read_file("/mod/README.md").await.unwrap(), "hello");
    env.discard().await.unwrap();
}

#[tokio::test]
async fn python_module_lives_under_project_package() {
    let ws = Workspace::new(
        WorkspaceConfig::new(Convention::Python, "reverser"),
        FakeSandbox::new(),
    )
    .unwrap()
    .write("class Reverser:\n    def reverse(self, s: str) -> str:\n        return s[::-1]\n");

    let env = ws.materialize().await.unwrap();
    assert!(env.read_file("src/reverser/main.py").await.is_ok());

    let out = ws.verify().await.unwrap();
    assert!(out.contains("reverse"), "{out}");
}
