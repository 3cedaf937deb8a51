//! Integration tests for the `modsmith` binary's offline commands.

use std::process::Command;

fn modsmith() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_modsmith"));
    cmd.env("RUST_LOG", "off");
    cmd
}

#[test]
fn path_prints_canonical_locations() {
    let cases = [
        ("go", "main.go"),
        ("python", "src/reverser/main.py"),
        ("typescript", "src/index.ts"),
        ("php", "src/Reverser.php"),
        ("java", "src/main/java/io/dagger/modules/reverser/Reverser.java"),
    ];
    for (convention, expected) in cases {
        let out = modsmith()
            .args(["path", convention, "--name"])
            .arg(if convention == "python" { "reverser" } else { "Reverser" })
            .output()
            .unwrap();
        assert!(out.status.success(), "{convention}: {out:?}");
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), expected);
    }
}

#[test]
fn reference_reads_local_docs() {
    let docs = tempfile::TempDir::new().unwrap();
    let snippet = docs
        .path()
        .join("docs/current_docs/api/snippets/services/bind-services/go/main.go");
    std::fs::create_dir_all(snippet.parent().unwrap()).unwrap();
    std::fs::write(&snippet, "package main\n").unwrap();

    let config = tempfile::TempDir::new().unwrap();
    let out = modsmith()
        .env("XDG_CONFIG_HOME", config.path())
        .args(["reference", "go", "--name", "reverser", "--docs-dir"])
        .arg(docs.path())
        .output()
        .unwrap();
    assert!(out.status.success(), "{out:?}");
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.starts_with("Reference for using Dagger with the go SDK"));
    assert!(stdout.contains("```go\npackage main\n```"));
}

#[test]
fn reference_for_missing_snippet_fails() {
    let docs = tempfile::TempDir::new().unwrap();
    let config = tempfile::TempDir::new().unwrap();
    let out = modsmith()
        .env("XDG_CONFIG_HOME", config.path())
        .args(["reference", "python", "--docs-dir"])
        .arg(docs.path())
        .output()
        .unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("failed to fetch"));
}

#[test]
fn init_writes_config_and_refuses_to_overwrite() {
    let config = tempfile::TempDir::new().unwrap();
    let run = || {
        modsmith()
            .env("XDG_CONFIG_HOME", config.path())
            .arg("init")
            .output()
            .unwrap()
    };

    let first = run();
    assert!(first.status.success(), "{first:?}");
    let written = std::fs::read_to_string(config.path().join("modsmith/config.toml")).unwrap();
    assert!(written.contains("[model]"));
    assert!(written.contains("max_turns = 50"));
    assert!(!written.contains("api_key"));

    let second = run();
    assert!(!second.status.success());
    assert!(String::from_utf8_lossy(&second.stderr).contains("--force"));
}
