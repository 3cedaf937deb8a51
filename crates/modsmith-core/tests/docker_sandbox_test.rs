//! Docker backend tests.
//!
//! The `#[ignore]`d tests need a reachable docker daemon and pull `alpine`;
//! run with `MODSMITH_LIVE_TESTS=1 cargo test -- --ignored`. The rest drive
//! the backend through a stand-in `docker` script that records its
//! arguments.

use std::sync::Arc;

use modsmith_core::sandbox::{DockerConfig, DockerSandbox, RunOptions, Sandbox, argv};
use modsmith_core::{Convention, Workspace, WorkspaceConfig};
use modsmith_test_utils::REVERSE_GO;

fn live() -> bool {
    std::env::var("MODSMITH_LIVE_TESTS").as_deref() == Ok("1")
}

fn sandbox() -> DockerSandbox {
    DockerSandbox::new(DockerConfig {
        extra_flags: Vec::new(),
        ..DockerConfig::default()
    })
}

/// Write a `docker` stand-in into `dir` that appends each invocation to
/// `dir/docker.log`, prints a container id for `create`, and drains stdin
/// for `exec -i`.
#[cfg(unix)]
fn recording_docker(dir: &std::path::Path) -> (String, std::path::PathBuf) {
    use std::os::unix::fs::PermissionsExt;

    let log = dir.join("docker.log");
    let script = dir.join("docker");
    std::fs::write(
        &script,
        format!(
            "#!/bin/sh\n\
             echo \"$*\" >> '{}'\n\
             [ \"$1\" = create ] && echo fake-container\n\
             [ \"$2\" = -i ] && cat > /dev/null\n\
             exit 0\n",
            log.display()
        ),
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    (script.display().to_string(), log)
}

#[cfg(unix)]
#[tokio::test]
async fn module_dir_exists_before_commands_run_in_it() {
    let tmp = tempfile::TempDir::new().unwrap();
    let (binary, log) = recording_docker(tmp.path());
    let sandbox = Arc::new(DockerSandbox::new(DockerConfig {
        binary,
        ..DockerConfig::default()
    }));

    let ws = Workspace::new(WorkspaceConfig::new(Convention::Go, "reverser"), sandbox)
        .unwrap()
        .write(REVERSE_GO);
    let env = ws.materialize().await.unwrap();
    env.discard().await.unwrap();

    let calls: Vec<String> = std::fs::read_to_string(&log)
        .unwrap()
        .lines()
        .map(str::to_owned)
        .collect();
    assert!(calls[0].starts_with("create --name modsmith-"), "{calls:?}");
    assert!(calls[0].contains("/var/run/docker.sock"), "{calls:?}");

    let install = calls
        .iter()
        .position(|c| c.ends_with("apk add curl docker-cli"))
        .unwrap_or_else(|| panic!("no docker-cli install in {calls:?}"));
    let mkdir = calls
        .iter()
        .position(|c| c.ends_with("mkdir -p /mod"))
        .unwrap_or_else(|| panic!("no mkdir in {calls:?}"));
    let first_in_mod = calls
        .iter()
        .position(|c| c.contains("-w /mod"))
        .unwrap_or_else(|| panic!("nothing ran in /mod: {calls:?}"));

    assert!(install < mkdir);
    assert!(mkdir < first_in_mod);
    assert!(calls[mkdir].contains("-w / "), "{}", calls[mkdir]);
    assert!(calls[first_in_mod].contains("dagger init --name reverser --sdk go"));
    assert_eq!(calls.last().unwrap(), "rm -f fake-container");
}

#[tokio::test]
#[ignore]
async fn files_round_trip_through_container() {
    if !live() {
        return;
    }
    let mut env = sandbox().provision("alpine").await.unwrap();
    env.run(&argv(["mkdir", "-p", "/work"]), RunOptions::default()).await.unwrap();
    env.set_workdir("/work");
    env.put_file("nested/dir/it's here.txt", "hello\nworld\n")
        .await
        .unwrap();
    assert_eq!(
        env.read_file("/work/nested/dir/it's here.txt").await.unwrap(),
        "hello\nworld\n"
    );
    env.discard().await.unwrap();
    env.discard().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn exit_status_is_data_when_any_is_expected() {
    if !live() {
        return;
    }
    let mut env = sandbox().provision("alpine").await.unwrap();
    env.set_env("GREETING", "hi");

    let script = argv(["sh", "-c", "echo $GREETING; echo oops >&2; exit 3"]);
    let options = RunOptions {
        expect: modsmith_core::Expect::Any,
        ..RunOptions::default()
    };
    let out = env.run(&script, options).await.unwrap();
    assert_eq!(out.exit_code, Some(3));
    assert_eq!(out.stdout.trim(), "hi");
    assert_eq!(out.stderr.trim(), "oops");

    let err = env
        .run(&argv(["false"]), RunOptions::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("false"));
    env.discard().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn unknown_image_fails_to_provision() {
    if !live() {
        return;
    }
    let err = sandbox()
        .provision("modsmith.invalid/does-not-exist:never")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("docker create"));
}

#[tokio::test]
#[ignore]
async fn workspace_materializes_in_docker() {
    if !live() {
        return;
    }
    let ws = Workspace::new(
        WorkspaceConfig::new(Convention::Go, "reverser"),
        Arc::new(DockerSandbox::new(DockerConfig::default())),
    )
    .unwrap()
    .write(REVERSE_GO);

    let env = ws.materialize().await.unwrap();
    assert_eq!(env.workdir(), "/mod");
    assert_eq!(env.read_file("main.go").await.unwrap(), REVERSE_GO);
    assert!(env.read_file("/mod/dagger.json").await.is_ok());
    env.discard().await.unwrap();

    let out = ws.verify().await.unwrap();
    assert!(out.contains("reverse"), "{out}");
}
