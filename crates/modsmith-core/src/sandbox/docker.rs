//! Docker sandbox backend.
//!
//! Each environment is a long-lived container (`sleep infinity`) created
//! from the requested image. Nothing on the host is bind-mounted except
//! what [`DockerConfig::extra_flags`] asks for. Files go in through
//! `docker exec -i ... cat > path`, commands run through `docker exec`.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Environment, ExecOutput, Expect, RunOptions, Sandbox};

/// Configuration for the docker backend.
#[derive(Debug, Clone)]
pub struct DockerConfig {
    /// Docker CLI binary. Defaults to `"docker"` (found via `$PATH`).
    pub binary: String,
    /// Additional flags to pass to `docker create`.
    pub extra_flags: Vec<String>,
}

impl DockerConfig {
    /// Flags applied when none are configured: expose the host daemon so
    /// the `dagger` CLI inside the container can start its engine. That
    /// also needs the `docker` CLI inside the image; verification installs
    /// `docker-cli` alongside `curl` for this.
    pub fn default_extra_flags() -> Vec<String> {
        vec![
            "-v".to_string(),
            "/var/run/docker.sock:/var/run/docker.sock".to_string(),
        ]
    }
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            extra_flags: Self::default_extra_flags(),
        }
    }
}

/// Sandbox backend that provisions docker containers.
#[derive(Debug, Clone, Default)]
pub struct DockerSandbox {
    config: DockerConfig,
}

impl DockerSandbox {
    pub fn new(config: DockerConfig) -> Self {
        Self { config }
    }

    /// Build a unique container name.
    fn container_name() -> String {
        format!("modsmith-{}", Uuid::new_v4().simple())
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    fn name(&self) -> &str {
        "docker"
    }

    async fn provision(&self, base_image: &str) -> Result<Box<dyn Environment>> {
        let name = Self::container_name();

        let mut args = vec![
            "create".to_string(),
            "--name".to_string(),
            name.clone(),
        ];
        args.extend(self.config.extra_flags.iter().cloned());
        args.push(base_image.to_string());
        args.push("sleep".to_string());
        args.push("infinity".to_string());

        let output = Command::new(&self.config.binary)
            .args(&args)
            .output()
            .await
            .context("failed to run docker create")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("docker create {base_image} failed: {stderr}");
        }

        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();

        let start_output = Command::new(&self.config.binary)
            .args(["start", &container_id])
            .output()
            .await
            .context("failed to run docker start")?;

        if !start_output.status.success() {
            let stderr = String::from_utf8_lossy(&start_output.stderr);
            let _ = Command::new(&self.config.binary)
                .args(["rm", "-f", &container_id])
                .output()
                .await;
            bail!("docker start failed: {stderr}");
        }

        info!(container = %name, image = base_image, "provisioned docker environment");

        Ok(Box::new(DockerEnvironment {
            binary: self.config.binary.clone(),
            container_id,
            workdir: "/".to_string(),
            env: Vec::new(),
            discarded: AtomicBool::new(false),
        }))
    }
}

/// A running container.
///
/// Dropping an environment that was never [`discard`](Environment::discard)ed
/// fires a best-effort `docker rm -f` without waiting for it.
#[derive(Debug)]
pub struct DockerEnvironment {
    binary: String,
    container_id: String,
    workdir: String,
    env: Vec<(String, String)>,
    discarded: AtomicBool,
}

impl DockerEnvironment {
    /// Common `docker exec` prefix: workdir, env, privilege.
    fn exec_args(&self, privileged: bool, interactive: bool) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        if interactive {
            args.push("-i".to_string());
        }
        if privileged {
            args.push("--privileged".to_string());
        }
        args.push("-w".to_string());
        args.push(self.workdir.clone());
        for (key, value) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(self.container_id.clone());
        args
    }

    fn ensure_live(&self) -> Result<()> {
        if self.discarded.load(Ordering::SeqCst) {
            bail!("environment {} has been discarded", self.container_id);
        }
        Ok(())
    }
}

#[async_trait]
impl Environment for DockerEnvironment {
    fn id(&self) -> &str {
        &self.container_id
    }

    fn set_env(&mut self, key: &str, value: &str) {
        self.env.retain(|(k, _)| k != key);
        self.env.push((key.to_string(), value.to_string()));
    }

    fn set_workdir(&mut self, path: &str) {
        self.workdir = path.to_string();
    }

    fn workdir(&self) -> &str {
        &self.workdir
    }

    async fn put_file(&self, path: &str, contents: &str) -> Result<()> {
        self.ensure_live()?;

        // The path travels as a positional argument so it is never parsed
        // by the shell.
        let mut args = self.exec_args(false, true);
        args.extend([
            "sh".to_string(),
            "-c".to_string(),
            r#"mkdir -p "$(dirname "$1")" && cat > "$1""#.to_string(),
            "sh".to_string(),
            path.to_string(),
        ]);

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to run docker exec for file copy")?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(contents.as_bytes())
                .await
                .with_context(|| format!("failed to stream {path} into container"))?;
        }

        let output = child
            .wait_with_output()
            .await
            .context("failed to wait on docker exec")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("writing {path} into {} failed: {stderr}", self.container_id);
        }

        debug!(path, bytes = contents.len(), "copied file into container");
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let output = self
            .run(
                &["cat".to_string(), path.to_string()],
                RunOptions::default(),
            )
            .await
            .with_context(|| format!("failed to read {path} from container"))?;
        Ok(output.stdout)
    }

    async fn run(&self, argv: &[String], options: RunOptions) -> Result<ExecOutput> {
        self.ensure_live()?;
        if argv.is_empty() {
            bail!("cannot run an empty command");
        }

        let mut args = self.exec_args(options.privileged, false);
        args.extend(argv.iter().cloned());

        debug!(command = %argv.join(" "), privileged = options.privileged, "docker exec");

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("failed to execute `{}` in container", argv.join(" ")))?;

        let result = ExecOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if options.expect == Expect::Success && !result.success() {
            bail!(
                "`{}` exited with {:?}: {}",
                argv.join(" "),
                result.exit_code,
                result.stderr.trim()
            );
        }

        Ok(result)
    }

    async fn discard(&self) -> Result<()> {
        if self.discarded.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let output = Command::new(&self.binary)
            .args(["rm", "-f", &self.container_id])
            .output()
            .await
            .context("failed to run docker rm")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // Don't fail if container is already gone.
            if !stderr.contains("No such container") {
                bail!("docker rm -f {} failed: {stderr}", self.container_id);
            }
        }

        debug!(container = %self.container_id, "discarded docker environment");
        Ok(())
    }
}

impl Drop for DockerEnvironment {
    fn drop(&mut self) {
        if self.discarded.load(Ordering::SeqCst) {
            return;
        }
        let spawned = std::process::Command::new(&self.binary)
            .args(["rm", "-f", &self.container_id])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        if let Err(e) = spawned {
            warn!(container = %self.container_id, err = %e, "failed to remove container on drop");
        }
    }
}
