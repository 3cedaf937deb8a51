//! Execution substrate abstraction.
//!
//! A [`Sandbox`] provisions isolated [`Environment`]s from a base image.
//! Environments accept files, environment variables and tool installs, and
//! run commands with captured output. The docker backend lives in
//! [`docker`]; tests substitute an in-memory fake.

pub mod docker;

use anyhow::{Result, bail};
use async_trait::async_trait;

pub use docker::{DockerConfig, DockerSandbox};

/// How a command's exit status is treated by [`Environment::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expect {
    /// A non-zero exit is an error.
    #[default]
    Success,
    /// Any exit status is returned as data.
    Any,
}

/// Per-command execution flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Run with elevated privileges (needed to nest container engines).
    pub privileged: bool,
    pub expect: Expect,
}

impl RunOptions {
    /// Privileged, and any exit status accepted.
    pub fn privileged_any() -> Self {
        Self {
            privileged: true,
            expect: Expect::Any,
        }
    }

    /// Privileged, success required.
    pub fn privileged() -> Self {
        Self {
            privileged: true,
            expect: Expect::Success,
        }
    }
}

/// Captured result of a command run inside an environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code, or `None` if the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// A tool to install into an environment: environment variables to set
/// first, then shell commands run in order, each required to succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    pub name: String,
    pub env: Vec<(String, String)>,
    pub commands: Vec<Vec<String>>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            env: Vec::new(),
            commands: Vec::new(),
        }
    }

    /// Set an environment variable before the install commands run.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Append an install command.
    pub fn command<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commands.push(argv.into_iter().map(Into::into).collect());
        self
    }
}

/// Provisions isolated environments.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Human-readable backend name (e.g. "docker").
    fn name(&self) -> &str;

    /// Create a fresh environment from `base_image`.
    async fn provision(&self, base_image: &str) -> Result<Box<dyn Environment>>;
}

/// A provisioned, isolated filesystem + process environment.
#[async_trait]
pub trait Environment: Send + Sync + std::fmt::Debug {
    /// Backend-specific identifier (container ID for docker).
    fn id(&self) -> &str;

    /// Set an environment variable for subsequent commands.
    fn set_env(&mut self, key: &str, value: &str);

    /// Set the working directory for subsequent commands and relative paths.
    /// The directory must already exist; commands fail to start otherwise.
    fn set_workdir(&mut self, path: &str);

    /// Current working directory.
    fn workdir(&self) -> &str;

    /// Write `contents` to `path`, creating parent directories.
    async fn put_file(&self, path: &str, contents: &str) -> Result<()>;

    /// Read the file at `path`.
    async fn read_file(&self, path: &str) -> Result<String>;

    /// Run `argv` and capture its output.
    ///
    /// With [`Expect::Success`] a non-zero exit becomes an error that
    /// carries stderr; with [`Expect::Any`] it is returned as data.
    async fn run(&self, argv: &[String], options: RunOptions) -> Result<ExecOutput>;

    /// Tear the environment down. Further calls fail.
    async fn discard(&self) -> Result<()>;

    /// Install a tool: apply its environment, then run each install command.
    async fn install_tool(&mut self, spec: &ToolSpec) -> Result<()> {
        for (key, value) in &spec.env {
            self.set_env(key, value);
        }
        for argv in &spec.commands {
            let output = self.run(argv, RunOptions::default()).await?;
            if !output.success() {
                bail!(
                    "installing {} failed at `{}`: {}",
                    spec.name,
                    argv.join(" "),
                    output.stderr.trim()
                );
            }
        }
        Ok(())
    }
}

/// Build an owned argv from string slices.
pub fn argv<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parts.into_iter().map(Into::into).collect()
}
