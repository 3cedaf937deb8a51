//! The single-file module workspace an agent edits.
//!
//! A [`Workspace`] is a value: every [`write`](Workspace::write) returns a
//! new workspace and leaves the old one intact. Verification provisions a
//! fresh sandbox environment each time, initialises a Dagger module of the
//! workspace's convention in it, drops the tracked file in place, and asks
//! the `dagger` CLI to list the module's functions.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::convention::{Convention, ConventionError};
use crate::reference::{ReferenceError, ReferenceProvider};
use crate::sandbox::{Environment, ExecOutput, RunOptions, Sandbox, ToolSpec, argv};
use crate::tree::Tree;

/// Runtime version used when none is configured.
pub const DEFAULT_RUNTIME_VERSION: &str = "latest";

/// Image verification environments start from unless configured otherwise.
pub const BASE_IMAGE: &str = "alpine";

/// Directory inside the environment where the module project lives.
pub const MODULE_DIR: &str = "/mod";

/// Where the install script puts the `dagger` binary.
pub const DAGGER_BIN: &str = "/usr/local/bin/dagger";

/// Packages the base image needs before the install script runs. The
/// `dagger` CLI starts its engine through the `docker` CLI.
const BASE_PACKAGES: [&str; 2] = ["curl", "docker-cli"];

const DAGGER_INSTALL_SCRIPT: &str =
    "curl -fsSL https://dl.dagger.io/dagger/install.sh | BIN_DIR=/usr/local/bin sh";

/// Errors from workspace operations.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// The canonical file has never been written and was not seeded.
    #[error("no file at {path}: nothing has been written to the workspace yet")]
    NotFound { path: String },

    #[error(transparent)]
    Convention(#[from] ConventionError),

    #[error("invalid project name {name:?}: {reason}")]
    InvalidProjectName { name: String, reason: &'static str },

    #[error("runtime version must not be empty")]
    EmptyRuntimeVersion,

    /// Provisioning or running something in the sandbox failed.
    #[error(transparent)]
    Sandbox(#[from] anyhow::Error),
}

/// Construction parameters for a [`Workspace`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceConfig {
    pub convention: Convention,
    pub project_name: String,
    /// Version of the introspection tool installed during verification.
    pub runtime_version: String,
    /// Image provisioned for verification. Must provide `apk` and `sh`.
    pub base_image: String,
}

impl WorkspaceConfig {
    /// Config with the default runtime version.
    pub fn new(convention: Convention, project_name: impl Into<String>) -> Self {
        Self {
            convention,
            project_name: project_name.into(),
            runtime_version: DEFAULT_RUNTIME_VERSION.to_string(),
            base_image: BASE_IMAGE.to_string(),
        }
    }

    /// Parse the convention from its name.
    pub fn parse(
        convention: &str,
        project_name: impl Into<String>,
    ) -> Result<Self, WorkspaceError> {
        Ok(Self::new(convention.parse()?, project_name))
    }

    /// Set the runtime version.
    pub fn runtime_version(mut self, version: impl Into<String>) -> Self {
        self.runtime_version = version.into();
        self
    }

    /// Set the image verification environments start from.
    pub fn base_image(mut self, image: impl Into<String>) -> Self {
        self.base_image = image.into();
        self
    }

    /// Check the project name and runtime version.
    ///
    /// The project name becomes a path component and a module name, so it
    /// must start with an ASCII letter and contain only ASCII
    /// alphanumerics, `-` and `_`. The convention may narrow this further
    /// (see [`Convention::check_project_name`]).
    pub fn validate(&self) -> Result<(), WorkspaceError> {
        let name = &self.project_name;
        let invalid = |reason| WorkspaceError::InvalidProjectName {
            name: name.clone(),
            reason,
        };
        let first = name.chars().next().ok_or_else(|| invalid("must not be empty"))?;
        if !first.is_ascii_alphabetic() {
            return Err(invalid("must start with an ASCII letter"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(invalid("only ASCII letters, digits, '-' and '_' are allowed"));
        }
        self.convention.check_project_name(name).map_err(invalid)?;
        if self.runtime_version.trim().is_empty() {
            return Err(WorkspaceError::EmptyRuntimeVersion);
        }
        Ok(())
    }
}

/// Structured outcome of a verification run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    /// Whether the introspection command exited 0.
    pub ok: bool,
    pub exit_code: Option<i32>,
    /// Stdout on success, stderr otherwise.
    pub output: String,
}

impl From<ExecOutput> for Verification {
    fn from(out: ExecOutput) -> Self {
        let ok = out.success();
        Self {
            ok,
            exit_code: out.exit_code,
            output: if ok { out.stdout } else { out.stderr },
        }
    }
}

/// A single tracked module file inside a virtual directory.
#[derive(Clone)]
pub struct Workspace {
    config: WorkspaceConfig,
    tree: Tree,
    seed: Tree,
    sandbox: Arc<dyn Sandbox>,
}

impl fmt::Debug for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workspace")
            .field("config", &self.config)
            .field("digest", &self.tree.digest())
            .field("sandbox", &self.sandbox.name())
            .finish()
    }
}

impl Workspace {
    /// Create an empty workspace.
    pub fn new(config: WorkspaceConfig, sandbox: Arc<dyn Sandbox>) -> Result<Self, WorkspaceError> {
        Self::with_tree(config, Tree::new(), sandbox)
    }

    /// Create a workspace starting from `tree`.
    ///
    /// Only the canonical path of `tree` is ever read back, but every file
    /// in it is copied into verification environments.
    pub fn with_tree(
        config: WorkspaceConfig,
        tree: Tree,
        sandbox: Arc<dyn Sandbox>,
    ) -> Result<Self, WorkspaceError> {
        config.validate()?;
        Ok(Self {
            config,
            seed: tree.clone(),
            tree,
            sandbox,
        })
    }

    pub fn convention(&self) -> Convention {
        self.config.convention
    }

    pub fn project_name(&self) -> &str {
        &self.config.project_name
    }

    pub fn runtime_version(&self) -> &str {
        &self.config.runtime_version
    }

    /// Digest of the current snapshot.
    pub fn digest(&self) -> String {
        self.tree.digest()
    }

    /// Canonical file path for `convention`, or for this workspace's own
    /// convention when `None`. Always uses this workspace's project name.
    pub fn sdk_file_path(&self, convention: Option<Convention>) -> String {
        convention
            .unwrap_or(self.config.convention)
            .module_file_path(&self.config.project_name)
    }

    /// This workspace's canonical file path.
    pub fn file_path(&self) -> String {
        self.sdk_file_path(None)
    }

    /// Return a workspace whose canonical file holds exactly `content`.
    pub fn write(&self, content: &str) -> Workspace {
        let path = self.file_path();
        let tree = self.tree.with_new_file(&path, content);
        debug!(path = %path, bytes = content.len(), digest = %tree.digest(), "workspace write");
        Workspace {
            config: self.config.clone(),
            tree,
            seed: self.seed.clone(),
            sandbox: Arc::clone(&self.sandbox),
        }
    }

    /// Contents of the canonical file.
    pub fn read(&self) -> Result<String, WorkspaceError> {
        let path = self.file_path();
        self.tree
            .file(&path)
            .map(str::to_owned)
            .ok_or(WorkspaceError::NotFound { path })
    }

    /// Return the workspace as it was constructed.
    pub fn reset(&self) -> Workspace {
        Workspace {
            config: self.config.clone(),
            tree: self.seed.clone(),
            seed: self.seed.clone(),
            sandbox: Arc::clone(&self.sandbox),
        }
    }

    /// The installer for the `dagger` CLI at this workspace's runtime version.
    pub fn introspection_tool(&self) -> ToolSpec {
        ToolSpec::new("dagger")
            .env("DAGGER_VERSION", &self.config.runtime_version)
            .command(["apk", "add"].into_iter().chain(BASE_PACKAGES))
            .command(["sh", "-c", DAGGER_INSTALL_SCRIPT])
    }

    /// Provision an environment with the module initialised and the
    /// workspace files in place.
    ///
    /// Fails with [`WorkspaceError::NotFound`] before provisioning anything
    /// if the canonical file is absent.
    pub async fn materialize(&self) -> Result<Box<dyn Environment>, WorkspaceError> {
        let path = self.file_path();
        let contents = self.read()?;

        let mut env = self.sandbox.provision(&self.config.base_image).await?;
        info!(
            env = env.id(),
            convention = %self.config.convention,
            project = %self.config.project_name,
            "materializing workspace"
        );

        if let Err(e) = self.prepare(env.as_mut(), &path, &contents).await {
            if let Err(discard_err) = env.discard().await {
                warn!(env = env.id(), err = %discard_err, "failed to discard environment");
            }
            return Err(e.into());
        }
        Ok(env)
    }

    async fn prepare(
        &self,
        env: &mut dyn Environment,
        path: &str,
        contents: &str,
    ) -> anyhow::Result<()> {
        env.install_tool(&self.introspection_tool()).await?;
        env.run(&argv(["mkdir", "-p", MODULE_DIR]), RunOptions::default()).await?;
        env.set_workdir(MODULE_DIR);
        env.run(
            &argv([
                DAGGER_BIN,
                "init",
                "--name",
                &self.config.project_name,
                "--sdk",
                self.config.convention.as_str(),
            ]),
            RunOptions::privileged(),
        )
        .await?;

        for (file, body) in self.tree.entries().filter(|(p, _)| *p != path) {
            env.put_file(file, body).await?;
        }
        env.put_file(path, contents).await?;
        Ok(())
    }

    /// Run the introspection command and report the result.
    pub async fn check(&self) -> Result<Verification, WorkspaceError> {
        let env = self.materialize().await?;
        let run = env
            .run(&argv([DAGGER_BIN, "functions"]), RunOptions::privileged_any())
            .await;
        if let Err(e) = env.discard().await {
            warn!(env = env.id(), err = %e, "failed to discard verification environment");
        }

        let verification = Verification::from(run?);
        info!(
            ok = verification.ok,
            exit_code = ?verification.exit_code,
            digest = %self.digest(),
            "workspace verified"
        );
        Ok(verification)
    }

    /// Verify the workspace, returning the tool's stdout on success and its
    /// stderr on failure. A failing module is not an error.
    pub async fn verify(&self) -> Result<String, WorkspaceError> {
        Ok(self.check().await?.output)
    }

    /// [`verify`](Self::verify) under its public name.
    pub async fn test(&self) -> Result<String, WorkspaceError> {
        self.verify().await
    }

    /// Reference text for `convention` (this workspace's own if `None`),
    /// naming the file path this workspace would use.
    pub async fn reference(
        &self,
        provider: &ReferenceProvider,
        convention: Option<&str>,
    ) -> Result<String, ReferenceError> {
        let convention = convention.unwrap_or(self.config.convention.as_str());
        provider
            .get_reference(convention, &self.config.project_name)
            .await
    }
}
