//! Drives a model through a workspace until its module verifies.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::manifest::{MANIFEST_FILE, ModuleManifest};
use super::tools::WorkspaceTools;
use crate::convention::Convention;
use crate::llm::Model;
use crate::llm::anthropic::DEFAULT_MAX_TOKENS;
use crate::reference::{DocumentSource, GitDocumentSource, ReferenceProvider};
use crate::sandbox::{Environment, Sandbox};
use crate::session::{DEFAULT_MAX_TURNS, Session, StopReason};
use crate::workspace::{
    BASE_IMAGE, DEFAULT_RUNTIME_VERSION, Verification, Workspace, WorkspaceConfig,
};

/// Instructions for generating a module from a task description.
pub const GENERATE_PROMPT: &str = include_str!("prompts/generate.md");

/// Instructions for translating a module between conventions.
pub const TRANSLATE_PROMPT: &str = include_str!("prompts/translate.md");

/// Tunables for [`AgentDriver`].
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Template for generation sessions. Sees `assignment`, `convention`,
    /// `file_path` and `reference`.
    pub prompt_template: String,
    /// Template for translation sessions. Additionally sees
    /// `source_convention`, `source_code` and `source_reference`.
    pub translate_template: String,
    pub max_turns: usize,
    pub max_tokens: u32,
    /// Runtime version for workspaces the driver creates itself.
    pub runtime_version: String,
    /// Base image for workspaces the driver creates itself.
    pub base_image: String,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            prompt_template: GENERATE_PROMPT.to_string(),
            translate_template: TRANSLATE_PROMPT.to_string(),
            max_turns: DEFAULT_MAX_TURNS,
            max_tokens: DEFAULT_MAX_TOKENS,
            runtime_version: DEFAULT_RUNTIME_VERSION.to_string(),
            base_image: BASE_IMAGE.to_string(),
        }
    }
}

/// Where to find a module to translate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslateSource {
    pub repo: String,
    pub revision: String,
    /// Directory of the module inside the repository; empty for the root.
    pub subpath: String,
}

impl TranslateSource {
    /// The module at the root of `repo`'s default branch.
    pub fn new(repo: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            revision: "HEAD".to_string(),
            subpath: String::new(),
        }
    }

    pub fn revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    pub fn subpath(mut self, subpath: impl Into<String>) -> Self {
        self.subpath = subpath.into();
        self
    }
}

/// The result of one agent run.
#[derive(Debug)]
pub struct Generation {
    /// The workspace as the last `write` left it.
    pub workspace: Workspace,
    /// Verification run once more after the session ended.
    pub verification: Verification,
    /// Text of the model's final reply.
    pub last_reply: String,
    pub stop: StopReason,
    pub turns: usize,
    pub tool_calls: usize,
}

/// Runs the generate-verify loop.
pub struct AgentDriver {
    model: Arc<dyn Model>,
    sandbox: Arc<dyn Sandbox>,
    references: Option<ReferenceProvider>,
    documents: Arc<dyn DocumentSource>,
    config: DriverConfig,
}

impl std::fmt::Debug for AgentDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentDriver")
            .field("model", &self.model.name())
            .field("sandbox", &self.sandbox.name())
            .field("references", &self.references.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl AgentDriver {
    /// A driver without reference snippets that fetches translation
    /// sources with git.
    pub fn new(model: Arc<dyn Model>, sandbox: Arc<dyn Sandbox>) -> Self {
        Self {
            model,
            sandbox,
            references: None,
            documents: Arc::new(GitDocumentSource::new()),
            config: DriverConfig::default(),
        }
    }

    /// Put reference snippets for the target convention into every prompt.
    pub fn with_references(mut self, provider: ReferenceProvider) -> Self {
        self.references = Some(provider);
        self
    }

    /// Where translation sources are fetched from.
    pub fn with_documents(mut self, source: Arc<dyn DocumentSource>) -> Self {
        self.documents = source;
        self
    }

    pub fn with_config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// An empty workspace on this driver's sandbox.
    pub fn workspace(&self, convention: Convention, project_name: &str) -> Result<Workspace> {
        let config = WorkspaceConfig::new(convention, project_name)
            .runtime_version(&self.config.runtime_version)
            .base_image(&self.config.base_image);
        Ok(Workspace::new(config, Arc::clone(&self.sandbox))?)
    }

    /// Run the loop on `workspace` and return the final module, provisioned
    /// and initialised, for the caller to inspect or export.
    ///
    /// A module that still fails verification is returned all the same;
    /// the failure is logged.
    pub async fn generate(&self, workspace: Workspace, task: &str) -> Result<Box<dyn Environment>> {
        let generation = self.run(workspace, task).await?;
        let env = generation
            .workspace
            .materialize()
            .await
            .context("failed to materialize the generated workspace")?;
        Ok(env)
    }

    /// Run the loop on `workspace` with `task` as the assignment.
    pub async fn run(&self, workspace: Workspace, task: &str) -> Result<Generation> {
        let convention = workspace.convention();
        let reference = self
            .reference_for(convention.as_str(), workspace.project_name())
            .await?;

        let session = self
            .session(&self.config.prompt_template)
            .with_prompt_var("assignment", task)
            .with_prompt_var("convention", convention.as_str())
            .with_prompt_var("file_path", workspace.file_path())
            .with_prompt_var("reference", reference);

        info!(%convention, project = workspace.project_name(), "starting generation");
        self.drive(session, workspace).await
    }

    /// Translate the module at `source` into `target`.
    ///
    /// The module name and source convention come from the module's
    /// `dagger.json`; the translation keeps the name.
    pub async fn translate(
        &self,
        source: &TranslateSource,
        target: Convention,
    ) -> Result<Generation> {
        let tree = self
            .documents
            .fetch_tree(&source.repo, &source.revision)
            .await?;
        let module = if source.subpath.trim_matches('/').is_empty() {
            tree
        } else {
            tree.subdirectory(&source.subpath)
        };

        let manifest = ModuleManifest::parse(&module.file(MANIFEST_FILE).await?)
            .with_context(|| format!("failed to read the manifest of {}", source.repo))?;
        let source_path = manifest.convention.module_file_path(&manifest.name);
        let source_code = module
            .file(&source_path)
            .await
            .with_context(|| format!("failed to read the {} module file", manifest.convention))?;

        let workspace = self.workspace(target, &manifest.name)?;
        let reference = self.reference_for(target.as_str(), &manifest.name).await?;
        let source_reference = self
            .reference_for(manifest.convention.as_str(), &manifest.name)
            .await?;

        let session = self
            .session(&self.config.translate_template)
            .with_prompt_var("source_convention", manifest.convention.as_str())
            .with_prompt_var("source_code", source_code)
            .with_prompt_var("source_reference", source_reference)
            .with_prompt_var("convention", target.as_str())
            .with_prompt_var("file_path", workspace.file_path())
            .with_prompt_var("reference", reference);

        info!(
            repo = %source.repo,
            module = %manifest.name,
            from = %manifest.convention,
            to = %target,
            "starting translation"
        );
        self.drive(session, workspace).await
    }

    fn session(&self, template: &str) -> Session {
        Session::new(Arc::clone(&self.model))
            .with_prompt_template(template)
            .with_max_turns(self.config.max_turns)
            .with_max_tokens(self.config.max_tokens)
    }

    /// Reference text, or empty when no provider is configured.
    async fn reference_for(&self, convention: &str, project_name: &str) -> Result<String> {
        match &self.references {
            Some(provider) => provider
                .get_reference(convention, project_name)
                .await
                .with_context(|| format!("failed to fetch the {convention} reference")),
            None => Ok(String::new()),
        }
    }

    async fn drive(&self, session: Session, workspace: Workspace) -> Result<Generation> {
        let outcome = session.run(WorkspaceTools::new(workspace)).await?;
        let (last_reply, stop, turns, tool_calls) = (
            outcome.last_reply.clone(),
            outcome.stop,
            outcome.turns,
            outcome.tool_calls,
        );
        let workspace = outcome.into_binding().into_workspace();

        // The model's own claim that the module passes is not trusted.
        let verification = workspace
            .check()
            .await
            .context("final verification failed to run")?;
        if verification.ok {
            info!(
                %stop,
                turns,
                tool_calls,
                digest = %workspace.digest(),
                "generated module verifies"
            );
        } else {
            warn!(
                %stop,
                turns,
                tool_calls,
                output = %verification.output.trim(),
                "generated module does not verify"
            );
        }

        Ok(Generation {
            workspace,
            verification,
            last_reply,
            stop,
            turns,
            tool_calls,
        })
    }
}
