//! Building core components from a resolved [`ModsmithConfig`].

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use modsmith_core::agent::DriverConfig;
use modsmith_core::llm::{AnthropicModel, Model};
use modsmith_core::reference::{
    DEFAULT_DOCS_ROOT, DocumentSource, GitDocumentSource, LocalDocumentSource, ReferenceConfig,
    ReferenceProvider,
};
use modsmith_core::sandbox::{DockerConfig, DockerSandbox, Sandbox};
use modsmith_core::{AgentDriver, Convention, Tree, Workspace, WorkspaceConfig};

use crate::config::ModsmithConfig;

/// The model backend. Needs `ANTHROPIC_API_KEY`.
pub fn model(config: &ModsmithConfig) -> Result<Arc<dyn Model>> {
    let api_key = std::env::var("ANTHROPIC_API_KEY")
        .context("ANTHROPIC_API_KEY is not set; export it to use a model")?;
    debug!(model = %config.model, base_url = %config.base_url, "using Anthropic model");
    Ok(Arc::new(AnthropicModel::with_base_url(
        api_key,
        &config.model,
        config.base_url.clone(),
    )))
}

pub fn sandbox(config: &ModsmithConfig) -> Arc<dyn Sandbox> {
    Arc::new(DockerSandbox::new(DockerConfig {
        extra_flags: config.extra_flags.clone(),
        ..DockerConfig::default()
    }))
}

/// Where documents come from: a local checkout if given, otherwise git.
pub fn documents(docs_dir: Option<&Path>) -> Arc<dyn DocumentSource> {
    match docs_dir {
        Some(dir) => Arc::new(LocalDocumentSource::new(dir)),
        None => Arc::new(
            GitDocumentSource::new().with_sparse_paths(vec![DEFAULT_DOCS_ROOT.to_string()]),
        ),
    }
}

pub fn references(config: &ModsmithConfig, docs_dir: Option<&Path>) -> ReferenceProvider {
    ReferenceProvider::new(
        documents(docs_dir),
        ReferenceConfig {
            remote: config.remote.clone(),
            revision: config.revision.clone(),
            ..ReferenceConfig::default()
        },
    )
}

pub fn driver_config(config: &ModsmithConfig, runtime_version: Option<&str>) -> DriverConfig {
    let mut driver = DriverConfig {
        max_turns: config.max_turns,
        max_tokens: config.max_tokens,
        base_image: config.base_image.clone(),
        ..DriverConfig::default()
    };
    if let Some(version) = runtime_version {
        driver.runtime_version = version.to_string();
    }
    driver
}

/// A driver with the configured model and sandbox. Translation sources are
/// always fetched with git.
pub fn driver(
    config: &ModsmithConfig,
    runtime_version: Option<&str>,
    references: Option<ReferenceProvider>,
) -> Result<AgentDriver> {
    let mut driver = AgentDriver::new(model(config)?, sandbox(config))
        .with_config(driver_config(config, runtime_version));
    if let Some(provider) = references {
        driver = driver.with_references(provider);
    }
    Ok(driver)
}

/// A workspace for `convention`, optionally seeded from a local file placed
/// at the canonical path.
pub fn workspace(
    config: &ModsmithConfig,
    convention: Convention,
    name: &str,
    runtime_version: Option<&str>,
    seed: Option<&Path>,
) -> Result<Workspace> {
    let mut ws_config = WorkspaceConfig::new(convention, name).base_image(&config.base_image);
    if let Some(version) = runtime_version {
        ws_config = ws_config.runtime_version(version);
    }

    let tree = match seed {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read seed file {}", path.display()))?;
            Tree::new().with_new_file(&convention.module_file_path(name), contents)
        }
        None => Tree::new(),
    };
    Ok(Workspace::with_tree(ws_config, tree, sandbox(config))?)
}
