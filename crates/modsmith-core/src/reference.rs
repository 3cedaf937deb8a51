//! Curated reference snippets for grounding the agent in a convention.
//!
//! The provider fetches a revision of a documentation tree through a
//! [`DocumentSource`], reads one snippet per curated topic for the
//! requested convention, and renders them under a banner that names the
//! file the agent is expected to write. Nothing is cached; every call
//! fetches again.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::convention::Convention;

/// Documentation repository used when none is configured.
pub const DEFAULT_REMOTE: &str = "https://github.com/dagger/dagger";

/// Revision fetched when none is configured.
pub const DEFAULT_REVISION: &str = "HEAD";

/// Directory inside the repository that holds the topic snippets.
pub const DEFAULT_DOCS_ROOT: &str = "docs/current_docs";

/// Errors from reference retrieval.
#[derive(Debug, Error)]
pub enum ReferenceError {
    /// The document tree or a snippet inside it could not be retrieved.
    #[error("failed to fetch {location}: {reason}")]
    RemoteFetchFailed { location: String, reason: String },
}

impl ReferenceError {
    fn fetch(location: impl Into<String>, reason: impl ToString) -> Self {
        ReferenceError::RemoteFetchFailed {
            location: location.into(),
            reason: reason.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Document trees
// ---------------------------------------------------------------------------

/// A checked-out document tree, or a subdirectory of one.
#[derive(Debug, Clone)]
pub struct DocTree {
    root: PathBuf,
    label: String,
    /// Keeps a scratch checkout alive for as long as any handle exists.
    _checkout: Option<Arc<tempfile::TempDir>>,
}

impl DocTree {
    /// A tree rooted at a local directory.
    pub fn local(root: impl Into<PathBuf>, label: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            label: label.into(),
            _checkout: None,
        }
    }

    fn checkout(dir: tempfile::TempDir, label: String) -> Self {
        Self {
            root: dir.path().to_path_buf(),
            label,
            _checkout: Some(Arc::new(dir)),
        }
    }

    /// Descend into `path`. Existence is only checked when a file is read.
    pub fn subdirectory(&self, path: &str) -> DocTree {
        DocTree {
            root: self.root.join(relative(path)),
            label: format!("{}/{}", self.label, path.trim_matches('/')),
            _checkout: self._checkout.clone(),
        }
    }

    /// Read the file at `path`.
    pub async fn file(&self, path: &str) -> Result<String, ReferenceError> {
        let location = format!("{}/{}", self.label, path.trim_matches('/'));
        let rel = relative(path);
        if rel.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(ReferenceError::fetch(location, "path escapes the document tree"));
        }
        tokio::fs::read_to_string(self.root.join(rel))
            .await
            .map_err(|e| ReferenceError::fetch(location, e))
    }
}

fn relative(path: &str) -> &Path {
    Path::new(path.trim_start_matches('/'))
}

/// Fetches a revision of a remote document tree.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch_tree(&self, remote: &str, revision: &str) -> Result<DocTree, ReferenceError>;
}

/// Fetches trees with a shallow, optionally sparse, `git` checkout into a
/// scratch directory.
#[derive(Debug, Clone)]
pub struct GitDocumentSource {
    binary: String,
    sparse_paths: Vec<String>,
}

impl GitDocumentSource {
    /// Use `git` from `$PATH` and check out the whole tree.
    pub fn new() -> Self {
        Self {
            binary: "git".to_string(),
            sparse_paths: Vec::new(),
        }
    }

    /// Only materialize these directories.
    pub fn with_sparse_paths(mut self, paths: Vec<String>) -> Self {
        self.sparse_paths = paths;
        self
    }

    async fn git(&self, dir: &Path, args: &[&str], location: &str) -> Result<(), ReferenceError> {
        debug!(args = %args.join(" "), "git");
        let output = Command::new(&self.binary)
            .args(args)
            .current_dir(dir)
            .output()
            .await
            .map_err(|e| ReferenceError::fetch(location, format!("failed to run git: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ReferenceError::fetch(
                location,
                format!("git {} failed: {}", args.join(" "), stderr.trim()),
            ));
        }
        Ok(())
    }
}

impl Default for GitDocumentSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentSource for GitDocumentSource {
    async fn fetch_tree(&self, remote: &str, revision: &str) -> Result<DocTree, ReferenceError> {
        let location = format!("{remote}@{revision}");
        let dir = tempfile::TempDir::new()
            .map_err(|e| ReferenceError::fetch(&location, format!("scratch dir: {e}")))?;
        let path = dir.path();

        self.git(path, &["init", "--quiet"], &location).await?;
        self.git(path, &["remote", "add", "origin", remote], &location).await?;
        if !self.sparse_paths.is_empty() {
            self.git(path, &["config", "core.sparseCheckout", "true"], &location).await?;
            let patterns: String = self
                .sparse_paths
                .iter()
                .map(|p| format!("/{}/\n", p.trim_matches('/')))
                .collect();
            let info_dir = path.join(".git/info");
            tokio::fs::create_dir_all(&info_dir)
                .await
                .map_err(|e| ReferenceError::fetch(&location, format!("sparse patterns: {e}")))?;
            tokio::fs::write(info_dir.join("sparse-checkout"), patterns)
                .await
                .map_err(|e| ReferenceError::fetch(&location, format!("sparse patterns: {e}")))?;
        }
        let fetch = ["fetch", "--quiet", "--depth", "1", "origin", revision];
        self.git(path, &fetch, &location).await?;
        self.git(path, &["checkout", "--quiet", "FETCH_HEAD"], &location).await?;

        info!(remote, revision, "fetched document tree");
        Ok(DocTree::checkout(dir, location))
    }
}

/// Serves a local directory regardless of remote and revision.
#[derive(Debug, Clone)]
pub struct LocalDocumentSource {
    root: PathBuf,
}

impl LocalDocumentSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl DocumentSource for LocalDocumentSource {
    async fn fetch_tree(&self, _remote: &str, _revision: &str) -> Result<DocTree, ReferenceError> {
        if !self.root.is_dir() {
            return Err(ReferenceError::fetch(
                self.root.display().to_string(),
                "not a directory",
            ));
        }
        Ok(DocTree::local(&self.root, self.root.display().to_string()))
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// A curated topic: label shown to the model, and its snippet directory
/// relative to the docs root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub label: String,
    pub path: String,
}

impl Topic {
    pub fn new(label: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            path: path.into(),
        }
    }
}

/// Where and what to fetch.
#[derive(Debug, Clone)]
pub struct ReferenceConfig {
    pub remote: String,
    pub revision: String,
    pub docs_root: String,
    pub topics: Vec<Topic>,
}

impl ReferenceConfig {
    /// The topic set handed to the model by default. Kept small so the
    /// prompt is not flooded.
    pub fn default_topics() -> Vec<Topic> {
        vec![Topic::new(
            "bind services to containers",
            "api/snippets/services/bind-services",
        )]
    }
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            remote: DEFAULT_REMOTE.to_string(),
            revision: DEFAULT_REVISION.to_string(),
            docs_root: DEFAULT_DOCS_ROOT.to_string(),
            topics: Self::default_topics(),
        }
    }
}

/// Snippets for one convention, ready to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceBundle {
    pub convention: Convention,
    /// The path an agent working in this convention should write to.
    pub file_path: String,
    /// `(topic label, snippet source)` in topic order.
    pub snippets: Vec<(String, String)>,
}

impl ReferenceBundle {
    /// Banner, target path, then one fenced block per topic.
    pub fn render(&self) -> String {
        let c = self.convention;
        let mut out = format!("Reference for using Dagger with the {c} SDK\n");
        out.push_str(&format!(
            "The relevant code for a {c} SDK module is at \"{}\"\n",
            self.file_path
        ));
        for (label, code) in &self.snippets {
            let fence = fence_for(code);
            out.push_str(&format!(
                "\n{label}:\n{fence}{lang}\n{code}\n{fence}\n",
                lang = c.fence_language(),
                code = code.trim_end_matches('\n'),
            ));
        }
        out
    }
}

/// A backtick fence longer than any backtick run inside `code`.
fn fence_for(code: &str) -> String {
    let longest = code
        .split(|ch: char| ch != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    "`".repeat(longest.max(2) + 1)
}

/// Assembles reference text from a [`DocumentSource`].
#[derive(Clone)]
pub struct ReferenceProvider {
    source: Arc<dyn DocumentSource>,
    config: ReferenceConfig,
}

impl std::fmt::Debug for ReferenceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceProvider")
            .field("config", &self.config)
            .finish()
    }
}

impl ReferenceProvider {
    pub fn new(source: Arc<dyn DocumentSource>, config: ReferenceConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &ReferenceConfig {
        &self.config
    }

    /// Fetch the snippets for `convention`.
    ///
    /// A convention outside the table has no snippet to fetch and fails
    /// the same way a missing snippet does.
    pub async fn bundle(
        &self,
        convention: &str,
        project_name: &str,
    ) -> Result<ReferenceBundle, ReferenceError> {
        let convention: Convention = convention.parse().map_err(|_| {
            ReferenceError::fetch(
                format!("{}/*/{convention}", self.config.docs_root),
                format!("no snippet path is configured for convention {convention:?}"),
            )
        })?;

        let tree = self
            .source
            .fetch_tree(&self.config.remote, &self.config.revision)
            .await?;
        let docs = tree.subdirectory(&self.config.docs_root);

        let reads = self.config.topics.iter().map(|topic| {
            let path = format!(
                "{}/{}/{}",
                topic.path.trim_matches('/'),
                convention,
                convention.snippet_path()
            );
            let docs = &docs;
            async move {
                let code = docs.file(&path).await?;
                Ok::<_, ReferenceError>((topic.label.clone(), code))
            }
        });
        let snippets = try_join_all(reads).await?;

        debug!(%convention, topics = snippets.len(), "assembled reference bundle");
        Ok(ReferenceBundle {
            convention,
            file_path: convention.module_file_path(project_name),
            snippets,
        })
    }

    /// Rendered reference text for `convention`.
    pub async fn get_reference(
        &self,
        convention: &str,
        project_name: &str,
    ) -> Result<String, ReferenceError> {
        Ok(self.bundle(convention, project_name).await?.render())
    }
}
