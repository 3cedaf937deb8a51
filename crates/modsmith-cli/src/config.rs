//! Configuration file management for modsmith.
//!
//! Provides a TOML-based config file at `~/.config/modsmith/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.
//!
//! The model API key is never stored here; it is read from
//! `ANTHROPIC_API_KEY` when a model is constructed.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use modsmith_core::llm::anthropic::{DEFAULT_BASE_URL, DEFAULT_MAX_TOKENS, DEFAULT_MODEL};
use modsmith_core::reference::{DEFAULT_REMOTE, DEFAULT_REVISION};
use modsmith_core::sandbox::DockerConfig;
use modsmith_core::session::DEFAULT_MAX_TURNS;
use modsmith_core::workspace::BASE_IMAGE;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub model: ModelSection,
    pub sandbox: SandboxSection,
    pub references: ReferencesSection,
    pub agent: AgentSection,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    /// Model alias (`opus`, `sonnet`, `haiku`) or full model ID.
    pub name: String,
    pub max_tokens: u32,
    pub base_url: String,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            name: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    pub base_image: String,
    /// Extra flags for `docker create`.
    pub extra_flags: Vec<String>,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            base_image: BASE_IMAGE.to_string(),
            extra_flags: DockerConfig::default_extra_flags(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferencesSection {
    pub remote: String,
    pub revision: String,
}

impl Default for ReferencesSection {
    fn default() -> Self {
        Self {
            remote: DEFAULT_REMOTE.to_string(),
            revision: DEFAULT_REVISION.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_turns: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the modsmith config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/modsmith` or
/// `~/.config/modsmith`, on every platform.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("modsmith");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("modsmith")
}

/// Return the path to the modsmith config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Values given on the command line. `None` falls through the chain.
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub model: Option<String>,
    pub max_turns: Option<usize>,
    pub base_image: Option<String>,
    pub revision: Option<String>,
}

/// Fully resolved configuration, ready for use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModsmithConfig {
    pub model: String,
    pub max_tokens: u32,
    pub base_url: String,
    pub base_image: String,
    pub extra_flags: Vec<String>,
    pub remote: String,
    pub revision: String,
    pub max_turns: usize,
}

impl ModsmithConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - Model: `--model` > `MODSMITH_MODEL` > `model.name` > `sonnet`
    /// - Base URL: `ANTHROPIC_BASE_URL` > `model.base_url` > the public API
    /// - Base image: `--base-image` > `MODSMITH_BASE_IMAGE` > `sandbox.base_image` > `alpine`
    /// - Revision: `--revision` > `MODSMITH_REFERENCE_REVISION` > `references.revision` > `HEAD`
    /// - Max turns: `--max-turns` > `MODSMITH_MAX_TURNS` > `agent.max_turns` > 50
    ///
    /// A missing config file is not an error; a malformed one is.
    pub fn resolve(cli: &CliOverrides) -> Result<Self> {
        let file = if config_path().exists() {
            load_config()?
        } else {
            ConfigFile::default()
        };

        let max_turns = match cli.max_turns {
            Some(n) => n,
            None => match std::env::var("MODSMITH_MAX_TURNS") {
                Ok(v) => v
                    .parse()
                    .with_context(|| format!("MODSMITH_MAX_TURNS is not a number: {v}"))?,
                Err(_) => file.agent.max_turns,
            },
        };

        Ok(Self {
            model: pick(cli.model.as_deref(), "MODSMITH_MODEL", file.model.name),
            max_tokens: file.model.max_tokens,
            base_url: pick(None, "ANTHROPIC_BASE_URL", file.model.base_url),
            base_image: pick(
                cli.base_image.as_deref(),
                "MODSMITH_BASE_IMAGE",
                file.sandbox.base_image,
            ),
            extra_flags: file.sandbox.extra_flags,
            remote: file.references.remote,
            revision: pick(
                cli.revision.as_deref(),
                "MODSMITH_REFERENCE_REVISION",
                file.references.revision,
            ),
            max_turns,
        })
    }
}

fn pick(cli: Option<&str>, env: &str, file: String) -> String {
    if let Some(value) = cli {
        value.to_string()
    } else if let Ok(value) = std::env::var(env) {
        value
    } else {
        file
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
