mod config;
mod generate_cmd;
mod reference_cmd;
mod runtime;
mod verify_cmd;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use modsmith_core::Convention;
use modsmith_core::agent::TranslateSource;

use config::{CliOverrides, ModsmithConfig};

#[derive(Parser)]
#[command(
    name = "modsmith",
    about = "Generate and verify Dagger modules with an LLM agent"
)]
struct Cli {
    /// Model alias or ID (overrides MODSMITH_MODEL env var)
    #[arg(long, global = true)]
    model: Option<String>,

    /// Turn ceiling for agent sessions (overrides MODSMITH_MAX_TURNS env var)
    #[arg(long, global = true)]
    max_turns: Option<usize>,

    /// Image verification environments start from (overrides MODSMITH_BASE_IMAGE env var)
    #[arg(long, global = true)]
    base_image: Option<String>,

    /// Read reference snippets from a local checkout instead of git
    #[arg(long, global = true)]
    docs_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default config file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Have the agent write a module for a task
    Generate {
        /// Module convention (go, python, typescript, php, java)
        #[arg(long)]
        convention: Convention,
        /// Module name
        #[arg(long)]
        name: String,
        /// Version of the dagger CLI used for verification
        #[arg(long)]
        runtime_version: Option<String>,
        /// Start from this file instead of an empty workspace
        #[arg(long)]
        seed: Option<PathBuf>,
        /// Do not put reference snippets in the prompt
        #[arg(long)]
        no_reference: bool,
        /// Write the module here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
        /// What the module should do
        task: String,
    },
    /// Translate an existing module to another convention
    Translate {
        /// Git repository holding the module
        #[arg(long)]
        repo: String,
        /// Revision of the repository
        #[arg(long, default_value = "HEAD")]
        revision: String,
        /// Directory of the module inside the repository
        #[arg(long)]
        subpath: Option<String>,
        /// Target convention
        #[arg(long)]
        to: Convention,
        /// Write the module here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the reference text for a convention
    Reference {
        /// Convention to fetch snippets for
        convention: String,
        /// Module name used for the target path
        #[arg(long, default_value = "my-module")]
        name: String,
        /// Documentation revision (overrides MODSMITH_REFERENCE_REVISION env var)
        #[arg(long)]
        revision: Option<String>,
    },
    /// Verify a module file without a model
    Verify {
        #[arg(long)]
        convention: Convention,
        #[arg(long)]
        name: String,
        /// Version of the dagger CLI used for verification
        #[arg(long)]
        runtime_version: Option<String>,
        /// Module source file
        file: PathBuf,
    },
    /// Print the canonical module file path for a convention
    Path {
        convention: Convention,
        #[arg(long)]
        name: String,
    },
}

fn cmd_init(force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile::default();
    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  model.name = {}", cfg.model.name);
    println!("  sandbox.base_image = {}", cfg.sandbox.base_image);
    println!("  references.remote = {}", cfg.references.remote);
    println!("  agent.max_turns = {}", cfg.agent.max_turns);
    println!();
    println!("Next: export ANTHROPIC_API_KEY and run `modsmith generate`.");

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut overrides = CliOverrides {
        model: cli.model,
        max_turns: cli.max_turns,
        base_image: cli.base_image,
        revision: None,
    };
    let docs_dir = cli.docs_dir.as_deref();

    match cli.command {
        Commands::Init { force } => {
            cmd_init(force)?;
        }
        Commands::Generate {
            convention,
            name,
            runtime_version,
            seed,
            no_reference,
            output,
            task,
        } => {
            let resolved = ModsmithConfig::resolve(&overrides)?;
            generate_cmd::run_generate(
                &resolved,
                generate_cmd::GenerateArgs {
                    convention,
                    name: &name,
                    task: &task,
                    runtime_version: runtime_version.as_deref(),
                    seed: seed.as_deref(),
                    reference: !no_reference,
                    docs_dir,
                    output: output.as_deref(),
                },
            )
            .await?;
        }
        Commands::Translate {
            repo,
            revision,
            subpath,
            to,
            output,
        } => {
            let resolved = ModsmithConfig::resolve(&overrides)?;
            let source = TranslateSource::new(repo)
                .revision(revision)
                .subpath(subpath.unwrap_or_default());
            generate_cmd::run_translate(&resolved, &source, to, docs_dir, output.as_deref())
                .await?;
        }
        Commands::Reference {
            convention,
            name,
            revision,
        } => {
            overrides.revision = revision;
            let resolved = ModsmithConfig::resolve(&overrides)?;
            reference_cmd::run_reference(&resolved, &convention, &name, docs_dir).await?;
        }
        Commands::Verify {
            convention,
            name,
            runtime_version,
            file,
        } => {
            let resolved = ModsmithConfig::resolve(&overrides)?;
            verify_cmd::run_verify(
                &resolved,
                convention,
                &name,
                &file,
                runtime_version.as_deref(),
            )
            .await?;
        }
        Commands::Path { convention, name } => {
            println!("{}", convention.module_file_path(&name));
        }
    }

    Ok(())
}

#[cfg(test)]
mod test_util {
    use std::sync::{Mutex, MutexGuard};

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Serialize tests that mutate process environment variables.
    pub fn lock_env() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn generate_parses_convention_and_task() {
        let cli = Cli::try_parse_from([
            "modsmith",
            "generate",
            "--convention",
            "go",
            "--name",
            "reverser",
            "write a function that reverses a string",
        ])
        .unwrap();
        match cli.command {
            Commands::Generate {
                convention,
                name,
                no_reference,
                task,
                ..
            } => {
                assert_eq!(convention, Convention::Go);
                assert_eq!(name, "reverser");
                assert!(!no_reference);
                assert!(task.contains("reverses"));
            }
            _ => panic!("expected generate"),
        }
    }

    #[test]
    fn unknown_convention_is_rejected() {
        let result = Cli::try_parse_from(["modsmith", "path", "cobol", "--name", "m"]);
        assert!(result.is_err());
    }

    #[test]
    fn global_flags_apply_after_subcommand() {
        let cli = Cli::try_parse_from([
            "modsmith",
            "reference",
            "python",
            "--docs-dir",
            "/tmp/docs",
            "--max-turns",
            "9",
        ])
        .unwrap();
        assert_eq!(cli.max_turns, Some(9));
        assert_eq!(cli.docs_dir, Some(PathBuf::from("/tmp/docs")));
    }

    #[test]
    fn translate_defaults_revision_and_subpath() {
        let cli = Cli::try_parse_from([
            "modsmith",
            "translate",
            "--repo",
            "https://github.com/example/mod",
            "--to",
            "typescript",
        ])
        .unwrap();
        match cli.command {
            Commands::Translate {
                revision,
                subpath,
                to,
                ..
            } => {
                assert_eq!(revision, "HEAD");
                assert_eq!(subpath, None);
                assert_eq!(to, Convention::Typescript);
            }
            _ => panic!("expected translate"),
        }
    }
}
