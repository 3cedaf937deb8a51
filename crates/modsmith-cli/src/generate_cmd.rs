//! `modsmith generate` and `modsmith translate`.

use std::path::Path;

use anyhow::{Context, Result, bail};

use modsmith_core::agent::TranslateSource;
use modsmith_core::{Convention, Generation};

use crate::config::ModsmithConfig;
use crate::runtime;

/// Options for `generate`.
pub struct GenerateArgs<'a> {
    pub convention: Convention,
    pub name: &'a str,
    pub task: &'a str,
    pub runtime_version: Option<&'a str>,
    pub seed: Option<&'a Path>,
    pub reference: bool,
    pub docs_dir: Option<&'a Path>,
    pub output: Option<&'a Path>,
}

pub async fn run_generate(config: &ModsmithConfig, args: GenerateArgs<'_>) -> Result<()> {
    let references = args
        .reference
        .then(|| runtime::references(config, args.docs_dir));
    let driver = runtime::driver(config, args.runtime_version, references)?;
    let workspace = runtime::workspace(
        config,
        args.convention,
        args.name,
        args.runtime_version,
        args.seed,
    )?;

    let generation = driver.run(workspace, args.task).await?;
    report(&generation, args.output)
}

pub async fn run_translate(
    config: &ModsmithConfig,
    source: &TranslateSource,
    target: Convention,
    docs_dir: Option<&Path>,
    output: Option<&Path>,
) -> Result<()> {
    let references = runtime::references(config, docs_dir);
    let driver = runtime::driver(config, None, Some(references))?;
    let generation = driver.translate(source, target).await?;
    report(&generation, output)
}

/// Print the outcome to stderr and the module to `output` (or stdout).
/// Fails when the final verification did not pass.
fn report(generation: &Generation, output: Option<&Path>) -> Result<()> {
    let workspace = &generation.workspace;
    eprintln!(
        "{} after {} turns and {} tool calls ({})",
        if generation.verification.ok {
            "Module verifies"
        } else {
            "Module does NOT verify"
        },
        generation.turns,
        generation.tool_calls,
        generation.stop,
    );
    if !generation.last_reply.trim().is_empty() {
        eprintln!();
        eprintln!("{}", generation.last_reply.trim());
    }
    eprintln!();
    eprintln!("{}", generation.verification.output.trim_end());

    let contents = workspace
        .read()
        .context("the agent never wrote the module file")?;
    match output {
        Some(path) => {
            std::fs::write(path, &contents)
                .with_context(|| format!("cannot write output file: {}", path.display()))?;
            eprintln!("Wrote {} to {}", workspace.file_path(), path.display());
        }
        None => print!("{contents}"),
    }

    if !generation.verification.ok {
        bail!("final verification failed");
    }
    Ok(())
}
