//! `modsmith verify`: check a local module file without a model.

use std::path::Path;

use anyhow::{Context, Result, bail};

use modsmith_core::Convention;

use crate::config::ModsmithConfig;
use crate::runtime;

pub async fn run_verify(
    config: &ModsmithConfig,
    convention: Convention,
    name: &str,
    file: &Path,
    runtime_version: Option<&str>,
) -> Result<()> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let workspace =
        runtime::workspace(config, convention, name, runtime_version, None)?.write(&contents);

    let verification = workspace.check().await?;
    println!("{}", verification.output.trim_end());
    if !verification.ok {
        bail!(
            "{} does not verify as a {convention} module (exit code {:?})",
            file.display(),
            verification.exit_code
        );
    }
    Ok(())
}
