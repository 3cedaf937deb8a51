//! `modsmith reference`: print the reference text the agent would see.

use std::path::Path;

use anyhow::Result;

use crate::config::ModsmithConfig;
use crate::runtime;

pub async fn run_reference(
    config: &ModsmithConfig,
    convention: &str,
    name: &str,
    docs_dir: Option<&Path>,
) -> Result<()> {
    let provider = runtime::references(config, docs_dir);
    let text = provider.get_reference(convention, name).await?;
    print!("{text}");
    Ok(())
}
