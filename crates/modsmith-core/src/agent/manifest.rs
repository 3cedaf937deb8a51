//! Reading a module's `dagger.json`.

use serde::Deserialize;
use thiserror::Error;

use crate::convention::{Convention, ConventionError};

/// File name of the module manifest.
pub const MANIFEST_FILE: &str = "dagger.json";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("invalid dagger.json: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("dagger.json does not declare an sdk")]
    MissingSdk,

    #[error(transparent)]
    Convention(#[from] ConventionError),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSdk {
    Name(String),
    Table { source: String },
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    name: String,
    sdk: Option<RawSdk>,
}

/// The parts of a module manifest the translator needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleManifest {
    pub name: String,
    pub convention: Convention,
}

impl ModuleManifest {
    /// Parse manifest JSON. The sdk may be a bare name or a table with a
    /// `source` key.
    pub fn parse(json: &str) -> Result<Self, ManifestError> {
        let raw: RawManifest = serde_json::from_str(json)?;
        let sdk = match raw.sdk.ok_or(ManifestError::MissingSdk)? {
            RawSdk::Name(name) => name,
            RawSdk::Table { source } => source,
        };
        Ok(Self {
            name: raw.name,
            convention: sdk.parse()?,
        })
    }
}
