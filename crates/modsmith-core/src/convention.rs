//! The closed set of module conventions (Dagger SDKs) a workspace can target.
//!
//! Each convention fixes two layouts: where the module's main source file
//! lives inside a project, and where a documentation snippet for that
//! convention lives under a topic directory. Both are `match` arms on the
//! same enum, so adding a convention cannot extend one table and forget the
//! other.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from convention lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConventionError {
    /// The name is not one of the supported conventions.
    #[error("unknown convention {0:?} (expected one of: go, python, typescript, php, java)")]
    Unknown(String),
}

/// A target language/framework layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Convention {
    Go,
    Python,
    Typescript,
    Php,
    Java,
}

impl Convention {
    /// Every supported convention, in table order.
    pub const ALL: [Convention; 5] = [
        Convention::Go,
        Convention::Python,
        Convention::Typescript,
        Convention::Php,
        Convention::Java,
    ];

    /// The identifier used on the command line and by `dagger init --sdk`.
    pub fn as_str(self) -> &'static str {
        match self {
            Convention::Go => "go",
            Convention::Python => "python",
            Convention::Typescript => "typescript",
            Convention::Php => "php",
            Convention::Java => "java",
        }
    }

    /// Canonical path of the module's main source file for `project_name`.
    ///
    /// Java package directories are lower-cased; every other component is
    /// used as given. `dagger init` rewrites some names (snake_case for the
    /// Python package, PascalCase for PHP and Java classes), so only names
    /// that pass [`check_project_name`](Self::check_project_name) land where
    /// this says.
    pub fn module_file_path(self, project_name: &str) -> String {
        match self {
            Convention::Go => "main.go".to_string(),
            Convention::Python => format!("src/{project_name}/main.py"),
            Convention::Typescript => "src/index.ts".to_string(),
            Convention::Php => format!("src/{project_name}.php"),
            Convention::Java => format!(
                "src/main/java/io/dagger/modules/{}/{project_name}.java",
                project_name.to_lowercase()
            ),
        }
    }

    /// Reject project names `dagger init` would rewrite for this convention.
    ///
    /// Python packages must be lower-case with no `-`. PHP and Java classes
    /// must be PascalCase: an upper-case first letter and no `-` or `_`.
    pub fn check_project_name(self, name: &str) -> Result<(), &'static str> {
        match self {
            Convention::Go | Convention::Typescript => Ok(()),
            Convention::Python => {
                if name.contains('-') || name.chars().any(|c| c.is_ascii_uppercase()) {
                    Err("python module names must be lower-case snake_case")
                } else {
                    Ok(())
                }
            }
            Convention::Php | Convention::Java => {
                let pascal = name.starts_with(|c: char| c.is_ascii_uppercase())
                    && name.chars().all(|c| c.is_ascii_alphanumeric());
                if pascal {
                    Ok(())
                } else {
                    Err("php and java module names must be PascalCase")
                }
            }
        }
    }

    /// Sub-path of a documentation snippet, relative to
    /// `<topic>/<convention>/`.
    ///
    /// Snippets do not follow the module layout, so this is its own table.
    pub fn snippet_path(self) -> &'static str {
        match self {
            Convention::Go => "main.go",
            Convention::Python => "main.py",
            Convention::Typescript => "index.ts",
            Convention::Php => "src/MyModule.php",
            Convention::Java => "src/main/java/io/dagger/modules/mymodule/MyModule.java",
        }
    }

    /// Info string for fenced code blocks in reference text.
    pub fn fence_language(self) -> &'static str {
        match self {
            Convention::Go => "go",
            Convention::Python => "python",
            Convention::Typescript => "typescript",
            Convention::Php => "php",
            Convention::Java => "java",
        }
    }
}

impl fmt::Display for Convention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Convention {
    type Err = ConventionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Convention::ALL
            .into_iter()
            .find(|c| c.as_str() == lowered)
            .ok_or_else(|| ConventionError::Unknown(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_conventions() {
        for c in Convention::ALL {
            assert_eq!(c.as_str().parse::<Convention>().unwrap(), c);
        }
        assert_eq!("TypeScript".parse::<Convention>().unwrap(), Convention::Typescript);
    }

    #[test]
    fn parse_unknown_convention_fails() {
        let err = "rust".parse::<Convention>().unwrap_err();
        assert_eq!(err, ConventionError::Unknown("rust".to_string()));
        assert!(err.to_string().contains("unknown convention"));
    }

    #[test]
    fn module_file_paths() {
        assert_eq!(Convention::Go.module_file_path("Reverser"), "main.go");
        assert_eq!(
            Convention::Python.module_file_path("reverser"),
            "src/reverser/main.py"
        );
        assert_eq!(Convention::Typescript.module_file_path("x"), "src/index.ts");
        assert_eq!(Convention::Php.module_file_path("Reverser"), "src/Reverser.php");
        assert_eq!(
            Convention::Java.module_file_path("Reverser"),
            "src/main/java/io/dagger/modules/reverser/Reverser.java"
        );
    }

    #[test]
    fn module_file_path_is_stable() {
        for c in Convention::ALL {
            let first = c.module_file_path("MyModule");
            for _ in 0..3 {
                assert_eq!(c.module_file_path("MyModule"), first);
            }
        }
    }

    #[test]
    fn project_names_dagger_would_rewrite_are_rejected() {
        assert!(Convention::Python.check_project_name("my_module").is_ok());
        assert!(Convention::Python.check_project_name("my-module").is_err());
        assert!(Convention::Python.check_project_name("Reverser").is_err());

        for c in [Convention::Php, Convention::Java] {
            assert!(c.check_project_name("Reverser").is_ok(), "{c}");
            assert!(c.check_project_name("reverser").is_err(), "{c}");
            assert!(c.check_project_name("My_Module").is_err(), "{c}");
        }

        for c in [Convention::Go, Convention::Typescript] {
            assert!(c.check_project_name("my-module").is_ok(), "{c}");
        }
    }

    #[test]
    fn snippet_paths_cover_every_convention() {
        for c in Convention::ALL {
            assert!(!c.snippet_path().is_empty(), "{c} has no snippet path");
        }
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&Convention::Typescript).unwrap();
        assert_eq!(json, "\"typescript\"");
        let back: Convention = serde_json::from_str("\"java\"").unwrap();
        assert_eq!(back, Convention::Java);
    }
}
