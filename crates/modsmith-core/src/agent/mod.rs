//! The generate-verify agent.
//!
//! ```text
//! AgentDriver::run(workspace, task)
//!     |
//!     v
//! Session --prompt(assignment, convention, file_path, reference)--> Model
//!     |                                                               |
//!     |   <---- tool_use write{content} / read{} / test{} ------------+
//!     v
//! WorkspaceTools --rebinds--> Workspace' --verify--> Sandbox
//!     |
//!     v
//! final Workspace --check once more--> Generation
//! ```

pub mod driver;
pub mod manifest;
pub mod tools;

pub use driver::{AgentDriver, DriverConfig, Generation, TranslateSource};
pub use manifest::{ManifestError, ModuleManifest};
pub use tools::{TOOL_NAMES, WorkspaceTools};
