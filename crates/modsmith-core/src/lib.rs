//! Core of modsmith: single-file module workspaces that an LLM agent edits
//! through a fixed set of operations, verified inside a throwaway sandbox.
//!
//! ```text
//! AgentDriver
//!     |  binds write / read / test
//!     v
//! Session --Model--> tool calls --> WorkspaceTools --> Workspace (value)
//!                                                          |
//!                                        verify / materialize
//!                                                          v
//!                                          Sandbox --> Environment
//! ReferenceProvider --DocumentSource--> prompt context
//! ```

pub mod agent;
pub mod convention;
pub mod llm;
pub mod reference;
pub mod sandbox;
pub mod session;
pub mod tree;
pub mod workspace;

pub use agent::{AgentDriver, DriverConfig, Generation, WorkspaceTools};
pub use convention::{Convention, ConventionError};
pub use reference::{ReferenceBundle, ReferenceError, ReferenceProvider};
pub use sandbox::{Environment, ExecOutput, Expect, RunOptions, Sandbox, ToolSpec};
pub use session::{Session, SessionOutcome, StopReason, Toolbox};
pub use tree::Tree;
pub use workspace::{Verification, Workspace, WorkspaceConfig, WorkspaceError};
