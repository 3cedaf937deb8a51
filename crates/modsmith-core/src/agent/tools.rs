//! The three workspace tools bound into an agent session.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::llm::ToolDefinition;
use crate::session::Toolbox;
use crate::workspace::Workspace;

/// Every tool the model can call, in the order they are advertised.
pub const TOOL_NAMES: [&str; 3] = ["write", "read", "test"];

/// A [`Toolbox`] over a [`Workspace`].
///
/// Each call maps onto the workspace operation of the same name and
/// rebinds the held workspace to the result, so the workspace reachable
/// after the session is the one the last `write` produced.
#[derive(Debug, Clone)]
pub struct WorkspaceTools {
    workspace: Workspace,
}

impl WorkspaceTools {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn into_workspace(self) -> Workspace {
        self.workspace
    }

    fn definition(&self, name: &str) -> ToolDefinition {
        let path = self.workspace.file_path();
        let (description, input_schema) = match name {
            "write" => (
                format!("Replace the entire contents of {path} with `content`."),
                json!({
                    "type": "object",
                    "properties": {
                        "content": {
                            "type": "string",
                            "description": "The complete new file contents"
                        }
                    },
                    "required": ["content"]
                }),
            ),
            "read" => (
                format!("Return the current contents of {path}."),
                json!({"type": "object", "properties": {}}),
            ),
            _ => (
                "Load the workspace as a module and list its functions. \
                 Returns the function list on success and the error output on failure."
                    .to_string(),
                json!({"type": "object", "properties": {}}),
            ),
        };
        ToolDefinition {
            name: name.to_string(),
            description,
            input_schema,
        }
    }
}

#[async_trait]
impl Toolbox for WorkspaceTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        TOOL_NAMES.iter().map(|name| self.definition(name)).collect()
    }

    async fn call(&mut self, name: &str, input: Value) -> Result<String> {
        debug!(tool = name, digest = %self.workspace.digest(), "workspace tool");
        match name {
            "write" => {
                let content = input
                    .get("content")
                    .and_then(Value::as_str)
                    .ok_or_else(|| anyhow!("write requires a string `content` argument"))?;
                self.workspace = self.workspace.write(content);
                Ok(format!(
                    "wrote {} bytes to {}",
                    content.len(),
                    self.workspace.file_path()
                ))
            }
            "read" => Ok(self.workspace.read()?),
            "test" => self
                .workspace
                .test()
                .await
                .context("verification could not run"),
            other => bail!(
                "unknown tool {other:?}; available tools are {}",
                TOOL_NAMES.join(", ")
            ),
        }
    }
}
