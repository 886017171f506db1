use super::{McpClient, ToolError};
use crate::config::DiagramsConfig;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// What the diagram tool said about a render. Advisory only: the files on disk decide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResponse {
    pub text: String,
}

/// External collaborator that turns a diagram description into image files in `output_dir`.
#[async_trait]
pub trait DiagramRenderer: Send + Sync {
    async fn render(&self, description: &str, output_dir: &Path) -> Result<ToolResponse, ToolError>;
}

/// Renders through an MCP diagram server spawned for each call.
pub struct McpDiagramRenderer {
    config: DiagramsConfig,
}

impl McpDiagramRenderer {
    pub fn new(config: DiagramsConfig) -> Self {
        Self { config }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    async fn call(&self, description: &str, output_dir: &Path) -> Result<ToolResponse, ToolError> {
        let mut client = McpClient::spawn(
            &self.config.server_command,
            &self.config.server_args,
            &self.config.env,
            Some(output_dir),
        )
        .await?;
        client.initialize().await?;

        let arguments = serde_json::json!({
            "code": description,
            "workspace_dir": output_dir,
        });
        let result = client.call_tool(&self.config.tool_name, arguments).await;
        client.shutdown().await;

        let result = result?;
        let text = result.text();
        if result.is_error {
            return Err(ToolError::Reported(text));
        }
        Ok(ToolResponse { text })
    }
}

#[async_trait]
impl DiagramRenderer for McpDiagramRenderer {
    async fn render(&self, description: &str, output_dir: &Path) -> Result<ToolResponse, ToolError> {
        let timeout = self.timeout();
        tracing::debug!(
            server = %self.config.server_command,
            output_dir = %output_dir.display(),
            "Calling diagram tool"
        );
        match tokio::time::timeout(timeout, self.call(description, output_dir)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout(timeout)),
        }
    }
}

#[cfg(test)]
#[path = "renderer_tests.rs"]
mod tests;
