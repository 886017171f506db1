//! Tool-calling protocol (MCP, JSON-RPC 2.0 over stdio) client used to reach the external
//! diagram-rendering server.

pub mod client;
pub mod protocol;
pub mod renderer;

pub use client::McpClient;
pub use renderer::{DiagramRenderer, McpDiagramRenderer, ToolResponse};

use crate::failure::{Classify, FailureSignal};
use std::time::Duration;

/// Why a diagram tool call failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    /// The server could not be spawned or the connection broke.
    #[error("diagram tool unreachable: {0}")]
    Unreachable(String),
    /// The server answered with a JSON-RPC error.
    #[error("diagram tool returned error {code}: {message}")]
    Rpc { code: i32, message: String },
    /// The server spoke something other than the expected protocol.
    #[error("diagram tool protocol error: {0}")]
    Protocol(String),
    /// The tool ran and reported a failure (`isError`).
    #[error("diagram tool reported failure: {0}")]
    Reported(String),
    #[error("diagram tool timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

impl Classify for ToolError {
    fn signal(&self) -> FailureSignal {
        match self {
            ToolError::Unreachable(_) | ToolError::Protocol(_) => {
                FailureSignal::ToolUnreachable(self.to_string())
            }
            ToolError::Rpc { .. } | ToolError::Reported(_) => {
                FailureSignal::ToolFailure(self.to_string())
            }
            ToolError::Timeout(after) => FailureSignal::ToolTimeout(*after),
        }
    }
}
