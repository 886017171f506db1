use super::protocol::{
    error_codes, InitializeParams, InitializeResult, JsonRpcRequest, JsonRpcResponse,
    ToolCallParams, ToolCallResult,
};
use super::ToolError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

const CLIENT_NAME: &str = "archflow";
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A stdio connection to one spawned MCP server. The server is killed on drop.
pub struct McpClient {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
}

impl McpClient {
    /// Spawns `command` with `args` and connects to its stdio.
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
        working_dir: Option<&Path>,
    ) -> Result<Self, ToolError> {
        let program = which::which(command)
            .map_err(|e| ToolError::Unreachable(format!("'{}' not found: {}", command, e)))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| ToolError::Unreachable(format!("failed to start '{}': {}", command, e)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolError::Unreachable("server stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolError::Unreachable("server stdout unavailable".to_string()))?;

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            next_id: 0,
        })
    }

    /// Performs the `initialize` handshake and sends `notifications/initialized`.
    pub async fn initialize(&mut self) -> Result<InitializeResult, ToolError> {
        let params = serde_json::to_value(InitializeParams::for_client(CLIENT_NAME, CLIENT_VERSION))
            .map_err(|e| ToolError::Protocol(e.to_string()))?;
        let result = self.request("initialize", params).await?;
        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| ToolError::Protocol(format!("invalid initialize result: {}", e)))?;
        self.send(&JsonRpcRequest::notification("notifications/initialized"))
            .await?;
        tracing::debug!(protocol = %init.protocol_version, "MCP server initialized");
        Ok(init)
    }

    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<ToolCallResult, ToolError> {
        let params = serde_json::to_value(ToolCallParams {
            name: name.to_string(),
            arguments,
        })
        .map_err(|e| ToolError::Protocol(e.to_string()))?;
        let result = self.request("tools/call", params).await?;
        serde_json::from_value(result)
            .map_err(|e| ToolError::Protocol(format!("invalid tools/call result: {}", e)))
    }

    async fn request(&mut self, method: &str, params: Value) -> Result<Value, ToolError> {
        self.next_id += 1;
        let id = self.next_id;
        self.send(&JsonRpcRequest::call(id, method, params)).await?;

        loop {
            let line = self
                .stdout
                .next_line()
                .await
                .map_err(|e| ToolError::Unreachable(format!("read failed: {}", e)))?
                .ok_or_else(|| {
                    ToolError::Unreachable(format!("server closed the connection during {}", method))
                })?;
            if line.trim().is_empty() {
                continue;
            }
            // Servers may interleave notifications and log lines with responses.
            let Ok(response) = serde_json::from_str::<JsonRpcResponse>(&line) else {
                tracing::debug!(line = %line, "Ignoring non-JSON-RPC line from MCP server");
                continue;
            };
            if !response.is_response_to(id) {
                continue;
            }
            if let Some(err) = response.error {
                return Err(match err.code {
                    error_codes::METHOD_NOT_FOUND
                    | error_codes::INVALID_PARAMS
                    | error_codes::INVALID_REQUEST
                    | error_codes::PARSE_ERROR => {
                        ToolError::Protocol(format!("{} rejected: {}", method, err.message))
                    }
                    code => ToolError::Rpc {
                        code,
                        message: err.message,
                    },
                });
            }
            return response
                .result
                .ok_or_else(|| ToolError::Protocol(format!("{} response has no result", method)));
        }
    }

    async fn send(&mut self, message: &JsonRpcRequest) -> Result<(), ToolError> {
        let mut line =
            serde_json::to_string(message).map_err(|e| ToolError::Protocol(e.to_string()))?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ToolError::Unreachable(format!("write failed: {}", e)))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| ToolError::Unreachable(format!("flush failed: {}", e)))
    }

    /// Stops the server process.
    pub async fn shutdown(mut self) {
        let _ = self.child.kill().await;
    }
}
