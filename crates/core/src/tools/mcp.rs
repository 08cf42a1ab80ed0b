//! Adapts the tools of an MCP server into registry functions.

use super::{
    arguments::{FunctionArguments, ToolResult},
    registry::{FunctionMetadata, KernelFunction},
};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use rmcp::{
    model::CallToolRequestParam,
    service::{RoleClient, RunningService},
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// A single tool exposed by a connected MCP server.
pub struct McpFunction {
    client: Arc<RunningService<RoleClient, ()>>,
    metadata: FunctionMetadata,
}

/// Lists the tools of an MCP server and wraps each as a [`KernelFunction`].
///
/// The returned functions share ownership of the client, which stays
/// connected for as long as any of them is registered.
pub async fn import_tools(
    client: RunningService<RoleClient, ()>,
) -> Result<Vec<Arc<dyn KernelFunction>>> {
    let tools = client.list_all_tools().await?;
    let client = Arc::new(client);

    tools
        .into_iter()
        .map(|tool| {
            let metadata = FunctionMetadata {
                name: tool.name.to_string(),
                description: tool.description.map(|d| d.to_string()).unwrap_or_default(),
                parameters: serde_json::to_value(&*tool.input_schema)?,
            };
            debug!(tool = %metadata.name, "Discovered MCP tool");
            Ok(Arc::new(McpFunction {
                client: client.clone(),
                metadata,
            }) as Arc<dyn KernelFunction>)
        })
        .collect()
}

#[async_trait]
impl KernelFunction for McpFunction {
    fn metadata(&self) -> &FunctionMetadata {
        &self.metadata
    }

    async fn invoke(&self, arguments: FunctionArguments) -> Result<ToolResult> {
        let arguments: Map<String, Value> = arguments
            .into_iter()
            .map(|(name, value)| (name, Value::String(value)))
            .collect();

        let result = self
            .client
            .peer()
            .call_tool(CallToolRequestParam {
                name: self.metadata.name.clone().into(),
                arguments: Some(arguments),
            })
            .await?;

        let text = content_text(&serde_json::to_value(&result.content)?);
        if result.is_error.unwrap_or(false) {
            if text.is_empty() {
                return Err(anyhow!("Tool reported an error without details"));
            }
            return Err(anyhow!(text));
        }
        Ok(Value::String(text))
    }
}

/// Joins the text parts of serialized MCP tool content.
fn content_text(content: &Value) -> String {
    content
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}
