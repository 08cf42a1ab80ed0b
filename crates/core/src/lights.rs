//! Lights Plugin
//!
//! A small home-automation plugin exposed as an MCP (Model Context Protocol)
//! server. It simulates a handful of lights whose state the model can read and
//! toggle, and is registered with the assistant under the `Lights` namespace.

use anyhow::Result;
use rmcp::{
    ServerHandler, ServiceExt,
    handler::server::{router::tool::ToolRouter, tool::Parameters},
    model::{ServerCapabilities, ServerInfo},
    service::{RoleClient, RunningService},
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

/// Namespace the plugin's functions are registered under.
pub const PLUGIN_NAME: &str = "Lights";

/// The state of a single simulated light.
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LightModel {
    pub id: u32,
    pub name: String,
    pub is_on: bool,
}

impl LightModel {
    fn new(id: u32, name: &str, is_on: bool) -> Self {
        Self {
            id,
            name: name.to_string(),
            is_on,
        }
    }
}

/// Arguments for the `ChangeState` tool.
///
/// Function arguments reach tools as text, so both fields are strings and are
/// parsed by the tool itself.
#[derive(Deserialize, JsonSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ChangeStateArgs {
    /// The id of the light to change.
    #[schemars(description = "The id of the light to change")]
    pub id: String,
    /// The desired state.
    #[schemars(description = "'true' to switch the light on, 'false' to switch it off")]
    pub is_on: String,
}

/// MCP service exposing the simulated lights.
pub struct LightsService {
    lights: Arc<Mutex<Vec<LightModel>>>,
    tool_router: ToolRouter<Self>,
}

#[tool_handler]
impl ServerHandler for LightsService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[tool_router]
impl LightsService {
    /// Creates the service with the default set of lights.
    pub fn new() -> Self {
        Self::with_lights(vec![
            LightModel::new(1, "Table Lamp", false),
            LightModel::new(2, "Porch light", false),
            LightModel::new(3, "Chandelier", true),
        ])
    }

    pub fn with_lights(lights: Vec<LightModel>) -> Self {
        Self {
            lights: Arc::new(Mutex::new(lights)),
            tool_router: Self::tool_router(),
        }
    }

    /// Returns every light and whether it is on.
    #[tool(
        name = "GetLights",
        description = "Gets a list of lights and their current state"
    )]
    pub async fn get_lights(&self) -> Result<String, String> {
        info!("Executing tool 'GetLights'");
        let lights = self.lights.lock().await;
        serde_json::to_string(&*lights).map_err(|e| format!("Failed to serialize lights: {}", e))
    }

    /// Switches a single light on or off and returns its new state.
    #[tool(name = "ChangeState", description = "Changes the state of the light")]
    pub async fn change_state(
        &self,
        args: Parameters<ChangeStateArgs>,
    ) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'ChangeState'");
        let id: u32 = args
            .0
            .id
            .trim()
            .parse()
            .map_err(|_| format!("Invalid light id: '{}'", args.0.id))?;
        let is_on: bool = args
            .0
            .is_on
            .trim()
            .to_lowercase()
            .parse()
            .map_err(|_| format!("Invalid state: '{}'", args.0.is_on))?;

        let mut lights = self.lights.lock().await;
        let light = lights
            .iter_mut()
            .find(|light| light.id == id)
            .ok_or_else(|| format!("Light {} not found.", id))?;
        light.is_on = is_on;
        info!(id, is_on, name = %light.name, "Light state changed");

        serde_json::to_string(&*light).map_err(|e| format!("Failed to serialize light: {}", e))
    }
}

impl LightsService {
    /// Serves the plugin over an in-process duplex transport and returns a
    /// connected MCP client.
    pub async fn connect(self) -> Result<RunningService<RoleClient, ()>> {
        let (server_transport, client_transport) = tokio::io::duplex(4096);

        tokio::spawn(async move {
            match self.serve(server_transport).await {
                Ok(service) => {
                    let _ = service.waiting().await;
                }
                Err(e) => error!(error = ?e, "Lights MCP server failed to start"),
            }
        });

        Ok(().serve(client_transport).await?)
    }
}

impl Default for LightsService {
    fn default() -> Self {
        Self::new()
    }
}
