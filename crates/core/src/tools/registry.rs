//! Explicit registry of invocable functions, keyed by plugin and function name.
//!
//! The registry is populated once at startup and consulted whenever the model
//! finishes streaming a function call. Each entry is a [`KernelFunction`]: a
//! statically typed descriptor carrying its name, description and JSON schema
//! together with the call itself.

use super::{
    arguments::{FunctionArguments, ToolResult},
    naming::QualifiedName,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Describes a function to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionMetadata {
    pub name: String,
    pub description: String,
    /// JSON schema of the parameters object.
    pub parameters: Value,
}

/// A function as advertised to the realtime session, under its qualified name.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A resolved request from the model to invoke a function.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub plugin_name: Option<String>,
    pub function_name: String,
    /// Identifier the function call output must echo back.
    pub id: String,
    pub arguments: FunctionArguments,
}

impl FunctionCall {
    pub fn qualified_name(&self) -> QualifiedName {
        QualifiedName::new(self.plugin_name.as_deref(), &self.function_name)
    }
}

/// Failure to look up or run a function.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Function '{0}' is not registered")]
    NotFound(String),
    #[error("Function '{name}' failed: {message}")]
    Execution { name: String, message: String },
}

/// A function the model may call.
#[async_trait]
pub trait KernelFunction: Send + Sync {
    fn metadata(&self) -> &FunctionMetadata;

    /// Runs the function. Side effects are entirely the function's own.
    async fn invoke(&self, arguments: FunctionArguments) -> anyhow::Result<ToolResult>;
}

/// Maps `(plugin, function)` to the registered [`KernelFunction`].
#[derive(Default, Clone)]
pub struct PluginRegistry {
    functions: BTreeMap<QualifiedName, Arc<dyn KernelFunction>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a function, replacing any previous one under the same name.
    pub fn register(&mut self, plugin: Option<&str>, function: Arc<dyn KernelFunction>) {
        let name = QualifiedName::new(plugin, &function.metadata().name);
        debug!(function = %name, "Registering function");
        self.functions.insert(name, function);
    }

    /// Registers every function of a plugin under the plugin's namespace.
    pub fn import_plugin(
        &mut self,
        plugin: &str,
        functions: impl IntoIterator<Item = Arc<dyn KernelFunction>>,
    ) {
        let before = self.functions.len();
        for function in functions {
            self.register(Some(plugin), function);
        }
        info!(
            plugin,
            count = self.functions.len() - before,
            "Imported plugin functions"
        );
    }

    /// Finds a function by plugin and name.
    ///
    /// Without a plugin, functions registered without a namespace take
    /// precedence; otherwise the first plugin exposing the name is used.
    pub fn lookup(&self, plugin: Option<&str>, function: &str) -> Option<Arc<dyn KernelFunction>> {
        if let Some(found) = self.functions.get(&QualifiedName::new(plugin, function)) {
            return Some(found.clone());
        }
        if plugin.is_some() {
            return None;
        }
        self.functions
            .iter()
            .find(|(name, _)| name.function == function)
            .map(|(_, found)| found.clone())
    }

    /// Tool definitions to advertise to the session.
    pub fn definitions(&self) -> Vec<FunctionDefinition> {
        self.functions
            .iter()
            .map(|(name, function)| {
                let metadata = function.metadata();
                FunctionDefinition {
                    name: name.to_string(),
                    description: metadata.description.clone(),
                    parameters: metadata.parameters.clone(),
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Looks up and runs the function a call refers to.
    pub async fn invoke(&self, call: &FunctionCall) -> Result<ToolResult, ToolError> {
        let name = call.qualified_name();
        let function = self
            .lookup(call.plugin_name.as_deref(), &call.function_name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        info!(function = %name, call_id = %call.id, "Invoking function");
        function
            .invoke(call.arguments.clone())
            .await
            .map_err(|e| ToolError::Execution {
                name: name.to_string(),
                message: format!("{:#}", e),
            })
    }
}
