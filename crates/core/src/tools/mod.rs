//! Function-calling bridge between the realtime session and registered plugins.
//!
//! - `naming`: splits `Plugin-Function` names advertised to the model.
//! - `arguments`: decodes streamed argument JSON and encodes results.
//! - `registry`: the explicit `(plugin, function)` registry and invoker.
//! - `mcp`: imports the tools of an MCP server as registry functions.

pub mod arguments;
pub mod mcp;
pub mod naming;
pub mod registry;

pub use arguments::{
    ArgumentDecodeError, FunctionArguments, ToolResult, decode_arguments, encode_result,
};
pub use naming::{FUNCTION_NAME_SEPARATOR, QualifiedName, parse_function_name};
pub use registry::{
    FunctionCall, FunctionDefinition, FunctionMetadata, KernelFunction, PluginRegistry, ToolError,
};
