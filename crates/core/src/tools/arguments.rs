use serde_json::{Map, Value};
use std::collections::HashMap;

/// Arguments handed to a function. Every value is carried as text; the
/// function parses whatever type it needs.
pub type FunctionArguments = HashMap<String, String>;

/// The value a function returns. Strings are forwarded to the model as-is,
/// anything else is sent as JSON.
pub type ToolResult = Value;

/// The accumulated function-call arguments were not a JSON object.
#[derive(Debug, thiserror::Error)]
#[error("Malformed function arguments: {0}")]
pub struct ArgumentDecodeError(#[from] serde_json::Error);

/// Parses the argument text streamed for a function call.
///
/// Blank text and JSON `null` mean the function takes no arguments. `null`
/// values inside the object are dropped.
pub fn decode_arguments(arguments: &str) -> Result<FunctionArguments, ArgumentDecodeError> {
    if arguments.trim().is_empty() {
        return Ok(FunctionArguments::new());
    }

    let object: Option<Map<String, Value>> = serde_json::from_str(arguments)?;
    Ok(object
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(name, value)| match value {
            Value::Null => None,
            Value::String(text) => Some((name, text)),
            other => Some((name, other.to_string())),
        })
        .collect())
}

/// Converts a function result into the payload of a function call output.
pub fn encode_result(result: &ToolResult) -> String {
    match result {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
