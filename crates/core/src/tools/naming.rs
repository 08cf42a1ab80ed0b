use std::fmt;

/// Separates the plugin namespace from the function name in a tool name
/// advertised to the session, e.g. `Lights-ChangeState`.
pub const FUNCTION_NAME_SEPARATOR: char = '-';

/// A tool name split into its optional plugin namespace and function name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedName {
    pub plugin: Option<String>,
    pub function: String,
}

impl QualifiedName {
    pub fn new(plugin: Option<&str>, function: &str) -> Self {
        Self {
            plugin: plugin.map(str::to_string),
            function: function.to_string(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.plugin {
            Some(plugin) => write!(f, "{}{}{}", plugin, FUNCTION_NAME_SEPARATOR, self.function),
            None => write!(f, "{}", self.function),
        }
    }
}

/// Splits a tool name on the first separator.
///
/// A name without separator is a bare function name. An empty plugin part
/// is treated the same way, since the registry has no empty namespace.
pub fn parse_function_name(qualified_name: &str) -> QualifiedName {
    match qualified_name.split_once(FUNCTION_NAME_SEPARATOR) {
        Some((plugin, function)) => {
            let plugin = plugin.trim();
            QualifiedName {
                plugin: (!plugin.is_empty()).then(|| plugin.to_string()),
                function: function.trim().to_string(),
            }
        }
        None => QualifiedName {
            plugin: None,
            function: qualified_name.trim().to_string(),
        },
    }
}
