//! Side-effect tools the top-level agent may invoke.
//!
//! Tools are read-only and bound to the per-turn [`SessionContext`]; they
//! never see conversation content.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::types::SessionContext;

/// Name of the built-in developer-info tool.
pub const DEVELOPER_INFO: &str = "developer_info";

/// Every tool name the default [`ToolBox`] provides.
pub const BUILTIN_TOOLS: &[&str] = &[DEVELOPER_INFO];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Tool '{0}' is not registered")]
    UnknownTool(String),

    #[error("Tool '{tool}' is not configured: {reason}")]
    NotConfigured { tool: String, reason: String },
}

/// A named, side-effecting capability.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// One-line description shown to the router.
    fn description(&self) -> &str;

    fn invoke(&self, context: &SessionContext) -> Result<String, ToolError>;
}

/// Returns the static developer record of the session.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeveloperInfoTool;

impl Tool for DeveloperInfoTool {
    fn name(&self) -> &str {
        DEVELOPER_INFO
    }

    fn description(&self) -> &str {
        "Returns the name, mail and github of the developer"
    }

    fn invoke(&self, context: &SessionContext) -> Result<String, ToolError> {
        let dev = context.developer.as_ref().ok_or_else(|| ToolError::NotConfigured {
            tool: DEVELOPER_INFO.to_string(),
            reason: "no developer record for this session".to_string(),
        })?;

        Ok(format!(
            "Developer name: {}, Developer mail: {}, Developer github: {}",
            dev.name, dev.mail, dev.github
        ))
    }
}

/// Whitelist of invocable tools, keyed by name.
#[derive(Clone, Default)]
pub struct ToolBox {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolBox {
    pub fn new() -> Self {
        Self::default()
    }

    /// A toolbox holding every built-in tool.
    pub fn with_builtins() -> Self {
        let mut toolbox = Self::new();
        toolbox.register(Arc::new(DeveloperInfoTool));
        toolbox
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn invoke(&self, name: &str, context: &SessionContext) -> Result<String, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        tracing::debug!(tool = name, session = %context.session_key, "Invoking tool");
        tool.invoke(context)
    }
}

impl std::fmt::Debug for ToolBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.tools.keys()).finish()
    }
}
