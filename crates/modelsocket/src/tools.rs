//! Tool registry consulted when the model requests tool invocations.
//!
//! The connection core treats tools as opaque names; a [`Toolbox`] is held
//! by the caller, shared with each sequence opened against it, and consulted
//! between generations to answer `seq_tool_call` chunks via
//! [`Seq::tool_return`](crate::Seq::tool_return).

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, RwLock},
};

use anyhow::Result;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::{error::ModelSocketError, protocol::ToolResult, stream::ToolCall};

/// Tool metadata advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: ToolParameters,
}

/// JSON-schema shaped parameter description for a tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ToolParameters {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, ToolProperty>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

/// One parameter property inside [`ToolParameters`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ToolProperty {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub r#enum: Vec<String>,
}

/// A callable tool.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use modelsocket::{Tool, ToolDefinition, ToolParameters};
///
/// struct EchoTool;
///
/// #[async_trait]
/// impl Tool for EchoTool {
///     fn definition(&self) -> ToolDefinition {
///         ToolDefinition {
///             name: "echo".to_string(),
///             description: "Echoes its arguments".to_string(),
///             parameters: ToolParameters::default(),
///         }
///     }
///
///     async fn call(&self, args: &str) -> anyhow::Result<String> {
///         Ok(args.to_string())
///     }
/// }
///
/// assert_eq!(EchoTool.definition().name, "echo");
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    async fn call(&self, args: &str) -> Result<String>;
}

/// A named collection of tools shared across sequences.
#[derive(Default)]
pub struct Toolbox {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    tool_instructions: RwLock<String>,
    tool_definition_prompt: RwLock<String>,
}

impl Toolbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool under its definition name, replacing any previous
    /// tool with the same name.
    pub fn add(&self, tool: impl Tool + 'static) {
        let name = tool.definition().name;
        self.tools
            .write()
            .expect("tools lock")
            .insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().expect("tools lock").get(name).cloned()
    }

    /// Invokes one tool by name.
    pub async fn call(&self, name: &str, args: &str) -> Result<String> {
        let Some(tool) = self.get(name) else {
            return Err(ModelSocketError::ToolNotFound {
                name: name.to_string(),
            }
            .into());
        };
        tool.call(args).await
    }

    /// Invokes every requested tool in order. Failures are folded into the
    /// results as `error: ...` strings so the model sees them instead of the
    /// loop aborting.
    pub async fn call_tools(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let result = match self.call(&call.name, &call.args).await {
                Ok(result) => result,
                Err(error) => format!("error: {error}"),
            };
            results.push(ToolResult {
                name: call.name.clone(),
                result,
            });
        }
        results
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .expect("tools lock")
            .values()
            .map(|tool| tool.definition())
            .collect()
    }

    /// Instructions appended to each opened sequence as a system message.
    pub fn tool_instructions(&self) -> String {
        self.tool_instructions
            .read()
            .expect("instructions lock")
            .clone()
    }

    pub fn set_tool_instructions(&self, instructions: impl Into<String>) {
        *self.tool_instructions.write().expect("instructions lock") = instructions.into();
    }

    pub fn set_tool_definition_prompt(&self, prompt: impl Into<String>) {
        *self
            .tool_definition_prompt
            .write()
            .expect("definition prompt lock") = prompt.into();
    }

    /// The prompt describing available tools: the custom prompt when one was
    /// set, otherwise a generated listing of all registered definitions.
    pub fn tool_definition_prompt(&self) -> String {
        let custom = self
            .tool_definition_prompt
            .read()
            .expect("definition prompt lock")
            .clone();
        if !custom.is_empty() {
            return custom;
        }

        let mut definitions = self.definitions();
        if definitions.is_empty() {
            return String::new();
        }
        definitions.sort_by(|a, b| a.name.cmp(&b.name));

        let listing = serde_json::to_string_pretty(&definitions)
            .unwrap_or_else(|_| "[]".to_string());
        format!(
            "You have access to the following tools:\n\n{listing}\n\nTo use a tool, respond with a tool call in the appropriate format."
        )
    }
}

type ToolHandler = Box<dyn Fn(String) -> BoxFuture<'static, Result<String>> + Send + Sync>;

/// Adapts an async closure into a [`Tool`].
pub struct FuncTool {
    definition: ToolDefinition,
    handler: ToolHandler,
}

impl FuncTool {
    pub fn new<F, Fut>(definition: ToolDefinition, handler: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<String>> + Send + 'static,
    {
        Self {
            definition,
            handler: Box::new(move |args| Box::pin(handler(args))),
        }
    }
}

#[async_trait]
impl Tool for FuncTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn call(&self, args: &str) -> Result<String> {
        (self.handler)(args.to_string()).await
    }
}
