//! Tool dispatch table.
//!
//! The assistant is configured with a fixed tool set: the runtime's built-in
//! code interpreter and file search, plus function tools executed locally.
//! Function tools are looked up by name and always produce a
//! [`QueryResult`]; a bad call (unknown name, malformed arguments) becomes a
//! result the agent can read, never an error that aborts the turn.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::assistant::{FunctionCall, ToolCall};
use crate::sales_data::{QueryResult, SalesData};

/// A function tool the agent can call.
#[async_trait]
pub trait FunctionTool: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON schema of the arguments object.
    fn parameters(&self) -> Value;
    async fn call(&self, args: Value) -> QueryResult;
}

/// One entry of the assistant's tool set.
#[derive(Debug, Clone)]
pub enum ToolSpec {
    CodeInterpreter,
    FileSearch,
    Function(Arc<dyn FunctionTool>),
}

impl ToolSpec {
    /// Declaration sent to the runtime when configuring the assistant.
    pub fn to_json(&self) -> Value {
        match self {
            Self::CodeInterpreter => serde_json::json!({ "type": "code_interpreter" }),
            Self::FileSearch => serde_json::json!({ "type": "file_search" }),
            Self::Function(tool) => serde_json::json!({
                "type": "function",
                "function": {
                    "name": tool.name(),
                    "description": tool.description(),
                    "parameters": tool.parameters(),
                }
            }),
        }
    }
}

/// A function call paired with its result.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub call: ToolCall,
    pub result: QueryResult,
}

#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    specs: Vec<ToolSpec>,
    functions: HashMap<String, Arc<dyn FunctionTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard sales assistant tool set.
    pub fn sales(sales_data: Arc<SalesData>) -> Self {
        Self::new()
            .with_code_interpreter()
            .with_file_search()
            .with_function(Arc::new(AskDatabaseTool::new(sales_data)))
    }

    #[must_use]
    pub fn with_code_interpreter(mut self) -> Self {
        self.specs.push(ToolSpec::CodeInterpreter);
        self
    }

    #[must_use]
    pub fn with_file_search(mut self) -> Self {
        self.specs.push(ToolSpec::FileSearch);
        self
    }

    #[must_use]
    pub fn with_function(mut self, tool: Arc<dyn FunctionTool>) -> Self {
        self.register(tool);
        self
    }

    /// Register a function tool, replacing any tool of the same name.
    pub fn register(&mut self, tool: Arc<dyn FunctionTool>) {
        let name = tool.name().to_string();
        self.specs
            .retain(|spec| !matches!(spec, ToolSpec::Function(t) if t.name() == name));
        self.specs.push(ToolSpec::Function(Arc::clone(&tool)));
        self.functions.insert(name, tool);
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn FunctionTool>> {
        self.functions.get(name).cloned()
    }

    pub fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    pub fn assistant_tools_json(&self) -> Vec<Value> {
        self.specs.iter().map(ToolSpec::to_json).collect()
    }

    /// Execute one function call.
    pub async fn invoke(&self, function: &FunctionCall) -> QueryResult {
        invoke_function(self.resolve(&function.name), function.clone()).await
    }

    /// Execute a batch of function calls concurrently.
    ///
    /// Each call runs on its own task, so dropping the caller does not
    /// interrupt a query in flight. Results come back in call order.
    pub async fn invoke_batch(&self, calls: &[ToolCall]) -> Vec<ToolInvocation> {
        let handles = calls.iter().map(|call| {
            let function = call.function.clone().unwrap_or_default();
            let tool = self.resolve(&function.name);
            tokio::spawn(invoke_function(tool, function))
        });
        let joined = futures::future::join_all(handles).await;

        calls
            .iter()
            .zip(joined)
            .map(|(call, joined)| {
                let result = joined.unwrap_or_else(|e| {
                    let arguments = call
                        .function
                        .as_ref()
                        .map(|f| f.arguments.as_str())
                        .unwrap_or_default();
                    QueryResult::failure(format!("tool task failed: {e}"), arguments)
                });
                ToolInvocation {
                    call: call.clone(),
                    result,
                }
            })
            .collect()
    }
}

async fn invoke_function(tool: Option<Arc<dyn FunctionTool>>, function: FunctionCall) -> QueryResult {
    let Some(tool) = tool else {
        tracing::warn!(function = %function.name, "Agent called an unknown function");
        return unknown_function(&function.name);
    };

    let args: Value = match serde_json::from_str(&function.arguments) {
        Ok(args) => args,
        Err(e) => {
            tracing::warn!(function = %function.name, error = %e, "Malformed function arguments");
            return QueryResult {
                display_format: function.arguments.clone(),
                json_format: serde_json::json!({
                    "error": format!("invalid arguments: {e}"),
                    "arguments": function.arguments,
                })
                .to_string(),
            };
        }
    };

    let started = std::time::Instant::now();
    let result = tool.call(args).await;
    tracing::info!(
        function = %function.name,
        elapsed_ms = started.elapsed().as_millis(),
        "Function tool completed"
    );
    result
}

fn unknown_function(name: &str) -> QueryResult {
    QueryResult {
        display_format: format!("Function '{name}' is not available."),
        json_format: serde_json::json!({ "error": "unknown function", "function": name })
            .to_string(),
    }
}

/// Runs agent-authored SQL against the sales database.
#[derive(Debug)]
pub struct AskDatabaseTool {
    sales_data: Arc<SalesData>,
}

impl AskDatabaseTool {
    pub fn new(sales_data: Arc<SalesData>) -> Self {
        Self { sales_data }
    }
}

#[async_trait]
impl FunctionTool for AskDatabaseTool {
    fn name(&self) -> &str {
        "ask_database"
    }

    fn description(&self) -> &str {
        "This function is used to answer user questions about Contoso sales data by executing SQLite queries against the database."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The input should be a well-formed SQLite query to extract information based on the user's question. The query result will be returned as plain text, not in JSON format."
                }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    async fn call(&self, args: Value) -> QueryResult {
        let query = args.get("query").and_then(Value::as_str).unwrap_or_default();
        self.sales_data.execute(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct EchoTool;

    #[async_trait]
    impl FunctionTool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the text argument"
        }

        fn parameters(&self) -> Value {
            serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }

        async fn call(&self, args: Value) -> QueryResult {
            let text = args["text"].as_str().unwrap_or_default().to_string();
            QueryResult {
                display_format: text.clone(),
                json_format: text,
            }
        }
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::new()
            .with_code_interpreter()
            .with_file_search()
            .with_function(Arc::new(EchoTool))
    }

    #[test]
    fn test_tool_declarations() {
        let tools = registry().assistant_tools_json();
        assert_eq!(tools.len(), 3);
        assert_eq!(tools[0]["type"], "code_interpreter");
        assert_eq!(tools[1]["type"], "file_search");
        assert_eq!(tools[2]["function"]["name"], "echo");
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = registry();
        registry.register(Arc::new(EchoTool));
        assert_eq!(registry.specs().len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_function_yields_result() {
        let result = registry()
            .invoke(&FunctionCall {
                name: "drop_tables".into(),
                arguments: "{}".into(),
                output: None,
            })
            .await;
        assert!(result.display_format.contains("drop_tables"));
        assert!(result.json_format.contains("unknown function"));
    }

    #[tokio::test]
    async fn test_malformed_arguments_yield_result() {
        let result = registry()
            .invoke(&FunctionCall {
                name: "echo".into(),
                arguments: "{not json".into(),
                output: None,
            })
            .await;
        assert_eq!(result.display_format, "{not json");
        assert!(result.json_format.contains("invalid arguments"));
    }

    #[tokio::test]
    async fn test_batch_preserves_call_order() {
        let calls = vec![
            ToolCall::function("call_1", "echo", r#"{"text":"first"}"#),
            ToolCall::function("call_2", "echo", r#"{"text":"second"}"#),
        ];
        let results = registry().invoke_batch(&calls).await;
        assert_eq!(results[0].call.id, "call_1");
        assert_eq!(results[0].result.json_format, "first");
        assert_eq!(results[1].result.json_format, "second");
    }
}
