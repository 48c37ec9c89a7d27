//! MCP operations: tools, resources, prompts, completion and logging.
//!
//! Results are returned as raw JSON; the shapes belong to the application.

use mcplink_core::RequestOptions;
use mcplink_protocol::types::SetLevelRequest;
use mcplink_protocol::{LoggingLevel, McpResult, methods};
use serde_json::{Map, Value, json};

use super::core::Client;

fn cursor_params(cursor: Option<String>) -> Option<Value> {
    cursor.map(|cursor| json!({ "cursor": cursor }))
}

impl Client {
    async fn call(&self, method: &str, params: Option<Value>) -> McpResult<Value> {
        self.request(method, params, RequestOptions::default()).await
    }

    /// Check the server is alive
    pub async fn ping(&self) -> McpResult<()> {
        self.call(methods::PING, None).await.map(|_| ())
    }

    // ============================================================================
    // TOOLS
    // ============================================================================

    /// One page of `tools/list`
    pub async fn list_tools(&self, cursor: Option<String>) -> McpResult<Value> {
        self.call(methods::TOOLS_LIST, cursor_params(cursor)).await
    }

    /// Invoke tool `name`
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> McpResult<Value> {
        let mut params = Map::new();
        params.insert("name".to_string(), Value::String(name.to_string()));
        if let Some(arguments) = arguments {
            params.insert("arguments".to_string(), arguments);
        }
        self.call(methods::TOOLS_CALL, Some(Value::Object(params)))
            .await
    }

    // ============================================================================
    // RESOURCES
    // ============================================================================

    /// One page of `resources/list`
    pub async fn list_resources(&self, cursor: Option<String>) -> McpResult<Value> {
        self.call(methods::RESOURCES_LIST, cursor_params(cursor)).await
    }

    /// One page of `resources/templates/list`
    pub async fn list_resource_templates(&self, cursor: Option<String>) -> McpResult<Value> {
        self.call(methods::RESOURCES_TEMPLATES_LIST, cursor_params(cursor))
            .await
    }

    /// Read the resource at `uri`
    pub async fn read_resource(&self, uri: &str) -> McpResult<Value> {
        self.call(methods::RESOURCES_READ, Some(json!({ "uri": uri })))
            .await
    }

    /// Receive `notifications/resources/updated` for `uri`.
    ///
    /// Needs `resources.subscribe` from the server.
    pub async fn subscribe(&self, uri: &str) -> McpResult<()> {
        self.call(methods::RESOURCES_SUBSCRIBE, Some(json!({ "uri": uri })))
            .await
            .map(|_| ())
    }

    /// Stop receiving updates for `uri`
    pub async fn unsubscribe(&self, uri: &str) -> McpResult<()> {
        self.call(methods::RESOURCES_UNSUBSCRIBE, Some(json!({ "uri": uri })))
            .await
            .map(|_| ())
    }

    // ============================================================================
    // PROMPTS
    // ============================================================================

    /// One page of `prompts/list`
    pub async fn list_prompts(&self, cursor: Option<String>) -> McpResult<Value> {
        self.call(methods::PROMPTS_LIST, cursor_params(cursor)).await
    }

    /// Render prompt `name`
    pub async fn get_prompt(&self, name: &str, arguments: Option<Value>) -> McpResult<Value> {
        let mut params = Map::new();
        params.insert("name".to_string(), Value::String(name.to_string()));
        if let Some(arguments) = arguments {
            params.insert("arguments".to_string(), arguments);
        }
        self.call(methods::PROMPTS_GET, Some(Value::Object(params)))
            .await
    }

    // ============================================================================
    // COMPLETION AND LOGGING
    // ============================================================================

    /// Ask for completions of one argument.
    ///
    /// `reference` is the `ref` object, e.g. `{"type": "ref/prompt", "name": "greet"}`.
    pub async fn complete(
        &self,
        reference: Value,
        argument_name: &str,
        argument_value: &str,
    ) -> McpResult<Value> {
        let params = json!({
            "ref": reference,
            "argument": { "name": argument_name, "value": argument_value },
        });
        self.call(methods::COMPLETION_COMPLETE, Some(params)).await
    }

    /// Set the minimum level of `notifications/message` the server sends
    pub async fn set_logging_level(&self, level: LoggingLevel) -> McpResult<()> {
        let params = serde_json::to_value(SetLevelRequest { level })?;
        self.call(methods::LOGGING_SET_LEVEL, Some(params))
            .await
            .map(|_| ())
    }

    /// Tell the server the roots changed; needs `roots.listChanged`
    pub async fn send_roots_list_changed(&self) -> McpResult<()> {
        self.notify(methods::NOTIFICATION_ROOTS_LIST_CHANGED, None)
            .await
    }
}
