//! The demo server's tools

use std::time::Duration;

use mcplink::prelude::*;
use tracing::{debug, info};

pub(crate) fn demo_server(config: &ServerConfig) -> Server {
    ServerBuilder::from_config(config)
        .capabilities(
            ServerCapabilities::default()
                .enable_tools(false)
                .enable_logging(),
        )
        .request_handler(methods::TOOLS_LIST, list_tools)
        .request_handler(methods::TOOLS_CALL, call_tool)
        .on_initialized(|negotiated: &Negotiated| {
            info!(
                client = %negotiated.peer_info.name,
                version = %negotiated.protocol_version,
                "client ready"
            );
        })
        .build()
}

async fn list_tools(_params: Option<Value>, _ctx: RequestContext) -> McpResult<Value> {
    Ok(json!({
        "tools": [
            {
                "name": "hello",
                "description": "Greet someone",
                "inputSchema": {
                    "type": "object",
                    "properties": {"name": {"type": "string"}}
                }
            },
            {
                "name": "add",
                "description": "Add two integers",
                "inputSchema": {
                    "type": "object",
                    "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}},
                    "required": ["a", "b"]
                }
            },
            {
                "name": "countdown",
                "description": "Count down slowly, reporting progress",
                "inputSchema": {
                    "type": "object",
                    "properties": {"from": {"type": "integer", "minimum": 1, "maximum": 50}},
                    "required": ["from"]
                }
            }
        ]
    }))
}

async fn call_tool(params: Option<Value>, ctx: RequestContext) -> McpResult<Value> {
    let params = params.unwrap_or_default();
    let name = params["name"]
        .as_str()
        .ok_or_else(|| McpError::invalid_params("tool name is required"))?;
    let args = &params["arguments"];
    debug!(tool = name, "calling tool");

    let text = match name {
        "hello" => format!("Hello, {}!", args["name"].as_str().unwrap_or("World")),
        "add" => {
            let (Some(a), Some(b)) = (args["a"].as_i64(), args["b"].as_i64()) else {
                return Err(McpError::invalid_params("add needs integers a and b"));
            };
            a.checked_add(b)
                .ok_or_else(|| McpError::invalid_params("sum overflows"))?
                .to_string()
        }
        "countdown" => countdown(args["from"].as_u64().unwrap_or(3).clamp(1, 50), &ctx).await?,
        other => return Err(McpError::invalid_params(format!("unknown tool: {other}"))),
    };
    Ok(text_result(text))
}

async fn countdown(from: u64, ctx: &RequestContext) -> McpResult<String> {
    for done in 0..from {
        if ctx.is_cancelled() {
            return Err(McpError::cancelled("countdown cancelled"));
        }
        ctx.report_progress(done as f64, Some(from as f64), Some(format!("{} left", from - done)))
            .await?;
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    Ok("liftoff".to_string())
}

fn text_result(text: String) -> Value {
    json!({"content": [{"type": "text", "text": text}]})
}
