//! mcplink demo
//!
//! Serve the demo tools over stdio (what MCP hosts launch):
//!
//! ```text
//! mcplink-demo serve
//! ```
//!
//! Or over Streamable HTTP, then call a tool from another terminal:
//!
//! ```text
//! mcplink-demo serve --http --bind 127.0.0.1:8080
//! mcplink-demo call --url http://127.0.0.1:8080 countdown -a '{"from": 5}'
//! ```
//!
//! Stdout belongs to the protocol in stdio mode; every log line goes to stderr.

mod cli;
mod tools;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use mcplink::http::{StaticTokenVerifier, StreamableHttpServerConfig, StreamableHttpServerTransport};
use mcplink::prelude::*;
use mcplink::protocol::ProgressNotification;
use mcplink::transport::InMemoryEventStore;
use tracing::info;

use cli::{CallArgs, Cli, Commands, Connection, ServeArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(args) => serve(args, cli.verbose).await,
        Commands::Call(args) => call(args, cli.verbose).await,
    }
}

async fn serve(args: ServeArgs, verbose: bool) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => ServerConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ServerConfig::default(),
    };
    let mut logging = config.logging.clone();
    if verbose {
        logging.level = "debug".to_string();
    }
    logging.init()?;

    let server = tools::demo_server(&config);
    let session = if args.http {
        let bind = args.bind.unwrap_or_else(|| config.bind_address.clone());
        let mut http = StreamableHttpServerConfig::default()
            .with_bind_addr(bind.clone())
            .with_event_store(Arc::new(InMemoryEventStore::new()));
        if let Some(token) = args.token {
            http = http.with_token_verifier(Arc::new(
                StaticTokenVerifier::new().with_token(token, "demo-client", ["tools"]),
            ));
        }
        let session = server.serve(StreamableHttpServerTransport::new(http)).await?;
        info!(%bind, "serving Streamable HTTP");
        session
    } else {
        let session = server.serve(StdioTransport::from_stdio()).await?;
        info!("serving stdio");
        session
    };

    tokio::select! {
        () = session.wait_closed() => info!("client disconnected"),
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("interrupted, shutting down");
            session.shutdown().await?;
        }
    }
    Ok(())
}

fn open_transport(conn: &Connection) -> McpResult<Arc<dyn Transport>> {
    if let Some(url) = &conn.url {
        let config = StreamableHttpClientConfig {
            auth_token: conn.token.clone(),
            ..StreamableHttpClientConfig::new(url.as_str())
        };
        return Ok(Arc::new(StreamableHttpClientTransport::new(config)?));
    }

    let mut parts = conn.command.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| McpError::invalid_params("--command is empty"))?;
    let mut command = tokio::process::Command::new(program);
    command.args(parts);
    Ok(Arc::new(StdioTransport::from_command(command)))
}

async fn call(args: CallArgs, verbose: bool) -> anyhow::Result<()> {
    LoggingConfig {
        level: if verbose { "debug" } else { "warn" }.to_string(),
        ..LoggingConfig::stderr_minimal()
    }
    .init()?;

    let arguments: Value =
        serde_json::from_str(&args.arguments).context("--arguments must be a JSON object")?;
    let conn = args.conn.clone();
    let client = Client::builder()
        .client_info(Implementation::new("mcplink-demo", env!("CARGO_PKG_VERSION")))
        .request_timeout(Duration::from_secs(args.timeout))
        .notification_handler(methods::NOTIFICATION_MESSAGE, |params: Option<Value>| async move {
            if let Some(params) = params {
                eprintln!("server log: {params}");
            }
            McpResult::Ok(())
        })
        .connect_with(move || open_transport(&conn))
        .await
        .context("connecting to server")?;

    if let Some(server) = client.server_info() {
        eprintln!(
            "connected to {} {} (protocol {})",
            server.name,
            server.version,
            client.protocol_version().unwrap_or_default()
        );
    }

    match args.tool {
        None => {
            let tools = client.list_tools(None).await?;
            println!("{}", serde_json::to_string_pretty(&tools)?);
        }
        Some(tool) => {
            let options = RequestOptions::new().with_progress(|p: ProgressNotification| {
                let total = p.total.map(|t| format!("/{t}")).unwrap_or_default();
                eprintln!(
                    "progress {}{total} {}",
                    p.progress,
                    p.message.as_deref().unwrap_or("")
                );
            });
            let result = client
                .request(
                    methods::TOOLS_CALL,
                    Some(json!({"name": tool, "arguments": arguments})),
                    options,
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    client.shutdown().await?;
    Ok(())
}
