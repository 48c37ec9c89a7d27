//! Command line arguments

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// mcplink demo: a small tool server and a client to talk to it
#[derive(Parser, Debug)]
#[command(name = "mcplink-demo", version, about)]
pub(crate) struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub(crate) command: Commands,

    /// Log at debug level (logs go to stderr)
    #[arg(long, short = 'v', global = true)]
    pub(crate) verbose: bool,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Run the demo server over stdio, or Streamable HTTP with --http
    Serve(ServeArgs),

    /// Connect to a server, list its tools and optionally call one
    Call(CallArgs),
}

#[derive(Args, Debug)]
pub(crate) struct ServeArgs {
    /// Server settings file (TOML, YAML or JSON)
    #[arg(long, short = 'c', env = "MCPLINK_CONFIG")]
    pub(crate) config: Option<PathBuf>,

    /// Serve Streamable HTTP instead of stdio
    #[arg(long)]
    pub(crate) http: bool,

    /// Address for --http; defaults to `bind_address` from the config
    #[arg(long, requires = "http")]
    pub(crate) bind: Option<String>,

    /// Bearer token HTTP clients must present
    #[arg(long, env = "MCPLINK_TOKEN", requires = "http")]
    pub(crate) token: Option<String>,
}

#[derive(Args, Debug)]
pub(crate) struct CallArgs {
    #[command(flatten)]
    pub(crate) conn: Connection,

    /// Tool to call
    pub(crate) tool: Option<String>,

    /// Tool arguments as a JSON object
    #[arg(long, short = 'a', default_value = "{}")]
    pub(crate) arguments: String,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub(crate) timeout: u64,
}

/// Where the server lives
#[derive(Args, Debug, Clone)]
pub(crate) struct Connection {
    /// Streamable HTTP endpoint, e.g. http://127.0.0.1:8080
    #[arg(long, conflicts_with = "command")]
    pub(crate) url: Option<String>,

    /// Bearer token for --url
    #[arg(long, env = "MCPLINK_TOKEN", requires = "url")]
    pub(crate) token: Option<String>,

    /// Server command line to spawn over stdio
    #[arg(long, default_value = "mcplink-demo serve")]
    pub(crate) command: String,
}
