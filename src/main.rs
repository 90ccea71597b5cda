//! MCP server for Cloud Firestore.
//!
//! Run with `firestore-mcp --transport stdio`, or `firestore-mcp --memory` to try the tools
//! without a Firebase project.

use std::future::Future;
use std::io::IsTerminal;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use firestore_mcp::config::{FirebaseConfig, ServerConfig, TransportMode, DEFAULT_HOST, DEFAULT_PORT};
use firestore_mcp::store::{FirestoreFactory, MemoryFactory, StoreConnector};
use firestore_mcp::tools::ToolRegistry;
use firestore_mcp::{transport, McpServer};

/// MCP server for Cloud Firestore.
///
/// Exposes document CRUD and collection queries as MCP tools for AI agents.
/// Firebase credentials are read from FIREBASE_* environment variables.
#[derive(Parser, Debug)]
#[command(name = "firestore-mcp")]
#[command(version, about, long_about = None)]
struct Args {
    /// Transport to serve on: stdio, sse or http.
    /// Defaults to http, or stdio when stdin is not a terminal.
    #[arg(long, env = "MCP_TRANSPORT", value_name = "MODE")]
    transport: Option<String>,

    /// Port for the HTTP and SSE transports.
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Bind address for the HTTP and SSE transports.
    #[arg(long, env = "MCP_HOST", default_value = DEFAULT_HOST)]
    host: String,

    /// Fail tool calls that take longer than this many seconds.
    #[arg(long, env = "MCP_TOOL_TIMEOUT_SECS", value_name = "SECS")]
    tool_timeout: Option<u64>,

    /// Use an in-memory document store instead of Firestore.
    /// Data is not persisted and no credentials are needed.
    #[arg(long)]
    memory: bool,

    /// Enable debug logging to stderr.
    #[arg(long, short)]
    verbose: bool,

    /// Only log errors.
    #[arg(long, short, conflicts_with = "verbose")]
    quiet: bool,
}

/// Initialises the tracing subscriber. Logs go to stderr; stdout belongs to stdio transport.
fn init_tracing(verbose: bool, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let failed = e.use_stderr();
            let _ = e.print();
            return if failed {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_tracing(args.verbose, args.quiet);

    let transport =
        match TransportMode::resolve(args.transport.as_deref(), std::io::stdin().is_terminal()) {
            Ok(mode) => mode,
            Err(e) => {
                error!(error = %e, "Invalid configuration");
                return ExitCode::FAILURE;
            }
        };

    let config = ServerConfig {
        transport,
        host: args.host,
        port: args.port,
        tool_timeout: args.tool_timeout.map(Duration::from_secs),
    };

    let store = if args.memory {
        info!("Using in-memory document store");
        StoreConnector::new(MemoryFactory::new())
    } else {
        StoreConnector::new(FirestoreFactory::new(FirebaseConfig::from_env()))
    };
    let registry = ToolRegistry::new().with_timeout(config.tool_timeout);
    let server = Arc::new(McpServer::new(store, registry));

    info!(
        version = env!("CARGO_PKG_VERSION"),
        transport = transport.as_str(),
        "Starting firestore-mcp"
    );

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match block_on_detached(runtime, transport::serve(&config, server)) {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}

/// Run `future` to completion, then drop the runtime without waiting on blocking threads.
///
/// A stdin read sits on a blocking thread that cannot be cancelled and would otherwise keep
/// the process alive after a shutdown signal until another line arrives.
fn block_on_detached<F: Future>(runtime: tokio::runtime::Runtime, future: F) -> F::Output {
    let output = runtime.block_on(future);
    runtime.shutdown_background();
    output
}
