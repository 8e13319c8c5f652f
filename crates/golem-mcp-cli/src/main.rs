//! golem-mcp CLI: a thin binary that exercises `golem-mcp`'s public API
//! and formats the results as human-readable lines.
//!
//! Each invocation is self-contained: there is no background daemon. Any
//! subcommand that needs a live server (`start`, `tools`, `call`) spawns
//! the relevant child process for the lifetime of that one invocation and
//! stops it again before exiting, refreshing the on-disk manifest along
//! the way. `stop` and `restart` therefore mostly exercise the manager's
//! real `NotFound`/graceful-restart semantics rather than operate on a
//! persisted process, since nothing survives past the CLI's own exit.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Host-side manager for Model Context Protocol servers.
#[derive(Parser)]
#[command(name = "golem-mcp", author, version, about, long_about = None)]
struct Cli {
    /// Log level used when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a server in the manifest.
    Add {
        /// Unique server name.
        name: String,
        /// Command to run.
        command: String,
        /// Arguments for the command.
        args: Vec<String>,
        /// Register without starting it automatically on future `start_all` calls.
        #[arg(long)]
        no_auto_start: bool,
    },

    /// Remove a server from the manifest.
    Remove {
        /// Server name.
        name: String,
    },

    /// Start a server, probing its tools and capabilities into the manifest.
    Start {
        /// Server name.
        name: String,
    },

    /// Stop a server.
    Stop {
        /// Server name.
        name: String,
    },

    /// Restart a server (stop, ignoring failure, then start).
    Restart {
        /// Server name.
        name: String,
    },

    /// List every registered server.
    #[command(alias = "ls")]
    List,

    /// List tools, optionally scoped to a single server.
    Tools {
        /// Server name; every registered server when omitted.
        server: Option<String>,
    },

    /// Call a tool by qualified (`server.tool`) or unqualified name.
    Call {
        /// Tool name.
        tool: String,
        /// JSON-encoded arguments object.
        json: Option<String>,
    },

    /// Show audit entries recorded during this invocation.
    Audit {
        /// Server name to filter by.
        server: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = dispatch(cli.command).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn dispatch(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Add { name, command, args, no_auto_start } => {
            commands::add(&name, &command, args, !no_auto_start)
        },
        Command::Remove { name } => commands::remove(&name),
        Command::Start { name } => commands::start(&name).await,
        Command::Stop { name } => commands::stop(&name).await,
        Command::Restart { name } => commands::restart(&name).await,
        Command::List => commands::list(),
        Command::Tools { server } => commands::tools(server).await,
        Command::Call { tool, json } => commands::call(&tool, json).await,
        Command::Audit { server } => commands::audit(server),
    }
}
