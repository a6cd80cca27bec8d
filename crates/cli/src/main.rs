mod config;
mod error;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use policy::Policy;
use runtime::{
    BuiltinToolHost, McpToolHost, SandboxExecutor, SandboxToolHost, Sidecar, ToolComposer,
    ToolContext, ToolHost,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use config::{CONFIG_FILE, Config};
use error::{Error, Result};

#[derive(Parser)]
#[command(name = "toolhost")]
#[command(about = "Sandboxed tool execution for agent runtimes", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Directory holding the session workspaces
    #[arg(long, global = true)]
    workspace_root: Option<PathBuf>,

    /// All sessions share the workspace root
    #[arg(long, global = true)]
    shared: bool,

    /// Session id (default: a fresh UUID)
    #[arg(long, global = true)]
    session: Option<String>,

    /// Only expose tools with this capability (repeatable)
    #[arg(long = "allow", global = true, value_name = "CAPABILITY")]
    allow: Vec<String>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the tools visible under the current policy
    Tools {
        /// Print the full catalog as JSON
        #[arg(long)]
        json: bool,
    },
    /// Call one tool and print its result as JSON
    Call {
        /// Tool name
        name: String,
        /// Arguments as a JSON object
        #[arg(default_value = "{}")]
        args: String,
    },
    /// Serve sandbox requests as JSON lines on stdin/stdout
    Serve,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Logs go to stderr; stdout carries command output.
fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(&cli.config)?;
    if let Some(root) = &cli.workspace_root {
        config.workspace_root = root.clone();
    }
    if cli.shared {
        config.shared_workspace = true;
    }
    debug!(config = %cli.config.display(), root = %config.workspace_root.display(), "loaded config");

    match cli.command {
        Commands::Tools { json } => {
            let stack = Stack::build(&config, &cli.allow).await;
            let result = cmd_tools(&stack.composer, json).await;
            stack.shutdown().await;
            result
        }
        Commands::Call { ref name, ref args } => {
            let stack = Stack::build(&config, &cli.allow).await;
            let session = cli.session.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
            let result = cmd_call(&stack.composer, &session, name, args).await;
            stack.shutdown().await;
            result
        }
        Commands::Serve => cmd_serve(&config).await,
    }
}

/// The composed hosts plus the MCP hosts to shut down afterwards.
struct Stack {
    composer: ToolComposer,
    servers: Vec<Arc<McpToolHost>>,
}

impl Stack {
    async fn build(config: &Config, allow: &[String]) -> Self {
        let sandbox = SandboxToolHost::new(SandboxExecutor::new(config.sandbox_config()));
        let mut composer = ToolComposer::new()
            .with_host("builtin", Arc::new(BuiltinToolHost::with_defaults()))
            .with_host("sandbox", Arc::new(sandbox))
            .with_policy(config.policy.clone());

        let mut servers = Vec::new();
        for entry in &config.servers {
            let label = entry.server.display_name().to_string();
            let mut host = McpToolHost::spawn(entry.server.clone()).await;
            if let Some(capabilities) = &entry.capabilities {
                host = host.with_capabilities(capabilities.iter().cloned());
            }
            let host = Arc::new(host);
            composer.register(label, host.clone());
            servers.push(host);
        }

        if !allow.is_empty() {
            composer = composer.scoped(&Policy::allow_only(allow.iter().map(String::as_str)));
        }
        info!(hosts = ?composer.labels().collect::<Vec<_>>(), "tool hosts ready");

        Self { composer, servers }
    }

    async fn shutdown(self) {
        for host in &self.servers {
            host.server().shutdown().await;
        }
    }
}

async fn cmd_tools(composer: &ToolComposer, json: bool) -> Result<()> {
    let tools = composer.list_tools().await.map_err(|source| Error::Tool {
        name: "tools".to_string(),
        source,
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tools)?);
        return Ok(());
    }

    if tools.is_empty() {
        println!("No tools available.");
        return Ok(());
    }

    println!("{:<24}  {:<24}  DESCRIPTION", "NAME", "CAPABILITIES");
    println!("{}", "-".repeat(80));
    for tool in &tools {
        let caps: Vec<&str> = tool.capability_tags().collect();
        let description = tool.description.lines().next().unwrap_or_default();
        println!("{:<24}  {:<24}  {description}", tool.name, caps.join(","));
    }
    Ok(())
}

async fn cmd_call(composer: &ToolComposer, session: &str, name: &str, args: &str) -> Result<()> {
    let ctx = ToolContext::new(session)
        .with_tool_call_id(Uuid::new_v4().to_string())
        .with_on_update(|delta, _| eprint!("{delta}"));

    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    info!(tool = name, session_id = session, "calling tool");
    let value = composer
        .call_tool(name, args, &ctx)
        .await
        .map_err(|source| Error::Tool {
            name: name.to_string(),
            source,
        })?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn cmd_serve(config: &Config) -> Result<()> {
    let sidecar = Sidecar::new(SandboxExecutor::new(config.sandbox_config()));
    sidecar
        .serve(tokio::io::stdin(), tokio::io::stdout())
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "toolhost",
            "call",
            "echo",
            r#"{"text":"hi"}"#,
            "--session",
            "s1",
            "--allow",
            "fs_read",
            "--allow",
            "exec",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.session.as_deref(), Some("s1"));
        assert_eq!(cli.allow, ["fs_read", "exec"]);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Call { ref name, .. } if name == "echo"));
    }

    #[test]
    fn call_args_default_to_empty_object() {
        let cli = Cli::try_parse_from(["toolhost", "call", "current_time"]).unwrap();
        assert!(matches!(cli.command, Commands::Call { ref args, .. } if args == "{}"));
        assert_eq!(cli.config, PathBuf::from(CONFIG_FILE));
    }

    #[tokio::test]
    async fn allow_flag_narrows_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            workspace_root: dir.path().to_path_buf(),
            ..Config::default()
        };
        let stack = Stack::build(&config, &["exec".to_string()]).await;
        let names: Vec<String> = stack
            .composer
            .list_tools()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, ["bash"]);
        stack.shutdown().await;
    }

    #[tokio::test]
    async fn call_writes_into_session_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            workspace_root: dir.path().to_path_buf(),
            ..Config::default()
        };
        let stack = Stack::build(&config, &[]).await;
        cmd_call(
            &stack.composer,
            "cli-session",
            "write",
            r#"{"path":"out.txt","content":"ok"}"#,
        )
        .await
        .unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("cli-session/out.txt")).unwrap(),
            "ok"
        );

        let err = cmd_call(&stack.composer, "cli-session", "missing", "{}")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("[unknown_tool]"), "{err}");
    }
}
