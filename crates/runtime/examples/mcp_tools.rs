//! List the tools of an MCP server next to the built-in tools, and
//! optionally call one.
//!
//! Run with:
//!   cargo run --example mcp_tools -- mcp-server-filesystem /tmp
//!   TOOL=read_file ARGS='{"path":"/tmp/x.txt"}' cargo run --example mcp_tools -- mcp-server-filesystem /tmp

use std::sync::Arc;

use mcp::ServerConfig;
use runtime::{BuiltinToolHost, McpToolHost, ToolComposer, ToolContext, ToolHost};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);
    let Some(command) = argv.next() else {
        eprintln!("usage: mcp_tools <server-command> [args...]");
        std::process::exit(2);
    };
    let config = ServerConfig::new(command)
        .with_name("demo")
        .with_args(argv);

    let mcp = Arc::new(McpToolHost::spawn(config).await);
    let composer = ToolComposer::new()
        .with_host("builtin", Arc::new(BuiltinToolHost::with_defaults()))
        .with_host("demo", mcp.clone());

    let tools = composer.list_tools().await?;
    println!("Discovered {} tools:", tools.len());
    for tool in &tools {
        let caps: Vec<&str> = tool.capability_tags().collect();
        println!("  - {} [{}]", tool.name, caps.join(", "));
        if !tool.description.is_empty() {
            println!("    {}", tool.description);
        }
    }

    if let Ok(name) = std::env::var("TOOL") {
        let args = std::env::var("ARGS").unwrap_or_default();
        let ctx = ToolContext::new("example");
        match composer.call_tool(&name, &args, &ctx).await {
            Ok(value) => println!("\n{name} returned:\n{value}"),
            Err(e) => println!("\n{name} failed [{}]: {e}", e.code()),
        }
    }

    mcp.server().shutdown().await;
    Ok(())
}
