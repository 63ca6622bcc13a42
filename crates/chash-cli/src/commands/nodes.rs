//! Node lifecycle commands.

use super::with_dispatcher;
use anyhow::Result;
use colored::Colorize;
use tarpc::context;

/// List registered nodes.
pub fn list(addr: &str) -> Result<()> {
    with_dispatcher(addr, |client| async move {
        let nodes = client.list_nodes(context::current()).await?;

        println!("{}", "Cluster Nodes".green().bold());
        println!("  Dispatcher: {}", addr);
        println!("  Nodes: {}", nodes.len());
        for node in &nodes {
            println!("    {} -- port {}", node.node_id.cyan(), node.port);
        }
        if nodes.is_empty() {
            println!("    (no nodes registered)");
        }
        Ok(())
    })
}

/// Start a worker node.
pub fn add(addr: &str, port: u16, path: Option<String>) -> Result<()> {
    println!(
        "{} Starting node on port {}...",
        "nodes".green().bold(),
        port
    );
    with_dispatcher(addr, |client| async move {
        let created = client.create_node(context::current(), port, path).await??;
        println!(
            "{} Node {} on port {}",
            "ready".green().bold(),
            created.node_id.cyan(),
            created.port
        );
        println!("  Migrated: {}", created.migrated);
        println!("  {}", created.message.dimmed());
        Ok(())
    })
}

/// Drain and stop a worker node.
pub fn remove(addr: &str, id: &str) -> Result<()> {
    let id = id.to_string();
    with_dispatcher(addr, |client| async move {
        let deleted = client.delete_node(context::current(), id).await??;
        println!(
            "{} Node {} removed",
            "done".green().bold(),
            deleted.node_id.cyan()
        );
        println!("  Migrated: {}", deleted.migrated);
        println!("  {}", deleted.message.dimmed());
        Ok(())
    })
}

/// Move misplaced records to their owners.
pub fn rebalance(addr: &str) -> Result<()> {
    with_dispatcher(addr, |client| async move {
        let summary = client.rebalance(context::current()).await??;
        println!("{}", "Rebalance".green().bold());
        println!("  Migrated: {}", summary.migrated);
        println!("  Stale copies: {}", summary.stale);
        for (node, reason) in &summary.aborted {
            println!("  {} {}: {}", "aborted".red().bold(), node.cyan(), reason);
        }
        Ok(())
    })
}

/// Stop the cluster.
pub fn shutdown(addr: &str, requester: &str) -> Result<()> {
    let requester = requester.to_string();
    with_dispatcher(addr, |client| async move {
        let message = client.shutdown(context::current(), requester).await??;
        println!("{} {}", "shutdown".yellow().bold(), message);
        Ok(())
    })
}
