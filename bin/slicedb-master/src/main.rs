//! SliceDB master CLI
//!
//! Offline operator tool composing and signing cluster specs. The
//! two-phase rollout is driven with `propose` (push the spec to every
//! node), `sync` (trigger background slice pulls), and `approve`
//! (accepted only once every node reports synced).

mod model;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use slicedb_common::abbrev_id;
use slicedb_node::NodeRpc;
use slicedb_spec::DraftNode;

use model::{new_cluster_dir, Model, STAGE_APPROVED, STAGE_PROPOSED};

/// Default port of the node HTTP service
const DEFAULT_HTTP_PORT: u16 = 5670;

#[derive(Parser)]
#[command(name = "slicedb-master")]
#[command(about = "SliceDB cluster master")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new cluster directory
    New {
        path: String,
        /// Replication factor of the cluster
        #[arg(long, default_value_t = 2)]
        replicas: u32,
    },
    /// Invite a node and add it to the draft
    Add {
        addr: String,
        /// Weight of the node
        #[arg(long, default_value_t = 1)]
        weight: u32,
    },
    /// Remove a node from the draft
    Remove { index: usize },
    /// Alter a node's address or weight
    Alter {
        index: usize,
        #[arg(long)]
        addr: Option<String>,
        #[arg(long)]
        weight: Option<u32>,
    },
    /// List nodes in the draft
    List,
    /// Query status of nodes in the proposed spec
    Status,
    /// Dispatch the spec to all nodes
    Propose,
    /// Notify nodes to sync towards the proposed spec
    Sync,
    /// Approve the proposed spec on all nodes
    Approve,
}

#[tokio::main]
async fn main() -> Result<()> {
    match Cli::parse().command {
        Command::New { path, replicas } => new_cluster(&path, replicas),
        Command::Add { addr, weight } => add(addr, weight).await,
        Command::Remove { index } => remove(index),
        Command::Alter {
            index,
            addr,
            weight,
        } => alter(index, addr, weight),
        Command::List => list(),
        Command::Status => status().await,
        Command::Propose => propose().await,
        Command::Sync => sync().await,
        Command::Approve => approve().await,
    }
}

fn new_cluster(path: &str, replicas: u32) -> Result<()> {
    let dir = new_cluster_dir(path)?;
    if dir.exists() {
        bail!("db exists");
    }

    let model = Model::create(&dir, replicas)?;
    std::fs::create_dir_all(&dir).context("create cluster dir")?;
    model.save()?;
    println!("db created at {}", dir.display());
    Ok(())
}

fn normalize_addr(addr: String) -> String {
    if addr.contains(':') {
        addr
    } else {
        format!("{addr}:{DEFAULT_HTTP_PORT}")
    }
}

async fn add(addr: String, weight: u32) -> Result<()> {
    let addr = normalize_addr(addr);
    let mut model = Model::current()?;
    let approved = model.load_spec(STAGE_APPROVED)?;

    let rpc = NodeRpc::new().with_identity(Arc::new(model.identity().clone()), "");
    let node_id = rpc.invite(&addr, approved.as_ref()).await?;

    model.add_node(DraftNode {
        id: node_id.clone(),
        addr,
        weight,
    })?;
    model.save()?;
    println!("node added, ID {node_id}");
    Ok(())
}

fn remove(index: usize) -> Result<()> {
    let mut model = Model::current()?;
    model.remove_node(index)?;
    model.save()
}

fn alter(index: usize, addr: Option<String>, weight: Option<u32>) -> Result<()> {
    let mut model = Model::current()?;
    let mut node = model.node(index)?.clone();
    if let Some(addr) = addr {
        node.addr = normalize_addr(addr);
    }
    if let Some(weight) = weight {
        node.weight = weight;
    }
    model.alter_node(index, node)?;
    model.save()
}

fn list() -> Result<()> {
    let model = Model::current()?;
    println!("cluster ID: {}", model.identity().id());
    println!("replicas: {}", model.draft().replicas);
    for (i, node) in model.draft().nodes.iter().enumerate() {
        println!(
            "[{i}]\t{}\t{}\t{}",
            abbrev_id(&node.id),
            node.addr,
            node.weight
        );
    }
    Ok(())
}

async fn status() -> Result<()> {
    let model = Model::current()?;
    let proposed = model
        .load_spec(STAGE_PROPOSED)?
        .context("no proposed spec")?;

    let rpc = NodeRpc::new();
    for entry in &proposed.sat.entries {
        let status = match rpc.get_status(&entry.addr).await {
            Ok(s) => {
                let r = s.spec_revisions;
                format!("{},{},{}", r.newest, r.synced, r.approved)
            }
            Err(err) => format!("\"{err}\""),
        };
        let sync_status = match rpc.get_sync_status(&entry.addr, proposed.revision).await {
            Ok(s) => format!("{}/{}", s.synced_slice_count, s.total_slice_count),
            Err(err) => format!("\"{err}\""),
        };
        println!(
            "{}\t{}\t{status}\t{sync_status}",
            abbrev_id(&entry.id),
            entry.addr
        );
    }
    Ok(())
}

async fn propose() -> Result<()> {
    let model = Model::current()?;
    let spec = model.build_spec()?;

    let identity = Arc::new(model.identity().clone());
    for entry in &spec.sat.entries {
        let rpc = NodeRpc::new().with_identity(identity.clone(), entry.id.clone());
        rpc.propose_spec(&entry.addr, &spec)
            .await
            .with_context(|| format!("propose to {}", entry.addr))?;
    }

    model.save_spec(STAGE_PROPOSED, &spec)?;
    if spec.revision == 0 {
        model.save_spec(STAGE_APPROVED, &spec)?;
    }
    println!("proposed revision {}", spec.revision);
    Ok(())
}

async fn sync() -> Result<()> {
    let model = Model::current()?;
    let proposed = model
        .load_spec(STAGE_PROPOSED)?
        .context("no proposed spec")?;

    let identity = Arc::new(model.identity().clone());
    for entry in &proposed.sat.entries {
        let rpc = NodeRpc::new().with_identity(identity.clone(), entry.id.clone());
        rpc.sync_to_spec(&entry.addr, proposed.revision)
            .await
            .with_context(|| format!("sync on {}", entry.addr))?;
    }
    Ok(())
}

async fn approve() -> Result<()> {
    let model = Model::current()?;
    let proposed = model
        .load_spec(STAGE_PROPOSED)?
        .context("no proposed spec")?;

    let rpc = NodeRpc::new();
    for entry in &proposed.sat.entries {
        let status = rpc
            .get_status(&entry.addr)
            .await
            .with_context(|| format!("query status of {}", entry.addr))?;
        if status.spec_revisions.synced != proposed.revision as i64 {
            bail!("node {} not synced", abbrev_id(&entry.id));
        }
    }

    let identity = Arc::new(model.identity().clone());
    for entry in &proposed.sat.entries {
        let rpc = NodeRpc::new().with_identity(identity.clone(), entry.id.clone());
        rpc.approve_spec(&entry.addr, proposed.revision)
            .await
            .with_context(|| format!("approve on {}", entry.addr))?;
    }
    model.save_spec(STAGE_APPROVED, &proposed)?;
    println!("approved revision {}", proposed.revision);
    Ok(())
}
