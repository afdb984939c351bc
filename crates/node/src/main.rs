//! Consensus helper node
//!
//! Operator entry point for the consensus helper. Wires the helper to an
//! in-process coordinator and the reference ledger engine so the replica
//! set, ordinal lookup, message dispatch and batch execution can be checked
//! against a node's `openchain` config.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use consensus_helper::{
    CancellationToken, ConsensusMessage, CoordinatorStats, Cpi, ExecutionOutcome, Helper,
    HelperError, LedgerEngine, LoopbackCoordinator, MessageType, PeerInbox, Replica,
    ReplicaIdentity, ReplicaSet, StateWrite, Transaction,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::NodeConfig;

/// Consensus helper node
#[derive(Parser, Debug)]
#[command(name = "cpi-node")]
#[command(about = "Inspect and exercise the consensus programming interface", long_about = None)]
struct Args {
    /// Name of this peer [default: vp0]
    #[arg(long)]
    peer_id: Option<String>,

    /// Address this peer is reachable on [default: 127.0.0.1:7051]
    #[arg(long)]
    address: Option<String>,

    /// Directory searched for the root config file [default: ./]
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Base name of the root config file [default: openchain]
    #[arg(long)]
    config_name: Option<String>,

    /// Chain served by the local ledger [default: default]
    #[arg(long)]
    chain: Option<String>,

    /// Execution deadline in milliseconds, 0 for none [default: 0]
    #[arg(long)]
    exec_deadline_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print this replica and the configured replica set
    Replicas,
    /// Resolve the ordinal of a replica address
    Ordinal {
        /// Replica address (`host:port`)
        address: String,
    },
    /// Execute `key=value` writes as one ordered batch
    Exec {
        /// Writes, applied in the order given
        writes: Vec<String>,
    },
    /// Broadcast a payload to every other configured replica
    Broadcast {
        /// Message type (consensus, transactions, heartbeat)
        #[arg(long, default_value = "consensus")]
        kind: MessageType,
        /// Payload text
        payload: String,
    },
    /// Send a payload to one replica
    Unicast {
        /// Receiver address (`host:port`)
        receiver: String,
        /// Payload text
        payload: String,
    },
}

impl From<&Args> for NodeConfig {
    fn from(args: &Args) -> Self {
        let defaults = NodeConfig::default();
        Self {
            peer_id: args.peer_id.clone().unwrap_or(defaults.peer_id),
            address: args.address.clone().unwrap_or(defaults.address),
            config_dir: args.config_dir.clone().unwrap_or(defaults.config_dir),
            config_name: args.config_name.clone().unwrap_or(defaults.config_name),
            chain: args.chain.clone().unwrap_or(defaults.chain),
            exec_deadline_ms: args.exec_deadline_ms.unwrap_or(defaults.exec_deadline_ms),
        }
    }
}

type NodeHelper = Helper<LoopbackCoordinator, LedgerEngine>;

#[derive(Serialize)]
struct ReplicaReport {
    #[serde(rename = "self")]
    self_identity: ReplicaIdentity,
    self_ordinal: Option<u64>,
    replicas: Vec<Replica>,
}

#[derive(Serialize)]
struct ExecReport {
    state_hash: Option<String>,
    applied: usize,
    cancelled: bool,
    errors: Vec<String>,
}

impl ExecReport {
    fn new(outcome: &ExecutionOutcome, submitted: usize, cancelled: bool) -> Self {
        Self {
            state_hash: outcome
                .state_hash
                .map(|hash| bs58::encode(hash).into_string()),
            applied: submitted.saturating_sub(outcome.errors.len()),
            cancelled,
            errors: outcome.errors.iter().map(|e| e.to_string()).collect(),
        }
    }
}

#[derive(Serialize)]
struct DispatchReport {
    delivered: Vec<ReplicaIdentity>,
    stats: CoordinatorStats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = NodeConfig::from(&args);
    tracing::info!("Starting consensus helper node {}", config.peer_id);
    tracing::info!("  Address: {}", config.address);
    tracing::info!("  Config: {:?}/{}.*", config.config_dir, config.config_name);
    tracing::info!("  Chain: {}", config.chain);

    let coordinator = Arc::new(LoopbackCoordinator::new(config.endpoint()));
    let engine = Arc::new(LedgerEngine::new(config.chain()));
    let helper = Helper::with_config_source(coordinator.clone(), engine, config.config_source())
        .with_chain(config.chain());

    match args.command {
        Command::Replicas => show_replicas(&helper),
        Command::Ordinal { address } => {
            let ordinal = helper.resolve_ordinal(&ReplicaIdentity::from_address(address))?;
            println!("{}", ordinal);
            Ok(())
        }
        Command::Exec { writes } => run_exec(&helper, &config, &writes).await,
        Command::Broadcast { kind, payload } => {
            run_broadcast(&helper, &coordinator, kind, payload).await
        }
        Command::Unicast { receiver, payload } => {
            run_unicast(&helper, &coordinator, receiver, payload).await
        }
    }
}

/// Print self and the configured network
fn show_replicas(helper: &NodeHelper) -> Result<()> {
    let (self_identity, network) = helper.self_and_network();
    let members =
        network.with_context(|| format!("replica set unavailable for {}", self_identity))?;
    let set = ReplicaSet::new(self_identity, members);

    if !set.contains_self() {
        tracing::warn!("{} is not listed in the replica config", set.self_identity);
    }
    let report = ReplicaReport {
        self_ordinal: set.ordinal_of(&set.self_identity),
        replicas: set.replicas().collect(),
        self_identity: set.self_identity.clone(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Parse `key=value` into an ordered batch
fn parse_writes(writes: &[String]) -> Result<Vec<Transaction>> {
    writes
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            let (key, value) = raw
                .split_once('=')
                .with_context(|| format!("expected key=value, got {:?}", raw))?;
            StateWrite::new(key, value.as_bytes())
                .to_transaction(format!("tx-{}", i))
                .context("encoding write")
        })
        .collect()
}

/// Execute a batch, cancelling on Ctrl+C or when the deadline passes
async fn run_exec(helper: &NodeHelper, config: &NodeConfig, writes: &[String]) -> Result<()> {
    let batch = parse_writes(writes)?;
    tracing::info!("Executing batch of {} transactions on {}", batch.len(), helper.chain());

    let result = if config.exec_deadline_ms > 0 {
        helper
            .executor()
            .execute_with_deadline(&batch, Duration::from_millis(config.exec_deadline_ms))
            .await
    } else {
        let cancel = CancellationToken::new();
        let ctrl_c = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Cancelling execution...");
                    cancel.cancel();
                }
            })
        };
        let result = helper.execute_transactions(&batch, &cancel).await;
        ctrl_c.abort();
        result
    };

    let report = match result {
        Ok(outcome) => ExecReport::new(&outcome, batch.len(), false),
        Err(HelperError::Cancelled {
            partial: Some(outcome),
        }) => ExecReport::new(&outcome, batch.len(), true),
        Err(e) => return Err(e.into()),
    };
    for error in &report.errors {
        tracing::warn!("{}", error);
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Attach an in-process inbox for every configured replica except self
fn attach_peers(
    helper: &NodeHelper,
    coordinator: &LoopbackCoordinator,
) -> Result<Vec<PeerInbox>> {
    let set = helper.directory().replica_set()?;
    Ok(set
        .members
        .iter()
        .filter(|member| **member != set.self_identity)
        .map(|member| coordinator.connect(member.clone(), 16))
        .collect())
}

/// Identities whose inbox received a message
fn drain(inboxes: &mut [PeerInbox]) -> Vec<ReplicaIdentity> {
    inboxes
        .iter_mut()
        .filter_map(|inbox| inbox.try_recv().map(|_| inbox.peer().clone()))
        .collect()
}

async fn run_broadcast(
    helper: &NodeHelper,
    coordinator: &LoopbackCoordinator,
    kind: MessageType,
    payload: String,
) -> Result<()> {
    let mut inboxes = attach_peers(helper, coordinator)?;
    let message = ConsensusMessage::new(kind, payload.into_bytes());
    helper.broadcast(&message).await?;

    let report = DispatchReport {
        delivered: drain(&mut inboxes),
        stats: coordinator.stats(),
    };
    tracing::info!("Broadcast delivered to {} replicas", report.delivered.len());
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_unicast(
    helper: &NodeHelper,
    coordinator: &LoopbackCoordinator,
    receiver: String,
    payload: String,
) -> Result<()> {
    let mut inboxes = attach_peers(helper, coordinator)?;
    let receiver = ReplicaIdentity::from_address(receiver);
    let ordinal = helper.resolve_ordinal(&receiver)?;
    helper.unicast(payload.as_bytes(), &receiver).await?;

    let report = DispatchReport {
        delivered: drain(&mut inboxes),
        stats: coordinator.stats(),
    };
    tracing::info!("Unicast to replica {} ({})", ordinal, receiver);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_writes_keeps_order() {
        let batch = parse_writes(&["a=1".to_string(), "b=x=y".to_string()]).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].id, "tx-0");
        let second = StateWrite::from_bytes(&batch[1].payload).unwrap();
        assert_eq!(second, StateWrite::new("b", "x=y"));
    }

    #[test]
    fn test_parse_writes_rejects_missing_separator() {
        assert!(parse_writes(&["novalue".to_string()]).is_err());
    }

    #[test]
    fn test_exec_report_counts_applied() {
        let outcome = ExecutionOutcome {
            state_hash: Some([0u8; 32]),
            errors: vec![consensus_helper::TransactionError::new(1, "bad")],
        };
        let report = ExecReport::new(&outcome, 3, false);
        assert_eq!(report.applied, 2);
        assert_eq!(report.errors, vec!["transaction 1 failed: bad".to_string()]);
        assert!(report.state_hash.is_some());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from([
            "cpi-node",
            "--address",
            "10.0.0.2:7051",
            "ordinal",
            "10.0.0.3:7051",
        ]);
        let config = NodeConfig::from(&args);
        assert_eq!(config.address, "10.0.0.2:7051");
        assert!(matches!(
            args.command,
            Command::Ordinal { ref address } if address == "10.0.0.3:7051"
        ));
    }

    #[test]
    fn test_unset_flags_fall_back_to_node_defaults() {
        let args = Args::parse_from(["cpi-node", "--chain", "mychain", "replicas"]);
        let config = NodeConfig::from(&args);
        let defaults = NodeConfig::default();
        assert_eq!(config.chain, "mychain");
        assert_eq!(config.peer_id, defaults.peer_id);
        assert_eq!(config.config_dir, defaults.config_dir);
        assert_eq!(config.exec_deadline_ms, 0);
    }

    #[test]
    fn test_broadcast_kind_flag() {
        let args = Args::parse_from(["cpi-node", "broadcast", "--kind", "heartbeat", "ping"]);
        assert!(matches!(
            args.command,
            Command::Broadcast { kind: MessageType::Heartbeat, ref payload } if payload == "ping"
        ));
    }

    #[tokio::test]
    async fn test_exec_on_configured_chain() {
        let config = NodeConfig {
            chain: "mychain".to_string(),
            ..NodeConfig::default()
        };
        let engine = Arc::new(LedgerEngine::new(config.chain()));
        let helper = Helper::with_config_source(
            Arc::new(LoopbackCoordinator::new(config.endpoint())),
            engine.clone(),
            config.config_source(),
        )
        .with_chain(config.chain());

        run_exec(&helper, &config, &["k=v".to_string()]).await.unwrap();
        assert_eq!(engine.get("k"), Some(b"v".to_vec()));
    }
}
