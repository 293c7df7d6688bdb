//! # raft-sim
//!
//! why: run a simulated cluster from the command line and report how it ended
//! relations: drives raft_sim::Simulator, installs the tracing subscriber raft-core logs through
//! what: clap arguments, tick loop with periodic proposals and optional leader isolation, json summary

use clap::Parser;
use raft_core::{NodeId, Role, Term};
use raft_sim::{SimError, Simulator, SimulatorOptions};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "raft-sim")]
#[command(version)]
#[command(about = "Run a simulated Raft cluster on a logical clock")]
struct Args {
    /// Number of nodes in the cluster
    #[arg(long, short = 'n', default_value = "5")]
    nodes: usize,

    /// How many ticks to run
    #[arg(long, default_value = "300")]
    ticks: u64,

    /// Latency of every link, in ticks
    #[arg(long, default_value = "1")]
    channel_ticks: u64,

    /// Base election timeout, in ticks
    #[arg(long, default_value = "10")]
    election_ticks: u64,

    /// Heartbeat interval, in ticks
    #[arg(long, default_value = "2")]
    heartbeat_ticks: u64,

    /// Propose an entry every this many ticks (0 disables proposals)
    #[arg(long, default_value = "25")]
    propose_every: u64,

    /// Isolate whoever leads at this tick from the rest of the cluster
    #[arg(long)]
    isolate_leader_at: Option<u64>,

    /// Heal all links this many ticks after isolating the leader
    #[arg(long, default_value = "50")]
    heal_after: u64,

    /// Seed for election timeouts
    #[arg(long, env = "RAFT_SIM_SEED", default_value = "0")]
    seed: u64,

    /// Log level, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeSummary {
    id: NodeId,
    role: Role,
    term: Term,
    commit_index: u64,
    log_length: usize,
    committed: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary {
    ticks: u64,
    proposed: u64,
    leader: Option<NodeId>,
    nodes: Vec<NodeSummary>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    let mut sim = Simulator::new(SimulatorOptions {
        num_of_nodes: args.nodes,
        message_channel_ticks: args.channel_ticks,
        node_election_ticks: args.election_ticks,
        node_heartbeat_ticks: args.heartbeat_ticks,
        seed: args.seed,
    })?;

    let mut proposed = 0;
    let mut heal_at = None;

    for tick in 1..=args.ticks {
        sim.tick();

        if args.isolate_leader_at == Some(tick) {
            match sim.leader() {
                Some(leader) => {
                    sim.partition(&[leader])?;
                    heal_at = Some(tick + args.heal_after);
                }
                None => tracing::warn!(tick, "no leader to isolate"),
            }
        }
        if heal_at == Some(tick) {
            sim.heal();
        }

        if args.propose_every > 0 && tick % args.propose_every == 0 {
            match sim.propose(format!("cmd-{}", proposed + 1)) {
                Ok(leader) => {
                    proposed += 1;
                    tracing::info!(tick, leader, entry = proposed, "proposed");
                }
                Err(SimError::NoLeader) => tracing::warn!(tick, "proposal skipped, no leader"),
                Err(e) => return Err(e.into()),
            }
        }
    }
    sim.stop();

    let nodes = sim
        .state()
        .node_states
        .values()
        .map(|s| NodeSummary {
            id: s.id,
            role: s.role,
            term: s.current_term,
            commit_index: s.commit_index,
            log_length: s.log.len(),
            committed: sim.committed(s.id).map_or(0, |c| c.len()),
        })
        .collect();

    let summary = Summary {
        ticks: sim.state().tick,
        proposed,
        leader: sim.leader(),
        nodes,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
