/*
    Uniform reliable broadcast guarantees that a message delivered by any process, correct or not, is eventually delivered by every correct process, and that each message is delivered at most once. The protocol here tolerates crashes of a minority and additionally recovers from arbitrary transient faults: whatever a fault leaves in memory, the processes converge back to a legal state and behave correctly from then on.

    Every process keeps a buffer of messages in flight and a pair of counters per peer bounding which messages are still live. A message is delivered once every peer the theta failure detector trusts has acknowledged it, and retired once delivered and acknowledged everywhere. Periodic rounds re-validate the buffer and counters, resend what peers still lack when their heartbeat counter moves, and gossip counter estimates so that lost state is rebuilt from the peers.
*/

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use simple_urb::api::{self, ApiState};
use simple_urb::common::config::ProtocolConfig;
use simple_urb::common::metrics::Metrics;
use simple_urb::common::telemetry::init_tracing;
use simple_urb::membership::Membership;
use simple_urb::network::udp::UdpTransport;
use simple_urb::network::Node;

#[derive(Parser, Debug)]
#[command(name = "simple-urb")]
#[command(version, about = "Self-stabilizing uniform reliable broadcast node", long_about = None)]
struct Cli {
    /// ID of this process, as listed in the hosts file
    #[arg(long, env = "ID")]
    id: usize,

    /// Hosts file with one `id,hostname,ip` line per process
    #[arg(long, default_value = "./hosts.txt")]
    hosts: PathBuf,

    /// TOML file with protocol settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind on; defaults to this process's address in the hosts file
    #[arg(long, env = "IP")]
    ip: Option<IpAddr>,

    /// Flow-control window
    #[arg(long, env = "BUFFER_UNIT_SIZE")]
    window: Option<u64>,

    /// Milliseconds between self-stabilization rounds
    #[arg(long, env = "MODULE_RUN_SLEEP_MS")]
    round_interval_ms: Option<u64>,

    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn protocol_config(&self) -> Result<ProtocolConfig> {
        let mut config = match &self.config {
            Some(path) => ProtocolConfig::load(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => ProtocolConfig::default(),
        };
        if let Some(window) = self.window {
            config.window = window;
        }
        if let Some(round_interval_ms) = self.round_interval_ms {
            config.round_interval_ms = round_interval_ms;
        }
        Ok(config)
    }

    /// Address to bind on. The process must be listed even when `--ip` overrides its address.
    fn bind_ip(&self, membership: &Membership) -> Result<IpAddr> {
        let listed = membership.require(self.id)?;
        Ok(self.ip.unwrap_or(listed.ip))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = cli.protocol_config()?;
    let membership = Membership::load(&cli.hosts)
        .with_context(|| format!("loading hosts file {}", cli.hosts.display()))?;
    let ip = cli.bind_ip(&membership)?;
    let peers = membership.peers();
    info!(process = cli.id, processes = peers.len(), window = config.window, "Starting");

    let metrics = Arc::new(Metrics::new().context("registering metrics")?);
    let transport = Arc::new(
        UdpTransport::bind(
            cli.id,
            SocketAddr::new(ip, config.udp_port(cli.id)?),
            membership.addresses(&config)?,
            &config,
            Arc::clone(&metrics),
        )
        .await
        .context("binding UDP transport")?,
    );

    let (node, mut deliveries) = Node::new(cli.id, peers, config.clone(), transport.clone(), metrics);
    let tasks = node.spawn();

    let resolver = Arc::clone(&node.resolver);
    let receiver = tokio::spawn(async move { transport.receive_loop(resolver).await });

    let api_addr = SocketAddr::new(ip, config.api_port(cli.id)?);
    let api = tokio::spawn(api::serve(
        api_addr,
        ApiState {
            resolver: Arc::clone(&node.resolver),
        },
    ));

    tokio::spawn(async move {
        while let Some(delivery) = deliveries.recv().await {
            info!(
                sender = delivery.identifier.sender,
                seq = delivery.identifier.seq,
                text = %delivery.message.text,
                "Application received message"
            );
        }
    });

    tokio::select! {
        result = receiver => {
            result.context("receive loop panicked")?.context("UDP receive loop failed")?;
        }
        result = api => {
            result.context("API task panicked")?.context("HTTP API failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!(process = cli.id, "Shutting down");
        }
    }

    for task in tasks {
        task.abort();
    }
    Ok(())
}
