//! # CLI Interface
//!
//! Command-line arguments for the `nspv` daemon, via `clap` derive.
//! Subcommands: `run`, `scan` and `version`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use nspv_protocol::config::{ChainParams, Network, DEFAULT_MAX_PEERS};

use crate::logging::LogFormat;

/// NSPV super-light client daemon.
///
/// Connects to a few full nodes, answers wallet queries over a local
/// newline-delimited JSON gateway, and verifies transactions against
/// notarized blocks without downloading the header chain.
#[derive(Parser, Debug)]
#[command(
    name = "nspv",
    about = "NSPV super-light client daemon",
    version,
    propagate_version = true
)]
pub struct NspvCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to peers and serve the RPC gateway until stopped.
    Run(NodeArgs),
    /// Sync chain info from peers, report it and exit.
    Scan(ScanArgs),
    /// Print version information and exit.
    Version,
}

/// Options shared by `run` and `scan`.
#[derive(Args, Debug, Clone)]
pub struct NodeArgs {
    /// Use the public test network.
    #[arg(long, short = 't', conflicts_with = "regtest")]
    pub testnet: bool,

    /// Use the local regression test network.
    #[arg(long, short = 'r')]
    pub regtest: bool,

    /// Full nodes to connect to, as `host[:port]`, comma separated. The
    /// chain's P2P port is used when a port is omitted.
    #[arg(long, short = 'i', env = "NSPV_IPS", value_delimiter = ',')]
    pub ips: Vec<String>,

    /// Upper bound on simultaneously connected peers.
    #[arg(long, short = 'm', env = "NSPV_MAXNODES", default_value_t = DEFAULT_MAX_PEERS)]
    pub maxnodes: usize,

    /// Header store location. `0` keeps headers in memory only.
    #[arg(long, short = 'f', env = "NSPV_DBFILE")]
    pub dbfile: Option<String>,

    /// Seconds allowed for a peer to connect and finish its handshake.
    #[arg(long, short = 's', env = "NSPV_TIMEOUT", default_value_t = 15)]
    pub timeout: u64,

    /// Port for the RPC gateway. Defaults to the chain's RPC port.
    #[arg(long, env = "NSPV_RPC_PORT")]
    pub rpc_port: Option<u16>,

    /// Port for the Prometheus metrics endpoint. Disabled when omitted.
    #[arg(long, env = "NSPV_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Verbose logging.
    #[arg(long, short = 'd')]
    pub debug: bool,

    /// Log output format: `pretty` or `json`.
    #[arg(long, env = "NSPV_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    #[command(flatten)]
    pub node: NodeArgs,

    /// Keep running after the first sync instead of exiting.
    #[arg(long, short = 'c')]
    pub continuous: bool,
}

/// Where headers live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    Memory,
    Path(PathBuf),
}

impl NodeArgs {
    pub fn network(&self) -> Network {
        if self.regtest {
            Network::Regtest
        } else if self.testnet {
            Network::Testnet
        } else {
            Network::Mainnet
        }
    }

    pub fn params(&self) -> ChainParams {
        ChainParams::for_network(self.network())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.max(1))
    }

    pub fn log_format(&self) -> LogFormat {
        LogFormat::from_str_lossy(&self.log_format)
    }

    pub fn log_level(&self) -> &'static str {
        if self.debug {
            "nspv_node=debug,nspv_protocol=debug,info"
        } else {
            "nspv_node=info,nspv_protocol=info,warn"
        }
    }

    pub fn store_location(&self, params: &ChainParams) -> StoreLocation {
        match self.dbfile.as_deref() {
            Some("0") => StoreLocation::Memory,
            Some(path) => StoreLocation::Path(PathBuf::from(path)),
            None => StoreLocation::Path(PathBuf::from(format!(
                "nspv-{}.db",
                params.name.to_lowercase()
            ))),
        }
    }

    pub fn rpc_addr(&self, params: &ChainParams) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], self.rpc_port.unwrap_or(params.rpc_port)))
    }

    /// Peer addresses in `host:port` form, defaulting the port.
    pub fn peer_targets(&self, params: &ChainParams) -> Vec<String> {
        self.ips
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| with_default_port(s, params.p2p_port))
            .collect()
    }
}

fn with_default_port(host: &str, port: u16) -> String {
    if host.parse::<SocketAddr>().is_ok() {
        return host.to_string();
    }
    // bare IPv6 literal
    if host.parse::<std::net::Ipv6Addr>().is_ok() {
        return format!("[{}]:{}", host, port);
    }
    match host.rsplit_once(':') {
        Some((_, p)) if p.parse::<u16>().is_ok() => host.to_string(),
        _ => format!("{}:{}", host, port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        NspvCli::command().debug_assert();
    }

    fn parse(args: &[&str]) -> NspvCli {
        NspvCli::try_parse_from(args).unwrap()
    }

    #[test]
    fn scan_flags() {
        let cli = parse(&[
            "nspv", "scan", "-t", "-c", "-i", "10.0.0.1,10.0.0.2:9999", "-s", "3", "-f", "0",
        ]);
        let Commands::Scan(scan) = cli.command else {
            panic!("expected scan");
        };
        assert!(scan.continuous);
        let node = scan.node;
        assert_eq!(node.network(), Network::Testnet);
        let params = node.params();
        assert_eq!(
            node.peer_targets(&params),
            vec!["10.0.0.1:17770".to_string(), "10.0.0.2:9999".to_string()]
        );
        assert_eq!(node.connect_timeout(), Duration::from_secs(3));
        assert_eq!(node.store_location(&params), StoreLocation::Memory);
        assert_eq!(node.rpc_addr(&params).port(), 17771);
        assert_eq!(node.maxnodes, DEFAULT_MAX_PEERS);
    }

    #[test]
    fn run_defaults_to_mainnet() {
        let Commands::Run(node) = parse(&["nspv", "run"]).command else {
            panic!("expected run");
        };
        let params = node.params();
        assert_eq!(params.name, "KMD");
        assert_eq!(node.timeout, 15);
        assert_eq!(
            node.store_location(&params),
            StoreLocation::Path(PathBuf::from("nspv-kmd.db"))
        );
        assert!(node.peer_targets(&params).is_empty());
        assert_eq!(node.log_format(), LogFormat::Pretty);
    }

    #[test]
    fn testnet_and_regtest_conflict() {
        assert!(NspvCli::try_parse_from(["nspv", "run", "-t", "-r"]).is_err());
    }

    #[test]
    fn default_port_handling() {
        assert_eq!(with_default_port("seed.example", 7770), "seed.example:7770");
        assert_eq!(with_default_port("seed.example:1", 7770), "seed.example:1");
        assert_eq!(with_default_port("::1", 7770), "[::1]:7770");
        assert_eq!(with_default_port("[::1]:5", 7770), "[::1]:5");
    }
}
