//! # CLI Interface
//!
//! Defines the command-line argument structure for `moniker-node` using
//! `clap` derive. `run` starts a bootstrap index node; `keygen`,
//! `register` and `resolve` are the owner-side tools that talk to one.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use moniker_protocol::identity::KeyKind;

use crate::logging::LogFormat;

/// Moniker bootstrap index node.
///
/// Serves the federated name index over HTTP, gossips verified records to
/// other nodes and exposes Prometheus metrics. The same binary generates
/// identities and registers names against a running node.
#[derive(Parser, Debug)]
#[command(
    name = "moniker-node",
    about = "Moniker decentralized naming node",
    version,
    propagate_version = true
)]
pub struct MonikerCli {
    /// Log output format.
    #[arg(
        long,
        global = true,
        value_enum,
        env = "MONIKER_LOG_FORMAT",
        default_value_t = LogFormat::Pretty
    )]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a bootstrap index node.
    Run(RunArgs),
    /// Generate an identity and write it to a key file.
    Keygen(KeygenArgs),
    /// Mine, sign and submit a name record.
    Register(RegisterArgs),
    /// Resolve a name through a running node.
    Resolve(ResolveArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
///
/// Every flag overrides the matching field of the config file.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Path to the node configuration file (TOML).
    ///
    /// When omitted, the node looks for `config.toml` in the data directory.
    #[arg(long, short = 'c', env = "MONIKER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the sled index database.
    #[arg(long, short = 'd', env = "MONIKER_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Port for the HTTP API.
    #[arg(long, env = "MONIKER_API_PORT")]
    pub api_port: Option<u16>,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "MONIKER_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Network: mainnet or devnet.
    #[arg(long, env = "MONIKER_NETWORK")]
    pub network: Option<String>,

    /// Identifier this node stamps on the gossip it originates.
    #[arg(long, env = "MONIKER_NODE_ID")]
    pub node_id: Option<String>,

    /// Base URLs of peer bootstrap nodes, comma separated.
    #[arg(long, env = "MONIKER_PEERS", value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Reject submissions that do not carry a signed nonce.
    #[arg(long, env = "MONIKER_REQUIRE_NONCE")]
    pub require_nonce: bool,
}

/// Key kind as accepted on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKindArg {
    /// Ed25519 only; registers version 1 records.
    Legacy,
    /// Ed25519 + Dilithium3; registers version 2 records.
    Hybrid,
}

impl From<KeyKindArg> for KeyKind {
    fn from(kind: KeyKindArg) -> Self {
        match kind {
            KeyKindArg::Legacy => KeyKind::Legacy,
            KeyKindArg::Hybrid => KeyKind::Hybrid,
        }
    }
}

/// Arguments for the `keygen` subcommand.
#[derive(Args, Debug)]
pub struct KeygenArgs {
    #[arg(long, value_enum, default_value_t = KeyKindArg::Hybrid)]
    pub kind: KeyKindArg,

    /// Where to write the key file.
    #[arg(long, short = 'o', default_value = "moniker.key")]
    pub out: PathBuf,

    /// Seal the key file with this password.
    #[arg(long, env = "MONIKER_KEY_PASSWORD")]
    pub password: Option<String>,

    /// Overwrite an existing key file.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `register` subcommand.
#[derive(Args, Debug)]
pub struct RegisterArgs {
    /// Name to claim.
    pub name: String,

    /// Content identifier the name points at.
    pub cid: String,

    /// Key file of the owner.
    #[arg(long, short = 'k', default_value = "moniker.key")]
    pub key: PathBuf,

    #[arg(long, env = "MONIKER_KEY_PASSWORD")]
    pub password: Option<String>,

    /// Bootstrap node to submit to.
    #[arg(long, default_value = "http://127.0.0.1:7070")]
    pub node: String,

    /// Network whose difficulty schedule applies.
    #[arg(long, env = "MONIKER_NETWORK", default_value = "devnet")]
    pub network: String,

    /// Request and sign a submission nonce first.
    #[arg(long)]
    pub with_nonce: bool,

    /// Publish the next revision of the record the node currently holds.
    #[arg(long)]
    pub update: bool,

    /// Record lifetime in days.
    #[arg(long, default_value_t = 365)]
    pub lifetime_days: u64,
}

/// Arguments for the `resolve` subcommand.
#[derive(Args, Debug)]
pub struct ResolveArgs {
    pub name: String,

    #[arg(long, default_value = "http://127.0.0.1:7070")]
    pub node: String,

    /// Network whose schedule the answer is re-verified against.
    #[arg(long, env = "MONIKER_NETWORK", default_value = "devnet")]
    pub network: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        // Ensures the derive macros produce a valid CLI definition.
        MonikerCli::command().debug_assert();
    }

    #[test]
    fn run_peers_split_on_commas() {
        let cli = MonikerCli::try_parse_from([
            "moniker-node",
            "run",
            "--peers",
            "http://a:7070,http://b:7070",
            "--require-nonce",
        ])
        .unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.peers, vec!["http://a:7070", "http://b:7070"]);
                assert!(args.require_nonce);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn register_defaults() {
        let cli =
            MonikerCli::try_parse_from(["moniker-node", "register", "alice-site", "bafy-x"])
                .unwrap();
        match cli.command {
            Commands::Register(args) => {
                assert_eq!(args.name, "alice-site");
                assert_eq!(args.node, "http://127.0.0.1:7070");
                assert_eq!(args.lifetime_days, 365);
                assert!(!args.update);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn key_kind_maps_to_protocol() {
        assert_eq!(KeyKind::from(KeyKindArg::Legacy), KeyKind::Legacy);
        assert_eq!(KeyKind::from(KeyKindArg::Hybrid), KeyKind::Hybrid);
    }
}
