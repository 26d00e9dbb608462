//! # CLI Interface
//!
//! Command-line arguments for `remit-node`, via `clap` derive. Four
//! subcommands: `run`, `init`, `sign`, and `version`. Every runtime setting
//! of `run` can also come from a `REMIT_*` environment variable.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use remit_protocol::config::{
    BASE_FEE, DEFAULT_CONFIRMATION_POLL_MS, DEFAULT_METRICS_PORT, DEFAULT_RPC_PORT,
    DEFAULT_SEQUENCE_RETRIES, DEVNET_PASSPHRASE,
};

use crate::logging::LogFormat;

/// REMIT remittance node.
///
/// Runs a single-process devnet ledger with the escrow contract deployed,
/// serves the remittance HTTP API, mirrors on-ledger escrow state, and
/// exposes Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "remit-node",
    about = "REMIT escrow remittance node",
    version,
    propagate_version = true
)]
pub struct RemitNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the REMIT node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the devnet ledger, the API server, and the confirmation watcher.
    Run(RunArgs),
    /// Generate a fresh admin keypair into a data directory.
    Init(InitArgs),
    /// Sign an encoded transaction envelope offline.
    Sign(SignArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Port for the REST and WebSocket API.
    #[arg(long, env = "REMIT_RPC_PORT", default_value_t = DEFAULT_RPC_PORT)]
    pub rpc_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "REMIT_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Network passphrase every signature binds to.
    #[arg(long, env = "REMIT_NETWORK_PASSPHRASE", default_value = DEVNET_PASSPHRASE)]
    pub network_passphrase: String,

    /// Per-operation fee in stroops. Clamped to the network minimum.
    #[arg(long, env = "REMIT_BASE_FEE", default_value_t = BASE_FEE)]
    pub base_fee: u64,

    /// Hex-encoded Ed25519 admin secret key.
    ///
    /// Takes precedence over `--admin-key-file`. When neither is given an
    /// ephemeral admin is generated, which only makes sense on devnet.
    #[arg(long, env = "REMIT_ADMIN_KEY", hide_env_values = true)]
    pub admin_key: Option<String>,

    /// Path to an admin key file written by `remit-node init`.
    #[arg(long, env = "REMIT_ADMIN_KEY_FILE")]
    pub admin_key_file: Option<PathBuf>,

    /// Bound on a single ledger submission, in seconds.
    #[arg(long, env = "REMIT_SUBMIT_TIMEOUT_SECS", default_value_t = 30)]
    pub submit_timeout_secs: u64,

    /// How long a built envelope stays valid on the ledger, in seconds.
    #[arg(long, env = "REMIT_TX_VALIDITY_SECS", default_value_t = 300)]
    pub tx_validity_secs: u64,

    /// Rebuild attempts after losing a sequence race.
    #[arg(long, env = "REMIT_SEQUENCE_RETRIES", default_value_t = DEFAULT_SEQUENCE_RETRIES)]
    pub sequence_retries: u32,

    /// Interval between confirmation polls, in milliseconds.
    #[arg(long, env = "REMIT_POLL_INTERVAL_MS", default_value_t = DEFAULT_CONFIRMATION_POLL_MS)]
    pub poll_interval_ms: u64,

    /// Log output format.
    #[arg(long, env = "REMIT_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Directory that receives `admin.key`.
    #[arg(long, short = 'd', env = "REMIT_DATA_DIR", default_value = ".remit")]
    pub data_dir: PathBuf,

    /// Overwrite an existing key file.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `sign` subcommand.
#[derive(Parser, Debug)]
pub struct SignArgs {
    /// Hex-encoded transaction envelope, as returned by the API.
    pub envelope: String,

    /// Hex-encoded Ed25519 secret key of the signer.
    #[arg(long, env = "REMIT_SECRET_KEY", hide_env_values = true)]
    pub secret_key: String,

    /// Network passphrase the signature binds to.
    #[arg(long, env = "REMIT_NETWORK_PASSPHRASE", default_value = DEVNET_PASSPHRASE)]
    pub network_passphrase: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        // Ensures the derive macros produce a valid CLI definition.
        RemitNodeCli::command().debug_assert();
    }

    #[test]
    fn run_defaults() {
        let cli = RemitNodeCli::try_parse_from(["remit-node", "run"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.rpc_port, DEFAULT_RPC_PORT);
        assert_eq!(args.metrics_port, DEFAULT_METRICS_PORT);
        assert_eq!(args.base_fee, BASE_FEE);
        assert_eq!(args.log_format, LogFormat::Pretty);
        assert!(args.admin_key.is_none());
    }

    #[test]
    fn sign_requires_a_secret() {
        let parsed = RemitNodeCli::try_parse_from(["remit-node", "sign", "00ff"]);
        // An exported REMIT_SECRET_KEY satisfies the requirement.
        if std::env::var_os("REMIT_SECRET_KEY").is_none() {
            assert!(parsed.is_err());
        }
        let cli =
            RemitNodeCli::try_parse_from(["remit-node", "sign", "00ff", "--secret-key", "ab"])
                .unwrap();
        assert!(matches!(cli.command, Commands::Sign(ref a) if a.envelope == "00ff"));
    }
}
