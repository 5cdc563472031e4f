//! DApp provider bridge daemon.
//!
//! Holds the wallet's encrypted keys and answers EIP-1193 style provider
//! calls from web pages, asking the user before anything is connected,
//! signed or sent.
//!
//! # Architecture Overview
//!
//! ```text
//!   page context                           approval client / bridge-cli
//!   POST /rpc, GET /ws                     /approvals, /session, /keys ...
//!        │                                          │
//!        ▼                                          ▼
//!  ┌───────────────────────── http (axum) ───────────────────────────┐
//!  │                                                                  │
//!  │   broker::Broker ── permissions ── ledger ── contexts (events)   │
//!  │        │                 │                                        │
//!  │        ▼                 ▼                                        │
//!  │   session lock     connections        chains / active chain       │
//!  │        │                                                          │
//!  │        ▼                                                          │
//!  │   vault::KeyStore ──▶ blockchain::TransactionPreparer ──▶ RPC    │
//!  │                                                                  │
//!  │   storage (JSON files)      observability (tracing, metrics)     │
//!  └──────────────────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;

use dapp_bridge::config::loader::load_or_default;
use dapp_bridge::config::schema::PLACEHOLDER_API_KEY;
use dapp_bridge::lifecycle::startup;
use dapp_bridge::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "dapp-bridge")]
#[command(about = "Wallet daemon bridging web pages to an EVM key vault", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "BRIDGE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_or_default(args.config.as_deref())?;

    init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "dapp-bridge starting");

    if config.admin.api_key == PLACEHOLDER_API_KEY {
        tracing::warn!("admin.api_key is the built-in placeholder; set BRIDGE_ADMIN_API_KEY");
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        data_dir = %config.storage.data_dir.display(),
        default_chain_id = config.chains.default_chain_id,
        "Configuration loaded"
    );

    startup::run(config).await?;
    Ok(())
}
