//! Obscura node and wallet binary.
//!
//! Usage:
//!   obscura node                          # run a node
//!   obscura node --mine                   # run a mining node
//!   obscura node --peers 1.2.3.4:9471    # join an existing network
//!   obscura wallet init                   # create the wallet key
//!   obscura wallet address                # print the wallet address

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use obscura::config::ObscuraConfig;
use obscura::consensus::Engine;
use obscura::crypto::keys::PrivateKey;
use obscura::miner::run_miner;
use obscura::network::peer::{GossipServer, PeerClient};
use obscura::node::Node;
use obscura::storage::ChainStore;
use obscura::wallet::{run_wallet, Wallet};

type MainResult = Result<(), Box<dyn std::error::Error>>;

/// Obscura privacy-preserving proof-of-work cryptocurrency.
#[derive(Parser, Debug)]
#[command(name = "obscura", version, about = "Obscura privacy cryptocurrency node")]
struct Cli {
    /// Data directory for chain state and the wallet key.
    #[arg(long, default_value = "./obscura-data", global = true)]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the Obscura node.
    Node {
        /// P2P listen host.
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// P2P listen port.
        #[arg(long, default_value_t = obscura::constants::DEFAULT_P2P_PORT)]
        port: u16,

        /// Bootstrap peer addresses (comma-separated).
        #[arg(long, value_delimiter = ',')]
        peers: Vec<String>,

        /// Mine blocks toward the wallet address.
        #[arg(long)]
        mine: bool,
    },

    /// Manage the wallet key.
    Wallet {
        #[command(subcommand)]
        action: WalletAction,
    },
}

#[derive(Subcommand, Debug)]
enum WalletAction {
    /// Create a new wallet key.
    Init,
    /// Print the wallet address digest.
    Address,
}

#[tokio::main]
async fn main() -> MainResult {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Command::Wallet { action }) => run_wallet_command(&cli.data_dir, action),
        Some(Command::Node {
            host,
            port,
            peers,
            mine,
        }) => run_node(cli.data_dir, host, port, peers, mine).await,
        None => {
            run_node(
                cli.data_dir,
                "0.0.0.0".into(),
                obscura::constants::DEFAULT_P2P_PORT,
                vec![],
                false,
            )
            .await
        }
    }
}

fn wallet_key_path(data_dir: &Path) -> PathBuf {
    data_dir.join("wallet.key")
}

/// Create the wallet key on first use.
fn ensure_key(data_dir: &Path) -> MainResult {
    std::fs::create_dir_all(data_dir)?;
    let path = wallet_key_path(data_dir);
    if path.exists() {
        return Ok(());
    }
    let key = PrivateKey::generate();
    std::fs::write(&path, obscura::to_canonical_bytes(&key)?)?;
    tracing::info!(path = %path.display(), "generated wallet key");
    Ok(())
}

fn read_key(data_dir: &Path) -> Result<PrivateKey, Box<dyn std::error::Error>> {
    let bytes = std::fs::read(wallet_key_path(data_dir))?;
    Ok(obscura::from_canonical_bytes(&bytes)?)
}

fn run_wallet_command(data_dir: &Path, action: WalletAction) -> MainResult {
    match action {
        WalletAction::Init => {
            ensure_key(data_dir)?;
            println!("wallet key at {}", wallet_key_path(data_dir).display());
        }
        WalletAction::Address => {
            let key = read_key(data_dir)?;
            println!("{}", hex::encode(key.address().hash()));
        }
    }
    Ok(())
}

async fn run_node(
    data_dir: PathBuf,
    host: String,
    port: u16,
    cli_peers: Vec<String>,
    cli_mine: bool,
) -> MainResult {
    let config = ObscuraConfig::load(&data_dir);
    let mine = cli_mine || config.node.mine;
    let mut bootstrap = config.node.bootstrap_peers.clone();
    bootstrap.extend(cli_peers);

    ensure_key(&data_dir)?;
    let key = read_key(&data_dir)?;

    let store = Arc::new(ChainStore::open(&data_dir.join("chain"))?);
    for peer in &bootstrap {
        store.add_peer(peer)?;
    }

    let listen_addr = format!("{host}:{port}");
    let peers = Arc::new(PeerClient::new(Arc::clone(&store), listen_addr.clone()));

    let (wallet_tx, wallet_rx) = tokio::sync::mpsc::unbounded_channel();
    let engine = Arc::new(Engine::new(
        Arc::clone(&store),
        Some(Arc::clone(&peers)),
        Some(wallet_tx),
    )?);

    let wallet = Arc::new(Mutex::new(Wallet::new(vec![key.clone()])));
    tokio::spawn(run_wallet(Arc::clone(&wallet), wallet_rx));

    let (node, handles) = Node::new(Arc::clone(&engine), Some(Arc::clone(&peers)));

    let listener = TcpListener::bind(&listen_addr).await?;
    let gossip = Arc::new(GossipServer::new(
        Arc::clone(&store),
        listen_addr.clone(),
        handles.block_hashes.clone(),
        handles.txn_hashes.clone(),
    ));
    tokio::spawn(gossip.serve(listener));

    if mine {
        tokio::spawn(run_miner(
            Arc::clone(&engine),
            key.address(),
            handles.mined_blocks.clone(),
        ));
    }

    tracing::info!(addr = %listen_addr, mining = mine, "obscura node up");
    tokio::select! {
        _ = node.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received; shutting down");
        }
    }
    Ok(())
}
