use clap::{Parser, Subcommand};
use filechain::client::FilechainClient;
use filechain::config::{ClientConfig, NodeConfig};
use filechain::peers::PeerAddr;
use filechain::server::Server;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "filechain",
    version,
    about = "Files in a blockchain network"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a filechain server
    Server {
        /// Hostname to bind and advertise
        host: String,
        /// Port to bind
        port: u16,
        /// Join the network through an existing server
        #[arg(long, num_args = 2, value_names = ["HOST", "PORT"])]
        join: Option<Vec<String>>,
        /// Max number of concurrent connections
        #[arg(short, long)]
        connections: Option<usize>,
        /// JSON file with node settings
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Connect to a filechain server
    Client {
        /// Hostname of the server
        host: String,
        /// Port of the server
        port: u16,
        #[command(subcommand)]
        action: ClientAction,
    },
}

#[derive(Subcommand)]
enum ClientAction {
    /// Send a file to the server and insert it into the chain
    Send { file_path: PathBuf },
    /// Get a file from the chain and save it locally
    Get { file_hash: String, file_path: PathBuf },
    /// Check whether a file is in the chain
    Check {
        file_path: PathBuf,
        /// Check this hash instead of hashing the file
        #[arg(long)]
        hash: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Server {
            host,
            port,
            join,
            connections,
            config,
        } => cmd_server(host, port, join, connections, config.as_deref()).await,
        Commands::Client { host, port, action } => {
            let client = FilechainClient::new(PeerAddr::new(host, port), ClientConfig::default());
            match action {
                ClientAction::Send { file_path } => cmd_send(&client, &file_path).await,
                ClientAction::Get {
                    file_hash,
                    file_path,
                } => cmd_get(&client, &file_hash, &file_path).await,
                ClientAction::Check { file_path, hash } => {
                    cmd_check(&client, &file_path, hash.as_deref()).await
                }
            }
        }
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn cmd_server(
    host: String,
    port: u16,
    join: Option<Vec<String>>,
    connections: Option<usize>,
    config_path: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match config_path {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    }
    .with_listen(PeerAddr::new(host, port));
    if let Some(connections) = connections {
        config.max_connections = connections;
    }

    let target = match join.as_deref() {
        Some([host, port]) => Some(PeerAddr::new(host.clone(), port.parse::<u16>()?)),
        Some(_) => return Err("--join expects HOST PORT".into()),
        None => None,
    };

    let server = Server::bind(config).await?;
    if let Some(target) = target {
        server.node().join(&target).await?;
    }
    server.run().await?;
    Ok(())
}

async fn cmd_send(client: &FilechainClient, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let file_hash = client.send_file(path).await?;
    println!("sha256 hash: {}", file_hash);
    println!("File was successfully sent to the server.");
    Ok(())
}

async fn cmd_get(
    client: &FilechainClient,
    file_hash: &str,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let written = client.get_file(file_hash, path).await?;
    println!("File successfully received ({} bytes).", written);
    Ok(())
}

async fn cmd_check(
    client: &FilechainClient,
    path: &Path,
    hash: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (file_hash, found) = match hash {
        Some(hash) => (hash.to_string(), client.contains(hash).await?),
        None => client.check_file(path).await?,
    };
    println!("sha256 hash: {}", file_hash);
    println!("file in filechain: {}", found);
    Ok(())
}
