//! WolfKV - In-memory key-value store
//!
//! Node binary: serves client queries over TCP, logs mutations to the WAL
//! and takes part in master/slave replication when configured.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfkv::config::{ReplicaRole, WalConfig, WolfKvConfig};
use wolfkv::database::Database;
use wolfkv::error::{Error, Result};
use wolfkv::network::{NetworkServer, ServerOptions};
use wolfkv::replication::{Master, ReplicationNode, Slave};
use wolfkv::shutdown;
use wolfkv::storage::{Engine, Storage};
use wolfkv::wal::Wal;

/// WolfKV - In-memory key-value store with WAL and replication
#[derive(Parser)]
#[command(name = "wolfkv")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfkv.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the WolfKV node
    Start,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfkv.toml")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,

    /// Show the effective configuration
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => run_start(cli.config, cli.log_level).await,
        Commands::Init { output } => run_init(output),
        Commands::Validate => run_validate(cli.config),
        Commands::Info => run_info(cli.config),
    }
}

/// Initialize logging
fn init_logging(level: &str, output: Option<&Path>) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let (file_layer, stderr_layer) = match output {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file));
            (Some(layer), None)
        }
        None => {
            let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            (None, Some(layer))
        }
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();
    Ok(())
}

/// Start the WolfKV node
async fn run_start(config_path: PathBuf, log_level: Option<String>) -> Result<()> {
    let config_found = config_path.exists();
    let config = if config_found {
        WolfKvConfig::from_file(&config_path)?
    } else {
        WolfKvConfig::default()
    };

    let level = log_level.unwrap_or_else(|| config.logging.level.clone());
    init_logging(&level, config.logging.output.as_deref())?;

    if config_found {
        tracing::info!("Loaded configuration from {:?}", config_path);
    } else {
        tracing::warn!("Config file {:?} not found, using default parameters", config_path);
    }
    tracing::info!("Starting WolfKV node...");

    let (shutdown_tx, shutdown_rx) = shutdown::channel();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    // Initialize WAL
    let wal = match &config.wal {
        Some(wal_config) => {
            let wal = match Wal::new(wal_config.settings()?) {
                Ok(w) => Arc::new(w),
                Err(e) => {
                    tracing::error!(
                        "Failed to initialize WAL in {:?}: {}",
                        wal_config.data_directory,
                        e
                    );
                    return Err(e);
                }
            };
            tasks.push(wal.start(shutdown_rx.clone())?);
            Some(wal)
        }
        None => {
            tracing::info!("WAL disabled, data will not survive a restart");
            None
        }
    };

    let storage = match Storage::new(Arc::new(Engine::new()), wal) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!("Failed to recover storage from WAL: {}", e);
            return Err(e);
        }
    };

    // Replication
    let role = config.role()?;
    if let (Some(replication), Some(wal_config)) = (&config.replication, &config.wal) {
        let node = replication_node(&config, wal_config, &storage, &mut tasks, &shutdown_rx)?;
        tracing::info!(
            "Starting as {} (master address {})",
            node.role(),
            replication.master_address
        );

        let node_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = node.start(node_shutdown).await {
                tracing::error!("Replication stopped with error: {}", e);
            }
        }));
    }

    let database = Database::new(Arc::clone(&storage)).read_only(role == Some(ReplicaRole::Slave));
    let options = ServerOptions {
        max_connections: config.network.max_connections,
        max_message_size: config.max_message_size()?,
        idle_timeout: config.idle_timeout()?,
    };
    let server = NetworkServer::bind(&config.network.address, options).await?;
    let mut server_task = tokio::spawn(server.run(Arc::new(database), shutdown_rx.clone()));

    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => tracing::info!("Received shutdown signal"),
            Err(e) => tracing::error!("Unable to listen for shutdown signal: {}", e),
        },
        result = &mut server_task => {
            let _ = shutdown_tx.send(true);
            join_all(tasks).await;
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(Error::Network(format!("server task failed: {}", e))),
            };
        }
    }

    let _ = shutdown_tx.send(true);
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Network server error: {}", e),
        Err(e) => tracing::error!("Network server task failed: {}", e),
    }
    join_all(tasks).await;

    tracing::info!("WolfKV shutdown complete");
    Ok(())
}

/// Build the replication node for this node's role
fn replication_node(
    config: &WolfKvConfig,
    wal_config: &WalConfig,
    storage: &Arc<Storage>,
    tasks: &mut Vec<JoinHandle<()>>,
    shutdown: &shutdown::Shutdown,
) -> Result<Arc<dyn ReplicationNode>> {
    let Some(replication) = &config.replication else {
        return Err(Error::Config("replication is not configured".into()));
    };

    let node: Arc<dyn ReplicationNode> = match replication.role()? {
        ReplicaRole::Master => Arc::new(Master::new(
            replication.master_address.clone(),
            wal_config.data_directory.clone(),
        )),
        ReplicaRole::Slave => {
            tasks.push(storage.start_replication_apply(shutdown.clone())?);
            Arc::new(Slave::new(
                replication.master_address.clone(),
                wal_config.data_directory.clone(),
                replication.sync_interval()?,
                storage.replication_stream(),
            ))
        }
    };
    Ok(node)
}

async fn join_all(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!("Background task failed: {}", e);
        }
    }
}

/// Initialize a new configuration file
fn run_init(output: PathBuf) -> Result<()> {
    if output.exists() {
        return Err(Error::Config(format!(
            "{} already exists, refusing to overwrite",
            output.display()
        )));
    }

    let config = WolfKvConfig {
        wal: Some(WalConfig::default()),
        ..WolfKvConfig::default()
    };
    let content = format!(
        "# WolfKV Configuration\n\
         # Add a [replication] section with replica_type, master_address and\n\
         # sync_interval to run as a master or slave.\n\n{}",
        config.to_toml()?
    );

    std::fs::write(&output, content)?;
    println!("Configuration file created: {}", output.display());
    println!("Then start with: wolfkv --config {} start", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match WolfKvConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Address:     {}", config.network.address);
            println!(
                "  WAL:         {}",
                config
                    .wal
                    .as_ref()
                    .map_or("disabled".to_string(), |w| w.data_directory.display().to_string())
            );
            println!(
                "  Replication: {}",
                config
                    .role()?
                    .map_or("standalone".to_string(), |role| role.to_string())
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show the effective configuration
fn run_info(config_path: PathBuf) -> Result<()> {
    let config = if config_path.exists() {
        WolfKvConfig::from_file(&config_path)?
    } else {
        println!("# {} not found, showing defaults", config_path.display());
        WolfKvConfig::default()
    };

    println!("WolfKV Node Information");
    println!("=======================");
    println!();
    println!("Address:          {}", config.network.address);
    println!("Max Connections:  {}", config.network.max_connections);
    println!("Max Message Size: {} bytes", config.max_message_size()?);
    match config.idle_timeout()? {
        Some(timeout) => println!("Idle Timeout:     {:?}", timeout),
        None => println!("Idle Timeout:     none"),
    }
    println!();
    match &config.wal {
        Some(wal) => {
            let settings = wal.settings()?;
            println!("WAL Configuration:");
            println!("  Directory:      {}", settings.data_directory.display());
            println!("  Batch Size:     {}", settings.flushing_batch_size);
            println!("  Batch Timeout:  {:?}", settings.flushing_batch_timeout);
            println!("  Segment Size:   {} bytes", settings.max_segment_size);
        }
        None => println!("WAL:              disabled"),
    }
    println!();
    match &config.replication {
        Some(replication) => {
            println!("Replication:");
            println!("  Role:           {}", replication.role()?);
            println!("  Master Address: {}", replication.master_address);
            println!("  Sync Interval:  {:?}", replication.sync_interval()?);
        }
        None => println!("Replication:      standalone"),
    }

    Ok(())
}
