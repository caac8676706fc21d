//! WolfMember - Command line tool for inspecting a WolfMembership store
//!
//! Usage:
//!   wolfmember init              - Write a sample configuration file
//!   wolfmember validate          - Check a configuration file
//!   wolfmember bootstrap         - Create the cluster's table version row
//!   wolfmember list              - Show the membership table
//!   wolfmember gateways          - Show gateways of active silos
//!   wolfmember cleanup           - Remove silos that stopped heartbeating
//!   wolfmember teardown --force  - Delete a cluster's membership rows

use std::path::PathBuf;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfmembership::config::{LoggingConfig, MembershipConfig};
use wolfmembership::error::{Error, Result};
use wolfmembership::registry;

/// WolfMember - WolfMembership Store Tool
#[derive(Parser)]
#[command(name = "wolfmember")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfmembership.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfmembership.toml")]
        output: PathBuf,

        /// Cluster ID
        #[arg(long, default_value = "dev")]
        cluster_id: String,
    },

    /// Validate configuration file
    Validate,

    /// Create the table version row for the configured cluster
    Bootstrap,

    /// Show the membership table of the configured cluster
    List {
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show gateways of active silos
    Gateways,

    /// Remove rows whose last heartbeat is older than the given age
    Cleanup {
        /// Age in seconds
        #[arg(long, default_value = "3600")]
        older_than_secs: i64,
    },

    /// Delete all rows and the version row of a cluster (DESTRUCTIVE)
    Teardown {
        /// Cluster to delete (defaults to the configured cluster)
        #[arg(long)]
        cluster: Option<String>,

        /// Skip confirmation
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging settings come from the config file when it is readable
    let logging = MembershipConfig::from_file(&cli.config)
        .map(|c| c.logging)
        .unwrap_or_default();
    init_logging(cli.log_level.as_deref().unwrap_or(&logging.level), &logging);

    match cli.command {
        Commands::Init { output, cluster_id } => run_init(output, cluster_id),
        Commands::Validate => run_validate(cli.config),
        Commands::Bootstrap => run_bootstrap(cli.config).await,
        Commands::List { json } => run_list(cli.config, json).await,
        Commands::Gateways => run_gateways(cli.config).await,
        Commands::Cleanup { older_than_secs } => run_cleanup(cli.config, older_than_secs).await,
        Commands::Teardown { cluster, force } => run_teardown(cli.config, cluster, force).await,
    }
}

/// Initialize logging
fn init_logging(level: &str, logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn run_init(output: PathBuf, cluster_id: String) -> Result<()> {
    let config_content = format!(r#"# WolfMembership Configuration
# Generated configuration file

[cluster]
cluster_id = "{cluster_id}"

[storage]
provider = "sqlite"
connection_string = "Filename=/var/lib/wolfmembership/{cluster_id}.db;Timeout=5000"
# client_connection_string = "Filename=/var/lib/wolfmembership/{cluster_id}.db;ReadOnly=true"

[gateway]
refresh_period_ms = 60000

[logging]
level = "info"
format = "pretty"
"#);

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to point at your membership store.");
    println!("Then create the version row with: wolfmember --config {} bootstrap", output.display());

    Ok(())
}

fn run_validate(config_path: PathBuf) -> Result<()> {
    match MembershipConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Cluster ID: {}", config.cluster_id());
            println!("  Provider: {}", config.storage.provider);
            println!("  Silo Store: {}", config.silo_options().connection_string);
            println!("  Client Store: {}", config.client_options().connection_string);
            println!("  Gateway Refresh: {} ms", config.gateway.refresh_period_ms);
            registry::lookup(&config.storage.provider)?;
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

async fn run_bootstrap(config_path: PathBuf) -> Result<()> {
    let config = MembershipConfig::from_file(&config_path)?;
    let table = registry::membership_table(&config)?;

    table.initialize_membership_table(true).await?;
    let data = table.read_all().await?;
    println!(
        "Cluster '{}' ready at table version {} ({} rows)",
        config.cluster_id(),
        data.version.version,
        data.members.len()
    );

    Ok(())
}

async fn run_list(config_path: PathBuf, json: bool) -> Result<()> {
    let config = MembershipConfig::from_file(&config_path)?;
    let table = registry::membership_table(&config)?;
    let data = table.read_all().await?;

    if json {
        let out = serde_json::to_string_pretty(&data)
            .map_err(|e| Error::Format(format!("failed to render snapshot: {}", e)))?;
        println!("{}", out);
        return Ok(());
    }

    println!("Cluster: {}   Table Version: {}", config.cluster_id(), data.version.version);
    println!();

    if data.members.is_empty() {
        println!("No silos registered.");
        return Ok(());
    }

    println!(
        "{:<28} {:<16} {:<20} {:<14} {:>8} {:>9}  {}",
        "SILO", "NAME", "HOST", "STATUS", "GATEWAY", "SUSPECTS", "LAST HEARTBEAT"
    );
    println!("{}", "-".repeat(120));

    for (entry, _etag) in &data.members {
        println!(
            "{:<28} {:<16} {:<20} {:<14} {:>8} {:>9}  {}",
            entry.silo_address.to_string(),
            entry.silo_name,
            entry.host_name,
            entry.status.to_string(),
            entry.proxy_port,
            entry.suspect_times.len(),
            entry.i_am_alive_time.format("%Y-%m-%d %H:%M:%S UTC"),
        );
    }

    let terminating = data.members.iter().filter(|(e, _)| e.status.is_terminating()).count();
    println!();
    println!("{} silos, {} leaving or dead", data.members.len(), terminating);

    Ok(())
}

async fn run_gateways(config_path: PathBuf) -> Result<()> {
    let config = MembershipConfig::from_file(&config_path)?;
    let provider = registry::gateway_list_provider(&config)?;

    provider.initialize_gateway_list_provider().await?;
    let gateways = provider.get_gateways().await?;

    if gateways.is_empty() {
        println!("No active gateways in cluster '{}'.", config.cluster_id());
    }
    for gateway in gateways {
        println!("{}", gateway);
    }

    Ok(())
}

async fn run_cleanup(config_path: PathBuf, older_than_secs: i64) -> Result<()> {
    if older_than_secs < 0 {
        return Err(Error::Argument("older-than-secs must not be negative".into()));
    }

    let config = MembershipConfig::from_file(&config_path)?;
    let table = registry::membership_table(&config)?;

    let before = table.read_all().await?.members.len();
    let cutoff = Utc::now() - chrono::Duration::seconds(older_than_secs);
    table.cleanup_defunct_silo_entries(cutoff).await?;
    let after = table.read_all().await?.members.len();

    println!(
        "Removed {} silo entries with no heartbeat since {}",
        before.saturating_sub(after),
        cutoff.format("%Y-%m-%d %H:%M:%S UTC")
    );

    Ok(())
}

async fn run_teardown(config_path: PathBuf, cluster: Option<String>, force: bool) -> Result<()> {
    let config = MembershipConfig::from_file(&config_path)?;
    let cluster_id = cluster.unwrap_or_else(|| config.cluster_id().to_string());

    if !force {
        eprintln!("Refusing to delete cluster '{}' without --force", cluster_id);
        return Err(Error::Argument("teardown requires --force".into()));
    }

    let table = registry::membership_table(&config)?;
    table.delete_membership_table_entries(&cluster_id).await?;
    println!("Deleted membership table entries of cluster '{}'", cluster_id);

    Ok(())
}
