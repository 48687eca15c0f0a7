//! Flowmeter CLI
//!
//! A command-line tool for managing classification models, meter
//! policies and lookup sets on a Flowmeter console.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use commands::{classify, lookup, meters, models, stats};
use std::path::PathBuf;

const DEFAULT_API_URL: &str = "http://localhost:8080";

/// Flowmeter CLI
#[derive(Parser)]
#[command(name = "fmctl")]
#[command(author, version, about = "CLI for the Flowmeter classification console", long_about = None)]
pub struct Cli {
    /// Console URL (can also be set via FMCTL_API_URL or the config file)
    #[arg(long, env = "FMCTL_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage classification models
    #[command(subcommand)]
    Models(ModelsCommands),

    /// Manage meter policies
    #[command(subcommand)]
    Meters(MetersCommands),

    /// Show persisted classification statistics
    Stats {
        /// Filter by model
        #[arg(long, short)]
        model: Option<String>,

        /// Periods ending at or after this RFC 3339 instant
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        /// Periods starting at or before this RFC 3339 instant
        #[arg(long)]
        until: Option<DateTime<Utc>>,

        /// Drain live counters before showing
        #[arg(long)]
        snapshot: bool,
    },

    /// Bulk load lookup sets
    #[command(subcommand)]
    Lookup(LookupCommands),

    /// Classify one flow from a JSON request file
    Classify {
        /// Path to the request JSON
        request: PathBuf,
    },

    /// Save defaults to ~/.config/fmctl/config.json
    Config {
        #[arg(long)]
        api_url: Option<String>,

        #[arg(long)]
        default_format: Option<output::OutputFormat>,
    },
}

#[derive(Subcommand)]
pub enum ModelsCommands {
    /// List models
    List {
        /// Show only the active model
        #[arg(long)]
        active_only: bool,
    },

    /// Make a model the active one
    Activate { name: String },

    /// Load a model into memory
    Load { name: String },

    /// Unload a model
    Unload { name: String },

    /// Show a model's categories and flow cookies
    Categories { name: String },
}

#[derive(Subcommand)]
pub enum MetersCommands {
    /// List meter policies
    List {
        /// Filter by switch id
        #[arg(long = "switch")]
        switch_id: Option<String>,

        /// Filter by category
        #[arg(long)]
        category: Option<String>,
    },

    /// Create a meter policy
    Create(meters::MeterArgs),

    /// Replace a meter policy
    Update {
        id: u64,

        #[command(flatten)]
        args: meters::MeterArgs,
    },

    /// Delete a meter policy and its controller meter
    Delete { id: u64 },
}

#[derive(Subcommand)]
pub enum LookupCommands {
    /// Replace the DNS resolver set from a CSV file
    LoadDns {
        path: PathBuf,

        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Replace the VPN range set from a CIDR list
    LoadVpn {
        path: PathBuf,

        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Replace the ASN database from a GeoLite2-ASN CSV file
    LoadAsn {
        path: PathBuf,

        #[arg(long)]
        batch_size: Option<usize>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run(Cli::parse()).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let saved = config::Config::load()?;

    let api_url = cli
        .api_url
        .clone()
        .or_else(|| saved.api_url.clone())
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());
    let format = cli
        .format
        .or_else(|| saved.default_format.as_deref().and_then(output::OutputFormat::parse))
        .unwrap_or_default();

    if cli.verbose {
        output::print_info(&format!("Using console at {}", api_url));
    }

    // Initialize client
    let client = client::ApiClient::new(&api_url)?;

    // Execute command
    match cli.command {
        Commands::Models(cmd) => match cmd {
            ModelsCommands::List { active_only } => {
                models::list_models(&client, active_only, format).await?;
            }
            ModelsCommands::Activate { name } => {
                models::activate_model(&client, &name, format).await?;
            }
            ModelsCommands::Load { name } => {
                models::load_model(&client, &name, format).await?;
            }
            ModelsCommands::Unload { name } => {
                models::unload_model(&client, &name, format).await?;
            }
            ModelsCommands::Categories { name } => {
                models::list_categories(&client, &name, format).await?;
            }
        },
        Commands::Meters(cmd) => match cmd {
            MetersCommands::List {
                switch_id,
                category,
            } => {
                meters::list_meters(&client, switch_id, category, format).await?;
            }
            MetersCommands::Create(args) => {
                meters::create_meter(&client, args, format).await?;
            }
            MetersCommands::Update { id, args } => {
                meters::update_meter(&client, id, args, format).await?;
            }
            MetersCommands::Delete { id } => {
                meters::delete_meter(&client, id, format).await?;
            }
        },
        Commands::Stats {
            model,
            since,
            until,
            snapshot,
        } => {
            if snapshot {
                stats::snapshot(&client, format).await?;
            }
            let query = client::StatsQuery { model, since, until };
            stats::show_stats(&client, query, format).await?;
        }
        Commands::Lookup(cmd) => match cmd {
            LookupCommands::LoadDns { path, batch_size } => {
                lookup::load(&client, "dns", &path, batch_size, format).await?;
            }
            LookupCommands::LoadVpn { path, batch_size } => {
                lookup::load(&client, "vpn", &path, batch_size, format).await?;
            }
            LookupCommands::LoadAsn { path, batch_size } => {
                lookup::load(&client, "asn", &path, batch_size, format).await?;
            }
        },
        Commands::Classify { request } => {
            classify::classify(&client, &request, format).await?;
        }
        Commands::Config {
            api_url,
            default_format,
        } => {
            save_config(saved, api_url, default_format)?;
        }
    }

    Ok(())
}

fn save_config(
    mut saved: config::Config,
    api_url: Option<String>,
    default_format: Option<output::OutputFormat>,
) -> Result<()> {
    if let Some(url) = api_url {
        url::Url::parse(&url)?;
        saved.api_url = Some(url);
    }
    if let Some(format) = default_format {
        saved.default_format = Some(format!("{:?}", format).to_lowercase());
    }
    let path = saved.save()?;
    output::print_success(&format!("Saved {}", path.display()));
    Ok(())
}
