use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use chokepoint::batch::{self, Checkpoint};
use chokepoint::server::{self, ReplaySource};
use chokepoint::{init_logging, reader};
use chokepoint_core::{Alert, Config, MonitorStats};

const TOP_EDGES: usize = 5;

#[derive(Parser)]
#[command(name = "chokepoint")]
#[command(about = "Live bottleneck detection for service call graphs", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "chokepoint.toml")]
    config: std::path::PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the monitor and its HTTP API
    Serve {
        /// CSV call log to replay into the monitor
        #[arg(long)]
        logs: Option<std::path::PathBuf>,
        /// Replay the log forever
        #[arg(long = "loop")]
        looping: bool,
        /// Override verbose setting from config
        #[arg(short, long)]
        verbose: bool,
    },

    /// Analyze a CSV call log offline
    Analyze {
        file: std::path::PathBuf,
        /// Print a summary every N records (0 = only at the end)
        #[arg(long, default_value_t = 0)]
        every: usize,
        /// Output the final report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show recent alerts from a running server
    Alerts {
        #[arg(long)]
        server: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },

    /// Show monitor statistics from a running server
    Stats {
        #[arg(long)]
        server: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Print the default configuration
    Config,
}

#[derive(Debug, Deserialize, Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct AlertsData {
    alerts: Vec<Alert>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Config = cli.command {
        print!("{}", Config::default_toml()?);
        return Ok(());
    }

    let mut config = if cli.config.exists() {
        Config::from_file(&cli.config)
            .with_context(|| format!("Failed to load {}", cli.config.display()))?
    } else {
        Config::default()
    };
    config.validate()?;

    let default_server = format!("http://{}:{}", config.server.host, config.server.port);

    match cli.command {
        Commands::Serve {
            logs,
            looping,
            verbose,
        } => {
            if verbose {
                config.server.verbose = true;
            }
            init_logging(&config.logging, config.server.verbose)?;
            if !cli.config.exists() {
                tracing::info!(path = %cli.config.display(), "config file not found, using defaults");
            }

            let replay = logs.map(|path| ReplaySource { path, looping });
            server::start_server(config, replay).await?;
        }
        Commands::Analyze { file, every, json } => {
            init_logging(&config.logging, false)?;
            let records = reader::load_records(&file)?;
            let checkpoints = batch::analyze_records(&config, records, every);

            if json {
                let last = checkpoints
                    .last()
                    .ok_or_else(|| anyhow!("analysis produced no summary"))?;
                println!("{}", serde_json::to_string_pretty(last)?);
            } else {
                for checkpoint in &checkpoints {
                    print_checkpoint(checkpoint);
                }
            }
        }
        Commands::Alerts {
            server,
            limit,
            json,
        } => {
            let client = Client::new();
            let server = server.unwrap_or(default_server);
            handle_alerts(&client, &server, limit, json).await?;
        }
        Commands::Stats { server, json } => {
            let client = Client::new();
            let server = server.unwrap_or(default_server);
            handle_stats(&client, &server, json).await?;
        }
        Commands::Config => {}
    }

    Ok(())
}

fn print_checkpoint(checkpoint: &Checkpoint) {
    let stats = &checkpoint.stats;
    println!(
        "After {} records ({} rejected): status={} nodes={} window={} max_flow={:.2} alerts={}",
        checkpoint.processed,
        checkpoint.rejected,
        stats.status,
        stats.active_nodes,
        stats.window_size,
        stats.max_flow,
        stats.alerts
    );

    let thresholds = checkpoint.report.thresholds;
    println!(
        "  thresholds: warning {:.1}ms, critical {:.1}ms",
        thresholds.warning_ms, thresholds.critical_ms
    );

    let top = checkpoint.top_edges(TOP_EDGES);
    if top.is_empty() {
        println!("  no edges in window");
    }
    for ranked in top {
        let level = ranked
            .degradation
            .map(|status| status.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<40} score {:.3}  degradation {:<8} {}",
            ranked.edge.to_string(),
            ranked.score,
            level,
            if ranked.structural { "structural" } else { "" }
        );
    }
}

async fn handle_alerts(client: &Client, server: &str, limit: Option<usize>, json: bool) -> Result<()> {
    let url = match limit {
        Some(limit) => format!("{}/api/alerts?limit={}", server, limit),
        None => format!("{}/api/alerts", server),
    };
    let data: AlertsData = fetch_data(client, &url).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&data.alerts)?);
        return Ok(());
    }

    if data.alerts.is_empty() {
        println!("No alerts.");
        return Ok(());
    }

    println!("{:<25} {:<9} {:<28} MESSAGE", "TIMESTAMP", "SEVERITY", "TITLE");
    for alert in data.alerts {
        println!(
            "{:<25} {:<9} {:<28} {}",
            alert.timestamp.to_rfc3339(),
            alert.severity,
            alert.title,
            alert.message
        );
    }
    Ok(())
}

async fn handle_stats(client: &Client, server: &str, json: bool) -> Result<()> {
    let url = format!("{}/api/stats", server);
    let stats: MonitorStats = fetch_data(client, &url).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Status:        {}", stats.status);
    println!("Records seen:  {}", stats.total_logs);
    println!("Active nodes:  {}", stats.active_nodes);
    println!("Window size:   {}", stats.window_size);
    println!("Max flow:      {:.2} rps", stats.max_flow);
    println!("Alerts:        {}", stats.alerts);
    Ok(())
}

async fn fetch_data<T: DeserializeOwned>(client: &Client, url: &str) -> Result<T> {
    let response: ApiResponse<T> = get_json(client, url).await?;
    if !response.success {
        return Err(anyhow!(response
            .error
            .unwrap_or_else(|| "Unknown error".into())));
    }
    response
        .data
        .ok_or_else(|| anyhow!("Response from {} missing data", url))
}

async fn get_json<T: DeserializeOwned>(client: &Client, url: &str) -> Result<ApiResponse<T>> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to GET {}", url))?;
    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(anyhow!("Request to {} failed: {} {}", url, status, text));
    }
    let parsed = response.json::<ApiResponse<T>>().await?;
    Ok(parsed)
}
