use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use streampulse::checker::probe::HttpProber;
use streampulse::checker::CheckOutcome;
use streampulse::config::Config;
use streampulse::debrid::{DebridApi, DebridClient};
use streampulse::history::HistoryStore;
use streampulse::scheduler::CycleEngine;

#[derive(Parser)]
#[command(
    name = "streampulse",
    about = "Availability monitor for debrid/CDN stream delivery",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + check scheduler)
    Serve {
        /// Bind address
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: String,

        /// Path to the config file
        #[arg(long, default_value = "streampulse.toml")]
        config: String,
    },

    /// Run one check cycle in the foreground and print the record
    Check {
        /// Path to the config file
        #[arg(long, default_value = "streampulse.toml")]
        config: String,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Print retained history records
    History {
        /// Path to the config file
        #[arg(long, default_value = "streampulse.toml")]
        config: String,

        /// Only the newest N records
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind, config } => {
            tracing::info!(%bind, %config, "Starting streampulse daemon");
            streampulse::serve(&bind, &config).await?;
        }
        Commands::Check { config, json } => {
            let cfg = Config::load(&config)?;
            let store = HistoryStore::new(&cfg.history_path);
            let client: Arc<dyn DebridApi> =
                Arc::new(DebridClient::new(&cfg.api_base_url, cfg.api_token.clone())?);
            let prober = Arc::new(HttpProber::default());
            let engine = CycleEngine::new(&config, store, client, prober);

            match engine.run_once().await? {
                Some(record) => {
                    if json {
                        println!("{}", serde_json::to_string_pretty(&record)?);
                    } else {
                        print_record(&record);
                    }
                }
                None => {
                    println!("Nothing to check: no api token or all checks disabled.");
                }
            }
        }
        Commands::History { config, limit } => {
            let cfg = Config::load(&config)?;
            let store = HistoryStore::new(&cfg.history_path);
            let mut records = store.read_all();
            if let Some(limit) = limit {
                if records.len() > limit {
                    records.drain(..records.len() - limit);
                }
            }
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
    }

    Ok(())
}

fn print_record(record: &streampulse::history::HistoryRecord) {
    println!("\n=== streampulse check @ {} ===", record.timestamp.to_rfc3339());
    if let Some(api) = &record.api_health {
        let status = if api.success { "OK" } else { "FAIL" };
        print!("API health: {status} ({} ms, HTTP {})", api.response_time_ms, api.http_status);
        match &api.error {
            Some(e) => println!(" - {e}"),
            None => println!(),
        }
    }
    if let Some(streams) = &record.streams {
        for (id, outcome) in streams {
            match outcome {
                CheckOutcome::Success(s) => println!(
                    "{:<20} OK    ttfb {} ms, resolve {} ms, HTTP {} via {}",
                    id, s.time_to_first_byte_ms, s.resolution_time_ms, s.http_status, s.cdn_host
                ),
                CheckOutcome::Failure(f) => println!(
                    "{:<20} FAIL  {} ({:?})",
                    id, f.failure_step, f.error_kind
                ),
            }
        }
    }
    println!();
}
