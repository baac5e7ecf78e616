mod repl;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use lens_analytics::{MetricAggregator, ReportGenerator};
use lens_core::config::AppConfig;
use lens_core::store::{JsonFileStore, TransactionStore};
use lens_core::types::{QueryFilter, TimeWindow};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "corridor-lens",
    about = "Corridor analytics and a question-answering assistant over payment transactions",
    version,
    author
)]
struct Cli {
    /// Path to config file (default: ~/.config/corridor-lens/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the transaction snapshot path
    #[arg(short, long, global = true)]
    data: Option<PathBuf>,

    /// Anchor 7d / 30d windows at this date (YYYY-MM-DD) instead of the latest transaction
    #[arg(long, global = true)]
    reference_date: Option<NaiveDate>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask questions interactively (default), or answer one question and exit
    Ask {
        /// Session name
        #[arg(short, long)]
        session: Option<String>,
        /// Question to answer without starting the REPL
        question: Option<String>,
    },

    /// Start the HTTP server
    Serve {
        /// Bind host
        #[arg(long)]
        host: Option<String>,
        /// Bind port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Print the dashboard for a corridor / window
    Dashboard {
        /// Corridor key, e.g. USD_MXN
        #[arg(long)]
        corridor: Option<String>,
        /// Time window: 7d, 30d or all
        #[arg(long, default_value = "all")]
        window: TimeWindow,
        /// Print the compact terminal summary instead of markdown
        #[arg(long)]
        summary: bool,
    },

    /// Show or manage configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Initialize default configuration file
    Init,
    /// Print config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up tracing.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "corridor_lens=info,warn".into()),
        )
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load config.
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };

    // Apply CLI overrides.
    if let Some(data) = &cli.data {
        config.data.path = Some(data.clone());
    }
    if cli.reference_date.is_some() {
        config.data.reference_date = cli.reference_date;
    }

    let store: Arc<dyn TransactionStore> = Arc::new(
        JsonFileStore::new(config.transactions_path())
            .with_reference_date(config.data.reference_date),
    );
    tracing::info!(
        "Transaction snapshot: {}, classifier: {}",
        config.transactions_path().display(),
        if config.classifier.enabled {
            config.classifier.model.as_str()
        } else {
            "off"
        },
    );

    match cli.command {
        Some(Commands::Serve { host, port }) => {
            if let Some(h) = host {
                config.server.host = h;
            }
            if let Some(p) = port {
                config.server.port = p;
            }
            lens_server::serve(config, store).await?;
        }
        Some(Commands::Dashboard {
            corridor,
            window,
            summary,
        }) => {
            let filter = QueryFilter::all()
                .with_corridor(corridor.as_deref())
                .with_window(window);
            let snapshot = MetricAggregator::new(store).compute_dashboard(&filter).await?;
            if summary {
                print!("{}", ReportGenerator::text_summary(&snapshot));
            } else {
                print!("{}", ReportGenerator::dashboard_report(&snapshot));
            }
        }
        Some(Commands::Config { action }) => {
            handle_config_command(action, &config)?;
        }
        Some(Commands::Ask {
            session,
            question: Some(question),
        }) => {
            repl::ask_once(config, store, session, &question).await?;
        }
        Some(Commands::Ask {
            session,
            question: None,
        }) => {
            repl::run(config, store, session).await?;
        }
        None => {
            repl::run(config, store, None).await?;
        }
    }

    Ok(())
}

fn handle_config_command(action: Option<ConfigAction>, config: &AppConfig) -> Result<()> {
    match action {
        Some(ConfigAction::Show) | None => {
            let toml_str = toml::to_string_pretty(config)?;
            println!("{}", toml_str);
        }
        Some(ConfigAction::Init) => {
            let path = AppConfig::default_path();
            if path.exists() {
                println!("Config already exists at: {}", path.display());
            } else {
                config.save()?;
                println!("Created default config at: {}", path.display());
            }
        }
        Some(ConfigAction::Path) => {
            println!("{}", AppConfig::default_path().display());
        }
    }
    Ok(())
}
