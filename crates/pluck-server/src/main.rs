//! Pluck command-line entry point.

use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use uuid::Uuid;

use pluck::{classify, wilson_lower_bound, UrlVerdict, VoteDirection};
use pluck_server::config::{ConfigOverrides, ServerConfig};
use pluck_server::events::{EventBus, PluckEvent};
use pluck_server::rate_limit::RateLimiter;
use pluck_server::repl;
use pluck_server::rest::{self, AppState};
use pluck_server::service::PluckService;

#[derive(Parser)]
#[command(
    name = "pluck",
    about = "Extract products from retailer pages; teach the sites that resist",
    version
)]
struct Cli {
    /// Path to the mapping database (default ~/.pluck/mappings.db).
    #[arg(long, global = true)]
    db: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    /// Fetch timeout in milliseconds.
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API.
    Serve {
        /// Listen address (host:port). Also reads PLUCK_BIND.
        #[arg(long)]
        bind: Option<String>,

        /// Bearer token required on mapping writes and votes.
        /// Also reads PLUCK_API_TOKEN.
        #[arg(long)]
        token: Option<String>,

        /// Requests per client per minute; 0 disables limiting.
        #[arg(long)]
        rate_limit: Option<u32>,
    },

    /// Fetch a URL and print the extraction result as JSON.
    Extract { url: String },

    /// Run a URL through the safety gate without fetching it.
    CheckUrl { url: String },

    /// Print the confidence for a vote tally.
    Score { upvotes: u32, downvotes: u32 },

    /// List stored mappings for a domain, best first.
    Mappings { domain: String },

    /// Vote on a stored mapping.
    Vote {
        id: Uuid,
        /// up or down.
        direction: VoteDirection,
    },

    /// Teach a site interactively.
    Teach {
        url: String,

        /// Name recorded as the mapping's author (default: $USER).
        #[arg(long)]
        user: Option<String>,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   pluck completions bash > ~/.local/share/bash-completion/completions/pluck
    ///   pluck completions zsh > ~/.zfunc/_pluck
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

fn init_tracing(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    let mut overrides = ConfigOverrides {
        db_path: cli.db.clone(),
        fetch_timeout_ms: cli.timeout_ms,
        ..Default::default()
    };

    let rt = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;

    match cli.command {
        Commands::Serve {
            bind,
            token,
            rate_limit,
        } => {
            overrides.bind = bind;
            overrides.api_token = token;
            overrides.rate_limit = rate_limit;
            let config = ServerConfig::resolve(overrides);
            rt.block_on(serve(config))?;
        }

        Commands::Extract { url } => {
            let config = ServerConfig::resolve(overrides);
            let service = PluckService::open(config, EventBus::default())?;
            let response = rt.block_on(service.extract(&url))?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }

        Commands::CheckUrl { url } => match classify(&url) {
            UrlVerdict::Allowed(url) => println!("allowed: {url}"),
            UrlVerdict::Rejected(reason) => {
                println!("rejected: {reason}");
                std::process::exit(2);
            }
        },

        Commands::Score { upvotes, downvotes } => {
            println!("{:.4}", wilson_lower_bound(upvotes, downvotes));
        }

        Commands::Mappings { domain } => {
            let config = ServerConfig::resolve(overrides);
            let service = PluckService::open(config, EventBus::default())?;
            let mappings = rt.block_on(service.list_mappings(&domain))?;
            println!("{}", serde_json::to_string_pretty(&mappings)?);
        }

        Commands::Vote { id, direction } => {
            let config = ServerConfig::resolve(overrides);
            let service = PluckService::open(config, EventBus::default())?;
            let mapping = rt.block_on(service.vote(id, direction))?;
            println!(
                "{} confidence {:.4} ({} up / {} down)",
                mapping.id, mapping.confidence, mapping.upvotes, mapping.downvotes
            );
        }

        Commands::Teach { url, user } => {
            let config = ServerConfig::resolve(overrides);
            let user = user
                .or_else(|| std::env::var("USER").ok())
                .unwrap_or_else(|| "cli".to_string());
            repl::run(&rt, &config, &url, &user)?;
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "pluck", &mut std::io::stdout());
        }
    }

    Ok(())
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let events = EventBus::default();
    let limiter = Arc::new(RateLimiter::new(config.rate_limit, config.rate_window));
    let sweeper = RateLimiter::spawn_sweeper(Arc::clone(&limiter), config.rate_window);

    tracing::info!("Pluck server");
    tracing::info!("Database: {}", config.db_path.display());
    if config.api_token.is_some() {
        tracing::info!("Auth: bearer token required for writes");
    }

    let bind = config.bind.clone();
    let service = Arc::new(PluckService::open(config, events.clone())?);
    events.emit(PluckEvent::ServerStarted {
        bind: bind.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    });

    let result = rest::start(&bind, Arc::new(AppState::new(service, limiter))).await;
    sweeper.abort();
    result
}
