//! formulaspark: command-line front end for the formula pipeline.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use formulaspark::{
    ColumnContext, ColumnKind, FingerprintCache, FormulaError, GenerationResult, PresentationSink,
    Request, RequestCoordinator, ResultSource, Settings,
};

/// Turn a description into a spreadsheet formula using a local model.
#[derive(Parser)]
#[command(name = "formulaspark")]
#[command(version = formulaspark::version::PKG_VERSION)]
#[command(about = "Natural-language to spreadsheet formula generator")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, env = "FORMULASPARK_CONFIG")]
    config: Option<PathBuf>,

    /// Model to use instead of the configured one.
    #[arg(short, long)]
    model: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a formula
    Generate {
        /// What the formula should do (or omit to read from stdin)
        description: Option<String>,
        /// Sheet the formula is for
        #[arg(short, long)]
        sheet: Option<String>,
        /// Tagged column, as NAME=COLUMN or NAME=COLUMN:type (repeatable)
        #[arg(short, long = "tag", value_parser = parse_tag)]
        tags: Vec<ColumnContext>,
        /// Skip the formula cache
        #[arg(long)]
        no_cache: bool,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that the model endpoint is reachable
    Ping,

    /// List models installed on the endpoint
    Models,

    /// Inspect or clear the formula cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show entry count and location
    Stats,
    /// Remove every cached formula
    Clear,
}

/// Reports progress on stderr; the formula itself goes to stdout.
struct TerminalSink {
    json: bool,
}

impl PresentationSink for TerminalSink {
    fn on_progress(&self, message: &str) {
        eprintln!("… {message}");
    }

    fn on_result(&self, result: &GenerationResult) {
        if self.json {
            match serde_json::to_string_pretty(result) {
                Ok(json) => println!("{json}"),
                Err(e) => eprintln!("error: {e}"),
            }
            return;
        }
        println!("{}", result.formula);
        if result.source == ResultSource::Cache {
            eprintln!("(from cache)");
        }
    }

    fn on_error(&self, error: &FormulaError) {
        eprintln!("error [{}]: {error}", error.category());
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(model) = args.model {
        settings.model = model;
    }
    info!(version = formulaspark::version::PKG_VERSION, model = %settings.model, "formulaspark starting");

    match args.command {
        Command::Generate {
            description,
            sheet,
            tags,
            no_cache,
            json,
        } => {
            let description = resolve_text(description, "generate")?;
            let mut request = Request::new(description)
                .context(tags)
                .parameters(settings.model_parameters());
            if let Some(sheet) = sheet {
                request = request.sheet(sheet);
            }

            let cache = Arc::new(FingerprintCache::open(settings.cache_config()));
            let config = settings.coordinator_config().cache_enabled(!no_cache);
            let coordinator =
                RequestCoordinator::with_config(cache, Arc::new(settings.model_client()?), config);

            let outcome = coordinator
                .submit_to(request, Arc::new(TerminalSink { json }))
                .await;
            coordinator.close()?;
            if outcome.is_err() {
                std::process::exit(1);
            }
        }

        Command::Ping => {
            let client = settings.model_client()?;
            if client.ping().await {
                println!("{} is online", client.base_url());
            } else {
                println!("{} is offline", client.base_url());
                std::process::exit(1);
            }
        }

        Command::Models => {
            let client = settings.model_client()?;
            let models = client.list_models().await?;
            if models.is_empty() {
                println!("no models installed");
            }
            for model in models {
                let marker = if model == settings.model { " (configured)" } else { "" };
                println!("{model}{marker}");
            }
        }

        Command::Cache { action } => {
            let config = settings.cache_config();
            let cache = FingerprintCache::open(config.clone());
            match action {
                CacheAction::Stats => {
                    if let Some(path) = &config.path {
                        println!("file: {}", path.display());
                    }
                    println!("entries: {} / {}", cache.len(), config.capacity);
                    let hits: u64 = cache.entries().iter().map(|e| e.hit_count).sum();
                    println!("recorded hits: {hits}");
                }
                CacheAction::Clear => {
                    let removed = cache.len();
                    cache.clear();
                    cache.close()?;
                    println!("removed {removed} cached formulas");
                }
            }
        }
    }

    Ok(())
}

/// Parse `NAME=COLUMN` or `NAME=COLUMN:type`.
fn parse_tag(raw: &str) -> Result<ColumnContext, String> {
    let (name, rest) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=COLUMN[:type], got '{raw}'"))?;
    let (column, kind) = match rest.split_once(':') {
        Some((column, kind)) => (column, kind.parse::<ColumnKind>().map_err(|e| e.to_string())?),
        None => (rest, ColumnKind::Unknown),
    };
    let name = name.trim().trim_start_matches('@');
    let column = column.trim();
    if name.is_empty() || column.is_empty() || !column.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(format!("expected NAME=COLUMN[:type], got '{raw}'"));
    }
    Ok(ColumnContext::new(name, column.to_ascii_uppercase(), kind))
}

fn resolve_text(arg: Option<String>, command: &str) -> Result<String, Box<dyn std::error::Error>> {
    if let Some(text) = arg {
        return Ok(text);
    }
    if io::stdin().is_terminal() {
        return Err(format!("{command}: no input provided (pass text as argument or via stdin)").into());
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    let trimmed = buf.trim();
    if trimmed.is_empty() {
        return Err(format!("{command}: no input provided (pass text as argument or via stdin)").into());
    }
    Ok(trimmed.to_string())
}
