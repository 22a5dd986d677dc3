//! Tributary entry point

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tributary::{Config, RetrievalMode, SearchPipeline, SearchRequest};

mod cli;

/// Tributary: hybrid retrieval with query expansion, rank fusion and reranking
#[derive(Parser, Debug)]
#[command(name = "tributary")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP search server
    Serve {
        /// Bind address (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// HTTP port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
        /// Emit logs as JSON
        #[arg(long)]
        json_logs: bool,
    },
    /// Run a single search
    Search {
        /// Search query
        query: String,
        /// Retrieval mode (conjunctive, disjunctive, vector)
        #[arg(short, long)]
        mode: Option<RetrievalMode>,
        /// Number of results
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Skip query expansion
        #[arg(long)]
        no_expand: bool,
        /// Skip reranking
        #[arg(long)]
        no_rerank: bool,
        /// Output as JSON
        #[arg(long, conflicts_with = "trec")]
        json: bool,
        /// Output TREC run lines for this query id
        #[arg(long, value_name = "QUERY_ID")]
        trec: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Some(Command::Serve {
            host,
            port,
            json_logs,
        }) => run_server(&args.config, host, port, json_logs).await,
        Some(Command::Search {
            query,
            mode,
            top_k,
            no_expand,
            no_rerank,
            json,
            trec,
        }) => {
            // Keep stdout clean for result output
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| EnvFilter::new("tributary=warn")),
                )
                .with_writer(std::io::stderr)
                .init();

            let config = load_config(&args.config)?;
            let pipeline = SearchPipeline::from_config(&config).await?;

            let mut request = SearchRequest::new(query);
            request.mode = mode;
            request.top_k = top_k;
            if no_expand {
                request = request.expand(false);
            }
            if no_rerank {
                request = request.rerank(false);
            }

            let response = pipeline.search(request).await?;
            let format = match trec {
                Some(query_id) => cli::OutputFormat::Trec(query_id),
                None if json => cli::OutputFormat::Json,
                None => cli::OutputFormat::Table,
            };
            cli::print_search_results(&response, &format)?;
            Ok(())
        }
        None => run_server(&args.config, None, None, false).await,
    }
}

fn load_config(path: &Option<String>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    Ok(config)
}

async fn run_server(
    config_path: &Option<String>,
    host: Option<String>,
    port: Option<u16>,
    json_logs: bool,
) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tributary=info,tower_http=info"));

    if json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("Starting Tributary v{}", env!("CARGO_PKG_VERSION"));

    let mut config = load_config(config_path)?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let pipeline = Arc::new(SearchPipeline::from_config(&config).await?);

    tracing::info!(
        backends = ?pipeline.backend_names(),
        expansion = config.expansion.enabled,
        reranking = config.reranking.enabled,
        default_mode = %config.pipeline.default_mode,
        "Configuration loaded"
    );

    tributary::serve(pipeline, &config.server).await?;
    Ok(())
}
