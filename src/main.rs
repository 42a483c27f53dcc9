use clap::{ArgAction, Parser, Subcommand};

mod cli;
mod config;
mod embeddings;
mod error;
mod index;
mod logger;
mod memory;
mod patterns;
mod rerank;
mod retrieval;
mod text;
mod types;

#[derive(Parser)]
#[command(name = "grove")]
#[command(version)]
#[command(about = "Memory retrieval and workflow pattern detection for coding agents")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a .grove directory
    Init {
        /// Directory to initialize .grove in
        #[arg(short, long, default_value = ".")]
        path: String,
    },

    /// Remember something
    Remember {
        /// Content to remember
        content: String,

        /// Where the memory came from
        #[arg(short, long, default_value = "cli")]
        source: String,
    },

    /// Index the paragraphs of markdown files under a directory
    Ingest {
        /// Directory to walk
        dir: String,
    },

    /// Search memories
    Search {
        /// Search query
        query: String,

        /// Maximum results
        #[arg(short = 'n', long, default_value = "5")]
        limit: usize,

        /// Rerank candidates with the similarity model
        #[arg(short, long)]
        rerank: bool,

        /// Print results as JSON
        #[arg(long)]
        json: bool,

        /// Report which search paths were taken
        #[arg(long)]
        explain: bool,
    },

    /// Score a document against a query with the rerank model
    Score {
        /// Query text
        query: String,

        /// Document text
        document: String,
    },

    /// List recent memories
    List {
        /// Only this kind (memory, document)
        #[arg(short, long)]
        kind: Option<String>,

        /// Maximum results
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },

    /// Forget a memory
    Forget {
        /// Memory ID to forget
        id: i64,

        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// Show statistics
    Stats,

    /// Record the tool sequence of a finished session
    Observe {
        /// Tool names in call order
        tools: Vec<String>,

        /// Prompt that started the session
        #[arg(short, long, default_value = "")]
        prompt: String,

        /// JSONL transcript to read tool calls from ('-' for stdin)
        #[arg(short, long, conflicts_with = "tools")]
        transcript: Option<String>,
    },

    /// List workflow patterns ready to crystallize
    Patterns {
        /// Minimum occurrences (defaults to crystallize_min_count)
        #[arg(short, long)]
        min_count: Option<u32>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage the rerank score cache
    #[command(subcommand)]
    Cache(CacheCommands),

    /// View or set configuration
    Config {
        /// Config key
        key: Option<String>,

        /// Config value
        value: Option<String>,

        /// List available models
        #[arg(long)]
        list_models: bool,
    },

    /// Check the embedding provider and rerank model
    Status,
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Show cache size
    Stats,

    /// Drop expired entries
    Purge,

    /// Drop all entries
    Clear,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    logger::init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Init { path } => cli::memory::run_init(&path),
        Commands::Remember { content, source } => cli::memory::run_remember(&content, &source).await,
        Commands::Ingest { dir } => cli::memory::run_ingest(&dir).await,
        Commands::Search {
            query,
            limit,
            rerank,
            json,
            explain,
        } => cli::memory::run_search(&query, limit, rerank, json, explain).await,
        Commands::Score { query, document } => cli::memory::run_score(&query, &document).await,
        Commands::List { kind, limit } => cli::memory::run_list(kind.as_deref(), limit),
        Commands::Forget { id, force } => cli::memory::run_forget(id, force),
        Commands::Stats => cli::memory::run_stats(),
        Commands::Observe {
            tools,
            prompt,
            transcript,
        } => cli::patterns::run_observe(&tools, &prompt, transcript.as_deref()),
        Commands::Patterns { min_count, json } => cli::patterns::run_patterns(min_count, json),
        Commands::Cache(cmd) => match cmd {
            CacheCommands::Stats => cli::status::run_cache_stats(),
            CacheCommands::Purge => cli::status::run_cache_purge(),
            CacheCommands::Clear => cli::status::run_cache_clear(),
        },
        Commands::Config {
            key,
            value,
            list_models,
        } => cli::config::run_config(key.as_deref(), value.as_deref(), list_models),
        Commands::Status => cli::status::run_status().await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
