use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use discovery_core::{ClientEvent, CoreConfig, DiscoveryEngine, DocumentId, Market, SearchBy, UserReaction, ViewMode};
use interfaces::baseline::BaselineFactory;
use tracing::{error, info};

/// Drives the on-device discovery engine from the command line.
///
/// Every invocation handles one client event and prints the outcome as JSON.
#[derive(Parser)]
#[command(name = "discovery-core", version, about)]
struct Cli {
    /// JSON or TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch the next feed batch
    Feed,
    /// Show the active feed documents
    RestoreFeed,
    /// Retire feed documents
    CloseFeed { ids: Vec<DocumentId> },
    /// Change markets and/or the feed batch size
    Configure {
        #[arg(long = "market")]
        markets: Vec<Market>,
        #[arg(long)]
        batch_size: Option<u32>,
    },
    /// React to a document (positive, negative or neutral)
    React { id: DocumentId, reaction: UserReaction },
    /// Log seconds spent on a document (story, reader or web)
    ViewTime { id: DocumentId, mode: ViewMode, seconds: i64 },
    /// Open a new search
    Search {
        term: String,
        /// Search by topic instead of query
        #[arg(long)]
        topic: bool,
    },
    SearchNext,
    SearchRestore,
    SearchTerm,
    SearchClose,
    /// One-shot search for similar documents
    DeepSearch {
        term: String,
        #[arg(long, default_value = "en-US")]
        market: Market,
    },
    /// One-shot search for documents similar to an active one
    DeepSearchId { id: DocumentId },
    Trending,
    #[command(subcommand)]
    Sources(SourcesCommand),
    /// Search the catalog of known sources
    AvailableSources { fuzzy_term: String },
    /// Forget everything learned about the user
    ResetAi,
}

#[derive(Subcommand)]
enum SourcesCommand {
    Trusted,
    Excluded,
    Set {
        #[arg(long)]
        trusted: Vec<String>,
        #[arg(long)]
        excluded: Vec<String>,
    },
    Trust { source: String },
    Untrust { source: String },
    Exclude { source: String },
    Unexclude { source: String },
}

impl Command {
    fn into_event(self) -> ClientEvent {
        match self {
            Command::Feed => ClientEvent::NextFeedBatchRequested,
            Command::RestoreFeed => ClientEvent::FeedRequested,
            Command::CloseFeed { ids } => ClientEvent::FeedDocumentsClosed { ids },
            Command::Configure { markets, batch_size } => ClientEvent::ConfigurationChanged {
                markets: (!markets.is_empty()).then_some(markets),
                max_batch_size: batch_size,
            },
            Command::React { id, reaction } => ClientEvent::UserReactionChanged { id, reaction },
            Command::ViewTime { id, mode, seconds } => ClientEvent::TimeSpent { id, view_mode: mode, seconds },
            Command::Search { term, topic } => ClientEvent::ActiveSearchRequested {
                term,
                by: if topic { SearchBy::Topic } else { SearchBy::Query },
            },
            Command::SearchNext => ClientEvent::NextActiveSearchBatchRequested,
            Command::SearchRestore => ClientEvent::RestoreActiveSearchRequested,
            Command::SearchTerm => ClientEvent::ActiveSearchTermRequested,
            Command::SearchClose => ClientEvent::ActiveSearchClosed,
            Command::DeepSearch { term, market } => ClientEvent::DeepSearchRequested { term, market },
            Command::DeepSearchId { id } => ClientEvent::DeepSearchByIdRequested { id },
            Command::Trending => ClientEvent::TrendingTopicsRequested,
            Command::Sources(SourcesCommand::Trusted) => ClientEvent::TrustedSourcesListRequested,
            Command::Sources(SourcesCommand::Excluded) => ClientEvent::ExcludedSourcesListRequested,
            Command::Sources(SourcesCommand::Set { trusted, excluded }) => ClientEvent::SetSourcesRequested {
                trusted: trusted.into_iter().collect::<BTreeSet<_>>(),
                excluded: excluded.into_iter().collect::<BTreeSet<_>>(),
            },
            Command::Sources(SourcesCommand::Trust { source }) => ClientEvent::AddTrustedSourceRequested { source },
            Command::Sources(SourcesCommand::Untrust { source }) => ClientEvent::RemoveTrustedSourceRequested { source },
            Command::Sources(SourcesCommand::Exclude { source }) => ClientEvent::AddExcludedSourceRequested { source },
            Command::Sources(SourcesCommand::Unexclude { source }) => ClientEvent::RemoveExcludedSourceRequested { source },
            Command::AvailableSources { fuzzy_term } => ClientEvent::AvailableSourcesListRequested { fuzzy_term },
            Command::ResetAi => ClientEvent::ResetAi,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the JSON outcome
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let config = CoreConfig::load(cli.config.as_deref())?;
    info!("Using document store at {}", config.database_url);

    let factory = BaselineFactory::with_sample_corpus();
    let engine = DiscoveryEngine::open(&config, &factory).await.map_err(|e| {
        error!("Failed to start the discovery engine: {}", e);
        e
    })?;

    let outcome = engine.handle(cli.command.into_event()).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    while let Some(notification) = engine.next_notification().await {
        println!("{}", serde_json::to_string_pretty(&notification)?);
    }
    engine.dispose().await;

    if outcome.is_exception() {
        std::process::exit(1);
    }
    Ok(())
}
