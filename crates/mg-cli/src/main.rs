mod server;

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use rmcp::{ServiceExt, transport::stdio};

use mg_store::{
    DEFAULT_COLLECTION, MemoryEngine, MemoryFilter, PersistRequest, RecallRequest, RelatedFilter,
    insights, topic_trends,
};

#[derive(Parser)]
#[command(name = "mg", about = "Interaction memory engine CLI and MCP server")]
struct Cli {
    /// Data directory (default: MG_DATA_DIR or ~/.mindgraph)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start MCP server on stdio transport
    Serve,

    /// Recall context for a user before answering
    Think {
        user: String,
        /// The incoming message, for topic suggestions
        input: Option<String>,
    },

    /// Persist an exchange
    Respond {
        user: String,
        /// The user's message
        input: String,
        /// The response given
        output: String,
        /// Classified intent
        #[arg(long)]
        intent: Option<String>,
        /// positive, negative, neutral or mixed
        #[arg(long)]
        sentiment: Option<String>,
        /// Topic tag (repeatable; extracted from input when omitted)
        #[arg(long = "topic")]
        topics: Vec<String>,
        /// Previous interaction id to chain from
        #[arg(long)]
        previous: Option<String>,
    },

    /// Check a stored interaction for structural completeness
    Validate {
        interaction_id: String,
    },

    /// Find interactions by topic, entity or user
    Related {
        /// Topic to match (repeatable)
        #[arg(long = "topic")]
        topics: Vec<String>,
        /// Entity to match (repeatable)
        #[arg(long = "entity")]
        entities: Vec<String>,
        /// Restrict to one user
        #[arg(long)]
        user: Option<String>,
        #[arg(long, default_value_t = 5)]
        limit: u32,
    },

    /// Show a user's profile
    Profile {
        user: String,
    },

    /// Aggregate interaction statistics over a window
    Insights {
        #[arg(long)]
        user: Option<String>,
        #[arg(long, default_value_t = 30)]
        days: u32,
    },

    /// Top topics by mention count over a window
    Trends {
        #[arg(long)]
        user: Option<String>,
        #[arg(long, default_value_t = 30)]
        days: u32,
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },

    /// Store a semantic memory
    Remember {
        content: String,
        /// insight, fact, preference, pattern or connection
        #[arg(long = "type", default_value = "fact")]
        memory_type: String,
        #[arg(long)]
        user: Option<String>,
        /// Importance in [0, 1]
        #[arg(long)]
        importance: Option<f64>,
        /// Comma-separated tags
        #[arg(long)]
        tags: Option<String>,
    },

    /// Search semantic memories by meaning
    Search {
        query: String,
        #[arg(long, default_value_t = 5)]
        k: u32,
        #[arg(long)]
        user: Option<String>,
        /// Only memories of this kind
        #[arg(long = "type")]
        memory_type: Option<String>,
    },

    /// Show store statistics
    Stats,
}

fn data_dir(cli: &Cli) -> PathBuf {
    cli.db
        .clone()
        .or_else(|| std::env::var("MG_DATA_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(default_data_dir)
}

fn default_data_dir() -> PathBuf {
    std::env::var("HOME")
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mindgraph")
}

fn open_engine(cli: &Cli) -> Result<MemoryEngine> {
    let dir = data_dir(cli);
    MemoryEngine::open(&dir)
        .with_context(|| format!("failed to open engine at {}", dir.display()))
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Serve => cmd_serve(&cli).await,
        Commands::Think { user, input } => cmd_think(&cli, user, input.as_deref()),
        Commands::Respond {
            user,
            input,
            output,
            intent,
            sentiment,
            topics,
            previous,
        } => cmd_respond(&cli, user, input, output, intent, sentiment, topics, previous),
        Commands::Validate { interaction_id } => cmd_validate(&cli, interaction_id),
        Commands::Related {
            topics,
            entities,
            user,
            limit,
        } => cmd_related(&cli, topics, entities, user.as_deref(), *limit),
        Commands::Profile { user } => cmd_profile(&cli, user),
        Commands::Insights { user, days } => cmd_insights(&cli, user.as_deref(), *days),
        Commands::Trends { user, days, limit } => {
            cmd_trends(&cli, user.as_deref(), *days, *limit)
        }
        Commands::Remember {
            content,
            memory_type,
            user,
            importance,
            tags,
        } => cmd_remember(&cli, content, memory_type, user.clone(), *importance, tags.clone()),
        Commands::Search {
            query,
            k,
            user,
            memory_type,
        } => cmd_search(&cli, query, *k, user.clone(), memory_type.as_deref()),
        Commands::Stats => cmd_stats(&cli),
    }
}

// ---------------------------------------------------------------------------
// Advisory pidfile for observability
// ---------------------------------------------------------------------------

fn pidfile_path(cli: &Cli) -> PathBuf {
    data_dir(cli).join("mg-serve.pid")
}

/// Check for an existing pidfile and log accordingly, then write our own.
fn acquire_pidfile(cli: &Cli) -> Option<PathBuf> {
    let path = pidfile_path(cli);
    if let Ok(content) = std::fs::read_to_string(&path)
        && let Ok(pid) = content.trim().parse::<u32>()
    {
        if is_process_alive(pid) {
            tracing::warn!(
                "another mg serve (PID {pid}) is running — coexisting with busy_timeout"
            );
        } else {
            tracing::info!("cleaned up stale pidfile (PID {pid} is dead)");
            let _ = std::fs::remove_file(&path);
        }
    }

    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match std::fs::File::create(&path) {
        Ok(mut f) => {
            let _ = write!(f, "{}", std::process::id());
            tracing::info!("wrote pidfile: {}", path.display());
            Some(path)
        }
        Err(e) => {
            tracing::warn!("failed to write pidfile: {e}");
            None
        }
    }
}

fn release_pidfile(path: &std::path::Path) {
    let _ = std::fs::remove_file(path);
    tracing::info!("removed pidfile: {}", path.display());
}

#[cfg(unix)]
fn is_process_alive(pid: u32) -> bool {
    // kill(pid, 0) checks existence without sending a signal
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    false // conservative: assume dead on non-unix
}

async fn cmd_serve(cli: &Cli) -> Result<()> {
    let engine = open_engine(cli)?;
    tracing::info!("starting MCP server at {}", data_dir(cli).display());

    let pidfile = acquire_pidfile(cli);

    let server = server::MgServer::new(engine);
    let service = server
        .serve(stdio())
        .await
        .context("failed to start MCP server")?;
    service.waiting().await?;

    if let Some(path) = pidfile {
        release_pidfile(&path);
    }
    Ok(())
}

fn cmd_think(cli: &Cli, user: &str, input: Option<&str>) -> Result<()> {
    let engine = open_engine(cli)?;
    let ctx = engine.recall(&RecallRequest {
        user: user.to_string(),
        input: input.map(str::to_string),
        days: None,
        limit: None,
    })?;

    if ctx.is_new_user {
        println!("{user} is new — no history yet");
    } else {
        println!("{user}: {} interaction(s)", ctx.interaction_count);
        if let Some(last) = &ctx.last_interaction_id {
            println!("last: {last}");
        }
    }
    if !ctx.suggested_topics.is_empty() {
        println!("suggested topics: {}", ctx.suggested_topics.join(", "));
    }
    for rec in &ctx.recent_interactions {
        println!("[{}] {} — {}", rec.timestamp, rec.id, rec.input);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_respond(
    cli: &Cli,
    user: &str,
    input: &str,
    output: &str,
    intent: &Option<String>,
    sentiment: &Option<String>,
    topics: &[String],
    previous: &Option<String>,
) -> Result<()> {
    let engine = open_engine(cli)?;
    let sentiment = sentiment
        .as_deref()
        .map(str::parse)
        .transpose()
        .map_err(|e: String| anyhow!(e))?;

    let outcome = engine.persist(&PersistRequest {
        user: user.to_string(),
        input: input.to_string(),
        output: output.to_string(),
        intent: intent.clone(),
        sentiment,
        entities: vec![],
        topics: topics.to_vec(),
        previous_id: previous.clone(),
        memory: None,
    })?;

    println!("{}", outcome.interaction_id);
    Ok(())
}

fn cmd_validate(cli: &Cli, interaction_id: &str) -> Result<()> {
    let engine = open_engine(cli)?;
    let report = engine.validate(interaction_id)?;

    println!("exists:    {}", report.exists);
    println!("owned:     {}", report.has_owning_user);
    println!("topics:    {}", report.has_at_least_one_topic);
    println!("verdict:   {}", if report.valid() { "valid" } else { "invalid" });
    Ok(())
}

fn cmd_related(
    cli: &Cli,
    topics: &[String],
    entities: &[String],
    user: Option<&str>,
    limit: u32,
) -> Result<()> {
    let engine = open_engine(cli)?;
    let filter = RelatedFilter {
        topics: topics.to_vec(),
        entities: entities.to_vec(),
        user: user.map(str::to_string),
    };
    let interactions = engine.graph().find_related(&filter, limit)?;

    if interactions.is_empty() {
        println!("(no related interactions)");
    }
    for rec in &interactions {
        println!(
            "[{}] {} ({}) — {} | topics: {}",
            rec.timestamp,
            rec.id,
            rec.user,
            rec.input,
            rec.topics.join(", ")
        );
    }
    Ok(())
}

fn cmd_profile(cli: &Cli, user: &str) -> Result<()> {
    let engine = open_engine(cli)?;
    let profile = engine.graph().get_or_create_profile(user)?;

    println!("user:          {}", profile.user);
    println!("interactions:  {}", profile.interaction_count);
    if profile.created {
        println!("(created just now)");
    }
    for t in &profile.favorite_topics {
        println!("  {} ({})", t.topic, t.frequency);
    }
    Ok(())
}

fn cmd_insights(cli: &Cli, user: Option<&str>, days: u32) -> Result<()> {
    let engine = open_engine(cli)?;
    let report = insights(engine.graph(), user, days)?;

    println!("window:             {days}d");
    println!("interactions:       {}", report.total_interactions);
    println!("distinct intents:   {}", report.distinct_intents);
    println!("distinct sentiments: {}", report.distinct_sentiments);
    println!("distinct topic sets: {}", report.distinct_topic_sets);
    Ok(())
}

fn cmd_trends(cli: &Cli, user: Option<&str>, days: u32, limit: u32) -> Result<()> {
    let engine = open_engine(cli)?;
    let trends = topic_trends(engine.graph(), user, days, limit)?;

    if trends.is_empty() {
        println!("(no topics in the last {days}d)");
    }
    for t in &trends {
        println!("{:>5}  {}", t.frequency, t.topic);
    }
    Ok(())
}

fn cmd_remember(
    cli: &Cli,
    content: &str,
    memory_type: &str,
    user: Option<String>,
    importance: Option<f64>,
    tags: Option<String>,
) -> Result<()> {
    let engine = open_engine(cli)?;
    let mut metadata =
        mg_core::MemoryMetadata::new(memory_type.parse().map_err(|e: String| anyhow!(e))?);
    metadata.user = user;
    if let Some(importance) = importance {
        metadata.importance = importance;
    }
    metadata.tags = tags;

    let id = engine.memory().store(DEFAULT_COLLECTION, content, &metadata)?;
    println!("{id}");
    Ok(())
}

fn cmd_search(
    cli: &Cli,
    query: &str,
    k: u32,
    user: Option<String>,
    memory_type: Option<&str>,
) -> Result<()> {
    let engine = open_engine(cli)?;
    let filter = MemoryFilter {
        memory_type: memory_type
            .map(str::parse)
            .transpose()
            .map_err(|e: String| anyhow!(e))?,
        user,
        min_importance: None,
    };
    let results = engine
        .memory()
        .query(DEFAULT_COLLECTION, &[query.to_string()], k, Some(&filter))?;

    let hits = &results[0];
    if hits.is_empty() {
        println!("(no memories found)");
    }
    for hit in hits {
        println!("{} ({:.3})  {}", hit.id, hit.distance, hit.document);
    }
    Ok(())
}

fn cmd_stats(cli: &Cli) -> Result<()> {
    let engine = open_engine(cli)?;
    let counts = engine.graph().counts()?;
    let memories = engine.memory().count(DEFAULT_COLLECTION)?;

    println!("data dir:      {}", data_dir(cli).display());
    println!("users:         {}", counts.users);
    println!("interactions:  {}", counts.interactions);
    println!("topics:        {}", counts.topics);
    println!("memories:      {memories}");
    Ok(())
}
