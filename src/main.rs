use content_migrator::config::MigratorConfig;
use content_migrator::executor::{MigrationExecutor, StreamSink};
use content_migrator::mapping_store::MappingStore;
use content_migrator::model::{EntityKind, PhaseConstraint};
use content_migrator::progress::ProgressStore;
use content_migrator::selection::select_phase;
use content_migrator::source::{LegacySource, PostgresSource};
use content_migrator::stream::{EventLogReader, EventLogServer, EventLogWriter};
use content_migrator::target::PostgresTarget;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "content-migrator")]
#[command(about = "Legacy content migration into the content-resource store")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the migration pipeline (all kinds, dependency order)
    Migrate {
        /// Migrate only one entity kind (tag, course, video, lesson)
        #[arg(long)]
        kind: Option<String>,
    },
    /// Build a staged selection of course candidates
    Select {
        /// Number of candidates to select
        #[arg(long)]
        target_count: usize,

        /// Minimum distinct owners to aim for
        #[arg(long, default_value_t = 1)]
        min_owners: usize,

        /// Minimum distinct tags to aim for
        #[arg(long, default_value_t = 1)]
        min_tags: usize,

        /// JSON file with the previous phase's selection (slugs)
        #[arg(long)]
        previous: Option<PathBuf>,

        /// Where to write this phase's selection
        #[arg(long, default_value = "selection.json")]
        output: PathBuf,
    },
    /// Follow a run's event stream and print live progress
    Watch {
        /// Run id to follow
        run_id: String,

        /// Offset to start from (-1 = from the beginning)
        #[arg(long, default_value_t = -1)]
        from: i64,
    },
    /// Run the event-log transport server
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1:8090")]
        bind: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Commands::Migrate { kind } => migrate(kind).await,
        Commands::Select {
            target_count,
            min_owners,
            min_tags,
            previous,
            output,
        } => select(target_count, min_owners, min_tags, previous, output).await,
        Commands::Watch { run_id, from } => watch(run_id, from).await,
        Commands::Serve { bind } => serve(bind).await,
    }
}

fn parse_kind(raw: &str) -> Result<EntityKind> {
    match raw {
        "tag" => Ok(EntityKind::Tag),
        "course" => Ok(EntityKind::Course),
        "lesson" => Ok(EntityKind::Lesson),
        "video" => Ok(EntityKind::Video),
        other => anyhow::bail!("Unknown entity kind: {}", other),
    }
}

async fn migrate(kind: Option<String>) -> Result<()> {
    let config = MigratorConfig::from_env()?;
    info!("Starting migration run {}", config.run_id);

    let source = PostgresSource::connect(&config.source_database_url).await?;
    let target = PostgresTarget::connect(&config.target_database_url).await?;
    let mappings = MappingStore::open(&config.mapping_store_path)?;

    let writer = EventLogWriter::new(config.event_log_url.clone());
    writer
        .create_stream(&config.run_id, config.stream_ttl_secs)
        .await?;
    let sink = StreamSink::new(writer, config.run_id.clone());

    let executor = MigrationExecutor::new(&source, &target, &mappings, &sink);
    let summaries = match kind {
        Some(raw) => vec![executor.run_kind(parse_kind(&raw)?).await?],
        None => executor.run().await?,
    };

    println!("Migration run {} finished:", config.run_id);
    for summary in &summaries {
        println!(
            "  {:<8} migrated {:>6}  failed {:>4}  slug conflicts {:>4}  ({}ms)",
            summary.kind.to_string(),
            summary.migrated,
            summary.failed,
            summary.skipped_conflicts,
            summary.duration_ms
        );
    }
    Ok(())
}

async fn select(
    target_count: usize,
    min_owners: usize,
    min_tags: usize,
    previous: Option<PathBuf>,
    output: PathBuf,
) -> Result<()> {
    let config = MigratorConfig::from_env()?;
    let source = PostgresSource::connect(&config.source_database_url).await?;
    let candidates = source.fetch_selection_candidates().await?;
    info!("Loaded {} selection candidates", candidates.len());

    // Previous phases are stored as slugs, which are stable across
    // candidate reloads; map them back to indices
    let previous_indices: Vec<usize> = match previous {
        Some(path) => {
            let slugs: Vec<String> = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
            slugs
                .iter()
                .filter_map(|slug| candidates.iter().position(|c| &c.legacy_slug == slug))
                .collect()
        }
        None => Vec::new(),
    };

    let constraint = PhaseConstraint {
        target_count,
        min_owners,
        min_tags,
        era_distribution: Default::default(),
    };
    let selection = select_phase(&candidates, &constraint, &previous_indices)?;

    let slugs: Vec<&str> = selection
        .indices
        .iter()
        .map(|&i| candidates[i].legacy_slug.as_str())
        .collect();
    std::fs::write(&output, serde_json::to_string_pretty(&slugs)?)?;

    println!(
        "Selected {} candidates ({} owners, {} tags) -> {}",
        selection.indices.len(),
        selection.distinct_owners,
        selection.distinct_tags,
        output.display()
    );
    Ok(())
}

async fn watch(run_id: String, from: i64) -> Result<()> {
    let event_log_url = std::env::var("EVENT_LOG_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:8090".to_string());
    let reader = EventLogReader::new(event_log_url);

    // The run may not have started yet
    reader
        .wait_for_stream(&run_id, 30, Duration::from_secs(2))
        .await?;

    let store = ProgressStore::new();
    store.subscribe(|state| {
        for (kind, progress) in &state.entities {
            print!(
                "  {}: {}/{} ({} failed, {:?})",
                kind, progress.current, progress.total, progress.failed, progress.status
            );
        }
        println!();
    });

    let start = if from < 0 { 0 } else { from as u64 };
    let mut tail = reader.tail(&run_id, start);
    while let Some((offset, event)) = tail.next().await {
        store.apply_at(offset, &event);
    }
    tail.join().await?;
    Ok(())
}

async fn serve(bind: String) -> Result<()> {
    let server = EventLogServer::bind(&bind).await?;
    let cancel = server.cancellation_token();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    server.run().await?;
    Ok(())
}
