//! eventgate CLI: run the gateway, or inspect events and jobs.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use eventgate::api::{self, AppState};
use eventgate::audit::EventAuditStore;
use eventgate::config::Config;
use eventgate::config::secrets::{ExposeSecret, masked_url};
use eventgate::db::Db;
use eventgate::import::{BulkImporter, ImportFormat, ImportOptions};
use eventgate::model::{EventFilters, Pagination, Schedule};
use eventgate::source::SourceRegistry;
use eventgate::store::{JobStore, Stores};
use eventgate::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(name = "eventgate", about = "Multi-tenant event gateway")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway and the job scheduler
    Serve {
        /// Keep everything in memory instead of Postgres
        #[arg(long)]
        memory: bool,
    },
    /// Event audit operations
    Events {
        #[command(subcommand)]
        action: EventsAction,
    },
    /// Show source checkpoints
    Checkpoints {
        #[arg(long)]
        org: String,
        /// Restrict to one source
        #[arg(long)]
        source: Option<String>,
    },
    /// Scheduled job operations
    Jobs {
        #[command(subcommand)]
        action: JobsAction,
    },
}

#[derive(Subcommand)]
enum EventsAction {
    /// List recent events
    List {
        #[arg(long)]
        org: String,
        /// Filter by status
        #[arg(long)]
        status: Option<String>,
        /// Filter by source
        #[arg(long)]
        source: Option<String>,
        /// Maximum events to show
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Import events from a JSON or CSV file
    Import {
        file: PathBuf,
        #[arg(long)]
        org: String,
        /// Validate and classify without persisting
        #[arg(long)]
        dry_run: bool,
        /// Stop classifying after the first failure
        #[arg(long)]
        stop_on_error: bool,
    },
}

#[derive(Subcommand)]
enum JobsAction {
    /// List scheduled jobs
    List {
        #[arg(long)]
        org: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { memory } => cmd_serve(memory).await,
        Command::Events { action } => {
            let stores = postgres_stores().await?;
            let audit = EventAuditStore::new(stores.events);
            match action {
                EventsAction::List {
                    org,
                    status,
                    source,
                    limit,
                } => cmd_events_list(&audit, &org, status, source, limit).await,
                EventsAction::Import {
                    file,
                    org,
                    dry_run,
                    stop_on_error,
                } => cmd_events_import(audit, &org, file, dry_run, stop_on_error).await,
            }
        }
        Command::Checkpoints { org, source } => {
            let stores = postgres_stores().await?;
            cmd_checkpoints(&EventAuditStore::new(stores.events), &org, source).await
        }
        Command::Jobs { action } => {
            let stores = postgres_stores().await?;
            match action {
                JobsAction::List { org } => cmd_jobs_list(&stores, &org).await,
            }
        }
    }
}

async fn postgres_stores() -> anyhow::Result<Stores> {
    let config = Config::from_env()?;
    connect_postgres(&config).await
}

async fn connect_postgres(config: &Config) -> anyhow::Result<Stores> {
    let url = config.require_database_url()?;
    let db = Db::connect_with(url.expose_secret(), config.database_max_connections).await?;
    db.migrate().await?;
    tracing::info!(database = %masked_url(url), "connected to postgres");
    Ok(Stores::postgres(Arc::new(db)))
}

async fn cmd_serve(memory: bool) -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig::new(
        config.otel_endpoint.clone(),
        config.log_level.clone(),
    ))?;

    let stores = if memory {
        tracing::warn!("running with the in-memory store; nothing survives a restart");
        Stores::in_memory()
    } else {
        connect_postgres(&config).await?
    };

    let sources = match &config.sources_dir {
        Some(dir) => SourceRegistry::load_from_dir(dir)?,
        None => SourceRegistry::empty(),
    };
    tracing::info!(sources = sources.len(), "source registry loaded");

    let state = AppState::new(stores, sources, config.gateway_settings());
    let scheduler = state.scheduler().clone();
    scheduler.start().await?;

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "gateway listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown requested");
        })
        .await?;

    scheduler.stop().await;
    Ok(())
}

async fn cmd_events_list(
    audit: &EventAuditStore,
    org: &str,
    status: Option<String>,
    source: Option<String>,
    limit: u32,
) -> anyhow::Result<()> {
    let filters = EventFilters {
        status: status.map(|s| s.parse()).transpose()?,
        source,
        ..Default::default()
    };
    let page = audit
        .list_event_audit(org, &filters, Pagination::new(Some(1), Some(limit)))
        .await?;

    if page.items.is_empty() {
        println!("No events found.");
        return Ok(());
    }

    println!(
        "{:<28}  {:<24}  {:<16}  {:<10}  RECEIVED",
        "EVENT_ID", "TYPE", "SOURCE", "STATUS"
    );
    println!("{}", "-".repeat(100));
    for event in &page.items {
        println!(
            "{:<28}  {:<24}  {:<16}  {:<10}  {}",
            event.event_id.as_str(),
            truncate(&event.event_type, 24),
            truncate(&event.source, 16),
            event.status.as_str(),
            event.received_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!("\n{} of {} event(s)", page.items.len(), page.total);
    Ok(())
}

async fn cmd_events_import(
    audit: EventAuditStore,
    org: &str,
    file: PathBuf,
    dry_run: bool,
    stop_on_error: bool,
) -> anyhow::Result<()> {
    let body = tokio::fs::read(&file).await?;
    let format = ImportFormat::detect(file.extension().and_then(|e| e.to_str()), &body);
    let options = ImportOptions {
        dry_run,
        continue_on_error: !stop_on_error,
    };

    let report = BulkImporter::new(audit)
        .import_body(org, format, &body, options)
        .await?;

    let s = &report.summary;
    println!(
        "{}total {}, successful {}, failed {}, duplicates {}",
        if dry_run { "(dry run) " } else { "" },
        s.total,
        s.successful,
        s.failed,
        s.duplicates
    );
    for failed in &report.results.failed {
        println!("  #{:<5} {:<18} {}", failed.index, failed.code, failed.error);
    }
    for e in &report.parse_errors {
        println!("  line {:<4} parse error: {}", e.line, e.message);
    }
    Ok(())
}

async fn cmd_checkpoints(
    audit: &EventAuditStore,
    org: &str,
    source: Option<String>,
) -> anyhow::Result<()> {
    let checkpoints = audit.get_source_checkpoints(org, source.as_deref()).await?;
    if checkpoints.is_empty() {
        println!("No checkpoints.");
        return Ok(());
    }

    println!(
        "{:<24}  {:<20}  {:<10}  {:<12}  LAST_EVENT",
        "SOURCE", "LAST_SEEN", "EVENTS", "EXPECTED_MS"
    );
    for c in &checkpoints {
        println!(
            "{:<24}  {:<20}  {:<10}  {:<12}  {}",
            truncate(&c.source, 24),
            c.last_seen_at.format("%Y-%m-%d %H:%M:%S"),
            c.event_count,
            c.expected_interval_ms
                .map(|ms| ms.to_string())
                .unwrap_or_else(|| "-".to_string()),
            c.last_seen_event_id
        );
    }
    Ok(())
}

async fn cmd_jobs_list(stores: &Stores, org: &str) -> anyhow::Result<()> {
    let jobs = stores.jobs.list_jobs(org).await?;
    if jobs.is_empty() {
        println!("No scheduled jobs.");
        return Ok(());
    }

    println!(
        "{:<8}  {:<24}  {:<9}  {:<20}  {:<6}  TARGET",
        "ID", "NAME", "SCHEDULE", "EXPRESSION", "ACTIVE"
    );
    for job in &jobs {
        let expression = match &job.schedule {
            Schedule::Cron { expression, .. } => expression.clone(),
            Schedule::Interval { interval_ms } => format!("{interval_ms}ms"),
        };
        println!(
            "{:<8}  {:<24}  {:<9}  {:<20}  {:<6}  {}",
            &job.id.to_string()[..8],
            truncate(&job.name, 24),
            job.schedule.kind(),
            truncate(&expression, 20),
            job.is_active,
            job.target_url
        );
    }
    println!("\n{} job(s)", jobs.len());
    Ok(())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
