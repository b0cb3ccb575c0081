//! deputy CLI: operator interface to the work-item vault.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use deputy::backend::BackendRegistry;
use deputy::config::{Config, Settings};
use deputy::engine::{CreateResult, DecisionResult, Engine, Eligibility};
use deputy::model::{Actor, ItemType, LogEntry, NewWorkItem, Priority, State, WorkItem};
use deputy::scheduler::jobs::standard_jobs;
use deputy::scheduler::{Activation, Orchestrator};
use deputy::telemetry::{TelemetryConfig, init_telemetry};
use deputy::watcher::{DropFolderWatcher, Watcher};

#[derive(Parser)]
#[command(name = "deputy", about = "Work-item intake with human approval gating")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the orchestrator: watchers, dispatch, sweeps, dashboard
    Serve,
    /// Work item operations
    Item {
        #[command(subcommand)]
        action: ItemAction,
    },
    /// Error queue operations
    Errors {
        #[command(subcommand)]
        action: ErrorsAction,
    },
    /// Audit log
    Log {
        #[command(subcommand)]
        action: LogAction,
    },
    /// Print the dashboard
    Dashboard,
    /// Reconcile folder locations against item headers
    Recover,
}

#[derive(Subcommand)]
enum ItemAction {
    /// Create a work item
    Create {
        /// Item type (file_drop, email, task, ...)
        item_type: String,
        /// Producing source name
        #[arg(long, default_value = "cli")]
        source: String,
        /// External event id (enables deduplication)
        #[arg(long)]
        external_id: Option<String>,
        /// high | medium | low (default: classifier decides)
        #[arg(long)]
        priority: Option<String>,
        /// JSON object of header fields
        #[arg(long)]
        fields: Option<String>,
        /// Body text
        #[arg(long)]
        body: Option<String>,
        /// Force human approval
        #[arg(long)]
        requires_approval: bool,
    },
    /// List work items
    List {
        /// Filter by state
        #[arg(long)]
        state: Option<String>,
        /// Maximum items to show
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Show a work item
    Show {
        /// Work item ID (full UUID or prefix)
        id: String,
    },
    /// Move an item to another state
    Transition {
        id: String,
        state: String,
        /// Acting operator
        #[arg(long, default_value = "operator")]
        actor: String,
    },
    /// Approve a pending item
    Approve {
        id: String,
        #[arg(long, default_value = "operator")]
        actor: String,
    },
    /// Reject a pending item
    Reject {
        id: String,
        #[arg(long, default_value = "operator")]
        actor: String,
    },
    /// Start a new item from a done or unrecoverable one
    Resubmit {
        id: String,
        #[arg(long, default_value = "operator")]
        actor: String,
    },
}

#[derive(Subcommand)]
enum ErrorsAction {
    /// List the error queue
    List,
    /// Retry a failed item now
    Retry {
        id: String,
        #[arg(long, default_value = "operator")]
        actor: String,
    },
    /// Give up on a failed item
    Unrecoverable {
        id: String,
        #[arg(long, default_value = "operator")]
        actor: String,
    },
}

#[derive(Subcommand)]
enum LogAction {
    /// Most recent entries
    Tail {
        #[arg(long, short = 'n', default_value_t = 20)]
        count: usize,
    },
    /// Every entry for one item
    Item { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;
    let settings = config.load_settings()?;

    match cli.command {
        Command::Serve => cmd_serve(config, settings).await,
        Command::Item { action } => cmd_item(&open_engine(&config, &settings)?, action).await,
        Command::Errors { action } => cmd_errors(&open_engine(&config, &settings)?, action).await,
        Command::Log { action } => cmd_log(&open_engine(&config, &settings)?, action),
        Command::Dashboard => {
            let engine = open_engine(&config, &settings)?;
            let snapshot = engine.dashboard(settings.dashboard.recent_entries)?;
            print!("{}", snapshot.render_markdown());
            Ok(())
        }
        Command::Recover => {
            let engine = open_engine(&config, &settings)?;
            let report = engine.recover().await?;
            println!(
                "Scanned {} item(s): {} reconciled, {} vault decision(s), {} refused move(s), \
                 {} voided, {} resumed, {} failed",
                report.scanned,
                report.reconciled.len(),
                report.decisions.len(),
                report.refused.len(),
                report.voided.len(),
                report.resumed.len(),
                report.failed.len()
            );
            Ok(())
        }
    }
}

fn open_engine(config: &Config, settings: &Settings) -> anyhow::Result<Engine> {
    Ok(Engine::open_vault(&config.vault_path)?
        .with_gate(settings.approval_gate())
        .with_retry_policy(settings.retry_policy()))
}

fn human(name: &str) -> Actor {
    Actor::human(name)
}

async fn cmd_serve(config: Config, settings: Settings) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig::new(
        config.otel_endpoint.clone(),
        config.log_level.clone(),
    ))?;

    let engine = Arc::new(open_engine(&config, &settings)?);

    let report = engine.recover().await?;
    tracing::info!(
        scanned = report.scanned,
        reconciled = report.reconciled.len(),
        voided = report.voided.len(),
        resumed = report.resumed.len(),
        failed = report.failed.len(),
        "startup recovery"
    );

    let backends = if config.hooks_dir.is_dir() {
        BackendRegistry::load_from_dir(&config.hooks_dir, config.hook_token.clone())?
    } else {
        tracing::warn!(dir = %config.hooks_dir.display(), "hooks dir missing, no backends");
        BackendRegistry::empty()
    };

    let drop_folder: Arc<dyn Watcher> = Arc::new(DropFolderWatcher::new(&config.drop_folder));
    let watchers = vec![(
        drop_folder,
        Activation::Continuous {
            idle: Duration::from_secs(settings.schedule.drop_folder_idle_secs),
        },
    )];

    let mut orchestrator = Orchestrator::new(
        Arc::clone(&engine),
        Duration::from_secs(settings.schedule.shutdown_grace_secs),
    );
    for job in standard_jobs(
        &engine,
        Arc::new(backends),
        watchers,
        &settings,
        config.vault_path.join("Dashboard.md"),
    ) {
        orchestrator.add(job)?;
    }

    orchestrator.start()?;
    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupt received, shutting down");
    orchestrator.shutdown().await;
    Ok(())
}

async fn cmd_item(engine: &Engine, action: ItemAction) -> anyhow::Result<()> {
    match action {
        ItemAction::Create {
            item_type,
            source,
            external_id,
            priority,
            fields,
            body,
            requires_approval,
        } => {
            let item_type: ItemType = item_type.parse()?;
            let mut new = NewWorkItem::new(item_type, source).requires_approval(requires_approval);
            if let Some(ext) = external_id {
                new = new.external_id(ext);
            }
            if let Some(p) = priority {
                new = new.priority(p.parse::<Priority>()?);
            }
            if let Some(json) = fields {
                new = new.fields(serde_json::from_str(&json)?);
            }
            if let Some(body) = body {
                new = new.body(body);
            }

            match engine.create_item(new).await? {
                CreateResult::Created(item) => {
                    println!("Created: {} (state: {})", item.id.0, item.state);
                }
                CreateResult::Duplicate(existing) => {
                    println!("Duplicate of existing item {}", existing.0);
                }
            }
            Ok(())
        }
        ItemAction::List { state, limit } => {
            let state = state.map(|s| s.parse::<State>()).transpose()?;
            let items = engine.list_by_state(state)?;
            print_items(&items, limit);
            Ok(())
        }
        ItemAction::Show { id } => {
            let id = engine.resolve_id(&id)?;
            let item = engine.get(id)?;
            print_item(&item)?;
            Ok(())
        }
        ItemAction::Transition { id, state, actor } => {
            let id = engine.resolve_id(&id)?;
            let target: State = state.parse()?;
            let item = engine.transition_item(id, target, &human(&actor)).await?;
            println!("{} is now {}", item.id, item.state);
            Ok(())
        }
        ItemAction::Approve { id, actor } => {
            let id = engine.resolve_id(&id)?;
            report_decision(engine.approve(id, &human(&actor)).await?);
            Ok(())
        }
        ItemAction::Reject { id, actor } => {
            let id = engine.resolve_id(&id)?;
            report_decision(engine.reject(id, &human(&actor)).await?);
            Ok(())
        }
        ItemAction::Resubmit { id, actor } => {
            let id = engine.resolve_id(&id)?;
            let item = engine.resubmit(id, &human(&actor)).await?;
            println!("Resubmitted as {} (state: {})", item.id.0, item.state);
            Ok(())
        }
    }
}

fn report_decision(result: DecisionResult) {
    match result {
        DecisionResult::Decided(item) => println!("{} is now {}", item.id, item.state),
        DecisionResult::AlreadyDecided(item) => {
            println!("{} was already decided (state: {})", item.id, item.state)
        }
    }
}

async fn cmd_errors(engine: &Engine, action: ErrorsAction) -> anyhow::Result<()> {
    match action {
        ErrorsAction::List => {
            let entries = engine.list_error_queue(Utc::now())?;
            if entries.is_empty() {
                println!("Error queue is empty.");
                return Ok(());
            }
            println!(
                "{:<8}  {:<16}  {:<7}  {:<22}  LAST ERROR",
                "ID", "TYPE", "RETRIES", "STATUS"
            );
            println!("{}", "-".repeat(90));
            for entry in &entries {
                let status = match entry.eligibility {
                    Eligibility::Due => "due".to_string(),
                    Eligibility::Waiting(at) => format!("waiting {}", at.format("%m-%d %H:%M:%S")),
                    Eligibility::Manual => "manual".to_string(),
                    Eligibility::Exhausted => "exhausted".to_string(),
                    Eligibility::Unrecoverable => "unrecoverable".to_string(),
                };
                println!(
                    "{:<8}  {:<16}  {:<7}  {:<22}  {}",
                    entry.item.id,
                    entry.item.item_type,
                    entry.item.retry_count,
                    status,
                    entry.item.last_error.as_deref().unwrap_or("-")
                );
            }
            println!("\n{} item(s)", entries.len());
            Ok(())
        }
        ErrorsAction::Retry { id, actor } => {
            let id = engine.resolve_id(&id)?;
            let item = engine.retry_failed_action(id, &human(&actor)).await?;
            println!("{} is now {}", item.id, item.state);
            Ok(())
        }
        ErrorsAction::Unrecoverable { id, actor } => {
            let id = engine.resolve_id(&id)?;
            let item = engine.mark_unrecoverable(id, &human(&actor)).await?;
            println!("{} marked unrecoverable", item.id);
            Ok(())
        }
    }
}

fn cmd_log(engine: &Engine, action: LogAction) -> anyhow::Result<()> {
    let entries = match action {
        LogAction::Tail { count } => engine.recent_logs(count)?,
        LogAction::Item { id } => engine.logs_for(engine.resolve_id(&id)?)?,
    };
    for entry in &entries {
        print_entry(entry);
    }
    Ok(())
}

fn print_items(items: &[WorkItem], limit: usize) {
    if items.is_empty() {
        println!("No work items found.");
        return;
    }

    println!(
        "{:<8}  {:<16}  {:<16}  {:<6}  {:<40}  CREATED",
        "ID", "TYPE", "STATE", "PRI", "SUMMARY"
    );
    println!("{}", "-".repeat(110));

    for item in items.iter().take(limit) {
        let summary: String = item.summary().chars().take(40).collect();
        println!(
            "{:<8}  {:<16}  {:<16}  {:<6}  {:<40}  {}",
            item.id,
            item.item_type,
            item.state,
            item.priority,
            summary,
            item.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    println!("\n{} item(s)", items.len());
}

fn print_item(item: &WorkItem) -> anyhow::Result<()> {
    println!("ID:         {}", item.id.0);
    println!("Type:       {}", item.item_type);
    println!("State:      {}", item.state);
    println!("Priority:   {}", item.priority);
    println!("Source:     {}", item.source.watcher);
    println!(
        "External:   {}",
        item.source.external_id.as_deref().unwrap_or("-")
    );
    println!("Approval:   {}", if item.requires_approval { "required" } else { "-" });
    if let Some(approval) = &item.approval {
        println!("  Reason:   {}", approval.reason.as_deref().unwrap_or("-"));
        println!("  Expires:  {}", approval.expires_at);
        if let Some(decision) = &approval.decision {
            println!(
                "  Decided:  {:?} by {} at {}",
                decision.verdict, decision.decided_by, decision.decided_at
            );
        }
    }
    println!("Retries:    {}", item.retry_count);
    if let Some(err) = &item.last_error {
        println!("Last Error: {err}");
    }
    if let Some(at) = item.next_retry_at {
        println!("Next Retry: {at}");
    }
    if item.unrecoverable {
        println!("Unrecoverable");
    }
    if let Some(parent) = item.parent_id {
        println!("Parent:     {}", parent.0);
    }
    if let Some(plan) = &item.plan {
        let (done, total) = plan.progress();
        println!("Plan:       {} ({done}/{total})", plan.title);
        for (i, step) in plan.steps.iter().enumerate() {
            println!("  [{i}] {:<11} {}", step.status.to_string(), step.description);
        }
    }
    println!("Fields:     {}", serde_json::to_string_pretty(&item.fields)?);
    println!("Created:    {}", item.created_at);
    println!("Updated:    {}", item.updated_at);
    println!("Revision:   {}", item.revision);
    if let Some(outcome) = &item.outcome {
        println!("---");
        println!("Backend:    {} ({}ms)", outcome.backend, outcome.duration_ms);
        if let Some(data) = &outcome.data {
            println!("Outcome:    {}", serde_json::to_string_pretty(data)?);
        }
    }
    if !item.body.is_empty() {
        println!("---\n{}", item.body);
    }
    Ok(())
}

fn print_entry(entry: &LogEntry) {
    let item = entry.item_id.map(|id| id.to_string()).unwrap_or_else(|| "-".into());
    let states = match (entry.from, entry.to) {
        (Some(from), Some(to)) if from != to => format!(" {from} -> {to}"),
        (None, Some(to)) => format!(" -> {to}"),
        _ => String::new(),
    };
    println!(
        "{}  {:<8}  {:<20} {:<24} {:?}{states}  {}",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        item,
        entry.action_type,
        entry.actor.to_string(),
        entry.result,
        entry.details
    );
}
