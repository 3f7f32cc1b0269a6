//! kennel CLI: inspect and control tracked submissions.

use clap::{Parser, Subcommand, ValueEnum};
use kennel::adapter::{Context, SubmissionAdapter};
use kennel::cache::DiskCache;
use kennel::call::LogKind;
use kennel::config::Config;
use kennel::telemetry::{TelemetryConfig, init_telemetry};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "kennel", about = "Track Cromwell submissions on Google Cloud")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show submission and workflow status
    Status {
        /// Bucket holding the submission
        bucket: String,
        /// Submission id
        submission: String,
    },
    /// Estimate the cost of a submission
    Cost { bucket: String, submission: String },
    /// Abort a submission and everything it launched
    Abort { bucket: String, submission: String },
    /// Follow a submission until it finishes
    Watch {
        bucket: String,
        submission: String,
        /// Seconds between updates
        #[arg(long, default_value_t = 30)]
        interval: u64,
    },
    /// List entities whose workflows failed
    Retries { bucket: String, submission: String },
    /// Show a task's return code and one of its logs
    Logs {
        bucket: String,
        submission: String,
        /// Workflow short id
        workflow: String,
        task: String,
        /// Attempt to show; the latest by default
        #[arg(long)]
        attempt: Option<u32>,
        #[arg(long, value_enum, default_value_t = LogChoice::Stdout)]
        log: LogChoice,
    },
    /// On-disk cache maintenance
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LogChoice {
    Stdout,
    Stderr,
    Task,
}

impl From<LogChoice> for LogKind {
    fn from(choice: LogChoice) -> Self {
        match choice {
            LogChoice::Stdout => LogKind::Stdout,
            LogChoice::Stderr => LogKind::Stderr,
            LogChoice::Task => LogKind::Task,
        }
    }
}

#[derive(Subcommand)]
enum CacheAction {
    /// Remove expired entries
    Prune,
    /// Remove every entry
    Purge,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "kennel".to_string(),
        log_level: config.log_level.clone(),
    })?;

    match cli.command {
        Command::Cache { action } => cmd_cache(&config, action).await,
        Command::Status { bucket, submission } => {
            let mut adapter = open(&config, &bucket, &submission).await?;
            cmd_status(&mut adapter).await
        }
        Command::Cost { bucket, submission } => {
            let mut adapter = open(&config, &bucket, &submission).await?;
            let cost = adapter.cost().await;
            println!("Wall clock:  {:.2} h", cost.clock_h);
            println!("CPU time:    {:.2} h", cost.cpu_h);
            println!("Est. cost:   ${:.2}", cost.est_cost);
            Ok(())
        }
        Command::Abort { bucket, submission } => {
            let mut adapter = open(&config, &bucket, &submission).await?;
            adapter.abort().await?;
            println!("Aborted {submission}");
            Ok(())
        }
        Command::Watch {
            bucket,
            submission,
            interval,
        } => {
            let mut adapter = open(&config, &bucket, &submission).await?;
            cmd_watch(&mut adapter, Duration::from_secs(interval.max(1))).await
        }
        Command::Retries { bucket, submission } => {
            let mut adapter = open(&config, &bucket, &submission).await?;
            adapter.update().await?;
            let entities = adapter.retry_entities().await;
            if entities.is_empty() {
                println!("Nothing to retry.");
            }
            for entity in entities {
                println!("{entity}");
            }
            Ok(())
        }
        Command::Logs {
            bucket,
            submission,
            workflow,
            task,
            attempt,
            log,
        } => {
            let mut adapter = open(&config, &bucket, &submission).await?;
            adapter.update().await?;
            let Some(report) = adapter
                .call_report(&workflow, &task, attempt, log.into())
                .await?
            else {
                anyhow::bail!("no call of {task} in workflow {workflow}");
            };
            println!("Task:        {} (attempt {})", report.task_name, report.attempt);
            println!("Status:      {}", report.status);
            match report.return_code {
                Some(rc) => println!("Return code: {rc}"),
                None => println!("Return code: -"),
            }
            println!();
            print!("{}", report.log.as_deref().unwrap_or("(no log yet)\n"));
            Ok(())
        }
    }
}

async fn open(config: &Config, bucket: &str, submission: &str) -> anyhow::Result<SubmissionAdapter> {
    let ctx = Context::from_config(config).await?;
    Ok(SubmissionAdapter::open(Arc::new(ctx), bucket, submission).await?)
}

async fn cmd_status(adapter: &mut SubmissionAdapter) -> anyhow::Result<()> {
    adapter.update().await?;
    let status = adapter.submission_status().await;

    println!("Submission: {}", adapter.submission_id());
    println!("Workspace:  {}/{}", adapter.record().namespace, adapter.record().workspace);
    println!("Status:     {status}");
    println!();

    println!("{:<8}  {:<14}  {:<5}  {:<30}  INPUT", "ID", "STATUS", "CALLS", "LAST TASK");
    println!("{}", "-".repeat(80));
    for (short_id, workflow) in adapter.workflows() {
        let last_task = workflow
            .calls()
            .last()
            .map(|c| format!("{} (attempt {})", c.task_name, c.attempt))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<8}  {:<14}  {:<5}  {:<30}  {}",
            short_id,
            workflow.status().to_string(),
            workflow.calls().len(),
            last_task,
            workflow.input_key().unwrap_or("-")
        );
    }

    println!();
    for (status, count) in adapter.status_summary() {
        println!("{status}: {count}");
    }
    Ok(())
}

async fn cmd_watch(adapter: &mut SubmissionAdapter, interval: Duration) -> anyhow::Result<()> {
    loop {
        adapter.update().await?;
        let status = adapter.submission_status().await;
        let summary = adapter
            .status_summary()
            .into_iter()
            .map(|(s, n)| format!("{s}={n}"))
            .collect::<Vec<_>>()
            .join(" ");
        println!("[{}] {status} {summary}", chrono::Utc::now().format("%H:%M:%S"));

        if status.is_terminal() {
            // Drain what the orchestrator wrote before it exited.
            adapter.update().await?;
            return Ok(());
        }
        tokio::time::sleep(interval).await;
    }
}

async fn cmd_cache(config: &Config, action: CacheAction) -> anyhow::Result<()> {
    let disk = DiskCache::open(&config.cache_path, config.tuning.cache.disk_ttl_days).await?;
    match action {
        CacheAction::Prune => println!("Pruned {} entries", disk.prune().await?),
        CacheAction::Purge => println!("Purged {} entries", disk.purge().await?),
    }
    Ok(())
}
