use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use friends_jobs::background_jobs::queue_store::prune_cutoff;
use friends_jobs::background_jobs::{EnqueuedJob, JobStatus};
use friends_jobs::config::{AppConfig, CliConfig, FileConfig};
use friends_jobs::{metrics, CapitalizeNameJob, FriendsApp, NewFriend};

mod cli_style;
use cli_style::get_styles;

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

fn parse_status(s: &str) -> Result<JobStatus, String> {
    JobStatus::parse(&s.to_lowercase()).ok_or_else(|| {
        format!("unknown status '{s}' (pending, running, completed, failed, discarded)")
    })
}

#[derive(Parser, Debug)]
#[command(version, styles = get_styles())]
struct CliArgs {
    /// Path to a TOML config file. Its values override the flags below.
    #[clap(long, global = true, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding friends.db and jobs.db.
    #[clap(long, global = true, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// App name used in global ids (gid://<app>/Friend/<id>).
    #[clap(long, global = true)]
    pub app_name: Option<String>,

    /// Port for the metrics server (Prometheus scraping) while working.
    #[clap(long, global = true)]
    pub metrics_port: Option<u16>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Creates or migrates both databases, then exits.
    Migrate,

    /// Adds a friend record.
    AddFriend {
        #[clap(long)]
        name: String,
        #[clap(long)]
        email: String,
    },

    /// Lists friend records.
    ListFriends {
        #[clap(long, default_value_t = 100)]
        limit: usize,
        #[clap(long, default_value_t = 0)]
        offset: usize,
    },

    /// Capitalizes the name of a friend, queued unless --now is given.
    Capitalize {
        id: i64,

        /// Run the job right away instead of enqueueing it.
        #[clap(long)]
        now: bool,

        /// Wait up to this many seconds for a worker to finish the queued job.
        #[clap(long, conflicts_with = "now")]
        wait_secs: Option<u64>,
    },

    /// Runs queued jobs until interrupted.
    Work {
        /// Run every due job once and exit.
        #[clap(long)]
        drain: bool,
    },

    /// Lists queued jobs, newest first.
    Jobs {
        #[clap(long, value_parser = parse_status)]
        status: Option<JobStatus>,
        #[clap(long, default_value_t = 20)]
        limit: usize,
    },

    /// Shows a job and its executions.
    Job { job_id: String },

    /// Puts a failed or discarded job back in the queue.
    Retry { job_id: String },

    /// Deletes finished jobs older than the given age.
    Prune {
        #[clap(long)]
        older_than_hours: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let cli_config = CliConfig {
        db_dir: cli_args.db_dir.clone(),
        app_name: cli_args.app_name.clone(),
        metrics_port: cli_args.metrics_port,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    metrics::init_metrics();

    let shutdown_token = CancellationToken::new();
    let app = FriendsApp::open(config, shutdown_token.clone())?;

    match cli_args.command {
        Command::Migrate => {
            info!("Databases are up to date in {:?}", app.config.db_dir);
        }
        Command::AddFriend { name, email } => {
            let friend = app.friend_store.create_friend(&NewFriend::new(name, email))?;
            println!("Created friend {}: {} <{}>", friend.id, friend.name, friend.email);
        }
        Command::ListFriends { limit, offset } => {
            let friends = app.friend_store.list_friends(limit, offset)?;
            if friends.is_empty() {
                println!("(no friends)");
            }
            for friend in friends {
                println!(
                    "{:>6}  {:<30} {:<30} updated {}",
                    friend.id,
                    friend.name,
                    friend.email,
                    friend.updated_at.to_rfc3339()
                );
            }
        }
        Command::Capitalize {
            id,
            now,
            wait_secs,
        } => {
            let friend = app
                .friend_store
                .get_friend(id)?
                .with_context(|| format!("Friend {} not found", id))?;

            if now {
                let dispatcher = app.dispatcher();
                tokio::task::spawn_blocking(move || {
                    CapitalizeNameJob::perform_now(&dispatcher, &friend)
                })
                .await??;
                let updated = app.friend_store.get_friend(id)?.context("Friend vanished")?;
                println!("Friend {} is now named {:?}", id, updated.name);
            } else {
                let job = CapitalizeNameJob::perform_later(&app.dispatcher(), &friend)?;
                println!("Enqueued job {}", job.job_id);
                if let Some(secs) = wait_secs {
                    let job = wait_for_job(&app, &job.job_id, Duration::from_secs(secs)).await?;
                    print_job(&job);
                }
            }
        }
        Command::Work { drain } => {
            let (mut worker, _handle) = app.worker();
            if drain {
                let performed = worker.drain().await?;
                println!("Performed {} job executions", performed);
            } else {
                if let Some(port) = app.config.metrics_port {
                    let token = shutdown_token.clone();
                    tokio::spawn(async move {
                        if let Err(e) = metrics::run_metrics_server(port, token).await {
                            error!("Metrics server stopped: {:#}", e);
                        }
                    });
                }

                let worker_task = tokio::spawn(async move { worker.run().await });
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received Ctrl+C, shutting down...");
                    }
                    _ = shutdown_token.cancelled() => {}
                }
                shutdown_token.cancel();
                worker_task.await?;
            }
        }
        Command::Jobs { status, limit } => {
            let jobs = app.queue_store.list_jobs(status, limit, 0)?;
            if jobs.is_empty() {
                println!("(no jobs)");
            }
            for job in jobs {
                println!(
                    "{}  {:<10} {:<20} {}/{}  scheduled {}",
                    job.job_id,
                    job.status,
                    job.job_class,
                    job.executions,
                    job.max_attempts,
                    job.scheduled_at.to_rfc3339()
                );
            }
            let stats = app.queue_store.get_stats()?;
            println!(
                "pending {} | running {} | completed {} | failed {} | discarded {}",
                stats.pending, stats.running, stats.completed, stats.failed, stats.discarded
            );
        }
        Command::Job { job_id } => {
            let job = app
                .queue_store
                .get_job(&job_id)?
                .with_context(|| format!("Job {} not found", job_id))?;
            print_job(&job);
            for execution in app.queue_store.get_executions(&job_id)? {
                println!(
                    "  attempt {} {:<10} started {} {}",
                    execution.attempt,
                    execution.status.as_str(),
                    execution.started_at.to_rfc3339(),
                    execution.error_message.unwrap_or_default()
                );
            }
        }
        Command::Retry { job_id } => {
            if !app.queue_store.retry_job(&job_id)? {
                bail!("Job {} does not exist or is not failed/discarded", job_id);
            }
            println!("Job {} is pending again", job_id);
        }
        Command::Prune { older_than_hours } => {
            let cutoff = prune_cutoff(Utc::now(), older_than_hours)?;
            let deleted = app.queue_store.prune_finished_before(cutoff)?;
            println!("Deleted {} finished jobs", deleted);
        }
    }

    Ok(())
}

async fn wait_for_job(app: &FriendsApp, job_id: &str, timeout: Duration) -> Result<EnqueuedJob> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let job = app
            .queue_store
            .get_job(job_id)?
            .with_context(|| format!("Job {} disappeared", job_id))?;
        if job.status.is_terminal() || tokio::time::Instant::now() >= deadline {
            return Ok(job);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

fn print_job(job: &EnqueuedJob) {
    println!("Job {}", job.job_id);
    println!("  class:      {}", job.job_class);
    println!("  queue:      {}", job.queue_name);
    println!("  status:     {}", job.status);
    println!("  attempts:   {}/{}", job.executions, job.max_attempts);
    if let Some(worker_id) = &job.locked_by {
        println!("  claimed by: {}", worker_id);
    }
    println!("  arguments:  {}", job.arguments);
    println!("  scheduled:  {}", job.scheduled_at.to_rfc3339());
    if let Some(error) = &job.last_error {
        println!("  last error: {}", error);
    }
}
