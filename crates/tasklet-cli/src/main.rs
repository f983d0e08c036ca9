//! tasklet CLI
//!
//! PostgreSQL に対して consumer を動かし、運用コマンドを提供します。
//! `demo` はデータベースなしで動きます。

mod demo;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tasklet_core::app::{App, AppBuilder, ConsumerGroup};
use tasklet_core::impls::PostgresTaskStore;
use tasklet_core::ports::ListFilter;
use tasklet_core::{Settings, TaskStatus};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "tasklet")]
#[command(about = "Durable deferred-task queue", long_about = None)]
struct Args {
    /// YAML settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Pool size for the database connection
    #[arg(long, default_value = "5", global = true)]
    max_connections: u32,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll a queue until ctrl-c
    Consume {
        /// Queue name (defaults to `default_queue`)
        #[arg(short, long)]
        queue: Option<String>,

        /// Number of consumers in this process
        #[arg(short, long, default_value = "1")]
        concurrency: usize,

        /// Seconds between polls
        #[arg(long)]
        poll_interval: Option<f64>,

        /// Stop on the first error instead of logging it
        #[arg(long)]
        strict: bool,
    },

    /// Delete every FAILED task
    DeleteFailed,

    /// Delete every COMPLETED task
    DeleteCompleted,

    /// Reset FAILED tasks to CREATED with zero attempts
    MarkFailedConsumable,

    /// Print task counts by status
    Stats {
        #[arg(short, long)]
        queue: Option<String>,
    },

    /// Print task summaries as JSON
    List {
        #[arg(short, long)]
        queue: Option<String>,

        /// created, completed or failed
        #[arg(short, long)]
        status: Option<TaskStatus>,

        #[arg(short, long, default_value = "100")]
        limit: usize,
    },

    /// Run the demo functions against an in-memory store
    Demo {
        #[arg(short, long, default_value = "2")]
        concurrency: usize,

        /// Give up after this many seconds
        #[arg(long, default_value = "30")]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let settings = load_settings(args.config.as_deref())?;

    match args.command {
        Command::Demo {
            concurrency,
            timeout,
        } => demo::run(settings, concurrency, Duration::from_secs(timeout)).await,

        Command::Consume {
            queue,
            concurrency,
            poll_interval,
            strict,
        } => {
            let mut settings = settings;
            if let Some(poll_interval) = poll_interval {
                settings.poll_interval = poll_interval;
            }
            if strict {
                settings.fail_silently = false;
            }
            let queue = queue.unwrap_or_else(|| settings.default_queue.clone());

            let app = connect(args.database_url.as_deref(), args.max_connections, settings).await?;
            let group = ConsumerGroup::spawn(concurrency, Arc::new(app.consumer()), queue.clone());
            info!(consumers = group.len(), %queue, "consuming");

            group.shutdown_on(async {
                let _ = tokio::signal::ctrl_c().await;
            });
            group.join().await?;
            Ok(())
        }

        Command::DeleteFailed => {
            let app = connect(args.database_url.as_deref(), args.max_connections, settings).await?;
            let deleted = app.admin().delete_failed().await?;
            println!("deleted {} failed task(s)", deleted.len());
            Ok(())
        }

        Command::DeleteCompleted => {
            let app = connect(args.database_url.as_deref(), args.max_connections, settings).await?;
            let deleted = app.admin().delete_completed().await?;
            println!("deleted {} completed task(s)", deleted.len());
            Ok(())
        }

        Command::MarkFailedConsumable => {
            let app = connect(args.database_url.as_deref(), args.max_connections, settings).await?;
            let reset = app.admin().mark_failed_consumable().await?;
            println!("marked {reset} failed task(s) consumable");
            Ok(())
        }

        Command::Stats { queue } => {
            let app = connect(args.database_url.as_deref(), args.max_connections, settings).await?;
            let counts = app.admin().counts(queue.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&counts)?);
            Ok(())
        }

        Command::List {
            queue,
            status,
            limit,
        } => {
            let app = connect(args.database_url.as_deref(), args.max_connections, settings).await?;
            let filter = ListFilter {
                queue,
                status,
                limit: Some(limit),
            };
            let summaries = app.admin().list(&filter).await?;
            println!("{}", serde_json::to_string_pretty(&summaries)?);
            Ok(())
        }
    }
}

/// EnvFilter（既定 info）と fmt / JSON レイヤーで subscriber を初期化
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let Some(path) = path else {
        return Ok(Settings::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read settings from {}", path.display()))?;
    parse_settings(&raw).with_context(|| format!("parse settings from {}", path.display()))
}

fn parse_settings(raw: &str) -> Result<Settings> {
    // 空ファイルは既定値
    if raw.trim().is_empty() {
        return Ok(Settings::default());
    }
    Ok(serde_yaml::from_str(raw)?)
}

/// 接続してスキーマを用意し、demo 関数を登録した App を作る
async fn connect(
    database_url: Option<&str>,
    max_connections: u32,
    settings: Settings,
) -> Result<App> {
    let url = database_url.context("--database-url or DATABASE_URL is required")?;
    let store = PostgresTaskStore::connect(url, max_connections)
        .await
        .context("connect to PostgreSQL")?;
    store.ensure_schema().await.context("ensure task table")?;

    let mut builder = AppBuilder::new(settings);
    demo::register(&mut builder)?;
    let app = builder
        .expect_functions(demo::FUNCTIONS)
        .build(Arc::new(store))
        .context("build app")?;
    Ok(app)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_yields_defaults() {
        assert_eq!(parse_settings("").unwrap(), Settings::default());
    }

    #[test]
    fn yaml_overrides_selected_fields() {
        let settings = parse_settings("default_queue: mail\nmax_retries: 3\npoll_interval: 0.5\n").unwrap();

        assert_eq!(settings.default_queue, "mail");
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.poll_interval, 0.5);
        assert_eq!(settings.retry_delay, 120);
    }

    #[test]
    fn unknown_yaml_keys_are_rejected() {
        assert!(parse_settings("retries: 3\n").is_err());
    }

    #[test]
    fn list_parses_status_filter() {
        let args = Args::try_parse_from(["tasklet", "list", "--status", "failed", "-l", "5"]).unwrap();

        let Command::List { status, limit, .. } = args.command else {
            panic!("expected list");
        };
        assert_eq!(status, Some(TaskStatus::Failed));
        assert_eq!(limit, 5);
    }
}
