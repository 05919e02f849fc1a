//! # Tidings — notification scheduler CLI
//!
//! Schedules notifications into a local, capacity-limited delivery store and
//! keeps the overflow in a persistent queue.
//!
//! Usage:
//!   tidings schedule --body "Stand-up" --in-minutes 30
//!   tidings list
//!   tidings snooze <id> --minutes 10
//!   tidings deliver                      # fire due entries, refill from queue

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use clap::{Parser, Subcommand};
use tidings_core::{TidingsConfig, TidingsError};
use tidings_scheduler::{
    JsonQueueStore, Placement, Record, RepeatInterval, Scheduler, SqliteDeliveryStore,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "tidings",
    version,
    about = "🔔 Tidings — admission-controlled notification scheduler"
)]
struct Cli {
    /// Config file (default: ~/.tidings/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory, overrides storage.data_dir
    #[arg(long)]
    data_dir: Option<String>,

    /// Admission ceiling, overrides scheduler.capacity
    #[arg(long)]
    capacity: Option<usize>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Schedule a new notification
    Schedule {
        /// Alert text
        #[arg(long)]
        body: String,
        /// Fire date (RFC 3339)
        #[arg(long, conflicts_with = "in_minutes")]
        at: Option<DateTime<Utc>>,
        /// Fire this many minutes from now
        #[arg(long)]
        in_minutes: Option<i64>,
        /// Action label
        #[arg(long)]
        action: Option<String>,
        /// none, hourly, daily, weekly, monthly, yearly
        #[arg(long, default_value = "none")]
        repeat: RepeatInterval,
        /// Use this identifier instead of a generated one
        #[arg(long)]
        id: Option<String>,
    },
    /// Cancel one notification
    Cancel { id: String },
    /// Cancel everything, admitted and queued
    CancelAll,
    /// Move a notification to a new fire date
    Reschedule {
        id: String,
        #[arg(long)]
        at: DateTime<Utc>,
    },
    /// Push a notification back
    Snooze {
        id: String,
        #[arg(long, default_value = "0")]
        minutes: i64,
        #[arg(long, default_value = "0")]
        hours: i64,
        #[arg(long, default_value = "0")]
        days: i64,
    },
    /// List admitted and queued notifications
    List,
    /// Show one notification
    Show { id: String },
    /// Promote queued notifications into free capacity
    Refill,
    /// Show the admitted notification due last
    Farthest,
    /// Fire everything due now, then refill from the queue
    Deliver,
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

fn snooze_delta(minutes: i64, hours: i64, days: i64) -> Option<TimeDelta> {
    TimeDelta::try_minutes(minutes)?
        .checked_add(&TimeDelta::try_hours(hours)?)?
        .checked_add(&TimeDelta::try_days(days)?)
}

fn print_record(record: &Record, state: &str) {
    let when = record
        .fire_date
        .map(|d| d.to_rfc3339())
        .unwrap_or_else(|| "-".into());
    println!(
        "  [{state}] {}  {}  repeats: {}  {}",
        record.identifier(),
        when,
        record.repeat_interval,
        record.alert_body
    );
    if let Some(action) = &record.alert_action {
        println!("           action: {action}");
    }
}

fn print_placement(id: &str, placement: &Placement) {
    match placement {
        Placement::Admitted => println!("✅ {id} admitted"),
        Placement::Displaced { evicted } => {
            println!("✅ {id} admitted, {evicted} moved to the queue")
        }
        Placement::Queued => println!("📥 {id} queued (store at capacity)"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "tidings=debug,tidings_scheduler=debug"
    } else {
        "tidings=warn,tidings_scheduler=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => TidingsConfig::load_from(path)?,
        None => TidingsConfig::load()?,
    };
    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir = dir.clone();
    }
    if let Some(capacity) = cli.capacity {
        config.scheduler.capacity = capacity;
    }
    config.validate()?;

    let data_dir = expand_path(&config.storage.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating {}", data_dir.display()))?;

    let delivery = Arc::new(SqliteDeliveryStore::open(
        &data_dir.join("delivery.db"),
        config.storage.store_ceiling,
    )?);
    let queue_store = Arc::new(JsonQueueStore::new(&data_dir));
    let scheduler = Scheduler::new(&config.scheduler, delivery.clone(), queue_store)?;

    match cli.command {
        Command::Schedule {
            body,
            at,
            in_minutes,
            action,
            repeat,
            id,
        } => {
            let fire_date = match (at, in_minutes) {
                (Some(at), _) => at,
                (None, Some(minutes)) => TimeDelta::try_minutes(minutes)
                    .and_then(|delta| Utc::now().checked_add_signed(delta))
                    .ok_or_else(|| {
                        TidingsError::invalid_record(format!("--in-minutes {minutes} is out of range"))
                    })?,
                (None, None) => anyhow::bail!("either --at or --in-minutes is required"),
            };
            let mut record = match id {
                Some(id) => Record::with_identifier(&body, &id),
                None => Record::new(&body),
            };
            record = record.with_repeat(repeat);
            if let Some(action) = action {
                record = record.with_action(&action);
            }
            let id = record.identifier().to_string();
            let placement = scheduler.schedule(record, fire_date).await?;
            print_placement(&id, &placement);
        }
        Command::Cancel { id } => {
            scheduler.cancel(&id).await?;
            println!("🗑️  {id} cancelled");
        }
        Command::CancelAll => {
            scheduler.cancel_all().await?;
            println!("🧹 All notifications cancelled");
        }
        Command::Reschedule { id, at } => match scheduler.reschedule(&id, at).await? {
            Some(placement) => print_placement(&id, &placement),
            None => return Err(TidingsError::NotFound(id).into()),
        },
        Command::Snooze {
            id,
            minutes,
            hours,
            days,
        } => {
            let delta = snooze_delta(minutes, hours, days).ok_or_else(|| {
                TidingsError::invalid_record(format!(
                    "snooze of {days}d {hours}h {minutes}m is out of range"
                ))
            })?;
            match scheduler.snooze(&id, delta).await? {
                Some(placement) => print_placement(&id, &placement),
                None => return Err(TidingsError::NotFound(id).into()),
            }
        }
        Command::List => {
            let scheduled = scheduler.scheduled_records().await?;
            let queued = scheduler.queued_records().await;
            println!(
                "🔔 Scheduled: {} / {}   Queued: {}",
                scheduled.len(),
                scheduler.capacity(),
                queued.len()
            );
            for record in &scheduled {
                print_record(record, "scheduled");
            }
            for record in &queued {
                print_record(record, "queued");
            }
        }
        Command::Show { id } => match scheduler.lookup(&id).await? {
            Some(record) => {
                let state = if scheduler.queued_records().await.iter().any(|r| r.identifier() == id) {
                    "queued"
                } else {
                    "scheduled"
                };
                print_record(&record, state);
            }
            None => return Err(TidingsError::NotFound(id).into()),
        },
        Command::Refill => {
            let promoted = scheduler.schedule_from_queue().await?;
            println!("⬆️  Promoted {promoted} notification(s)");
        }
        Command::Farthest => match scheduler.farthest_admitted().await? {
            Some(record) => print_record(&record, "farthest"),
            None => println!("Nothing scheduled"),
        },
        Command::Deliver => {
            let now = Utc::now();
            for entry in delivery.fire_due(now)? {
                match scheduler.reconstruct_from_native(&entry) {
                    Ok(record) => println!("🔔 {}", record.alert_body),
                    Err(e) => tracing::warn!("⚠️ Unrecognized entry fired: {e}"),
                }
            }
            for record in scheduler.take_overdue(now).await {
                println!("🔔 (late) {}", record.alert_body);
            }
            let promoted = scheduler.schedule_from_queue().await?;
            if promoted > 0 {
                println!("⬆️  Promoted {promoted} notification(s)");
            }
        }
    }

    Ok(())
}
