use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use feedmail::datetime::parse_timezone;
use feedmail::feed::FeedSource;
use feedmail::scheduler::Job;
use feedmail::{Config, FeedJob, HttpFeedSource, Mailbox, Result, Scheduler, SmtpMailbox, Storage};

/// Mail new feed items to subscribers on cron schedules.
#[derive(Debug, Parser)]
#[command(name = "feedmail", version, about)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    /// Run every subscriber once and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load_with_env(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {e}", args.config.display());
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = feedmail::logging::init(&config.logging, args.verbose) {
        eprintln!("Failed to initialize logging: {e}");
        let level = if args.verbose {
            "debug"
        } else {
            config.logging.level.as_str()
        };
        feedmail::logging::init_console_only(level);
    }

    match run(config, args.once).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(code = %e.code(), "{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config, once: bool) -> Result<()> {
    config.validate()?;
    let timezone = parse_timezone(&config.scheduler.timezone)?;

    info!("feedmail {} starting", env!("CARGO_PKG_VERSION"));
    let storage = Storage::connect(&config.database.dsn).await?;
    let mailbox: Arc<dyn Mailbox> = Arc::new(SmtpMailbox::new(&config.mail_sender, timezone)?);
    let source: Arc<dyn FeedSource> = Arc::new(HttpFeedSource::new(&config.fetch)?);

    let mut jobs = Vec::with_capacity(config.subscribers.len());
    for subscriber in &config.subscribers {
        let job = FeedJob::new(
            subscriber.clone(),
            storage.clone(),
            Arc::clone(&mailbox),
            Arc::clone(&source),
        )?;
        jobs.push((subscriber.schedule.clone(), Arc::new(job)));
    }

    // Schedules are checked in both modes so a bad spec fails at startup.
    let mut scheduler = Scheduler::new(timezone);
    for (spec, job) in &jobs {
        scheduler.schedule(spec, Arc::clone(job) as Arc<dyn Job>)?;
    }

    let cancel = CancellationToken::new();
    if once {
        run_once(&jobs, &cancel).await;
    } else {
        scheduler.start(cancel.clone());

        shutdown_signal().await;
        cancel.cancel();
        scheduler.stop().await;
    }

    storage.close().await;
    info!("Shutdown complete");
    Ok(())
}

async fn run_once(jobs: &[(String, Arc<FeedJob>)], cancel: &CancellationToken) {
    let runs = jobs.iter().map(|(_, job)| {
        let cancel = cancel.clone();
        async move {
            if let Err(e) = job.run(cancel).await {
                error!(job = job.name(), code = %e.code(), "Job failed: {}", e);
            }
        }
    });
    futures::future::join_all(runs).await;
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received SIGINT, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                error!("Failed to register SIGTERM handler: {}", e);
                let _ = ctrl_c.await;
                info!("Received SIGINT, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("Received SIGINT, shutting down");
    }
}
