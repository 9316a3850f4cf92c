use std::io::{BufRead, IsTerminal};
use std::process;
use std::sync::Arc;

use clap::Parser;
use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{Instrument, Level, debug, error, info, info_span, warn};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};
use vodfetch::cli::Args;
use vodfetch::config::{FileConfig, Settings, plan_outputs};
use vodfetch::error::AppError;
use vodfetch::progress::{BarObserver, SummaryEntry};
use vodfetch_engine::DownloadManager;
use vodfetch_engine::hls::{ConcatRemuxer, FfmpegRemuxer, JobRequest, JobStatus, Remuxer};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args).await {
        error!("Application error: {e}");
        eprintln!("Error: {e}");
        process::exit(e.exit_code());
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    let indicatif_layer = IndicatifLayer::new();
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(verbose)
                .with_writer(indicatif_layer.get_stderr_writer()),
        )
        .with(indicatif_layer)
        .init();
}

/// Control commands typed on stdin.
#[derive(Debug, Clone, Copy)]
enum Command {
    Pause,
    Resume,
    Cancel,
}

fn parse_command(line: &str) -> Option<Command> {
    match line.trim().to_ascii_lowercase().as_str() {
        "p" | "pause" => Some(Command::Pause),
        "r" | "resume" => Some(Command::Resume),
        "c" | "cancel" | "q" => Some(Command::Cancel),
        _ => None,
    }
}

/// Read commands on a plain thread; a blocked read never holds up shutdown.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<Command> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            match parse_command(&line) {
                Some(command) => {
                    if tx.send(command).is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => eprintln!("Unknown command '{}': use p, r or c", line.trim()),
            }
        }
    });
    rx
}

async fn run(args: Args) -> Result<(), AppError> {
    let file = FileConfig::load(args.config.as_deref())?;
    let settings = Settings::resolve(&args, file)?;
    debug!(?settings, "Resolved settings");

    let remuxer: Arc<dyn Remuxer> = if settings.no_remux {
        Arc::new(ConcatRemuxer)
    } else {
        Arc::new(FfmpegRemuxer::new(&settings.ffmpeg))
    };
    let manager = Arc::new(DownloadManager::new(settings.http.clone(), remuxer)?);
    let destinations = plan_outputs(&args.urls, args.output.as_deref(), &settings)?;

    let mut jobs = Vec::with_capacity(args.urls.len());
    for (url, destination) in args.urls.iter().zip(destinations) {
        let label = destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| url.clone());
        let span = info_span!("download", file = %label);
        let observer = Arc::new(BarObserver::new(span.clone(), label));
        let request = JobRequest::new(url.clone(), destination).with_config(settings.job.clone());
        let job_id = manager.submit(request, observer);
        info!(%job_id, %url, "Queued");
        jobs.push((url.clone(), job_id, span));
    }

    let ctrl_c_manager = Arc::clone(&manager);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling downloads");
            ctrl_c_manager.cancel_all();
        }
    });

    if !args.no_input && std::io::stdin().is_terminal() {
        let mut commands = spawn_stdin_reader();
        let control_manager = Arc::clone(&manager);
        tokio::spawn(async move {
            while let Some(command) = commands.recv().await {
                for job_id in control_manager.job_ids() {
                    match command {
                        Command::Pause => control_manager.pause(job_id),
                        Command::Resume => control_manager.resume(job_id),
                        Command::Cancel => control_manager.cancel(job_id),
                    };
                }
                info!(?command, "Applied to all downloads");
            }
        });
    }

    let waits = jobs.iter().map(|(url, job_id, span)| {
        let manager = Arc::clone(&manager);
        let url = url.clone();
        let job_id = *job_id;
        async move { (url, manager.wait(job_id).await) }.instrument(span.clone())
    });
    let results = join_all(waits).await;

    let summary: Vec<SummaryEntry> = results
        .iter()
        .filter_map(|(url, outcome)| outcome.as_ref().map(|o| SummaryEntry::new(url, o)))
        .collect();

    if args.json {
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{json}"),
            Err(e) => warn!("Failed to serialize summary: {e}"),
        }
    } else {
        for entry in &summary {
            println!("{}", entry.line());
        }
    }

    let total = summary.len();
    let failed = summary
        .iter()
        .filter(|e| e.status == JobStatus::Failed)
        .count();
    let cancelled = summary
        .iter()
        .filter(|e| e.status == JobStatus::Cancelled)
        .count();
    if failed > 0 {
        Err(AppError::JobsFailed { failed, total })
    } else if cancelled > 0 {
        Err(AppError::Cancelled)
    } else {
        Ok(())
    }
}
