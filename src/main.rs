mod config;
mod loadtest;
mod models;
mod report;
mod store;
mod tasks;

use clap::Parser;
use config::Cli;
use loadtest::{RunController, RunMetrics};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::process::ExitCode;
use std::sync::Arc;
use store::FirestoreStore;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Missing poll id exits here with usage
    let cli = Cli::parse();
    let settings = match cli.into_settings() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let store = match FirestoreStore::new(settings.base_url.clone(), settings.api_key.clone(), settings.run.attempt_timeout) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to set up HTTP client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Ctrl-C abandons in-flight votes and stops the run between batches
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling outstanding votes...");
            signal_token.cancel();
        }
    });

    info!(
        "Target poll {} | {} participants | {:?} | {:?}",
        settings.run.poll_id, settings.run.participants, settings.run.target, settings.run.mode
    );
    if !settings.start_delay.is_zero() {
        info!("Starting load test in {:.1}s...", settings.start_delay.as_secs_f64());
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(settings.start_delay) => {}
        }
    }

    let metrics = Arc::new(RunMetrics::new());

    // --- Live metrics while the run is in progress ---
    let progress_stop = cancel.child_token();
    let progress = settings.progress_interval.map(|every| {
        tokio::spawn(tasks::progress::report_progress_task(
            Arc::clone(&metrics),
            every,
            progress_stop.clone(),
        ))
    });

    let mut controller = RunController::new(store, settings.run, Arc::clone(&metrics), cancel);
    let result = controller.run().await;
    debug!("Run phases: {:?}", controller.phases());

    progress_stop.cancel();
    if let Some(handle) = progress {
        let _ = handle.await;
    }

    let printed = match (&result, settings.json) {
        (Ok(report), true) => print_json(report),
        (Err(abort), true) => print_json(abort),
        (Ok(report), false) => {
            println!("{}", report::render(report));
            true
        }
        (Err(abort), false) => {
            println!("{}", report::render_abort(abort));
            true
        }
    };

    if printed && result.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_json<T: Serialize>(value: &T) -> bool {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            true
        }
        Err(e) => {
            error!("Failed to serialize report: {}", e);
            false
        }
    }
}
