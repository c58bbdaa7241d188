//! One-shot runner for the webhook retry queue.
//!
//! Useful for cron-driven deployments and for operators draining the queue
//! by hand. The long-running worker inside the API server does the same work
//! on a timer.
//!
//! Usage:
//!   process-retries           replay one batch of due deliveries
//!   process-retries --stats   print queue statistics and exit
//!   process-retries --clear   delete every queued delivery and exit

use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use indowater_backend::config::AppConfig;
use indowater_backend::database::gateway_credential_repository::GatewayCredentialRepository;
use indowater_backend::database::init_pool_from_config;
use indowater_backend::database::payment_repository::PaymentRepository;
use indowater_backend::database::webhook_retry_repository::WebhookRetryRepository;
use indowater_backend::gateways::factory::{GatewayFactory, GatewayFactoryConfig};
use indowater_backend::logging::init_tracing;
use indowater_backend::services::webhook_processor::WebhookProcessor;
use indowater_backend::services::webhook_retry::{RetryConfig, WebhookRetryService};

const USAGE: &str = "process-retries [--stats | --clear | --help]";

enum Command {
    Run,
    Stats,
    Clear,
}

fn parse_args() -> Result<Command, String> {
    let mut command = Command::Run;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--stats" => command = Command::Stats,
            "--clear" => command = Command::Clear,
            "--help" | "-h" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument '{other}'. Usage: {USAGE}")),
        }
    }
    Ok(command)
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    dotenv::dotenv().ok();

    let command = match parse_args() {
        Ok(cmd) => cmd,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    match run(command).await {
        Ok(clean) => {
            if clean {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            error!(error = %e, "retry run failed");
            ExitCode::FAILURE
        }
    }
}

/// Returns `Ok(true)` when the run completed without any delivery failing.
async fn run(command: Command) -> anyhow::Result<bool> {
    let config = AppConfig::from_env().map_err(|e| anyhow::anyhow!("configuration error: {e}"))?;
    let db_pool = init_pool_from_config(&config.database)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let payments = Arc::new(PaymentRepository::new(db_pool.clone()));
    let retry_store = Arc::new(WebhookRetryRepository::new(db_pool.clone()));
    let credentials = GatewayCredentialRepository::new(db_pool);

    // Replays dispatch through the same adapter configs as live webhooks:
    // stored credentials first, environment variables as fallback.
    let mut factory_config = GatewayFactoryConfig::from_env()
        .map_err(|e| anyhow::anyhow!("gateway configuration: {e}"))?;
    credentials.resolve_factory_config(&mut factory_config).await;
    let factory = Arc::new(GatewayFactory::with_config(factory_config));
    let processor = Arc::new(WebhookProcessor::new(payments, factory));
    let service = WebhookRetryService::new(processor, retry_store, RetryConfig::from_env());

    match command {
        Command::Stats => {
            let stats = service.retry_stats().await.map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("pending deliveries: {}", stats.total_pending);
            println!("dead-lettered:      {}", stats.total_dead);
            for (gateway, count) in &stats.by_gateway {
                println!("  gateway {gateway}: {count}");
            }
            for (attempt, count) in &stats.by_attempt {
                println!("  attempt {attempt}: {count}");
            }
            Ok(true)
        }
        Command::Clear => {
            let removed = service
                .clear_all_retries()
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            info!(removed, "cleared webhook retry queue");
            println!("removed {removed} queued deliveries");
            Ok(true)
        }
        Command::Run => {
            let report = service
                .process_pending_retries()
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            info!(
                claimed = report.claimed,
                succeeded = report.succeeded,
                rescheduled = report.rescheduled,
                dead_lettered = report.dead_lettered,
                "retry run finished"
            );
            println!(
                "claimed {} | succeeded {} | rescheduled {} | dead-lettered {}",
                report.claimed, report.succeeded, report.rescheduled, report.dead_lettered
            );
            Ok(!report.had_failures())
        }
    }
}
