use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use crate::database::payment_repository::PaymentRepository;
use crate::database::webhook_retry_repository::WebhookRetryRepository;
use crate::services::webhook_retry::WebhookRetryService;

/// Periodically replays failed webhook deliveries until they succeed or
/// exhaust their retry budget.
pub struct WebhookRetryWorker {
    retry: Arc<WebhookRetryService<PaymentRepository, WebhookRetryRepository>>,
    poll_interval: Duration,
}

impl WebhookRetryWorker {
    pub fn new(
        retry: Arc<WebhookRetryService<PaymentRepository, WebhookRetryRepository>>,
        poll_interval_secs: u64,
    ) -> Self {
        Self {
            retry,
            poll_interval: Duration::from_secs(poll_interval_secs),
        }
    }

    pub fn interval_from_env() -> u64 {
        std::env::var("WEBHOOK_RETRY_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60)
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "webhook retry worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("webhook retry worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {
                    match self.retry.process_pending_retries().await {
                        Ok(report) if report.claimed > 0 => {
                            info!(
                                claimed = report.claimed,
                                succeeded = report.succeeded,
                                rescheduled = report.rescheduled,
                                dead_lettered = report.dead_lettered,
                                "webhook retry cycle finished"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(error = %e, "webhook retry cycle failed");
                        }
                    }
                }
            }
        }

        info!("webhook retry worker stopped");
    }
}
