//! Aeko Background Worker
//!
//! Handles scheduled jobs for the payment engine:
//! - Close expired subscriptions and memberships (daily at 00:00 UTC)
//! - Send membership expiry reminders (daily at 09:00 UTC)
//! - Ledger invariant sweep (daily at 05:30 UTC)
//! - Health check heartbeat (every 5 minutes)

use std::sync::Arc;
use std::time::Duration;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use aeko_payments::PaymentService;
use aeko_shared::create_pool;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting Aeko Worker");

    #[allow(clippy::expect_used)] // Fail-fast on startup if required config is missing
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = create_pool(&database_url).await?;

    // Create the payment service
    let payments = match PaymentService::from_env(pool.clone()) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            // Provider credentials missing: run in minimal mode
            warn!(error = %e, "Failed to create payment service - running in minimal mode");

            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                info!("Worker heartbeat (minimal mode)");
            }
        }
    };

    // Create scheduler
    let scheduler = JobScheduler::new().await?;

    // Job 1: Close expired subscriptions and memberships (daily at 00:00 UTC)
    let expiry_service = payments.clone();
    scheduler
        .add(Job::new_async("0 0 0 * * *", move |_uuid, _l| {
            let service = expiry_service.clone();
            Box::pin(async move {
                info!("Running expiration sweep");
                match service.scanner.close_expired().await {
                    Ok(sweep) => info!(
                        users_expired = sweep.users_expired,
                        memberships_expired = sweep.memberships_expired,
                        "Expiration sweep complete"
                    ),
                    Err(e) => error!(error = %e, "Expiration sweep failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Expiration sweep (daily at 00:00 UTC)");

    // Job 2: Membership expiry reminders (daily at 09:00 UTC)
    let reminder_service = payments.clone();
    scheduler
        .add(Job::new_async("0 0 9 * * *", move |_uuid, _l| {
            let service = reminder_service.clone();
            Box::pin(async move {
                info!("Running expiry reminder sweep");
                match service.scanner.send_expiry_reminders().await {
                    Ok(sweep) => info!(
                        sent = sweep.sent,
                        failed = sweep.failed,
                        "Reminder sweep complete"
                    ),
                    Err(e) => error!(error = %e, "Reminder sweep failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Expiry reminders (daily at 09:00 UTC)");

    // Job 3: Ledger invariant sweep (daily at 05:30 UTC)
    let invariant_service = payments.clone();
    scheduler
        .add(Job::new_async("0 30 5 * * *", move |_uuid, _l| {
            let service = invariant_service.clone();
            Box::pin(async move {
                info!("Running ledger invariant sweep");
                match service.invariants.run_all_checks().await {
                    Ok(summary) => {
                        if summary.healthy {
                            info!(
                                checks_run = summary.checks_run,
                                "Invariant sweep complete - all checks passed"
                            );
                        } else {
                            for violation in &summary.violations {
                                error!(
                                    invariant = %violation.invariant,
                                    severity = %violation.severity,
                                    subjects = ?violation.subject_ids,
                                    "{}",
                                    violation.description
                                );
                            }
                            error!(
                                checks_run = summary.checks_run,
                                checks_failed = summary.checks_failed,
                                violations = summary.violations.len(),
                                "Invariant sweep found violations"
                            );
                        }
                    }
                    Err(e) => error!(error = %e, "Invariant sweep failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Ledger invariant sweep (daily at 05:30 UTC)");

    // Job 4: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    // Start the scheduler
    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("Aeko Worker started successfully with 4 scheduled jobs");

    // Keep the main task running
    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
