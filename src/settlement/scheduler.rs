// Batch Scheduler - wall-clock driver for the payout and contribution jobs
//
// Cadences:
// - Every(interval): fixed polling interval (payouts, default 5 min)
// - Daily(hour):     once per day at the given UTC hour (contributions, off-peak)
//
// Overlap between a slow run and the next tick is harmless: both jobs claim
// per-circle / per-schedule leases before touching anything.

use std::sync::Arc;

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

use crate::settlement::{ContributionProcessor, PayoutScanner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobCadence {
    Every(Duration),
    Daily { execution_hour: u32 },
}

#[derive(Debug, Clone, Default)]
pub struct BatchScheduleConfig {
    /// `None` disables the job; it can still be triggered over HTTP
    pub payouts: Option<JobCadence>,
    pub contributions: Option<JobCadence>,
}

#[derive(Debug, Clone, Copy)]
enum Job {
    Payouts,
    Contributions,
}

/// Runs both batch jobs in the background
pub struct BatchScheduler {
    config: BatchScheduleConfig,
    payouts: Arc<PayoutScanner>,
    contributions: Arc<ContributionProcessor>,
}

impl BatchScheduler {
    pub fn new(
        config: BatchScheduleConfig,
        payouts: Arc<PayoutScanner>,
        contributions: Arc<ContributionProcessor>,
    ) -> Self {
        Self {
            config,
            payouts,
            contributions,
        }
    }

    /// Spawn one loop per enabled job
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        if let Some(cadence) = self.config.payouts {
            let scanner = self.payouts.clone();
            let processor = self.contributions.clone();
            handles.push(tokio::spawn(async move {
                Self::run_job(Job::Payouts, cadence, scanner, processor).await
            }));
        }
        if let Some(cadence) = self.config.contributions {
            let scanner = self.payouts.clone();
            let processor = self.contributions.clone();
            handles.push(tokio::spawn(async move {
                Self::run_job(Job::Contributions, cadence, scanner, processor).await
            }));
        }

        handles
    }

    async fn run_job(
        job: Job,
        cadence: JobCadence,
        scanner: Arc<PayoutScanner>,
        processor: Arc<ContributionProcessor>,
    ) {
        match cadence {
            JobCadence::Every(period) => {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    Self::execute(job, &scanner, &processor).await;
                }
            }
            JobCadence::Daily { execution_hour } => loop {
                let now = Utc::now();
                let next_execution = Self::calculate_next_daily_execution(now, execution_hour);
                let wait = next_execution.signed_duration_since(now);

                if wait.num_seconds() > 0 {
                    info!(
                        "⏰ Next {:?} run scheduled for: {} UTC",
                        job,
                        next_execution.format("%Y-%m-%d %H:%M:%S")
                    );
                    tokio::time::sleep(Duration::from_secs(wait.num_seconds() as u64)).await;
                }

                Self::execute(job, &scanner, &processor).await;
            },
        }
    }

    async fn execute(job: Job, scanner: &PayoutScanner, processor: &ContributionProcessor) {
        info!("🔄 Starting scheduled {:?} run", job);

        let result = match job {
            Job::Payouts => scanner.run(Utc::now()).await,
            Job::Contributions => processor.run(Utc::now()).await,
        };

        match result {
            Ok(report) => info!(
                "✓ Scheduled {:?} run finished: {} checked, {} processed, {} errors",
                job, report.checked, report.processed, report.errors
            ),
            Err(e) => error!("❌ Scheduled {:?} run failed: {}", job, e),
        }
    }

    /// Next occurrence of `execution_hour`:00 UTC strictly after `now`
    fn calculate_next_daily_execution(now: DateTime<Utc>, execution_hour: u32) -> DateTime<Utc> {
        let time = NaiveTime::from_hms_opt(execution_hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
        let today = Utc.from_utc_datetime(&now.date_naive().and_time(time));

        // If execution time has passed today, schedule for tomorrow
        if today <= now {
            today + chrono::Duration::days(1)
        } else {
            today
        }
    }
}
