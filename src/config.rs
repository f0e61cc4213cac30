use std::time::Duration;

use ::config::{Environment, File};
use serde::Deserialize;

use crate::eligibility::PayoutPolicy;
use crate::rail::RailConfig;
use crate::schedule::SameDayPolicy;
use crate::settlement::scheduler::{BatchScheduleConfig, JobCadence};
use crate::settlement::BatchSettings;

/// Service configuration.
///
/// Layered: built-in defaults, then optional `config/settlement.{toml,yaml,json}`,
/// then environment variables with `__` separating nested keys, e.g.
/// `RAIL__BASE_URL`, `BATCH__CONCURRENCY`, `SAME_DAY_POLICY=same_day`.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Postgres connection string; the in-memory store is used when absent
    pub database_url: Option<String>,
    pub bind_address: String,
    pub rail: RailConfig,
    pub batch: BatchConfig,
    pub same_day_policy: SameDayPolicy,
    pub payout_policy: PayoutPolicy,
    /// Shared secret for `x-webhook-signature`; unsigned webhooks are accepted when unset
    pub webhook_secret: Option<String>,
    pub complete_circle_after_lap: bool,
    /// Endpoint receiving circle events; events are only logged when unset
    pub notify_url: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            bind_address: "0.0.0.0:8080".to_string(),
            rail: RailConfig::default(),
            batch: BatchConfig::default(),
            same_day_policy: SameDayPolicy::default(),
            payout_policy: PayoutPolicy::default(),
            webhook_secret: None,
            complete_circle_after_lap: true,
            notify_url: None,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BatchConfig {
    /// 0 disables the scheduled payout scan
    pub payout_interval_secs: u64,
    /// Daily contribution run at this UTC hour; overrides the interval
    pub contribution_hour: Option<u32>,
    /// 0 disables the scheduled contribution run
    pub contribution_interval_secs: u64,
    pub concurrency: usize,
    pub lease_secs: i64,
    pub rail_deadline_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            payout_interval_secs: 300,
            contribution_hour: None,
            contribution_interval_secs: 900,
            concurrency: 8,
            lease_secs: 300,
            rail_deadline_ms: 15_000,
        }
    }
}

impl BatchConfig {
    pub fn settings(&self) -> BatchSettings {
        BatchSettings {
            concurrency: self.concurrency.max(1),
            lease_ttl: chrono::Duration::seconds(self.lease_secs.max(1)),
            rail_deadline: Duration::from_millis(self.rail_deadline_ms.max(1)),
        }
    }

    pub fn schedule(&self) -> BatchScheduleConfig {
        let every = |secs: u64| (secs > 0).then(|| JobCadence::Every(Duration::from_secs(secs)));

        BatchScheduleConfig {
            payouts: every(self.payout_interval_secs),
            contributions: match self.contribution_hour {
                Some(hour) => Some(JobCadence::Daily {
                    execution_hour: hour.min(23),
                }),
                None => every(self.contribution_interval_secs),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ::config::ConfigError> {
        ::config::Config::builder()
            .add_source(File::with_name("config/settlement").required(false))
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
