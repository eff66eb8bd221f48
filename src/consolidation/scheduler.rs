//! Drives the five consolidation stages on cron-like local-time schedules,
//! serialized per store via a run-lock (spec §4.H: "Runs are serialized
//! per-store (one consolidation at a time)"), grounded on the teacher's
//! `tokio::time::interval`-based worker loop shape (`embedding::queue`).

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Timelike, Utc};
use tokio::sync::Mutex;

use crate::storage::MaintenanceStore;

use super::associations::AssociationsConfig;
use super::compression::CompressionConfig;
use super::decay::RetentionConfig;
use super::forgetting::ForgettingConfig;
use super::types::ConsolidationReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalTime {
    pub hour: u32,
    pub minute: u32,
}

#[derive(Debug, Clone)]
pub struct ConsolidationConfig {
    pub decay_enabled: bool,
    pub associations_enabled: bool,
    pub clustering_enabled: bool,
    pub compression_enabled: bool,
    pub forgetting_enabled: bool,

    /// Daily time-of-day the decay + associations stages run at.
    pub schedule_daily: LocalTime,
    /// Day-of-week (0 = Sunday) + time-of-day the clustering + compression
    /// stages run at, weekly.
    pub schedule_weekly: (u32, LocalTime),
    /// Day-of-month + time-of-day the forgetting stage runs at, monthly.
    pub schedule_monthly: (u32, LocalTime),

    pub relevance_threshold: f64,
    pub access_threshold_days: f64,
    pub retention: RetentionConfig,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            decay_enabled: true,
            associations_enabled: true,
            clustering_enabled: true,
            compression_enabled: true,
            forgetting_enabled: true,
            schedule_daily: LocalTime { hour: 2, minute: 0 },
            schedule_weekly: (0, LocalTime { hour: 3, minute: 0 }),
            schedule_monthly: (1, LocalTime { hour: 4, minute: 0 }),
            relevance_threshold: 0.1,
            access_threshold_days: 90.0,
            retention: RetentionConfig::default(),
        }
    }
}

impl ConsolidationConfig {
    /// Builds a config from `EngineConfig`'s per-stage flags and
    /// `SCHEDULE_DAILY`/`SCHEDULE_WEEKLY`/`SCHEDULE_MONTHLY` strings,
    /// falling back to this type's defaults on a malformed schedule.
    pub fn from_env(config: &crate::config::EngineConfig) -> Self {
        let daily = crate::config::parse_daily_schedule(&config.schedule_daily, (2, 0));
        let weekly = crate::config::parse_day_time_schedule(&config.schedule_weekly, (0, 3, 0));
        let monthly = crate::config::parse_day_time_schedule(&config.schedule_monthly, (1, 4, 0));
        Self {
            decay_enabled: config.decay_enabled,
            associations_enabled: config.associations_enabled,
            clustering_enabled: config.clustering_enabled,
            compression_enabled: config.compression_enabled,
            forgetting_enabled: config.forgetting_enabled,
            schedule_daily: LocalTime { hour: daily.0, minute: daily.1 },
            schedule_weekly: (weekly.0, LocalTime { hour: weekly.1, minute: weekly.2 }),
            schedule_monthly: (monthly.0, LocalTime { hour: monthly.1, minute: monthly.2 }),
            relevance_threshold: config.relevance_threshold,
            access_threshold_days: config.access_threshold_days,
            retention: RetentionConfig::from_env(config),
        }
    }
}

/// Serializes consolidation runs for one store and (optionally) drives them
/// on the configured schedule in the background.
pub struct Scheduler {
    store: Arc<dyn MaintenanceStore>,
    config: ConsolidationConfig,
    run_lock: Mutex<()>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn MaintenanceStore>, config: ConsolidationConfig) -> Self {
        Self { store, config, run_lock: Mutex::new(()) }
    }

    /// Run every enabled stage once, in order, right now. Stage-level
    /// errors are captured in the returned report rather than aborting
    /// later stages (spec §4.H: "Errors in one stage do not abort later
    /// stages").
    pub async fn run_consolidation(&self, now: f64) -> ConsolidationReport {
        let _guard = self.run_lock.lock().await;
        let mut report = ConsolidationReport::default();

        if self.config.decay_enabled {
            report.decay = Some(super::decay::run(self.store.as_ref(), now, &self.config.retention).await);
        }
        if self.config.associations_enabled {
            let assoc_config = AssociationsConfig::default();
            report.associations = Some(super::associations::run(self.store.as_ref(), now, &assoc_config).await);
        }
        if self.config.clustering_enabled {
            report.clustering = Some(super::clustering::run(self.store.as_ref(), now).await);
        }
        if self.config.compression_enabled {
            let compression_config = CompressionConfig::default();
            report.compression =
                Some(super::compression::run(self.store.as_ref(), now, &compression_config).await);
        }
        if self.config.forgetting_enabled {
            let forgetting_config = ForgettingConfig {
                relevance_threshold: self.config.relevance_threshold,
                access_threshold_days: self.config.access_threshold_days,
                ..ForgettingConfig::default()
            };
            report.forgetting = Some(super::forgetting::run(self.store.as_ref(), now, &forgetting_config).await);
        }

        report
    }

    /// Poll once a minute and trigger stages whose schedule matches the
    /// current local time. Runs until the returned `JoinHandle` is
    /// aborted; each tick's `now` is the wall clock (not injectable) since
    /// this is the one place the spec's "current moment" really is live.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let now = Utc::now();
                let now_secs = now.timestamp() as f64;

                if matches_time(now.hour(), now.minute(), self.config.schedule_daily) {
                    let _ = self.run_stage_if_due(StageKind::Daily, now_secs).await;
                }
                if now.weekday().num_days_from_sunday() == self.config.schedule_weekly.0
                    && matches_time(now.hour(), now.minute(), self.config.schedule_weekly.1)
                {
                    let _ = self.run_stage_if_due(StageKind::Weekly, now_secs).await;
                }
                if now.day() == self.config.schedule_monthly.0
                    && matches_time(now.hour(), now.minute(), self.config.schedule_monthly.1)
                {
                    let _ = self.run_stage_if_due(StageKind::Monthly, now_secs).await;
                }
            }
        })
    }

    async fn run_stage_if_due(&self, kind: StageKind, now: f64) -> ConsolidationReport {
        let _guard = self.run_lock.lock().await;
        let mut report = ConsolidationReport::default();
        match kind {
            StageKind::Daily => {
                if self.config.decay_enabled {
                    report.decay = Some(super::decay::run(self.store.as_ref(), now, &self.config.retention).await);
                }
                if self.config.associations_enabled {
                    report.associations = Some(
                        super::associations::run(self.store.as_ref(), now, &AssociationsConfig::default()).await,
                    );
                }
            }
            StageKind::Weekly => {
                if self.config.clustering_enabled {
                    report.clustering = Some(super::clustering::run(self.store.as_ref(), now).await);
                }
                if self.config.compression_enabled {
                    report.compression = Some(
                        super::compression::run(self.store.as_ref(), now, &CompressionConfig::default()).await,
                    );
                }
            }
            StageKind::Monthly => {
                if self.config.forgetting_enabled {
                    let forgetting_config = ForgettingConfig {
                        relevance_threshold: self.config.relevance_threshold,
                        access_threshold_days: self.config.access_threshold_days,
                        ..ForgettingConfig::default()
                    };
                    report.forgetting =
                        Some(super::forgetting::run(self.store.as_ref(), now, &forgetting_config).await);
                }
            }
        }
        report
    }
}

#[derive(Debug, Clone, Copy)]
enum StageKind {
    Daily,
    Weekly,
    Monthly,
}

fn matches_time(hour: u32, minute: u32, scheduled: LocalTime) -> bool {
    hour == scheduled.hour && minute == scheduled.minute
}
