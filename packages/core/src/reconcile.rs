//! Health reconciliation: re-derive each volume's state from the OS and
//! repair drift with an unmount/mount cycle.
//!
//! The controller holds no status of its own. Observed state comes from the
//! backends on every pass; the last recorded state and the auto-remount flag
//! come from the caller's [`VolumeRecord`], and results go back out through a
//! [`StatusSink`].

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{BackendFactory, Reconciled, RemountPolicy};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::volume::{VolumeConfig, VolumeStatus};

/// A volume as persisted by the volume-management layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeRecord {
    pub name: String,
    pub config: VolumeConfig,
    #[serde(default)]
    pub auto_remount: bool,
    /// Status recorded by the previous pass, if any.
    #[serde(default)]
    pub last_status: Option<VolumeStatus>,
    /// Explicit mount path. Derived from `name` when absent.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl VolumeRecord {
    pub fn new(name: impl Into<String>, config: VolumeConfig) -> Self {
        Self {
            name: name.into(),
            config,
            auto_remount: false,
            last_status: None,
            path: None,
        }
    }

    pub fn auto_remount(mut self, enabled: bool) -> Self {
        self.auto_remount = enabled;
        self
    }

    /// Remount rule derived from this record's flag and last status.
    pub fn remount_policy(&self) -> RemountPolicy {
        RemountPolicy {
            auto_remount: self.auto_remount,
            last_status: self.last_status,
        }
    }

    pub fn mount_path(&self, config: &EngineConfig) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| config.mount_path_for(&self.name))
    }
}

/// Outcome of reconciling one volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub name: String,
    pub status: VolumeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// An unmount/mount cycle was attempted.
    pub remounted: bool,
    /// Another pass for this volume was already running.
    pub skipped: bool,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    fn from_reconciled(name: &str, reconciled: Reconciled) -> Self {
        Self {
            name: name.to_string(),
            status: reconciled.outcome.status,
            error: reconciled.outcome.error,
            remounted: reconciled.remounted,
            skipped: false,
            checked_at: Utc::now(),
        }
    }

    fn skipped(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: VolumeStatus::Unknown,
            error: None,
            remounted: false,
            skipped: true,
            checked_at: Utc::now(),
        }
    }
}

/// Receives every report, typically to persist it on the volume record.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn record(&self, report: &HealthReport);
}

/// Supplies the volumes to reconcile on each periodic pass.
#[async_trait]
pub trait VolumeSource: Send + Sync {
    async fn volumes(&self) -> Result<Vec<VolumeRecord>>;
}

/// Records kept in memory, updated from the reports they receive.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<VolumeRecord>>,
}

impl MemoryStore {
    pub fn new(records: Vec<VolumeRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    pub fn records(&self) -> Vec<VolumeRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl VolumeSource for MemoryStore {
    async fn volumes(&self) -> Result<Vec<VolumeRecord>> {
        Ok(self.records())
    }
}

#[async_trait]
impl StatusSink for MemoryStore {
    async fn record(&self, report: &HealthReport) {
        if report.skipped {
            return;
        }
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(record) = records.iter_mut().find(|r| r.name == report.name) {
            record.last_status = Some(report.status);
        }
    }
}

/// Removes a volume from the in-flight set when its pass ends.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    name: String,
}

impl<'a> InFlight<'a> {
    fn claim(set: &'a Mutex<HashSet<String>>, name: &str) -> Option<Self> {
        let mut guard = set.lock().unwrap_or_else(PoisonError::into_inner);
        if !guard.insert(name.to_string()) {
            return None;
        }
        Some(Self {
            set,
            name: name.to_string(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.name);
    }
}

/// Drives reconciliation passes over a set of volumes.
pub struct Reconciler {
    factory: BackendFactory,
    in_flight: Mutex<HashSet<String>>,
    sink: Option<Arc<dyn StatusSink>>,
}

impl Reconciler {
    pub fn new(factory: BackendFactory) -> Self {
        Self {
            factory,
            in_flight: Mutex::new(HashSet::new()),
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Checks one volume and repairs it when its [`RemountPolicy`] calls for
    /// it.
    ///
    /// Returns a `skipped` report without touching the volume when another
    /// pass for the same name is still running.
    pub async fn reconcile_volume(&self, record: &VolumeRecord) -> HealthReport {
        let Some(_claim) = InFlight::claim(&self.in_flight, &record.name) else {
            debug!(volume = %record.name, "reconciliation already in progress, skipping");
            let report = HealthReport::skipped(&record.name);
            self.publish(&report).await;
            return report;
        };

        let path = record.mount_path(self.factory.context().config());
        let backend = self.factory.create(&record.config, &path);

        let reconciled = backend.reconcile(record.remount_policy()).await;
        if reconciled.remounted {
            info!(volume = %record.name, status = %reconciled.outcome.status, "volume remounted");
        }
        let report = HealthReport::from_reconciled(&record.name, reconciled);

        match report.status {
            VolumeStatus::Error => warn!(
                volume = %report.name,
                error = report.error.as_deref().unwrap_or_default(),
                remounted = report.remounted,
                "volume unhealthy"
            ),
            status => debug!(volume = %report.name, %status, remounted = report.remounted, "volume checked"),
        }

        self.publish(&report).await;
        report
    }

    /// Reconciles every record concurrently.
    pub async fn reconcile_all(&self, records: &[VolumeRecord]) -> Vec<HealthReport> {
        futures::future::join_all(records.iter().map(|r| self.reconcile_volume(r))).await
    }

    /// Reconciles the source's auto-remount volumes every `interval` until
    /// `cancel` fires. The first pass runs immediately.
    pub async fn run_periodic(
        &self,
        source: &dyn VolumeSource,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = interval.as_secs_f64(), "reconciliation loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let records = match source.volumes().await {
                Ok(records) => records,
                Err(e) => {
                    warn!(error = %e, "failed to load volumes, retrying next tick");
                    continue;
                }
            };
            let targets: Vec<_> = records.into_iter().filter(|r| r.auto_remount).collect();

            tokio::select! {
                _ = cancel.cancelled() => break,
                reports = self.reconcile_all(&targets) => {
                    let unhealthy = reports
                        .iter()
                        .filter(|r| r.status == VolumeStatus::Error)
                        .count();
                    debug!(checked = reports.len(), unhealthy, "reconciliation pass finished");
                }
            }
        }

        info!("reconciliation loop stopped");
    }

    async fn publish(&self, report: &HealthReport) {
        if let Some(sink) = &self.sink {
            sink.record(report).await;
        }
    }
}
