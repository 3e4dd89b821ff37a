//! Command handlers.
//!
//! Each handler returns `Ok(false)` when the engine ran but a volume ended
//! up in `error`, so scripts can tell a failed mount apart from bad input.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use snafu::{ResultExt, Whatever};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use volume_engine_core::reconcile::{StatusSink, VolumeSource};
use volume_engine_core::{
    BackendFactory, EngineConfig, HealthReport, Reconciler, VolumeRecord, VolumeStatus,
};

type CliResult<T> = Result<T, Whatever>;

fn load_config(path: Option<&Path>) -> CliResult<EngineConfig> {
    EngineConfig::load(path).whatever_context("failed to load engine config")
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> CliResult<T> {
    let content = std::fs::read_to_string(path)
        .with_whatever_context(|_| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_whatever_context(|_| format!("failed to parse {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    let json = serde_json::to_string_pretty(value).whatever_context("failed to encode output")?;
    println!("{}", json);
    Ok(())
}

#[derive(Clone, Copy)]
enum Operation {
    Mount,
    Unmount,
    Health,
}

/// One-shot operation against a single volume record.
async fn run_single(config: Option<&Path>, volume: &Path, op: Operation) -> CliResult<bool> {
    let config = load_config(config)?;
    let record: VolumeRecord = read_json(volume)?;
    let path = record.mount_path(&config);

    let factory = BackendFactory::system(config);
    let backend = factory.create(&record.config, &path);
    let outcome = match op {
        Operation::Mount => backend.mount().await,
        Operation::Unmount => backend.unmount().await,
        Operation::Health => backend.check_health().await,
    };

    print_json(&outcome)?;
    Ok(outcome.status != VolumeStatus::Error)
}

pub async fn mount(config: Option<&Path>, volume: &Path) -> CliResult<bool> {
    run_single(config, volume, Operation::Mount).await
}

pub async fn unmount(config: Option<&Path>, volume: &Path) -> CliResult<bool> {
    run_single(config, volume, Operation::Unmount).await
}

pub async fn health(config: Option<&Path>, volume: &Path) -> CliResult<bool> {
    run_single(config, volume, Operation::Health).await
}

pub async fn reconcile(config: Option<&Path>, volumes: &Path) -> CliResult<bool> {
    let config = load_config(config)?;
    let records: Vec<VolumeRecord> = read_json(volumes)?;

    let reconciler = Reconciler::new(BackendFactory::system(config));
    let reports = reconciler.reconcile_all(&records).await;

    print_json(&reports)?;
    Ok(reports.iter().all(|r| r.status != VolumeStatus::Error))
}

/// Volume file re-read on every pass, with statuses carried over in memory
/// so drift from `mounted` is detected between passes.
struct WatchedFile {
    path: PathBuf,
    statuses: Mutex<HashMap<String, VolumeStatus>>,
}

#[async_trait]
impl VolumeSource for WatchedFile {
    async fn volumes(&self) -> volume_engine_core::Result<Vec<VolumeRecord>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| volume_engine_core::Error::ConfigRead {
                path: self.path.clone(),
                source: e,
            })?;
        let mut records: Vec<VolumeRecord> = serde_json::from_str(&content).map_err(|e| {
            volume_engine_core::Error::ConfigParse {
                path: self.path.clone(),
                source: e,
            }
        })?;

        let statuses = self.statuses.lock().unwrap_or_else(|e| e.into_inner());
        for record in &mut records {
            if let Some(status) = statuses.get(&record.name) {
                record.last_status = Some(*status);
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl StatusSink for WatchedFile {
    async fn record(&self, report: &HealthReport) {
        if report.skipped {
            return;
        }
        info!(
            volume = %report.name,
            status = %report.status,
            remounted = report.remounted,
            "volume reconciled"
        );
        self.statuses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(report.name.clone(), report.status);
    }
}

pub async fn watch(config: Option<&Path>, volumes: &Path, interval: u64) -> CliResult<bool> {
    let config = load_config(config)?;
    let watched = std::sync::Arc::new(WatchedFile {
        path: volumes.to_path_buf(),
        statuses: Mutex::new(HashMap::new()),
    });

    let reconciler = Reconciler::new(BackendFactory::system(config)).with_sink(watched.clone());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, stopping");
                on_signal.cancel();
            }
            Err(e) => warn!(error = %e, "failed to listen for interrupt"),
        }
    });

    reconciler
        .run_periodic(
            watched.as_ref(),
            Duration::from_secs(interval.max(1)),
            cancel,
        )
        .await;
    Ok(true)
}
