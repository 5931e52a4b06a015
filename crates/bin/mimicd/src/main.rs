//! # mimicd — presence simulation daemon
//!
//! Composition root that wires the adapters into the replay scheduler.
//!
//! ## Responsibilities
//! - Parse configuration (config file, env vars)
//! - Initialize logging
//! - Initialize the `SQLite` connection pool and run migrations
//! - Construct the device adapter and the key-value store
//! - Start the scheduler, resume persisted tracking, apply forced flags
//! - Handle graceful shutdown (SIGINT)
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer — no domain logic belongs here.

mod config;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use mimic_adapter_storage_sqlite_sqlx::{Config as StorageConfig, SqliteKeyValueStore};
use mimic_adapter_virtual::VirtualDevices;
use mimic_app::ports::SystemClock;
use mimic_app::scheduler::{Scheduler, SchedulerHandle};
use mimic_domain::device::DeviceDescriptor;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::Config::load()?;

    let filter = EnvFilter::try_new(&config.logging.filter).unwrap_or_else(|err| {
        eprintln!("invalid log filter {:?}: {err}", config.logging.filter);
        EnvFilter::new("info")
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Database
    let db = StorageConfig {
        database_url: config.database_url().to_string(),
    }
    .build()
    .await?;
    let store = SqliteKeyValueStore::new(db.pool().clone());

    // Devices
    let devices = Arc::new(VirtualDevices::default());
    let mut tracked: Vec<DeviceDescriptor> = config
        .track
        .iter()
        .map(config::TrackConfig::descriptor)
        .collect::<Result<_, _>>()?;
    if tracked.is_empty() {
        tracked = devices.descriptors();
    }

    // Scheduler
    let (handle, task) =
        Scheduler::start(devices, store, SystemClock, config.scheduler_config()).await;

    for descriptor in tracked {
        let key = descriptor.key.clone();
        if let Err(err) = handle.start_tracking(descriptor).await {
            tracing::error!(%err, %key, "failed to start tracking");
        }
    }
    if let Some(enabled) = config.replay.test_mode {
        handle.set_test_mode(enabled).await?;
    }
    if let Some(enabled) = config.replay.enabled {
        handle.set_replay_enabled(enabled).await?;
    }
    log_status(&handle).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");

    handle.shutdown().await?;
    task.await?;
    db.close().await;

    Ok(())
}

async fn log_status(handle: &SchedulerHandle) -> Result<(), mimic_domain::error::MimicError> {
    let status = handle.status().await?;
    tracing::info!(
        replay_enabled = status.replay_enabled,
        test_mode = status.mode.is_test(),
        devices = status.devices.len(),
        scheduled = status.scheduled.len(),
        "mimicd running"
    );
    for device in &status.devices {
        let tracking = device
            .tracking
            .map_or_else(|| "inactive".to_string(), |kind| kind.to_string());
        tracing::info!(
            key = %device.key,
            name = %device.display_name,
            %tracking,
            events = device.events,
            "device"
        );
    }
    for replay in &status.scheduled {
        tracing::info!(
            key = %replay.key,
            value = replay.event.value,
            due = %replay.due,
            "replay scheduled"
        );
    }
    Ok(())
}
