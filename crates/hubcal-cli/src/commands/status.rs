//! Task, lock and abandonment reports, and clearing a hub's lock.

use chrono::{DateTime, Utc};
use hubcal_server::HubStatus;
use hubcal_store::METADATA_TABLE;
use tracing::warn;

use crate::commands::Stores;
use crate::config::AppConfig;
use crate::error::{CliError, CliResult};

/// Prints the scheduling state of every configured hub.
pub async fn status(config: &AppConfig) -> CliResult<()> {
    let directory = config.directory();
    if directory.is_empty() {
        println!("No hubs configured.");
        return Ok(());
    }

    let stores = Stores::open(config);
    let scheduler = stores.scheduler();
    let worker = config.to_worker_config();
    let now = Utc::now();

    for hub in directory.iter() {
        let status = scheduler
            .status(&hub.id, now, worker.interval_for(hub.kind))
            .await?;
        let aggregated_at = stores
            .tables
            .get(METADATA_TABLE, &hub.id, &hub.id)
            .await?
            .and_then(|summary| summary.get_time("aggregated_at"));
        println!("{}", status_line(&status, aggregated_at));
    }
    Ok(())
}

/// Prints the hubs whose last run looks abandoned.
pub async fn abandoned(config: &AppConfig) -> CliResult<()> {
    let stores = Stores::open(config);
    let hubs = stores
        .scheduler()
        .abandoned_hubs(&config.directory(), Utc::now(), &config.to_worker_config())
        .await?;

    if hubs.is_empty() {
        println!("No abandoned hubs.");
    }
    for hub in hubs {
        println!("{hub}");
    }
    Ok(())
}

/// Clears a hub's lock and resets its task to idle.
///
/// Workers never clear a lock they did not take, so a hub left locked by a
/// crashed run stays skipped until this is run.
pub async fn unlock(config: &AppConfig, hub: &str) -> CliResult<()> {
    if config.directory().get(hub).is_none() {
        return Err(CliError::UnknownHub(hub.to_string()));
    }
    let scheduler = Stores::open(config).scheduler();
    match scheduler.lock_record(hub).await? {
        Some(lock) => warn!(hub, owner = %lock.owner, "clearing lock"),
        None => println!("{hub} was not locked."),
    }
    scheduler.init(hub).await?;
    println!("{hub} unlocked; task reset to idle.");
    Ok(())
}

fn stamp(time: Option<DateTime<Utc>>) -> String {
    match time {
        Some(t) if t != DateTime::<Utc>::UNIX_EPOCH => t.format("%Y-%m-%d %H:%M").to_string(),
        _ => "never".to_string(),
    }
}

/// Renders one hub's state as a single line.
pub fn status_line(status: &HubStatus, aggregated_at: Option<DateTime<Utc>>) -> String {
    let state = match &status.task {
        None => "new".to_string(),
        Some(task) if task.running => format!("running since {}", stamp(Some(task.start))),
        Some(task) => format!("idle, last start {}", stamp(Some(task.start))),
    };
    let mut line = format!(
        "{:<16} {state}; aggregated {}",
        status.hub,
        stamp(aggregated_at)
    );
    if let Some(lock) = &status.lock {
        line.push_str(&format!("; locked by {} at {}", lock.owner, stamp(lock.locked_at)));
    }
    if status.abandoned {
        line.push_str("; ABANDONED");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use hubcal_server::{LockRecord, TaskRecord};

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, h, 30, 0).unwrap()
    }

    #[test]
    fn new_hub() {
        let status = HubStatus {
            hub: "elmcity".into(),
            task: None,
            lock: None,
            abandoned: false,
        };
        let line = status_line(&status, None);
        assert!(line.starts_with("elmcity"));
        assert!(line.contains("new; aggregated never"));
    }

    #[test]
    fn idle_hub_that_never_ran() {
        let status = HubStatus {
            hub: "elmcity".into(),
            task: Some(TaskRecord::idle("elmcity")),
            lock: None,
            abandoned: false,
        };
        assert!(status_line(&status, None).contains("idle, last start never"));
    }

    #[test]
    fn abandoned_locked_hub() {
        let status = HubStatus {
            hub: "elmcity".into(),
            task: Some(TaskRecord {
                hub: "elmcity".into(),
                start: at(1),
                stop: at(0),
                running: true,
            }),
            lock: Some(LockRecord {
                hub: "elmcity".into(),
                locked_at: Some(at(1)),
                owner: "worker-a".into(),
            }),
            abandoned: true,
        };
        let line = status_line(&status, Some(at(0)));
        assert!(line.contains("running since 2026-10-18 01:30"));
        assert!(line.contains("aggregated 2026-10-18 00:30"));
        assert!(line.contains("locked by worker-a at 2026-10-18 01:30"));
        assert!(line.ends_with("; ABANDONED"));
    }

    fn config_at(root: &std::path::Path) -> AppConfig {
        AppConfig::parse(&format!(
            "[storage]\nroot = \"{}\"\n\n[[hubs]]\nid = \"elmcity\"\ntimezone = \"UTC\"\nwhere = \"keene\"\n",
            root.display()
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn reports_read_empty_storage() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_at(dir.path());
        status(&config).await.unwrap();
        abandoned(&config).await.unwrap();
    }

    #[tokio::test]
    async fn unlock_clears_a_stranded_lock() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_at(dir.path());
        let scheduler = Stores::open(&config).scheduler();
        scheduler.ensure_task_record("elmcity").await.unwrap();
        scheduler.lock("elmcity", at(1)).await.unwrap();

        unlock(&config, "elmcity").await.unwrap();

        assert!(!scheduler.is_locked("elmcity").await.unwrap());
        let task = scheduler.task("elmcity").await.unwrap().unwrap();
        assert!(!task.running);
    }

    #[tokio::test]
    async fn unlock_rejects_unknown_hub() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_at(dir.path());
        let err = unlock(&config, "nowhere").await.unwrap_err();
        assert!(matches!(err, CliError::UnknownHub(hub) if hub == "nowhere"));
    }
}
