//! One-shot aggregation of a single hub.

use std::fmt::Write;

use chrono::Utc;
use hubcal_server::{FlavorStatus, RunOutcome, SignalHandler};
use tracing::info;

use crate::commands::{Stores, build_aggregator};
use crate::config::AppConfig;
use crate::error::{CliError, CliResult};

/// Runs one hub now.
///
/// The hub's lock is honoured. Unless `if_due` is set the run interval is
/// ignored. Ctrl+C stops the run at the next feed or page and releases the
/// lock.
pub async fn run(config: &AppConfig, hub: &str, if_due: bool) -> CliResult<()> {
    let directory = config.directory();
    let definition = directory
        .get(hub)
        .ok_or_else(|| CliError::UnknownHub(hub.to_string()))?;

    let stores = Stores::open(config);
    let aggregator = build_aggregator(config, &stores)?;

    let signals = SignalHandler::new();
    signals.spawn_listener();
    let stop = signals.shutdown_handle().stop_signal();

    info!(hub, force = !if_due, "aggregating");
    let outcome = aggregator.run(definition, Utc::now(), !if_due, &stop).await?;
    print!("{}", describe(hub, &outcome));
    Ok(())
}

/// Renders a run outcome for the terminal.
pub fn describe(hub: &str, outcome: &RunOutcome) -> String {
    let mut out = String::new();
    match outcome {
        RunOutcome::NotDue => {
            let _ = writeln!(out, "{hub}: not due yet");
        }
        RunOutcome::Locked => {
            let _ = writeln!(out, "{hub}: locked by another run");
        }
        RunOutcome::Completed(summary) => {
            let _ = writeln!(
                out,
                "{hub}: {} events at {}",
                summary.events,
                summary.aggregated_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            for report in &summary.flavors {
                let status = match &report.status {
                    FlavorStatus::Collected { count } => format!("{count} events"),
                    FlavorStatus::Skipped => "skipped".to_string(),
                    FlavorStatus::Failed { error, retained } if *retained => {
                        format!("failed, kept previous events ({error})")
                    }
                    FlavorStatus::Failed { error, .. } => format!("failed ({error})"),
                };
                let _ = writeln!(out, "  {:<11} {status}", report.flavor.as_str());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use hubcal_core::SourceFlavor;
    use hubcal_server::{FlavorReport, RunSummary};

    #[test]
    fn describes_completed_run() {
        let outcome = RunOutcome::Completed(RunSummary {
            hub: "elmcity".into(),
            flavors: vec![
                FlavorReport {
                    flavor: SourceFlavor::Ical,
                    status: FlavorStatus::Collected { count: 12 },
                },
                FlavorReport {
                    flavor: SourceFlavor::Eventful,
                    status: FlavorStatus::Failed {
                        error: "HTTP 503".into(),
                        retained: true,
                    },
                },
                FlavorReport {
                    flavor: SourceFlavor::Facebook,
                    status: FlavorStatus::Skipped,
                },
            ],
            events: 15,
            aggregated_at: Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap(),
        });

        let text = describe("elmcity", &outcome);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "elmcity: 15 events at 2026-10-18 12:00:00 UTC");
        assert!(lines[1].contains("12 events"));
        assert!(lines[2].contains("kept previous events (HTTP 503)"));
        assert!(lines[3].ends_with("skipped"));
    }

    #[test]
    fn describes_skipped_runs() {
        assert_eq!(describe("a", &RunOutcome::NotDue), "a: not due yet\n");
        assert_eq!(describe("a", &RunOutcome::Locked), "a: locked by another run\n");
    }

    #[tokio::test]
    async fn unknown_hub_is_rejected_before_any_io() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::parse(&format!(
            "[storage]\nroot = \"{}\"\n",
            dir.path().display()
        ))
        .unwrap();
        let err = run(&config, "missing", false).await.unwrap_err();
        assert!(matches!(err, CliError::UnknownHub(hub) if hub == "missing"));
    }
}
