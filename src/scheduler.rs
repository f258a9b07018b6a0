//! Scheduler - re-runs the orchestrator on a fixed interval
//!
//! Runs in the foreground until Ctrl+C. A run that fails outright (discovery
//! or configuration error) is logged and sent to the reporter's error path;
//! the loop keeps going.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::orchestrator::{BackupOrchestrator, RunOutcome};

/// Counters kept across scheduled runs
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    pub total_runs: u64,
    pub completed_runs: u64,
    pub failed_runs: u64,
    pub last_run: Option<DateTime<Utc>>,
}

pub struct Scheduler {
    orchestrator: Arc<BackupOrchestrator>,
    interval: Duration,
    run_on_start: bool,
    shutdown_sender: broadcast::Sender<()>,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<BackupOrchestrator>, interval: Duration, run_on_start: bool) -> Self {
        let (shutdown_sender, _) = broadcast::channel(1);
        Self {
            orchestrator,
            interval,
            run_on_start,
            shutdown_sender,
        }
    }

    /// Sender that stops the loop when anything is sent on it
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_sender.clone()
    }

    /// Run until Ctrl+C
    pub async fn run(&self) -> Result<SchedulerStats> {
        info!(
            "Starting scheduler with interval {:?}{}",
            self.interval,
            if self.run_on_start { ", running immediately" } else { "" }
        );

        let shutdown_sender = self.shutdown_sender.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received, stopping scheduler..."),
                Err(e) => error!("Failed to listen for ctrl-c: {}", e),
            }
            let _ = shutdown_sender.send(());
        });

        let receiver = self.shutdown_sender.subscribe();
        self.run_until(receiver).await
    }

    /// Main loop, returns once a shutdown message arrives
    pub async fn run_until(&self, mut shutdown: broadcast::Receiver<()>) -> Result<SchedulerStats> {
        let mut stats = SchedulerStats::default();
        let mut timer = interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // The first tick completes immediately
        if !self.run_on_start {
            timer.tick().await;
        }

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutdown signal received in scheduler loop");
                    break;
                }
                _ = timer.tick() => {
                    self.run_once(&mut stats).await;
                }
            }
        }

        info!(
            "Scheduler exiting after {} runs ({} failed)",
            stats.total_runs, stats.failed_runs
        );
        Ok(stats)
    }

    async fn run_once(&self, stats: &mut SchedulerStats) {
        debug!("Starting scheduled backup run");
        let started = Instant::now();
        stats.total_runs += 1;
        stats.last_run = Some(Utc::now());

        match self.orchestrator.run(false).await {
            Ok(RunOutcome::Completed(summary)) => {
                stats.completed_runs += 1;
                info!(
                    "Scheduled run completed in {:.2}s: {} successful, {} failed",
                    started.elapsed().as_secs_f64(),
                    summary.successful,
                    summary.failed
                );
            }
            Ok(outcome) => {
                stats.completed_runs += 1;
                warn!("Scheduled run ended early: {}", outcome.status());
            }
            Err(e) => {
                stats.failed_runs += 1;
                error!("Scheduled backup failed: {:#}", e);
                self.orchestrator
                    .reporter()
                    .send_error_notification(&format!("Scheduled backup failed: {:#}", e))
                    .await;
            }
        }
    }
}

/// Build the scheduler from the configured interval
pub fn scheduler_from_config(
    orchestrator: Arc<BackupOrchestrator>,
    config: &crate::Config,
) -> Result<Scheduler> {
    let interval = config
        .schedule_interval()
        .context("Failed to parse schedule.interval")?;
    Ok(Scheduler::new(orchestrator, interval, config.schedule.run_on_start))
}
