//! Periodic sampler appending controller readings to a CSV log.
//!
//! ```text
//! Idle --run()--> Running --shutdown / tick limit--> Stopped
//! ```
//!
//! Each tick reads heating power, T-J, T-R and T-S one after another, then
//! appends one row. A failed read is logged and leaves its cell empty; the
//! loop carries on with the next tick. The shutdown signal is only checked
//! between ticks, so a row is never cut short.

use crate::config::LoggerConfig;
use crate::data::record::{SampleRecord, HEADER};
use crate::data::storage::{default_log_path, CsvLog};
use crate::error::{AppResult, BtcError};
use crate::hardware::buchi::BuchiController;
use chrono::{DateTime, Local, TimeDelta};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

/// Lifecycle of a [`Sampler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    /// Created, not started
    Idle,
    /// Inside the tick loop
    Running,
    /// Loop ended and log file closed
    Stopped,
}

/// Summary of a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplerReport {
    /// Rows appended
    pub ticks: u64,
    /// Rows with at least one failed reading
    pub failed_ticks: u64,
}

/// Logs controller readings at a fixed interval.
pub struct Sampler<'a, S> {
    controller: &'a BuchiController<S>,
    interval: Duration,
    path: PathBuf,
    max_ticks: Option<u64>,
    state: SamplerState,
}

impl<'a, S> Sampler<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Create an idle sampler writing to `path`.
    pub fn new(controller: &'a BuchiController<S>, interval: Duration, path: PathBuf) -> Self {
        Self {
            controller,
            interval,
            path,
            max_ticks: None,
            state: SamplerState::Idle,
        }
    }

    /// Create a sampler from logger settings.
    ///
    /// Without a configured output file a timestamped name in the working
    /// directory is used.
    pub fn from_config(
        controller: &'a BuchiController<S>,
        config: &LoggerConfig,
    ) -> AppResult<Self> {
        let interval = Duration::try_from_secs_f64(config.interval_secs).map_err(|_| {
            BtcError::Configuration(format!(
                "invalid logging interval {} s",
                config.interval_secs
            ))
        })?;
        let path = config
            .output
            .clone()
            .unwrap_or_else(|| default_log_path(Local::now()));

        let mut sampler = Self::new(controller, interval, path);
        sampler.max_ticks = config.max_ticks;
        Ok(sampler)
    }

    /// Stop after `ticks` rows instead of running until shutdown.
    pub fn with_max_ticks(mut self, ticks: u64) -> Self {
        self.max_ticks = Some(ticks);
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SamplerState {
        self.state
    }

    /// Log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run the tick loop until `shutdown` resolves or the tick limit is hit.
    ///
    /// Read failures do not end the run; failing to write the log does.
    pub async fn run<F>(&mut self, shutdown: F) -> AppResult<SamplerReport>
    where
        F: Future<Output = ()>,
    {
        if self.state != SamplerState::Idle {
            return Err(BtcError::InvalidState(format!(
                "sampler is {:?}",
                self.state
            )));
        }
        if self.interval.is_zero() {
            return Err(BtcError::Configuration(
                "logging interval must be positive".to_string(),
            ));
        }
        if self.interval < Duration::from_secs(1) {
            warn!(
                "Interval {:?} may be too short for all readings; consider a larger interval.",
                self.interval
            );
        }

        let mut log = CsvLog::open(&self.path)?;
        self.state = SamplerState::Running;
        info!(
            "Starting to log controller data every {:?} to '{}'.",
            self.interval,
            self.path.display()
        );
        info!("{}", HEADER.join(", "));

        let outcome = self.tick_loop(&mut log, shutdown).await;
        let closed = log.close();
        self.state = SamplerState::Stopped;

        let report = outcome?;
        closed?;
        info!(
            "Logger stopped after {} ticks ({} with read failures).",
            report.ticks, report.failed_ticks
        );
        Ok(report)
    }

    async fn tick_loop<F>(&self, log: &mut CsvLog, shutdown: F) -> AppResult<SamplerReport>
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Wall-clock anchor advanced by the monotonic clock keeps timestamps
        // strictly increasing.
        let started_at = Local::now();
        let started = Instant::now();

        tokio::pin!(shutdown);
        let mut report = SamplerReport::default();

        loop {
            if self.max_ticks.is_some_and(|max| report.ticks >= max) {
                break;
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Stop requested, finishing logger.");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let timestamp = tick_timestamp(started_at, started.elapsed());
            let record = self.sample(timestamp, report.ticks + 1).await;
            log.append(&record)?;
            info!("{}", record.to_row().join(", "));

            report.ticks += 1;
            if !record.is_complete() {
                report.failed_ticks += 1;
            }
        }

        Ok(report)
    }

    async fn sample(&self, timestamp: DateTime<Local>, tick: u64) -> SampleRecord {
        let readings = self.controller.read_sample().await;

        let outcomes = [
            ("heating power", &readings.heating_power),
            ("T-J", &readings.temp_tj),
            ("T-R", &readings.temp_tr),
            ("T-S", &readings.temp_ts),
        ];
        for (field, outcome) in outcomes {
            if let Err(e) = outcome {
                warn!("Failed to read {} at tick {}: {}", field, tick, e);
            }
        }

        SampleRecord::from_readings(timestamp, &readings)
    }
}

fn tick_timestamp(started_at: DateTime<Local>, elapsed: Duration) -> DateTime<Local> {
    started_at + TimeDelta::from_std(elapsed).unwrap_or(TimeDelta::zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::CommandTransport;
    use crate::config::SerialConfig;
    use crate::hardware::mock::{Fault, SimulatedController};
    use tempfile::tempdir;
    use tracing_test::traced_test;

    fn controller(sim: &SimulatedController) -> BuchiController<tokio::io::DuplexStream> {
        let config = SerialConfig {
            timeout_ms: 1000,
            ..SerialConfig::default()
        };
        BuchiController::new(CommandTransport::new(sim.connect(), &config))
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_failed_read_is_reported_and_skipped() {
        let sim = SimulatedController::new();
        // Second tick, second query (T-J).
        sim.inject_fault(5, Fault::NoResponse).await;
        let controller = controller(&sim);

        let dir = tempdir().unwrap();
        let path = dir.path().join("bath.csv");
        let mut sampler =
            Sampler::new(&controller, Duration::from_secs(10), path.clone()).with_max_ticks(3);
        assert_eq!(sampler.state(), SamplerState::Idle);

        let report = sampler.run(std::future::pending()).await.unwrap();
        assert_eq!(sampler.state(), SamplerState::Stopped);
        assert_eq!(
            report,
            SamplerReport {
                ticks: 3,
                failed_ticks: 1
            }
        );
        assert!(logs_contain("Failed to read T-J at tick 2"));

        let content = std::fs::read_to_string(&path).unwrap();
        let rows: Vec<&str> = content.lines().skip(1).collect();
        assert_eq!(rows.len(), 3);
        assert!(rows[0].ends_with(",35.2,24.04,23.87,24.11"));
        assert!(rows[1].ends_with(",35.2,,23.87,24.11"));
        assert!(rows[2].ends_with(",35.2,24.04,23.87,24.11"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_before_first_tick() {
        let sim = SimulatedController::new();
        let controller = controller(&sim);

        let dir = tempdir().unwrap();
        let path = dir.path().join("bath.csv");
        let mut sampler = Sampler::new(&controller, Duration::from_secs(10), path.clone());

        let report = sampler.run(std::future::ready(())).await.unwrap();
        assert_eq!(report.ticks, 0);
        assert_eq!(sampler.state(), SamplerState::Stopped);

        // Header only.
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(sim.received().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_between_ticks() {
        let sim = SimulatedController::new();
        let controller = controller(&sim);

        let dir = tempdir().unwrap();
        let path = dir.path().join("bath.csv");
        let mut sampler = Sampler::new(&controller, Duration::from_secs(10), path.clone());

        let shutdown = tokio::time::sleep(Duration::from_secs(25));
        let report = sampler.run(shutdown).await.unwrap();
        assert_eq!(report.ticks, 3);
        assert_eq!(sim.received().await.len(), 12);
    }

    #[tokio::test]
    async fn test_cannot_run_twice() {
        let sim = SimulatedController::new();
        let controller = controller(&sim);

        let dir = tempdir().unwrap();
        let mut sampler = Sampler::new(
            &controller,
            Duration::from_secs(10),
            dir.path().join("bath.csv"),
        );
        sampler.run(std::future::ready(())).await.unwrap();

        let err = sampler.run(std::future::ready(())).await.unwrap_err();
        assert!(matches!(err, BtcError::InvalidState(_)));
    }

    #[test]
    fn test_from_config_rejects_bad_interval() {
        let controller_config = LoggerConfig {
            interval_secs: -1.0,
            ..LoggerConfig::default()
        };
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let sim = SimulatedController::new();
            let controller = controller(&sim);
            assert!(Sampler::from_config(&controller, &controller_config).is_err());
        });
    }
}
