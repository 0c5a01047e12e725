//! Periodic logging against the simulated controller with a paused clock.
//!
//! Run with: cargo test --test sampler_test

use chrono::DateTime;
use rust_btc::adapters::CommandTransport;
use rust_btc::config::{LoggerConfig, SerialConfig};
use rust_btc::data::{Sampler, SamplerState};
use rust_btc::hardware::mock::{Fault, SimulatedController};
use rust_btc::hardware::BuchiController;
use std::time::Duration;
use tempfile::tempdir;
use tokio::io::DuplexStream;

fn simulated() -> (SimulatedController, BuchiController<DuplexStream>) {
    let sim = SimulatedController::new();
    let config = SerialConfig {
        command_delay_ms: 0,
        timeout_ms: 1000,
        ..SerialConfig::default()
    };
    let controller = BuchiController::new(CommandTransport::new(sim.connect(), &config));
    (sim, controller)
}

#[tokio::test(start_paused = true)]
async fn test_three_ticks_with_failed_second_tick() {
    let (sim, controller) = simulated();
    // Every query of the second tick goes unanswered.
    for index in 4..8 {
        sim.inject_fault(index, Fault::NoResponse).await;
    }

    let dir = tempdir().unwrap();
    let path = dir.path().join("bath.csv");
    let config = LoggerConfig {
        interval_secs: 10.0,
        output: Some(path.clone()),
        max_ticks: Some(3),
    };
    let mut sampler = Sampler::from_config(&controller, &config).unwrap();

    let report = sampler.run(std::future::pending()).await.unwrap();
    assert_eq!(report.ticks, 3);
    assert_eq!(report.failed_ticks, 1);
    assert_eq!(sampler.state(), SamplerState::Stopped);

    let mut reader = csv::Reader::from_path(&path).unwrap();
    let header: Vec<&str> = reader.headers().unwrap().iter().collect();
    assert_eq!(header, ["Timestamp", "Power [%]", "T-J [°C]", "T-R [°C]", "T-S [°C]"]);
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 3);

    let values = |row: &csv::StringRecord| {
        row.iter().skip(1).map(str::to_owned).collect::<Vec<_>>()
    };
    assert_eq!(values(&rows[0]), ["35.2", "24.04", "23.87", "24.11"]);
    assert_eq!(values(&rows[1]), ["", "", "", ""]);
    assert_eq!(values(&rows[2]), ["35.2", "24.04", "23.87", "24.11"]);

    let stamps: Vec<_> = rows
        .iter()
        .map(|r| DateTime::parse_from_rfc3339(&r[0]).unwrap())
        .collect();
    for pair in stamps.windows(2) {
        let step = (pair[1] - pair[0]).to_std().unwrap();
        assert!(step >= Duration::from_millis(9_900), "step {:?}", step);
        assert!(step <= Duration::from_millis(10_100), "step {:?}", step);
    }
}

#[tokio::test(start_paused = true)]
async fn test_rerun_appends_without_second_header() {
    let (_sim, controller) = simulated();
    let dir = tempdir().unwrap();
    let path = dir.path().join("bath.csv");

    for _ in 0..2 {
        let mut sampler = Sampler::new(&controller, Duration::from_secs(10), path.clone())
            .with_max_ticks(2);
        sampler.run(std::future::pending()).await.unwrap();
    }

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 5);
    assert_eq!(lines.iter().filter(|l| l.starts_with("Timestamp")).count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_signal_stops_cleanly() {
    let (sim, controller) = simulated();
    let dir = tempdir().unwrap();
    let path = dir.path().join("bath.csv");
    let mut sampler = Sampler::new(&controller, Duration::from_secs(10), path.clone());

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(15)).await;
        let _ = stop_tx.send(());
    });

    let report = sampler
        .run(async {
            let _ = stop_rx.await;
        })
        .await
        .unwrap();
    stopper.await.unwrap();

    // Ticks at 0 s and 10 s, stop requested at 15 s.
    assert_eq!(report.ticks, 2);
    assert_eq!(sampler.state(), SamplerState::Stopped);
    assert_eq!(sim.received().await.len(), 8);
    assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 3);
}
