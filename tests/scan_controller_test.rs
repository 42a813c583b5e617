//! End-to-end scan cycles against the simulated rig.
//!
//! Every test runs on a paused tokio clock, so settling and sweeping take no
//! wall time and instrument timing is deterministic.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use transmission_daq::config::ScanSettings;
use transmission_daq::instrument::{
    ExposureMode, SimulatedLaser, SimulatedSampler, SimulatedWavemeter, SweptLaser,
};
use transmission_daq::{
    DaqError, ProgressEvent, SamplerParameters, ScanController, ScanParameters, ScanPhase,
    WavemeterParameters,
};

/// Laser parked away from the scan so every test exercises settling.
fn rig() -> (Arc<SimulatedLaser>, Arc<SimulatedSampler>) {
    (
        Arc::new(SimulatedLaser::new(1550.0)),
        Arc::new(SimulatedSampler::new(1000.0)),
    )
}

fn scan() -> ScanParameters {
    ScanParameters::new(1520.0, 1530.0, 5.0).with_backward_speed(0.1)
}

fn sampler_params() -> SamplerParameters {
    SamplerParameters::new("Dev1", ["ai0", "ai1"])
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn phase_rank(phase: ScanPhase) -> u8 {
    match phase {
        ScanPhase::Idle => 0,
        ScanPhase::Settling => 1,
        ScanPhase::StartCapture => 2,
        ScanPhase::Scanning => 3,
        ScanPhase::EndCapture => 4,
        ScanPhase::Done => 5,
    }
}

#[tokio::test(start_paused = true)]
async fn test_full_scan_produces_aligned_dataset() {
    let (laser, sampler) = rig();
    let controller = ScanController::new(laser.clone(), sampler.clone());

    let dataset = controller
        .run_scan(&scan(), None, &sampler_params())
        .await
        .unwrap();

    assert_eq!(dataset.len(), 2000);
    assert_eq!(dataset.wavelength.len(), 2000);
    assert_eq!(dataset.channels.len(), 2);
    assert_eq!(dataset.channel("ai0").unwrap().len(), 2000);
    assert_eq!(dataset.channel("ai1").unwrap().len(), 2000);

    assert_eq!(dataset.time[0], 0.0);
    let step = dataset.time[1] - dataset.time[0];
    for pair in dataset.time.windows(2) {
        assert!((pair[1] - pair[0] - step).abs() < 1e-9);
    }
    assert!((dataset.time[1999] - 2.0).abs() < 1e-6);

    // The simulated sweep is linear, so the reconstruction must be too.
    for (t, wavelength) in dataset.time.iter().zip(&dataset.wavelength) {
        assert!(
            (wavelength - (1520.0 + 5.0 * t)).abs() < 1e-6,
            "wavelength {wavelength} at t={t}"
        );
    }

    assert_eq!(dataset.start_wavelength, 1520.0);
    assert_eq!(dataset.end_wavelength, 1530.0);
    assert_eq!(sampler.start_count().await, 1);
    assert_eq!(sampler.stop_count().await, 1);
    assert!(!sampler.is_running().await);
    assert_eq!(sampler.device().await.as_deref(), Some("Dev1"));
    assert_eq!(laser.scan_commands().await, vec![true]);
    assert!(!controller.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_downward_scan() {
    let (laser, sampler) = rig();
    let controller = ScanController::new(laser, sampler);
    let scan = ScanParameters::new(1530.0, 1520.0, 5.0);

    let dataset = controller
        .run_scan(&scan, None, &sampler_params())
        .await
        .unwrap();

    assert_eq!(dataset.len(), 2000);
    assert_eq!(dataset.start_wavelength, 1530.0);
    assert_eq!(dataset.end_wavelength, 1520.0);
    assert!(dataset.wavelength.windows(2).all(|pair| pair[1] < pair[0]));
}

#[tokio::test(start_paused = true)]
async fn test_progress_events_follow_scan_cycle() {
    let (laser, sampler) = rig();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let controller = ScanController::new(laser, sampler).with_progress_sink(Arc::new(tx));

    controller
        .run_scan(&scan(), None, &sampler_params())
        .await
        .unwrap();
    let events = drain(&mut rx);

    assert_eq!(events.first().map(|e| e.phase), Some(ScanPhase::Settling));
    assert_eq!(events.last(), Some(&ProgressEvent::done()));
    assert_eq!(events.last().map(|e| e.phase.code()), Some(-1));
    assert!(events
        .windows(2)
        .all(|pair| phase_rank(pair[0].phase) <= phase_rank(pair[1].phase)));

    let start = events
        .iter()
        .find(|e| e.phase == ScanPhase::StartCapture)
        .unwrap();
    assert_eq!(start.wavelength, 1520.0);
    let end = events
        .iter()
        .find(|e| e.phase == ScanPhase::EndCapture)
        .unwrap();
    assert_eq!(end.wavelength, 1530.0);

    let percents: Vec<u8> = events
        .iter()
        .filter(|e| e.phase == ScanPhase::Scanning)
        .map(|e| e.percent)
        .collect();
    assert!(percents.len() >= 4);
    assert_eq!(percents[0], 0);
    assert!(percents.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(percents.iter().all(|&p| p <= 100));
    assert!(*percents.last().unwrap() >= 95);
}

#[tokio::test(start_paused = true)]
async fn test_wavemeter_is_configured_and_used_for_captures() {
    let (laser, sampler) = rig();
    let wavemeter = Arc::new(SimulatedWavemeter::new(laser.clone()).with_offset(0.001));
    let controller = ScanController::new(laser, sampler).with_wavemeter(wavemeter.clone());
    let params = WavemeterParameters {
        channel: 3,
        exposure: ExposureMode::Manual(20),
    };

    let dataset = controller
        .run_scan(&scan(), Some(&params), &sampler_params())
        .await
        .unwrap();

    assert_eq!(wavemeter.connect_attempts().await, 1);
    assert_eq!(wavemeter.modes().await, (false, false, false));
    assert_eq!(wavemeter.channel().await, 3);
    assert_eq!(wavemeter.exposure().await, ExposureMode::Manual(20));
    assert!(!wavemeter.is_acquiring().await);
    assert!((dataset.start_wavelength - 1520.001).abs() < 1e-9);
    assert!((dataset.end_wavelength - 1530.001).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_wavemeter_refusing_connection_aborts_scan() {
    let (laser, sampler) = rig();
    let wavemeter = Arc::new(SimulatedWavemeter::new(laser.clone()));
    wavemeter.refuse_connection().await;
    let controller = ScanController::new(laser, sampler.clone()).with_wavemeter(wavemeter.clone());

    let err = controller
        .run_scan(&scan(), None, &sampler_params())
        .await
        .unwrap_err();

    assert!(matches!(err, DaqError::InstrumentCommunication { .. }));
    assert_eq!(wavemeter.connect_attempts().await, 1);
    assert_eq!(sampler.start_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_settling_timeout() {
    let (laser, sampler) = rig();
    laser.stick_settling().await;
    let settings = ScanSettings {
        settling_timeout_secs: 2,
        ..ScanSettings::default()
    };
    let controller = ScanController::new(laser, sampler.clone()).with_settings(settings);

    let err = controller
        .run_scan(&scan(), None, &sampler_params())
        .await
        .unwrap_err();

    assert!(matches!(err, DaqError::SettlingTimeout(t) if t == Duration::from_secs(2)));
    assert_eq!(sampler.start_count().await, 0);
    assert!(!controller.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_short_read_is_reported_and_sampler_stopped() {
    let (laser, sampler) = rig();
    sampler.drop_samples(5).await;
    let controller = ScanController::new(laser, sampler.clone());

    let err = controller
        .run_scan(&scan(), None, &sampler_params())
        .await
        .unwrap_err();

    match err {
        DaqError::AcquisitionRead {
            channel,
            expected,
            received,
        } => {
            assert_eq!(channel, "ai0");
            assert_eq!(expected, 2000);
            assert_eq!(received, 1995);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!sampler.is_running().await);
    assert_eq!(sampler.stop_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_laser_failure_mid_sweep_stops_everything() {
    let (laser, sampler) = rig();
    laser.fail_scan_reads_after(10).await;
    let controller = ScanController::new(laser.clone(), sampler.clone());

    let err = controller
        .run_scan(&scan(), None, &sampler_params())
        .await
        .unwrap_err();

    assert!(matches!(err, DaqError::InstrumentCommunication { .. }));
    assert!(!sampler.is_running().await);
    assert_eq!(sampler.stop_count().await, 1);
    assert_eq!(laser.scan_commands().await, vec![true, false]);
    assert!(!controller.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_running_scan() {
    let (laser, sampler) = rig();
    let controller = Arc::new(ScanController::new(laser.clone(), sampler.clone()));

    let handle = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            controller
                .run_scan(&scan(), None, &sampler_params())
                .await
        })
    };

    // Settling takes 1.5 s, the sweep another 2 s.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(controller.is_running());
    assert!(sampler.is_running().await);
    controller.stop();

    let result = handle.await.unwrap();
    assert!(matches!(result, Err(DaqError::Cancelled)));
    assert!(!sampler.is_running().await);
    assert_eq!(laser.scan_commands().await, vec![true, false]);
    assert!(!controller.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_second_scan_is_rejected_while_first_runs() {
    let (laser, sampler) = rig();
    let controller = Arc::new(ScanController::new(laser, sampler.clone()));

    let first = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            controller
                .run_scan(&scan(), None, &sampler_params())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let second = controller.run_scan(&scan(), None, &sampler_params()).await;
    assert!(matches!(second, Err(DaqError::ConcurrentScanRejected)));

    let dataset = first.await.unwrap().unwrap();
    assert_eq!(dataset.len(), 2000);
    assert_eq!(sampler.start_count().await, 1);

    // The controller accepts new scans once the first one is over.
    assert!(controller
        .run_scan(&scan(), None, &sampler_params())
        .await
        .is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_settling_cancels_before_arming() {
    let (laser, sampler) = rig();
    let controller = Arc::new(ScanController::new(laser.clone(), sampler.clone()));

    let handle = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            controller
                .run_scan(&scan(), None, &sampler_params())
                .await
        })
    };

    // 30 nm at 20 nm/s: still travelling to the start wavelength.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(laser.is_changing_wavelength().await.unwrap());
    controller.stop();

    let result = handle.await.unwrap();
    assert!(matches!(result, Err(DaqError::Cancelled)));
    assert_eq!(sampler.start_count().await, 0);
    assert!(laser.scan_commands().await.is_empty());
    assert!(!controller.is_running());

    // The request ended with the cancelled scan.
    assert!(controller
        .run_scan(&scan(), None, &sampler_params())
        .await
        .is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_invalid_sample_rate_is_reported() {
    let laser = Arc::new(SimulatedLaser::new(1550.0));
    let sampler = Arc::new(SimulatedSampler::new(0.0));
    let controller = ScanController::new(laser, sampler.clone());

    let err = controller
        .run_scan(&scan(), None, &sampler_params())
        .await
        .unwrap_err();

    assert!(matches!(err, DaqError::InstrumentCommunication { .. }));
    assert!(!sampler.is_running().await);
    assert_eq!(sampler.stop_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_scan_limits_are_read_back() {
    let (laser, sampler) = rig();
    laser.ignore_scan_limits().await;
    let controller = ScanController::new(laser.clone(), sampler.clone());

    let err = controller
        .run_scan(&scan(), None, &sampler_params())
        .await
        .unwrap_err();

    assert!(matches!(err, DaqError::InstrumentCommunication { .. }));
    assert_eq!(sampler.start_count().await, 0);
    assert!(laser.scan_commands().await.is_empty());
}
