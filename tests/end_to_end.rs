//! Closed-loop scan on the simulated bench, from an unranged stage to M².

use m2_caustic::domain::{AxisPair, FitBackend, FitModel, MeasurementConfig, Wavelength};
use m2_caustic::error::AppError;
use m2_caustic::fit::FitSettings;
use m2_caustic::hardware::sim::{SimulatedProfiler, SimulatedStage};
use m2_caustic::hardware::{LinearStage, PositionState};
use m2_caustic::io::{raw_log_path, read_dataset};
use m2_caustic::measurement::Measurement;
use m2_caustic::plan::ScanGeometry;

/// `zR = π·100² / 2300` mm in pulses of the reference stage.
const RAYLEIGH_PULSES: i64 = 6868;

fn settings(backend: FitBackend) -> FitSettings {
    FitSettings {
        model: FitModel::M2,
        backend,
        wavelength: Wavelength::new(2300.0, 0.0),
    }
}

#[test]
fn finds_waist_rayleigh_length_and_m_squared() {
    let dir = tempfile::tempdir().unwrap();
    let stage = SimulatedStage::new();
    let profiler = SimulatedProfiler::attached_to(&stage);
    let mut bench = Measurement::new(stage, profiler);

    let config = MeasurementConfig {
        precision: 20,
        samples_per_point: 50,
        search_samples: 2,
        warm_up: 1,
        raw_log: true,
        output: dir.path().join("caustic.dat"),
        ..MeasurementConfig::default()
    };
    let out = bench.take_measurements(&config).unwrap();

    assert_eq!(bench.stage().state(), PositionState::Ranged);
    let centers = out.centers;
    assert!(centers.x.unwrap().abs() <= config.precision, "{centers:?}");
    assert!((centers.y.unwrap() - 100).abs() <= config.precision, "{centers:?}");
    for zr in [out.rayleigh_pulses.x.unwrap(), out.rayleigh_pulses.y.unwrap()] {
        // center error plus root tolerance
        assert!((zr - RAYLEIGH_PULSES).abs() <= 2 * config.precision, "zR = {zr}");
    }
    assert_eq!(out.plan.geometry, ScanGeometry::Symmetric);
    assert_eq!(out.dataset.len(), out.plan.points.len());

    let raw = std::fs::read_to_string(raw_log_path(&config.output)).unwrap();
    for section in ["# === Finding Center ===", "# === Finding Rayleigh Length ===", "# === Scan ==="] {
        assert!(raw.contains(section), "missing {section}");
    }

    let fits = out.fit(settings(FitBackend::Odr { x_error_mm: None })).unwrap();
    for fitter in [fits.x.as_ref().unwrap(), fits.y.as_ref().unwrap()] {
        let m2 = fitter.m_squared().unwrap();
        assert!((m2.value - 1.0).abs() < 0.05, "M² = {}", m2.value);
    }

    let file = read_dataset(&out.data_path).unwrap();
    assert_eq!(file.dataset, out.dataset);
    assert!(file.metadata.iter().any(|(k, _)| k == "Raw Data File"));
    bench.close().unwrap();
}

#[test]
fn noisy_sensor_still_yields_m_squared() {
    let dir = tempfile::tempdir().unwrap();
    let stage = SimulatedStage::new();
    let profiler = SimulatedProfiler::attached_to(&stage).with_noise(0.5, 7).unwrap();
    let mut bench = Measurement::new(stage, profiler);

    let config = MeasurementConfig {
        center: Some(AxisPair::new(0, 100)),
        rayleigh_mm: Some(AxisPair::splat(13.659)),
        samples_per_point: 20,
        warm_up: 0,
        output: dir.path().join("noisy.dat"),
        ..MeasurementConfig::default()
    };
    let out = bench.take_measurements(&config).unwrap();
    let fits = out.fit(settings(FitBackend::LeastSquares)).unwrap();

    let x = fits.x.as_ref().unwrap();
    let m2 = x.m_squared().unwrap();
    assert!((m2.value - 1.0).abs() < 0.05, "M² = {}", m2.value);
    assert!(m2.std_error > 0.0 && m2.std_error < 0.05);
    assert!(x.result().unwrap().is_converged());
}

#[test]
fn off_center_waist_falls_back_to_a_one_sided_scan() {
    let dir = tempfile::tempdir().unwrap();
    let stage = SimulatedStage::new();
    let profiler = SimulatedProfiler::attached_to(&stage);
    let mut bench = Measurement::new(stage, profiler);

    let config = MeasurementConfig {
        center: Some(AxisPair::splat(-35_000)),
        rayleigh_mm: Some(AxisPair::splat(13.659)),
        samples_per_point: 1,
        warm_up: 0,
        output: dir.path().join("shifted.dat"),
        ..MeasurementConfig::default()
    };
    let out = bench.take_measurements(&config).unwrap();
    assert_eq!(out.plan.geometry, ScanGeometry::Asymmetric);
    assert!(out.plan.points.iter().all(|&p| bench.stage().travel_range().contains_with_margin(p, 10)));
}

#[test]
fn cancelled_before_start_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let stage = SimulatedStage::new();
    let profiler = SimulatedProfiler::attached_to(&stage);
    let mut bench = Measurement::new(stage, profiler);
    bench.cancellation_token().cancel();

    let config = MeasurementConfig {
        center: Some(AxisPair::new(0, 100)),
        rayleigh_mm: Some(AxisPair::splat(13.659)),
        output: dir.path().join("never.dat"),
        ..MeasurementConfig::default()
    };
    let err = bench.take_measurements(&config).unwrap_err();
    assert!(matches!(err, AppError::Cancelled));
    assert_eq!(bench.stage().move_count(), 0);
    assert!(bench.dataset().is_empty());
    assert!(!config.output.exists());
}
