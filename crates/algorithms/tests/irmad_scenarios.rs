//! End-to-end scenarios for the CCA accumulator, the IR-MAD controller and
//! the raster-level change detection, all on seeded synthetic data.

use ndarray::{s, Array2, Axis};
use rrn_algorithms::cca::{cca, CovarianceAccumulator, CovariancePair};
use rrn_algorithms::irmad::{
    irmad, irmad_change_detection, normalize_bands, IrMad, IrMadParams, Regressor,
};
use rrn_algorithms::synthetic::{correlated_pair, generate_scene, SceneParams};
use rrn_core::{Error, Raster, Weights};

fn max_abs_diff(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    (a - b).iter().fold(0.0f64, |m, v| m.max(v.abs()))
}

// ---------------------------------------------------------------------------
// Accumulator
// ---------------------------------------------------------------------------

#[test]
fn sliding_window_matches_fresh_accumulator() {
    let (x, y) = correlated_pair(900, 3, 0.3, 17);
    let mut window = CovarianceAccumulator::new(3);
    window.push(x.view(), y.view(), Weights::Uniform).unwrap();
    window
        .pull(x.slice(s![..300, ..]), y.slice(s![..300, ..]), Weights::Uniform)
        .unwrap();

    let mut fresh = CovarianceAccumulator::new(3);
    fresh
        .push(x.slice(s![300.., ..]), y.slice(s![300.., ..]), Weights::Uniform)
        .unwrap();

    assert!((window.weight_sum() - 600.0).abs() < 1e-9);
    for pair in [CovariancePair::XX, CovariancePair::YY, CovariancePair::XY] {
        let diff = max_abs_diff(
            &window.covariance(pair).unwrap(),
            &fresh.covariance(pair).unwrap(),
        );
        assert!(diff < 1e-10, "{:?} covariance differs by {}", pair, diff);
    }
}

#[test]
fn single_sample_is_insufficient() {
    let mut acc = CovarianceAccumulator::new(3);
    let x = Array2::from_shape_vec((1, 3), vec![1.0, 2.0, 3.0]).unwrap();
    acc.push(x.view(), x.view(), Weights::Uniform).unwrap();
    let err = acc.covariance(CovariancePair::XX).unwrap_err();
    assert!(matches!(err, Error::InsufficientData { .. }), "got {:?}", err);
}

#[test]
fn shape_mismatch_leaves_accumulator_untouched() {
    let (x, y) = correlated_pair(20, 3, 0.1, 3);
    let mut acc = CovarianceAccumulator::new(3);
    acc.push(x.view(), y.view(), Weights::Uniform).unwrap();
    let before = acc.clone();

    let bad_y = Array2::<f64>::zeros((10, 4));
    let err = acc
        .push(x.slice(s![..10, ..]), bad_y.view(), Weights::Uniform)
        .unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));
    assert_eq!(acc.weight_sum(), before.weight_sum());
    assert_eq!(acc.xy_wsum(), before.xy_wsum());
}

// ---------------------------------------------------------------------------
// CCA
// ---------------------------------------------------------------------------

#[test]
fn weighted_cca_ignores_zero_weight_rows() {
    let (x, mut y) = correlated_pair(500, 2, 0.1, 8);
    // Corrupt the last 50 rows, then exclude them through the weights
    y.slice_mut(s![450.., ..]).mapv_inplace(|v| -3.0 * v + 10.0);
    let mut w = ndarray::Array1::ones(500);
    w.slice_mut(s![450..]).fill(0.0);

    let mut weighted = CovarianceAccumulator::new(2);
    weighted.push(x.view(), y.view(), Weights::from(&w)).unwrap();
    let clean = cca(x.slice(s![..450, ..]), y.slice(s![..450, ..])).unwrap();
    let solution = rrn_algorithms::cca::solve(&weighted).unwrap();

    for (a, b) in solution.correlations().iter().zip(clean.correlations().iter()) {
        assert!((a - b).abs() < 1e-9, "weighted {} vs clean {}", a, b);
    }
}

// ---------------------------------------------------------------------------
// IR-MAD controller
// ---------------------------------------------------------------------------

#[test]
fn end_to_end_no_change_pair_converges() {
    let (x, y) = correlated_pair(1000, 3, 0.1, 2024);
    let mut mad = IrMad::new(3).unwrap();

    let mut last_change = None;
    for _ in 0..5 {
        for (bx, by) in x.axis_chunks_iter(Axis(0), 250).zip(y.axis_chunks_iter(Axis(0), 250)) {
            mad.push_data(bx, by).unwrap();
        }
        last_change = mad.commit_iteration().unwrap();
    }

    assert_eq!(mad.iteration(), 5);
    assert_eq!(mad.correlation_log().len(), 5);
    let correlations = mad.canonical_correlations().unwrap();
    assert!(correlations[0] > 0.9, "first canonical correlation {}", correlations[0]);
    let change = last_change.unwrap();
    assert!(change < 0.01, "final correlation change {}", change);
}

#[test]
fn nan_sample_is_rejected_as_bad_input() {
    let (mut x, y) = correlated_pair(100, 3, 0.1, 31);
    x[(5, 1)] = f64::NAN;
    let err = irmad(x.view(), y.view(), &IrMadParams::default()).unwrap_err();
    assert!(matches!(err, Error::InvalidParameter { .. }), "got {:?}", err);
    assert!(!err.is_degenerate());
}

#[test]
fn weights_are_ones_then_probabilities() {
    let (x, y) = correlated_pair(200, 4, 0.2, 5);
    let mut mad = IrMad::new(4).unwrap();

    let w = mad.no_change_probability(x.view(), y.view()).unwrap();
    assert!(w.iter().all(|&v| v == 1.0));

    mad.push_data(x.view(), y.view()).unwrap();
    mad.commit_iteration().unwrap();

    let w = mad.no_change_probability(x.view(), y.view()).unwrap();
    assert_eq!(w.len(), 200);
    assert!(w.iter().all(|&v| (0.0..=1.0).contains(&v)));
    assert!(w.iter().any(|&v| v < 1.0));

    let chi = mad.chi_square(x.view(), y.view()).unwrap();
    assert!(chi.iter().all(|&v| v >= 0.0));
    // Larger statistic, smaller probability
    let (lo, hi) = if chi[0] < chi[1] { (0, 1) } else { (1, 0) };
    assert!(w[lo] >= w[hi]);
}

// ---------------------------------------------------------------------------
// Change detection and radiometric normalization
// ---------------------------------------------------------------------------

#[test]
fn driver_recovers_radiometric_distortion() {
    let scene = generate_scene(&SceneParams::default());
    let outcome = irmad(scene.x.view(), scene.y.view(), &IrMadParams::default()).unwrap();

    for band in 0..scene.gains.len() {
        let expected_scale = 1.0 / scene.gains[band];
        let expected_intercept = -scene.offsets[band] / scene.gains[band];
        let scale = outcome.band_transform[(band, 1)];
        let intercept = outcome.band_transform[(band, 0)];
        assert!(
            (scale - expected_scale).abs() < 0.02 * expected_scale,
            "band {} scale {} expected {}",
            band,
            scale,
            expected_scale
        );
        assert!(
            (intercept - expected_intercept).abs() < 0.05,
            "band {} intercept {} expected {}",
            band,
            intercept,
            expected_intercept
        );
    }
}

#[test]
fn normalized_after_image_matches_before() {
    let scene = generate_scene(&SceneParams { rows: 48, cols: 48, bands: 3, ..Default::default() });
    let before = scene.before_bands().unwrap();
    let after = scene.after_bands().unwrap();
    let before_refs: Vec<&Raster<f64>> = before.iter().collect();
    let after_refs: Vec<&Raster<f64>> = after.iter().collect();

    let params = IrMadParams { regressor: Regressor::huber(), ..Default::default() };
    let result = irmad_change_detection(&before_refs, &after_refs, &params).unwrap();
    let normalized = normalize_bands(&after_refs, &result.band_transform).unwrap();

    let mut sq_err = 0.0;
    let mut count = 0usize;
    for (cell, &changed) in scene.changed.iter().enumerate() {
        if changed {
            continue;
        }
        let (r, c) = (cell / 48, cell % 48);
        for band in 0..3 {
            let d = normalized[band].get(r, c).unwrap() - before[band].get(r, c).unwrap();
            sq_err += d * d;
            count += 1;
        }
    }
    let rmse = (sq_err / count as f64).sqrt();
    // Residual is the rescaled sensor noise (0.05 / gain)
    assert!(rmse < 0.1, "unchanged-pixel RMSE after normalization {}", rmse);
}

#[test]
fn rotated_bands_still_flag_change() {
    let scene = generate_scene(&SceneParams {
        rows: 40,
        cols: 40,
        bands: 4,
        rotate: true,
        change_fraction: 0.08,
        seed: 99,
        ..Default::default()
    });
    let before = scene.before_bands().unwrap();
    let after = scene.after_bands().unwrap();
    let before_refs: Vec<&Raster<f64>> = before.iter().collect();
    let after_refs: Vec<&Raster<f64>> = after.iter().collect();

    let result = irmad_change_detection(&before_refs, &after_refs, &IrMadParams::default()).unwrap();

    let detected = scene
        .changed
        .iter()
        .enumerate()
        .filter(|&(cell, &changed)| changed && result.no_change.get(cell / 40, cell % 40).unwrap() < 0.01)
        .count();
    assert!(
        detected as f64 >= 0.9 * scene.changed_count() as f64,
        "detected {} of {} changed pixels",
        detected,
        scene.changed_count()
    );
    let last = result.correlations.last().unwrap();
    assert!(last[0] > 0.99, "leading canonical correlation {}", last[0]);
}

#[test]
fn nodata_pixels_are_skipped() {
    let scene = generate_scene(&SceneParams { rows: 20, cols: 20, bands: 2, ..Default::default() });
    let mut before = scene.before_bands().unwrap();
    let after = scene.after_bands().unwrap();
    before[0].set(3, 4, f64::NAN).unwrap();

    let before_refs: Vec<&Raster<f64>> = before.iter().collect();
    let after_refs: Vec<&Raster<f64>> = after.iter().collect();
    let result = irmad_change_detection(&before_refs, &after_refs, &IrMadParams::default()).unwrap();

    assert!(result.no_change.get(3, 4).unwrap().is_nan());
    assert!(result.chi_square.get(3, 4).unwrap().is_nan());
    assert!(!result.no_change.get(3, 5).unwrap().is_nan());
    assert_eq!(result.no_change.statistics().valid_count, 399);
}
