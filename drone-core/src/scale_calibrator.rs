//! C4 — ScaleCalibrator. From a set of calibration normal/structured
//! pairs, derive the nearest-neighbour spacing and mean blob size, and
//! tune BlobDetector's thresholds.

use vision_types::{Frame, Keypoint, VisionFault};

use crate::blob_detector::BlobDetector;
use crate::delta_extractor::delta;
use crate::frame_ops::green_mask;

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn std_dev(values: &[f64], mean_value: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean_value).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Build the scaling frame for one calibration pair: for each keypoint,
/// the euclidean distance to its nearest neighbour within a square
/// window of side `diag/2`. Keypoints with no neighbour in the window
/// contribute no cell (sparse grid semantics).
fn nearest_neighbour_distances(keypoints: &[Keypoint], diag: f64) -> Vec<f64> {
    let half_window = (diag / 2.0) / 2.0;
    let mut distances = Vec::new();
    for (i, k) in keypoints.iter().enumerate() {
        let mut best: Option<f64> = None;
        for (j, other) in keypoints.iter().enumerate() {
            if i == j {
                continue;
            }
            if (other.x - k.x).abs() as f64 > half_window || (other.y - k.y).abs() as f64 > half_window {
                continue;
            }
            let d = k.distance_to(other) as f64;
            best = Some(best.map_or(d, |b: f64| b.min(d)));
        }
        if let Some(d) = best {
            distances.push(d);
        }
    }
    distances
}

/// Drop scaling-frame cells more than one standard deviation from the
/// mean.
fn filter_one_sigma(values: &[f64]) -> Vec<f64> {
    let m = mean(values);
    let sd = std_dev(values, m);
    if sd == 0.0 {
        return values.to_vec();
    }
    values.iter().copied().filter(|v| (v - m).abs() <= sd).collect()
}

/// Per-pair statistics: `(mean_nearest_neighbour_distance, mean_blob_size)`.
fn pair_statistics(keypoints: &[Keypoint], diag: f64) -> (f64, f64) {
    let raw = nearest_neighbour_distances(keypoints, diag);
    let filtered = filter_one_sigma(&raw);
    let mean_spacing = mean(&filtered);
    let sizes: Vec<f64> = keypoints.iter().map(|k| k.size as f64).collect();
    let mean_size = mean(&sizes);
    (mean_spacing, mean_size)
}

/// Run the point pipeline (delta -> green mask -> detect, concatenation
/// enabled) on one calibration pair. `structured_color` is the
/// color-space structured-light capture used for the green-mask pass;
/// `structured_gray`/`normal` feed DeltaExtractor.
pub fn detect_calibration_keypoints(
    normal: &Frame,
    structured_gray: &Frame,
    structured_color: &Frame,
    delta_threshold: i32,
    hue_tol: f64,
    detector: &BlobDetector,
) -> Result<Vec<Keypoint>, VisionFault> {
    let delta_mask = delta(normal, structured_gray, delta_threshold)?;
    let green = green_mask(structured_color, hue_tol)?;
    let combined: Vec<u8> = delta_mask
        .data
        .iter()
        .zip(green.data.iter())
        .map(|(&d, &g)| if d > 0 && g > 0 { 255 } else { 0 })
        .collect();
    let mask = Frame::new_gray(delta_mask.width, delta_mask.height, combined);
    let keypoints = detector.detect(&mask, true)?;
    let (concatenated, _) = detector.concatenate_close(&keypoints, &[]);
    Ok(concatenated)
}

/// Aggregate per-pair `(mean_spacing, mean_size)` statistics across all
/// calibration pairs by arithmetic mean, producing
/// `(standard_spacing, standard_blob_size)`.
pub fn calibrate(keypoint_sets: &[Vec<Keypoint>], diag: f64) -> (f64, f64) {
    let per_pair: Vec<(f64, f64)> =
        keypoint_sets.iter().map(|kps| pair_statistics(kps, diag)).collect();
    let spacings: Vec<f64> = per_pair.iter().map(|p| p.0).collect();
    let sizes: Vec<f64> = per_pair.iter().map(|p| p.1).collect();
    (mean(&spacings), mean(&sizes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibrate_averages_across_pairs() {
        let pair_a = vec![
            Keypoint::centered(0.0, 0.0, 10.0),
            Keypoint::centered(10.0, 0.0, 10.0),
        ];
        let pair_b = vec![
            Keypoint::centered(0.0, 0.0, 20.0),
            Keypoint::centered(20.0, 0.0, 20.0),
        ];
        let (spacing, size) = calibrate(&[pair_a, pair_b], 1000.0);
        assert!(spacing > 0.0);
        assert!((size - 15.0).abs() < 1e-6);
    }

    #[test]
    fn blob_detector_tunes_from_calibration_result() {
        let mut det = BlobDetector::new(crate::config::DetectorBackend::SimpleBlob);
        det.tune(50.0, 30.0);
        assert_eq!(det.min_dist_between_blobs, 25.0);
        assert_eq!(det.min_area, 3.0);
        assert_eq!(det.max_area, 105.0);
    }
}
