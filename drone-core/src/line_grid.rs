//! C5 — LineGrid. Fit a sparse axis-aligned hough line grid to the
//! keypoint cloud; bound every line to its in-cloud segment; pick the
//! four extremal segments (top/bottom/left/right).
//!
//! `theta == 0` lines are vertical (constant-x); `theta == pi/2` lines
//! are horizontal (constant-y) — the usual `x*cos(theta) + y*sin(theta)
//! == rho` hough parameterisation specialised to the grid step's two
//! axis-aligned angles.

use std::f64::consts::FRAC_PI_2;

use vision_types::{BoundedSegment, HoughLine, Keypoint, VisionFault};

const THETA_EPS: f64 = 1e-9;

/// Collapse any rho-run whose neighbour gap is below `r` into its
/// median, growing the threshold by `r/2` each pass until either the
/// number of lines is `<= 2` or no further merge occurs.
fn concatenate_family(rhos: &[f64], r: f64) -> Vec<f64> {
    let mut values = rhos.to_vec();
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mut threshold = r.max(1e-6);
    loop {
        let mut merged = Vec::new();
        let mut changed = false;
        let mut i = 0;
        while i < values.len() {
            let mut run = vec![values[i]];
            let mut j = i + 1;
            while j < values.len() && (values[j] - values[j - 1]) < threshold {
                run.push(values[j]);
                j += 1;
            }
            if run.len() > 1 {
                changed = true;
            }
            let mut sorted_run = run.clone();
            sorted_run.sort_by(|a, b| a.partial_cmp(b).unwrap());
            merged.push(sorted_run[sorted_run.len() / 2]);
            i = j;
        }
        values = merged;
        if values.len() <= 2 || !changed {
            break;
        }
        threshold += r / 2.0;
    }
    values
}

/// Step A/B: vote `rho = round(x*cos(theta) + y*sin(theta))` for
/// `theta in {0, pi/2}`, producing the unique candidate rho values per
/// family (every cell with >= 1 vote is a candidate).
fn candidate_rhos(keypoints: &[Keypoint], theta: f64) -> Vec<f64> {
    let mut rhos: Vec<f64> = keypoints
        .iter()
        .map(|k| (k.x as f64 * theta.cos() + k.y as f64 * theta.sin()).round())
        .collect();
    rhos.sort_by(|a, b| a.partial_cmp(b).unwrap());
    rhos.dedup();
    rhos
}

/// Step D: keypoints within `r` of the line, and their interpolated
/// bounding segment. Returns `None` if fewer than two keypoints support
/// the line.
fn bound_line(keypoints: &[Keypoint], line: HoughLine, r: f64) -> Option<BoundedSegment> {
    let supporting: Vec<&Keypoint> = keypoints
        .iter()
        .filter(|k| {
            let proj = k.x as f64 * line.theta.cos() + k.y as f64 * line.theta.sin();
            (proj - line.rho).abs() <= r
        })
        .collect();
    if supporting.len() < 2 {
        return None;
    }
    let (p1, p2) = if line.theta.abs() < THETA_EPS {
        // vertical line, x == rho; endpoints span min/max y
        let min_y = supporting.iter().map(|k| k.y as f64).fold(f64::INFINITY, f64::min);
        let max_y = supporting.iter().map(|k| k.y as f64).fold(f64::NEG_INFINITY, f64::max);
        ((line.rho, min_y), (line.rho, max_y))
    } else {
        // horizontal line, y == rho; endpoints span min/max x
        let min_x = supporting.iter().map(|k| k.x as f64).fold(f64::INFINITY, f64::min);
        let max_x = supporting.iter().map(|k| k.x as f64).fold(f64::NEG_INFINITY, f64::max);
        ((min_x, line.rho), (max_x, line.rho))
    };
    Some(BoundedSegment { line, p1, p2 })
}

/// The four extremal bounded segments, keyed by orientation and by
/// whether the line sits at the larger (`max_*`) or smaller (`min_*`)
/// coordinate of its axis.
#[derive(Debug, Clone, Copy)]
pub struct ExtremalSegments {
    pub max_hor: BoundedSegment,
    pub min_hor: BoundedSegment,
    pub max_vert: BoundedSegment,
    pub min_vert: BoundedSegment,
}

/// Fit the hough grid and return every bounded segment plus the four
/// extremes. `r` defaults to `largest_blob_size` when `None` (the
/// bounding/concatenation radius); callers pass `0.3*calibrated_spacing`
/// for the production call and `0.5*calibrated_spacing` for the
/// bounding call.
pub fn fit_grid(
    keypoints: &[Keypoint],
    r: Option<f64>,
    largest_blob_size: f64,
) -> Result<(Vec<BoundedSegment>, ExtremalSegments), VisionFault> {
    let r_eff = r.unwrap_or(largest_blob_size).max(1e-6);

    let vert_rhos = concatenate_family(&candidate_rhos(keypoints, 0.0), r_eff);
    let hor_rhos = concatenate_family(&candidate_rhos(keypoints, FRAC_PI_2), r_eff);

    let mut segments = Vec::new();
    for rho in &vert_rhos {
        if let Some(seg) = bound_line(keypoints, HoughLine { rho: *rho, theta: 0.0 }, r_eff) {
            segments.push(seg);
        }
    }
    for rho in &hor_rhos {
        if let Some(seg) = bound_line(keypoints, HoughLine { rho: *rho, theta: FRAC_PI_2 }, r_eff) {
            segments.push(seg);
        }
    }

    let hor_segments: Vec<&BoundedSegment> =
        segments.iter().filter(|s| s.line.theta.abs() > THETA_EPS).collect();
    let vert_segments: Vec<&BoundedSegment> =
        segments.iter().filter(|s| s.line.theta.abs() <= THETA_EPS).collect();

    if hor_segments.is_empty() {
        return Err(VisionFault::FindLineLimitsNoHorFound);
    }
    if vert_segments.is_empty() {
        return Err(VisionFault::FindLineLimitsNoVertFound);
    }

    let max_hor = **hor_segments.iter().max_by(|a, b| a.line.rho.partial_cmp(&b.line.rho).unwrap()).unwrap();
    let min_hor = **hor_segments.iter().min_by(|a, b| a.line.rho.partial_cmp(&b.line.rho).unwrap()).unwrap();
    let max_vert = **vert_segments.iter().max_by(|a, b| a.line.rho.partial_cmp(&b.line.rho).unwrap()).unwrap();
    let min_vert = **vert_segments.iter().min_by(|a, b| a.line.rho.partial_cmp(&b.line.rho).unwrap()).unwrap();

    Ok((segments, ExtremalSegments { max_hor, min_hor, max_vert, min_vert }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_keypoints() -> Vec<Keypoint> {
        // a 4x4 dot grid, spacing 50px
        let mut kps = Vec::new();
        for row in 0..4 {
            for col in 0..4 {
                kps.push(Keypoint::centered((col * 50) as f32, (row * 50) as f32, 5.0));
            }
        }
        kps
    }

    #[test]
    fn fit_grid_finds_one_theta_per_family_before_extremes() {
        let kps = grid_keypoints();
        let (segments, _) = fit_grid(&kps, Some(15.0), 10.0).unwrap();
        assert!(segments.iter().any(|s| s.line.theta.abs() < THETA_EPS));
        assert!(segments.iter().any(|s| s.line.theta.abs() > THETA_EPS));
        for s in &segments {
            assert!(s.line.theta.abs() < THETA_EPS || (s.line.theta - FRAC_PI_2).abs() < THETA_EPS);
        }
    }

    #[test]
    fn fit_grid_picks_extremal_segments() {
        let kps = grid_keypoints();
        let (_, extremes) = fit_grid(&kps, Some(15.0), 10.0).unwrap();
        assert!(extremes.max_hor.line.rho >= extremes.min_hor.line.rho);
        assert!(extremes.max_vert.line.rho >= extremes.min_vert.line.rho);
    }

    #[test]
    fn fit_grid_fails_when_one_family_empty() {
        // a single column of points: no horizontal family can be bound
        // with >= 2 points per row since every y is unique
        let kps: Vec<Keypoint> = (0..4).map(|i| Keypoint::centered(0.0, (i * 50) as f32, 5.0)).collect();
        let result = fit_grid(&kps, Some(5.0), 5.0);
        assert!(result.is_err());
    }
}
