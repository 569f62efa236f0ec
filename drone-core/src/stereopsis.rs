//! C8 — Stereopsis. Pair left/right keypoints, reconstruct 3D points,
//! and filter outliers. Matching and reconstruction are each a choice
//! of one of three algorithms selected by `Settings`.

use nalgebra::{Matrix3x4, Matrix4, Vector4};
use vision_types::{Descriptor, Keypoint, Match, Point3D, VisionFault};

/// Block-window search: scan a rectangular neighbourhood around each
/// left keypoint's row for the nearest-distance right keypoint of
/// similar size. `k = round(calibrated_spacing * tuning_param)`, forced
/// odd, gives the half-widths.
pub fn block_search_match(left: &[Keypoint], right: &[Keypoint], calibrated_spacing: f64, tuning_param: f64) -> Vec<Match> {
    let mut k = (calibrated_spacing * tuning_param).round() as i64;
    if k % 2 == 0 {
        k += 1;
    }
    let half_v = k / 2;
    let half_h = k / 6;

    let mut matches = Vec::new();
    for (li, l) in left.iter().enumerate() {
        let mut best: Option<(usize, f32)> = None;
        for (ri, r) in right.iter().enumerate() {
            if (r.y - l.y).abs() as i64 > half_v || (r.x - l.x).abs() as i64 > half_h {
                continue;
            }
            let mean_size = (l.size + r.size) / 2.0;
            if (l.size - r.size).abs() >= mean_size * 0.25 {
                continue;
            }
            let dist = l.distance_to(r);
            let better = match best {
                Some((_, bd)) => dist < bd,
                None => true,
            };
            if better {
                best = Some((ri, dist));
            }
        }
        if let Some((ri, dist)) = best {
            matches.push(Match { left_index: li, right_index: ri, distance: dist });
        }
    }
    matches
}

fn l1_distance(a: &Descriptor, b: &Descriptor) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum()
}

/// Brute-force L1 nearest neighbour with cross-check: a match survives
/// only if each side agrees the other is its nearest neighbour.
pub fn brute_force_cross_check_match(left: &[Descriptor], right: &[Descriptor]) -> Vec<Match> {
    let nearest = |from: &[Descriptor], to: &[Descriptor], i: usize| -> Option<(usize, f32)> {
        to.iter().enumerate().map(|(j, d)| (j, l1_distance(&from[i], d))).min_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
    };
    let mut matches = Vec::new();
    for i in 0..left.len() {
        if let Some((j, dist)) = nearest(left, right, i) {
            if let Some((back, _)) = nearest(right, left, j) {
                if back == i {
                    matches.push(Match { left_index: i, right_index: j, distance: dist });
                }
            }
        }
    }
    matches
}

/// KD-tree equivalent descriptor match (FLANN: `trees=1, checks=50`).
/// This crate has no vision-library dependency to bind a real kd-tree
/// from, so the k-nearest-neighbour search itself is brute force; only
/// the acceptance rule (`k=7`, distance ratio against the remaining
/// neighbours) reproduces FLANN's behaviour.
pub fn flann_equivalent_match(left: &[Descriptor], right: &[Descriptor]) -> Vec<Match> {
    const K: usize = 7;
    let mut matches = Vec::new();
    for (i, ld) in left.iter().enumerate() {
        let mut dists: Vec<(usize, f32)> = right.iter().enumerate().map(|(j, rd)| (j, l1_distance(ld, rd))).collect();
        dists.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        dists.truncate(K);
        if dists.is_empty() {
            continue;
        }
        let (best_j, best_d) = dists[0];
        let rest = &dists[1..];
        if rest.is_empty() {
            matches.push(Match { left_index: i, right_index: best_j, distance: best_d });
            continue;
        }
        let mean_rest: f32 = rest.iter().map(|(_, d)| d).sum::<f32>() / rest.len() as f32;
        if best_d < 0.7 * mean_rest {
            matches.push(Match { left_index: i, right_index: best_j, distance: best_d });
        }
    }
    matches
}

/// `Z = f*B_px/d`, `X = x_L*Z/f_x`, `Y = y_L*Z/f_y`, scaled to
/// millimeters by `B_mm/B_px`. Skips `d == 0` matches with a warning.
pub fn disparity_reconstruct(
    left: &[Keypoint],
    matches: &[Match],
    focal_px: f64,
    baseline_px: f64,
    baseline_mm: f64,
) -> Vec<Point3D> {
    let scale = baseline_mm / baseline_px;
    matches
        .iter()
        .filter_map(|m| {
            let l = &left[m.left_index];
            let d = m.distance as f64;
            if d == 0.0 {
                tracing::warn!(left_index = m.left_index, "zero disparity, skipping match");
                return None;
            }
            let z_px = focal_px * baseline_px / d;
            let x_px = l.x as f64 * z_px / focal_px;
            let y_px = l.y as f64 * z_px / focal_px;
            Some(Point3D { x: x_px * scale, y: y_px * scale, z: z_px * scale })
        })
        .collect()
}

/// Linear SVD triangulation (the `cv::triangulatePoints` equivalent):
/// stack `x*P[2,:] - P[0,:]` and `y*P[2,:] - P[1,:]` for both views
/// into a 4x4 matrix `A` and take the right null-vector (smallest
/// singular value) as the homogeneous 3D point.
fn triangulate_linear(p_l: &Matrix3x4<f64>, p_r: &Matrix3x4<f64>, l: (f64, f64), r: (f64, f64)) -> Result<Vector4<f64>, VisionFault> {
    let mut a = nalgebra::Matrix4::<f64>::zeros();
    for col in 0..4 {
        a[(0, col)] = l.0 * p_l[(2, col)] - p_l[(0, col)];
        a[(1, col)] = l.1 * p_l[(2, col)] - p_l[(1, col)];
        a[(2, col)] = r.0 * p_r[(2, col)] - p_r[(0, col)];
        a[(3, col)] = r.1 * p_r[(2, col)] - p_r[(1, col)];
    }
    let svd = a.svd(true, true);
    let v_t = svd.v_t.ok_or(VisionFault::TriangulationError)?;
    // smallest singular value's row of V^T is the last row
    let x = v_t.row(3).transpose();
    if x[3].abs() < 1e-12 {
        return Err(VisionFault::TriangulationError);
    }
    Ok(Vector4::new(x[0] / x[3], x[1] / x[3], x[2] / x[3], 1.0))
}

/// Iterative Hartley-Zisserman triangulation: reweight the linear
/// system rows by `w_i = P[2,:] . X` each pass, up to 10 iterations or
/// until `|delta_w| <= 1.0`.
fn triangulate_iterative(p_l: &Matrix3x4<f64>, p_r: &Matrix3x4<f64>, l: (f64, f64), r: (f64, f64)) -> Result<Vector4<f64>, VisionFault> {
    let mut x = triangulate_linear(p_l, p_r, l, r)?;
    let mut w_l = 1.0;
    let mut w_r = 1.0;
    for _ in 0..10 {
        let new_w_l = p_l.row(2) * x;
        let new_w_r = p_r.row(2) * x;
        let new_w_l = new_w_l[0];
        let new_w_r = new_w_r[0];
        if new_w_l.abs() < 1e-12 || new_w_r.abs() < 1e-12 {
            return Err(VisionFault::TriangulationError);
        }
        let mut a = Matrix4::<f64>::zeros();
        for col in 0..4 {
            a[(0, col)] = (l.0 * p_l[(2, col)] - p_l[(0, col)]) / new_w_l;
            a[(1, col)] = (l.1 * p_l[(2, col)] - p_l[(1, col)]) / new_w_l;
            a[(2, col)] = (r.0 * p_r[(2, col)] - p_r[(0, col)]) / new_w_r;
            a[(3, col)] = (r.1 * p_r[(2, col)] - p_r[(1, col)]) / new_w_r;
        }
        let svd = a.svd(true, true);
        let v_t = svd.v_t.ok_or(VisionFault::TriangulationError)?;
        let row = v_t.row(3).transpose();
        if row[3].abs() < 1e-12 {
            return Err(VisionFault::TriangulationError);
        }
        x = Vector4::new(row[0] / row[3], row[1] / row[3], row[2] / row[3], 1.0);

        let delta_w = (new_w_l - w_l).abs().max((new_w_r - w_r).abs());
        w_l = new_w_l;
        w_r = new_w_r;
        if delta_w <= 1.0 {
            break;
        }
    }
    Ok(x)
}

/// Run triangulation (linear or iterative) over every match, then
/// project through `q` into metric camera-frame space, dropping
/// `Z < 0` or an undefined homogeneous coordinate.
pub fn triangulation_reconstruct(
    left: &[Keypoint],
    right: &[Keypoint],
    matches: &[Match],
    p_l: &Matrix3x4<f64>,
    p_r: &Matrix3x4<f64>,
    q: &Matrix4<f64>,
    iterative: bool,
) -> Result<Vec<Point3D>, VisionFault> {
    let mut points = Vec::new();
    for m in matches {
        let l = &left[m.left_index];
        let r = &right[m.right_index];
        let homogeneous = if iterative {
            triangulate_iterative(p_l, p_r, (l.x as f64, l.y as f64), (r.x as f64, r.y as f64))?
        } else {
            triangulate_linear(p_l, p_r, (l.x as f64, l.y as f64), (r.x as f64, r.y as f64))?
        };
        let projected = q * homogeneous;
        if projected[3].abs() < 1e-12 {
            continue;
        }
        let point = Point3D { x: projected[0] / projected[3], y: projected[1] / projected[3], z: projected[2] / projected[3] };
        if point.z >= 0.0 {
            points.push(point);
        }
    }
    Ok(points)
}

/// Drop points whose `Z` is more than one standard deviation from the
/// mean `Z`.
pub fn sigma_filter(points: &[Point3D]) -> Result<Vec<Point3D>, VisionFault> {
    if points.is_empty() {
        return Err(VisionFault::PointFiltrationFailed);
    }
    let zs: Vec<f64> = points.iter().map(|p| p.z).collect();
    let mean = zs.iter().sum::<f64>() / zs.len() as f64;
    let variance = zs.iter().map(|z| (z - mean).powi(2)).sum::<f64>() / zs.len() as f64;
    let std = variance.sqrt();
    if std == 0.0 {
        return Ok(points.to_vec());
    }
    Ok(points.iter().copied().filter(|p| (p.z - mean).abs() <= std).collect())
}

/// Raises `no_3D_point_matches` if no matches survived the matching
/// stage — called by Coordinator before reconstruction.
pub fn require_matches(matches: &[Match]) -> Result<(), VisionFault> {
    if matches.is_empty() {
        return Err(VisionFault::No3dPointMatches);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_projection(tx: f64) -> Matrix3x4<f64> {
        Matrix3x4::new(1.0, 0.0, 0.0, tx, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0)
    }

    #[test]
    fn block_search_match_pairs_nearby_similar_size_keypoints() {
        let left = vec![Keypoint::centered(100.0, 50.0, 10.0)];
        let right = vec![Keypoint::centered(90.0, 50.0, 10.0), Keypoint::centered(300.0, 50.0, 10.0)];
        let matches = block_search_match(&left, &right, 40.0, 2.5);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].right_index, 0);
    }

    #[test]
    fn brute_force_cross_check_requires_mutual_nearest() {
        let left = vec![vec![0.0, 0.0], vec![10.0, 10.0]];
        let right = vec![vec![0.1, 0.1], vec![10.1, 10.1]];
        let matches = brute_force_cross_check_match(&left, &right);
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn disparity_reconstruct_skips_zero_disparity() {
        let left = vec![Keypoint::centered(10.0, 10.0, 5.0)];
        let matches = vec![Match { left_index: 0, right_index: 0, distance: 0.0 }];
        let points = disparity_reconstruct(&left, &matches, 500.0, 100.0, 100.0);
        assert!(points.is_empty());
    }

    #[test]
    fn disparity_reconstruct_matches_the_pinhole_formula() {
        // keypoints at (x,y) and (x-10,y): disparity 10px, f=1000px,
        // B=100px -> Z = f*B/d = 10000px, scaled to metric by B_mm/B_px.
        let left = vec![Keypoint::centered(200.0, 80.0, 5.0)];
        let matches = vec![Match { left_index: 0, right_index: 0, distance: 10.0 }];
        let points = disparity_reconstruct(&left, &matches, 1000.0, 100.0, 50.0);
        assert_eq!(points.len(), 1);
        assert!((points[0].z - 5000.0).abs() < 1e-6); // 10000px * (50mm/100px)
    }

    #[test]
    fn sigma_filter_errors_on_empty_input() {
        assert!(sigma_filter(&[]).is_err());
    }

    #[test]
    fn sigma_filter_drops_outlier() {
        let points = vec![
            Point3D { x: 0.0, y: 0.0, z: 100.0 },
            Point3D { x: 0.0, y: 0.0, z: 102.0 },
            Point3D { x: 0.0, y: 0.0, z: 98.0 },
            Point3D { x: 0.0, y: 0.0, z: 5000.0 },
        ];
        let filtered = sigma_filter(&points).unwrap();
        assert!(!filtered.iter().any(|p| p.z == 5000.0));
    }

    #[test]
    fn triangulate_linear_recovers_point_on_axis() {
        let p_l = identity_projection(0.0);
        let p_r = identity_projection(-100.0); // right camera shifted
        // a point straight ahead projects to the same pixel on both views
        // when baseline-shift is folded into the projection matrix
        let point = triangulate_linear(&p_l, &p_r, (0.0, 0.0), (0.0, 0.0));
        assert!(point.is_ok());
    }

    #[test]
    fn sigma_filter_reduces_the_standard_deviation_of_z() {
        fn std_dev(points: &[Point3D]) -> f64 {
            let zs: Vec<f64> = points.iter().map(|p| p.z).collect();
            let mean = zs.iter().sum::<f64>() / zs.len() as f64;
            (zs.iter().map(|z| (z - mean).powi(2)).sum::<f64>() / zs.len() as f64).sqrt()
        }
        let points = vec![
            Point3D { x: 0.0, y: 0.0, z: 100.0 },
            Point3D { x: 0.0, y: 0.0, z: 101.0 },
            Point3D { x: 0.0, y: 0.0, z: 99.0 },
            Point3D { x: 0.0, y: 0.0, z: 1000.0 },
        ];
        let before = std_dev(&points);
        let filtered = sigma_filter(&points).unwrap();
        let after = std_dev(&filtered);
        assert!(after < before);
    }

    #[test]
    fn triangulation_reconstruct_drops_points_behind_the_camera() {
        // P_l is identity (f=1, cx=cy=0); P_r has baseline folded in as
        // tx=-100, the same convention SimStereoCalibration uses. A point
        // at (X=0,Y=0,Z=10) in front of both cameras projects to left
        // (0,0) and right (-10,0); pairing the same left pixel with right
        // (10,0) instead corresponds to Z=-10, behind the rig.
        let p_l = identity_projection(0.0);
        let p_r = identity_projection(-100.0);
        let left = vec![Keypoint::centered(0.0, 0.0, 5.0), Keypoint::centered(0.0, 0.0, 5.0)];
        let right = vec![Keypoint::centered(-10.0, 0.0, 5.0), Keypoint::centered(10.0, 0.0, 5.0)];
        let matches = vec![
            Match { left_index: 0, right_index: 0, distance: 0.0 },
            Match { left_index: 1, right_index: 1, distance: 0.0 },
        ];
        // identity Q passes the triangulated homogeneous point through
        // unchanged, so point.z is the raw triangulated Z.
        let q = Matrix4::identity();
        let points = triangulation_reconstruct(&left, &right, &matches, &p_l, &p_r, &q, false).unwrap();
        assert_eq!(points.len(), 1);
        assert!((points[0].z - 10.0).abs() < 1e-6);
    }

    #[test]
    fn require_matches_errors_on_empty_match_list() {
        assert!(matches!(require_matches(&[]), Err(VisionFault::No3dPointMatches)));
        assert!(require_matches(&[Match { left_index: 0, right_index: 0, distance: 1.0 }]).is_ok());
    }
}
