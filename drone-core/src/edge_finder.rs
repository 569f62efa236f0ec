//! C6 — EdgeFinder. From the undistorted normal frame, every bounded
//! grid segment, and the four extremal segments among them, walk
//! outward perpendicular to each candidate boundary — one point per
//! orthogonal segment — and fit a hough line to the edge points
//! encountered.

use std::f64::consts::FRAC_PI_4;

use vision_types::{BoundedSegment, EdgeHeading, Frame, HoughLine, VisionFault};

use crate::line_grid::ExtremalSegments;

const CANNY_LOW: i32 = 30;
const CANNY_HIGH: i32 = 45;
const STRIP_HALF_WIDTH: i64 = 1; // 3-pixel-wide strip

fn sobel_gradients(gray: &Frame) -> (Vec<f64>, Vec<f64>) {
    let w = gray.width as i64;
    let h = gray.height as i64;
    let get = |x: i64, y: i64| -> f64 {
        let xc = x.clamp(0, w - 1) as usize;
        let yc = y.clamp(0, h - 1) as usize;
        gray.data[yc * w as usize + xc] as f64
    };
    let mut gx = vec![0.0; (w * h) as usize];
    let mut gy = vec![0.0; (w * h) as usize];
    for y in 0..h {
        for x in 0..w {
            let dx = (get(x + 1, y - 1) + 2.0 * get(x + 1, y) + get(x + 1, y + 1))
                - (get(x - 1, y - 1) + 2.0 * get(x - 1, y) + get(x - 1, y + 1));
            let dy = (get(x - 1, y + 1) + 2.0 * get(x, y + 1) + get(x + 1, y + 1))
                - (get(x - 1, y - 1) + 2.0 * get(x, y - 1) + get(x + 1, y - 1));
            gx[(y * w + x) as usize] = dx;
            gy[(y * w + x) as usize] = dy;
        }
    }
    (gx, gy)
}

/// Canny edge map with L2-gradient magnitude and simplified hysteresis:
/// a pixel above `CANNY_HIGH` is always an edge; a pixel between the
/// two thresholds is an edge only if it has a strong neighbour.
fn canny(gray: &Frame) -> Vec<bool> {
    let (gx, gy) = sobel_gradients(gray);
    let w = gray.width as i64;
    let h = gray.height as i64;
    let mag: Vec<f64> = gx.iter().zip(gy.iter()).map(|(&dx, &dy)| (dx * dx + dy * dy).sqrt()).collect();
    let strong: Vec<bool> = mag.iter().map(|&m| m >= CANNY_HIGH as f64).collect();
    (0..h)
        .flat_map(|y| (0..w).map(move |x| (x, y)))
        .map(|(x, y)| {
            let idx = (y * w + x) as usize;
            if strong[idx] {
                return true;
            }
            if mag[idx] < CANNY_LOW as f64 {
                return false;
            }
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let (nx, ny) = (x + dx, y + dy);
                    if nx < 0 || ny < 0 || nx >= w || ny >= h {
                        continue;
                    }
                    if strong[(ny * w + nx) as usize] {
                        return true;
                    }
                }
            }
            false
        })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len().max(1) as f64
}

fn std_dev(values: &[f64], m: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// Walk from one point — an orthogonal bounded segment's endpoint —
/// towards the frame border, within a 3-pixel strip, recording the
/// first canny edge pixel encountered. `fixed_is_x` selects which
/// coordinate stays constant during the walk: `true` walks along y at
/// a constant x (used when the candidate boundary is horizontal and
/// the orthogonal segments are vertical), `false` walks along x at a
/// constant y. Falls back to the border coordinate itself when no edge
/// pixel is found along the path, so every orthogonal segment always
/// contributes exactly one point.
fn walk_from_point(edges: &[bool], w: u32, h: u32, fixed_is_x: bool, fixed: i64, start: i64, towards_max: bool) -> (f64, f64) {
    if fixed_is_x {
        let border = if towards_max { h as i64 - 1 } else { 0 };
        let range: Box<dyn Iterator<Item = i64>> = if towards_max {
            Box::new(start.max(0)..h as i64)
        } else {
            Box::new((0..=start.min(h as i64 - 1)).rev())
        };
        for y in range {
            for dx in -STRIP_HALF_WIDTH..=STRIP_HALF_WIDTH {
                let xx = fixed + dx;
                if xx < 0 || xx >= w as i64 {
                    continue;
                }
                if edges[(y * w as i64 + xx) as usize] {
                    return (fixed as f64, y as f64);
                }
            }
        }
        (fixed as f64, border as f64)
    } else {
        let border = if towards_max { w as i64 - 1 } else { 0 };
        let range: Box<dyn Iterator<Item = i64>> = if towards_max {
            Box::new(start.max(0)..w as i64)
        } else {
            Box::new((0..=start.min(w as i64 - 1)).rev())
        };
        for x in range {
            for dy in -STRIP_HALF_WIDTH..=STRIP_HALF_WIDTH {
                let yy = fixed + dy;
                if yy < 0 || yy >= h as i64 {
                    continue;
                }
                if edges[(yy * w as i64 + x) as usize] {
                    return (x as f64, fixed as f64);
                }
            }
        }
        (border as f64, fixed as f64)
    }
}

fn filter_one_sigma(points: &[(f64, f64)]) -> Vec<(f64, f64)> {
    if points.len() < 2 {
        return points.to_vec();
    }
    let xs: Vec<f64> = points.iter().map(|p| p.0).collect();
    let ys: Vec<f64> = points.iter().map(|p| p.1).collect();
    let (mx, my) = (mean(&xs), mean(&ys));
    let (sx, sy) = (std_dev(&xs, mx), std_dev(&ys, my));
    points
        .iter()
        .copied()
        .filter(|&(x, y)| (sx == 0.0 || (x - mx).abs() <= sx) && (sy == 0.0 || (y - my).abs() <= sy))
        .collect()
}

/// Speeded-up accumulator: theta restricted to `axis_theta +/- pi/4`,
/// one-degree steps; votes summed per `(rho_rounded, theta_step)` cell,
/// dilated by +/-1 rho bucket ("gauss-boosted"). Returns the median
/// rho/theta of every peak at or above `max_votes / 1.2`.
fn fit_restricted_hough(points: &[(f64, f64)], axis_theta: f64) -> Option<HoughLine> {
    if points.is_empty() {
        return None;
    }
    const STEPS: i32 = 90;
    let mut votes: std::collections::HashMap<(i64, i32), u32> = std::collections::HashMap::new();
    for step in -STEPS..=STEPS {
        let theta = axis_theta + FRAC_PI_4 * (step as f64 / STEPS as f64);
        for &(x, y) in points {
            let rho = (x * theta.cos() + y * theta.sin()).round() as i64;
            for dr in -1..=1 {
                *votes.entry((rho + dr, step)).or_insert(0) += 1;
            }
        }
    }
    let max_votes = *votes.values().max()?;
    let floor = (max_votes as f64 / 1.2).floor() as u32;
    let mut rhos = Vec::new();
    let mut thetas = Vec::new();
    for (&(rho, step), &count) in &votes {
        if count >= floor {
            rhos.push(rho as f64);
            thetas.push(axis_theta + FRAC_PI_4 * (step as f64 / STEPS as f64));
        }
    }
    rhos.sort_by(|a, b| a.partial_cmp(b).unwrap());
    thetas.sort_by(|a, b| a.partial_cmp(b).unwrap());
    Some(HoughLine { rho: rhos[rhos.len() / 2], theta: thetas[thetas.len() / 2] })
}

/// Detect the four boundary edges given the undistorted normal frame,
/// every bounded grid segment, and the four extremal segments among
/// them. For each extremal candidate that sits near its border, every
/// *orthogonal* bounded segment contributes one point — its endpoint
/// on the perpendicular axis, walked to the frame border — and a fresh
/// hough line is fit through that sparse point set. `towards_max`
/// records, per extreme, which side of the frame the walk should head
/// toward.
pub fn detect_boundary_edges(
    normal_gray: &Frame,
    segments: &[BoundedSegment],
    extremes: &ExtremalSegments,
    scale_threshold: f64,
    filter_outliers: bool,
) -> Result<[EdgeHeading; 4], VisionFault> {
    let edges = canny(normal_gray);
    let w = normal_gray.width;
    let h = normal_gray.height;
    let diag_tol_x = scale_threshold * w as f64;
    let diag_tol_y = scale_threshold * h as f64;

    let vertical_segments: Vec<&BoundedSegment> = segments.iter().filter(|s| s.line.theta.abs() < 1e-9).collect();
    let horizontal_segments: Vec<&BoundedSegment> = segments.iter().filter(|s| s.line.theta.abs() > 1e-9).collect();

    let candidates: [(&BoundedSegment, bool, bool, bool); 4] = [
        (&extremes.max_hor, true, true, true),
        (&extremes.min_hor, false, true, false),
        (&extremes.max_vert, true, false, true),
        (&extremes.min_vert, false, false, false),
    ];

    let mut results = Vec::with_capacity(4);
    for &(border_segment, is_max, is_horizontal, towards_max) in &candidates {
        let near_border = if is_horizontal {
            border_segment.line.rho <= diag_tol_y || (h as f64 - border_segment.line.rho) <= diag_tol_y
        } else {
            border_segment.line.rho <= diag_tol_x || (w as f64 - border_segment.line.rho) <= diag_tol_x
        };
        if !near_border {
            continue;
        }

        let points: Vec<(f64, f64)> = if is_horizontal {
            vertical_segments
                .iter()
                .map(|seg| {
                    let fixed_x = seg.line.rho.round() as i64;
                    let start_y = (if towards_max { seg.p2.1 } else { seg.p1.1 }).round() as i64;
                    walk_from_point(&edges, w, h, true, fixed_x, start_y, towards_max)
                })
                .collect()
        } else {
            horizontal_segments
                .iter()
                .map(|seg| {
                    let fixed_y = seg.line.rho.round() as i64;
                    let start_x = (if towards_max { seg.p2.0 } else { seg.p1.0 }).round() as i64;
                    walk_from_point(&edges, w, h, false, fixed_y, start_x, towards_max)
                })
                .collect()
        };
        if points.is_empty() {
            continue;
        }

        let filtered = if filter_outliers { filter_one_sigma(&points) } else { points };
        let axis_theta = if is_horizontal { std::f64::consts::FRAC_PI_2 } else { 0.0 };
        if let Some(line) = fit_restricted_hough(&filtered, axis_theta) {
            results.push(EdgeHeading { rho: line.rho, theta: line.theta, is_max, is_horizontal });
        }
    }

    if results.len() < 4 {
        return Err(VisionFault::DetectBoundaryEdgeNotFoundAllEdgeLines);
    }

    // stable order: [max_hor, min_hor, max_vert, min_vert]
    let find = |is_max: bool, is_horizontal: bool| {
        results.iter().find(|e| e.is_max == is_max && e.is_horizontal == is_horizontal).copied()
    };
    match (find(true, true), find(false, true), find(true, false), find(false, false)) {
        (Some(a), Some(b), Some(c), Some(d)) => Ok([a, b, c, d]),
        _ => Err(VisionFault::DetectBoundaryEdgeNotFoundAllEdgeLines),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vision_types::Frame;

    fn vertical_edge_frame(w: u32, h: u32, edge_x: u32) -> Frame {
        let mut data = vec![30u8; (w * h) as usize];
        for y in 0..h {
            for x in edge_x..w {
                data[(y * w + x) as usize] = 220;
            }
        }
        Frame::new_gray(w, h, data)
    }

    fn segment_for(rho: f64, theta: f64, p1: (f64, f64), p2: (f64, f64)) -> BoundedSegment {
        BoundedSegment { line: HoughLine { rho, theta }, p1, p2 }
    }

    #[test]
    fn detect_boundary_edges_fails_when_no_candidate_near_border() {
        let frame = vertical_edge_frame(40, 40, 20);
        let far_from_border = segment_for(20.0, 0.0, (20.0, 0.0), (20.0, 39.0));
        let extremes = ExtremalSegments {
            max_hor: far_from_border,
            min_hor: far_from_border,
            max_vert: far_from_border,
            min_vert: far_from_border,
        };
        let result = detect_boundary_edges(&frame, &[], &extremes, 0.05, true);
        assert!(result.is_err());
    }

    #[test]
    fn walk_from_point_finds_hit_on_synthetic_edge() {
        let frame = vertical_edge_frame(40, 40, 20);
        let edges = canny(&frame);
        let (x, y) = walk_from_point(&edges, 40, 40, false, 5, 0, true);
        assert_eq!(y, 5.0);
        assert!((x - 20.0).abs() <= 2.0);
    }

    #[test]
    fn walk_from_point_falls_back_to_border_when_no_edge_found() {
        let edges = vec![false; 40 * 40];
        let (x, y) = walk_from_point(&edges, 40, 40, true, 5, 0, true);
        assert_eq!(x, 5.0);
        assert_eq!(y, 39.0);
    }

    #[test]
    fn fit_restricted_hough_recovers_vertical_line() {
        let points: Vec<(f64, f64)> = (0..20).map(|y| (20.0, y as f64)).collect();
        let line = fit_restricted_hough(&points, 0.0).unwrap();
        assert!((line.rho - 20.0).abs() <= 2.0);
        assert!(line.theta.abs() < FRAC_PI_4 + 1e-6);
    }

    #[test]
    fn filter_one_sigma_keeps_tight_cluster() {
        let mut pts: Vec<(f64, f64)> = (0..10).map(|i| (10.0 + i as f64 * 0.1, 5.0)).collect();
        pts.push((500.0, 500.0));
        let filtered = filter_one_sigma(&pts);
        assert!(!filtered.contains(&(500.0, 500.0)));
    }
}
