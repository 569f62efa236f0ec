//! C7 — HeadingEngine. Six-stage state machine: normalise the four
//! boundary edges to image-centre polar form, select which edge to
//! follow per axis, lock the orientation once, detect tip/root
//! arrival, synthesise the next heading, and handle the tip/root
//! direction flip.

use std::f64::consts::{FRAC_PI_2, PI};

use vision_types::{EdgeHeading, Heading, VisionFault};

use crate::camera::RootSensor;

/// Stage 1: rewrite `(rho, theta)` so the closest point on the line to
/// the frame centre is reachable with `rho > 0`, discarding edges whose
/// closest point falls within 10px of the frame perimeter.
fn normalize_and_filter(edge: EdgeHeading, width: f64, height: f64) -> Option<EdgeHeading> {
    const BORDER_TOLERANCE: f64 = 10.0;
    let (cx, cy) = (width / 2.0, height / 2.0);
    let mut rho = edge.rho - (cx * edge.theta.cos() + cy * edge.theta.sin());
    let mut theta = edge.theta;
    if rho < 0.0 {
        theta += PI;
        rho = -rho;
    }
    theta = theta.rem_euclid(2.0 * PI);
    let x = cx + rho * theta.cos();
    let y = cy + rho * theta.sin();
    if x <= BORDER_TOLERANCE
        || (x - (width - 1.0)).abs() <= BORDER_TOLERANCE
        || y <= BORDER_TOLERANCE
        || (y - (height - 1.0)).abs() <= BORDER_TOLERANCE
    {
        return None;
    }
    Some(EdgeHeading { rho, theta, is_max: edge.is_max, is_horizontal: edge.is_horizontal })
}

/// Is this edge's angle in the half-quadrant its max/min flag implies?
fn in_correct_quadrant(edge: &EdgeHeading) -> bool {
    let theta = edge.theta.rem_euclid(2.0 * PI);
    if edge.is_horizontal {
        if edge.is_max {
            !(theta > PI && theta < 2.0 * PI)
        } else {
            theta >= PI && theta <= 2.0 * PI
        }
    } else if edge.is_max {
        !(theta > FRAC_PI_2 && theta < 1.5 * PI)
    } else {
        theta >= FRAC_PI_2 && theta <= 1.5 * PI
    }
}

fn closest_to(candidates: &[EdgeHeading], reference_rho: Option<f64>) -> Option<EdgeHeading> {
    match reference_rho {
        None => candidates.iter().copied().min_by(|a, b| a.rho.partial_cmp(&b.rho).unwrap()),
        Some(r) => candidates.iter().copied().min_by(|a, b| (a.rho - r).abs().partial_cmp(&(b.rho - r).abs()).unwrap()),
    }
}

/// Stage 5 — equations 6.14-6.17: synthesise `(rho, theta)` from one or
/// two followed-family edges.
fn find_heading(edges: &[EdgeHeading], towards_tip: bool, rho_step: f64, rho_min_perc: f64, width: f64, height: f64) -> Heading {
    if edges.is_empty() {
        return Heading { rho: 0.0, theta: 0.0 };
    }
    if edges.len() > 1 {
        let (a, b) = (edges[0], edges[1]);
        if in_correct_quadrant(&a) && in_correct_quadrant(&b) {
            let mut omega = (a.theta + b.theta) / 2.0 + PI;
            if !towards_tip {
                omega -= PI;
            }
            return Heading { rho: rho_step, theta: omega.rem_euclid(2.0 * PI) };
        }
        let closer = if a.rho < b.rho { a } else { b };
        return find_heading(&[closer], towards_tip, rho_step, rho_min_perc, width, height);
    }

    let edge = edges[0];
    let mut sign = 1.0;
    let mut flip_rot = 0.0;
    if !in_correct_quadrant(&edge) {
        sign = -1.0;
        flip_rot = PI;
    }

    let i_cos = width * (edge.theta + flip_rot).cos();
    let i_sin = height * (edge.theta + flip_rot).sin();
    let diag_rot_l = 0.5 * (i_cos * i_cos + i_sin * i_sin).sqrt();
    let mut rho_f = diag_rot_l - sign * edge.rho;
    let mut rho_min = diag_rot_l * rho_min_perc;
    if flip_rot != 0.0 {
        std::mem::swap(&mut rho_f, &mut rho_min);
    }
    let w_f = if rho_min <= rho_f { 2.0 - rho_min / rho_f } else { rho_f / rho_min };

    if edge.is_max {
        sign *= -1.0;
    }
    if !towards_tip {
        sign *= -1.0;
    }

    let omega = edge.theta + sign * FRAC_PI_2 * w_f;
    Heading { rho: rho_step, theta: omega.rem_euclid(2.0 * PI) }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HeadingEngine {
    current_hor_edge: Option<EdgeHeading>,
    current_vert_edge: Option<EdgeHeading>,
    current_blade_heading: Option<Heading>,
    following_horizontal_edges: Option<bool>,
    towards_tip: bool,
}

impl HeadingEngine {
    pub fn new(default_towards_tip: bool) -> Self {
        Self { towards_tip: default_towards_tip, ..Default::default() }
    }

    pub fn towards_tip(&self) -> bool {
        self.towards_tip
    }

    pub fn following_horizontal_edges(&self) -> Option<bool> {
        self.following_horizontal_edges
    }

    /// The most recently synthesised heading, if any — Coordinator's
    /// fallback when a pipeline stage upstream of `step` fails and no
    /// fresh heading can be computed this iteration.
    pub fn last_heading(&self) -> Option<Heading> {
        self.current_blade_heading
    }

    /// Reset orientation lock and stored headings without affecting
    /// `towards_tip`.
    pub fn reset_heading(&mut self) {
        self.current_hor_edge = None;
        self.current_vert_edge = None;
        self.current_blade_heading = None;
        self.following_horizontal_edges = None;
    }

    /// Run all six stages for one iteration. `edges` is
    /// `[max_hor, min_hor, max_vert, min_vert]` as produced by
    /// EdgeFinder. Returns the selected heading for this iteration and
    /// whether tip/root was detected.
    pub fn step(
        &mut self,
        edges: [EdgeHeading; 4],
        rho_step: f64,
        rho_min_perc: f64,
        width: f64,
        height: f64,
        root_sensor: &dyn RootSensor,
    ) -> Result<(Heading, bool), VisionFault> {
        let diag = (width * width + height * height).sqrt();

        let hor_candidates: Vec<EdgeHeading> =
            edges.iter().filter(|e| e.is_horizontal).filter_map(|&e| normalize_and_filter(e, width, height)).collect();
        let vert_candidates: Vec<EdgeHeading> =
            edges.iter().filter(|e| !e.is_horizontal).filter_map(|&e| normalize_and_filter(e, width, height)).collect();

        if hor_candidates.is_empty() && vert_candidates.is_empty() {
            return match self.current_blade_heading {
                Some(heading) => Ok((heading, false)),
                None => Err(VisionFault::NoBackupHeadingAvailable),
            };
        }

        let selected_hor = closest_to(&hor_candidates, self.current_hor_edge.map(|e| e.rho));
        let selected_vert = closest_to(&vert_candidates, self.current_vert_edge.map(|e| e.rho));

        if self.following_horizontal_edges.is_none() {
            self.following_horizontal_edges = Some(match (selected_hor, selected_vert) {
                (None, _) => false,
                (_, None) => true,
                (Some(h), Some(v)) => h.rho < v.rho,
            });
        }
        let following_horizontal = self.following_horizontal_edges.unwrap();

        let (followed, tip_candidate) = if following_horizontal {
            (hor_candidates.clone(), selected_vert)
        } else {
            (vert_candidates.clone(), selected_hor)
        };

        let blade_heading = find_heading(&followed, self.towards_tip, rho_step, rho_min_perc, width, height);

        self.current_hor_edge = selected_hor.or(self.current_hor_edge);
        self.current_vert_edge = selected_vert.or(self.current_vert_edge);
        self.current_blade_heading = Some(blade_heading);

        if self.towards_tip {
            let tip_detected = tip_candidate.is_some_and(|e| e.rho <= diag / 3.0);
            if tip_detected {
                self.towards_tip = false;
                let tip = tip_candidate.unwrap();
                let heading = Heading { rho: tip.rho, theta: (tip.theta + FRAC_PI_2).rem_euclid(2.0 * PI) };
                return Ok((heading, true));
            }
            Ok((blade_heading, false))
        } else {
            if root_sensor.root_detected() {
                return Ok((Heading { rho: 0.0, theta: 0.0 }, true));
            }
            Ok((blade_heading, false))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::NullRootSensor;

    fn edge(rho: f64, theta: f64, is_max: bool, is_horizontal: bool) -> EdgeHeading {
        EdgeHeading { rho, theta, is_max, is_horizontal }
    }

    #[test]
    fn normalize_and_filter_always_yields_nonnegative_rho_and_wrapped_theta() {
        let raw = edge(-50.0, -0.3, true, true); // negative rho, negative theta
        let normalized = normalize_and_filter(raw, 640.0, 480.0).expect("not near a border");
        assert!(normalized.rho >= 0.0);
        assert!(normalized.theta >= 0.0 && normalized.theta < 2.0 * PI);
    }

    #[test]
    fn step_errors_without_history_when_no_edges_survive() {
        let mut engine = HeadingEngine::new(true);
        let edges = [
            edge(5.0, 0.0, true, true),
            edge(5.0, 0.0, false, true),
            edge(5.0, 0.0, true, false),
            edge(5.0, 0.0, false, false),
        ];
        let result = engine.step(edges, 100.0, 0.25, 640.0, 480.0, &NullRootSensor);
        assert!(matches!(result, Err(VisionFault::NoBackupHeadingAvailable)));
    }

    #[test]
    fn step_locks_orientation_once() {
        let mut engine = HeadingEngine::new(true);
        let edges = [
            edge(450.0, PI * 1.5, true, true),
            edge(10.0, 0.0, false, true),
            edge(300.0, FRAC_PI_2, true, false),
            edge(300.0, 1.5 * PI, false, false),
        ];
        let (_, _) = engine.step(edges, 100.0, 0.25, 640.0, 480.0, &NullRootSensor).unwrap();
        let locked = engine.following_horizontal_edges();
        assert!(locked.is_some());
        let (_, _) = engine.step(edges, 100.0, 0.25, 640.0, 480.0, &NullRootSensor).unwrap();
        assert_eq!(locked, engine.following_horizontal_edges());
    }

    #[test]
    fn following_horizontal_edges_locks_and_ignores_later_reversal() {
        let mut engine = HeadingEngine::new(true);
        // selected_hor.rho (10) < selected_vert.rho (300): locks horizontal.
        let lock_edges = [
            edge(-230.0, 1.5 * PI, true, true),
            edge(310.0, 0.0, false, true),
            edge(540.0, FRAC_PI_2, true, false),
            edge(540.0, FRAC_PI_2, false, false),
        ];
        engine.step(lock_edges, 100.0, 0.25, 640.0, 480.0, &NullRootSensor).unwrap();
        assert_eq!(engine.following_horizontal_edges(), Some(true));

        // same hor edges, but vert now normalises to rho 5 < hor's 10 —
        // the inequality that drove the lock has reversed.
        let reversed_edges = [
            edge(-230.0, 1.5 * PI, true, true),
            edge(310.0, 0.0, false, true),
            edge(245.0, FRAC_PI_2, true, false),
            edge(245.0, FRAC_PI_2, false, false),
        ];
        engine.step(reversed_edges, 100.0, 0.25, 640.0, 480.0, &NullRootSensor).unwrap();
        assert_eq!(engine.following_horizontal_edges(), Some(true));
    }

    #[test]
    fn find_heading_single_edge_weight_matches_the_rho_f_rho_min_ratio() {
        let width = 640.0;
        let height = 480.0;
        let rho_min_perc = 0.3;
        let e = edge(100.0, FRAC_PI_2, true, true);

        let heading = find_heading(&[e], true, 50.0, rho_min_perc, width, height);
        assert_eq!(heading.rho, 50.0); // rho_step, the steady-state invariant

        // re-derive W = weight(rho_f, rho_min) exactly as find_heading does,
        // to check the documented sign(theta-theta_edge)*(theta-theta_edge)
        // == (pi/2)*W relationship holds for this edge.
        let diag_rot_l = 0.5 * (width * e.theta.cos()).hypot(height * e.theta.sin());
        let rho_f = diag_rot_l - e.rho;
        let rho_min = diag_rot_l * rho_min_perc;
        let w = if rho_min <= rho_f { 2.0 - rho_min / rho_f } else { rho_f / rho_min };

        let mut diff = heading.theta - e.theta;
        while diff > PI {
            diff -= 2.0 * PI;
        }
        while diff < -PI {
            diff += 2.0 * PI;
        }
        assert!((diff.signum() * diff - FRAC_PI_2 * w).abs() < 1e-9);
    }

    #[test]
    fn tip_reversal_flips_towards_tip_only_on_the_final_shrinking_frame() {
        let width = 800.0;
        let height = 600.0;
        // diag = sqrt(800^2+600^2) == 1000.0, so diag/3 ~= 333.3 and
        // 0.20*diag == 200.0, matching the rho_sequence below.
        let rho_min_perc = 0.25;

        // followed family: a single horizontal edge, held fixed across
        // every iteration so its synthesised heading (theta == 0, by
        // construction below) is the "previous" heading to compare
        // against once the tip flip fires.
        let followed_max_hor = edge(525.0, FRAC_PI_2, true, true);
        let filtered_min_hor = edge(0.0, FRAC_PI_2, false, true); // normalises near the border, dropped

        let mut engine = HeadingEngine::new(true);
        // perpendicular edge distance (post-normalisation rho) shrinking
        // each frame: 500, 450, 400, 350 stay above diag/3 (~333.3); the
        // final frame's 200 == 0.20*diag is well inside the tip band.
        let rho_sequence = [500.0, 450.0, 400.0, 350.0, 200.0];
        let mut last_theta = None;
        for (i, &rho_n) in rho_sequence.iter().enumerate() {
            let raw_rho = rho_n + width / 2.0; // invert normalize_and_filter's theta==0 centring
            let tip_edge_max = edge(raw_rho, 0.0, true, false);
            let tip_edge_min = edge(raw_rho, 0.0, false, false);
            let edges = [followed_max_hor, filtered_min_hor, tip_edge_max, tip_edge_min];

            let (heading, tip_detected) =
                engine.step(edges, 100.0, rho_min_perc, width, height, &NullRootSensor).unwrap();

            if i < rho_sequence.len() - 1 {
                assert!(!tip_detected, "iteration {i} should not have detected the tip yet");
                assert!(engine.towards_tip());
                last_theta = Some(heading.theta);
            } else {
                assert!(tip_detected, "final iteration should detect the tip");
                assert!(!engine.towards_tip());
                let prev = last_theta.unwrap();
                let mut diff = (heading.theta - prev).abs();
                if diff > PI {
                    diff = 2.0 * PI - diff;
                }
                assert!((diff - FRAC_PI_2).to_degrees().abs() < 1.0, "expected a ~90 degree flip, got {diff}");
            }
        }
    }

    #[test]
    fn tip_arrival_command_rotates_heading_by_a_quarter_turn_and_flips_state() {
        let mut engine = HeadingEngine::new(true);
        let width = 800.0;
        let height = 600.0;
        // a tip candidate that normalises to (rho=300, theta=0.1),
        // comfortably inside the diag/3 (~333.3) tip-detection band.
        let cx = width / 2.0;
        let cy = height / 2.0;
        let theta_n = 0.1;
        let rho_n = 300.0;
        let raw_rho = rho_n + cx * theta_n.cos() + cy * theta_n.sin();

        let edges = [
            edge(525.0, FRAC_PI_2, true, true),
            edge(0.0, FRAC_PI_2, false, true),
            edge(raw_rho, theta_n, true, false),
            edge(raw_rho, theta_n, false, false),
        ];
        let (heading, tip_detected) = engine.step(edges, 100.0, 0.25, width, height, &NullRootSensor).unwrap();
        assert!(tip_detected);
        assert!((heading.rho - 300.0).abs() < 1e-9);
        assert!((heading.theta - (0.1 + FRAC_PI_2)).abs() < 1e-9);
        assert!(!engine.towards_tip());
    }

    #[test]
    fn tip_detection_flips_direction() {
        let mut engine = HeadingEngine::new(true);
        // vertical edge close to centre (small rho after centring) acts
        // as the tip candidate once horizontal is the followed family
        let edges = [
            edge(450.0, PI * 1.5, true, true),
            edge(10.0, 0.0, false, true),
            edge(322.0, FRAC_PI_2, true, false), // near centre x=320 -> tiny centred rho
            edge(322.0, 1.5 * PI, false, false),
        ];
        let (_, _) = engine.step(edges, 100.0, 0.25, 640.0, 480.0, &NullRootSensor).unwrap();
        assert!(!engine.towards_tip());
    }
}
