//! # vision-types
//!
//! Shared data model for the blade-inspection vision stack.
//!
//! These types are used by:
//! - `drone-core`: both the MASTER and SLAVE roles of the coordination
//!   protocol, and every stage of the CV pipeline (C1-C8).
//! - `drone-sim`: the synthetic frame/keypoint generator used by the
//!   `simulate` CLI surface and by integration tests.
//!
//! ## Coordinate conventions
//!
//! - **Image frame**: origin top-left, X right, Y down, in pixels.
//! - **Image-centre polar**: origin at the frame centre; `Heading`s and
//!   normalised edges are expressed here (`ρ` = distance, `θ` = angle).
//! - **Camera frame** (`Point3D`): right-handed, Z = depth (forward from
//!   the lens), units millimeters.
//!
//! ## Invariants
//! - All frames within one Coordinator iteration share one shape after
//!   the initial downscale.
//! - `HoughLine.theta` is one of exactly `{0, pi/2}` for grid lines;
//!   free-angle for boundary edges.
//! - `Heading.rho >= 0`, `Heading.theta` in `[0, 2*pi)`, with the
//!   `(0.0, 0.0)` sentinel reserved for mission-complete.

use serde::{Deserialize, Serialize};

pub mod camera;
pub mod error;
pub mod protocol;

pub use error::{CalibrationFault, CameraFault, ProtocolFault, VisionFault};

// ── Frame ──────────────────────────────────────────────────────────────────

/// Rectangular 8-bit pixel grid, grayscale (`channels == 1`) or color
/// (`channels == 3`), row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new_gray(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self { width, height, channels: 1, data }
    }

    pub fn new_color(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self { width, height, channels: 3, data }
    }

    pub fn is_gray(&self) -> bool {
        self.channels == 1
    }

    /// Diagonal length of the frame, in pixels.
    pub fn diagonal(&self) -> f64 {
        ((self.width * self.width + self.height * self.height) as f64).sqrt()
    }

    pub fn shape(&self) -> (u32, u32) {
        (self.height, self.width)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }

    /// `Ok(())` iff `self.data.len()` matches `width*height*channels`.
    pub fn check_shape(&self) -> Result<(), VisionFault> {
        if self.data.len() == self.pixel_count() {
            Ok(())
        } else {
            Err(VisionFault::ShapeMismatch {
                expected: self.pixel_count(),
                actual: self.data.len(),
            })
        }
    }
}

// ── Keypoint / Descriptor / Match ───────────────────────────────────────────

/// A detected structured-light dot, centre in pixel coordinates of the
/// undistorted frame. `angle`/`octave`/`class_id` exist only for wire
/// parity with detector backends that populate them (ORB/SIFT/SURF);
/// the shipped simple-blob backend leaves them at their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub size: f32,
    pub angle: f32,
    pub response: f32,
    pub octave: i32,
    pub class_id: i32,
}

impl Keypoint {
    pub fn centered(x: f32, y: f32, size: f32) -> Self {
        Self { x, y, size, angle: 0.0, response: 0.0, octave: 0, class_id: -1 }
    }

    pub fn distance_to(&self, other: &Keypoint) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Fixed-length descriptor vector accompanying a keypoint; empty when
/// block-match is in use.
pub type Descriptor = Vec<f32>;

/// A paired keypoint between the left and right view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub left_index: usize,
    pub right_index: usize,
    pub distance: f32,
}

// ── Geometry: HoughLine / BoundedSegment / EdgeHeading / Heading ───────────

/// `(rho, theta)`. Grid lines restrict `theta` to `{0, pi/2}`; boundary
/// edge lines use free `theta` in `[0, pi)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HoughLine {
    pub rho: f64,
    pub theta: f64,
}

/// A hough line clipped to the convex hull of the keypoints that voted
/// for it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundedSegment {
    pub line: HoughLine,
    pub p1: (f64, f64),
    pub p2: (f64, f64),
}

impl BoundedSegment {
    pub fn midpoint(&self) -> (f64, f64) {
        ((self.p1.0 + self.p2.0) / 2.0, (self.p1.1 + self.p2.1) / 2.0)
    }
}

/// `(rho, theta, is_max, is_horizontal)`. `is_max` is true for the
/// bottom/right boundary, false for top/left; `is_horizontal` selects
/// the orientation family.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeHeading {
    pub rho: f64,
    pub theta: f64,
    pub is_max: bool,
    pub is_horizontal: bool,
}

/// `(rho, theta)` in image-centre polar coordinates; `(0.0, 0.0)` is the
/// sentinel for "mission complete".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Heading {
    pub rho: f64,
    pub theta: f64,
}

impl Heading {
    pub const COMPLETE: Heading = Heading { rho: 0.0, theta: 0.0 };

    pub fn is_complete(&self) -> bool {
        self.rho == 0.0 && self.theta == 0.0
    }
}

// ── Point3D ─────────────────────────────────────────────────────────────

/// Camera-frame 3D point, millimeters. `z < 0` is never emitted by
/// Stereopsis — it is filtered before the point leaves the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3D {
    pub fn is_valid(&self) -> bool {
        self.z >= 0.0 && self.z.is_finite()
    }
}

// ── CoordinatorState ────────────────────────────────────────────────────

/// Process-wide phase of the master/slave mission, mutated only by
/// HeadingEngine transitions and Coordinator lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinatorPhase {
    Init,
    Calibrating,
    Ready,
    Running,
    Reversing,
    Finished,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorState {
    pub phase: CoordinatorPhase,
    pub towards_tip: bool,
    /// `None` until the first orientation lock; set at most once per
    /// mission, reset only by an explicit `ResetHeading`.
    pub following_horizontal_edges: Option<bool>,
    pub iteration: u64,
    pub session_timestamp: String,
}

impl CoordinatorState {
    pub fn new(session_timestamp: String) -> Self {
        Self {
            phase: CoordinatorPhase::Init,
            towards_tip: true,
            following_horizontal_edges: None,
            iteration: 0,
            session_timestamp,
        }
    }

    pub fn reset_heading(&mut self) {
        self.following_horizontal_edges = None;
    }
}
