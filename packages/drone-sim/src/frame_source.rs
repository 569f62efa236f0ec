//! A moving blade edge with an overlaid laser dot grid, rendered as a
//! normal/structured-light frame pair with Gaussian pixel noise —
//! matches `camera.rs`'s `FrameSource` without any hardware behind it.
//!
//! Both frames are 3-channel color: the blade/background stay
//! achromatic (equal R/G/B), and the laser dots are painted with
//! R==G and a low B, landing inside `frame_ops::green_mask`'s HSV
//! window the same way the real laser's dot color does.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use vision_types::camera::FrameSource;
use vision_types::{CameraFault, Frame};

const BACKGROUND_LEVEL: u8 = 40;
const BLADE_LEVEL: u8 = 200;
const DOT_LEVEL_HIGH: u8 = 250;
const DOT_LEVEL_LOW: u8 = 20;
const DOT_RADIUS: f64 = 1.5;

/// Renders `(normal, structured)` frame pairs depicting a blade
/// boundary sweeping through the frame as the drone advances, with a
/// regular laser-dot grid on the blade face in the structured frame.
pub struct SimFrameSource {
    width: u32,
    height: u32,
    dot_spacing: f64,
    noise_sigma: f64,
    step_px: f64,
    /// Row (from the top) where the blade boundary currently sits.
    edge_offset: f64,
    armed: bool,
    rng: StdRng,
}

impl SimFrameSource {
    pub fn new(width: u32, height: u32, dot_spacing: f64, noise_sigma: f64, step_px: f64) -> Self {
        Self::with_seed(width, height, dot_spacing, noise_sigma, step_px, 0.75 * height as f64, 42)
    }

    pub fn with_seed(width: u32, height: u32, dot_spacing: f64, noise_sigma: f64, step_px: f64, initial_edge_offset: f64, seed: u64) -> Self {
        Self { width, height, dot_spacing, noise_sigma, step_px, edge_offset: initial_edge_offset, armed: false, rng: StdRng::seed_from_u64(seed) }
    }

    pub fn edge_offset(&self) -> f64 {
        self.edge_offset
    }

    /// True once the blade boundary has swept past the top of the
    /// frame — the synthetic stand-in for "tip reached".
    pub fn at_bound(&self) -> bool {
        self.edge_offset <= 0.0 || self.edge_offset >= self.height as f64
    }

    fn render(&mut self) -> (Frame, Frame) {
        let (w, h) = (self.width as usize, self.height as usize);
        let noise = Normal::new(0.0, self.noise_sigma).unwrap();
        let mut normal = vec![0u8; w * h * 3];
        for y in 0..h {
            let base = if (y as f64) < self.edge_offset { BLADE_LEVEL } else { BACKGROUND_LEVEL };
            for x in 0..w {
                let n = noise.sample(&mut self.rng);
                let level = (base as f64 + n).clamp(0.0, 255.0) as u8;
                let idx = (y * w + x) * 3;
                normal[idx] = level;
                normal[idx + 1] = level;
                normal[idx + 2] = level;
            }
        }

        let mut structured = normal.clone();
        if self.edge_offset > 0.0 {
            let mut gy = self.dot_spacing / 2.0;
            while gy < self.edge_offset {
                let mut gx = self.dot_spacing / 2.0;
                while gx < self.width as f64 {
                    paint_dot(&mut structured, w, h, gx, gy);
                    gx += self.dot_spacing;
                }
                gy += self.dot_spacing;
            }
        }

        (Frame::new_color(self.width, self.height, normal), Frame::new_color(self.width, self.height, structured))
    }
}

/// Paints a laser dot with R==G (high) and B (low) — lands at hue 60
/// in `frame_ops::rgb_to_hsv`'s convention, inside `green_mask`'s
/// default window.
fn paint_dot(data: &mut [u8], w: usize, h: usize, cx: f64, cy: f64) {
    let r = DOT_RADIUS.ceil() as i64;
    let (icx, icy) = (cx.round() as i64, cy.round() as i64);
    for dy in -r..=r {
        for dx in -r..=r {
            if (dx * dx + dy * dy) as f64 > DOT_RADIUS * DOT_RADIUS {
                continue;
            }
            let (x, y) = (icx + dx, icy + dy);
            if x < 0 || y < 0 || x as usize >= w || y as usize >= h {
                continue;
            }
            let idx = (y as usize * w + x as usize) * 3;
            data[idx] = DOT_LEVEL_HIGH;
            data[idx + 1] = DOT_LEVEL_HIGH;
            data[idx + 2] = DOT_LEVEL_LOW;
        }
    }
}

impl FrameSource for SimFrameSource {
    fn arm(&mut self) -> Result<(), CameraFault> {
        self.armed = true;
        Ok(())
    }

    fn capture(&mut self) -> Result<(Frame, Frame), CameraFault> {
        if !self.armed {
            return Err(CameraFault::NotConnected);
        }
        self.armed = false;
        let frames = self.render();
        self.edge_offset -= self.step_px;
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_requires_arm_first() {
        let mut source = SimFrameSource::new(64, 64, 8.0, 0.0, 2.0);
        assert!(matches!(source.capture(), Err(CameraFault::NotConnected)));
        source.arm().unwrap();
        assert!(source.capture().is_ok());
    }

    #[test]
    fn blade_boundary_advances_each_capture() {
        let mut source = SimFrameSource::with_seed(64, 64, 8.0, 0.0, 5.0, 40.0, 7);
        source.arm().unwrap();
        source.capture().unwrap();
        assert_eq!(source.edge_offset(), 35.0);
    }

    #[test]
    fn structured_frame_differs_from_normal_when_dots_present() {
        let mut source = SimFrameSource::with_seed(64, 64, 8.0, 0.0, 1.0, 40.0, 1);
        source.arm().unwrap();
        let (normal, structured) = source.capture().unwrap();
        assert_ne!(normal.data, structured.data);
    }

    #[test]
    fn frames_are_color_with_a_maskable_green_dot() {
        let mut source = SimFrameSource::with_seed(64, 64, 8.0, 0.0, 1.0, 40.0, 1);
        source.arm().unwrap();
        let (normal, structured) = source.capture().unwrap();
        assert_eq!(normal.channels, 3);
        assert_eq!(structured.channels, 3);
        // a dot is painted at (gx, gy) = (4.0, 4.0); its pixel must sit
        // inside `frame_ops::green_mask`'s HSV window: R==G (high), B low.
        let idx = (4 * 64 + 4) * 3;
        assert_eq!(structured.data[idx], DOT_LEVEL_HIGH);
        assert_eq!(structured.data[idx + 1], DOT_LEVEL_HIGH);
        assert_eq!(structured.data[idx + 2], DOT_LEVEL_LOW);
    }
}
