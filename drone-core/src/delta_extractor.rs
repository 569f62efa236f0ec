//! C2 — DeltaExtractor. From a normal/structured frame pair, produce a
//! binary mask of pixels brightened by the structured-light laser.

use vision_types::{Frame, VisionFault};

use crate::frame_ops::to_gray;

const GAUSS_5: [i32; 5] = [1, 4, 6, 4, 1];
const GAUSS_5_NORM: i32 = 16 * 16; // separable: applied in x then y

fn gaussian_blur_5x5(w: u32, h: u32, data: &[u8]) -> Vec<u8> {
    let wi = w as i64;
    let hi = h as i64;
    let get = |x: i64, y: i64| -> i32 {
        let xc = x.clamp(0, wi - 1) as usize;
        let yc = y.clamp(0, hi - 1) as usize;
        data[yc * w as usize + xc] as i32
    };
    let mut horiz = vec![0i32; (w * h) as usize];
    for y in 0..hi {
        for x in 0..wi {
            let mut acc = 0;
            for (k, &weight) in GAUSS_5.iter().enumerate() {
                acc += weight * get(x + k as i64 - 2, y);
            }
            horiz[(y * wi + x) as usize] = acc;
        }
    }
    let mut out = vec![0u8; (w * h) as usize];
    for y in 0..hi {
        for x in 0..wi {
            let mut acc = 0;
            for (k, &weight) in GAUSS_5.iter().enumerate() {
                let yy = (y + k as i64 - 2).clamp(0, hi - 1);
                acc += weight * horiz[(yy * wi + x) as usize];
            }
            out[(y * wi + x) as usize] = (acc / GAUSS_5_NORM).clamp(0, 255) as u8;
        }
    }
    out
}

/// Per-pixel absolute difference between grayscale-widened normal and
/// structured-light frames, 5x5 gaussian smoothed, thresholded to a
/// binary mask.
pub fn delta(normal: &Frame, structured: &Frame, threshold: i32) -> Result<Frame, VisionFault> {
    if normal.width != structured.width || normal.height != structured.height {
        return Err(VisionFault::ShapeMismatch {
            expected: normal.pixel_count(),
            actual: structured.pixel_count(),
        });
    }
    let a = to_gray(normal);
    let b = to_gray(structured);
    let diff: Vec<u8> = a
        .data
        .iter()
        .zip(b.data.iter())
        .map(|(&x, &y)| (x as i32 - y as i32).unsigned_abs() as u8)
        .collect();
    let smoothed = gaussian_blur_5x5(a.width, a.height, &diff);
    let mask: Vec<u8> = smoothed
        .into_iter()
        .map(|v| if v as i32 >= threshold { 255 } else { 0 })
        .collect();
    Ok(Frame::new_gray(a.width, a.height, mask))
}

fn morph(w: u32, h: u32, data: &[u8], k: u32, iters: u32, dilate: bool) -> Vec<u8> {
    let half = (k / 2) as i64;
    let mut cur = data.to_vec();
    for _ in 0..iters {
        let mut next = vec![0u8; cur.len()];
        for y in 0..h as i64 {
            for x in 0..w as i64 {
                let mut acc = if dilate { 0u8 } else { 255u8 };
                for dy in -half..=half {
                    for dx in -half..=half {
                        let xc = (x + dx).clamp(0, w as i64 - 1) as usize;
                        let yc = (y + dy).clamp(0, h as i64 - 1) as usize;
                        let v = cur[yc * w as usize + xc];
                        acc = if dilate { acc.max(v) } else { acc.min(v) };
                    }
                }
                next[(y * w as i64 + x) as usize] = acc;
            }
        }
        cur = next;
    }
    cur
}

/// Optionally erodes then dilates the mask; any positive value after
/// processing is forced to 255. `erode_k == 0` or `erode_iters == 0`
/// skips erosion (and likewise for dilation). The default configuration
/// (`erode_iters == 0 && dilate_iters == 0`) performs only a small
/// gaussian blur, matching the source's default enhance behaviour.
pub fn enhance(
    mask: &Frame,
    erode_k: u32,
    erode_iters: u32,
    dilate_k: u32,
    dilate_iters: u32,
) -> Frame {
    let mut data = mask.data.clone();
    if erode_iters > 0 && erode_k > 0 {
        data = morph(mask.width, mask.height, &data, erode_k, erode_iters, false);
    }
    if dilate_iters > 0 && dilate_k > 0 {
        data = morph(mask.width, mask.height, &data, dilate_k, dilate_iters, true);
    }
    if erode_iters == 0 && dilate_iters == 0 {
        data = gaussian_blur_5x5(mask.width, mask.height, &data);
    }
    for v in &mut data {
        if *v > 0 {
            *v = 255;
        }
    }
    Frame::new_gray(mask.width, mask.height, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_flags_brightened_pixel() {
        let normal = Frame::new_gray(3, 3, vec![10; 9]);
        let mut sl_data = vec![10; 9];
        sl_data[4] = 250; // center pixel brightened by the laser
        let structured = Frame::new_gray(3, 3, sl_data);
        let mask = delta(&normal, &structured, 10).unwrap();
        // the smoothing spreads some signal to neighbours too, but the
        // center must clear the threshold
        assert!(mask.data[4] == 255);
    }

    #[test]
    fn delta_is_zero_on_identical_frames() {
        let normal = Frame::new_gray(4, 4, vec![77; 16]);
        let structured = Frame::new_gray(4, 4, vec![77; 16]);
        let mask = delta(&normal, &structured, 10).unwrap();
        assert!(mask.data.iter().all(|&v| v == 0));
    }

    #[test]
    fn enhance_forces_binary_output() {
        let mask = Frame::new_gray(3, 3, vec![0, 5, 0, 5, 5, 5, 0, 5, 0]);
        let out = enhance(&mask, 0, 0, 0, 0);
        assert!(out.data.iter().all(|&v| v == 0 || v == 255));
    }
}
