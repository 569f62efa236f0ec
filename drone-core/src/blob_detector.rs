//! C3 — BlobDetector. Extract keypoints (centre, size) and optional
//! descriptors from the delta mask. Four selectable back-ends are
//! named by the config surface; only `SimpleBlob` has a concrete
//! in-crate implementation (see `SPEC_FULL.md` section 4.3's Open
//! Question decision) — the others are accepted at configuration time
//! and fail at `detect()` with `VisionFault::DetectorUnavailable`.

use vision_types::{Descriptor, Frame, Keypoint, VisionFault};

use crate::config::DetectorBackend;

#[derive(Debug, Clone, Copy)]
pub struct BlobDetector {
    pub backend: DetectorBackend,
    /// `0.5 * standard_spacing`, tuned by ScaleCalibrator.
    pub min_dist_between_blobs: f64,
    /// `0.1 * standard_blob_size`.
    pub min_area: f64,
    /// `3.5 * standard_blob_size`.
    pub max_area: f64,
}

impl BlobDetector {
    pub fn new(backend: DetectorBackend) -> Self {
        Self { backend, min_dist_between_blobs: 0.0, min_area: 0.0, max_area: f64::INFINITY }
    }

    /// Tune thresholds from a ScaleCalibrator result.
    pub fn tune(&mut self, standard_spacing: f64, standard_blob_size: f64) {
        self.min_dist_between_blobs = 0.5 * standard_spacing;
        self.min_area = 0.1 * standard_blob_size;
        self.max_area = 3.5 * standard_blob_size;
    }

    fn connected_component_blobs(&self, mask: &Frame) -> Vec<Keypoint> {
        let w = mask.width as usize;
        let h = mask.height as usize;
        let mut visited = vec![false; w * h];
        let mut blobs = Vec::new();
        let mut stack = Vec::new();
        for y0 in 0..h {
            for x0 in 0..w {
                let idx0 = y0 * w + x0;
                if visited[idx0] || mask.data[idx0] == 0 {
                    continue;
                }
                stack.push((x0, y0));
                visited[idx0] = true;
                let (mut sum_x, mut sum_y, mut count) = (0u64, 0u64, 0u64);
                while let Some((x, y)) = stack.pop() {
                    sum_x += x as u64;
                    sum_y += y as u64;
                    count += 1;
                    let neighbours = [
                        (x.wrapping_sub(1), y),
                        (x + 1, y),
                        (x, y.wrapping_sub(1)),
                        (x, y + 1),
                    ];
                    for (nx, ny) in neighbours {
                        if nx >= w || ny >= h {
                            continue;
                        }
                        let nidx = ny * w + nx;
                        if !visited[nidx] && mask.data[nidx] != 0 {
                            visited[nidx] = true;
                            stack.push((nx, ny));
                        }
                    }
                }
                let area = count as f64;
                if area < self.min_area || area > self.max_area {
                    continue;
                }
                let cx = sum_x as f64 / count as f64;
                let cy = sum_y as f64 / count as f64;
                // equivalent-diameter size estimate from blob area
                let size = 2.0 * (area / std::f64::consts::PI).sqrt();
                blobs.push(Keypoint::centered(cx as f32, cy as f32, size as f32));
            }
        }
        blobs
    }

    /// Raises `VisionFault::NoBlobs` if the result would be empty and
    /// `ignore_no_blobs_error` is false.
    pub fn detect(&self, mask: &Frame, ignore_no_blobs_error: bool) -> Result<Vec<Keypoint>, VisionFault> {
        let keypoints = match self.backend {
            DetectorBackend::SimpleBlob => self.connected_component_blobs(mask),
            other => return Err(VisionFault::DetectorUnavailable(format!("{other:?}"))),
        };
        if keypoints.is_empty() && !ignore_no_blobs_error {
            return Err(VisionFault::NoBlobs);
        }
        Ok(keypoints)
    }

    /// `SimpleBlob` has no native descriptor ability, so this always
    /// fails with `FeatureDescriptorNotAvailable` for the one backend
    /// this crate implements — matching the source's behaviour for any
    /// detector lacking descriptor support.
    pub fn detect_with_descriptors(
        &self,
        mask: &Frame,
        ignore_no_blobs_error: bool,
    ) -> Result<(Vec<Keypoint>, Vec<Descriptor>), VisionFault> {
        let _keypoints = self.detect(mask, ignore_no_blobs_error)?;
        match self.backend {
            DetectorBackend::SimpleBlob => Err(VisionFault::FeatureDescriptorNotAvailable),
            other => Err(VisionFault::DetectorUnavailable(format!("{other:?}"))),
        }
    }

    /// Merge keypoint pairs whose separation is below
    /// `min_dist_between_blobs`; of two merging blobs, the larger
    /// survives, with its descriptor (if any). Idempotent.
    pub fn concatenate_close(
        &self,
        keypoints: &[Keypoint],
        descriptors: &[Descriptor],
    ) -> (Vec<Keypoint>, Vec<Descriptor>) {
        let has_descriptors = descriptors.len() == keypoints.len();
        let mut alive: Vec<bool> = vec![true; keypoints.len()];
        loop {
            let mut merged_any = false;
            'outer: for i in 0..keypoints.len() {
                if !alive[i] {
                    continue;
                }
                for j in (i + 1)..keypoints.len() {
                    if !alive[j] {
                        continue;
                    }
                    if keypoints[i].distance_to(&keypoints[j]) < self.min_dist_between_blobs as f32 {
                        if keypoints[i].size >= keypoints[j].size {
                            alive[j] = false;
                        } else {
                            alive[i] = false;
                        }
                        merged_any = true;
                        break 'outer;
                    }
                }
            }
            if !merged_any {
                break;
            }
        }
        let mut out_kp = Vec::new();
        let mut out_desc = Vec::new();
        for (i, &keep) in alive.iter().enumerate() {
            if keep {
                out_kp.push(keypoints[i]);
                if has_descriptors {
                    out_desc.push(descriptors[i].clone());
                }
            }
        }
        (out_kp, out_desc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_mask_with_dots(w: u32, h: u32, dots: &[(u32, u32)]) -> Frame {
        let mut data = vec![0u8; (w * h) as usize];
        for &(x, y) in dots {
            data[(y * w + x) as usize] = 255;
        }
        Frame::new_gray(w, h, data)
    }

    #[test]
    fn detect_finds_isolated_blobs() {
        let mut det = BlobDetector::new(DetectorBackend::SimpleBlob);
        det.min_area = 0.0;
        det.max_area = 100.0;
        let mask = make_mask_with_dots(10, 10, &[(2, 2), (7, 7)]);
        let kp = det.detect(&mask, false).unwrap();
        assert_eq!(kp.len(), 2);
    }

    #[test]
    fn detect_empty_raises_no_blobs_unless_ignored() {
        let det = BlobDetector::new(DetectorBackend::SimpleBlob);
        let mask = Frame::new_gray(4, 4, vec![0; 16]);
        assert!(matches!(det.detect(&mask, false), Err(VisionFault::NoBlobs)));
        assert!(det.detect(&mask, true).unwrap().is_empty());
    }

    #[test]
    fn concatenate_close_keeps_larger_of_pair() {
        let det = BlobDetector { min_dist_between_blobs: 5.0, ..BlobDetector::new(DetectorBackend::SimpleBlob) };
        let keypoints = vec![
            Keypoint::centered(0.0, 0.0, 3.0),
            Keypoint::centered(1.0, 0.0, 6.0),
        ];
        let (out, _) = det.concatenate_close(&keypoints, &[]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].size, 6.0);
    }

    #[test]
    fn tune_sets_min_dist_to_half_standard_spacing() {
        let mut det = BlobDetector::new(DetectorBackend::SimpleBlob);
        det.tune(50.0, 20.0);
        assert_eq!(det.min_dist_between_blobs, 25.0);
        assert_eq!(det.min_area, 2.0);
        assert_eq!(det.max_area, 70.0);
    }

    #[test]
    fn concatenate_close_leaves_no_pair_closer_than_min_dist() {
        let det = BlobDetector { min_dist_between_blobs: 10.0, ..BlobDetector::new(DetectorBackend::SimpleBlob) };
        let keypoints = vec![
            Keypoint::centered(0.0, 0.0, 3.0),
            Keypoint::centered(4.0, 0.0, 5.0),
            Keypoint::centered(8.0, 0.0, 4.0),
            Keypoint::centered(100.0, 0.0, 6.0),
        ];
        let (out, _) = det.concatenate_close(&keypoints, &[]);
        for i in 0..out.len() {
            for j in (i + 1)..out.len() {
                assert!(out[i].distance_to(&out[j]) >= det.min_dist_between_blobs as f32);
            }
        }
    }

    #[test]
    fn concatenate_close_is_idempotent() {
        let det = BlobDetector { min_dist_between_blobs: 5.0, ..BlobDetector::new(DetectorBackend::SimpleBlob) };
        let keypoints = vec![
            Keypoint::centered(0.0, 0.0, 3.0),
            Keypoint::centered(1.0, 0.0, 6.0),
            Keypoint::centered(50.0, 50.0, 4.0),
        ];
        let (once, _) = det.concatenate_close(&keypoints, &[]);
        let (twice, _) = det.concatenate_close(&once, &[]);
        assert_eq!(once, twice);
    }
}
