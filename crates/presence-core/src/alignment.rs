//! Face alignment via 4-DOF similarity transform.
//!
//! Warps a detected face into the canonical 112×112 ArcFace crop using the
//! five InsightFace reference landmarks and least-squares estimation.

use crate::frame::RgbFrame;

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

const ALIGNED_SIZE: usize = 112;

/// 4-DOF similarity transform (scale, rotation, translation):
///
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
struct SimilarityTransform {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl SimilarityTransform {
    /// Least-squares estimate mapping `src` landmarks onto `dst` landmarks.
    fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        // Overdetermined system A * [a, b, tx, ty]^T = B.
        // Each point pair (sx, sy) -> (dx, dy) contributes:
        //   sx * a - sy * b + tx = dx
        //   sy * a + sx * b + ty = dy
        let mut ata = [0.0f32; 16]; // 4x4, row-major
        let mut atb = [0.0f32; 4];

        for i in 0..5 {
            let (sx, sy) = src[i];
            let (dx, dy) = dst[i];

            let r1 = [sx, -sy, 1.0, 0.0];
            let r2 = [sy, sx, 0.0, 1.0];

            for j in 0..4 {
                for k in 0..4 {
                    ata[j * 4 + k] += r1[j] * r1[k] + r2[j] * r2[k];
                }
                atb[j] += r1[j] * dx + r2[j] * dy;
            }
        }

        let x = solve_4x4(&ata, &atb);
        SimilarityTransform {
            a: x[0],
            b: x[1],
            tx: x[2],
            ty: x[3],
        }
    }

    /// Map an output-space point back to source-space coordinates.
    ///
    /// Returns `None` when the transform is degenerate (zero scale).
    fn invert_point(&self, x: f32, y: f32) -> Option<(f32, f32)> {
        // det of the 2x2 part [[a, -b], [b, a]] is a^2 + b^2.
        let det = self.a * self.a + self.b * self.b;
        if det.abs() < 1e-12 {
            return None;
        }
        let dx = x - self.tx;
        let dy = y - self.ty;
        let sx = (self.a * dx + self.b * dy) / det;
        let sy = (-self.b * dx + self.a * dy) / det;
        Some((sx, sy))
    }
}

/// Solve a 4×4 linear system via Gaussian elimination with partial pivoting.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(ata: &[f32; 16], atb: &[f32; 4]) -> [f32; 4] {
    // Augmented matrix [A | b] as 4x5
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        for j in 0..4 {
            m[i][j] = ata[i * 4 + j];
        }
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let mut max_row = col;
        let mut max_val = m[col][col].abs();
        for row in (col + 1)..4 {
            if m[row][col].abs() > max_val {
                max_val = m[row][col].abs();
                max_row = row;
            }
        }
        m.swap(col, max_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return [1.0, 0.0, 0.0, 0.0]; // fallback: identity-ish
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }

    x
}

/// Align a detected face to the canonical 112×112 RGB crop.
///
/// Estimates the similarity transform from the five detected landmarks to
/// the reference positions and warps with bilinear interpolation.
/// Out-of-frame samples are filled with black.
pub fn align_face(frame: &RgbFrame, landmarks: &[(f32, f32); 5]) -> Vec<u8> {
    let transform = SimilarityTransform::estimate(landmarks, &REFERENCE_LANDMARKS_112);

    let w = frame.width as i32;
    let h = frame.height as i32;
    let mut output = vec![0u8; ALIGNED_SIZE * ALIGNED_SIZE * 3];

    for oy in 0..ALIGNED_SIZE {
        for ox in 0..ALIGNED_SIZE {
            let Some((sx, sy)) = transform.invert_point(ox as f32, oy as f32) else {
                return output;
            };

            let x0 = sx.floor() as i32;
            let y0 = sy.floor() as i32;
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            let sample = |x: i32, y: i32, c: usize| -> f32 {
                if x >= 0 && x < w && y >= 0 && y < h {
                    frame.data[(y as usize * w as usize + x as usize) * 3 + c] as f32
                } else {
                    0.0
                }
            };

            for c in 0..3 {
                let val = sample(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
                    + sample(x0 + 1, y0, c) * fx * (1.0 - fy)
                    + sample(x0, y0 + 1, c) * (1.0 - fx) * fy
                    + sample(x0 + 1, y0 + 1, c) * fx * fy;

                output[(oy * ALIGNED_SIZE + ox) * 3 + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    output
}
