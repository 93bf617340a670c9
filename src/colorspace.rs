//! Stateless colorspace math for the HDR tonemap pipeline.
//!
//! Everything operates on 4-component row vectors (`[f32; 4]`) with the
//! homogeneous coordinate fixed at 1, matching the scRGB convention used
//! throughout: linear Rec.709 primaries where 1.0 = 80 nits. The chain
//! Rec.709-linear ↔ XYZ ↔ LMS ↔ ICtCp follows ITU-R BT.2100-2; the
//! perceptual quantizer is SMPTE ST 2084.
//!
//! Inputs are clamped to zero before every exponentiation — negative
//! crosstalk residue from the matrix transforms would otherwise turn
//! into NaNs.

pub type Vec4 = [f32; 4];

/// 4×4 matrix applied as `row_vector * M`: component `i` of the result
/// is `Σ v[j] * rows[j][i]`.
#[derive(Clone, Copy, Debug)]
pub struct Mat4 {
    rows: [[f32; 4]; 4],
}

impl Mat4 {
    const fn new(rows: [[f32; 4]; 4]) -> Self {
        Self { rows }
    }

    /// `v * M` using all four components of `v`.
    pub fn transform(&self, v: Vec4) -> Vec4 {
        let mut out = [0.0f32; 4];
        for i in 0..4 {
            out[i] = v[0] * self.rows[0][i]
                + v[1] * self.rows[1][i]
                + v[2] * self.rows[2][i]
                + v[3] * self.rows[3][i];
        }
        out
    }

    /// `v * M` with the homogeneous coordinate forced to 1, so the
    /// result's `w` comes out of the matrix's last row (1 for every
    /// matrix in this module).
    pub fn transform_point(&self, v: Vec4) -> Vec4 {
        self.transform([v[0], v[1], v[2], 1.0])
    }
}

/// Linear Rec.709 → CIE XYZ (D65), IEC 61966-2-1 primaries.
pub const REC709_TO_XYZ: Mat4 = Mat4::new([
    [0.412_390_8, 0.212_639_0, 0.019_330_82, 0.0],
    [0.357_584_33, 0.715_168_65, 0.119_194_78, 0.0],
    [0.180_480_79, 0.072_192_32, 0.950_532_14, 0.0],
    [0.0, 0.0, 0.0, 1.0],
]);

/// CIE XYZ → linear Rec.709.
pub const XYZ_TO_REC709: Mat4 = Mat4::new([
    [3.240_969_9, -0.969_243_65, 0.055_630_08, 0.0],
    [-1.537_383_2, 1.875_967_5, -0.203_976_96, 0.0],
    [-0.498_610_76, 0.041_555_06, 1.056_971_5, 0.0],
    [0.0, 0.0, 0.0, 1.0],
]);

/// CIE XYZ → LMS cone response with the BT.2100 crosstalk matrix.
pub const XYZ_TO_LMS: Mat4 = Mat4::new([
    [0.3592, -0.1922, 0.0070, 0.0],
    [0.6976, 1.1004, 0.0749, 0.0],
    [-0.0358, 0.0755, 0.8434, 0.0],
    [0.0, 0.0, 0.0, 1.0],
]);

/// LMS cone response → CIE XYZ.
pub const LMS_TO_XYZ: Mat4 = Mat4::new([
    [2.070_180_1, 0.364_988_25, -0.049_595_54, 0.0],
    [-1.326_456_9, 0.680_467_36, -0.049_421_16, 0.0],
    [0.206_616_0, -0.045_421_75, 1.187_995_9, 0.0],
    [0.0, 0.0, 0.0, 1.0],
]);

/// PQ-encoded LMS → ICtCp (coefficients are /4096 rationals from
/// BT.2100: Ct = (6610L′ − 13613M′ + 7003S′)/4096, …).
pub const PQ_LMS_TO_ICTCP: Mat4 = Mat4::new([
    [0.5000, 1.6137, 4.3780, 0.0],
    [0.5000, -3.3234, -4.2455, 0.0],
    [0.0000, 1.7097, -0.1325, 0.0],
    [0.0, 0.0, 0.0, 1.0],
]);

/// ICtCp → PQ-encoded LMS.
pub const ICTCP_TO_PQ_LMS: Mat4 = Mat4::new([
    [1.0, 1.0, 1.0, 0.0],
    [0.008_605_145_7, -0.008_605_145_7, 0.560_048_86, 0.0],
    [0.111_035_60, -0.111_035_60, -0.320_637_47, 0.0],
    [0.0, 0.0, 0.0, 1.0],
]);

/// SMPTE ST 2084 constants, the exact rationals from the standard:
///
///   m1 = 2610 / 16384 = 0.1593017578125
///   m2 = 2523 / 32    = 78.84375
///   c1 = 3424 / 4096  = 0.8359375
///   c2 = 2413 / 128   = 18.8515625
///   c3 = 2392 / 128   = 18.6875
const PQ_M1: f32 = 2610.0 / 16384.0;
const PQ_M2: f32 = 2523.0 / 32.0;
const PQ_C1: f32 = 3424.0 / 4096.0;
const PQ_C2: f32 = 2413.0 / 128.0;
const PQ_C3: f32 = 2392.0 / 128.0;

/// PQ normalization for scRGB: ST 2084 spans 0..10,000 nits and scRGB
/// puts 1.0 at 80 nits, so full scale sits at 10000/80 = 125.
pub const MAX_PQ: f32 = 125.0;

#[inline]
fn pq_encode(v: f32) -> f32 {
    let p = v.max(0.0).powf(PQ_M1);
    ((PQ_C1 + PQ_C2 * p) / (1.0 + PQ_C3 * p)).powf(PQ_M2)
}

#[inline]
fn pq_decode(v: f32) -> f32 {
    let p = v.max(0.0).powf(1.0 / PQ_M2);
    let numerator = (p - PQ_C1).max(0.0);
    let denominator = PQ_C2 - PQ_C3 * p;
    (numerator / denominator).powf(1.0 / PQ_M1)
}

/// Elementwise ST 2084 forward transfer: linear (1.0 = `max_pq`⁻¹ of
/// full scale) → PQ signal in [0, 1].
pub fn linear_to_pq(v: Vec4, max_pq: f32) -> Vec4 {
    [
        pq_encode(v[0] / max_pq),
        pq_encode(v[1] / max_pq),
        pq_encode(v[2] / max_pq),
        pq_encode(v[3] / max_pq),
    ]
}

/// Elementwise ST 2084 inverse transfer: PQ signal → linear.
pub fn pq_to_linear(v: Vec4, max_pq: f32) -> Vec4 {
    [
        pq_decode(v[0]) * max_pq,
        pq_decode(v[1]) * max_pq,
        pq_decode(v[2]) * max_pq,
        pq_decode(v[3]) * max_pq,
    ]
}

/// Scalar PQ encode of a luminance in scRGB units (1.0 = 80 nits),
/// used for the analyzer's `max_y_in_pq` statistic. The 0.008 factor is
/// 1/125, folding the scRGB normalization into the encode.
pub fn linear_to_pq_y(n: f32) -> f32 {
    let scaled = (n * 0.008).abs();
    let p = scaled.powf(PQ_M1);
    let nd = ((PQ_C1 + PQ_C2 * p) / (1.0 + PQ_C3 * p)).abs();
    nd.powf(PQ_M2)
}

/// Scene luminance of a linear Rec.709 sample: the Y row of the
/// Rec.709→XYZ transform.
#[inline]
pub fn luminance(v: Vec4) -> f32 {
    v[0] * 0.212_639_0 + v[1] * 0.715_168_65 + v[2] * 0.072_192_32
}

/// Linear Rec.709 → ICtCp: through XYZ and LMS, PQ-encode the cone
/// response, then project to intensity/chroma.
pub fn rec709_to_ictcp(v: Vec4) -> Vec4 {
    let xyz = REC709_TO_XYZ.transform_point(v);
    let lms = XYZ_TO_LMS.transform_point(xyz);
    let pq_lms = linear_to_pq(
        [lms[0].max(0.0), lms[1].max(0.0), lms[2].max(0.0), lms[3]],
        MAX_PQ,
    );
    PQ_LMS_TO_ICTCP.transform(pq_lms)
}

/// ICtCp → linear Rec.709, inverse of [`rec709_to_ictcp`].
pub fn ictcp_to_rec709(v: Vec4) -> Vec4 {
    let pq_lms = ICTCP_TO_PQ_LMS.transform_point(v);
    let lms = pq_to_linear(pq_lms, MAX_PQ);
    let xyz = LMS_TO_XYZ.transform_point(lms);
    XYZ_TO_REC709.transform_point(xyz)
}

/// Intensity rolloff used by the infinite-rolloff tonemap operator:
///
///   y′ = y·(1 + a·y) / (1 + b·y),  a = y_out / p²,  b = 1 / y_out
///
/// where `p` is the PQ-encoded content peak. An extended-Reinhard-style
/// x/(1+x) compression: smooth and monotonic on [0, p], with the peak
/// landing exactly on `y_out` (at `y = p` the ratio collapses to
/// `y_out`).
pub fn rolloff(max_y_in_pq: f32, y_out: f32, y_in: f32) -> f32 {
    let a = y_out / (max_y_in_pq * max_y_in_pq);
    let b = 1.0 / y_out;
    y_in * (1.0 + a * y_in) / (1.0 + b * y_in)
}

/// Linear [0, 1] → sRGB-encoded byte, IEC 61966-2-1 section 4.7:
/// 12.92·c below the 0.0031308 junction, 1.055·c^(1/2.4) − 0.055 above.
#[inline]
pub fn linear_to_srgb_u8(v: f32) -> u8 {
    let c = v.clamp(0.0, 1.0);
    let srgb = if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    };
    (srgb * 255.0 + 0.5).floor().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f32, expected: f32, relative: f32) {
        let scale = expected.abs().max(1e-4);
        assert!(
            (actual - expected).abs() <= relative * scale,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn pq_round_trips_on_unit_interval() {
        for i in 0..=100 {
            let x = i as f32 / 100.0;
            let encoded = linear_to_pq([x, x, x, 1.0], MAX_PQ);
            let decoded = pq_to_linear(encoded, MAX_PQ);
            assert_close(decoded[0], x, 1e-3);
        }
    }

    #[test]
    fn pq_signal_round_trips_through_decode_then_encode() {
        for i in 1..=100 {
            let signal = i as f32 / 100.0;
            let linear = pq_to_linear([signal; 4], MAX_PQ);
            let back = linear_to_pq(linear, MAX_PQ);
            assert_close(back[0], signal, 1e-3);
        }
    }

    #[test]
    fn xyz_matrices_are_mutual_inverses() {
        let v = [0.3, 0.5, 0.2, 1.0];
        let there = REC709_TO_XYZ.transform_point(v);
        let back = XYZ_TO_REC709.transform_point(there);
        for c in 0..3 {
            assert_close(back[c], v[c], 1e-4);
        }
    }

    #[test]
    fn ictcp_round_trips_within_tolerance() {
        let samples: &[[f32; 4]] = &[
            [0.25, 0.5, 0.75, 1.0],
            [1.0, 1.0, 1.0, 1.0],
            [0.1, 0.2, 0.3, 1.0],
            [0.5, 0.5, 0.5, 1.0],
            [2.0, 1.5, 0.8, 1.0], // above SDR range, still non-extreme
        ];
        for &sample in samples {
            let ictcp = rec709_to_ictcp(sample);
            let back = ictcp_to_rec709(ictcp);
            for c in 0..3 {
                assert_close(back[c], sample[c], 1e-3);
            }
        }
    }

    #[test]
    fn ictcp_intensity_orders_by_luminance() {
        let dim = rec709_to_ictcp([0.05, 0.05, 0.05, 1.0]);
        let bright = rec709_to_ictcp([0.8, 0.8, 0.8, 1.0]);
        assert!(bright[0] > dim[0]);
        // Achromatic input carries no chroma.
        assert!(dim[1].abs() < 1e-3 && dim[2].abs() < 1e-3);
    }

    #[test]
    fn luminance_matches_xyz_y() {
        let v = [0.4, 0.3, 0.2, 1.0];
        let xyz = REC709_TO_XYZ.transform_point(v);
        assert_close(luminance(v), xyz[1], 1e-6);
    }

    #[test]
    fn rolloff_is_monotonic_and_pins_the_peak() {
        let peak = linear_to_pq_y(10.0);
        let mut previous = -1.0f32;
        for i in 0..=100 {
            let y_in = peak * i as f32 / 100.0;
            let y_out = rolloff(peak, 1.0, y_in);
            assert!(y_out > previous, "rolloff must be monotonic");
            assert!(y_out <= 1.0 + 1e-5);
            previous = y_out;
        }
        // The content peak lands exactly on the target.
        assert_close(rolloff(peak, 1.0, peak), 1.0, 1e-5);
        assert_close(rolloff(peak, 0.6, peak), 0.6, 1e-5);
    }

    #[test]
    fn srgb_encode_endpoints() {
        assert_eq!(linear_to_srgb_u8(0.0), 0);
        assert_eq!(linear_to_srgb_u8(1.0), 255);
        assert_eq!(linear_to_srgb_u8(2.0), 255);
        assert_eq!(linear_to_srgb_u8(-1.0), 0);
        // Mid grey: linear 0.2159 ≈ sRGB 0.5.
        let mid = linear_to_srgb_u8(0.2159);
        assert!((127..=129).contains(&mid));
    }
}
