//! Luminance analysis of captured HDR frames.
//!
//! Two passes over linear-light scRGB samples (1.0 = 80 nits). The
//! first finds the per-channel content maximum (MaxCLL) and the scene
//! min/max/average luminance; the second builds a 65536-bin luminance
//! histogram over [min, max] and walks it from the top to find the
//! 99th-percentile luminance. Tonemap parameters are derived from the
//! result, so statistics are recomputed for every HDR region of every
//! capture — luminance distribution is content-dependent and never
//! cacheable.

use rayon::prelude::*;

use crate::colorspace::{self, Vec4};
use crate::error::{CaptureError, CaptureResult};

const HISTOGRAM_BINS: usize = 65536;

/// Percentage of pixels that must be accounted for, walking from the
/// brightest bin down, before a bin qualifies as the P99 boundary.
const P99_COVERAGE: f64 = 99.94;

/// Below this linear luminance the percentile is considered degenerate
/// (near-black frame) and the scene maximum is used instead.
const P99_FLOOR: f32 = 0.01;

/// Pixel count from which the first pass runs on the rayon pool.
const PARALLEL_MIN_PIXELS: usize = 262_144;
const PARALLEL_CHUNK_PIXELS: usize = 65_536;

/// Channel that carried the content light-level maximum.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DominantChannel {
    Red,
    Green,
    Blue,
    /// No channel dominated (empty or non-positive content).
    #[default]
    None,
}

/// Statistics of one captured HDR frame, in nits where named so.
/// Consumed once by tonemap parameter derivation, never persisted.
#[derive(Clone, Copy, Debug, Default)]
pub struct LightStats {
    /// Maximum per-channel content light level, linear scRGB units.
    pub max_cll: f32,
    pub max_cll_channel: DominantChannel,
    pub max_nits: f32,
    pub min_nits: f32,
    pub avg_nits: f32,
    /// 99th-percentile luminance (see [`P99_COVERAGE`]).
    pub p99_nits: f32,
    /// PQ-encoded tonemap ceiling: max(PQ(1.5), PQ(min(125, scene max))).
    pub max_y_in_pq: f32,
}

#[derive(Clone, Copy)]
struct Pass1 {
    max_rgb: [f32; 3],
    max_lum: f32,
    min_lum: f32,
    total_lum: f64,
}

impl Pass1 {
    fn identity() -> Self {
        Self {
            max_rgb: [0.0; 3],
            max_lum: f32::MIN,
            min_lum: f32::MAX,
            total_lum: 0.0,
        }
    }

    fn fold(mut self, pixel: &Vec4) -> Self {
        self.max_rgb[0] = self.max_rgb[0].max(pixel[0]);
        self.max_rgb[1] = self.max_rgb[1].max(pixel[1]);
        self.max_rgb[2] = self.max_rgb[2].max(pixel[2]);
        let y = colorspace::luminance(*pixel);
        self.max_lum = self.max_lum.max(y);
        self.min_lum = self.min_lum.min(y);
        self.total_lum += f64::from(y.max(0.0));
        self
    }

    fn merge(mut self, other: Self) -> Self {
        self.max_rgb[0] = self.max_rgb[0].max(other.max_rgb[0]);
        self.max_rgb[1] = self.max_rgb[1].max(other.max_rgb[1]);
        self.max_rgb[2] = self.max_rgb[2].max(other.max_rgb[2]);
        self.max_lum = self.max_lum.max(other.max_lum);
        self.min_lum = self.min_lum.min(other.min_lum);
        self.total_lum += other.total_lum;
        self
    }
}

/// Analyze a frame of linear-light samples.
///
/// Zero-pixel input is rejected up front — every statistic is undefined
/// on an empty frame.
pub fn analyze(pixels: &[Vec4]) -> CaptureResult<LightStats> {
    if pixels.is_empty() {
        return Err(CaptureError::InvalidRequest(
            "luminance analysis requires at least one pixel".into(),
        ));
    }

    let pass1 = if pixels.len() >= PARALLEL_MIN_PIXELS {
        pixels
            .par_chunks(PARALLEL_CHUNK_PIXELS)
            .map(|chunk| chunk.iter().fold(Pass1::identity(), Pass1::fold))
            .reduce(Pass1::identity, Pass1::merge)
    } else {
        pixels.iter().fold(Pass1::identity(), Pass1::fold)
    };

    let min_lum = pass1.min_lum.max(0.0);
    let max_lum = pass1.max_lum.max(0.0);
    let avg_lum = (pass1.total_lum / pixels.len() as f64) as f32;

    let max_cll = pass1.max_rgb[0]
        .max(pass1.max_rgb[1])
        .max(pass1.max_rgb[2]);
    let max_cll_channel = if max_cll <= 0.0 {
        DominantChannel::None
    } else if max_cll == pass1.max_rgb[0] {
        DominantChannel::Red
    } else if max_cll == pass1.max_rgb[1] {
        DominantChannel::Green
    } else {
        DominantChannel::Blue
    };

    let p99_lum = percentile_luminance(pixels, min_lum, max_lum, P99_COVERAGE);
    let p99_lum = if p99_lum <= P99_FLOOR { max_lum } else { p99_lum };

    let max_y_in_pq = colorspace::linear_to_pq_y(1.5)
        .max(colorspace::linear_to_pq_y(max_lum.min(colorspace::MAX_PQ)));

    let stats = LightStats {
        max_cll,
        max_cll_channel,
        max_nits: (max_lum * 80.0).max(0.0),
        min_nits: (min_lum * 80.0).max(0.0),
        avg_nits: (avg_lum * 80.0).max(0.0),
        p99_nits: (p99_lum * 80.0).max(0.0),
        max_y_in_pq,
    };
    log::debug!(
        "frame light analysis: max {:.1} nits, p99 {:.1} nits, avg {:.1} nits",
        stats.max_nits,
        stats.p99_nits,
        stats.avg_nits
    );
    Ok(stats)
}

/// Histogram pass: bucket every pixel's luminance into [min, max], walk
/// from the brightest bin down accumulating the covered pixel
/// percentage, and return the midpoint luminance of the boundary bin.
///
/// A degenerate range (uniform frame) puts every pixel in one bin;
/// the maximum is the percentile by definition.
fn percentile_luminance(pixels: &[Vec4], min_lum: f32, max_lum: f32, coverage: f64) -> f32 {
    let range = max_lum - min_lum;
    if !(range > 0.0) || !range.is_finite() {
        return max_lum;
    }

    let mut frequency = vec![0u32; HISTOGRAM_BINS];
    let bin_width = range / HISTOGRAM_BINS as f32;
    for pixel in pixels {
        let y = colorspace::luminance(*pixel).max(0.0);
        let bin = (((y - min_lum) / bin_width).round() as isize)
            .clamp(0, HISTOGRAM_BINS as isize - 1) as usize;
        frequency[bin] += 1;
    }

    boundary_bin(&frequency, pixels.len(), coverage)
        .map(|bin| min_lum + range * ((bin as f32 + 0.5) / HISTOGRAM_BINS as f32))
        .unwrap_or(max_lum)
}

/// Index of the first bin (from the top) at which the uncovered pixel
/// percentage drops to `coverage` or below.
fn boundary_bin(frequency: &[u32], pixel_count: usize, coverage: f64) -> Option<usize> {
    let total = pixel_count as f64;
    let mut percent = 100.0f64;
    for (bin, &count) in frequency.iter().enumerate().rev() {
        percent -= 100.0 * (f64::from(count) / total);
        if percent <= coverage {
            return Some(bin);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grey(y: f32) -> Vec4 {
        [y, y, y, 1.0]
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(
            analyze(&[]),
            Err(CaptureError::InvalidRequest(_))
        ));
    }

    #[test]
    fn uniform_image_collapses_all_statistics() {
        // 2.0 linear = 160 nits everywhere.
        let pixels = vec![grey(2.0); 4096];
        let stats = analyze(&pixels).unwrap();
        assert!((stats.max_nits - 160.0).abs() < 0.5);
        assert!((stats.min_nits - 160.0).abs() < 0.5);
        assert!((stats.avg_nits - 160.0).abs() < 0.5);
        assert!((stats.p99_nits - 160.0).abs() < 0.5);
    }

    #[test]
    fn p99_lies_between_min_and_max() {
        let mut pixels: Vec<Vec4> = (0..10_000).map(|i| grey(i as f32 / 1000.0)).collect();
        pixels.push(grey(12.5));
        let stats = analyze(&pixels).unwrap();
        assert!(stats.p99_nits >= stats.min_nits);
        assert!(stats.p99_nits <= stats.max_nits);
        // The single 1000-nit specular must not drag P99 to the top.
        assert!(stats.p99_nits < stats.max_nits);
    }

    #[test]
    fn lowering_coverage_never_raises_the_boundary() {
        let pixels: Vec<Vec4> = (0..50_000).map(|i| grey(i as f32 / 5000.0)).collect();
        let mut frequency = vec![0u32; HISTOGRAM_BINS];
        let max_lum = pixels
            .iter()
            .map(|p| colorspace::luminance(*p))
            .fold(0.0f32, f32::max);
        let bin_width = max_lum / HISTOGRAM_BINS as f32;
        for pixel in &pixels {
            let y = colorspace::luminance(*pixel);
            let bin = ((y / bin_width).round() as isize).clamp(0, HISTOGRAM_BINS as isize - 1)
                as usize;
            frequency[bin] += 1;
        }

        let mut previous = usize::MAX;
        for coverage in [99.94, 99.0, 95.0, 50.0] {
            let bin = boundary_bin(&frequency, pixels.len(), coverage).unwrap();
            assert!(bin <= previous, "coverage {coverage} raised the boundary");
            previous = bin;
        }
    }

    #[test]
    fn near_black_percentile_falls_back_to_scene_maximum() {
        // Almost everything black, a few bright pixels: the histogram
        // walk lands in the black mass, below the floor.
        let mut pixels = vec![grey(0.0); 100_000];
        for pixel in pixels.iter_mut().take(10) {
            *pixel = grey(5.0);
        }
        let stats = analyze(&pixels).unwrap();
        assert!((stats.p99_nits - stats.max_nits).abs() < 0.5);
    }

    #[test]
    fn dominant_channel_tracks_the_brightest_primary() {
        let mut pixels = vec![grey(0.5); 64];
        pixels.push([0.4, 0.4, 3.0, 1.0]);
        let stats = analyze(&pixels).unwrap();
        assert_eq!(stats.max_cll_channel, DominantChannel::Blue);
        assert!((stats.max_cll - 3.0).abs() < 1e-6);
    }

    #[test]
    fn max_y_in_pq_has_the_sdr_floor() {
        // Dim content: the ceiling still sits at PQ(1.5).
        let stats = analyze(&vec![grey(0.2); 256]).unwrap();
        let floor = colorspace::linear_to_pq_y(1.5);
        assert!((stats.max_y_in_pq - floor).abs() < 1e-6);

        // Bright content raises it.
        let bright = analyze(&vec![grey(8.0); 256]).unwrap();
        assert!(bright.max_y_in_pq > floor);
    }

    #[test]
    fn parallel_and_scalar_passes_agree() {
        let pixels: Vec<Vec4> = (0..PARALLEL_MIN_PIXELS + 17)
            .map(|i| grey((i % 977) as f32 / 100.0))
            .collect();
        let parallel = analyze(&pixels).unwrap();
        let scalar = analyze(&pixels[..977.min(pixels.len())]).unwrap();
        // Same value distribution → same extrema.
        assert!((parallel.max_nits - scalar.max_nits).abs() < 1e-3);
        assert!((parallel.min_nits - scalar.min_nits).abs() < 1e-3);
    }
}
