//! Tonemap parameter derivation and the CPU tonemap fallback.
//!
//! Both the GPU shader pass and the CPU pixel loop consume the same two
//! constant blocks derived here: a vertex-stage luminance-scale vector
//! (geometry-independent brightness scaling) and a pixel-stage block
//! carrying display/content peaks, user scales, and the operator
//! selector. Derivation reads the display's capability records and the
//! capture policy; the content-dependent inputs come from a fresh
//! [`LightStats`] per region per capture.

use rayon::prelude::*;

use crate::analysis::LightStats;
use crate::colorspace::{self, Vec4};
use crate::error::{CaptureError, CaptureResult};
use crate::monitor::DisplayCapabilities;
use crate::policy::{HdrOutputMode, HdrSettings, TonemapOperator};

/// Vertex-stage constants. The luminance-scale vector encodes the
/// output target:
///   x = brightness scale (1.0 = 80 nits on HDR targets),
///   y = rendering to an HDR surface,
///   z = 10-bpc PQ output,
///   w = 16-bpc scRGB output.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VertexConstants {
    pub luminance_scale: [f32; 4],
}

/// Pixel-stage constants, padded to a 16-byte multiple for constant
/// buffer upload.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PixelConstants {
    /// Content peak in 80-nit units (P99 or MaxCLL per policy).
    pub hdr_max_luminance: f32,
    /// Display panel peak in 80-nit units.
    pub display_max_luminance: f32,
    /// User brightness scale, 1.0 = 100%.
    pub user_brightness_scale: f32,
    /// Effective SDR white level in nits, after the white-scale policy.
    pub sdr_white_level: f32,
    /// [`TonemapOperator`] selector bits.
    pub tonemap_operator: u32,
    pub _pad: [u32; 3],
}

/// Capability defaults when the query answers nothing: an SDR panel at
/// 8 bpc with the 80-nit reference white and a 600-nit peak.
const DEFAULT_SDR_WHITE_NITS: f32 = 80.0;
const DEFAULT_PANEL_MAX_NITS: f32 = 600.0;

/// Derive both constant blocks for one region.
pub fn derive_constants(
    caps: &DisplayCapabilities,
    settings: &HdrSettings,
    stats: &LightStats,
) -> (VertexConstants, PixelConstants) {
    let mut is_hdr = false;
    let mut sdr_white_nits = DEFAULT_SDR_WHITE_NITS;
    let mut panel_max_nits = DEFAULT_PANEL_MAX_NITS;

    if let Some(color) = caps.color {
        is_hdr = color.advanced_color_enabled;
    }
    if let Some(sdr) = caps.sdr_white {
        sdr_white_nits = sdr.white_level_nits;
    }
    if let Some(panel) = caps.panel {
        panel_max_nits = panel.max_luminance_nits;
    }

    let max_content_nits = if settings.use_p99_max_cll {
        stats.p99_nits
    } else {
        stats.max_nits
    };

    let mut luminance_scale = [1.0f32, 0.0, 0.0, 0.0];
    match (is_hdr, settings.hdr_output_mode) {
        (true, HdrOutputMode::Hdr16Bpc) => {
            // scRGB target: 1.0 = 80 nits, brightness expressed as a
            // multiple of that.
            luminance_scale = [settings.hdr_brightness_nits() / 80.0, 1.0, 0.0, 1.0];
        }
        (true, HdrOutputMode::Hdr10Bpc) => {
            // PQ target: the shader PQ-encodes with the absolute
            // brightness, flagged by the negative x.
            luminance_scale = [-settings.hdr_brightness_nits(), 1.0, 1.0, 0.0];
        }
        // SDR output (or an SDR display regardless of the requested
        // mode): identity scale, boosted when the OS composites SDR
        // white above the 80-nit reference.
        _ => {
            if sdr_white_nits > 80.0 {
                luminance_scale[0] = sdr_white_nits / 80.0;
            }
            luminance_scale[3] = 1.0;
        }
    }

    let pixel = PixelConstants {
        hdr_max_luminance: max_content_nits / 80.0,
        display_max_luminance: panel_max_nits / 80.0,
        user_brightness_scale: settings.brightness_scale() / 100.0,
        sdr_white_level: sdr_white_nits * (settings.sdr_white_scale() / 100.0),
        tonemap_operator: settings.tonemap_operator as u32,
        _pad: [0; 3],
    };

    (VertexConstants { luminance_scale }, pixel)
}

/// Pixel count from which the CPU tonemap loop runs on the rayon pool.
const PARALLEL_MIN_PIXELS: usize = 262_144;

/// Tonemap one linear scRGB sample to a display-relative linear value
/// in [0, 1] per the selector. This is the reference implementation of
/// the shader math.
fn tonemap_sample(sample: Vec4, constants: &PixelConstants, max_y_in_pq: f32) -> [f32; 3] {
    let brightness = constants.user_brightness_scale;
    // scRGB value that must land on full SDR white.
    let white = (constants.sdr_white_level / 80.0).max(1e-3);
    let content_max = constants.hdr_max_luminance.max(1e-3);
    let display_max = constants.display_max_luminance.max(1e-3);

    let scaled = [
        sample[0] * brightness,
        sample[1] * brightness,
        sample[2] * brightness,
        1.0,
    ];

    let operator = constants.tonemap_operator;
    if operator == TonemapOperator::NormalizeToCll as u32 {
        return [
            scaled[0] / content_max,
            scaled[1] / content_max,
            scaled[2] / content_max,
        ];
    }
    if operator == TonemapOperator::MapCllToDisplay as u32 {
        // Content range remapped into the panel's range, then brought
        // to SDR through the white level; brighter-than-panel content
        // compresses, dimmer content is lifted.
        let remap = display_max / content_max;
        return [
            (scaled[0] * remap / white).clamp(0.0, 1.0),
            (scaled[1] * remap / white).clamp(0.0, 1.0),
            (scaled[2] * remap / white).clamp(0.0, 1.0),
        ];
    }
    if operator == TonemapOperator::InfiniteRolloff as u32 {
        let rolled = ictcp_rolloff(scaled, max_y_in_pq, white);
        return [
            (rolled[0] / white).clamp(0.0, 1.0),
            (rolled[1] / white).clamp(0.0, 1.0),
            (rolled[2] / white).clamp(0.0, 1.0),
        ];
    }
    if operator == TonemapOperator::Clip as u32 {
        return [
            (scaled[0] / white).clamp(0.0, 1.0),
            (scaled[1] / white).clamp(0.0, 1.0),
            (scaled[2] / white).clamp(0.0, 1.0),
        ];
    }
    // TonemapOperator::None: pass through; the sRGB encode clamps.
    [scaled[0] / white, scaled[1] / white, scaled[2] / white]
}

/// Hue-preserving intensity rolloff in ICtCp.
///
/// The intensity component (PQ domain) runs through the rolloff curve,
/// which maps the PQ-encoded content peak onto 1.0; that normalized
/// intensity is then rescaled onto the PQ value of the SDR white point,
/// so the content peak decodes exactly to `white_scrgb`. Chroma is
/// scaled by the intensity ratio so saturation follows the compression
/// instead of washing out.
fn ictcp_rolloff(sample: Vec4, max_y_in_pq: f32, white_scrgb: f32) -> Vec4 {
    let mut ictcp = colorspace::rec709_to_ictcp(sample);
    let y_in = ictcp[0].max(0.0);
    if y_in <= 0.0 {
        return colorspace::ictcp_to_rec709(ictcp);
    }

    let normalized = colorspace::rolloff(max_y_in_pq.max(1e-3), 1.0, y_in).min(1.0);
    let white_pq = colorspace::linear_to_pq_y(white_scrgb);
    let y_out = normalized * white_pq;

    let chroma_scale = if y_out > 0.0 {
        (y_in / y_out).min(y_out / y_in)
    } else {
        0.0
    };
    ictcp[0] = y_out;
    ictcp[1] *= chroma_scale;
    ictcp[2] *= chroma_scale;

    colorspace::ictcp_to_rec709(ictcp)
}

/// CPU tonemap of a full region: recompute statistics, derive
/// constants, and write BGRA8 rows (pitch = `width * 4`).
///
/// This is the non-GPU fallback selected by policy; it applies the same
/// transfer-function math as the shader pass.
pub fn tonemap_on_cpu(
    pixels: &[Vec4],
    caps: &DisplayCapabilities,
    settings: &HdrSettings,
) -> CaptureResult<Vec<u8>> {
    let stats = crate::analysis::analyze(pixels)?;
    let (_, constants) = derive_constants(caps, settings, &stats);

    let byte_len = pixels
        .len()
        .checked_mul(4)
        .ok_or(CaptureError::BufferOverflow)?;
    let mut out = vec![0u8; byte_len];

    let encode = |pixel: &Vec4, bgra: &mut [u8]| {
        let mapped = tonemap_sample(*pixel, &constants, stats.max_y_in_pq);
        bgra[0] = colorspace::linear_to_srgb_u8(mapped[2]);
        bgra[1] = colorspace::linear_to_srgb_u8(mapped[1]);
        bgra[2] = colorspace::linear_to_srgb_u8(mapped[0]);
        bgra[3] = 0xFF;
    };

    if pixels.len() >= PARALLEL_MIN_PIXELS {
        out.par_chunks_mut(4)
            .zip(pixels.par_iter())
            .for_each(|(bgra, pixel)| encode(pixel, bgra));
    } else {
        for (bgra, pixel) in out.chunks_exact_mut(4).zip(pixels.iter()) {
            encode(pixel, bgra);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{ColorCapability, PanelCapability, SdrWhiteCapability};
    use crate::policy::PerformanceMode;

    fn stats(max_nits: f32, p99_nits: f32) -> LightStats {
        LightStats {
            max_nits,
            p99_nits,
            max_y_in_pq: colorspace::linear_to_pq_y(1.5)
                .max(colorspace::linear_to_pq_y((max_nits / 80.0).min(125.0))),
            ..LightStats::default()
        }
    }

    fn hdr_caps() -> DisplayCapabilities {
        DisplayCapabilities {
            color: Some(ColorCapability {
                advanced_color_enabled: true,
                bits_per_channel: 10,
            }),
            sdr_white: Some(SdrWhiteCapability {
                white_level_nits: 240.0,
            }),
            panel: Some(PanelCapability {
                max_luminance_nits: 1000.0,
                min_luminance_nits: 0.05,
                max_full_frame_luminance_nits: 800.0,
            }),
        }
    }

    #[test]
    fn sdr_defaults_when_no_capability_answers() {
        let settings = HdrSettings::default();
        let (vertex, pixel) =
            derive_constants(&DisplayCapabilities::default(), &settings, &stats(400.0, 350.0));
        assert_eq!(vertex.luminance_scale, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(pixel.display_max_luminance, 600.0 / 80.0);
        assert_eq!(pixel.sdr_white_level, 80.0);
    }

    #[test]
    fn hdr16_mode_scales_brightness_in_white_units() {
        let settings = HdrSettings {
            hdr_output_mode: HdrOutputMode::Hdr16Bpc,
            hdr_brightness_nits: 203.0,
            ..HdrSettings::default()
        };
        let (vertex, _) = derive_constants(&hdr_caps(), &settings, &stats(1000.0, 600.0));
        assert_eq!(vertex.luminance_scale[0], 203.0 / 80.0);
        assert_eq!(vertex.luminance_scale[1], 1.0);
        assert_eq!(vertex.luminance_scale[3], 1.0);
    }

    #[test]
    fn hdr10_mode_flags_pq_with_negative_brightness() {
        let settings = HdrSettings {
            hdr_output_mode: HdrOutputMode::Hdr10Bpc,
            hdr_brightness_nits: 120.0,
            ..HdrSettings::default()
        };
        let (vertex, _) = derive_constants(&hdr_caps(), &settings, &stats(1000.0, 600.0));
        assert_eq!(vertex.luminance_scale[0], -120.0);
        assert_eq!(vertex.luminance_scale[2], 1.0);
    }

    #[test]
    fn sdr_output_boosts_white_above_reference() {
        let settings = HdrSettings::default(); // HdrOutputMode::None
        let (vertex, _) = derive_constants(&hdr_caps(), &settings, &stats(1000.0, 600.0));
        assert_eq!(vertex.luminance_scale[0], 240.0 / 80.0);
        assert_eq!(vertex.luminance_scale[1], 0.0);
        assert_eq!(vertex.luminance_scale[3], 1.0);
    }

    #[test]
    fn percentile_policy_selects_the_content_peak() {
        let base = HdrSettings::default();
        let (_, with_p99) = derive_constants(&hdr_caps(), &base, &stats(1000.0, 600.0));
        assert_eq!(with_p99.hdr_max_luminance, 600.0 / 80.0);

        let absolute = HdrSettings {
            use_p99_max_cll: false,
            ..base
        };
        let (_, with_max) = derive_constants(&hdr_caps(), &absolute, &stats(1000.0, 600.0));
        assert_eq!(with_max.hdr_max_luminance, 1000.0 / 80.0);
    }

    #[test]
    fn white_scale_policy_modulates_sdr_white() {
        let settings = HdrSettings {
            sdr_white_scale: 50.0,
            ..HdrSettings::default()
        };
        let (_, pixel) = derive_constants(&hdr_caps(), &settings, &stats(1000.0, 600.0));
        assert_eq!(pixel.sdr_white_level, 120.0);
    }

    #[test]
    fn normalize_to_cll_maps_content_peak_to_full_white() {
        let settings = HdrSettings {
            tonemap_operator: TonemapOperator::NormalizeToCll,
            use_p99_max_cll: false,
            performance_mode: PerformanceMode::Balanced,
            ..HdrSettings::default()
        };
        // Uniform frame at 4.0 scRGB (320 nits): the peak is every pixel.
        let pixels = vec![[4.0, 4.0, 4.0, 1.0]; 64];
        let bgra = tonemap_on_cpu(&pixels, &hdr_caps(), &settings).unwrap();
        assert_eq!(&bgra[0..4], &[255, 255, 255, 255]);
    }

    #[test]
    fn clip_operator_saturates_above_white() {
        let settings = HdrSettings {
            tonemap_operator: TonemapOperator::Clip,
            ..HdrSettings::default()
        };
        let caps = DisplayCapabilities::default(); // 80-nit white
        let pixels = vec![[3.0, 3.0, 3.0, 1.0]; 16];
        let bgra = tonemap_on_cpu(&pixels, &caps, &settings).unwrap();
        assert_eq!(&bgra[0..4], &[255, 255, 255, 255]);
    }

    #[test]
    fn rolloff_compresses_but_keeps_order() {
        let settings = HdrSettings {
            tonemap_operator: TonemapOperator::InfiniteRolloff,
            ..HdrSettings::default()
        };
        let caps = DisplayCapabilities::default();
        let mut pixels = vec![[0.2, 0.2, 0.2, 1.0]; 64];
        pixels[0] = [6.0, 6.0, 6.0, 1.0];
        pixels[1] = [3.0, 3.0, 3.0, 1.0];
        let bgra = tonemap_on_cpu(&pixels, &caps, &settings).unwrap();
        let bright = bgra[0];
        let mid = bgra[4];
        let dim = bgra[8];
        assert!(bright >= mid && mid > dim);
    }

    #[test]
    fn cpu_tonemap_rejects_empty_regions() {
        let settings = HdrSettings::default();
        assert!(tonemap_on_cpu(&[], &hdr_caps(), &settings).is_err());
    }
}
