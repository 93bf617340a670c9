//! HDR-aware multi-monitor screenshot capture and composition.
//!
//! The engine grabs pixel data from one or more display outputs through
//! OS output duplication, composites the requested regions into a single
//! canvas on the GPU, tonemaps HDR sources down to SDR, and reads the
//! result back as a plain BGRA pixel buffer for an external image
//! writer.
//!
//! Capture is synchronous on the calling thread. GPU devices are cached
//! one per adapter, duplication sessions one per monitor; both follow
//! the [`policy::PerformanceMode`] retention ladder.

pub mod analysis;
pub mod canvas;
pub mod colorspace;
pub mod error;
pub mod monitor;
pub mod policy;
pub mod request;
pub mod tonemap;

mod acquire;
mod plan;
mod platform;
mod registry;

pub use analysis::{DominantChannel, LightStats};
pub use canvas::PixelBuffer;
pub use error::{CaptureError, CaptureErrorClass, CaptureResult};
pub use monitor::{
    CapabilityQuery, ColorCapability, DisplayCapabilities, MonitorInfo, NoCapabilities,
    PanelCapability, Rect, SdrWhiteCapability,
};
pub use policy::{HdrOutputMode, HdrSettings, PerformanceMode, TonemapOperator};
pub use request::{CaptureRequest, RegionRequest};
pub use tonemap::{PixelConstants, VertexConstants};

#[cfg(target_os = "windows")]
pub use platform::windows::{CaptureEngine, enumerate_monitors};

/// Capture a single request with a one-shot engine and default policy.
#[cfg(target_os = "windows")]
pub fn capture_once(request: &CaptureRequest) -> CaptureResult<PixelBuffer> {
    let mut engine = CaptureEngine::new(HdrSettings::default())?;
    engine.capture(request)
}
