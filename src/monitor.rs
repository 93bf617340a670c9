//! Monitor identity and display-capability data model.
//!
//! Enumeration itself is a thin collaborator: the engine accepts
//! [`MonitorInfo`] records from any source (the Windows helper in the
//! platform layer, or the host application's own enumeration).

use std::fmt;

/// A rectangle in virtual-desktop or canvas-relative coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Right edge (exclusive).
    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.width as i32)
    }

    /// Bottom edge (exclusive).
    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.height as i32)
    }

    /// Smallest rectangle containing both `self` and `other`.
    pub fn union(&self, other: &Rect) -> Rect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Rect {
            x,
            y,
            width: (right - x) as u32,
            height: (bottom - y) as u32,
        }
    }
}

/// One display output as reported by monitor enumeration.
///
/// `handle` is the OS monitor handle (HMONITOR on Windows) used to key
/// duplication sessions and to resolve the owning adapter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonitorInfo {
    pub handle: isize,
    pub monitor_area: Rect,
    pub work_area: Rect,
    pub device_name: String,
    pub is_primary: bool,
}

impl fmt::Display for MonitorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.device_name)
    }
}

/// Advanced-color state of a display path.
#[derive(Clone, Copy, Debug, Default)]
pub struct ColorCapability {
    pub advanced_color_enabled: bool,
    pub bits_per_channel: u32,
}

/// SDR reference white level, in nits, as composited by the OS.
#[derive(Clone, Copy, Debug)]
pub struct SdrWhiteCapability {
    pub white_level_nits: f32,
}

/// Panel luminance limits from the display's EDID/driver data.
#[derive(Clone, Copy, Debug)]
pub struct PanelCapability {
    pub max_luminance_nits: f32,
    pub min_luminance_nits: f32,
    pub max_full_frame_luminance_nits: f32,
}

/// Display capabilities, one optional record per capability class.
///
/// Platforms answer whatever subset they can; every consumer must cope
/// with any field being absent.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisplayCapabilities {
    pub color: Option<ColorCapability>,
    pub sdr_white: Option<SdrWhiteCapability>,
    pub panel: Option<PanelCapability>,
}

/// Capability-query interface over a monitor.
pub trait CapabilityQuery {
    /// Best-effort query; unanswerable classes come back `None`.
    fn query(&self, monitor: &MonitorInfo) -> DisplayCapabilities;
}

/// A query that answers nothing. Tonemap derivation then runs entirely
/// on its SDR defaults.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCapabilities;

impl CapabilityQuery for NoCapabilities {
    fn query(&self, _monitor: &MonitorInfo) -> DisplayCapabilities {
        DisplayCapabilities::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_covers_disjoint_rects() {
        let a = Rect::new(0, 0, 100, 100);
        let b = Rect::new(100, 0, 100, 100);
        let u = a.union(&b);
        assert_eq!(u, Rect::new(0, 0, 200, 100));
    }

    #[test]
    fn union_handles_negative_origins() {
        let a = Rect::new(-1920, 0, 1920, 1080);
        let b = Rect::new(0, -200, 2560, 1440);
        let u = a.union(&b);
        assert_eq!(u.x, -1920);
        assert_eq!(u.y, -200);
        assert_eq!(u.right(), 2560);
        assert_eq!(u.bottom(), 1440);
    }
}
