//! Capture request description: a list of monitor-backed regions plus the
//! destination canvas they composite into.

use crate::error::{CaptureError, CaptureResult};
use crate::monitor::{MonitorInfo, Rect};

/// One region of the final screenshot.
///
/// `dest_rect` is in virtual-desktop coordinates and must lie within
/// `monitor`'s area; it doubles as the region's placement in the canvas
/// (relative to the canvas origin).
#[derive(Clone, Debug)]
pub struct RegionRequest {
    pub dest_rect: Rect,
    pub monitor: MonitorInfo,
    /// Include the cursor in this region. Output duplication composites
    /// the pointer into the desktop image already; the flag is carried
    /// for backends/filters that need it.
    pub capture_cursor: bool,
}

/// A full capture: regions in composition order plus the canvas rect
/// (the union bounding box of all destination rects).
#[derive(Clone, Debug)]
pub struct CaptureRequest {
    pub regions: Vec<RegionRequest>,
    pub canvas_rect: Rect,
}

impl CaptureRequest {
    /// Build a request with an explicit canvas rectangle.
    pub fn new(canvas_rect: Rect, regions: Vec<RegionRequest>) -> CaptureResult<Self> {
        if regions.is_empty() {
            return Err(CaptureError::InvalidRequest(
                "capture request contains no regions".into(),
            ));
        }
        if canvas_rect.is_empty() {
            return Err(CaptureError::InvalidRequest(
                "canvas rectangle must be non-empty".into(),
            ));
        }
        for region in &regions {
            if region.dest_rect.is_empty() {
                return Err(CaptureError::InvalidRequest(
                    "region rectangle must be non-empty".into(),
                ));
            }
        }
        Ok(Self {
            regions,
            canvas_rect,
        })
    }

    /// Build a request whose canvas is the union bounding box of the
    /// regions' destination rects.
    pub fn bounding(regions: Vec<RegionRequest>) -> CaptureResult<Self> {
        let canvas_rect = regions
            .iter()
            .map(|region| region.dest_rect)
            .reduce(|acc, rect| acc.union(&rect))
            .ok_or_else(|| {
                CaptureError::InvalidRequest("capture request contains no regions".into())
            })?;
        Self::new(canvas_rect, regions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(name: &str, area: Rect) -> MonitorInfo {
        MonitorInfo {
            handle: 1,
            monitor_area: area,
            work_area: area,
            device_name: name.into(),
            is_primary: true,
        }
    }

    #[test]
    fn bounding_canvas_is_union_of_regions() {
        let request = CaptureRequest::bounding(vec![
            RegionRequest {
                dest_rect: Rect::new(0, 0, 100, 100),
                monitor: monitor("\\\\.\\DISPLAY1", Rect::new(0, 0, 1920, 1080)),
                capture_cursor: false,
            },
            RegionRequest {
                dest_rect: Rect::new(100, 0, 100, 100),
                monitor: monitor("\\\\.\\DISPLAY2", Rect::new(1920, 0, 1920, 1080)),
                capture_cursor: false,
            },
        ])
        .unwrap();
        assert_eq!(request.canvas_rect, Rect::new(0, 0, 200, 100));
    }

    #[test]
    fn empty_region_list_is_rejected() {
        assert!(matches!(
            CaptureRequest::bounding(Vec::new()),
            Err(CaptureError::InvalidRequest(_))
        ));
    }

    #[test]
    fn zero_area_region_is_rejected() {
        let result = CaptureRequest::bounding(vec![RegionRequest {
            dest_rect: Rect::new(0, 0, 0, 100),
            monitor: monitor("\\\\.\\DISPLAY1", Rect::new(0, 0, 1920, 1080)),
            capture_cursor: false,
        }]);
        assert!(matches!(result, Err(CaptureError::InvalidRequest(_))));
    }
}
