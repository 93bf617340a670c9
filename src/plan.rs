//! Capture planning: translate a [`CaptureRequest`] into per-region
//! source/destination rectangles and enforce the single-adapter invariant
//! before any GPU work happens.

use crate::error::{CaptureError, CaptureResult};
use crate::monitor::Rect;
use crate::request::CaptureRequest;

/// Resolves a monitor handle to the adapter driving it.
///
/// The platform layer implements this against DXGI; tests substitute a
/// table-backed mock.
pub(crate) trait AdapterResolver {
    type AdapterId: Copy + PartialEq;

    fn adapter_for_monitor(&self, handle: isize, device_name: &str)
    -> CaptureResult<Self::AdapterId>;
}

/// One planned region: where to read in the monitor surface and where to
/// write in the canvas.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RegionPlan {
    /// Index into `CaptureRequest::regions`.
    pub index: usize,
    /// Sub-rectangle inside the monitor's captured surface.
    pub src_rect: Rect,
    /// Placement inside the canvas, origin at the canvas rect's corner.
    pub dst_rect: Rect,
}

/// Compute per-region rectangles. Pure coordinate math: the source rect
/// is the destination rect translated into monitor-local space, the
/// canvas rect is the destination rect translated by the canvas origin.
pub(crate) fn plan_regions(request: &CaptureRequest) -> CaptureResult<Vec<RegionPlan>> {
    let canvas = request.canvas_rect;
    let mut plans = Vec::with_capacity(request.regions.len());
    for (index, region) in request.regions.iter().enumerate() {
        let dest = region.dest_rect;
        let area = region.monitor.monitor_area;

        let src_x = dest.x - area.x;
        let src_y = dest.y - area.y;
        if src_x < 0
            || src_y < 0
            || dest.right() > area.right()
            || dest.bottom() > area.bottom()
        {
            return Err(CaptureError::InvalidRequest(format!(
                "region {index} does not lie within monitor {}",
                region.monitor.device_name
            )));
        }

        let dst_x = dest.x - canvas.x;
        let dst_y = dest.y - canvas.y;
        if dst_x < 0
            || dst_y < 0
            || dest.right() > canvas.right()
            || dest.bottom() > canvas.bottom()
        {
            return Err(CaptureError::InvalidRequest(format!(
                "region {index} does not lie within the canvas rectangle"
            )));
        }

        plans.push(RegionPlan {
            index,
            src_rect: Rect::new(src_x, src_y, dest.width, dest.height),
            dst_rect: Rect::new(dst_x, dst_y, dest.width, dest.height),
        });
    }
    Ok(plans)
}

/// Check that every region resolves through the same adapter and return
/// it. Fails `CrossAdapterCaptureUnsupported` otherwise — before any
/// frame is acquired, so a rejected request never produces partial
/// output.
pub(crate) fn resolve_common_adapter<R: AdapterResolver>(
    resolver: &R,
    request: &CaptureRequest,
) -> CaptureResult<R::AdapterId> {
    let mut common: Option<R::AdapterId> = None;
    for region in &request.regions {
        let adapter =
            resolver.adapter_for_monitor(region.monitor.handle, &region.monitor.device_name)?;
        match common {
            None => common = Some(adapter),
            Some(existing) if existing == adapter => {}
            Some(_) => return Err(CaptureError::CrossAdapterCaptureUnsupported),
        }
    }
    common.ok_or_else(|| CaptureError::InvalidRequest("capture request contains no regions".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::MonitorInfo;
    use crate::request::RegionRequest;

    struct MapResolver {
        // (handle, adapter id)
        entries: Vec<(isize, u64)>,
    }

    impl AdapterResolver for MapResolver {
        type AdapterId = u64;

        fn adapter_for_monitor(
            &self,
            handle: isize,
            device_name: &str,
        ) -> CaptureResult<Self::AdapterId> {
            self.entries
                .iter()
                .find(|(h, _)| *h == handle)
                .map(|(_, adapter)| *adapter)
                .ok_or_else(|| CaptureError::MonitorNotFound(device_name.to_string()))
        }
    }

    fn region(handle: isize, area: Rect, dest: Rect) -> RegionRequest {
        RegionRequest {
            dest_rect: dest,
            monitor: MonitorInfo {
                handle,
                monitor_area: area,
                work_area: area,
                device_name: format!("\\\\.\\DISPLAY{handle}"),
                is_primary: handle == 1,
            },
            capture_cursor: false,
        }
    }

    #[test]
    fn source_rects_are_monitor_local_and_dest_rects_canvas_local() {
        let request = CaptureRequest::bounding(vec![
            region(
                1,
                Rect::new(0, 0, 1920, 1080),
                Rect::new(1820, 980, 100, 100),
            ),
            region(
                2,
                Rect::new(1920, 0, 1920, 1080),
                Rect::new(1920, 980, 100, 100),
            ),
        ])
        .unwrap();

        let plans = plan_regions(&request).unwrap();
        assert_eq!(plans[0].src_rect, Rect::new(1820, 980, 100, 100));
        assert_eq!(plans[1].src_rect, Rect::new(0, 980, 100, 100));
        // Canvas rect is (1820, 980)..(2020, 1080).
        assert_eq!(plans[0].dst_rect, Rect::new(0, 0, 100, 100));
        assert_eq!(plans[1].dst_rect, Rect::new(100, 0, 100, 100));
    }

    #[test]
    fn region_outside_its_monitor_is_rejected() {
        let request = CaptureRequest::bounding(vec![region(
            1,
            Rect::new(0, 0, 1920, 1080),
            Rect::new(1900, 0, 100, 100),
        )])
        .unwrap();
        assert!(matches!(
            plan_regions(&request),
            Err(CaptureError::InvalidRequest(_))
        ));
    }

    #[test]
    fn spanning_two_adapters_is_rejected_before_composition() {
        let resolver = MapResolver {
            entries: vec![(1, 10), (2, 20)],
        };
        let request = CaptureRequest::bounding(vec![
            region(1, Rect::new(0, 0, 1920, 1080), Rect::new(0, 0, 100, 100)),
            region(
                2,
                Rect::new(1920, 0, 1920, 1080),
                Rect::new(1920, 0, 100, 100),
            ),
        ])
        .unwrap();
        assert!(matches!(
            resolve_common_adapter(&resolver, &request),
            Err(CaptureError::CrossAdapterCaptureUnsupported)
        ));
    }

    #[test]
    fn same_adapter_regions_resolve() {
        let resolver = MapResolver {
            entries: vec![(1, 10), (2, 10)],
        };
        let request = CaptureRequest::bounding(vec![
            region(1, Rect::new(0, 0, 1920, 1080), Rect::new(0, 0, 100, 100)),
            region(
                2,
                Rect::new(1920, 0, 1920, 1080),
                Rect::new(1920, 0, 100, 100),
            ),
        ])
        .unwrap();
        assert_eq!(resolve_common_adapter(&resolver, &request).unwrap(), 10);
    }

    #[test]
    fn unknown_monitor_surfaces_monitor_not_found() {
        let resolver = MapResolver { entries: vec![] };
        let request = CaptureRequest::bounding(vec![region(
            7,
            Rect::new(0, 0, 1920, 1080),
            Rect::new(0, 0, 100, 100),
        )])
        .unwrap();
        assert!(matches!(
            resolve_common_adapter(&resolver, &request),
            Err(CaptureError::MonitorNotFound(_))
        ));
    }
}
