//! Cursor-adapter region filter.
//!
//! True cross-GPU composition is unsupported, so a request touching
//! monitors on several adapters is narrowed to the adapter driving the
//! monitor under the cursor — the one the user is looking at. Planning
//! still enforces the single-adapter invariant afterwards.

use windows::Win32::Foundation::POINT;
use windows::Win32::Graphics::Gdi::{MONITOR_DEFAULTTONEAREST, MonitorFromPoint};
use windows::Win32::UI::WindowsAndMessaging::GetCursorPos;

use crate::error::CaptureResult;
use crate::registry::DeviceHost;
use crate::request::RegionRequest;

use super::devices::D3dDeviceHost;

fn cursor_monitor_handle() -> Option<isize> {
    let mut point = POINT::default();
    if unsafe { GetCursorPos(&mut point) }.is_err() {
        return None;
    }
    let monitor = unsafe { MonitorFromPoint(point, MONITOR_DEFAULTTONEAREST) };
    (!monitor.0.is_null()).then_some(monitor.0 as isize)
}

/// Keep only the regions living on the cursor's adapter. When the
/// cursor position is unavailable, the first region's monitor stands
/// in for it.
pub(crate) fn filter_regions_by_cursor_adapter(
    host: &D3dDeviceHost,
    regions: Vec<RegionRequest>,
) -> CaptureResult<Vec<RegionRequest>> {
    let Some(first) = regions.first() else {
        return Ok(regions);
    };

    let (anchor_handle, anchor_name) = match cursor_monitor_handle() {
        Some(handle) => (handle, String::new()),
        None => (first.monitor.handle, first.monitor.device_name.clone()),
    };
    let cursor_adapter = host.adapter_for_monitor(anchor_handle, &anchor_name)?;

    let mut filtered = Vec::with_capacity(regions.len());
    for region in regions {
        let adapter = host.adapter_for_monitor(region.monitor.handle, &region.monitor.device_name)?;
        if adapter == cursor_adapter {
            filtered.push(region);
        }
    }
    Ok(filtered)
}
