//! Monitor enumeration helper.
//!
//! The engine accepts caller-supplied [`MonitorInfo`] records; this is
//! the built-in enumerator for hosts without their own.

use std::mem::size_of;

use windows::Win32::Foundation::{LPARAM, RECT};
use windows::Win32::Graphics::Gdi::{
    EnumDisplayMonitors, GetMonitorInfoW, HDC, HMONITOR, MONITORINFO, MONITORINFOEXW,
    MONITORINFOF_PRIMARY,
};
use windows::core::BOOL;

use crate::error::{CaptureError, CaptureResult};
use crate::monitor::{MonitorInfo, Rect};

use super::caps::utf16z_to_string;

fn rect_from_win32(rect: RECT) -> Rect {
    Rect::new(
        rect.left,
        rect.top,
        (rect.right - rect.left).max(0) as u32,
        (rect.bottom - rect.top).max(0) as u32,
    )
}

unsafe extern "system" fn collect_monitor(
    monitor: HMONITOR,
    _hdc: HDC,
    _clip: *mut RECT,
    state: LPARAM,
) -> BOOL {
    let handles = unsafe { &mut *(state.0 as *mut Vec<isize>) };
    handles.push(monitor.0 as isize);
    BOOL::from(true)
}

/// Enumerate attached monitors in the OS iteration order.
pub fn enumerate_monitors() -> CaptureResult<Vec<MonitorInfo>> {
    let mut handles: Vec<isize> = Vec::new();
    let state = LPARAM(&mut handles as *mut Vec<isize> as isize);
    if !unsafe { EnumDisplayMonitors(None, None, Some(collect_monitor), state) }.as_bool() {
        return Err(CaptureError::Platform(anyhow::anyhow!(
            "EnumDisplayMonitors failed"
        )));
    }

    let mut monitors = Vec::with_capacity(handles.len());
    for handle in handles {
        let hmonitor = HMONITOR(handle as *mut std::ffi::c_void);
        let mut info = MONITORINFOEXW {
            monitorInfo: MONITORINFO {
                cbSize: size_of::<MONITORINFOEXW>() as u32,
                ..Default::default()
            },
            ..Default::default()
        };
        if !unsafe { GetMonitorInfoW(hmonitor, (&mut info as *mut MONITORINFOEXW).cast()) }
            .as_bool()
        {
            continue;
        }

        let device_name = utf16z_to_string(&info.szDevice);
        monitors.push(MonitorInfo {
            handle,
            monitor_area: rect_from_win32(info.monitorInfo.rcMonitor),
            work_area: rect_from_win32(info.monitorInfo.rcWork),
            device_name,
            is_primary: (info.monitorInfo.dwFlags & MONITORINFOF_PRIMARY) != 0,
        });
    }

    if monitors.is_empty() {
        return Err(CaptureError::Platform(anyhow::anyhow!(
            "no attached monitors were enumerated"
        )));
    }
    Ok(monitors)
}
