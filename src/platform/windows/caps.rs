//! Display-capability query: advanced-color state and SDR white level
//! from the display-configuration API, panel luminance limits from
//! DXGI. Each source answers independently; whatever cannot be queried
//! stays `None` in the returned record set.

use std::mem;

use rustc_hash::FxHashMap;
use windows::Win32::Devices::Display::{
    DISPLAYCONFIG_DEVICE_INFO_GET_ADVANCED_COLOR_INFO,
    DISPLAYCONFIG_DEVICE_INFO_GET_SDR_WHITE_LEVEL, DISPLAYCONFIG_DEVICE_INFO_GET_SOURCE_NAME,
    DISPLAYCONFIG_DEVICE_INFO_HEADER, DISPLAYCONFIG_GET_ADVANCED_COLOR_INFO,
    DISPLAYCONFIG_MODE_INFO, DISPLAYCONFIG_PATH_INFO, DISPLAYCONFIG_SDR_WHITE_LEVEL,
    DISPLAYCONFIG_SOURCE_DEVICE_NAME, DisplayConfigGetDeviceInfo, GetDisplayConfigBufferSizes,
    QDC_ONLY_ACTIVE_PATHS, QueryDisplayConfig,
};
use windows::Win32::Graphics::Dxgi::IDXGIOutput6;
use windows::core::Interface;

use crate::monitor::{
    CapabilityQuery, ColorCapability, DisplayCapabilities, MonitorInfo, PanelCapability,
    SdrWhiteCapability,
};

use super::devices::D3dDeviceHost;

/// Advanced-color bits in `DISPLAYCONFIG_GET_ADVANCED_COLOR_INFO.value`:
/// supported (0x1) and enabled (0x2).
const ADVANCED_COLOR_SUPPORTED: u32 = 0x1;
const ADVANCED_COLOR_ENABLED: u32 = 0x2;

#[derive(Clone, Copy, Default)]
struct DisplayConfigRecord {
    advanced_color_enabled: bool,
    bits_per_channel: u32,
    sdr_white_level_nits: Option<f32>,
}

pub(crate) fn utf16z_to_string(input: &[u16]) -> String {
    let len = input.iter().position(|&ch| ch == 0).unwrap_or(input.len());
    String::from_utf16_lossy(&input[..len])
}

/// Query every active display path once and key the results by GDI
/// device name (`\\.\DISPLAY<n>`).
fn query_displayconfig_records() -> FxHashMap<String, DisplayConfigRecord> {
    let mut path_count = 0u32;
    let mut mode_count = 0u32;
    if unsafe {
        GetDisplayConfigBufferSizes(QDC_ONLY_ACTIVE_PATHS, &mut path_count, &mut mode_count)
    }
    .ok()
    .is_err()
        || path_count == 0
    {
        return FxHashMap::default();
    }

    let mut paths = vec![DISPLAYCONFIG_PATH_INFO::default(); path_count as usize];
    let mut modes = vec![DISPLAYCONFIG_MODE_INFO::default(); mode_count as usize];
    if unsafe {
        QueryDisplayConfig(
            QDC_ONLY_ACTIVE_PATHS,
            &mut path_count,
            paths.as_mut_ptr(),
            &mut mode_count,
            modes.as_mut_ptr(),
            None,
        )
    }
    .ok()
    .is_err()
    {
        return FxHashMap::default();
    }

    let mut map = FxHashMap::default();
    let count = usize::min(path_count as usize, paths.len());
    for path in &paths[..count] {
        let mut source = DISPLAYCONFIG_SOURCE_DEVICE_NAME {
            header: DISPLAYCONFIG_DEVICE_INFO_HEADER {
                r#type: DISPLAYCONFIG_DEVICE_INFO_GET_SOURCE_NAME,
                size: mem::size_of::<DISPLAYCONFIG_SOURCE_DEVICE_NAME>() as u32,
                adapterId: path.sourceInfo.adapterId,
                id: path.sourceInfo.id,
            },
            ..Default::default()
        };
        if unsafe { DisplayConfigGetDeviceInfo(&mut source.header) } != 0 {
            continue;
        }
        let gdi_name = utf16z_to_string(&source.viewGdiDeviceName);
        if gdi_name.is_empty() {
            continue;
        }

        let mut advanced = DISPLAYCONFIG_GET_ADVANCED_COLOR_INFO {
            header: DISPLAYCONFIG_DEVICE_INFO_HEADER {
                r#type: DISPLAYCONFIG_DEVICE_INFO_GET_ADVANCED_COLOR_INFO,
                size: mem::size_of::<DISPLAYCONFIG_GET_ADVANCED_COLOR_INFO>() as u32,
                adapterId: path.targetInfo.adapterId,
                id: path.targetInfo.id,
            },
            ..Default::default()
        };
        let (advanced_color_enabled, bits_per_channel) =
            if unsafe { DisplayConfigGetDeviceInfo(&mut advanced.header) } == 0 {
                let flags = unsafe { advanced.Anonymous.value };
                let enabled = (flags & ADVANCED_COLOR_SUPPORTED) != 0
                    && (flags & ADVANCED_COLOR_ENABLED) != 0;
                (enabled, advanced.bitsPerColorChannel)
            } else {
                (false, 0)
            };

        let mut sdr_white = DISPLAYCONFIG_SDR_WHITE_LEVEL {
            header: DISPLAYCONFIG_DEVICE_INFO_HEADER {
                r#type: DISPLAYCONFIG_DEVICE_INFO_GET_SDR_WHITE_LEVEL,
                size: mem::size_of::<DISPLAYCONFIG_SDR_WHITE_LEVEL>() as u32,
                adapterId: path.targetInfo.adapterId,
                id: path.targetInfo.id,
            },
            ..Default::default()
        };
        // The OS reports SDR white in thousandths of the 80-nit
        // reference; 1000 = 80 nits.
        let sdr_white_level_nits = if unsafe { DisplayConfigGetDeviceInfo(&mut sdr_white.header) }
            == 0
        {
            Some((sdr_white.SDRWhiteLevel as f32) * 80.0 / 1000.0)
        } else {
            None
        };

        let entry: &mut DisplayConfigRecord = map.entry(gdi_name).or_default();
        entry.advanced_color_enabled |= advanced_color_enabled;
        if entry.bits_per_channel == 0 {
            entry.bits_per_channel = bits_per_channel;
        }
        if entry.sdr_white_level_nits.is_none() {
            entry.sdr_white_level_nits = sdr_white_level_nits;
        }
    }

    map
}

/// Capability provider backed by the display-configuration API and the
/// device host's DXGI output mapping.
pub(crate) struct WindowsCapabilityQuery<'a> {
    host: &'a D3dDeviceHost,
}

impl<'a> WindowsCapabilityQuery<'a> {
    pub(crate) fn new(host: &'a D3dDeviceHost) -> Self {
        Self { host }
    }

    fn query_panel(&self, monitor: &MonitorInfo) -> Option<(PanelCapability, u32)> {
        let output = self
            .host
            .output_for_monitor(monitor.handle, &monitor.device_name)
            .ok()?;
        let output6: IDXGIOutput6 = output.cast().ok()?;
        let desc1 = unsafe { output6.GetDesc1() }.ok()?;

        let panel = PanelCapability {
            max_luminance_nits: desc1.MaxLuminance,
            min_luminance_nits: desc1.MinLuminance,
            max_full_frame_luminance_nits: desc1.MaxFullFrameLuminance,
        };
        (panel.max_luminance_nits.is_finite() && panel.max_luminance_nits > 0.0)
            .then_some((panel, desc1.BitsPerColor))
    }
}

impl CapabilityQuery for WindowsCapabilityQuery<'_> {
    fn query(&self, monitor: &MonitorInfo) -> DisplayCapabilities {
        let mut caps = DisplayCapabilities::default();

        let records = query_displayconfig_records();
        if let Some(record) = records.get(&monitor.device_name) {
            caps.color = Some(ColorCapability {
                advanced_color_enabled: record.advanced_color_enabled,
                bits_per_channel: record.bits_per_channel,
            });
            caps.sdr_white = record
                .sdr_white_level_nits
                .map(|white_level_nits| SdrWhiteCapability { white_level_nits });
        }

        if let Some((panel, bits_per_color)) = self.query_panel(monitor) {
            caps.panel = Some(panel);
            // DXGI's bit depth wins over the display-config answer when
            // both are present.
            if bits_per_color > 0 {
                let advanced = caps.color.map(|c| c.advanced_color_enabled).unwrap_or(false);
                caps.color = Some(ColorCapability {
                    advanced_color_enabled: advanced,
                    bits_per_channel: bits_per_color,
                });
            }
        }

        caps
    }
}
