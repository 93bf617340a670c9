pub(crate) mod caps;
pub(crate) mod com;
pub(crate) mod compositor;
pub(crate) mod cursor;
pub(crate) mod d3d11;
pub(crate) mod devices;
pub(crate) mod duplication;
pub(crate) mod enumerate;
pub(crate) mod shaders;
pub(crate) mod tonemap_gpu;

use std::sync::Arc;

use log::{debug, warn};
use windows::Win32::Graphics::Direct3D11::ID3D11Texture2D;

use crate::analysis;
use crate::canvas::PixelBuffer;
use crate::error::{CaptureError, CaptureResult};
use crate::monitor::CapabilityQuery;
use crate::plan::{self, RegionPlan};
use crate::policy::HdrSettings;
use crate::registry::DeviceRegistry;
use crate::request::{CaptureRequest, RegionRequest};
use crate::tonemap;

use caps::WindowsCapabilityQuery;
use com::ComGuard;
use devices::{D3dDeviceHost, DeviceState};
use duplication::DuplicationMap;

pub use enumerate::enumerate_monitors;

/// The capture engine: device registry, duplication sessions, and the
/// composition pipeline for one thread.
///
/// Captures are synchronous on the calling thread; the engine holds no
/// worker threads and offers no cancellation. Devices are shared per
/// adapter through the registry's lock; everything else is owned
/// exclusively by the engine.
pub struct CaptureEngine {
    _com: ComGuard,
    settings: HdrSettings,
    registry: DeviceRegistry<D3dDeviceHost>,
    sessions: DuplicationMap,
}

impl CaptureEngine {
    pub fn new(settings: HdrSettings) -> CaptureResult<Self> {
        let com = ComGuard::init()?;
        let registry = DeviceRegistry::new(D3dDeviceHost::new()?);
        let mut engine = Self {
            _com: com,
            settings,
            registry,
            sessions: DuplicationMap::default(),
        };
        if engine.settings.save_devices() {
            engine.preinitialize_devices();
        }
        Ok(engine)
    }

    pub fn settings(&self) -> &HdrSettings {
        &self.settings
    }

    /// Replace the capture policy. Retention changes take effect on the
    /// next capture.
    pub fn set_settings(&mut self, settings: HdrSettings) {
        self.settings = settings;
    }

    /// Best-effort device warm-up for every attached monitor, so the
    /// first capture doesn't pay adapter enumeration and shader
    /// creation.
    fn preinitialize_devices(&mut self) {
        let Ok(monitors) = enumerate_monitors() else {
            return;
        };
        for monitor in monitors {
            if let Err(error) = self
                .registry
                .device_for_monitor(monitor.handle, &monitor.device_name)
            {
                warn!("device pre-initialization failed for {monitor}: {error}");
            }
        }
    }

    /// Tear down every cached mapping, session, and device, then start
    /// fresh. Used when the monitor topology changed under us.
    fn reinitialize(&mut self) -> CaptureResult<()> {
        debug!("capture engine: full reinitialization");
        self.sessions.purge();
        self.registry.purge()?;
        self.registry = DeviceRegistry::new(D3dDeviceHost::new()?);
        if self.settings.save_devices() {
            self.preinitialize_devices();
        }
        Ok(())
    }

    /// Capture all regions of `request` into one composited pixel
    /// buffer.
    ///
    /// Fails as a whole: any error after validation tears down per-call
    /// and cached resources, reinitializes the registry and sessions,
    /// and surfaces one wrapped error — never a partial image.
    pub fn capture(&mut self, request: &CaptureRequest) -> CaptureResult<PixelBuffer> {
        // Cross-GPU requests are narrowed to the cursor's adapter. A
        // stale monitor mapping here gets one full reinitialization and
        // retry before the call fails.
        let regions = match self.filter_to_cursor_adapter(&request.regions) {
            Ok(regions) => regions,
            Err(error) if error.wants_reinit() => {
                warn!("stale monitor mapping ({error}); reinitializing devices");
                self.reinitialize()?;
                self.filter_to_cursor_adapter(&request.regions)
                    .map_err(|error| {
                        error.wrapped("monitor could not be resolved after reinitialization")
                    })?
            }
            Err(error) => return Err(error),
        };
        if regions.is_empty() {
            return Err(CaptureError::InvalidRequest(
                "no capture region lies on the active adapter".into(),
            ));
        }
        let request = CaptureRequest::new(request.canvas_rect, regions)?;

        // Validation before any GPU work: rejected requests (regions
        // out of bounds, regions spanning adapters) propagate their own
        // error kind and leave no partial state behind.
        let plans = plan::plan_regions(&request)?;
        let adapter = plan::resolve_common_adapter(&self.registry, &request)?;

        match self.compose(&request, &plans, adapter) {
            Ok(buffer) => {
                if self.settings.release_buffers_after_capture() {
                    self.sessions.purge();
                }
                self.registry.release_cached(&self.settings)?;
                Ok(buffer)
            }
            Err(error) => {
                // Catastrophic path: release everything this call and
                // the caches hold, reinitialize, surface one wrapped
                // error.
                self.sessions.purge();
                if let Err(reinit_error) = self.reinitialize() {
                    warn!("reinitialization after failed capture also failed: {reinit_error}");
                }
                Err(error.wrapped("HDR screenshot capture failed"))
            }
        }
    }

    fn filter_to_cursor_adapter(
        &self,
        regions: &[RegionRequest],
    ) -> CaptureResult<Vec<RegionRequest>> {
        cursor::filter_regions_by_cursor_adapter(self.registry.host(), regions.to_vec())
    }

    fn compose(
        &mut self,
        request: &CaptureRequest,
        plans: &[RegionPlan],
        adapter: devices::AdapterLuid,
    ) -> CaptureResult<PixelBuffer> {
        let state = self.registry.device_for_adapter(adapter)?;

        let canvas = d3d11::create_canvas_texture(
            &state.device,
            request.canvas_rect.width,
            request.canvas_rect.height,
        )?;

        let monitor_count = enumerate_monitors().map(|monitors| monitors.len())?;
        for (region, region_plan) in request.regions.iter().zip(plans.iter()) {
            self.compose_region(&state, &canvas, region, *region_plan, monitor_count)?;
        }

        compositor::readback_canvas(&state.device, &state.context, &canvas)
    }

    fn compose_region(
        &mut self,
        state: &Arc<DeviceState>,
        canvas: &ID3D11Texture2D,
        region: &RegionRequest,
        region_plan: RegionPlan,
        monitor_count: usize,
    ) -> CaptureResult<()> {
        let output = self
            .registry
            .host()
            .output_for_monitor(region.monitor.handle, &region.monitor.device_name)?;

        let session = self.sessions.acquire(
            &state.device,
            &output,
            region.monitor.handle,
            monitor_count,
            self.settings.reuse_buffers(),
            false,
        )?;

        let frame = session.acquire_frame(&state.device)?;
        let result = (|| -> CaptureResult<()> {
            compositor::copy_frame_to_staging(&state.context, session.staging()?, &frame)?;

            if session.is_hdr() {
                let caps = WindowsCapabilityQuery::new(self.registry.host()).query(&region.monitor);
                let pixels = compositor::read_staging_region_f16(
                    &state.context,
                    session.staging()?,
                    region_plan.src_rect,
                )?;

                if self.settings.force_cpu_tonemap {
                    let bgra = tonemap::tonemap_on_cpu(&pixels, &caps, &self.settings)?;
                    compositor::upload_region_to_canvas(
                        &state.context,
                        canvas,
                        region_plan.dst_rect,
                        &bgra,
                    )?;
                } else {
                    let stats = analysis::analyze(&pixels)?;
                    let (vertex_constants, pixel_constants) =
                        tonemap::derive_constants(&caps, &self.settings, &stats);
                    tonemap_gpu::tonemap_on_gpu(
                        state,
                        &frame,
                        canvas,
                        region_plan.src_rect,
                        region_plan.dst_rect,
                        &vertex_constants,
                        &pixel_constants,
                    )?;
                }
            } else {
                compositor::copy_region_to_canvas(
                    &state.context,
                    canvas,
                    session.staging()?,
                    region_plan.src_rect,
                    region_plan.dst_rect,
                )?;
            }
            Ok(())
        })();

        // The OS frame handle is released on success and failure alike;
        // the staging surface follows the retention policy.
        session.release_frame(!self.settings.reuse_buffers());
        result
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.sessions.purge();
        let _ = self.registry.purge();
    }
}
