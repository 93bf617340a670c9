//! Output-duplication sessions, one per monitor handle.
//!
//! A session owns the live `IDXGIOutputDuplication`, a persistent
//! staging surface matching the negotiated capture format, and the HDR
//! flag derived from that format. Sessions are recreated on
//! non-transient acquisition failures and purged wholesale when the
//! monitor set shrinks or changes.

use anyhow::Context;
use log::debug;
use rustc_hash::FxHashMap;
use windows::Win32::Graphics::Direct3D11::{ID3D11Device, ID3D11Texture2D};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT, DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_FORMAT_R16G16B16A16_FLOAT,
};
use windows::Win32::Graphics::Dxgi::{
    DXGI_ERROR_WAIT_TIMEOUT, DXGI_OUTDUPL_FRAME_INFO, IDXGIOutput, IDXGIOutput1, IDXGIOutput5,
    IDXGIOutputDuplication, IDXGIResource,
};
use windows::core::Interface;

use crate::acquire::{self, FramePoll, FrameSource};
use crate::error::{CaptureError, CaptureResult};

use super::d3d11;

/// Negotiation order for `DuplicateOutput1`: native HDR first, SDR
/// fallback second.
const DUPLICATION_FORMATS: [DXGI_FORMAT; 2] =
    [DXGI_FORMAT_R16G16B16A16_FLOAT, DXGI_FORMAT_B8G8R8A8_UNORM];

pub(crate) struct DuplicationSession {
    duplication: IDXGIOutputDuplication,
    output: IDXGIOutput,
    staging: Option<ID3D11Texture2D>,
    width: u32,
    height: u32,
    format: DXGI_FORMAT,
    is_hdr: bool,
}

impl DuplicationSession {
    fn create(device: &ID3D11Device, output: &IDXGIOutput) -> CaptureResult<Self> {
        let duplication = duplicate_output(output, device)?;

        let desc = unsafe { duplication.GetDesc() };
        let format = desc.ModeDesc.Format;
        if format != DXGI_FORMAT_R16G16B16A16_FLOAT && format != DXGI_FORMAT_B8G8R8A8_UNORM {
            return Err(CaptureError::UnsupportedPixelFormat(format!("{format:?}")));
        }
        let is_hdr = format == DXGI_FORMAT_R16G16B16A16_FLOAT;

        let mut session = Self {
            duplication,
            output: output.clone(),
            staging: None,
            width: desc.ModeDesc.Width,
            height: desc.ModeDesc.Height,
            format,
            is_hdr,
        };
        session.ensure_staging(device)?;
        Ok(session)
    }

    /// The staging format always matches the duplication's negotiated
    /// mode format; a session whose staging was freed by the retention
    /// policy re-creates it here.
    fn ensure_staging(&mut self, device: &ID3D11Device) -> CaptureResult<&ID3D11Texture2D> {
        if self.staging.is_none() {
            self.staging = Some(d3d11::create_staging_texture(
                device,
                self.width,
                self.height,
                self.format,
                true,
            )?);
        }
        Ok(self.staging.as_ref().unwrap())
    }

    pub(crate) fn is_hdr(&self) -> bool {
        self.is_hdr
    }

    pub(crate) fn staging(&self) -> CaptureResult<&ID3D11Texture2D> {
        self.staging
            .as_ref()
            .ok_or_else(|| CaptureError::Platform(anyhow::anyhow!("staging surface was released")))
    }

    /// Run the acquisition loop until a presented frame arrives. The
    /// caller must run [`DuplicationSession::release_frame`] after the
    /// region is processed, on every path.
    pub(crate) fn acquire_frame(
        &mut self,
        device: &ID3D11Device,
    ) -> CaptureResult<ID3D11Texture2D> {
        let mut source = SessionFrameSource {
            session: self,
            device,
        };
        acquire::acquire_presented_frame(&mut source)
    }

    /// Release the OS frame handle and, per the retention policy, the
    /// staging surface. Always runs after a region is processed.
    pub(crate) fn release_frame(&mut self, include_buffer: bool) {
        unsafe { self.duplication.ReleaseFrame() }.ok();
        if include_buffer {
            self.staging = None;
        }
    }

    fn recreate(&mut self, device: &ID3D11Device) -> CaptureResult<()> {
        unsafe { self.duplication.ReleaseFrame() }.ok();
        let fresh = Self::create(device, &self.output)?;
        *self = fresh;
        Ok(())
    }

    fn poll(
        &mut self,
        timeout_ms: u32,
        accept_unpresented: bool,
    ) -> CaptureResult<FramePoll<ID3D11Texture2D>> {
        // A frame from a previous poll may still be held; duplication
        // allows at most one outstanding frame.
        unsafe { self.duplication.ReleaseFrame() }.ok();

        let mut info = DXGI_OUTDUPL_FRAME_INFO::default();
        let mut resource: Option<IDXGIResource> = None;
        let acquired =
            unsafe { self.duplication.AcquireNextFrame(timeout_ms, &mut info, &mut resource) };
        if let Err(error) = acquired {
            if error.code() == DXGI_ERROR_WAIT_TIMEOUT {
                return Ok(FramePoll::Timeout);
            }
            // Access lost and everything else: the loop recreates us.
            return Err(CaptureError::Platform(
                anyhow::Error::from(error).context("AcquireNextFrame failed"),
            ));
        }

        if info.LastPresentTime == 0 && !accept_unpresented {
            unsafe { self.duplication.ReleaseFrame() }.ok();
            return Ok(FramePoll::NotPresented);
        }

        let Some(resource) = resource else {
            unsafe { self.duplication.ReleaseFrame() }.ok();
            return Ok(FramePoll::NotPresented);
        };
        let texture: ID3D11Texture2D = resource
            .cast()
            .context("failed to cast acquired IDXGIResource to ID3D11Texture2D")
            .map_err(CaptureError::Platform)?;
        Ok(FramePoll::Frame(texture))
    }
}

struct SessionFrameSource<'a> {
    session: &'a mut DuplicationSession,
    device: &'a ID3D11Device,
}

impl FrameSource for SessionFrameSource<'_> {
    type Frame = ID3D11Texture2D;

    fn try_acquire(
        &mut self,
        timeout_ms: u32,
        accept_unpresented: bool,
    ) -> CaptureResult<FramePoll<ID3D11Texture2D>> {
        self.session.poll(timeout_ms, accept_unpresented)
    }

    fn recreate(&mut self) -> CaptureResult<()> {
        self.session.recreate(self.device)
    }
}

fn duplicate_output(
    output: &IDXGIOutput,
    device: &ID3D11Device,
) -> CaptureResult<IDXGIOutputDuplication> {
    // IDXGIOutput5 negotiates the native format (HDR float on advanced
    // color displays); plain DuplicateOutput is the SDR-only fallback
    // for older systems.
    if let Ok(output5) = output.cast::<IDXGIOutput5>() {
        if let Ok(duplication) = unsafe { output5.DuplicateOutput1(device, 0, &DUPLICATION_FORMATS) }
        {
            return Ok(duplication);
        }
    }

    let output1: IDXGIOutput1 = output
        .cast()
        .context("failed to query IDXGIOutput1")
        .map_err(CaptureError::Platform)?;
    unsafe { output1.DuplicateOutput(device) }
        .context("DuplicateOutput failed")
        .map_err(CaptureError::Platform)
}

/// Session map keyed by monitor handle. Owned by the engine; captures
/// are synchronous and exclusive, so the map itself needs no lock.
#[derive(Default)]
pub(crate) struct DuplicationMap {
    sessions: FxHashMap<isize, DuplicationSession>,
}

impl DuplicationMap {
    /// Get or create the session for a monitor.
    ///
    /// When the session count exceeds the live monitor count the whole
    /// map is purged first — handles go stale when the monitor set
    /// changes, and a partial purge would leave orphaned duplications
    /// holding GPU memory.
    pub(crate) fn acquire(
        &mut self,
        device: &ID3D11Device,
        output: &IDXGIOutput,
        monitor_handle: isize,
        monitor_count: usize,
        reuse_buffers: bool,
        force_recreate: bool,
    ) -> CaptureResult<&mut DuplicationSession> {
        if self.sessions.len() > monitor_count {
            debug!(
                "duplication map: monitor count changed ({} sessions, {monitor_count} monitors); purging",
                self.sessions.len()
            );
            self.purge();
        }

        if force_recreate {
            self.sessions.remove(&monitor_handle);
        }

        if !self.sessions.contains_key(&monitor_handle) {
            let session = DuplicationSession::create(device, output)?;
            self.sessions.insert(monitor_handle, session);
        }

        let session = self.sessions.get_mut(&monitor_handle).unwrap();
        if !reuse_buffers {
            session.staging = None;
        }
        session.ensure_staging(device)?;
        Ok(session)
    }

    /// Drop every session (monitor-set change, engine reinit, or the
    /// aggressive retention modes).
    pub(crate) fn purge(&mut self) {
        self.sessions.clear();
    }
}
