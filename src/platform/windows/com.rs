use anyhow::Context;
use windows::Win32::Foundation::RPC_E_CHANGED_MODE;
use windows::Win32::System::Com::{COINIT_MULTITHREADED, CoInitializeEx, CoUninitialize};

use crate::error::{CaptureError, CaptureResult};

/// Balances `CoInitializeEx` with `CoUninitialize` for the thread the
/// engine was created on. A host that already initialized COM in a
/// different apartment mode is tolerated (no uninit on drop then).
pub(crate) struct ComGuard {
    should_uninit: bool,
}

impl ComGuard {
    pub(crate) fn init() -> CaptureResult<Self> {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr == RPC_E_CHANGED_MODE {
            return Ok(Self {
                should_uninit: false,
            });
        }

        hr.ok()
            .context("CoInitializeEx(COINIT_MULTITHREADED) failed")
            .map_err(CaptureError::Platform)?;
        Ok(Self {
            should_uninit: true,
        })
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        if self.should_uninit {
            unsafe {
                CoUninitialize();
            }
        }
    }
}
