//! Windows device host: HMONITOR → adapter/output resolution and
//! per-adapter device state (device, immediate context, compiled
//! shaders, sampler). Plugged into the generic
//! [`DeviceRegistry`](crate::registry::DeviceRegistry).

use std::sync::Mutex;

use anyhow::Context;
use rustc_hash::FxHashMap;
use windows::Win32::Graphics::Direct3D11::{
    D3D11_COMPARISON_NEVER, D3D11_FILTER_MIN_MAG_MIP_LINEAR, D3D11_SAMPLER_DESC,
    D3D11_TEXTURE_ADDRESS_CLAMP, ID3D11Device, ID3D11DeviceContext, ID3D11SamplerState,
};
use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory1, DXGI_ERROR_NOT_FOUND, IDXGIAdapter, IDXGIFactory1, IDXGIOutput,
};
use windows::core::Interface;

use crate::error::{CaptureError, CaptureResult};
use crate::registry::DeviceHost;

use super::d3d11;
use super::shaders::{self, ShaderSet};

/// Packed adapter LUID, the registry's adapter key.
pub(crate) type AdapterLuid = u64;

/// Everything the capture pipeline needs from one adapter: the logical
/// device, its immediate context, and the shader state compiled for it.
pub(crate) struct DeviceState {
    pub device: ID3D11Device,
    pub context: ID3D11DeviceContext,
    pub shaders: ShaderSet,
    pub sampler: ID3D11SamplerState,
}

#[derive(Clone)]
struct ResolvedOutput {
    luid: AdapterLuid,
    adapter: IDXGIAdapter,
    output: IDXGIOutput,
}

pub(crate) struct D3dDeviceHost {
    factory: IDXGIFactory1,
    /// HMONITOR → resolved adapter/output, refreshed whenever a handle
    /// misses (display changes invalidate HMONITOR values).
    outputs: Mutex<FxHashMap<isize, ResolvedOutput>>,
}

fn luid_to_u64(luid: windows::Win32::Foundation::LUID) -> AdapterLuid {
    (u64::from(luid.HighPart as u32) << 32) | u64::from(luid.LowPart)
}

impl D3dDeviceHost {
    pub(crate) fn new() -> CaptureResult<Self> {
        let factory: IDXGIFactory1 = unsafe { CreateDXGIFactory1() }
            .context("CreateDXGIFactory1 failed")
            .map_err(CaptureError::Platform)?;
        Ok(Self {
            factory,
            outputs: Mutex::new(FxHashMap::default()),
        })
    }

    pub(crate) fn output_for_monitor(
        &self,
        handle: isize,
        device_name: &str,
    ) -> CaptureResult<IDXGIOutput> {
        Ok(self.resolve(handle, device_name)?.output)
    }

    fn resolve(&self, handle: isize, device_name: &str) -> CaptureResult<ResolvedOutput> {
        let mut outputs = self.outputs.lock().map_err(|_| {
            CaptureError::Platform(anyhow::anyhow!("device host output cache mutex was poisoned"))
        })?;

        if let Some(resolved) = outputs.get(&handle) {
            return Ok(resolved.clone());
        }

        // Miss: walk the adapter/output topology once and refresh the
        // whole mapping.
        outputs.clear();
        let mut adapter_idx = 0u32;
        loop {
            let adapter1 = match unsafe { self.factory.EnumAdapters1(adapter_idx) } {
                Ok(adapter) => adapter,
                Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
                Err(e) => {
                    return Err(CaptureError::Platform(
                        anyhow::Error::from(e)
                            .context(format!("EnumAdapters1({adapter_idx}) failed")),
                    ));
                }
            };
            let adapter_desc = unsafe { adapter1.GetDesc1() }
                .context("IDXGIAdapter1::GetDesc1 failed")
                .map_err(CaptureError::Platform)?;
            let luid = luid_to_u64(adapter_desc.AdapterLuid);

            let adapter: IDXGIAdapter = adapter1
                .cast()
                .context("failed to cast IDXGIAdapter1 to IDXGIAdapter")
                .map_err(CaptureError::Platform)?;

            let mut output_idx = 0u32;
            loop {
                let output = match unsafe { adapter.EnumOutputs(output_idx) } {
                    Ok(output) => output,
                    Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
                    Err(e) => {
                        return Err(CaptureError::Platform(anyhow::Error::from(e).context(
                            format!("EnumOutputs({output_idx}) on adapter {adapter_idx} failed"),
                        )));
                    }
                };

                let desc = unsafe { output.GetDesc() }
                    .context("IDXGIOutput::GetDesc failed")
                    .map_err(CaptureError::Platform)?;
                if desc.AttachedToDesktop.as_bool() {
                    outputs.insert(
                        desc.Monitor.0 as isize,
                        ResolvedOutput {
                            luid,
                            adapter: adapter.clone(),
                            output,
                        },
                    );
                }
                output_idx += 1;
            }
            adapter_idx += 1;
        }

        outputs
            .get(&handle)
            .cloned()
            .ok_or_else(|| CaptureError::MonitorNotFound(device_name.to_string()))
    }
}

impl DeviceHost for D3dDeviceHost {
    type AdapterId = AdapterLuid;
    type Device = DeviceState;

    fn adapter_for_monitor(
        &self,
        handle: isize,
        device_name: &str,
    ) -> CaptureResult<Self::AdapterId> {
        Ok(self.resolve(handle, device_name)?.luid)
    }

    fn create_device(&self, adapter: Self::AdapterId) -> CaptureResult<Self::Device> {
        let outputs = self.outputs.lock().map_err(|_| {
            CaptureError::Platform(anyhow::anyhow!("device host output cache mutex was poisoned"))
        })?;
        let resolved = outputs
            .values()
            .find(|resolved| resolved.luid == adapter)
            .cloned()
            .ok_or(CaptureError::NoDeviceAvailable)?;
        drop(outputs);

        let (device, context) = d3d11::create_device_for_adapter(&resolved.adapter)?;
        let shaders = shaders::create_shader_set(&device)?;
        let sampler = create_linear_clamp_sampler(&device)?;
        Ok(DeviceState {
            device,
            context,
            shaders,
            sampler,
        })
    }

    fn device_removed(&self, device: &Self::Device) -> bool {
        unsafe { device.device.GetDeviceRemovedReason() }.is_err()
    }
}

fn create_linear_clamp_sampler(device: &ID3D11Device) -> CaptureResult<ID3D11SamplerState> {
    let desc = D3D11_SAMPLER_DESC {
        Filter: D3D11_FILTER_MIN_MAG_MIP_LINEAR,
        AddressU: D3D11_TEXTURE_ADDRESS_CLAMP,
        AddressV: D3D11_TEXTURE_ADDRESS_CLAMP,
        AddressW: D3D11_TEXTURE_ADDRESS_CLAMP,
        ComparisonFunc: D3D11_COMPARISON_NEVER,
        MinLOD: 0.0,
        MaxLOD: 0.0,
        ..Default::default()
    };

    let mut sampler: Option<ID3D11SamplerState> = None;
    unsafe { device.CreateSamplerState(&desc, Some(&mut sampler)) }
        .context("CreateSamplerState failed")
        .map_err(CaptureError::Platform)?;
    sampler.ok_or_else(|| CaptureError::Platform(anyhow::anyhow!("sampler was not created")))
}
