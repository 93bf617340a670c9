use anyhow::Context;
use windows::Win32::Graphics::Direct3D::{D3D_DRIVER_TYPE_UNKNOWN, D3D_FEATURE_LEVEL_11_0};
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BIND_RENDER_TARGET, D3D11_CPU_ACCESS_READ, D3D11_CPU_ACCESS_WRITE,
    D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_SDK_VERSION, D3D11_TEXTURE2D_DESC, D3D11_USAGE_DEFAULT,
    D3D11_USAGE_STAGING, D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT, DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC,
};
use windows::Win32::Graphics::Dxgi::IDXGIAdapter;

use crate::error::{CaptureError, CaptureResult};

/// Create a D3D11 device on the given adapter. BGRA support is required
/// for the B8G8R8A8 canvas and duplication surfaces.
pub(crate) fn create_device_for_adapter(
    adapter: &IDXGIAdapter,
) -> CaptureResult<(ID3D11Device, ID3D11DeviceContext)> {
    let mut device: Option<ID3D11Device> = None;
    let mut context: Option<ID3D11DeviceContext> = None;
    let feature_levels = [D3D_FEATURE_LEVEL_11_0];

    unsafe {
        D3D11CreateDevice(
            adapter,
            D3D_DRIVER_TYPE_UNKNOWN,
            None,
            D3D11_CREATE_DEVICE_BGRA_SUPPORT,
            Some(&feature_levels),
            D3D11_SDK_VERSION,
            Some(&mut device),
            None,
            Some(&mut context),
        )
    }
    .context("D3D11CreateDevice failed")
    .map_err(CaptureError::Platform)?;

    let device = device.ok_or(CaptureError::NoDeviceAvailable)?;
    let context = context.ok_or(CaptureError::NoDeviceAvailable)?;
    Ok((device, context))
}

/// Create the destination canvas: a default-usage B8G8R8A8 render
/// target sized to the union of the requested regions.
pub(crate) fn create_canvas_texture(
    device: &ID3D11Device,
    width: u32,
    height: u32,
) -> CaptureResult<ID3D11Texture2D> {
    let desc = D3D11_TEXTURE2D_DESC {
        Width: width,
        Height: height,
        MipLevels: 1,
        ArraySize: 1,
        Format: DXGI_FORMAT_B8G8R8A8_UNORM,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Usage: D3D11_USAGE_DEFAULT,
        BindFlags: D3D11_BIND_RENDER_TARGET.0 as u32,
        ..Default::default()
    };

    let mut texture: Option<ID3D11Texture2D> = None;
    unsafe { device.CreateTexture2D(&desc, None, Some(&mut texture)) }
        .context("CreateTexture2D for canvas failed")
        .map_err(CaptureError::Platform)?;
    texture.ok_or_else(|| CaptureError::Platform(anyhow::anyhow!("canvas texture was not created")))
}

/// Create a CPU-readable staging texture with the given dimensions and
/// format. `cpu_write` additionally requests write access (duplication
/// staging surfaces are copy targets *and* CPU-scanned for analysis).
pub(crate) fn create_staging_texture(
    device: &ID3D11Device,
    width: u32,
    height: u32,
    format: DXGI_FORMAT,
    cpu_write: bool,
) -> CaptureResult<ID3D11Texture2D> {
    let mut access = D3D11_CPU_ACCESS_READ.0 as u32;
    if cpu_write {
        access |= D3D11_CPU_ACCESS_WRITE.0 as u32;
    }

    let desc = D3D11_TEXTURE2D_DESC {
        Width: width,
        Height: height,
        MipLevels: 1,
        ArraySize: 1,
        Format: format,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Usage: D3D11_USAGE_STAGING,
        BindFlags: Default::default(),
        CPUAccessFlags: access,
        MiscFlags: Default::default(),
    };

    let mut texture: Option<ID3D11Texture2D> = None;
    unsafe { device.CreateTexture2D(&desc, None, Some(&mut texture)) }
        .context("CreateTexture2D for staging failed")
        .map_err(CaptureError::Platform)?;
    texture
        .ok_or_else(|| CaptureError::Platform(anyhow::anyhow!("staging texture was not created")))
}

/// Create a read-only staging copy target matching an existing texture.
pub(crate) fn create_staging_for(
    device: &ID3D11Device,
    source: &ID3D11Texture2D,
) -> CaptureResult<(ID3D11Texture2D, D3D11_TEXTURE2D_DESC)> {
    let mut desc = D3D11_TEXTURE2D_DESC::default();
    unsafe { source.GetDesc(&mut desc) };
    let staging = create_staging_texture(device, desc.Width, desc.Height, desc.Format, false)?;
    Ok((staging, desc))
}
