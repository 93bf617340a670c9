//! GPU tonemap pass: renders one HDR region into the canvas
//! sub-rectangle as a textured full-screen quad through the
//! parameterized tonemap shaders.
//!
//! Every GPU object created here (vertex buffer, constant buffers,
//! views) is owned by the call and released when it returns, on every
//! exit path — the `windows` smart pointers drop on unwind too. The
//! function returns once the draw is submitted; completion is observed
//! later by the readback copy.

use anyhow::Context;
use windows::Win32::Graphics::Direct3D::{
    D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST, D3D11_SRV_DIMENSION_TEXTURE2D,
};
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BIND_CONSTANT_BUFFER, D3D11_BIND_VERTEX_BUFFER, D3D11_BUFFER_DESC,
    D3D11_SHADER_RESOURCE_VIEW_DESC, D3D11_SHADER_RESOURCE_VIEW_DESC_0, D3D11_SUBRESOURCE_DATA,
    D3D11_TEX2D_SRV, D3D11_TEXTURE2D_DESC, D3D11_USAGE_IMMUTABLE, D3D11_VIEWPORT, ID3D11Buffer,
    ID3D11Device, ID3D11RenderTargetView, ID3D11ShaderResourceView, ID3D11Texture2D,
};

use crate::error::{CaptureError, CaptureResult};
use crate::monitor::Rect;
use crate::tonemap::{PixelConstants, VertexConstants};

use super::devices::DeviceState;

#[repr(C)]
#[derive(Clone, Copy)]
struct QuadVertex {
    position: [f32; 2],
    uv: [f32; 2],
}

/// Render `source`'s `src_rect` into `canvas` at `dst_rect` with the
/// derived tonemap constants.
pub(crate) fn tonemap_on_gpu(
    state: &DeviceState,
    source: &ID3D11Texture2D,
    canvas: &ID3D11Texture2D,
    src_rect: Rect,
    dst_rect: Rect,
    vertex_constants: &VertexConstants,
    pixel_constants: &PixelConstants,
) -> CaptureResult<()> {
    let device = &state.device;
    let context = &state.context;

    let mut source_desc = D3D11_TEXTURE2D_DESC::default();
    unsafe { source.GetDesc(&mut source_desc) };
    if source_desc.Width == 0 || source_desc.Height == 0 {
        return Err(CaptureError::Platform(anyhow::anyhow!(
            "tonemap source texture has zero extent"
        )));
    }

    // UVs select the region sub-rectangle out of the monitor surface.
    let u0 = src_rect.x as f32 / source_desc.Width as f32;
    let v0 = src_rect.y as f32 / source_desc.Height as f32;
    let u1 = u0 + src_rect.width as f32 / source_desc.Width as f32;
    let v1 = v0 + src_rect.height as f32 / source_desc.Height as f32;

    let quad = [
        QuadVertex {
            position: [-1.0, 1.0],
            uv: [u0, v0],
        },
        QuadVertex {
            position: [1.0, 1.0],
            uv: [u1, v0],
        },
        QuadVertex {
            position: [-1.0, -1.0],
            uv: [u0, v1],
        },
        QuadVertex {
            position: [-1.0, -1.0],
            uv: [u0, v1],
        },
        QuadVertex {
            position: [1.0, 1.0],
            uv: [u1, v0],
        },
        QuadVertex {
            position: [1.0, -1.0],
            uv: [u1, v1],
        },
    ];

    let vertex_buffer = create_immutable_buffer(
        device,
        &quad,
        D3D11_BIND_VERTEX_BUFFER.0 as u32,
        "vertex buffer",
    )?;
    let vs_constants = create_immutable_buffer(
        device,
        std::slice::from_ref(vertex_constants),
        D3D11_BIND_CONSTANT_BUFFER.0 as u32,
        "vertex constant buffer",
    )?;
    let ps_constants = create_immutable_buffer(
        device,
        std::slice::from_ref(pixel_constants),
        D3D11_BIND_CONSTANT_BUFFER.0 as u32,
        "pixel constant buffer",
    )?;

    let mut rtv: Option<ID3D11RenderTargetView> = None;
    unsafe { device.CreateRenderTargetView(canvas, None, Some(&mut rtv)) }
        .context("CreateRenderTargetView on canvas failed")
        .map_err(CaptureError::Platform)?;
    let rtv = rtv.ok_or_else(|| {
        CaptureError::Platform(anyhow::anyhow!("render target view was not created"))
    })?;

    let srv_desc = D3D11_SHADER_RESOURCE_VIEW_DESC {
        Format: source_desc.Format,
        ViewDimension: D3D11_SRV_DIMENSION_TEXTURE2D,
        Anonymous: D3D11_SHADER_RESOURCE_VIEW_DESC_0 {
            Texture2D: D3D11_TEX2D_SRV {
                MostDetailedMip: 0,
                MipLevels: 1,
            },
        },
    };
    let mut srv: Option<ID3D11ShaderResourceView> = None;
    unsafe { device.CreateShaderResourceView(source, Some(&srv_desc), Some(&mut srv)) }
        .context("CreateShaderResourceView on HDR source failed")
        .map_err(CaptureError::Platform)?;
    let srv = srv.ok_or_else(|| {
        CaptureError::Platform(anyhow::anyhow!("shader resource view was not created"))
    })?;

    let viewport = D3D11_VIEWPORT {
        TopLeftX: dst_rect.x as f32,
        TopLeftY: dst_rect.y as f32,
        Width: dst_rect.width as f32,
        Height: dst_rect.height as f32,
        MinDepth: 0.0,
        MaxDepth: 1.0,
    };

    unsafe {
        context.OMSetRenderTargets(Some(&[Some(rtv.clone())]), None);
        context.RSSetViewports(Some(&[viewport]));

        context.IASetPrimitiveTopology(D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
        context.IASetInputLayout(&state.shaders.input_layout);
        let stride = std::mem::size_of::<QuadVertex>() as u32;
        let offset = 0u32;
        context.IASetVertexBuffers(
            0,
            1,
            Some(&Some(vertex_buffer.clone())),
            Some(&stride),
            Some(&offset),
        );

        context.VSSetShader(&state.shaders.vertex, None);
        context.VSSetConstantBuffers(0, Some(&[Some(vs_constants.clone())]));
        context.PSSetShader(&state.shaders.pixel, None);
        context.PSSetConstantBuffers(0, Some(&[Some(ps_constants.clone())]));
        context.PSSetShaderResources(0, Some(&[Some(srv.clone())]));
        context.PSSetSamplers(0, Some(&[Some(state.sampler.clone())]));

        context.Draw(6, 0);

        // Unbind so the canvas can be a copy source and the next
        // region's pass starts clean.
        context.PSSetShaderResources(0, Some(&[None]));
        context.OMSetRenderTargets(Some(&[None]), None);
    }

    Ok(())
}

fn create_immutable_buffer<T: Copy>(
    device: &ID3D11Device,
    contents: &[T],
    bind_flags: u32,
    label: &'static str,
) -> CaptureResult<ID3D11Buffer> {
    let byte_len = std::mem::size_of_val(contents) as u32;
    let desc = D3D11_BUFFER_DESC {
        ByteWidth: byte_len,
        Usage: D3D11_USAGE_IMMUTABLE,
        BindFlags: bind_flags,
        ..Default::default()
    };
    let init = D3D11_SUBRESOURCE_DATA {
        pSysMem: contents.as_ptr() as *const _,
        ..Default::default()
    };

    let mut buffer: Option<ID3D11Buffer> = None;
    unsafe { device.CreateBuffer(&desc, Some(&init), Some(&mut buffer)) }
        .with_context(|| format!("CreateBuffer for {label} failed"))
        .map_err(CaptureError::Platform)?;
    buffer.ok_or_else(|| CaptureError::Platform(anyhow::anyhow!("{label} was not created")))
}
