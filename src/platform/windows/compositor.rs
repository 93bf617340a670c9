//! Canvas composition helpers: sub-rectangle copies into the canvas,
//! CPU reads of HDR staging surfaces, and the final readback into a
//! [`PixelBuffer`].

use anyhow::Context;
use half::f16;
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BOX, D3D11_MAP_READ, D3D11_MAPPED_SUBRESOURCE, D3D11_TEXTURE2D_DESC, ID3D11Device,
    ID3D11DeviceContext, ID3D11Resource, ID3D11Texture2D,
};
use windows::core::Interface;

use crate::canvas::PixelBuffer;
use crate::colorspace::Vec4;
use crate::error::{CaptureError, CaptureResult};
use crate::monitor::Rect;

use super::d3d11;

fn rect_to_box(rect: Rect) -> CaptureResult<D3D11_BOX> {
    let left = u32::try_from(rect.x).map_err(|_| CaptureError::BufferOverflow)?;
    let top = u32::try_from(rect.y).map_err(|_| CaptureError::BufferOverflow)?;
    let right = left
        .checked_add(rect.width)
        .ok_or(CaptureError::BufferOverflow)?;
    let bottom = top
        .checked_add(rect.height)
        .ok_or(CaptureError::BufferOverflow)?;
    Ok(D3D11_BOX {
        left,
        top,
        front: 0,
        right,
        bottom,
        back: 1,
    })
}

fn as_resource(texture: &ID3D11Texture2D) -> CaptureResult<ID3D11Resource> {
    texture
        .cast()
        .context("failed to cast texture to ID3D11Resource")
        .map_err(CaptureError::Platform)
}

/// Copy an SDR region from a source surface into the canvas at its
/// planned placement.
pub(crate) fn copy_region_to_canvas(
    context: &ID3D11DeviceContext,
    canvas: &ID3D11Texture2D,
    source: &ID3D11Texture2D,
    src_rect: Rect,
    dst_rect: Rect,
) -> CaptureResult<()> {
    let src_box = rect_to_box(src_rect)?;
    let dst_x = u32::try_from(dst_rect.x).map_err(|_| CaptureError::BufferOverflow)?;
    let dst_y = u32::try_from(dst_rect.y).map_err(|_| CaptureError::BufferOverflow)?;

    let canvas_resource = as_resource(canvas)?;
    let source_resource = as_resource(source)?;
    unsafe {
        context.CopySubresourceRegion(
            &canvas_resource,
            0,
            dst_x,
            dst_y,
            0,
            &source_resource,
            0,
            Some(&src_box),
        );
    }
    Ok(())
}

/// Copy the full frame texture into the session's staging surface.
pub(crate) fn copy_frame_to_staging(
    context: &ID3D11DeviceContext,
    staging: &ID3D11Texture2D,
    frame: &ID3D11Texture2D,
) -> CaptureResult<()> {
    let staging_resource = as_resource(staging)?;
    let frame_resource = as_resource(frame)?;
    unsafe {
        context.CopyResource(&staging_resource, &frame_resource);
    }
    Ok(())
}

/// Read a sub-rectangle of an R16G16B16A16_FLOAT staging surface into
/// linear-light samples for analysis and the CPU tonemap.
pub(crate) fn read_staging_region_f16(
    context: &ID3D11DeviceContext,
    staging: &ID3D11Texture2D,
    src_rect: Rect,
) -> CaptureResult<Vec<Vec4>> {
    let resource = as_resource(staging)?;

    let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
    unsafe { context.Map(&resource, 0, D3D11_MAP_READ, 0, Some(&mut mapped)) }
        .context("failed to map HDR staging surface")
        .map_err(CaptureError::Platform)?;

    let result = read_mapped_region_f16(&mapped, src_rect);
    unsafe {
        context.Unmap(&resource, 0);
    }
    result
}

fn read_mapped_region_f16(
    mapped: &D3D11_MAPPED_SUBRESOURCE,
    src_rect: Rect,
) -> CaptureResult<Vec<Vec4>> {
    let x = usize::try_from(src_rect.x).map_err(|_| CaptureError::BufferOverflow)?;
    let y = usize::try_from(src_rect.y).map_err(|_| CaptureError::BufferOverflow)?;
    let width = src_rect.width as usize;
    let height = src_rect.height as usize;
    let pitch = mapped.RowPitch as usize;

    let pixel_count = width
        .checked_mul(height)
        .ok_or(CaptureError::BufferOverflow)?;
    let mut pixels = Vec::with_capacity(pixel_count);

    let base = mapped.pData as *const u8;
    for row in 0..height {
        let row_offset = (y + row)
            .checked_mul(pitch)
            .and_then(|off| off.checked_add(x.checked_mul(8)?))
            .ok_or(CaptureError::BufferOverflow)?;
        // 8 bytes per pixel: four packed halfs.
        let row_ptr = unsafe { base.add(row_offset) } as *const u16;
        for col in 0..width {
            let px = unsafe { std::slice::from_raw_parts(row_ptr.add(col * 4), 4) };
            pixels.push([
                f16::from_bits(px[0]).to_f32(),
                f16::from_bits(px[1]).to_f32(),
                f16::from_bits(px[2]).to_f32(),
                f16::from_bits(px[3]).to_f32(),
            ]);
        }
    }
    Ok(pixels)
}

/// Write CPU-tonemapped BGRA rows into the canvas sub-rectangle.
pub(crate) fn upload_region_to_canvas(
    context: &ID3D11DeviceContext,
    canvas: &ID3D11Texture2D,
    dst_rect: Rect,
    bgra_rows: &[u8],
) -> CaptureResult<()> {
    let expected = (dst_rect.width as usize)
        .checked_mul(dst_rect.height as usize)
        .and_then(|pixels| pixels.checked_mul(4))
        .ok_or(CaptureError::BufferOverflow)?;
    if bgra_rows.len() < expected {
        return Err(CaptureError::BufferOverflow);
    }

    let dst_box = rect_to_box(dst_rect)?;
    let canvas_resource = as_resource(canvas)?;
    unsafe {
        context.UpdateSubresource(
            &canvas_resource,
            0,
            Some(&dst_box),
            bgra_rows.as_ptr() as *const _,
            dst_rect.width * 4,
            0,
        );
    }
    Ok(())
}

/// Copy the finished canvas to CPU memory and build the final pixel
/// buffer.
pub(crate) fn readback_canvas(
    device: &ID3D11Device,
    context: &ID3D11DeviceContext,
    canvas: &ID3D11Texture2D,
) -> CaptureResult<PixelBuffer> {
    let (staging, desc) = d3d11::create_staging_for(device, canvas)?;
    copy_frame_to_staging(context, &staging, canvas)?;

    let resource = as_resource(&staging)?;
    let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
    unsafe { context.Map(&resource, 0, D3D11_MAP_READ, 0, Some(&mut mapped)) }
        .context("failed to map canvas staging surface")
        .map_err(CaptureError::Platform)?;

    let result = build_pixel_buffer(&mapped, &desc);
    unsafe {
        context.Unmap(&resource, 0);
    }
    result
}

fn build_pixel_buffer(
    mapped: &D3D11_MAPPED_SUBRESOURCE,
    desc: &D3D11_TEXTURE2D_DESC,
) -> CaptureResult<PixelBuffer> {
    let pitch = mapped.RowPitch as usize;
    let height = desc.Height as usize;
    let byte_len = pitch
        .checked_mul(height)
        .ok_or(CaptureError::BufferOverflow)?;
    let rows = unsafe { std::slice::from_raw_parts(mapped.pData as *const u8, byte_len) };
    PixelBuffer::copy_from_rows(desc.Width, desc.Height, pitch, rows)
}
