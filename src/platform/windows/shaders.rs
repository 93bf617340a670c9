//! Shader bytecode store.
//!
//! The tonemap pass consumes a precompiled vertex/pixel program pair as
//! opaque blobs with a fixed input layout (`POSITION`: 2×f32,
//! `TEXCOORD`: 2×f32). Bytecode comes from build-time fxc compilation
//! when the build host had a Windows SDK (embedded via build.rs), with
//! a runtime `D3DCompile` fallback on first use otherwise.

use std::sync::OnceLock;

use anyhow::Context;
use windows::Win32::Graphics::Direct3D11::{
    D3D11_APPEND_ALIGNED_ELEMENT, D3D11_INPUT_ELEMENT_DESC, D3D11_INPUT_PER_VERTEX_DATA,
    ID3D11Device, ID3D11InputLayout, ID3D11PixelShader, ID3D11VertexShader,
};
use windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT_R32G32_FLOAT;
#[cfg(not(all(has_precompiled_vs, has_precompiled_ps)))]
use windows::core::PCSTR;
use windows::core::s;

use crate::error::{CaptureError, CaptureResult};

#[cfg(has_precompiled_vs)]
const PRECOMPILED_VS: &[u8] = include_bytes!(env!("TONEMAP_VS_CSO_PATH"));

#[cfg(has_precompiled_ps)]
const PRECOMPILED_PS: &[u8] = include_bytes!(env!("TONEMAP_PS_CSO_PATH"));

/// HLSL source kept for runtime compilation when fxc was unavailable at
/// build time.
#[cfg(not(all(has_precompiled_vs, has_precompiled_ps)))]
const HLSL_SOURCE: &str = include_str!("tonemap_quad.hlsl");

pub(crate) fn vertex_bytecode() -> CaptureResult<&'static [u8]> {
    static BYTECODE: OnceLock<CaptureResult<Vec<u8>>> = OnceLock::new();
    bytecode_slice(BYTECODE.get_or_init(|| {
        #[cfg(has_precompiled_vs)]
        {
            Ok(PRECOMPILED_VS.to_vec())
        }
        #[cfg(not(has_precompiled_vs))]
        {
            compile_runtime(s!("vs_main"), s!("vs_5_0"))
        }
    }))
}

pub(crate) fn pixel_bytecode() -> CaptureResult<&'static [u8]> {
    static BYTECODE: OnceLock<CaptureResult<Vec<u8>>> = OnceLock::new();
    bytecode_slice(BYTECODE.get_or_init(|| {
        #[cfg(has_precompiled_ps)]
        {
            Ok(PRECOMPILED_PS.to_vec())
        }
        #[cfg(not(has_precompiled_ps))]
        {
            compile_runtime(s!("ps_main"), s!("ps_5_0"))
        }
    }))
}

fn bytecode_slice(cached: &'static CaptureResult<Vec<u8>>) -> CaptureResult<&'static [u8]> {
    match cached {
        Ok(bytes) => Ok(bytes.as_slice()),
        Err(error) => Err(CaptureError::Platform(anyhow::anyhow!(
            "shader bytecode unavailable: {error}"
        ))),
    }
}

#[cfg(not(all(has_precompiled_vs, has_precompiled_ps)))]
fn compile_runtime(entry: PCSTR, target: PCSTR) -> CaptureResult<Vec<u8>> {
    use windows::Win32::Graphics::Direct3D::Fxc::D3DCompile;

    let source = HLSL_SOURCE.as_bytes();
    let mut blob = None;
    let mut errors = None;

    let compiled = unsafe {
        D3DCompile(
            source.as_ptr() as *const _,
            source.len(),
            None,
            None,
            None,
            entry,
            target,
            0,
            0,
            &mut blob,
            Some(&mut errors),
        )
    };

    if let Err(e) = compiled {
        let message = errors
            .map(|b| {
                let ptr = unsafe { b.GetBufferPointer() } as *const u8;
                let len = unsafe { b.GetBufferSize() };
                let slice = unsafe { std::slice::from_raw_parts(ptr, len) };
                String::from_utf8_lossy(slice).to_string()
            })
            .unwrap_or_default();
        return Err(CaptureError::Platform(
            anyhow::anyhow!("HLSL compile failed: {message}").context(e.to_string()),
        ));
    }

    let blob =
        blob.ok_or_else(|| CaptureError::Platform(anyhow::anyhow!("D3DCompile returned no blob")))?;
    let ptr = unsafe { blob.GetBufferPointer() } as *const u8;
    let len = unsafe { blob.GetBufferSize() };
    Ok(unsafe { std::slice::from_raw_parts(ptr, len) }.to_vec())
}

/// Compiled per-device shader state, created once per adapter alongside
/// the device.
pub(crate) struct ShaderSet {
    pub vertex: ID3D11VertexShader,
    pub pixel: ID3D11PixelShader,
    pub input_layout: ID3D11InputLayout,
}

pub(crate) fn create_shader_set(device: &ID3D11Device) -> CaptureResult<ShaderSet> {
    let vs_bytes = vertex_bytecode()?;
    let ps_bytes = pixel_bytecode()?;

    let mut vertex: Option<ID3D11VertexShader> = None;
    unsafe { device.CreateVertexShader(vs_bytes, None, Some(&mut vertex)) }
        .context("CreateVertexShader failed")
        .map_err(CaptureError::Platform)?;
    let vertex = vertex
        .ok_or_else(|| CaptureError::Platform(anyhow::anyhow!("vertex shader was not created")))?;

    let mut pixel: Option<ID3D11PixelShader> = None;
    unsafe { device.CreatePixelShader(ps_bytes, None, Some(&mut pixel)) }
        .context("CreatePixelShader failed")
        .map_err(CaptureError::Platform)?;
    let pixel = pixel
        .ok_or_else(|| CaptureError::Platform(anyhow::anyhow!("pixel shader was not created")))?;

    let input_elements = [
        D3D11_INPUT_ELEMENT_DESC {
            SemanticName: s!("POSITION"),
            SemanticIndex: 0,
            Format: DXGI_FORMAT_R32G32_FLOAT,
            InputSlot: 0,
            AlignedByteOffset: 0,
            InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
            InstanceDataStepRate: 0,
        },
        D3D11_INPUT_ELEMENT_DESC {
            SemanticName: s!("TEXCOORD"),
            SemanticIndex: 0,
            Format: DXGI_FORMAT_R32G32_FLOAT,
            InputSlot: 0,
            AlignedByteOffset: D3D11_APPEND_ALIGNED_ELEMENT,
            InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
            InstanceDataStepRate: 0,
        },
    ];

    let mut input_layout: Option<ID3D11InputLayout> = None;
    unsafe { device.CreateInputLayout(&input_elements, vs_bytes, Some(&mut input_layout)) }
        .context("CreateInputLayout failed")
        .map_err(CaptureError::Platform)?;
    let input_layout = input_layout
        .ok_or_else(|| CaptureError::Platform(anyhow::anyhow!("input layout was not created")))?;

    Ok(ShaderSet {
        vertex,
        pixel,
        input_layout,
    })
}
