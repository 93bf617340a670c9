use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src/platform/windows/tonemap_quad.hlsl");
    println!("cargo:rustc-check-cfg=cfg(has_precompiled_vs)");
    println!("cargo:rustc-check-cfg=cfg(has_precompiled_ps)");
    println!("cargo:rerun-if-env-changed=AURORA_CAPTURE_FXC_PATH");

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os != "windows" {
        return;
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let hlsl_path = PathBuf::from("src/platform/windows/tonemap_quad.hlsl");
    if !hlsl_path.exists() {
        return;
    }

    // AURORA_CAPTURE_PRECOMPILE_SHADER=0 disables build-time fxc and
    // leaves shader compilation to the runtime D3DCompile fallback.
    println!("cargo:rerun-if-env-changed=AURORA_CAPTURE_PRECOMPILE_SHADER");
    let precompile_enabled = env::var("AURORA_CAPTURE_PRECOMPILE_SHADER")
        .map(|v| {
            let v = v.trim().to_ascii_lowercase();
            !(v == "0" || v == "false" || v == "no" || v == "off")
        })
        .unwrap_or(true);
    if !precompile_enabled {
        println!(
            "cargo:warning=AURORA_CAPTURE_PRECOMPILE_SHADER is disabled; will use runtime D3DCompile fallback"
        );
        return;
    }

    let vs_path = out_dir.join("tonemap_quad_vs.cso");
    match compile_with_fxc(&hlsl_path, &vs_path, "vs_main", "vs_5_0") {
        Ok(()) => {
            println!("cargo:rustc-env=TONEMAP_VS_CSO_PATH={}", vs_path.display());
            println!("cargo:rustc-cfg=has_precompiled_vs");
        }
        Err(detail) => {
            println!(
                "cargo:warning=failed to precompile vertex shader with fxc ({detail}); will use runtime D3DCompile fallback"
            );
        }
    }

    let ps_path = out_dir.join("tonemap_quad_ps.cso");
    match compile_with_fxc(&hlsl_path, &ps_path, "ps_main", "ps_5_0") {
        Ok(()) => {
            println!("cargo:rustc-env=TONEMAP_PS_CSO_PATH={}", ps_path.display());
            println!("cargo:rustc-cfg=has_precompiled_ps");
        }
        Err(detail) => {
            println!(
                "cargo:warning=failed to precompile pixel shader with fxc ({detail}); will use runtime D3DCompile fallback"
            );
        }
    }
}

fn compile_with_fxc(
    hlsl: &Path,
    output: &Path,
    entry: &str,
    profile: &str,
) -> Result<(), String> {
    let fxc = find_fxc().ok_or_else(|| "fxc.exe not found".to_string())?;

    let result: std::io::Result<Output> = Command::new(&fxc)
        .arg("/nologo")
        .arg("/T")
        .arg(profile)
        .arg("/E")
        .arg(entry)
        .arg("/O3")
        .arg("/Fo")
        .arg(output)
        .arg(hlsl)
        .output();

    match result {
        Ok(out) if out.status.success() => Ok(()),
        Ok(out) => Err(String::from_utf8_lossy(&out.stderr).trim().to_string()),
        Err(error) => Err(error.to_string()),
    }
}

/// Locate fxc.exe: explicit override, PATH, then the usual Windows SDK
/// installation roots (newest SDK first).
fn find_fxc() -> Option<PathBuf> {
    if let Ok(explicit) = env::var("AURORA_CAPTURE_FXC_PATH") {
        let path = PathBuf::from(explicit);
        if path.exists() {
            return Some(path);
        }
    }

    if Command::new("fxc.exe")
        .arg("/nologo")
        .arg("/?")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
    {
        return Some(PathBuf::from("fxc.exe"));
    }

    let arch = if env::var("CARGO_CFG_TARGET_ARCH").as_deref() == Ok("aarch64") {
        "arm64"
    } else {
        "x64"
    };
    let roots = [
        "C:\\Program Files (x86)\\Windows Kits\\10\\bin",
        "C:\\Program Files\\Windows Kits\\10\\bin",
    ];
    for root in roots {
        let Ok(entries) = std::fs::read_dir(root) else {
            continue;
        };
        let mut versions: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        versions.sort();
        for version in versions.iter().rev() {
            let candidate = version.join(arch).join("fxc.exe");
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }
    None
}
