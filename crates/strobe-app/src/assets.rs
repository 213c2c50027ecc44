// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use strobe_render::{MeshData, SceneAssets, ShaderBinary, TextureData, Vertex};
use tracing::info;

use crate::config::{ShaderCfg, TextureCfg};

const fn v(pos: [f32; 3], color: [f32; 3], uv: [f32; 2]) -> Vertex {
    Vertex { pos, color, uv }
}

/// Two coloured quads, the second half a unit below the first.
pub fn quad_stack() -> MeshData {
    let vertices = vec![
        v([-0.5, -0.5, 0.0], [1.0, 0.0, 0.0], [1.0, 0.0]),
        v([0.5, -0.5, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0]),
        v([0.5, 0.5, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0]),
        v([-0.5, 0.5, 0.0], [1.0, 1.0, 1.0], [1.0, 1.0]),
        v([-0.5, -0.5, -0.5], [1.0, 0.0, 0.0], [1.0, 0.0]),
        v([0.5, -0.5, -0.5], [0.0, 1.0, 0.0], [0.0, 0.0]),
        v([0.5, 0.5, -0.5], [0.0, 0.0, 1.0], [0.0, 1.0]),
        v([-0.5, 0.5, -0.5], [1.0, 1.0, 1.0], [1.0, 1.0]),
    ];
    MeshData {
        vertices,
        indices: Some(vec![0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4]),
    }
}

/// Bytes in a tightly packed RGBA8 image.
fn rgba_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 4
}

/// RGBA8 checkerboard with `cells` squares per side.
pub fn checkerboard(size: u32, cells: u32) -> TextureData {
    let cell = (size / cells.max(1)).max(1);
    let mut pixels = Vec::with_capacity(rgba_len(size, size));
    for y in 0..size {
        for x in 0..size {
            let light = ((x / cell) + (y / cell)) % 2 == 0;
            let c = if light { 235 } else { 40 };
            pixels.extend_from_slice(&[c, c, c, 255]);
        }
    }
    TextureData {
        width: size,
        height: size,
        pixels,
    }
}

/// Decodes any PNG or JPEG into tightly packed RGBA8.
pub fn decode_texture(path: &Path) -> Result<TextureData> {
    let img = image::open(path)
        .with_context(|| format!("loading texture {}", path.display()))?
        .to_rgba8();
    let (width, height) = img.dimensions();
    info!("texture {} ({width}x{height})", path.display());
    Ok(TextureData {
        width,
        height,
        pixels: img.into_raw(),
    })
}

/// A configured image must decode; otherwise a checkerboard stands in.
pub fn load_texture(cfg: &TextureCfg) -> Result<TextureData> {
    match &cfg.path {
        Some(path) => decode_texture(path),
        None => Ok(checkerboard(256, 8)),
    }
}

/// A configured SPIR-V file must be readable; otherwise the built-in modules are used.
pub fn load_shader(cfg: &ShaderCfg) -> Result<ShaderBinary> {
    let Some(path) = &cfg.path else {
        return Ok(strobe_render_vk::builtin_shaders());
    };
    let spirv = fs::read(path).with_context(|| format!("reading shader {}", path.display()))?;
    info!("shader module {} ({} bytes)", path.display(), spirv.len());
    Ok(ShaderBinary::Combined {
        spirv,
        vertex_entry: cfg.vertex_entry.clone(),
        fragment_entry: cfg.fragment_entry.clone(),
    })
}

pub fn default_scene(shader: &ShaderCfg, texture: &TextureCfg) -> Result<SceneAssets> {
    Ok(SceneAssets {
        mesh: quad_stack(),
        texture: load_texture(texture)?,
        shader: load_shader(shader)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn quad_indices_stay_in_range() {
        let mesh = quad_stack();
        let indices = mesh.indices.as_deref().unwrap();
        assert_eq!(indices.len(), 12);
        assert!(indices.iter().all(|&i| (i as usize) < mesh.vertices.len()));
    }

    #[test]
    fn checkerboard_alternates_cells() {
        let tex = checkerboard(4, 2);
        assert_eq!(tex.pixels.len(), tex.expected_len());
        // (0,0) light, (2,0) dark, (2,2) light
        assert_eq!(tex.pixels[0], 235);
        assert_eq!(tex.pixels[2 * 4], 40);
        assert_eq!(tex.pixels[(2 * 4 + 2) * 4], 235);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn rgba_len_does_not_wrap_at_u32() {
        assert_eq!(rgba_len(32_768, 32_768), 1usize << 32);
        assert_eq!(rgba_len(65_535, 2), 65_535 * 8);
    }

    #[test]
    fn no_texture_path_uses_checkerboard() {
        let tex = load_texture(&TextureCfg::default()).unwrap();
        assert_eq!((tex.width, tex.height), (256, 256));
        assert_eq!(tex.pixels.len(), tex.expected_len());
    }

    #[test]
    fn configured_texture_decodes_to_rgba8() {
        let path = std::env::temp_dir().join(format!("strobe-tex-{}.png", std::process::id()));
        let mut img = image::RgbImage::new(3, 2);
        img.put_pixel(2, 1, image::Rgb([10, 20, 30]));
        img.save(&path).unwrap();

        let cfg = TextureCfg {
            path: Some(path.clone()),
        };
        let tex = load_texture(&cfg);
        fs::remove_file(&path).ok();
        let tex = tex.unwrap();
        assert_eq!((tex.width, tex.height), (3, 2));
        assert_eq!(tex.pixels.len(), tex.expected_len());
        let last = (3 + 2) * 4;
        assert_eq!(tex.pixels[last..last + 4], [10, 20, 30, 255]);
    }

    #[test]
    fn unreadable_texture_path_is_fatal() {
        let cfg = TextureCfg {
            path: Some(PathBuf::from("/nonexistent/strobe-test/texture.jpg")),
        };
        let err = load_texture(&cfg).unwrap_err();
        assert!(format!("{err:#}").contains("loading texture"));
    }

    #[test]
    fn no_path_uses_builtin_modules() {
        let shader = load_shader(&ShaderCfg::default()).unwrap();
        assert!(matches!(shader, ShaderBinary::Split { .. }));
    }

    #[test]
    fn unreadable_shader_path_is_fatal() {
        let cfg = ShaderCfg {
            path: Some(PathBuf::from("/nonexistent/strobe-test/slang.spv")),
            ..ShaderCfg::default()
        };
        let err = load_shader(&cfg).unwrap_err();
        assert!(format!("{err:#}").contains("reading shader"));
    }

    #[test]
    fn configured_shader_carries_entry_points() {
        let path = std::env::temp_dir().join(format!("strobe-shader-{}.spv", std::process::id()));
        fs::write(&path, [0x03, 0x02, 0x23, 0x07]).unwrap();
        let cfg = ShaderCfg {
            path: Some(path.clone()),
            ..ShaderCfg::default()
        };
        let shader = load_shader(&cfg);
        fs::remove_file(&path).ok();
        match shader.unwrap() {
            ShaderBinary::Combined {
                spirv,
                vertex_entry,
                fragment_entry,
            } => {
                assert_eq!(spirv.len(), 4);
                assert_eq!(vertex_entry, "vertMain");
                assert_eq!(fragment_entry, "fragMain");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
