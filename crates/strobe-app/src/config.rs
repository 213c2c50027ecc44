// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use strobe_platform::WindowConfig;
use strobe_render::{PresentPreference, RenderSettings};
use tracing::{info, warn};

#[derive(Debug, Deserialize, Default)]
pub struct AppCfg {
    #[serde(default)]
    pub window: WindowCfg,
    #[serde(default)]
    pub render: RenderCfg,
    #[serde(default)]
    pub shader: ShaderCfg,
    #[serde(default)]
    pub texture: TextureCfg,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WindowCfg {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_title")]
    pub title: String,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            width: default_width(),
            height: default_height(),
            title: default_title(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeCfg {
    Fifo,
    #[default]
    Mailbox,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RenderCfg {
    #[serde(default = "default_clear")]
    pub clear_color: [f32; 4],
    #[serde(default)]
    pub present_mode: PresentModeCfg,
    #[serde(default = "default_validation")]
    pub validation: bool,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            present_mode: PresentModeCfg::Mailbox,
            validation: default_validation(),
        }
    }
}

/// Without `path` the built-in shaders are used.
#[derive(Debug, Deserialize, Clone)]
pub struct ShaderCfg {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_vertex_entry")]
    pub vertex_entry: String,
    #[serde(default = "default_fragment_entry")]
    pub fragment_entry: String,
}

impl Default for ShaderCfg {
    fn default() -> Self {
        ShaderCfg {
            path: None,
            vertex_entry: default_vertex_entry(),
            fragment_entry: default_fragment_entry(),
        }
    }
}

/// Without `path` a generated checkerboard is used.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct TextureCfg {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}
fn default_title() -> String {
    "strobe".to_owned()
}
fn default_clear() -> [f32; 4] {
    [0.2, 0.2, 0.2, 1.0]
}
fn default_validation() -> bool {
    cfg!(debug_assertions)
}
fn default_vertex_entry() -> String {
    "vertMain".to_owned()
}
fn default_fragment_entry() -> String {
    "fragMain".to_owned()
}

pub fn parse_cfg(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str(text)
}

/// A missing file means defaults; a malformed one is reported and ignored.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => match parse_cfg(&s) {
            Ok(cfg) => {
                info!("config loaded from {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("{}: {e}; using defaults", path.display());
                AppCfg::default()
            }
        },
        Err(e) if e.kind() == ErrorKind::NotFound => AppCfg::default(),
        Err(e) => {
            warn!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }
    }
}

impl AppCfg {
    pub fn window_config(&self) -> WindowConfig {
        WindowConfig {
            title: self.window.title.clone(),
            width: self.window.width,
            height: self.window.height,
        }
    }

    pub fn render_settings(&self) -> RenderSettings {
        RenderSettings {
            app_name: self.window.title.clone(),
            clear_color: self.render.clear_color,
            present: match self.render.present_mode {
                PresentModeCfg::Fifo => PresentPreference::Fifo,
                PresentModeCfg::Mailbox => PresentPreference::Mailbox,
            },
            validation: self.render.validation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg = parse_cfg("").unwrap();
        assert_eq!(cfg.window.width, 1280);
        assert_eq!(cfg.window.title, "strobe");
        assert_eq!(cfg.render.clear_color, [0.2, 0.2, 0.2, 1.0]);
        assert_eq!(cfg.render.present_mode, PresentModeCfg::Mailbox);
        assert!(cfg.shader.path.is_none());
        assert_eq!(cfg.shader.vertex_entry, "vertMain");
        assert_eq!(cfg.shader.fragment_entry, "fragMain");
        assert!(cfg.texture.path.is_none());
    }

    #[test]
    fn sections_override_individual_fields() {
        let cfg = parse_cfg(
            r#"
            [window]
            height = 480

            [render]
            present_mode = "fifo"
            validation = false
            clear_color = [0.0, 0.0, 0.0, 1.0]

            [shader]
            path = "shaders/slang.spv"

            [texture]
            path = "textures/crate.jpg"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.window.width, 1280);
        assert_eq!(cfg.window.height, 480);
        assert!(!cfg.render.validation);
        assert_eq!(cfg.shader.path.as_deref(), Some(Path::new("shaders/slang.spv")));
        assert_eq!(cfg.texture.path.as_deref(), Some(Path::new("textures/crate.jpg")));

        let settings = cfg.render_settings();
        assert_eq!(settings.present, PresentPreference::Fifo);
        assert_eq!(settings.clear_color, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn unknown_present_mode_is_a_parse_error() {
        assert!(parse_cfg("[render]\npresent_mode = \"immediate\"\n").is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = load_cfg(Path::new("/nonexistent/strobe-test/strobe.toml"));
        assert_eq!(cfg.window.height, 720);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join(format!("strobe-cfg-{}.toml", std::process::id()));
        fs::write(&path, "[render\nclear_color = 3").unwrap();
        let cfg = load_cfg(&path);
        fs::remove_file(&path).ok();
        assert_eq!(cfg.render.present_mode, PresentModeCfg::Mailbox);
    }
}
