// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use bytemuck::{Pod, Zeroable};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    /// Minimized windows report a zero-sized framebuffer.
    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// The window side of the engine: what the renderer may ask of the windowing layer
/// while it is in the middle of a frame.
pub trait FramebufferSource {
    /// Current framebuffer size in pixels.
    fn framebuffer_size(&self) -> RenderSize;

    /// Blocks until at least one window event has been processed.
    fn wait_events(&mut self);

    /// True once the user asked to close the window. Blocking loops bail out on it.
    fn close_requested(&self) -> bool {
        false
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// The frame was submitted and handed to the presentation engine.
    Presented { swapchain_rebuilt: bool },
    /// No work was submitted this cycle (the swapchain was out of date).
    Skipped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PresentPreference {
    Fifo,
    #[default]
    Mailbox,
}

#[derive(Clone, Debug)]
pub struct RenderSettings {
    pub app_name: String,
    pub clear_color: [f32; 4],
    pub present: PresentPreference,
    pub validation: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            app_name: "strobe".to_owned(),
            clear_color: [0.2, 0.2, 0.2, 1.0],
            present: PresentPreference::Mailbox,
            validation: cfg!(debug_assertions),
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
    pub uv: [f32; 2],
}

#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    /// `None` draws the vertices in order without an index buffer.
    pub indices: Option<Vec<u16>>,
}

/// Decoded texture pixels, tightly packed RGBA8.
#[derive(Clone, Debug)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// Pre-compiled SPIR-V, consumed as opaque bytes.
#[derive(Clone, Debug)]
pub enum ShaderBinary {
    /// One module exporting both entry points.
    Combined {
        spirv: Vec<u8>,
        vertex_entry: String,
        fragment_entry: String,
    },
    /// Separate vertex and fragment modules sharing one entry point name.
    Split {
        vertex: Vec<u8>,
        fragment: Vec<u8>,
        entry: String,
    },
}

#[derive(Clone, Debug)]
pub struct SceneAssets {
    pub mesh: MeshData,
    pub texture: TextureData,
    pub shader: ShaderBinary,
}

pub trait Renderer {
    fn initialize(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
        scene: SceneAssets,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Flags the framebuffer as resized; the swapchain is rebuilt after the next present.
    fn notify_resized(&mut self);

    fn render_one_frame(&mut self, window: &mut dyn FramebufferSource) -> Result<FrameStatus>;

    fn set_clear_color(&mut self, rgba: [f32; 4]);

    /// Drains the device and releases every GPU object.
    fn shutdown(self) -> Result<()>
    where
        Self: Sized;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        let v = Vertex {
            pos: [1.0, 2.0, 3.0],
            color: [0.0; 3],
            uv: [0.5, 0.25],
        };
        let bytes = bytemuck::bytes_of(&v);
        assert_eq!(&bytes[0..4], &1.0f32.to_ne_bytes());
        assert_eq!(&bytes[24..28], &0.5f32.to_ne_bytes());
    }

    #[test]
    fn zero_extent_is_degenerate() {
        assert!(RenderSize { width: 0, height: 0 }.is_degenerate());
        assert!(RenderSize { width: 640, height: 0 }.is_degenerate());
        assert!(!RenderSize { width: 1, height: 1 }.is_degenerate());
    }

    #[test]
    fn texture_len_counts_four_channels() {
        let tex = TextureData {
            width: 3,
            height: 2,
            pixels: vec![0; 24],
        };
        assert_eq!(tex.expected_len(), tex.pixels.len());
    }
}
