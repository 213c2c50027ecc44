// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, CStr, CString};

use ash::ext::debug_utils;
use ash::khr::surface;
use ash::{vk, Entry};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use tracing::{debug, error, info, warn};

use crate::error::Result;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    kind: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader hands us a valid callback payload for the duration of the call.
    let msg = unsafe { (*data).message_as_c_str() }
        .map(|m| m.to_string_lossy())
        .unwrap_or_default();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vulkan {:?}] {}", kind, msg);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vulkan {:?}] {}", kind, msg);
    } else {
        debug!("[vulkan {:?}] {}", kind, msg);
    }
    vk::FALSE
}

struct DebugMessenger {
    loader: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

/// Loader entry, instance and (when validation is on) the debug messenger.
pub struct InstanceContext {
    entry: Entry,
    instance: ash::Instance,
    debug: Option<DebugMessenger>,
}

impl InstanceContext {
    /// `display` is `None` for headless use: no WSI extensions are enabled.
    pub fn new(app_name: &str, display: Option<RawDisplayHandle>, validation: bool) -> Result<Self> {
        let entry = Entry::linked();
        let app = CString::new(app_name).unwrap_or_else(|_| c"strobe".to_owned());

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app)
            .application_version(0)
            .engine_name(c"strobe")
            .engine_version(0)
            .api_version(vk::API_VERSION_1_3);

        let mut extensions: Vec<*const c_char> = match display {
            Some(dh) => ash_window::enumerate_required_extensions(dh)?.to_vec(),
            None => Vec::new(),
        };

        // SAFETY: plain loader queries.
        let validation = validation && unsafe { layer_available(&entry, VALIDATION_LAYER) };
        let mut layers: Vec<*const c_char> = Vec::new();
        if validation {
            extensions.push(debug_utils::NAME.as_ptr());
            layers.push(VALIDATION_LAYER.as_ptr());
        }

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        // SAFETY: every pointer in create_info outlives the call.
        let instance = unsafe { entry.create_instance(&create_info, None)? };

        let debug = if validation {
            // SAFETY: debug_utils was enabled on this instance above.
            match unsafe { create_debug_messenger(&entry, &instance) } {
                Ok(m) => Some(m),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        let validation_on = debug.is_some();
        info!(
            "vulkan instance ready (api 1.3, validation={})",
            validation_on
        );
        Ok(Self {
            entry,
            instance,
            debug,
        })
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        unsafe {
            if let Some(d) = self.debug.take() {
                d.loader.destroy_debug_utils_messenger(d.handle, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

unsafe fn layer_available(entry: &Entry, name: &CStr) -> bool {
    let layers = unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
    let found = layers
        .iter()
        .any(|l| l.layer_name_as_c_str().map(|n| n == name).unwrap_or(false));
    if !found {
        warn!("validation requested but {:?} is not installed; continuing without it", name);
    }
    found
}

unsafe fn create_debug_messenger(entry: &Entry, instance: &ash::Instance) -> Result<DebugMessenger> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));
    let handle = unsafe { loader.create_debug_utils_messenger(&ci, None)? };
    Ok(DebugMessenger { loader, handle })
}

/// The window surface the swapchain presents to. Destroyed before the instance.
pub struct PresentTarget {
    loader: surface::Instance,
    surface: vk::SurfaceKHR,
}

impl PresentTarget {
    pub fn new(
        ctx: &InstanceContext,
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
    ) -> Result<Self> {
        let dh = display.display_handle()?.as_raw();
        let wh = window.window_handle()?.as_raw();
        // SAFETY: the handles come from a live window that outlives the surface.
        let surface = unsafe { ash_window::create_surface(ctx.entry(), ctx.instance(), dh, wh, None)? };
        let loader = surface::Instance::new(ctx.entry(), ctx.instance());
        Ok(Self { loader, surface })
    }

    pub fn loader(&self) -> &surface::Instance {
        &self.loader
    }

    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Whether queue family `family` of `phys` can present to this surface.
    pub fn supports(&self, phys: vk::PhysicalDevice, family: u32) -> bool {
        unsafe {
            self.loader
                .get_physical_device_surface_support(phys, family, self.surface)
                .unwrap_or(false)
        }
    }
}

impl Drop for PresentTarget {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.surface, None) };
    }
}
