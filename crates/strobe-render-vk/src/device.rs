// SPDX-License-Identifier: CEPL-1.0
//! Physical device negotiation and the logical device/queue pair.
//!
//! Selection is a plain conjunction over [`AdapterSummary`]s: the first adapter in
//! enumeration order that satisfies every [`DeviceRequirements`] clause wins. There is
//! no scoring; a discrete GPU listed after a suitable integrated one is not preferred.

use std::ffi::{c_char, CStr, CString};

use ash::vk;
use tracing::{debug, info};

use crate::error::{RenderError, Result};
use crate::instance::{InstanceContext, PresentTarget};

/// Feature bits the renderer may ask for. Only `true` fields are requirements.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeatureSet {
    pub dynamic_rendering: bool,
    pub synchronization2: bool,
    pub extended_dynamic_state: bool,
    pub sampler_anisotropy: bool,
    pub shader_draw_parameters: bool,
}

impl FeatureSet {
    pub fn covers(&self, required: &FeatureSet) -> bool {
        (!required.dynamic_rendering || self.dynamic_rendering)
            && (!required.synchronization2 || self.synchronization2)
            && (!required.extended_dynamic_state || self.extended_dynamic_state)
            && (!required.sampler_anisotropy || self.sampler_anisotropy)
            && (!required.shader_draw_parameters || self.shader_draw_parameters)
    }
}

#[derive(Clone, Debug)]
pub struct DeviceRequirements {
    pub min_api_version: u32,
    pub extensions: Vec<&'static CStr>,
    pub features: FeatureSet,
}

impl DeviceRequirements {
    /// What the windowed renderer needs.
    pub fn presentation() -> Self {
        Self {
            min_api_version: vk::API_VERSION_1_3,
            extensions: vec![
                ash::khr::swapchain::NAME,
                ash::khr::spirv_1_4::NAME,
                ash::khr::synchronization2::NAME,
                ash::khr::create_renderpass2::NAME,
                ash::ext::extended_dynamic_state::NAME,
            ],
            features: FeatureSet {
                dynamic_rendering: true,
                synchronization2: true,
                extended_dynamic_state: true,
                sampler_anisotropy: true,
                shader_draw_parameters: true,
            },
        }
    }

    /// Transfer-only work without a surface (uploads, read-backs).
    pub fn headless() -> Self {
        Self {
            min_api_version: vk::API_VERSION_1_3,
            extensions: Vec::new(),
            features: FeatureSet {
                synchronization2: true,
                ..Default::default()
            },
        }
    }
}

/// What selection needs to know about one adapter.
#[derive(Clone, Debug, Default)]
pub struct AdapterSummary {
    pub name: String,
    pub api_version: u32,
    /// First queue family with graphics that can also present (any graphics family when headless).
    pub graphics_present_family: Option<u32>,
    pub extensions: Vec<CString>,
    pub features: FeatureSet,
}

impl AdapterSummary {
    pub fn satisfies(&self, req: &DeviceRequirements) -> bool {
        self.api_version >= req.min_api_version
            && self.graphics_present_family.is_some()
            && req
                .extensions
                .iter()
                .all(|want| self.extensions.iter().any(|have| have.as_c_str() == *want))
            && self.features.covers(&req.features)
    }
}

/// Index of the first adapter satisfying `req`, in enumeration order.
pub fn first_suitable(adapters: &[AdapterSummary], req: &DeviceRequirements) -> Option<usize> {
    adapters.iter().position(|a| a.satisfies(req))
}

/// First memory type allowed by `type_bits` whose flags contain `required`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32> {
    let count = (props.memory_type_count as usize).min(vk::MAX_MEMORY_TYPES);
    props.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(i, t)| type_bits & (1u32 << i) != 0 && t.property_flags.contains(required))
        .map(|(i, _)| i as u32)
        .ok_or(RenderError::NoMemoryType {
            type_bits,
            required,
        })
}

unsafe fn graphics_present_family(
    instance: &ash::Instance,
    phys: vk::PhysicalDevice,
    target: Option<&PresentTarget>,
) -> Option<u32> {
    let families = unsafe { instance.get_physical_device_queue_family_properties(phys) };
    families.iter().enumerate().find_map(|(i, q)| {
        let family = i as u32;
        let graphics = q.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let present = target.map_or(true, |t| t.supports(phys, family));
        (graphics && present).then_some(family)
    })
}

unsafe fn summarize(
    instance: &ash::Instance,
    phys: vk::PhysicalDevice,
    target: Option<&PresentTarget>,
) -> Result<AdapterSummary> {
    let props = unsafe { instance.get_physical_device_properties(phys) };
    let name = props
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let extensions = unsafe { instance.enumerate_device_extension_properties(phys)? }
        .iter()
        .filter_map(|e| e.extension_name_as_c_str().ok().map(CStr::to_owned))
        .collect();

    // Feature structs past 1.2 are only meaningful on 1.3 adapters.
    let features = if props.api_version >= vk::API_VERSION_1_3 {
        let mut v11 = vk::PhysicalDeviceVulkan11Features::default();
        let mut v13 = vk::PhysicalDeviceVulkan13Features::default();
        let mut eds = vk::PhysicalDeviceExtendedDynamicStateFeaturesEXT::default();
        let anisotropy = {
            let mut f2 = vk::PhysicalDeviceFeatures2::default()
                .push_next(&mut v11)
                .push_next(&mut v13)
                .push_next(&mut eds);
            unsafe { instance.get_physical_device_features2(phys, &mut f2) };
            f2.features.sampler_anisotropy
        };
        FeatureSet {
            dynamic_rendering: v13.dynamic_rendering == vk::TRUE,
            synchronization2: v13.synchronization2 == vk::TRUE,
            extended_dynamic_state: eds.extended_dynamic_state == vk::TRUE,
            sampler_anisotropy: anisotropy == vk::TRUE,
            shader_draw_parameters: v11.shader_draw_parameters == vk::TRUE,
        }
    } else {
        FeatureSet::default()
    };

    Ok(AdapterSummary {
        name,
        api_version: props.api_version,
        graphics_present_family: unsafe { graphics_present_family(instance, phys, target) },
        extensions,
        features,
    })
}

/// Picks the adapter. Returns the handle plus its summary.
pub fn select_device(
    ctx: &InstanceContext,
    target: Option<&PresentTarget>,
    req: &DeviceRequirements,
) -> Result<(vk::PhysicalDevice, AdapterSummary)> {
    let instance = ctx.instance();
    let physical = unsafe { instance.enumerate_physical_devices()? };
    let mut summaries = Vec::with_capacity(physical.len());
    for &phys in &physical {
        let s = unsafe { summarize(instance, phys, target)? };
        debug!(
            "adapter '{}': api {}.{}, queue={:?}, suitable={}",
            s.name,
            vk::api_version_major(s.api_version),
            vk::api_version_minor(s.api_version),
            s.graphics_present_family,
            s.satisfies(req)
        );
        summaries.push(s);
    }
    let idx = first_suitable(&summaries, req).ok_or(RenderError::NoSuitableDevice)?;
    Ok((physical[idx], summaries.swap_remove(idx)))
}

/// Root of GPU ownership: adapter, logical device, the single queue, the memory table.
pub struct DeviceContext {
    instance: ash::Instance,
    phys: vk::PhysicalDevice,
    device: ash::Device,
    queue: vk::Queue,
    queue_family: u32,
    memory: vk::PhysicalDeviceMemoryProperties,
    properties: vk::PhysicalDeviceProperties,
}

impl DeviceContext {
    /// Selects an adapter and creates the logical device with one queue.
    pub fn new(
        ctx: &InstanceContext,
        target: Option<&PresentTarget>,
        req: &DeviceRequirements,
    ) -> Result<Self> {
        let (phys, summary) = select_device(ctx, target, req)?;
        let dev = Self::create_logical_device(ctx.instance(), phys, target, req)?;
        info!(
            "device '{}' ready (queue family {})",
            summary.name, dev.queue_family
        );
        Ok(dev)
    }

    fn create_logical_device(
        instance: &ash::Instance,
        phys: vk::PhysicalDevice,
        target: Option<&PresentTarget>,
        req: &DeviceRequirements,
    ) -> Result<Self> {
        let queue_family = unsafe { graphics_present_family(instance, phys, target) }
            .ok_or(RenderError::QueueUnavailable)?;

        let priorities = [0.5_f32];
        let queue_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family)
            .queue_priorities(&priorities)];

        let ext_ptrs: Vec<*const c_char> = req.extensions.iter().map(|e| e.as_ptr()).collect();

        let want = req.features;
        let mut v11 = vk::PhysicalDeviceVulkan11Features::default()
            .shader_draw_parameters(want.shader_draw_parameters);
        let mut v13 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(want.dynamic_rendering)
            .synchronization2(want.synchronization2);
        let mut eds = vk::PhysicalDeviceExtendedDynamicStateFeaturesEXT::default()
            .extended_dynamic_state(want.extended_dynamic_state);
        let mut features2 = vk::PhysicalDeviceFeatures2::default()
            .features(vk::PhysicalDeviceFeatures::default().sampler_anisotropy(want.sampler_anisotropy))
            .push_next(&mut v11)
            .push_next(&mut v13);
        if want.extended_dynamic_state {
            features2 = features2.push_next(&mut eds);
        }

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&ext_ptrs)
            .push_next(&mut features2);

        // SAFETY: the feature chain and name arrays live until the call returns.
        let device = unsafe { instance.create_device(phys, &create_info, None)? };
        let queue = unsafe { device.get_device_queue(queue_family, 0) };
        let memory = unsafe { instance.get_physical_device_memory_properties(phys) };
        let properties = unsafe { instance.get_physical_device_properties(phys) };

        Ok(Self {
            instance: instance.clone(),
            phys,
            device,
            queue,
            queue_family,
            memory,
            properties,
        })
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn physical(&self) -> vk::PhysicalDevice {
        self.phys
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.properties.limits
    }

    pub fn find_memory_type(&self, type_bits: u32, required: vk::MemoryPropertyFlags) -> Result<u32> {
        find_memory_type(&self.memory, type_bits, required)
    }

    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.phys, format)
        }
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_table(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties::default();
        props.memory_type_count = flags.len() as u32;
        for (i, f) in flags.iter().enumerate() {
            props.memory_types[i].property_flags = *f;
        }
        props
    }

    const DL: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
    const HV: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::HOST_VISIBLE;
    const HC: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::HOST_COHERENT;

    #[test]
    fn memory_type_is_lowest_matching_index() {
        let table = memory_table(&[DL, HV | HC, DL | HV | HC, HV | HC]);
        assert_eq!(find_memory_type(&table, 0b1111, HV | HC).unwrap(), 1);
        assert_eq!(find_memory_type(&table, 0b1101, HV | HC).unwrap(), 2);
        assert_eq!(find_memory_type(&table, 0b1000, HV).unwrap(), 3);
        assert_eq!(find_memory_type(&table, 0b1111, DL).unwrap(), 0);
    }

    #[test]
    fn memory_type_requires_superset_of_properties() {
        let table = memory_table(&[DL, HV]);
        let err = find_memory_type(&table, 0b11, HV | HC).unwrap_err();
        assert!(matches!(err, RenderError::NoMemoryType { type_bits: 0b11, .. }));
    }

    #[test]
    fn memory_type_lookup_matches_brute_force() {
        let table = memory_table(&[DL, HV | HC, DL | HV, HC, DL | HV | HC]);
        let candidates = [
            vk::MemoryPropertyFlags::empty(),
            DL,
            HV,
            HC,
            HV | HC,
            DL | HV,
            DL | HV | HC,
        ];
        for bits in 0u32..32 {
            for &want in &candidates {
                let expected = (0..5u32)
                    .find(|&i| bits & (1 << i) != 0 && table.memory_types[i as usize].property_flags.contains(want));
                let got = find_memory_type(&table, bits, want).ok();
                assert_eq!(got, expected, "bits={bits:#b} want={want:?}");
            }
        }
    }

    #[test]
    fn memory_types_past_count_are_ignored() {
        let mut table = memory_table(&[DL]);
        table.memory_types[1].property_flags = HV;
        assert!(find_memory_type(&table, 0b10, HV).is_err());
    }

    fn capable(name: &str) -> AdapterSummary {
        let req = DeviceRequirements::presentation();
        AdapterSummary {
            name: name.to_owned(),
            api_version: vk::API_VERSION_1_3,
            graphics_present_family: Some(0),
            extensions: req.extensions.iter().map(|e| (*e).to_owned()).collect(),
            features: req.features,
        }
    }

    #[test]
    fn selection_is_first_match_in_enumeration_order() {
        let req = DeviceRequirements::presentation();
        let adapters = vec![capable("a"), capable("b")];
        assert_eq!(first_suitable(&adapters, &req), Some(0));
    }

    #[test]
    fn selection_requires_every_clause() {
        let req = DeviceRequirements::presentation();

        let mut old_api = capable("old");
        old_api.api_version = vk::API_VERSION_1_2;

        let mut no_queue = capable("no-queue");
        no_queue.graphics_present_family = None;

        let mut missing_ext = capable("no-swapchain");
        missing_ext.extensions.retain(|e| e.as_c_str() != ash::khr::swapchain::NAME);

        let mut missing_feature = capable("no-aniso");
        missing_feature.features.sampler_anisotropy = false;

        let rejected = vec![old_api, no_queue, missing_ext, missing_feature];
        assert_eq!(first_suitable(&rejected, &req), None);

        let mut with_good = rejected.clone();
        with_good.push(capable("good"));
        assert_eq!(first_suitable(&with_good, &req), Some(4));
    }

    #[test]
    fn feature_set_ignores_unrequested_bits() {
        let have = FeatureSet {
            synchronization2: true,
            ..Default::default()
        };
        assert!(have.covers(&DeviceRequirements::headless().features));
        assert!(!have.covers(&DeviceRequirements::presentation().features));
    }
}
