//! GPU selection.
//!
//! A physical device qualifies when it exposes Vulkan 1.3, a graphics queue
//! family, a family that can present to the target surface, and the feature
//! set the renderer is written against:
//!
//! - `dynamicRendering` and `synchronization2` (1.3)
//! - `bufferDeviceAddress` and `descriptorIndexing` (1.2)
//!
//! Among qualifying devices, discrete GPUs win, then the one with the most
//! device-local memory.

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult, VkResultExt};

/// Queue families the renderer submits and presents on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilies {
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Distinct family indices, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);
        if let Some(graphics) = self.graphics {
            families.push(graphics);
        }
        if let Some(present) = self.present
            && !families.contains(&present)
        {
            families.push(present);
        }
        families
    }
}

/// Features a device must support to be selected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RequiredFeatures {
    pub dynamic_rendering: bool,
    pub synchronization2: bool,
    pub buffer_device_address: bool,
    pub descriptor_indexing: bool,
}

impl RequiredFeatures {
    /// Names of the features that are not supported.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.dynamic_rendering {
            missing.push("dynamicRendering");
        }
        if !self.synchronization2 {
            missing.push("synchronization2");
        }
        if !self.buffer_device_address {
            missing.push("bufferDeviceAddress");
        }
        if !self.descriptor_indexing {
            missing.push("descriptorIndexing");
        }
        missing
    }
}

/// A device that passed selection, with what is needed to open it.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilies,
}

impl PhysicalDeviceInfo {
    pub fn device_name(&self) -> String {
        self.properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "Unknown Device".to_string())
    }

    pub fn device_type_name(&self) -> &'static str {
        device_type_name(self.properties.device_type)
    }

    pub fn device_local_memory(&self) -> u64 {
        device_local_memory(&self.memory_properties)
    }

    /// Graphics family index; always present on a selected device.
    #[inline]
    pub fn graphics_family(&self) -> u32 {
        self.queue_families.graphics.unwrap_or_default()
    }

    /// Present family index; always present on a selected device.
    #[inline]
    pub fn present_family(&self) -> u32 {
        self.queue_families.present.unwrap_or_default()
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Picks the best device able to render to `surface`.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if no device qualifies.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices =
        unsafe { instance.enumerate_physical_devices() }.call("vkEnumeratePhysicalDevices")?;
    info!("Found {} GPU(s)", devices.len());

    let best = devices
        .into_iter()
        .filter_map(|device| check_device(instance, device, surface, surface_loader))
        .max_by_key(|info| rate_device(info.properties.device_type, info.device_local_memory()));

    let Some(selected) = best else {
        warn!("No GPU supports Vulkan 1.3 with the required features");
        return Err(RhiError::NoSuitableGpu);
    };

    info!(
        "Selected GPU: '{}' ({}, {} MiB local)",
        selected.device_name(),
        selected.device_type_name(),
        selected.device_local_memory() / (1024 * 1024)
    );
    Ok(selected)
}

fn check_device(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let name = properties
        .device_name_as_c_str()
        .unwrap_or(c"Unknown")
        .to_string_lossy();

    if !supports_vulkan_1_3(properties.api_version) {
        debug!(
            "GPU '{}' skipped: Vulkan {}.{} < 1.3",
            name,
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version)
        );
        return None;
    }

    let missing = query_features(instance, device).missing();
    if !missing.is_empty() {
        debug!("GPU '{}' skipped: missing {:?}", name, missing);
        return None;
    }

    let queue_families = find_queue_families(instance, device, surface, surface_loader);
    if !queue_families.is_complete() {
        debug!("GPU '{}' skipped: no graphics/present queue", name);
        return None;
    }

    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
    Some(PhysicalDeviceInfo {
        device,
        properties,
        memory_properties,
        queue_families,
    })
}

fn query_features(instance: &ash::Instance, device: vk::PhysicalDevice) -> RequiredFeatures {
    let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default();
    let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default();
    let mut features = vk::PhysicalDeviceFeatures2::default()
        .push_next(&mut features_1_2)
        .push_next(&mut features_1_3);
    unsafe { instance.get_physical_device_features2(device, &mut features) };

    RequiredFeatures {
        dynamic_rendering: features_1_3.dynamic_rendering == vk::TRUE,
        synchronization2: features_1_3.synchronization2 == vk::TRUE,
        buffer_device_address: features_1_2.buffer_device_address == vk::TRUE,
        descriptor_indexing: features_1_2.descriptor_indexing == vk::TRUE,
    }
}

fn find_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> QueueFamilies {
    let properties = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let mut families = QueueFamilies::default();

    for (index, family) in (0u32..).zip(properties.iter()) {
        if family.queue_count == 0 {
            continue;
        }
        let present = unsafe {
            surface_loader
                .get_physical_device_surface_support(device, index, surface)
                .unwrap_or(false)
        };
        let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);

        // Prefer one family that does both
        if graphics && present {
            return QueueFamilies {
                graphics: Some(index),
                present: Some(index),
            };
        }
        if graphics && families.graphics.is_none() {
            families.graphics = Some(index);
        }
        if present && families.present.is_none() {
            families.present = Some(index);
        }
    }

    families
}

fn supports_vulkan_1_3(api_version: u32) -> bool {
    (vk::api_version_major(api_version), vk::api_version_minor(api_version)) >= (1, 3)
}

fn device_type_name(device_type: vk::PhysicalDeviceType) -> &'static str {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
        vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
        vk::PhysicalDeviceType::CPU => "CPU",
        _ => "Other",
    }
}

fn device_local_memory(memory: &vk::PhysicalDeviceMemoryProperties) -> u64 {
    memory
        .memory_heaps
        .iter()
        .take(memory.memory_heap_count as usize)
        .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|heap| heap.size)
        .sum()
}

/// Orders devices by type first, then by local memory in MiB.
fn rate_device(device_type: vk::PhysicalDeviceType, local_memory: u64) -> (u8, u64) {
    let rank = match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 4,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 3,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 1,
        _ => 0,
    };
    (rank, local_memory / (1024 * 1024))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_queue_families_complete() {
        assert!(!QueueFamilies::default().is_complete());
        let families = QueueFamilies {
            graphics: Some(0),
            present: None,
        };
        assert!(!families.is_complete());
        let families = QueueFamilies {
            graphics: Some(0),
            present: Some(2),
        };
        assert!(families.is_complete());
    }

    #[rstest]
    #[case(Some(0), Some(0), vec![0])]
    #[case(Some(0), Some(1), vec![0, 1])]
    #[case(None, Some(3), vec![3])]
    fn test_unique_families(
        #[case] graphics: Option<u32>,
        #[case] present: Option<u32>,
        #[case] expected: Vec<u32>,
    ) {
        assert_eq!(QueueFamilies { graphics, present }.unique(), expected);
    }

    #[rstest]
    #[case(vk::make_api_version(0, 1, 2, 198), false)]
    #[case(vk::make_api_version(0, 1, 3, 0), true)]
    #[case(vk::make_api_version(0, 1, 4, 303), true)]
    fn test_vulkan_1_3_gate(#[case] version: u32, #[case] expected: bool) {
        assert_eq!(supports_vulkan_1_3(version), expected);
    }

    #[test]
    fn test_missing_features_are_named() {
        let features = RequiredFeatures {
            dynamic_rendering: true,
            synchronization2: false,
            buffer_device_address: true,
            descriptor_indexing: false,
        };
        assert_eq!(
            features.missing(),
            vec!["synchronization2", "descriptorIndexing"]
        );
    }

    #[test]
    fn test_discrete_beats_integrated_regardless_of_memory() {
        let discrete = rate_device(vk::PhysicalDeviceType::DISCRETE_GPU, 2 << 30);
        let integrated = rate_device(vk::PhysicalDeviceType::INTEGRATED_GPU, 32 << 30);
        assert!(discrete > integrated);
    }
}
