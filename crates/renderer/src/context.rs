//! Process-wide Vulkan context.
//!
//! [`GpuContext`] brings up the instance, surface and logical device for a
//! window once at startup. Everything else borrows it.

use std::sync::Arc;

use tracing::info;

use ember_core::{PresentModePreference, RendererConfig};
use ember_platform::{Surface, Window, required_extensions};
use ember_rhi::device::Device;
use ember_rhi::instance::Instance;
use ember_rhi::physical_device::{PhysicalDeviceInfo, select_physical_device};
use ember_rhi::{RhiError, RhiResult, vk};

/// Instance, surface and device for one window.
///
/// Fields drop in declaration order: the device before the surface, the
/// surface before the instance.
pub struct GpuContext {
    device: Arc<Device>,
    gpu: PhysicalDeviceInfo,
    surface: Surface,
    instance: Instance,
}

impl GpuContext {
    pub fn new(window: &Window, config: &RendererConfig) -> RhiResult<Self> {
        let extensions =
            required_extensions(window).map_err(|e| RhiError::SurfaceError(e.to_string()))?;

        let instance = Instance::new(&config.window.title, config.enable_validation, &extensions)?;
        let surface = Surface::new(window, instance.entry(), instance.handle())
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;

        let gpu = select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        info!(
            "Selected GPU: {} ({})",
            gpu.device_name(),
            gpu.device_type_name()
        );

        let device = Device::new(&instance, &gpu)?;

        Ok(Self {
            device,
            gpu,
            surface,
            instance,
        })
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    pub fn gpu(&self) -> &PhysicalDeviceInfo {
        &self.gpu
    }

    #[inline]
    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    #[inline]
    pub fn instance(&self) -> &Instance {
        &self.instance
    }
}

/// Vulkan present mode for a configured preference.
pub fn present_mode(preference: PresentModePreference) -> vk::PresentModeKHR {
    match preference {
        PresentModePreference::Fifo => vk::PresentModeKHR::FIFO,
        PresentModePreference::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentModePreference::Immediate => vk::PresentModeKHR::IMMEDIATE,
    }
}
