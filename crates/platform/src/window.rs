//! Window management and Vulkan surface creation.

use std::ffi::{CStr, c_char};
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes, WindowId};

use ember_core::{Error, Result, WindowConfig};

/// Owned `VkSurfaceKHR`.
///
/// The instance it was created from must outlive it.
pub struct Surface {
    handle: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Creates a surface for `window`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Window`] when the window handles are unavailable and
    /// [`Error::Vulkan`] when surface creation fails.
    pub fn new(window: &Window, entry: &ash::Entry, instance: &ash::Instance) -> Result<Self> {
        let display_handle = window
            .inner()
            .display_handle()
            .map_err(|e| Error::Window(format!("display handle unavailable: {e}")))?;
        let window_handle = window
            .inner()
            .window_handle()
            .map_err(|e| Error::Window(format!("window handle unavailable: {e}")))?;

        // SAFETY: both handles come from a live winit window; the surface is
        // destroyed in Drop before the instance goes away.
        let handle = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
        }
        .map_err(|e| Error::Vulkan(format!("vkCreateSurfaceKHR failed: {e}")))?;

        tracing::info!("Vulkan surface created");

        Ok(Self {
            handle,
            loader: ash::khr::surface::Instance::new(entry, instance),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Loader for capability, format and present-mode queries.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.handle, None) };
        tracing::debug!("Vulkan surface destroyed");
    }
}

/// A resizable winit window.
pub struct Window {
    window: Arc<WinitWindow>,
}

impl Window {
    pub fn new(event_loop: &ActiveEventLoop, config: &WindowConfig) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(config.title.as_str())
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(true);

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        tracing::info!("Window created: {}x{}", config.width, config.height);

        Ok(Self {
            window: Arc::new(window),
        })
    }

    #[inline]
    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    #[inline]
    pub fn id(&self) -> WindowId {
        self.window.id()
    }

    /// Current drawable size in physical pixels.
    pub fn extent(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    /// A minimized window reports a zero-sized surface.
    pub fn is_minimized(&self) -> bool {
        let (width, height) = self.extent();
        width == 0 || height == 0
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

/// Instance extensions needed to create a surface for `window`.
///
/// The returned pointers reference static strings owned by `ash-window`.
pub fn required_extensions(window: &Window) -> Result<Vec<*const c_char>> {
    let display_handle = window
        .inner()
        .display_handle()
        .map_err(|e| Error::Window(format!("display handle unavailable: {e}")))?;

    let extensions = ash_window::enumerate_required_extensions(display_handle.as_raw())
        .map_err(|e| Error::Vulkan(format!("cannot enumerate surface extensions: {e}")))?;

    tracing::debug!(
        "Surface extensions: {:?}",
        extensions
            .iter()
            .map(|&ext| unsafe { CStr::from_ptr(ext) })
            .collect::<Vec<_>>()
    );

    Ok(extensions.to_vec())
}
