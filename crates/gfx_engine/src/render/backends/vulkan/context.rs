//! Vulkan instance, physical device and logical device bring-up
//!
//! Each wrapper destroys what it created on drop. [`VulkanContext`] owns all
//! three plus the window surface and tears them down in reverse order.

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Entry, Instance};
use std::collections::HashSet;
use std::ffi::{c_char, c_void, CStr, CString};

use crate::render::backends::vulkan::window::Window;
use crate::render::error::{VulkanError, VulkanResult};

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

fn c_string(value: &str) -> VulkanResult<CString> {
    CString::new(value).map_err(|_| VulkanError::InitializationFailed(format!("'{value}' contains a NUL byte")))
}

/// Vulkan instance with an optional validation messenger
pub struct VulkanInstance {
    /// Loaded Vulkan entry points
    pub entry: Entry,
    /// Instance handle
    pub instance: Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create an instance with the extensions `window` needs
    pub fn new(window: &Window, app_name: &str, enable_validation: bool) -> VulkanResult<Self> {
        // SAFETY: loading the system Vulkan library has no preconditions beyond it being a valid loader
        let entry = unsafe { Entry::load() }
            .map_err(|err| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {err}")))?;

        let app_name = c_string(app_name)?;
        let engine_name = c_string("gfx_engine")?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let required = window
            .required_instance_extensions()
            .map_err(|err| VulkanError::InitializationFailed(format!("Failed to get required extensions: {err}")))?;
        let extension_names = required
            .iter()
            .map(|name| c_string(name))
            .collect::<VulkanResult<Vec<CString>>>()?;
        let mut extensions: Vec<*const c_char> = extension_names.iter().map(|name| name.as_ptr()).collect();

        let validation = enable_validation && Self::validation_available(&entry);
        if enable_validation && !validation {
            log::warn!("[VULKAN] {VALIDATION_LAYER} requested but not installed");
        }
        let layer_names = if validation {
            extensions.push(DebugUtils::name().as_ptr());
            vec![c_string(VALIDATION_LAYER)?]
        } else {
            Vec::new()
        };
        let layers: Vec<*const c_char> = layer_names.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        // SAFETY: every pointer in create_info borrows a local that outlives the call
        let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(VulkanError::Api)?;

        let debug = if validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match Self::create_messenger(&debug_utils) {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(err) => {
                    // SAFETY: nothing has been created from the instance yet
                    unsafe { instance.destroy_instance(None) };
                    return Err(err);
                }
            }
        } else {
            None
        };

        log::info!("[VULKAN] Instance created (validation {})", if validation { "on" } else { "off" });
        Ok(Self { entry, instance, debug })
    }

    fn validation_available(entry: &Entry) -> bool {
        entry
            .enumerate_instance_layer_properties()
            .map(|layers| {
                layers.iter().any(|layer| {
                    // SAFETY: layer_name is a NUL-terminated array filled in by the loader
                    let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
                    name.to_bytes() == VALIDATION_LAYER.as_bytes()
                })
            })
            .unwrap_or(false)
    }

    fn create_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        // SAFETY: the callback is a plain function with no user data
        unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }.map_err(VulkanError::Api)
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        // SAFETY: all child objects are destroyed by the owners declared before this one
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Routes validation messages into `log`
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[VULKAN] {message_type:?} - {message}");
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[VULKAN] {message_type:?} - {message}");
    } else {
        log::debug!("[VULKAN] {message_type:?} - {message}");
    }
    vk::FALSE
}

/// The selected GPU and its queue families
#[derive(Debug, Clone)]
pub struct PhysicalDeviceInfo {
    /// Physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Graphics queue family
    pub graphics_family: u32,
    /// Presentation queue family
    pub present_family: u32,
}

impl PhysicalDeviceInfo {
    /// Pick the first GPU with graphics, presentation and swapchain support
    pub fn select(instance: &Instance, surface: vk::SurfaceKHR, surface_loader: &Surface) -> VulkanResult<Self> {
        // SAFETY: the instance is alive for the duration of the call
        let devices = unsafe { instance.enumerate_physical_devices() }.map_err(VulkanError::Api)?;

        for device in devices {
            match Self::evaluate(instance, device, surface, surface_loader) {
                Ok(info) => {
                    // SAFETY: device_name is NUL-terminated
                    let name = unsafe { CStr::from_ptr(info.properties.device_name.as_ptr()) };
                    log::info!("[VULKAN] Selected GPU: {}", name.to_string_lossy());
                    return Ok(info);
                }
                Err(err) => log::debug!("[VULKAN] Skipping GPU: {err}"),
            }
        }

        Err(VulkanError::InitializationFailed("No suitable GPU found".to_string()))
    }

    fn evaluate(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> VulkanResult<Self> {
        // SAFETY: `device` was enumerated from this instance
        let (properties, memory_properties, queue_families) = unsafe {
            (
                instance.get_physical_device_properties(device),
                instance.get_physical_device_memory_properties(device),
                instance.get_physical_device_queue_family_properties(device),
            )
        };

        let mut graphics_family = None;
        let mut present_family = None;
        for (index, family) in (0u32..).zip(queue_families.iter()) {
            if graphics_family.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                graphics_family = Some(index);
            }
            // SAFETY: index is a valid queue family of `device`
            let present = unsafe { surface_loader.get_physical_device_surface_support(device, index, surface) }
                .map_err(VulkanError::Api)?;
            if present_family.is_none() && present {
                present_family = Some(index);
            }
        }

        let graphics_family = graphics_family
            .ok_or_else(|| VulkanError::InitializationFailed("No graphics queue family found".to_string()))?;
        let present_family = present_family
            .ok_or_else(|| VulkanError::InitializationFailed("No present queue family found".to_string()))?;

        // SAFETY: `device` was enumerated from this instance
        let extensions = unsafe { instance.enumerate_device_extension_properties(device) }.map_err(VulkanError::Api)?;
        let has_swapchain = extensions.iter().any(|extension| {
            // SAFETY: extension_name is NUL-terminated
            let name = unsafe { CStr::from_ptr(extension.extension_name.as_ptr()) };
            name == SwapchainLoader::name()
        });
        if !has_swapchain {
            return Err(VulkanError::InitializationFailed(
                "Required device extensions not supported".to_string(),
            ));
        }

        Ok(Self {
            device,
            properties,
            memory_properties,
            graphics_family,
            present_family,
        })
    }

    /// Index of a memory type allowed by `type_bits` with all of `properties`
    pub fn find_memory_type(&self, type_bits: u32, properties: vk::MemoryPropertyFlags) -> VulkanResult<u32> {
        let count = self.memory_properties.memory_type_count as usize;
        (0u32..)
            .zip(self.memory_properties.memory_types.iter().take(count))
            .find(|(index, memory_type)| {
                type_bits & (1 << index) != 0 && memory_type.property_flags.contains(properties)
            })
            .map(|(index, _)| index)
            .ok_or(VulkanError::NoSuitableMemoryType)
    }
}

/// Logical device and its queues
pub struct LogicalDevice {
    /// Device dispatch table
    pub device: Device,
    /// Graphics queue
    pub graphics_queue: vk::Queue,
    /// Presentation queue
    pub present_queue: vk::Queue,
    /// Swapchain extension loader
    pub swapchain_loader: SwapchainLoader,
}

impl LogicalDevice {
    /// Create the device with one graphics and one present queue
    pub fn new(instance: &Instance, physical: &PhysicalDeviceInfo) -> VulkanResult<Self> {
        let families: HashSet<u32> = [physical.graphics_family, physical.present_family].into_iter().collect();
        let priorities = [1.0f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let extensions = [SwapchainLoader::name().as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();
        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        // SAFETY: the physical device belongs to `instance`; all pointers borrow locals
        let device = unsafe { instance.create_device(physical.device, &create_info, None) }.map_err(VulkanError::Api)?;
        // SAFETY: both families were requested with one queue each
        let (graphics_queue, present_queue) = unsafe {
            (
                device.get_device_queue(physical.graphics_family, 0),
                device.get_device_queue(physical.present_family, 0),
            )
        };
        let swapchain_loader = SwapchainLoader::new(instance, &device);

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
            swapchain_loader,
        })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        // SAFETY: owners of device children are dropped before the device
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

/// Everything needed to talk to one GPU and present to one window
pub struct VulkanContext {
    /// Presentation surface
    pub surface: vk::SurfaceKHR,
    /// Surface extension loader
    pub surface_loader: Surface,
    /// Selected GPU
    pub physical: PhysicalDeviceInfo,
    /// Logical device
    pub device: LogicalDevice,
    /// Instance, dropped last
    pub instance: VulkanInstance,
}

impl VulkanContext {
    /// Bring up Vulkan for `window`
    pub fn new(window: &mut Window, app_name: &str, enable_validation: bool) -> VulkanResult<Self> {
        let instance = VulkanInstance::new(window, app_name, enable_validation)?;
        let surface_loader = Surface::new(&instance.entry, &instance.instance);
        let surface = window
            .create_surface(instance.instance.handle())
            .map_err(|err| VulkanError::InitializationFailed(format!("Surface creation: {err}")))?;

        let devices = PhysicalDeviceInfo::select(&instance.instance, surface, &surface_loader)
            .and_then(|physical| LogicalDevice::new(&instance.instance, &physical).map(|device| (physical, device)));
        let (physical, device) = match devices {
            Ok(devices) => devices,
            Err(err) => {
                // SAFETY: the surface was created from this instance and is unused
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(err);
            }
        };

        Ok(Self {
            surface,
            surface_loader,
            physical,
            device,
            instance,
        })
    }

    /// Device dispatch table
    pub const fn raw(&self) -> &Device {
        &self.device.device
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        // SAFETY: the swapchain built on this surface is destroyed by its owner first
        unsafe {
            let _ = self.device.device.device_wait_idle();
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}
