//! Swapchain, its image views, backbuffer render passes and framebuffers
//!
//! Two render passes share one colour attachment description and differ only
//! in load behaviour, so pipelines built against one are compatible with the
//! other.

use ash::vk;

use crate::core::config::PresentModePreference;
use crate::render::backends::device::RenderPassKind;
use crate::render::backends::vulkan::context::VulkanContext;
use crate::render::error::{VulkanError, VulkanResult};

const fn preferred_mode(preference: PresentModePreference) -> vk::PresentModeKHR {
    match preference {
        PresentModePreference::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentModePreference::Fifo => vk::PresentModeKHR::FIFO,
        PresentModePreference::Immediate => vk::PresentModeKHR::IMMEDIATE,
    }
}

/// Preferred mode when supported, FIFO otherwise
pub fn choose_present_mode(available: &[vk::PresentModeKHR], preference: PresentModePreference) -> vk::PresentModeKHR {
    let wanted = preferred_mode(preference);
    if available.contains(&wanted) {
        wanted
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// `B8G8R8A8_SRGB` with the sRGB colour space when offered, else the first format
pub fn choose_surface_format(available: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    available
        .iter()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_SRGB && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| available.first())
        .copied()
}

/// Surface extent, clamped to the window size when the surface leaves it open
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, window: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: window
            .width
            .clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
        height: window
            .height
            .clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
    }
}

/// One more than the minimum, capped by the maximum when there is one
pub const fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && wanted > capabilities.max_image_count {
        capabilities.max_image_count
    } else {
        wanted
    }
}

/// Swapchain and the objects sized by it
pub struct Swapchain {
    handle: vk::SwapchainKHR,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    image_views: Vec<vk::ImageView>,
    clear_pass: vk::RenderPass,
    load_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
}

impl Swapchain {
    /// Create a swapchain, retiring `old` if it is not null
    pub fn new(
        context: &VulkanContext,
        window_extent: vk::Extent2D,
        preference: PresentModePreference,
        old: vk::SwapchainKHR,
    ) -> VulkanResult<Self> {
        let physical = context.physical.device;
        let surface = context.surface;
        let loader = &context.surface_loader;

        // SAFETY: surface and physical device belong to the same live instance
        let (capabilities, formats, modes) = unsafe {
            (
                loader
                    .get_physical_device_surface_capabilities(physical, surface)
                    .map_err(VulkanError::Api)?,
                loader
                    .get_physical_device_surface_formats(physical, surface)
                    .map_err(VulkanError::Api)?,
                loader
                    .get_physical_device_surface_present_modes(physical, surface)
                    .map_err(VulkanError::Api)?,
            )
        };

        let format = choose_surface_format(&formats)
            .ok_or_else(|| VulkanError::InitializationFailed("Surface offers no formats".to_string()))?;
        let present_mode = choose_present_mode(&modes, preference);
        let extent = choose_extent(&capabilities, window_extent);
        let min_image_count = choose_image_count(&capabilities);

        let families = [context.physical.graphics_family, context.physical.present_family];
        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(min_image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old);
        create_info = if families[0] == families[1] {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&families)
        };

        let swapchain_loader = &context.device.swapchain_loader;
        // SAFETY: all referenced handles are alive; `old` is retired, not destroyed
        let handle = unsafe { swapchain_loader.create_swapchain(&create_info, None) }.map_err(VulkanError::Api)?;

        let mut swapchain = Self {
            handle,
            format,
            extent,
            image_views: Vec::new(),
            clear_pass: vk::RenderPass::null(),
            load_pass: vk::RenderPass::null(),
            framebuffers: Vec::new(),
        };
        if let Err(err) = swapchain.create_targets(context) {
            swapchain.destroy(context);
            return Err(err);
        }

        log::info!(
            "[SWAPCHAIN] {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            swapchain.image_views.len(),
            format.format,
            present_mode
        );
        Ok(swapchain)
    }

    fn create_targets(&mut self, context: &VulkanContext) -> VulkanResult<()> {
        let device = context.raw();
        // SAFETY: the swapchain was created on this device
        let images = unsafe { context.device.swapchain_loader.get_swapchain_images(self.handle) }
            .map_err(VulkanError::Api)?;

        for image in images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            // SAFETY: image belongs to this device's swapchain
            let view = unsafe { device.create_image_view(&create_info, None) }.map_err(VulkanError::Api)?;
            self.image_views.push(view);
        }

        self.clear_pass = create_render_pass(device, self.format.format, RenderPassKind::Clear)?;
        self.load_pass = create_render_pass(device, self.format.format, RenderPassKind::Load)?;

        for &view in &self.image_views {
            let attachments = [view];
            let create_info = vk::FramebufferCreateInfo::builder()
                .render_pass(self.clear_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);
            // SAFETY: view and render pass were created above on this device
            let framebuffer = unsafe { device.create_framebuffer(&create_info, None) }.map_err(VulkanError::Api)?;
            self.framebuffers.push(framebuffer);
        }
        Ok(())
    }

    /// Swapchain handle
    pub const fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    /// Image extent
    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Number of images
    pub fn image_count(&self) -> usize {
        self.framebuffers.len()
    }

    /// Render pass of a kind
    pub const fn render_pass(&self, kind: RenderPassKind) -> vk::RenderPass {
        match kind {
            RenderPassKind::Clear => self.clear_pass,
            RenderPassKind::Load => self.load_pass,
        }
    }

    /// Framebuffer of an image
    pub fn framebuffer(&self, image_index: u32) -> vk::Framebuffer {
        self.framebuffers
            .get(image_index as usize)
            .copied()
            .unwrap_or_else(vk::Framebuffer::null)
    }

    /// Destroy every owned object
    pub fn destroy(&mut self, context: &VulkanContext) {
        let device = context.raw();
        // SAFETY: the caller has waited for the device to go idle
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                device.destroy_framebuffer(framebuffer, None);
            }
            for pass in [self.clear_pass, self.load_pass] {
                if pass != vk::RenderPass::null() {
                    device.destroy_render_pass(pass, None);
                }
            }
            self.clear_pass = vk::RenderPass::null();
            self.load_pass = vk::RenderPass::null();
            for view in self.image_views.drain(..) {
                device.destroy_image_view(view, None);
            }
            if self.handle != vk::SwapchainKHR::null() {
                context.device.swapchain_loader.destroy_swapchain(self.handle, None);
                self.handle = vk::SwapchainKHR::null();
            }
        }
    }
}

fn create_render_pass(device: &ash::Device, format: vk::Format, kind: RenderPassKind) -> VulkanResult<vk::RenderPass> {
    let (load_op, initial_layout) = match kind {
        RenderPassKind::Clear => (vk::AttachmentLoadOp::CLEAR, vk::ImageLayout::UNDEFINED),
        RenderPassKind::Load => (vk::AttachmentLoadOp::LOAD, vk::ImageLayout::PRESENT_SRC_KHR),
    };
    let attachments = [vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(load_op)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(initial_layout)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build()];

    let colour_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let subpasses = [vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&colour_refs)
        .build()];
    let dependencies = [vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .build()];

    let create_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);
    // SAFETY: all arrays outlive the call
    unsafe { device.create_render_pass(&create_info, None) }.map_err(VulkanError::Api)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(min: u32, max: u32, current: vk::Extent2D) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: current,
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_mailbox_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&modes, PresentModePreference::Mailbox),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&modes, PresentModePreference::Immediate),
            vk::PresentModeKHR::IMMEDIATE
        );
    }

    #[test]
    fn test_srgb_format_preferred() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(choose_surface_format(&[unorm, srgb]), Some(srgb));
        assert_eq!(choose_surface_format(&[unorm]), Some(unorm));
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn test_image_count_respects_maximum() {
        let open = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        assert_eq!(choose_image_count(&capabilities(2, 0, open)), 3);
        assert_eq!(choose_image_count(&capabilities(2, 2, open)), 2);
    }

    #[test]
    fn test_open_extent_clamps_window_size() {
        let open = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        let extent = choose_extent(
            &capabilities(2, 0, open),
            vk::Extent2D {
                width: 8000,
                height: 600,
            },
        );
        assert_eq!(
            extent,
            vk::Extent2D {
                width: 4096,
                height: 600
            }
        );

        let fixed = vk::Extent2D {
            width: 800,
            height: 600,
        };
        assert_eq!(choose_extent(&capabilities(2, 0, fixed), vk::Extent2D::default()), fixed);
    }
}
