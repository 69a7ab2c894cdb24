//! Frame scheduler
//!
//! Paces the CPU against the GPU with K frame slots. Each slot owns an
//! image-available semaphore, a render-finished semaphore and an in-flight
//! fence. A slot is reused only after its fence signals, so at most K frames
//! are queued on the GPU at once. Swapchain images are tracked separately
//! because the presentation engine may hand back an image still owned by a
//! different slot.

use ash::vk;

use crate::render::backends::device::{FrameSubmission, GpuDevice};
use crate::render::error::{RenderError, RenderResult, VulkanResult};

/// Where the current frame is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// No frame in progress
    Idle,
    /// Waiting for a slot and a swapchain image
    Acquiring,
    /// Recording the frame's command buffer
    Recording,
    /// Command buffer submitted, not yet presented
    Submitted,
    /// Queued for presentation
    Presenting,
}

/// Synchronization objects of one frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSync {
    /// Signalled when the acquired image is ready to be rendered to
    pub image_available: vk::Semaphore,
    /// Signalled when rendering finished and the image can be presented
    pub render_finished: vk::Semaphore,
    /// Signalled when the GPU finished the slot's submission
    pub in_flight: vk::Fence,
}

impl FrameSync {
    fn new<D: GpuDevice>(device: &mut D) -> VulkanResult<Self> {
        let image_available = device.create_semaphore()?;
        let render_finished = match device.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(err) => {
                device.destroy_semaphore(image_available);
                return Err(err);
            }
        };
        // Created signalled so the first wait on each slot returns immediately
        match device.create_fence(true) {
            Ok(in_flight) => Ok(Self {
                image_available,
                render_finished,
                in_flight,
            }),
            Err(err) => {
                device.destroy_semaphore(image_available);
                device.destroy_semaphore(render_finished);
                Err(err)
            }
        }
    }

    fn destroy<D: GpuDevice>(self, device: &mut D) {
        device.destroy_semaphore(self.image_available);
        device.destroy_semaphore(self.render_finished);
        device.destroy_fence(self.in_flight);
    }
}

/// A frame that owns a slot and a swapchain image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredFrame {
    /// Frame slot in `0..K`
    pub slot: usize,
    /// Swapchain image index
    pub image_index: u32,
}

/// K-slot frame pacing state
#[derive(Debug)]
pub struct FrameScheduler {
    frames: Vec<FrameSync>,
    images_in_flight: Vec<Option<vk::Fence>>,
    current: usize,
    state: FrameState,
    acquired: Option<AcquiredFrame>,
}

impl FrameScheduler {
    /// Create `frames_in_flight` slots for a swapchain of `image_count` images
    pub fn new<D: GpuDevice>(device: &mut D, frames_in_flight: usize, image_count: usize) -> RenderResult<Self> {
        if frames_in_flight == 0 {
            return Err(RenderError::InvalidDescription("at least one frame in flight is required".to_string()));
        }

        let mut scheduler = Self {
            frames: Vec::with_capacity(frames_in_flight),
            images_in_flight: vec![None; image_count],
            current: 0,
            state: FrameState::Idle,
            acquired: None,
        };
        for _ in 0..frames_in_flight {
            match FrameSync::new(device) {
                Ok(sync) => scheduler.frames.push(sync),
                Err(err) => {
                    scheduler.destroy(device);
                    return Err(err.into());
                }
            }
        }

        log::debug!("[FRAME] {frames_in_flight} frames in flight over {image_count} swapchain images");
        Ok(scheduler)
    }

    /// Current lifecycle state
    pub const fn state(&self) -> FrameState {
        self.state
    }

    /// Slot the next (or current) frame uses
    pub const fn current_slot(&self) -> usize {
        self.current
    }

    /// Number of frame slots
    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    /// Synchronization objects of a slot
    pub fn frame_sync(&self, slot: usize) -> Option<&FrameSync> {
        self.frames.get(slot)
    }

    /// Frame currently owning a slot and image
    pub const fn acquired(&self) -> Option<AcquiredFrame> {
        self.acquired
    }

    fn expect(&self, expected: FrameState) -> RenderResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(RenderError::InvalidFrameState {
                expected,
                actual: self.state,
            })
        }
    }

    fn current_sync(&self) -> RenderResult<FrameSync> {
        self.frames.get(self.current).copied().ok_or(RenderError::NotInitialized)
    }

    /// Wait for the current slot, acquire an image, and wait for that image
    pub fn acquire<D: GpuDevice>(&mut self, device: &mut D) -> RenderResult<AcquiredFrame> {
        self.expect(FrameState::Idle)?;
        self.state = FrameState::Acquiring;

        match self.acquire_image(device) {
            Ok(frame) => {
                self.acquired = Some(frame);
                self.state = FrameState::Recording;
                Ok(frame)
            }
            Err(err) => {
                self.state = FrameState::Idle;
                Err(err)
            }
        }
    }

    fn acquire_image<D: GpuDevice>(&mut self, device: &mut D) -> RenderResult<AcquiredFrame> {
        let sync = self.current_sync()?;
        device.wait_for_fence(sync.in_flight)?;

        let image_index = device.acquire_next_image(sync.image_available)?;
        let slot = self.images_in_flight.get_mut(image_index as usize).ok_or_else(|| {
            RenderError::InvalidDescription(format!("swapchain returned unknown image {image_index}"))
        })?;

        if let Some(fence) = *slot {
            if fence != sync.in_flight {
                device.wait_for_fence(fence)?;
            }
        }
        *slot = Some(sync.in_flight);

        Ok(AcquiredFrame {
            slot: self.current,
            image_index,
        })
    }

    /// Submit the recorded command buffer of the acquired frame
    pub fn submit<D: GpuDevice>(&mut self, device: &mut D, command_buffer: vk::CommandBuffer) -> RenderResult<()> {
        self.expect(FrameState::Recording)?;
        let sync = self.current_sync()?;

        device.reset_fence(sync.in_flight)?;
        device.submit(&FrameSubmission {
            command_buffer,
            wait_semaphore: sync.image_available,
            signal_semaphore: sync.render_finished,
            fence: sync.in_flight,
        })?;

        self.state = FrameState::Submitted;
        Ok(())
    }

    /// Present the acquired image and advance to the next slot
    pub fn present<D: GpuDevice>(&mut self, device: &mut D) -> RenderResult<()> {
        self.expect(FrameState::Submitted)?;
        let sync = self.current_sync()?;
        let frame = self.acquired.ok_or(RenderError::InvalidFrameState {
            expected: FrameState::Submitted,
            actual: FrameState::Idle,
        })?;

        self.state = FrameState::Presenting;
        let result = device.present(frame.image_index, sync.render_finished);

        self.current = (self.current + 1) % self.frames.len();
        self.acquired = None;
        self.state = FrameState::Idle;
        result.map_err(RenderError::from)
    }

    /// Drop the acquired frame after a recording failure
    pub fn abort(&mut self) {
        if self.acquired.take().is_some() {
            log::warn!("[FRAME] Abandoning frame in slot {}", self.current);
        }
        self.state = FrameState::Idle;
    }

    /// Forget image ownership after the swapchain was recreated
    pub fn reset_images(&mut self, image_count: usize) {
        self.images_in_flight = vec![None; image_count];
    }

    /// Destroy every slot's synchronization objects
    pub fn destroy<D: GpuDevice>(&mut self, device: &mut D) {
        for sync in self.frames.drain(..) {
            sync.destroy(device);
        }
        self.images_in_flight.iter_mut().for_each(|fence| *fence = None);
        self.acquired = None;
        self.state = FrameState::Idle;
    }
}
