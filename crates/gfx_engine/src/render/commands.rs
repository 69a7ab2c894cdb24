//! Resource commands recorded by the frontend
//!
//! A command list is executed once, in order, before the frame that follows it.

use ash::vk;
use serde::{Deserialize, Serialize};

use crate::render::handle::{
    FrameBufferHandle, IndexBufferHandle, ProgramHandle, ShaderHandle, TextureHandle, VertexBufferHandle,
};
use crate::render::vertex_layout::VertexLayout;

/// Pipeline stage a shader runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ShaderStage {
    /// Vertex stage
    Vertex,
    /// Geometry stage
    Geometry,
    /// Fragment stage
    Fragment,
}

impl ShaderStage {
    /// Vulkan stage flag
    pub const fn to_vulkan(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::Geometry => vk::ShaderStageFlags::GEOMETRY,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }
}

/// Width of the indices in an index buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexType {
    /// 16-bit indices
    U16,
    /// 32-bit indices
    U32,
}

impl IndexType {
    /// Vulkan index type
    pub const fn to_vulkan(self) -> vk::IndexType {
        match self {
            Self::U16 => vk::IndexType::UINT16,
            Self::U32 => vk::IndexType::UINT32,
        }
    }
}

/// A resource lifecycle command
#[derive(Debug, Clone, PartialEq)]
pub enum RenderCommand {
    /// Upload a vertex buffer
    CreateVertexBuffer {
        /// Handle to register
        handle: VertexBufferHandle,
        /// Interleaved vertex bytes
        data: Vec<u8>,
        /// Layout of one vertex
        layout: VertexLayout,
    },
    /// Overwrite part of a vertex buffer
    UpdateVertexBuffer {
        /// Target buffer
        handle: VertexBufferHandle,
        /// Byte offset of the update
        offset: usize,
        /// Replacement bytes
        data: Vec<u8>,
    },
    /// Release a vertex buffer
    DeleteVertexBuffer {
        /// Buffer to release
        handle: VertexBufferHandle,
    },
    /// Upload an index buffer
    CreateIndexBuffer {
        /// Handle to register
        handle: IndexBufferHandle,
        /// Index bytes
        data: Vec<u8>,
        /// Index width
        index_type: IndexType,
    },
    /// Overwrite part of an index buffer
    UpdateIndexBuffer {
        /// Target buffer
        handle: IndexBufferHandle,
        /// Byte offset of the update
        offset: usize,
        /// Replacement bytes
        data: Vec<u8>,
    },
    /// Release an index buffer
    DeleteIndexBuffer {
        /// Buffer to release
        handle: IndexBufferHandle,
    },
    /// Create a shader module from SPIR-V
    CreateShader {
        /// Handle to register
        handle: ShaderHandle,
        /// Stage the shader runs in
        stage: ShaderStage,
        /// Entry point name
        entry_point: String,
        /// SPIR-V binary
        data: Vec<u8>,
    },
    /// Release a shader module
    DeleteShader {
        /// Shader to release
        handle: ShaderHandle,
    },
    /// Register an empty program
    CreateProgram {
        /// Handle to register
        handle: ProgramHandle,
    },
    /// Attach a shader stage to a program
    AttachShader {
        /// Program to extend
        handle: ProgramHandle,
        /// Shader to attach
        shader: ShaderHandle,
    },
    /// Link a program's attached stages
    LinkProgram {
        /// Program to link
        handle: ProgramHandle,
    },
    /// Release a program and everything built from it
    DeleteProgram {
        /// Program to release
        handle: ProgramHandle,
    },
    /// Upload an RGBA8 texture
    CreateTexture2D {
        /// Handle to register
        handle: TextureHandle,
        /// Width in texels
        width: u32,
        /// Height in texels
        height: u32,
        /// Tightly packed RGBA8 texels
        data: Vec<u8>,
    },
    /// Release a texture
    DeleteTexture {
        /// Texture to release
        handle: TextureHandle,
    },
    /// Register an offscreen framebuffer
    CreateFrameBuffer {
        /// Handle to register
        handle: FrameBufferHandle,
        /// Width in pixels
        width: u32,
        /// Height in pixels
        height: u32,
        /// Colour attachments
        textures: Vec<TextureHandle>,
    },
    /// Release an offscreen framebuffer
    DeleteFrameBuffer {
        /// Framebuffer to release
        handle: FrameBufferHandle,
    },
}

impl RenderCommand {
    /// Whether the command destroys a resource
    pub const fn is_delete(&self) -> bool {
        matches!(
            self,
            Self::DeleteVertexBuffer { .. }
                | Self::DeleteIndexBuffer { .. }
                | Self::DeleteShader { .. }
                | Self::DeleteProgram { .. }
                | Self::DeleteTexture { .. }
                | Self::DeleteFrameBuffer { .. }
        )
    }

    /// Short name for log output
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CreateVertexBuffer { .. } => "CreateVertexBuffer",
            Self::UpdateVertexBuffer { .. } => "UpdateVertexBuffer",
            Self::DeleteVertexBuffer { .. } => "DeleteVertexBuffer",
            Self::CreateIndexBuffer { .. } => "CreateIndexBuffer",
            Self::UpdateIndexBuffer { .. } => "UpdateIndexBuffer",
            Self::DeleteIndexBuffer { .. } => "DeleteIndexBuffer",
            Self::CreateShader { .. } => "CreateShader",
            Self::DeleteShader { .. } => "DeleteShader",
            Self::CreateProgram { .. } => "CreateProgram",
            Self::AttachShader { .. } => "AttachShader",
            Self::LinkProgram { .. } => "LinkProgram",
            Self::DeleteProgram { .. } => "DeleteProgram",
            Self::CreateTexture2D { .. } => "CreateTexture2D",
            Self::DeleteTexture { .. } => "DeleteTexture",
            Self::CreateFrameBuffer { .. } => "CreateFrameBuffer",
            Self::DeleteFrameBuffer { .. } => "DeleteFrameBuffer",
        }
    }
}
