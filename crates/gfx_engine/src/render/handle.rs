//! Opaque resource handles
//!
//! Handles are allocated by the frontend and carried inside render commands.
//! The engine only ever looks them up; it never invents one.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! resource_handle {
    ($(#[$meta:meta])* $name:ident, $kind:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            /// Wrap a raw frontend handle value
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            /// Raw handle value
            pub const fn raw(self) -> u32 {
                self.0
            }

            /// Resource kind this handle refers to
            pub const fn kind(self) -> ResourceKind {
                ResourceKind::$kind
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", ResourceKind::$kind, self.0)
            }
        }
    };
}

resource_handle!(
    /// Handle to a vertex buffer
    VertexBufferHandle,
    VertexBuffer
);
resource_handle!(
    /// Handle to an index buffer
    IndexBufferHandle,
    IndexBuffer
);
resource_handle!(
    /// Handle to a compiled shader stage
    ShaderHandle,
    Shader
);
resource_handle!(
    /// Handle to a linked (or linking) shader program
    ProgramHandle,
    Program
);
resource_handle!(
    /// Handle to a 2D texture
    TextureHandle,
    Texture
);
resource_handle!(
    /// Handle to an offscreen framebuffer
    FrameBufferHandle,
    FrameBuffer
);

/// Kind of resource a handle refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Vertex buffer
    VertexBuffer,
    /// Index buffer
    IndexBuffer,
    /// Shader stage
    Shader,
    /// Shader program
    Program,
    /// Texture
    Texture,
    /// Framebuffer
    FrameBuffer,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::VertexBuffer => "vertex buffer",
            Self::IndexBuffer => "index buffer",
            Self::Shader => "shader",
            Self::Program => "program",
            Self::Texture => "texture",
            Self::FrameBuffer => "framebuffer",
        };
        f.write_str(name)
    }
}
