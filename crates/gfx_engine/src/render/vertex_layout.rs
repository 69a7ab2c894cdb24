//! Vertex layout description and conversion to Vulkan vertex input state

use ash::vk;
use serde::{Deserialize, Serialize};

use crate::render::error::{RenderError, RenderResult};

/// Semantic meaning of a vertex attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VertexAttribute {
    /// Vertex position
    Position,
    /// Surface normal
    Normal,
    /// Tangent vector
    Tangent,
    /// Bitangent vector
    Bitangent,
    /// Vertex colour
    Colour,
    /// Texture coordinate set 0
    TexCoord0,
    /// Texture coordinate set 1
    TexCoord1,
    /// Texture coordinate set 2
    TexCoord2,
    /// Texture coordinate set 3
    TexCoord3,
}

/// Component type of a vertex attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeType {
    /// 32-bit float
    Float,
    /// 8-bit unsigned integer
    Uint8,
    /// 16-bit signed integer
    Int16,
}

impl AttributeType {
    /// Size of a single component in bytes
    pub const fn size(self) -> u32 {
        match self {
            Self::Float => 4,
            Self::Uint8 => 1,
            Self::Int16 => 2,
        }
    }
}

/// One attribute within a vertex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    /// Semantic of the attribute
    pub attribute: VertexAttribute,
    /// Component type
    pub attribute_type: AttributeType,
    /// Number of components (1 to 4)
    pub count: u8,
    /// Whether integer components are normalised to `[0, 1]`
    pub normalised: bool,
    /// Byte offset within the vertex
    pub offset: u32,
}

impl AttributeDescriptor {
    /// Vulkan format for this attribute
    ///
    /// Floats map to `R32..SFLOAT`; unsigned bytes map to `R8..UNORM` when
    /// normalised and `R8..UINT` otherwise. Anything else has no format.
    pub fn format(&self) -> RenderResult<vk::Format> {
        let format = match (self.attribute_type, self.count, self.normalised) {
            (AttributeType::Float, 1, _) => vk::Format::R32_SFLOAT,
            (AttributeType::Float, 2, _) => vk::Format::R32G32_SFLOAT,
            (AttributeType::Float, 3, _) => vk::Format::R32G32B32_SFLOAT,
            (AttributeType::Float, 4, _) => vk::Format::R32G32B32A32_SFLOAT,
            (AttributeType::Uint8, 1, true) => vk::Format::R8_UNORM,
            (AttributeType::Uint8, 2, true) => vk::Format::R8G8_UNORM,
            (AttributeType::Uint8, 3, true) => vk::Format::R8G8B8_UNORM,
            (AttributeType::Uint8, 4, true) => vk::Format::R8G8B8A8_UNORM,
            (AttributeType::Uint8, 1, false) => vk::Format::R8_UINT,
            (AttributeType::Uint8, 2, false) => vk::Format::R8G8_UINT,
            (AttributeType::Uint8, 3, false) => vk::Format::R8G8B8_UINT,
            (AttributeType::Uint8, 4, false) => vk::Format::R8G8B8A8_UINT,
            _ => {
                return Err(RenderError::UnsupportedVertexFormat {
                    attribute_type: self.attribute_type,
                    count: self.count,
                    normalised: self.normalised,
                })
            }
        };
        Ok(format)
    }
}

/// Packed, interleaved vertex layout
///
/// Attributes are appended in order and packed without padding, so every
/// offset is consistent with the single stride.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VertexLayout {
    attributes: Vec<AttributeDescriptor>,
    stride: u32,
}

impl VertexLayout {
    /// Create an empty layout
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an attribute after the previous ones
    #[must_use]
    pub fn add(mut self, attribute: VertexAttribute, attribute_type: AttributeType, count: u8, normalised: bool) -> Self {
        self.attributes.push(AttributeDescriptor {
            attribute,
            attribute_type,
            count,
            normalised,
            offset: self.stride,
        });
        self.stride += attribute_type.size() * u32::from(count);
        self
    }

    /// Attributes in declaration order
    pub fn attributes(&self) -> &[AttributeDescriptor] {
        &self.attributes
    }

    /// Size of one vertex in bytes
    pub const fn stride(&self) -> u32 {
        self.stride
    }

    /// Vulkan vertex input description for binding 0
    ///
    /// Attribute locations follow declaration order.
    pub fn vulkan_input(&self) -> RenderResult<VertexInputDescription> {
        let binding = vk::VertexInputBindingDescription {
            binding: 0,
            stride: self.stride,
            input_rate: vk::VertexInputRate::VERTEX,
        };

        let attributes = self
            .attributes
            .iter()
            .zip(0u32..)
            .map(|(attribute, location)| {
                Ok(vk::VertexInputAttributeDescription {
                    location,
                    binding: 0,
                    format: attribute.format()?,
                    offset: attribute.offset,
                })
            })
            .collect::<RenderResult<Vec<_>>>()?;

        Ok(VertexInputDescription { binding, attributes })
    }
}

/// Vertex input state derived from a [`VertexLayout`]
#[derive(Debug, Clone)]
pub struct VertexInputDescription {
    /// Binding description
    pub binding: vk::VertexInputBindingDescription,
    /// Attribute descriptions
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}
