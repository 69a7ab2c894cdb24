//! SPIR-V reflection
//!
//! Walks the instruction stream of a SPIR-V module and extracts what the
//! program linker needs: uniform blocks with member offsets and sizes, the
//! push-constant block, and every descriptor binding with its kind.
//!
//! Sizes follow the declared layout of the module (`Offset`, `ArrayStride`
//! and `MatrixStride` decorations), so std140 padding is preserved.

use ash::vk;
use std::collections::HashMap;
use std::io::Cursor;
use thiserror::Error;

const HEADER_WORDS: usize = 5;

pub(crate) mod op {
    pub const NAME: u32 = 5;
    pub const MEMBER_NAME: u32 = 6;
    pub const TYPE_INT: u32 = 21;
    pub const TYPE_FLOAT: u32 = 22;
    pub const TYPE_VECTOR: u32 = 23;
    pub const TYPE_MATRIX: u32 = 24;
    pub const TYPE_IMAGE: u32 = 25;
    pub const TYPE_SAMPLER: u32 = 26;
    pub const TYPE_SAMPLED_IMAGE: u32 = 27;
    pub const TYPE_ARRAY: u32 = 28;
    pub const TYPE_RUNTIME_ARRAY: u32 = 29;
    pub const TYPE_STRUCT: u32 = 30;
    pub const TYPE_POINTER: u32 = 32;
    pub const CONSTANT: u32 = 43;
    pub const VARIABLE: u32 = 59;
    pub const DECORATE: u32 = 71;
    pub const MEMBER_DECORATE: u32 = 72;
}

pub(crate) mod decoration {
    pub const BLOCK: u32 = 2;
    pub const BUFFER_BLOCK: u32 = 3;
    pub const ARRAY_STRIDE: u32 = 6;
    pub const MATRIX_STRIDE: u32 = 7;
    pub const BINDING: u32 = 33;
    pub const DESCRIPTOR_SET: u32 = 34;
    pub const OFFSET: u32 = 35;
}

pub(crate) mod storage_class {
    pub const UNIFORM_CONSTANT: u32 = 0;
    pub const UNIFORM: u32 = 2;
    pub const PUSH_CONSTANT: u32 = 9;
}

const DIM_BUFFER: u32 = 5;

/// Errors raised while reflecting a SPIR-V binary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReflectionError {
    /// The byte stream is not a SPIR-V binary (bad length or magic)
    #[error("Not a SPIR-V module: {0}")]
    InvalidBinary(String),

    /// An instruction runs past the end of the module
    #[error("Truncated instruction at word {0}")]
    Truncated(usize),

    /// An instruction has fewer operands than its opcode requires
    #[error("Opcode {opcode} at word {offset} is missing operands")]
    MissingOperand {
        /// Opcode
        opcode: u32,
        /// Word offset of the instruction
        offset: usize,
    },

    /// A result id was referenced but never defined
    #[error("Undefined id %{0}")]
    UndefinedId(u32),

    /// A descriptor resource has no `Binding` decoration
    #[error("Resource '{0}' has no binding decoration")]
    MissingBinding(String),
}

/// Kind of a descriptor binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    /// Uniform buffer
    UniformBuffer,
    /// Image and sampler combined
    CombinedImageSampler,
    /// Separate sampled image
    SampledImage,
    /// Separate sampler
    Sampler,
}

impl DescriptorKind {
    /// Vulkan descriptor type
    pub const fn to_vulkan(self) -> vk::DescriptorType {
        match self {
            Self::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            Self::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            Self::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
            Self::Sampler => vk::DescriptorType::SAMPLER,
        }
    }
}

/// A member of a uniform block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformField {
    /// Member name
    pub name: String,
    /// Byte offset within the block
    pub offset: u32,
    /// Declared size in bytes
    pub size: u32,
}

/// A uniform or push-constant block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformBlock {
    /// Instance name, or the block type name for anonymous instances
    pub name: String,
    /// Descriptor binding (always 0 for push constants)
    pub binding: u32,
    /// Declared size in bytes
    pub size: u32,
    /// Members in declaration order
    pub fields: Vec<UniformField>,
}

/// A descriptor binding declared by a shader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBinding {
    /// Binding slot in set 0
    pub binding: u32,
    /// Descriptor kind
    pub kind: DescriptorKind,
    /// Array length (1 for non-arrays)
    pub count: u32,
}

/// Everything the linker needs to know about one shader stage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderReflection {
    /// Uniform blocks in declaration order
    pub uniform_blocks: Vec<UniformBlock>,
    /// Push-constant block, if declared
    pub push_constants: Option<UniformBlock>,
    /// Descriptor bindings in declaration order
    pub bindings: Vec<DescriptorBinding>,
}

/// Load a SPIR-V byte stream as words in host byte order
pub fn spirv_words(bytes: &[u8]) -> Result<Vec<u32>, ReflectionError> {
    ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|err| ReflectionError::InvalidBinary(err.to_string()))
}

/// Reflect a SPIR-V binary
pub fn reflect(bytes: &[u8]) -> Result<ShaderReflection, ReflectionError> {
    let words = spirv_words(bytes)?;
    reflect_words(&words)
}

/// Reflect an already word-aligned SPIR-V module
pub fn reflect_words(words: &[u32]) -> Result<ShaderReflection, ReflectionError> {
    if words.len() < HEADER_WORDS {
        return Err(ReflectionError::Truncated(words.len()));
    }
    let module = ModuleInfo::parse(words)?;
    module.reflect()
}

#[derive(Debug, Clone, Copy)]
enum SpirvType {
    Scalar { width: u32 },
    Vector { component: u32, count: u32 },
    Matrix { column: u32, columns: u32 },
    Image { dim: u32, sampled: u32 },
    Sampler,
    SampledImage,
    Array { element: u32, length: u32 },
    RuntimeArray,
    Struct,
    Pointer { pointee: u32 },
}

#[derive(Debug, Default, Clone, Copy)]
struct Decorations {
    binding: Option<u32>,
    set: Option<u32>,
    block: bool,
    buffer_block: bool,
    array_stride: Option<u32>,
}

#[derive(Debug, Default, Clone, Copy)]
struct MemberDecorations {
    offset: Option<u32>,
    matrix_stride: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
struct Variable {
    id: u32,
    pointer_type: u32,
    storage_class: u32,
}

#[derive(Debug, Default)]
struct ModuleInfo {
    names: HashMap<u32, String>,
    member_names: HashMap<(u32, u32), String>,
    decorations: HashMap<u32, Decorations>,
    member_decorations: HashMap<(u32, u32), MemberDecorations>,
    types: HashMap<u32, SpirvType>,
    struct_members: HashMap<u32, Vec<u32>>,
    constants: HashMap<u32, u32>,
    variables: Vec<Variable>,
}

fn literal_string(words: &[u32]) -> String {
    let bytes: Vec<u8> = words
        .iter()
        .flat_map(|word| word.to_le_bytes())
        .take_while(|&byte| byte != 0)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

impl ModuleInfo {
    fn parse(words: &[u32]) -> Result<Self, ReflectionError> {
        let mut module = Self::default();
        let mut offset = HEADER_WORDS;

        while offset < words.len() {
            let word_count = (words[offset] >> 16) as usize;
            let opcode = words[offset] & 0xffff;
            if word_count == 0 || offset + word_count > words.len() {
                return Err(ReflectionError::Truncated(offset));
            }

            let operands = &words[offset + 1..offset + word_count];
            module.record(opcode, operands).ok_or(ReflectionError::MissingOperand { opcode, offset })?;
            offset += word_count;
        }

        Ok(module)
    }

    /// Returns `None` when the instruction is too short for its opcode
    fn record(&mut self, opcode: u32, ops: &[u32]) -> Option<()> {
        match opcode {
            op::NAME => {
                self.names.insert(*ops.first()?, literal_string(ops.get(1..)?));
            }
            op::MEMBER_NAME => {
                self.member_names
                    .insert((*ops.first()?, *ops.get(1)?), literal_string(ops.get(2..)?));
            }
            op::DECORATE => {
                let entry = self.decorations.entry(*ops.first()?).or_default();
                match *ops.get(1)? {
                    decoration::BINDING => entry.binding = Some(*ops.get(2)?),
                    decoration::DESCRIPTOR_SET => entry.set = Some(*ops.get(2)?),
                    decoration::BLOCK => entry.block = true,
                    decoration::BUFFER_BLOCK => entry.buffer_block = true,
                    decoration::ARRAY_STRIDE => entry.array_stride = Some(*ops.get(2)?),
                    _ => {}
                }
            }
            op::MEMBER_DECORATE => {
                let entry = self.member_decorations.entry((*ops.first()?, *ops.get(1)?)).or_default();
                match *ops.get(2)? {
                    decoration::OFFSET => entry.offset = Some(*ops.get(3)?),
                    decoration::MATRIX_STRIDE => entry.matrix_stride = Some(*ops.get(3)?),
                    _ => {}
                }
            }
            op::TYPE_INT | op::TYPE_FLOAT => {
                self.types.insert(*ops.first()?, SpirvType::Scalar { width: *ops.get(1)? });
            }
            op::TYPE_VECTOR => {
                self.types.insert(
                    *ops.first()?,
                    SpirvType::Vector {
                        component: *ops.get(1)?,
                        count: *ops.get(2)?,
                    },
                );
            }
            op::TYPE_MATRIX => {
                self.types.insert(
                    *ops.first()?,
                    SpirvType::Matrix {
                        column: *ops.get(1)?,
                        columns: *ops.get(2)?,
                    },
                );
            }
            op::TYPE_IMAGE => {
                self.types.insert(
                    *ops.first()?,
                    SpirvType::Image {
                        dim: *ops.get(2)?,
                        sampled: *ops.get(6)?,
                    },
                );
            }
            op::TYPE_SAMPLER => {
                self.types.insert(*ops.first()?, SpirvType::Sampler);
            }
            op::TYPE_SAMPLED_IMAGE => {
                self.types.insert(*ops.first()?, SpirvType::SampledImage);
            }
            op::TYPE_ARRAY => {
                self.types.insert(
                    *ops.first()?,
                    SpirvType::Array {
                        element: *ops.get(1)?,
                        length: *ops.get(2)?,
                    },
                );
            }
            op::TYPE_RUNTIME_ARRAY => {
                self.types.insert(*ops.first()?, SpirvType::RuntimeArray);
            }
            op::TYPE_STRUCT => {
                let id = *ops.first()?;
                self.types.insert(id, SpirvType::Struct);
                self.struct_members.insert(id, ops.get(1..)?.to_vec());
            }
            op::TYPE_POINTER => {
                self.types
                    .insert(*ops.first()?, SpirvType::Pointer { pointee: *ops.get(2)? });
            }
            op::CONSTANT => {
                // Only the low word matters for array lengths
                self.constants.insert(*ops.get(1)?, *ops.get(2)?);
            }
            op::VARIABLE => {
                self.variables.push(Variable {
                    pointer_type: *ops.first()?,
                    id: *ops.get(1)?,
                    storage_class: *ops.get(2)?,
                });
            }
            _ => {}
        }
        Some(())
    }

    fn ty(&self, id: u32) -> Result<SpirvType, ReflectionError> {
        self.types.get(&id).copied().ok_or(ReflectionError::UndefinedId(id))
    }

    fn decorations(&self, id: u32) -> Decorations {
        self.decorations.get(&id).copied().unwrap_or_default()
    }

    fn constant(&self, id: u32) -> Result<u32, ReflectionError> {
        self.constants.get(&id).copied().ok_or(ReflectionError::UndefinedId(id))
    }

    fn type_size(&self, id: u32, matrix_stride: Option<u32>) -> Result<u32, ReflectionError> {
        let size = match self.ty(id)? {
            SpirvType::Scalar { width } => width / 8,
            SpirvType::Vector { component, count } => count * self.type_size(component, None)?,
            SpirvType::Matrix { column, columns } => match matrix_stride {
                Some(stride) => columns * stride,
                None => columns * self.type_size(column, None)?,
            },
            SpirvType::Array { element, length } => {
                let stride = match self.decorations(id).array_stride {
                    Some(stride) => stride,
                    None => self.type_size(element, matrix_stride)?,
                };
                self.constant(length)? * stride
            }
            SpirvType::Struct => self.struct_size(id)?,
            SpirvType::RuntimeArray
            | SpirvType::Image { .. }
            | SpirvType::Sampler
            | SpirvType::SampledImage
            | SpirvType::Pointer { .. } => 0,
        };
        Ok(size)
    }

    fn struct_size(&self, id: u32) -> Result<u32, ReflectionError> {
        let fields = self.struct_fields(id)?;
        Ok(fields.iter().map(|field| field.offset + field.size).max().unwrap_or(0))
    }

    fn struct_fields(&self, id: u32) -> Result<Vec<UniformField>, ReflectionError> {
        let members = self.struct_members.get(&id).ok_or(ReflectionError::UndefinedId(id))?;
        members
            .iter()
            .zip(0u32..)
            .map(|(&member_type, index)| {
                let decorations = self.member_decorations.get(&(id, index)).copied().unwrap_or_default();
                let name = self
                    .member_names
                    .get(&(id, index))
                    .cloned()
                    .unwrap_or_else(|| format!("_m{index}"));
                Ok(UniformField {
                    name,
                    offset: decorations.offset.unwrap_or(0),
                    size: self.type_size(member_type, decorations.matrix_stride)?,
                })
            })
            .collect()
    }

    fn block_name(&self, variable: u32, struct_type: u32) -> String {
        match self.names.get(&variable) {
            Some(name) if !name.is_empty() => name.clone(),
            _ => self.names.get(&struct_type).cloned().unwrap_or_default(),
        }
    }

    fn uniform_block(&self, variable: u32, struct_type: u32, binding: u32) -> Result<UniformBlock, ReflectionError> {
        Ok(UniformBlock {
            name: self.block_name(variable, struct_type),
            binding,
            size: self.struct_size(struct_type)?,
            fields: self.struct_fields(struct_type)?,
        })
    }

    /// Binding slot of a descriptor variable, or `None` if it lives outside set 0
    fn binding_of(&self, variable: u32) -> Result<Option<u32>, ReflectionError> {
        let decorations = self.decorations(variable);
        let name = self.names.get(&variable).cloned().unwrap_or_default();
        let binding = decorations.binding.ok_or_else(|| ReflectionError::MissingBinding(name.clone()))?;
        match decorations.set.unwrap_or(0) {
            0 => Ok(Some(binding)),
            set => {
                log::warn!("[SHADER] Ignoring '{name}' in descriptor set {set}; only set 0 is supported");
                Ok(None)
            }
        }
    }

    fn reflect(&self) -> Result<ShaderReflection, ReflectionError> {
        let mut reflection = ShaderReflection::default();

        for variable in &self.variables {
            let SpirvType::Pointer { pointee } = self.ty(variable.pointer_type)? else {
                continue;
            };

            let (base, count) = match self.ty(pointee)? {
                SpirvType::Array { element, length } => (element, self.constant(length)?),
                _ => (pointee, 1),
            };

            match variable.storage_class {
                storage_class::UNIFORM => {
                    let decorations = self.decorations(base);
                    if decorations.buffer_block || !decorations.block {
                        log::debug!("[SHADER] Skipping storage buffer %{}", variable.id);
                        continue;
                    }
                    let Some(binding) = self.binding_of(variable.id)? else {
                        continue;
                    };
                    reflection.uniform_blocks.push(self.uniform_block(variable.id, base, binding)?);
                    reflection.bindings.push(DescriptorBinding {
                        binding,
                        kind: DescriptorKind::UniformBuffer,
                        count,
                    });
                }
                storage_class::UNIFORM_CONSTANT => {
                    let kind = match self.ty(base)? {
                        SpirvType::SampledImage => DescriptorKind::CombinedImageSampler,
                        SpirvType::Image { dim, sampled: 1 } if dim != DIM_BUFFER => DescriptorKind::SampledImage,
                        SpirvType::Sampler => DescriptorKind::Sampler,
                        _ => {
                            log::debug!("[SHADER] Skipping unsupported resource %{}", variable.id);
                            continue;
                        }
                    };
                    let Some(binding) = self.binding_of(variable.id)? else {
                        continue;
                    };
                    reflection.bindings.push(DescriptorBinding { binding, kind, count });
                }
                storage_class::PUSH_CONSTANT => {
                    reflection.push_constants = Some(self.uniform_block(variable.id, base, 0)?);
                }
                _ => {}
            }
        }

        Ok(reflection)
    }
}
