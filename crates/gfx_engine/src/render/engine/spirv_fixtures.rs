//! Tiny SPIR-V assembler for reflection and linker tests

use crate::render::engine::reflection::{decoration, op, storage_class};

pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Word-level SPIR-V writer
pub struct SpirvAssembler {
    words: Vec<u32>,
    next_id: u32,
}

impl SpirvAssembler {
    pub fn new() -> Self {
        Self {
            words: vec![SPIRV_MAGIC, 0x0001_0000, 0, 0, 0],
            next_id: 1,
        }
    }

    pub fn id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn raw_word(&mut self, word: u32) {
        self.words.push(word);
    }

    pub fn op(&mut self, opcode: u32, operands: &[u32]) {
        let word_count = u32::try_from(operands.len() + 1).unwrap();
        self.words.push((word_count << 16) | opcode);
        self.words.extend_from_slice(operands);
    }

    pub fn name(&mut self, id: u32, name: &str) {
        let mut operands = vec![id];
        operands.extend(string_words(name));
        self.op(op::NAME, &operands);
    }

    pub fn member_name(&mut self, ty: u32, index: u32, name: &str) {
        let mut operands = vec![ty, index];
        operands.extend(string_words(name));
        self.op(op::MEMBER_NAME, &operands);
    }

    pub fn decorate(&mut self, id: u32, decoration: u32, literals: &[u32]) {
        let mut operands = vec![id, decoration];
        operands.extend_from_slice(literals);
        self.op(op::DECORATE, &operands);
    }

    pub fn member_decorate(&mut self, ty: u32, index: u32, decoration: u32, literals: &[u32]) {
        let mut operands = vec![ty, index, decoration];
        operands.extend_from_slice(literals);
        self.op(op::MEMBER_DECORATE, &operands);
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut words = self.words.clone();
        words[3] = self.next_id;
        words.iter().flat_map(|word| word.to_le_bytes()).collect()
    }
}

fn string_words(text: &str) -> Vec<u32> {
    let mut bytes = text.as_bytes().to_vec();
    bytes.push(0);
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Member types available to fixture blocks
#[derive(Debug, Clone, Copy)]
pub enum Member {
    Float,
    Vec3,
    Vec4,
    Mat4,
}

/// Builds shader modules that declare resources but contain no code
pub struct ShaderFixture {
    asm: SpirvAssembler,
    float: Option<u32>,
    vec3: Option<u32>,
    vec4: Option<u32>,
    mat4: Option<u32>,
}

impl ShaderFixture {
    pub fn new() -> Self {
        Self {
            asm: SpirvAssembler::new(),
            float: None,
            vec3: None,
            vec4: None,
            mat4: None,
        }
    }

    fn float(&mut self) -> u32 {
        if let Some(id) = self.float {
            return id;
        }
        let id = self.asm.id();
        self.asm.op(op::TYPE_FLOAT, &[id, 32]);
        self.float = Some(id);
        id
    }

    fn vector(&mut self, count: u32) -> u32 {
        let cached = if count == 3 { self.vec3 } else { self.vec4 };
        if let Some(id) = cached {
            return id;
        }
        let float = self.float();
        let id = self.asm.id();
        self.asm.op(op::TYPE_VECTOR, &[id, float, count]);
        if count == 3 {
            self.vec3 = Some(id);
        } else {
            self.vec4 = Some(id);
        }
        id
    }

    fn mat4(&mut self) -> u32 {
        if let Some(id) = self.mat4 {
            return id;
        }
        let column = self.vector(4);
        let id = self.asm.id();
        self.asm.op(op::TYPE_MATRIX, &[id, column, 4]);
        self.mat4 = Some(id);
        id
    }

    fn member_type(&mut self, member: Member) -> (u32, Option<u32>) {
        match member {
            Member::Float => (self.float(), None),
            Member::Vec3 => (self.vector(3), None),
            Member::Vec4 => (self.vector(4), None),
            Member::Mat4 => (self.mat4(), Some(16)),
        }
    }

    fn block_struct(&mut self, type_name: &str, members: &[(&str, Member, u32)]) -> u32 {
        let types: Vec<(u32, Option<u32>)> = members.iter().map(|(_, member, _)| self.member_type(*member)).collect();
        let id = self.asm.id();
        let mut operands = vec![id];
        operands.extend(types.iter().map(|(ty, _)| *ty));
        self.asm.op(op::TYPE_STRUCT, &operands);
        self.asm.name(id, type_name);
        for ((index, (name, _, offset)), (_, stride)) in (0u32..).zip(members).zip(&types) {
            self.asm.member_name(id, index, name);
            self.asm.member_decorate(id, index, decoration::OFFSET, &[*offset]);
            if let Some(stride) = stride {
                self.asm.member_decorate(id, index, decoration::MATRIX_STRIDE, &[*stride]);
            }
        }
        self.asm.decorate(id, decoration::BLOCK, &[]);
        id
    }

    fn variable(&mut self, pointee: u32, class: u32, name: &str) -> u32 {
        let pointer = self.asm.id();
        self.asm.op(op::TYPE_POINTER, &[pointer, class, pointee]);
        let variable = self.asm.id();
        self.asm.op(op::VARIABLE, &[pointer, variable, class]);
        self.asm.name(variable, name);
        variable
    }

    fn bind(&mut self, variable: u32, set: u32, binding: u32) {
        self.asm.decorate(variable, decoration::DESCRIPTOR_SET, &[set]);
        self.asm.decorate(variable, decoration::BINDING, &[binding]);
    }

    pub fn uniform_block(self, binding: u32, name: &str, members: &[(&str, Member, u32)]) -> Self {
        self.uniform_block_in_set(0, binding, name, members)
    }

    pub fn uniform_block_in_set(mut self, set: u32, binding: u32, name: &str, members: &[(&str, Member, u32)]) -> Self {
        let block = self.block_struct(&format!("{name}Block"), members);
        let variable = self.variable(block, storage_class::UNIFORM, name);
        self.bind(variable, set, binding);
        self
    }

    pub fn anonymous_uniform_block(mut self, binding: u32, type_name: &str, members: &[(&str, Member, u32)]) -> Self {
        let block = self.block_struct(type_name, members);
        let variable = self.variable(block, storage_class::UNIFORM, "");
        self.bind(variable, 0, binding);
        self
    }

    pub fn push_constants(mut self, name: &str, members: &[(&str, Member, u32)]) -> Self {
        let block = self.block_struct(&format!("{name}Block"), members);
        self.variable(block, storage_class::PUSH_CONSTANT, name);
        self
    }

    fn image_type(&mut self) -> u32 {
        let float = self.float();
        let id = self.asm.id();
        // 2D, not depth, not arrayed, single-sampled, sampled, unknown format
        self.asm.op(op::TYPE_IMAGE, &[id, float, 1, 0, 0, 0, 1, 0]);
        id
    }

    pub fn combined_sampler(mut self, binding: u32, name: &str) -> Self {
        let image = self.image_type();
        let sampled = self.asm.id();
        self.asm.op(op::TYPE_SAMPLED_IMAGE, &[sampled, image]);
        let variable = self.variable(sampled, storage_class::UNIFORM_CONSTANT, name);
        self.bind(variable, 0, binding);
        self
    }

    pub fn sampled_image(mut self, binding: u32, name: &str) -> Self {
        let image = self.image_type();
        let variable = self.variable(image, storage_class::UNIFORM_CONSTANT, name);
        self.bind(variable, 0, binding);
        self
    }

    pub fn sampler(mut self, binding: u32, name: &str) -> Self {
        let sampler = self.asm.id();
        self.asm.op(op::TYPE_SAMPLER, &[sampler]);
        let variable = self.variable(sampler, storage_class::UNIFORM_CONSTANT, name);
        self.bind(variable, 0, binding);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        self.asm.bytes()
    }
}
