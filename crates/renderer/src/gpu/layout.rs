//! std140 placement of loose uniforms gathered into the per-program block.
use crate::glsl::{GlslType, UniformDecl};
use crate::types::UniformValue;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BlockMember {
    pub name: String,
    pub ty: GlslType,
    pub offset: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct BlockLayout {
    members: Vec<BlockMember>,
    size: usize,
}

/// Smallest block the wrapper emits when a stage declares no uniforms.
pub(crate) const MIN_BLOCK_SIZE: usize = 16;

fn align_and_size(ty: GlslType) -> (usize, usize) {
    match ty {
        GlslType::Float | GlslType::Int | GlslType::Bool => (4, 4),
        GlslType::Vec2 | GlslType::IVec2 => (8, 8),
        GlslType::Vec3 | GlslType::IVec3 => (16, 12),
        GlslType::Vec4 | GlslType::IVec4 => (16, 16),
        // samplers live outside the block
        GlslType::Sampler2D => (0, 0),
    }
}

impl BlockLayout {
    pub fn new<'a>(decls: impl IntoIterator<Item = &'a UniformDecl>) -> Self {
        let mut members = Vec::new();
        let mut cursor = 0usize;
        for decl in decls {
            if decl.ty == GlslType::Sampler2D {
                continue;
            }
            let (align, size) = align_and_size(decl.ty);
            cursor = cursor.next_multiple_of(align);
            members.push(BlockMember {
                name: decl.name.clone(),
                ty: decl.ty,
                offset: cursor,
            });
            cursor += size;
        }
        Self {
            members,
            size: cursor.next_multiple_of(16).max(MIN_BLOCK_SIZE),
        }
    }

    pub fn members(&self) -> &[BlockMember] {
        &self.members
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|member| member.name == name)
    }

    /// Writes `value` into member `index` of `data`. A vec4 written to a vec3
    /// member drops its last component; float vectors written to integer
    /// vectors are truncated.
    pub fn write(&self, data: &mut [u8], index: usize, value: UniformValue) -> Result<(), String> {
        let member = self
            .members
            .get(index)
            .ok_or_else(|| format!("no block member at index {index}"))?;
        let offset = member.offset;
        let mismatch = || format!("cannot store {value:?} in {} {}", member.ty, member.name);

        match (member.ty, value) {
            (GlslType::Float, UniformValue::Float(v)) => put(data, offset, bytemuck::bytes_of(&v)),
            (GlslType::Int | GlslType::Bool, UniformValue::Int(v)) => {
                put(data, offset, bytemuck::bytes_of(&v))
            }
            (GlslType::Vec2, UniformValue::Vec2(v)) => put(data, offset, bytemuck::cast_slice(&v)),
            (GlslType::Vec3, UniformValue::Vec3(v)) => put(data, offset, bytemuck::cast_slice(&v)),
            (GlslType::Vec3, UniformValue::Vec4([x, y, z, _])) => {
                put(data, offset, bytemuck::cast_slice(&[x, y, z]))
            }
            (GlslType::Vec4, UniformValue::Vec4(v)) => put(data, offset, bytemuck::cast_slice(&v)),
            (GlslType::IVec2, UniformValue::Vec2(v)) => {
                put(data, offset, bytemuck::cast_slice(&v.map(|c| c as i32)))
            }
            (GlslType::IVec3, UniformValue::Vec3(v)) => {
                put(data, offset, bytemuck::cast_slice(&v.map(|c| c as i32)))
            }
            (GlslType::IVec4, UniformValue::Vec4(v)) => {
                put(data, offset, bytemuck::cast_slice(&v.map(|c| c as i32)))
            }
            _ => return Err(mismatch()),
        }
        Ok(())
    }
}

fn put(data: &mut [u8], offset: usize, bytes: &[u8]) {
    if let Some(target) = data.get_mut(offset..offset + bytes.len()) {
        target.copy_from_slice(bytes);
    }
}
