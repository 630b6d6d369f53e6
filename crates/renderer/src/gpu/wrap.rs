//! Rewrites GLSL ES 3.0 style stages into the Vulkan-flavoured GLSL 450 that
//! wgpu's GLSL frontend accepts.
//!
//! Loose uniforms move into one std140 block at set 0, binding 0 and stay
//! addressable by their original names through macros. Each `sampler2D`
//! becomes a texture/sampler pair in set 1 (bindings `2j` and `2j + 1`) with a
//! `sampler2D(...)` macro. Interface variables without a layout receive
//! sequential locations per direction. Removed lines are left blank and a
//! `#line 1` follows the prelude, so compiler diagnostics keep the author's
//! line numbers.
use std::fmt::Write as _;

use crate::glsl::{classify, top_level_lines, Direction, GlslType, LineKind, UniformDecl};
use crate::types::StageKind;

use super::layout::BlockLayout;

const HEADER: &str = "#version 450\n";

#[derive(Debug, Clone)]
pub(crate) struct WrappedStage {
    pub source: String,
    pub layout: BlockLayout,
    pub samplers: Vec<String>,
}

pub(crate) fn member_name(name: &str) -> String {
    format!("lw_{name}")
}

pub(crate) fn wrap_stage(source: &str, stage: StageKind) -> Result<WrappedStage, String> {
    let mut body = String::with_capacity(source.len() + 64);
    let mut uniforms: Vec<UniformDecl> = Vec::new();
    let mut samplers: Vec<String> = Vec::new();
    let mut next_in = 0u32;
    let mut next_out = 0u32;

    for (index, line, depth) in top_level_lines(source) {
        if depth > 0 {
            body.push_str(line);
            body.push('\n');
            continue;
        }
        let kind = classify(line).map_err(|err| format!("0:{}: {err}", index + 1))?;
        match kind {
            LineKind::Version | LineKind::Precision => {}
            LineKind::Uniforms(GlslType::Sampler2D, names) => samplers.extend(names),
            LineKind::Uniforms(ty, names) => {
                uniforms.extend(names.into_iter().map(|name| UniformDecl {
                    name,
                    ty,
                    line: index,
                }));
            }
            LineKind::Interface(direction) => {
                let count = line.matches(',').count() as u32 + 1;
                let location = match direction {
                    Direction::In => &mut next_in,
                    Direction::Out => &mut next_out,
                };
                let _ = write!(body, "layout(location = {location}) {}", line.trim_start());
                *location += count;
            }
            LineKind::Other => body.push_str(line),
        }
        body.push('\n');
    }

    if stage == StageKind::Vertex && (!uniforms.is_empty() || !samplers.is_empty()) {
        return Err("0:1: vertex stage uniforms are not supported".into());
    }

    let layout = BlockLayout::new(&uniforms);
    let mut prelude = String::from(HEADER);
    if stage == StageKind::Fragment {
        write_block(&mut prelude, &layout);
        write_samplers(&mut prelude, &samplers);
    }
    prelude.push_str("#line 1\n");
    prelude.push_str(&body);

    Ok(WrappedStage {
        source: prelude,
        layout,
        samplers,
    })
}

fn write_block(out: &mut String, layout: &BlockLayout) {
    out.push_str("layout(std140, set = 0, binding = 0) uniform LayerParams {\n");
    if layout.members().is_empty() {
        out.push_str("    vec4 lw_unused;\n");
    }
    for member in layout.members() {
        // bools are stored as ints
        let ty = match member.ty {
            GlslType::Bool => "int",
            other => other.token(),
        };
        let _ = writeln!(out, "    {ty} {};", member_name(&member.name));
    }
    out.push_str("} lw_params;\n");
    for member in layout.members() {
        let field = member_name(&member.name);
        let _ = match member.ty {
            GlslType::Bool => writeln!(out, "#define {} (lw_params.{field} != 0)", member.name),
            _ => writeln!(out, "#define {} lw_params.{field}", member.name),
        };
    }
}

fn write_samplers(out: &mut String, samplers: &[String]) {
    for (index, name) in samplers.iter().enumerate() {
        let binding = index * 2;
        let _ = writeln!(
            out,
            "layout(set = 1, binding = {binding}) uniform texture2D lw_{name}_texture;"
        );
        let _ = writeln!(
            out,
            "layout(set = 1, binding = {}) uniform sampler lw_{name}_sampler;",
            binding + 1
        );
        let _ = writeln!(
            out,
            "#define {name} sampler2D(lw_{name}_texture, lw_{name}_sampler)"
        );
    }
}
