//! Top-level declaration scanning for GLSL ES 3.0 style stages.
//!
//! Only what the backends need: loose `uniform` declarations and
//! `in`/`out` interface variables at brace depth zero.
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlslType {
    Float,
    Int,
    Bool,
    Vec2,
    Vec3,
    Vec4,
    IVec2,
    IVec3,
    IVec4,
    Sampler2D,
}

impl GlslType {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "float" => Some(Self::Float),
            "int" => Some(Self::Int),
            "bool" => Some(Self::Bool),
            "vec2" => Some(Self::Vec2),
            "vec3" => Some(Self::Vec3),
            "vec4" => Some(Self::Vec4),
            "ivec2" => Some(Self::IVec2),
            "ivec3" => Some(Self::IVec3),
            "ivec4" => Some(Self::IVec4),
            "sampler2D" => Some(Self::Sampler2D),
            _ => None,
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Int => "int",
            Self::Bool => "bool",
            Self::Vec2 => "vec2",
            Self::Vec3 => "vec3",
            Self::Vec4 => "vec4",
            Self::IVec2 => "ivec2",
            Self::IVec3 => "ivec3",
            Self::IVec4 => "ivec4",
            Self::Sampler2D => "sampler2D",
        }
    }
}

impl fmt::Display for GlslType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformDecl {
    pub name: String,
    pub ty: GlslType,
    /// Zero-based source line.
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

/// What a single top-level source line declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    Version,
    Precision,
    Uniforms(GlslType, Vec<String>),
    /// An `in`/`out` declaration without an explicit `layout`.
    Interface(Direction),
    Other,
}

const PRECISION_QUALIFIERS: [&str; 3] = ["lowp", "mediump", "highp"];

/// Classifies one line. Errors describe declarations the backends cannot
/// express (unknown uniform types, uniform arrays).
pub fn classify(line: &str) -> Result<LineKind, String> {
    let trimmed = line.trim();
    if trimmed.starts_with("#version") {
        return Ok(LineKind::Version);
    }
    if trimmed.starts_with("precision ") {
        return Ok(LineKind::Precision);
    }

    let Some(statement) = trimmed.strip_suffix(';') else {
        return Ok(LineKind::Other);
    };
    let mut words = statement
        .split_whitespace()
        .filter(|word| !PRECISION_QUALIFIERS.contains(word));

    match words.next() {
        Some("uniform") => {
            let ty_token = words.next().ok_or_else(|| format!("incomplete uniform: {trimmed}"))?;
            let ty = GlslType::from_token(ty_token)
                .ok_or_else(|| format!("unsupported uniform type '{ty_token}'"))?;
            let rest: String = words.collect::<Vec<_>>().join(" ");
            let mut names = Vec::new();
            for name in rest.split(',').map(str::trim) {
                if name.contains('[') {
                    return Err(format!("uniform arrays are not supported ({name})"));
                }
                if !is_identifier(name) {
                    return Err(format!("malformed uniform declaration: {trimmed}"));
                }
                names.push(name.to_string());
            }
            Ok(LineKind::Uniforms(ty, names))
        }
        Some("in") => Ok(LineKind::Interface(Direction::In)),
        Some("out") => Ok(LineKind::Interface(Direction::Out)),
        _ => Ok(LineKind::Other),
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Walks source lines, yielding `(line index, line, nesting depth before the
/// line)`. Braces inside comments do not count; a line that begins inside a
/// block comment reports a depth of at least 1 so it is never treated as a
/// declaration.
pub fn top_level_lines(source: &str) -> impl Iterator<Item = (usize, &str, usize)> {
    let mut depth = 0usize;
    let mut in_comment = false;
    source.lines().enumerate().map(move |(index, line)| {
        let before = if in_comment { depth.max(1) } else { depth };
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            if in_comment {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    in_comment = false;
                }
                continue;
            }
            match c {
                '/' if chars.peek() == Some(&'/') => break,
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    in_comment = true;
                }
                '{' => depth += 1,
                '}' => depth = depth.saturating_sub(1),
                _ => {}
            }
        }
        (index, line, before)
    })
}

/// Every loose uniform declared at file scope, in declaration order.
pub fn declared_uniforms(source: &str) -> Result<Vec<UniformDecl>, String> {
    let mut uniforms = Vec::new();
    for (index, line, depth) in top_level_lines(source) {
        if depth > 0 {
            continue;
        }
        if let LineKind::Uniforms(ty, names) =
            classify(line).map_err(|err| format!("line {}: {err}", index + 1))?
        {
            uniforms.extend(names.into_iter().map(|name| UniformDecl {
                name,
                ty,
                line: index,
            }));
        }
    }
    Ok(uniforms)
}
