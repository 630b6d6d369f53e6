//! Typed parameter values shared by shader descriptors and layer configs.
//!
//! Types:
//!
//! - `ParamKind` names the closed set of parameter kinds a shader may expose.
//! - `ParamValue` carries a concrete value for one of those kinds.
//! - `Rgba` is the color payload, parsed from hex or float-list notation.
//!
//! Functions:
//!
//! - `ParamValue::parse` turns a metadata payload into a value of a given kind.
//! - `Rgba::parse` and `parse_vector` back the non-scalar payload grammars.
use std::fmt;

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Float,
    Int,
    Bool,
    Color,
    Vec2,
    Vec3,
    Vec4,
}

impl ParamKind {
    /// Maps a metadata kind token to its kind. Tokens are case-sensitive.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "float" => Some(Self::Float),
            "int" => Some(Self::Int),
            "bool" => Some(Self::Bool),
            "color" => Some(Self::Color),
            "vec2" => Some(Self::Vec2),
            "vec3" => Some(Self::Vec3),
            "vec4" => Some(Self::Vec4),
            _ => None,
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Int => "int",
            Self::Bool => "bool",
            Self::Color => "color",
            Self::Vec2 => "vec2",
            Self::Vec3 => "vec3",
            Self::Vec4 => "vec4",
        }
    }

    /// Numeric kinds are the only ones that accept `min`/`max`/`step`.
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Float | Self::Int)
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const BLACK: Rgba = Rgba {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    };

    pub fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Accepts `#RGB`, `#RRGGBB`, `#RRGGBBAA`, or three/four comma separated
    /// floats (optionally wrapped as `vec3(...)`/`vec4(...)`).
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if let Some(hex) = trimmed.strip_prefix('#') {
            return parse_hex(hex);
        }
        let components = parse_floats(strip_constructor(trimmed))?;
        match components.as_slice() {
            [r, g, b] => Some(Self::new(*r, *g, *b, 1.0)),
            [r, g, b, a] => Some(Self::new(*r, *g, *b, *a)),
            _ => None,
        }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn to_hex(self) -> String {
        let channel = |value: f32| (value.clamp(0.0, 1.0) * 255.0).round() as u8;
        format!(
            "#{:02x}{:02x}{:02x}{:02x}",
            channel(self.r),
            channel(self.g),
            channel(self.b),
            channel(self.a)
        )
    }
}

fn parse_hex(hex: &str) -> Option<Rgba> {
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let byte = |index: usize| u8::from_str_radix(&hex[index..index + 2], 16).ok();
    let nibble = |index: usize| {
        u8::from_str_radix(&hex[index..index + 1], 16)
            .ok()
            .map(|v| v * 17)
    };
    let (r, g, b, a) = match hex.len() {
        3 => (nibble(0)?, nibble(1)?, nibble(2)?, 255),
        6 => (byte(0)?, byte(2)?, byte(4)?, 255),
        8 => (byte(0)?, byte(2)?, byte(4)?, byte(6)?),
        _ => return None,
    };
    let unit = |v: u8| v as f32 / 255.0;
    Some(Rgba::new(unit(r), unit(g), unit(b), unit(a)))
}

fn strip_constructor(raw: &str) -> &str {
    let inner = raw
        .strip_prefix("vec2")
        .or_else(|| raw.strip_prefix("vec3"))
        .or_else(|| raw.strip_prefix("vec4"))
        .unwrap_or(raw)
        .trim();
    inner
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .unwrap_or(inner)
}

fn parse_floats(raw: &str) -> Option<Vec<f32>> {
    raw.split(',')
        .map(|part| part.trim().parse::<f32>().ok())
        .collect()
}

/// Parses `a,b[,c[,d]]` (or `vecN(...)`) into exactly `N` floats.
pub fn parse_vector<const N: usize>(raw: &str) -> Option<[f32; N]> {
    let components = parse_floats(strip_constructor(raw.trim()))?;
    components.try_into().ok()
}

fn parse_int(raw: &str) -> Option<i32> {
    if let Ok(value) = raw.parse::<i32>() {
        return Some(value);
    }
    let value = raw.parse::<f64>().ok()?;
    if value.fract() == 0.0 && value >= i32::MIN as f64 && value <= i32::MAX as f64 {
        Some(value as i32)
    } else {
        None
    }
}

/// A concrete parameter value; the variant always matches the parameter kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    Float(f32),
    Int(i32),
    Bool(bool),
    Color(Rgba),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
}

impl ParamValue {
    /// Parses a metadata payload as a value of `kind`.
    ///
    /// Returns `None` when the payload does not fit the kind's grammar.
    pub fn parse(kind: ParamKind, raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match kind {
            ParamKind::Float => raw.parse::<f32>().ok().map(Self::Float),
            ParamKind::Int => parse_int(raw).map(Self::Int),
            ParamKind::Bool => match raw {
                "true" => Some(Self::Bool(true)),
                "false" => Some(Self::Bool(false)),
                _ => None,
            },
            ParamKind::Color => Rgba::parse(raw).map(Self::Color),
            ParamKind::Vec2 => parse_vector::<2>(raw).map(Self::Vec2),
            ParamKind::Vec3 => parse_vector::<3>(raw).map(Self::Vec3),
            ParamKind::Vec4 => parse_vector::<4>(raw).map(Self::Vec4),
        }
    }

    pub fn kind(&self) -> ParamKind {
        match self {
            Self::Float(_) => ParamKind::Float,
            Self::Int(_) => ParamKind::Int,
            Self::Bool(_) => ParamKind::Bool,
            Self::Color(_) => ParamKind::Color,
            Self::Vec2(_) => ParamKind::Vec2,
            Self::Vec3(_) => ParamKind::Vec3,
            Self::Vec4(_) => ParamKind::Vec4,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Self::Float(value) => Some(*value),
            Self::Int(value) => Some(*value as f32),
            _ => None,
        }
    }
}

impl Serialize for ParamValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        fn floats<S: Serializer>(serializer: S, values: &[f32]) -> Result<S::Ok, S::Error> {
            let mut seq = serializer.serialize_seq(Some(values.len()))?;
            for value in values {
                seq.serialize_element(value)?;
            }
            seq.end()
        }

        match self {
            Self::Float(value) => serializer.serialize_f32(*value),
            Self::Int(value) => serializer.serialize_i32(*value),
            Self::Bool(value) => serializer.serialize_bool(*value),
            Self::Color(color) => serializer.serialize_str(&color.to_hex()),
            Self::Vec2(values) => floats(serializer, values),
            Self::Vec3(values) => floats(serializer, values),
            Self::Vec4(values) => floats(serializer, values),
        }
    }
}

impl<'de> Deserialize<'de> for ParamValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = ParamValue;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a number, boolean, color string, or array of 2-4 numbers")
            }

            fn visit_bool<E>(self, v: bool) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(ParamValue::Bool(v))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                i32::try_from(v)
                    .map(ParamValue::Int)
                    .map_err(|_| E::custom(format!("integer {v} does not fit in 32 bits")))
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                i32::try_from(v)
                    .map(ParamValue::Int)
                    .map_err(|_| E::custom(format!("integer {v} does not fit in 32 bits")))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(ParamValue::Float(v as f32))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Rgba::parse(v)
                    .map(ParamValue::Color)
                    .ok_or_else(|| E::custom(format!("invalid color '{v}'")))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut values = Vec::with_capacity(4);
                while let Some(element) = seq.next_element::<f64>()? {
                    values.push(element as f32);
                }
                match values.as_slice() {
                    [x, y] => Ok(ParamValue::Vec2([*x, *y])),
                    [x, y, z] => Ok(ParamValue::Vec3([*x, *y, *z])),
                    [x, y, z, w] => Ok(ParamValue::Vec4([*x, *y, *z, *w])),
                    other => Err(de::Error::invalid_length(other.len(), &self)),
                }
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}
