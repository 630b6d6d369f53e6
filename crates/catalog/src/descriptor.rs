//! Structured shader identity and parameter declarations produced by the
//! metadata parser and held by the registry for the lifetime of a discovery
//! pass.
//!
//! Types:
//!
//! - `ShaderDescriptor` holds a shader's identity, authorship, tags, and
//!   ordered parameter list.
//! - `ParameterDescriptor` declares one configurable uniform.
//! - `ApiVersion` is the `major.minor` graphics API level a shader requires.
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::metadata::MetadataError;
use crate::value::{ParamKind, ParamValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
}

impl ApiVersion {
    /// Baseline level assumed when a shader does not declare one.
    pub const BASELINE: ApiVersion = ApiVersion { major: 3, minor: 0 };

    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub fn satisfies(self, required: ApiVersion) -> bool {
        self >= required
    }
}

impl Default for ApiVersion {
    fn default() -> Self {
        Self::BASELINE
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ApiVersion {
    type Err = MetadataError;

    /// Accepts exactly `N.N`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let malformed = || MetadataError::MalformedApiVersion(raw.to_string());
        let (major, minor) = raw.split_once('.').ok_or_else(malformed)?;
        if !is_digits(major) || !is_digits(minor) {
            return Err(malformed());
        }
        Ok(Self {
            major: major.parse().map_err(|_| malformed())?,
            minor: minor.parse().map_err(|_| malformed())?,
        })
    }
}

impl Serialize for ApiVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

pub(crate) fn is_digits(raw: &str) -> bool {
    !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit())
}

/// Checks the `N.N.N[...]` shape: three dot-separated numeric components,
/// optionally followed by a pre-release or build suffix.
pub(crate) fn is_version_shaped(raw: &str) -> bool {
    let core_end = raw.find(['-', '+']).unwrap_or(raw.len());
    let (core, suffix) = raw.split_at(core_end);
    let parts: Vec<&str> = core.split('.').collect();
    parts.len() == 3 && parts.iter().all(|part| is_digits(part)) && suffix.len() != 1
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterDescriptor {
    pub id: String,
    pub display_name: String,
    pub kind: ParamKind,
    pub default_value: ParamValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<ParamValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<ParamValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<ParamValue>,
    pub description: String,
}

impl ParameterDescriptor {
    /// A parameter with only the required fields; optional ones take their
    /// documented defaults.
    pub fn new(id: impl Into<String>, default_value: ParamValue) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            kind: default_value.kind(),
            default_value,
            min: None,
            max: None,
            step: None,
            description: String::new(),
        }
    }

    /// `value` converted to this parameter's kind, if it can be bound.
    ///
    /// Integers widen to floats; every other kind must match exactly.
    pub fn coerce(&self, value: ParamValue) -> Option<ParamValue> {
        match (self.kind, value) {
            (kind, value) if value.kind() == kind => Some(value),
            (ParamKind::Float, ParamValue::Int(_)) => value.as_f32().map(ParamValue::Float),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShaderDescriptor {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub tags: Vec<String>,
    /// Name the loader resolves to fragment-stage text.
    pub shader_source: String,
    pub params: Vec<ParameterDescriptor>,
    pub min_graphics_api: ApiVersion,
}

impl ShaderDescriptor {
    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.id.trim().is_empty() {
            return Err(MetadataError::BlankId);
        }
        let mut seen = HashSet::new();
        for param in &self.params {
            if !seen.insert(param.id.as_str()) {
                return Err(MetadataError::DuplicateParam(param.id.clone()));
            }
        }
        Ok(())
    }

    pub fn param(&self, id: &str) -> Option<&ParameterDescriptor> {
        self.params.iter().find(|param| param.id == id)
    }

    /// Default value of every declared parameter, keyed by id.
    pub fn defaults(&self) -> BTreeMap<String, ParamValue> {
        self.params
            .iter()
            .map(|param| (param.id.clone(), param.default_value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(params: Vec<ParameterDescriptor>) -> ShaderDescriptor {
        ShaderDescriptor {
            id: "rain".into(),
            name: "Rain".into(),
            version: "1.0.0".into(),
            author: None,
            source: None,
            license: None,
            description: None,
            tags: Vec::new(),
            shader_source: "rain.frag".into(),
            params,
            min_graphics_api: ApiVersion::BASELINE,
        }
    }

    #[test]
    fn api_version_parses_major_minor() {
        assert_eq!("3.1".parse::<ApiVersion>().unwrap(), ApiVersion::new(3, 1));
        assert!("3".parse::<ApiVersion>().is_err());
        assert!("3.1.0".parse::<ApiVersion>().is_err());
        assert!("v3.0".parse::<ApiVersion>().is_err());
    }

    #[test]
    fn api_version_ordering() {
        assert!(ApiVersion::new(3, 2).satisfies(ApiVersion::new(3, 0)));
        assert!(!ApiVersion::new(3, 0).satisfies(ApiVersion::new(3, 1)));
    }

    #[test]
    fn version_shape() {
        assert!(is_version_shaped("1.2.3"));
        assert!(is_version_shaped("1.2.3-beta.1"));
        assert!(is_version_shaped("10.0.0+build"));
        assert!(!is_version_shaped("1.2"));
        assert!(!is_version_shaped("1.2.x"));
        assert!(!is_version_shaped("1.2.3-"));
    }

    #[test]
    fn rejects_duplicate_param_ids() {
        let shader = descriptor(vec![
            ParameterDescriptor::new("u_speed", ParamValue::Float(1.0)),
            ParameterDescriptor::new("u_speed", ParamValue::Float(2.0)),
        ]);
        assert!(matches!(
            shader.validate(),
            Err(MetadataError::DuplicateParam(id)) if id == "u_speed"
        ));
    }

    #[test]
    fn rejects_blank_id() {
        let mut shader = descriptor(Vec::new());
        shader.id = "  ".into();
        assert!(matches!(shader.validate(), Err(MetadataError::BlankId)));
    }

    #[test]
    fn coerce_widens_integers_for_float_params() {
        let speed = ParameterDescriptor::new("u_speed", ParamValue::Float(1.0));
        assert_eq!(speed.coerce(ParamValue::Int(2)), Some(ParamValue::Float(2.0)));
        assert_eq!(speed.coerce(ParamValue::Float(0.5)), Some(ParamValue::Float(0.5)));
        assert_eq!(speed.coerce(ParamValue::Bool(true)), None);

        let count = ParameterDescriptor::new("u_count", ParamValue::Int(4));
        assert_eq!(count.coerce(ParamValue::Float(2.0)), None);
    }

    #[test]
    fn defaults_cover_every_param() {
        let shader = descriptor(vec![
            ParameterDescriptor::new("u_speed", ParamValue::Float(1.0)),
            ParameterDescriptor::new("u_count", ParamValue::Int(4)),
        ]);
        let defaults = shader.defaults();
        assert_eq!(defaults.len(), 2);
        assert_eq!(defaults["u_count"], ParamValue::Int(4));
        assert_eq!(shader.param("u_speed").unwrap().display_name, "u_speed");
    }
}
