//! Extracts a `ShaderDescriptor` from the leading `/** ... */` block of a
//! fragment shader.
//!
//! ```glsl
//! /**
//!  * @shader Rain
//!  * @id rain
//!  * @version 1.0.0
//!  * @tags weather, ambient
//!  * @param u_speed float 1.0 min=0.1 max=3.0 step=0.1 name="Fall Speed"
//!  */
//! ```
//!
//! Blank lines, `//` comments and preprocessor lines may precede the block;
//! anything else ends the search.
use thiserror::Error;

use crate::descriptor::{is_version_shaped, ApiVersion, ParameterDescriptor, ShaderDescriptor};
use crate::value::{ParamKind, ParamValue};

#[derive(Debug, Error, PartialEq)]
pub enum MetadataError {
    #[error("{0}: no leading metadata block")]
    MissingBlock(String),

    #[error("{source_name}: missing required tag @{tag}")]
    MissingTag {
        source_name: String,
        tag: &'static str,
    },

    #[error("malformed @param line '{0}'")]
    MalformedParam(String),

    #[error("parameter {param}: unknown kind '{kind}'")]
    UnknownKind { param: String, kind: String },

    #[error("parameter {param}: '{raw}' is not a valid {kind} value")]
    InvalidValue {
        param: String,
        kind: ParamKind,
        raw: String,
    },

    #[error("parameter {param}: unknown attribute '{key}'")]
    UnknownAttribute { param: String, key: String },

    #[error("parameter {param}: '{key}' only applies to float and int parameters")]
    RangeOnNonNumeric { param: String, key: String },

    #[error("parameter {0}: unterminated quote")]
    UnterminatedQuote(String),

    #[error("malformed version '{0}', expected N.N.N")]
    MalformedVersion(String),

    #[error("malformed graphics api version '{0}', expected N.N")]
    MalformedApiVersion(String),

    #[error("duplicate parameter id '{0}'")]
    DuplicateParam(String),

    #[error("shader id must not be blank")]
    BlankId,
}

/// Parses the metadata block of `source`. `source_name` is recorded as the
/// descriptor's shader source reference and used in error messages.
pub fn parse(source: &str, source_name: &str) -> Result<ShaderDescriptor, MetadataError> {
    let block = leading_block(source)
        .ok_or_else(|| MetadataError::MissingBlock(source_name.to_string()))?;

    let mut name = None;
    let mut id = None;
    let mut version = None;
    let mut author = None;
    let mut origin = None;
    let mut license = None;
    let mut description: Option<String> = None;
    let mut tags = Vec::new();
    let mut params = Vec::new();
    let mut min_graphics_api = ApiVersion::BASELINE;
    let mut in_description = false;

    for line in block.lines().map(strip_decoration) {
        if line.is_empty() {
            continue;
        }
        let Some(tagged) = line.strip_prefix('@') else {
            if in_description {
                let text = description.get_or_insert_with(String::new);
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(line);
            }
            continue;
        };

        let (tag, value) = match tagged.split_once(char::is_whitespace) {
            Some((tag, value)) => (tag, value.trim()),
            None => (tagged, ""),
        };
        in_description = tag == "description";

        match tag {
            "shader" => name = Some(value.to_string()),
            "id" => id = Some(value.to_string()),
            "version" => {
                if !is_version_shaped(value) {
                    return Err(MetadataError::MalformedVersion(value.to_string()));
                }
                version = Some(value.to_string());
            }
            "author" => author = Some(value.to_string()),
            "source" => origin = Some(value.to_string()),
            "license" => license = Some(value.to_string()),
            "description" => description = Some(value.to_string()),
            "tags" => {
                tags = value
                    .split(',')
                    .map(str::trim)
                    .filter(|tag| !tag.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            "minGraphicsApi" => min_graphics_api = value.parse()?,
            "param" => params.push(parse_param(value)?),
            _ => {}
        }
    }

    let missing = |tag| MetadataError::MissingTag {
        source_name: source_name.to_string(),
        tag,
    };
    let descriptor = ShaderDescriptor {
        name: name.ok_or_else(|| missing("shader"))?,
        id: id.ok_or_else(|| missing("id"))?,
        version: version.ok_or_else(|| missing("version"))?,
        author,
        source: origin,
        license,
        description,
        tags,
        shader_source: source_name.to_string(),
        params,
        min_graphics_api,
    };
    descriptor.validate()?;
    Ok(descriptor)
}

fn leading_block(source: &str) -> Option<&str> {
    let mut offset = 0;
    for line in source.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if trimmed.starts_with("/**") {
            let body_start = offset + (line.len() - trimmed.len()) + 3;
            let end = source[body_start..].find("*/")?;
            return Some(&source[body_start..body_start + end]);
        }
        let content = trimmed.trim_end();
        let skippable =
            content.is_empty() || content.starts_with("//") || content.starts_with('#');
        if !skippable {
            return None;
        }
        offset += line.len();
    }
    None
}

fn strip_decoration(line: &str) -> &str {
    let line = line.trim_start();
    line.strip_prefix('*').unwrap_or(line).trim()
}

fn parse_param(value: &str) -> Result<ParameterDescriptor, MetadataError> {
    let tokens = tokenize(value)?;
    let [id, kind_token, default, attributes @ ..] = tokens.as_slice() else {
        return Err(MetadataError::MalformedParam(value.to_string()));
    };

    let kind = ParamKind::from_token(kind_token).ok_or_else(|| MetadataError::UnknownKind {
        param: id.clone(),
        kind: kind_token.clone(),
    })?;
    let parse_value = |raw: &str| {
        ParamValue::parse(kind, raw).ok_or_else(|| MetadataError::InvalidValue {
            param: id.clone(),
            kind,
            raw: raw.to_string(),
        })
    };

    let mut param = ParameterDescriptor::new(id.clone(), parse_value(default.as_str())?);
    for attribute in attributes {
        let (key, raw) = attribute
            .split_once('=')
            .ok_or_else(|| MetadataError::MalformedParam(value.to_string()))?;
        match key {
            "min" | "max" | "step" if !kind.is_numeric() => {
                return Err(MetadataError::RangeOnNonNumeric {
                    param: id.clone(),
                    key: key.to_string(),
                });
            }
            "min" => param.min = Some(parse_value(raw)?),
            "max" => param.max = Some(parse_value(raw)?),
            "step" => param.step = Some(parse_value(raw)?),
            "name" => param.display_name = raw.to_string(),
            "desc" => param.description = raw.to_string(),
            _ => {
                return Err(MetadataError::UnknownAttribute {
                    param: id.clone(),
                    key: key.to_string(),
                });
            }
        }
    }
    Ok(param)
}

/// Splits on whitespace, keeping double-quoted segments intact. Quotes are
/// removed; `\"` and `\\` escape inside quotes.
fn tokenize(value: &str) -> Result<Vec<String>, MetadataError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut pending = false;
    let mut chars = value.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                quoted = !quoted;
                pending = true;
            }
            '\\' if quoted => match chars.next() {
                Some(next) => current.push(next),
                None => break,
            },
            c if c.is_whitespace() && !quoted => {
                if pending || !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                    pending = false;
                }
            }
            c => current.push(c),
        }
    }

    if quoted {
        let param = value.split_whitespace().next().unwrap_or_default();
        return Err(MetadataError::UnterminatedQuote(param.to_string()));
    }
    if pending || !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Rgba;

    const MINIMAL: &str = "/**\n * @shader Rain\n * @id rain\n * @version 1.0.0\n */\nvoid main() {}\n";

    fn block(lines: &[&str]) -> String {
        let mut source = String::from("/**\n");
        for line in lines {
            source.push_str(" * ");
            source.push_str(line);
            source.push('\n');
        }
        source.push_str(" */\nvoid main() {}\n");
        source
    }

    #[test]
    fn minimal_block_uses_defaults() {
        let shader = parse(MINIMAL, "rain.frag").unwrap();
        assert_eq!(shader.id, "rain");
        assert_eq!(shader.name, "Rain");
        assert_eq!(shader.version, "1.0.0");
        assert_eq!(shader.author, None);
        assert_eq!(shader.source, None);
        assert_eq!(shader.license, None);
        assert_eq!(shader.description, None);
        assert!(shader.tags.is_empty());
        assert!(shader.params.is_empty());
        assert_eq!(shader.min_graphics_api, ApiVersion::BASELINE);
        assert_eq!(shader.shader_source, "rain.frag");
    }

    #[test]
    fn missing_required_tags() {
        for (tag, lines) in [
            ("id", vec!["@shader Rain", "@version 1.0.0"]),
            ("shader", vec!["@id rain", "@version 1.0.0"]),
            ("version", vec!["@shader Rain", "@id rain"]),
        ] {
            let err = parse(&block(&lines), "rain.frag").unwrap_err();
            assert_eq!(
                err,
                MetadataError::MissingTag {
                    source_name: "rain.frag".into(),
                    tag,
                }
            );
        }
    }

    #[test]
    fn missing_block_is_an_error() {
        let err = parse("void main() {}\n/** @id late */", "late.frag").unwrap_err();
        assert_eq!(err, MetadataError::MissingBlock("late.frag".into()));
    }

    #[test]
    fn block_may_follow_preprocessor_and_line_comments() {
        let source = format!("#version 300 es\n// header\n\n{MINIMAL}");
        assert_eq!(parse(&source, "rain.frag").unwrap().id, "rain");
    }

    #[test]
    fn parses_float_param_with_attributes() {
        let source = block(&[
            "@shader Rain",
            "@id rain",
            "@version 1.0.0",
            r#"@param u_speed float 1.0 min=0.1 max=3.0 step=0.1 name="Fall Speed""#,
        ]);
        let shader = parse(&source, "rain.frag").unwrap();
        assert_eq!(
            shader.params,
            vec![ParameterDescriptor {
                id: "u_speed".into(),
                display_name: "Fall Speed".into(),
                kind: ParamKind::Float,
                default_value: ParamValue::Float(1.0),
                min: Some(ParamValue::Float(0.1)),
                max: Some(ParamValue::Float(3.0)),
                step: Some(ParamValue::Float(0.1)),
                description: String::new(),
            }]
        );
    }

    #[test]
    fn parses_typed_payloads() {
        let source = block(&[
            "@shader Snow",
            "@id snow",
            "@version 0.2.0-dev",
            "@param u_flakes int 200 min=10 max=1000",
            "@param u_drift bool true",
            r##"@param u_tint color #80a0ff desc="Flake \"tint\"""##,
            "@param u_wind vec2 0.5,-1",
        ]);
        let shader = parse(&source, "snow.frag").unwrap();
        assert_eq!(shader.params[0].default_value, ParamValue::Int(200));
        assert_eq!(shader.params[0].max, Some(ParamValue::Int(1000)));
        assert_eq!(shader.params[1].default_value, ParamValue::Bool(true));
        assert!(matches!(
            shader.params[2].default_value,
            ParamValue::Color(Rgba { a, .. }) if a == 1.0
        ));
        assert_eq!(shader.params[2].description, r#"Flake "tint""#);
        assert_eq!(
            shader.params[3].default_value,
            ParamValue::Vec2([0.5, -1.0])
        );
    }

    #[test]
    fn duplicate_param_ids_fail_validation() {
        let source = block(&[
            "@shader Rain",
            "@id rain",
            "@version 1.0.0",
            "@param u_speed float 1.0",
            "@param u_speed float 2.0",
        ]);
        assert_eq!(
            parse(&source, "rain.frag").unwrap_err(),
            MetadataError::DuplicateParam("u_speed".into())
        );
    }

    #[test]
    fn rejects_unknown_kind_case_sensitively() {
        let source = block(&[
            "@shader Rain",
            "@id rain",
            "@version 1.0.0",
            "@param u_speed Float 1.0",
        ]);
        assert!(matches!(
            parse(&source, "rain.frag"),
            Err(MetadataError::UnknownKind { kind, .. }) if kind == "Float"
        ));
    }

    #[test]
    fn rejects_malformed_values_and_attributes() {
        let cases = [
            "@param u_speed float fast",
            "@param u_on bool yes",
            "@param u_tint color #12",
            "@param u_speed float 1.0 scale=2",
            "@param u_tint color #fff min=0",
            "@param u_speed float",
            r#"@param u_speed float 1.0 name="open"#,
        ];
        for case in cases {
            let source = block(&["@shader Rain", "@id rain", "@version 1.0.0", case]);
            assert!(parse(&source, "rain.frag").is_err(), "accepted {case}");
        }
    }

    #[test]
    fn validates_version_shapes() {
        let bad_version = block(&["@shader Rain", "@id rain", "@version 1.0"]);
        assert_eq!(
            parse(&bad_version, "rain.frag").unwrap_err(),
            MetadataError::MalformedVersion("1.0".into())
        );

        let bad_api = block(&[
            "@shader Rain",
            "@id rain",
            "@version 1.0.0",
            "@minGraphicsApi 3",
        ]);
        assert_eq!(
            parse(&bad_api, "rain.frag").unwrap_err(),
            MetadataError::MalformedApiVersion("3".into())
        );

        let good_api = block(&[
            "@shader Rain",
            "@id rain",
            "@version 1.0.0",
            "@minGraphicsApi 3.1",
        ]);
        assert_eq!(
            parse(&good_api, "rain.frag").unwrap().min_graphics_api,
            ApiVersion::new(3, 1)
        );
    }

    #[test]
    fn tags_are_trimmed_and_description_continues() {
        let source = block(&[
            "@shader Rain",
            "@id rain",
            "@version 1.0.0",
            "@tags  weather ,ambient,  night sky ",
            "@description Falling drops",
            "over the background.",
            "@author Someone",
            "@unknown ignored",
        ]);
        let shader = parse(&source, "rain.frag").unwrap();
        assert_eq!(shader.tags, vec!["weather", "ambient", "night sky"]);
        assert_eq!(
            shader.description.as_deref(),
            Some("Falling drops over the background.")
        );
        assert_eq!(shader.author.as_deref(), Some("Someone"));
    }

    #[test]
    fn repeated_tags_last_wins() {
        let source = block(&["@shader Rain", "@shader Drizzle", "@id rain", "@version 1.0.0"]);
        assert_eq!(parse(&source, "rain.frag").unwrap().name, "Drizzle");
    }

    #[test]
    fn block_without_leading_stars() {
        let source = "/**\n@shader Dots\n@id dots\n@version 1.0.0 */\n";
        assert_eq!(parse(source, "dots.frag").unwrap().id, "dots");
    }

    #[test]
    fn tokenizer_keeps_quoted_segments() {
        let tokens = tokenize(r#"u_a float 1 name="Two Words" desc="a \\ b""#).unwrap();
        assert_eq!(
            tokens,
            vec!["u_a", "float", "1", "name=Two Words", r"desc=a \ b"]
        );
    }
}
