//! Literals and dotted lookups.

use std::sync::LazyLock;

use regex::Regex;

use quire_syntax::{unescape_string_literal, VARIABLE_ATTRIBUTE_SEPARATOR};

use crate::context::Context;
use crate::error::{CallError, Error, Result, SyntaxError};
use crate::render::Renderer;
use crate::value::Value;

static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?$").expect("number pattern is valid")
});

/// Outcome of resolving a variable.
///
/// A missing path is an ordinary outcome here; callers decide whether it
/// turns into [`Error::VariableDoesNotExist`].
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found(Value),
    Missing { key: String, within: String },
}

impl Lookup {
    pub fn into_result(self) -> Result<Value> {
        match self {
            Lookup::Found(value) => Ok(value),
            Lookup::Missing { key, within } => Err(Error::VariableDoesNotExist { key, within }),
        }
    }
}

/// How translation applies when a variable is resolved.
#[derive(Debug, Clone, Copy, Default)]
pub enum Translation<'a> {
    /// Translate only when the source was wrapped in `_(...)`.
    #[default]
    AsParsed,
    Never,
    Always { context: Option<&'a str> },
}

#[derive(Debug, Clone, PartialEq)]
enum Source {
    Literal(Value),
    Lookups(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    var: String,
    source: Source,
    translate: bool,
}

impl Variable {
    pub fn new(var: &str) -> std::result::Result<Self, SyntaxError> {
        if NUMBER_RE.is_match(var) && !var.ends_with('.') {
            return Ok(Self {
                var: var.to_string(),
                source: Source::Literal(parse_number(var)),
                translate: false,
            });
        }

        let (inner, translate) = match var.strip_prefix("_(").and_then(|v| v.strip_suffix(')')) {
            Some(inner) => (inner, true),
            None => (var, false),
        };

        let source = match unescape_string_literal(inner) {
            Ok(literal) => Source::Literal(Value::safe(literal)),
            Err(_) => {
                if inner.contains("._") || inner.starts_with('_') {
                    return Err(SyntaxError::new(format!(
                        "Variables and attributes may not begin with underscores: '{inner}'"
                    )));
                }
                Source::Lookups(
                    inner
                        .split(VARIABLE_ATTRIBUTE_SEPARATOR)
                        .map(str::to_string)
                        .collect(),
                )
            }
        };

        Ok(Self {
            var: var.to_string(),
            source,
            translate,
        })
    }

    /// The source text the variable was built from.
    pub fn var(&self) -> &str {
        &self.var
    }

    pub fn literal(&self) -> Option<&Value> {
        match &self.source {
            Source::Literal(value) => Some(value),
            Source::Lookups(_) => None,
        }
    }

    pub fn lookups(&self) -> Option<&[String]> {
        match &self.source {
            Source::Lookups(bits) => Some(bits),
            Source::Literal(_) => None,
        }
    }

    pub fn resolve(
        &self,
        ctx: &mut Context,
        renderer: &Renderer<'_>,
        translation: Translation<'_>,
    ) -> Result<Lookup> {
        let value = match &self.source {
            Source::Literal(value) => value.clone(),
            Source::Lookups(bits) => match resolve_lookup(bits, ctx, renderer)? {
                Lookup::Found(value) => value,
                missing => return Ok(missing),
            },
        };

        let message_context = match translation {
            Translation::Never => return Ok(Lookup::Found(value)),
            Translation::AsParsed if !self.translate => return Ok(Lookup::Found(value)),
            Translation::AsParsed => None,
            Translation::Always { context } => context,
        };
        let translator = renderer.translator();
        let message = value.to_string();
        let translated = match message_context {
            Some(context) => translator.pgettext(context, &message),
            None => translator.ugettext(&message),
        };
        Ok(Lookup::Found(Value::from(translated)))
    }
}

fn parse_number(var: &str) -> Value {
    let is_float = var.contains(['.', 'e', 'E']);
    if !is_float {
        if let Ok(int) = var.parse::<i64>() {
            return Value::Int(int);
        }
    }
    var.parse::<f64>().map(Value::Float).unwrap_or(Value::None)
}

fn resolve_lookup(bits: &[String], ctx: &mut Context, renderer: &Renderer<'_>) -> Result<Lookup> {
    let invalid = || Value::from(renderer.invalid_string());
    let mut current: Option<Value> = None;

    for bit in bits {
        let next = match &current {
            None => ctx.get(bit).cloned(),
            Some(value) => match lookup_bit(value, bit, ctx, renderer) {
                Ok(found) => found,
                Err(Error::Raised(failure)) if failure.is_silent() => {
                    return Ok(Lookup::Found(invalid()));
                }
                Err(e) => return Err(e),
            },
        };

        let Some(mut value) = next else {
            let within = match &current {
                None => ctx.describe(),
                Some(value) => value.repr(),
            };
            return Ok(Lookup::Missing {
                key: bit.clone(),
                within,
            });
        };

        if let Value::Callable(callable) = &value {
            if callable.do_not_call_in_templates() {
                // kept as is
            } else if callable.alters_data() {
                value = invalid();
            } else {
                value = match callable.call() {
                    Ok(result) => result,
                    Err(CallError::MissingArguments) => invalid(),
                    Err(CallError::Failed(failure)) if failure.is_silent() => {
                        return Ok(Lookup::Found(invalid()));
                    }
                    Err(CallError::Failed(failure)) => return Err(Error::Raised(failure)),
                };
            }
        }
        current = Some(value);
    }

    Ok(Lookup::Found(current.unwrap_or_default()))
}

/// One step of a dotted lookup: subscript, then attribute, then index.
fn lookup_bit(
    current: &Value,
    bit: &str,
    ctx: &mut Context,
    renderer: &Renderer<'_>,
) -> Result<Option<Value>> {
    let index = || bit.parse::<i64>().ok();
    let found = match current {
        Value::Map(map) => match map.get(bit) {
            Some(value) => Some(value.clone()),
            None => match bit {
                "items" => Some(Value::list(
                    map.iter()
                        .map(|(k, v)| Value::list([Value::from(k.as_str()), v.clone()])),
                )),
                "keys" => Some(Value::list(map.keys().map(|k| Value::from(k.as_str())))),
                "values" => Some(Value::list(map.values().cloned())),
                _ => None,
            },
        },
        Value::List(_) | Value::String(..) => index().and_then(|i| current.get_index(i)),
        Value::Object(obj) => {
            if let Some(value) = obj.get_item(bit).map_err(Error::Raised)? {
                Some(value)
            } else if let Some(value) = obj.get_attr(bit).map_err(Error::Raised)? {
                Some(value)
            } else {
                index().and_then(|i| obj.get_index(i))
            }
        }
        Value::Block(block) => match bit {
            "super" => Some(renderer.render_block_super(block, ctx)?),
            "name" => Some(Value::from(block.name.as_str())),
            _ => None,
        },
        Value::Template(template) if bit == "name" => Some(Value::from(template.name())),
        _ => None,
    };
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_numeric_literals() {
        assert_eq!(Variable::new("12").unwrap().literal(), Some(&Value::Int(12)));
        assert_eq!(Variable::new("-1.5").unwrap().literal(), Some(&Value::Float(-1.5)));
        assert_eq!(Variable::new("1e3").unwrap().literal(), Some(&Value::Float(1000.0)));
    }

    #[test]
    fn test_trailing_dot_is_a_lookup() {
        let var = Variable::new("2.").unwrap();
        assert_eq!(var.literal(), None);
        assert_eq!(var.lookups().unwrap(), ["2", ""]);
    }

    #[test]
    fn test_string_literal_is_safe() {
        let var = Variable::new(r#""a \"b\"""#).unwrap();
        let literal = var.literal().unwrap();
        assert_eq!(literal.as_str(), Some("a \"b\""));
        assert!(literal.is_safe());
    }

    #[test]
    fn test_translated_literal() {
        let var = Variable::new(r#"_("hello")"#).unwrap();
        assert!(var.translate);
        assert_eq!(var.literal().and_then(Value::as_str), Some("hello"));
    }

    #[test]
    fn test_dotted_lookups() {
        let var = Variable::new("article.section.0").unwrap();
        assert_eq!(var.lookups().unwrap(), ["article", "section", "0"]);
    }

    #[test]
    fn test_underscore_rejected() {
        let err = Variable::new("article._hidden").unwrap_err();
        assert_eq!(
            err.message,
            "Variables and attributes may not begin with underscores: 'article._hidden'"
        );
        assert!(Variable::new("_private").is_err());
    }
}
