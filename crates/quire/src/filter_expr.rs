//! Filter expressions: a variable or constant followed by `|filter:arg`
//! segments.

use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::html_escape;
use crate::library::Filter;
use crate::parser::Parser;
use crate::render::Renderer;
use crate::value::{Safety, Value};
use crate::variable::{Lookup, Translation, Variable};

const CONSTANT: &str = r#"_\("[^"\\]*(?:\\.[^"\\]*)*"\)|_\('[^'\\]*(?:\\.[^'\\]*)*'\)|"[^"\\]*(?:\\.[^"\\]*)*"|'[^'\\]*(?:\\.[^'\\]*)*'"#;
const NUM: &str = r"[-+\.]?\d[\d\.e]*";

static FILTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^(?P<constant>{CONSTANT})|^(?P<var>[\w\.]+|{NUM})|(?:\|(?P<filter_name>\w+)(?::(?:(?P<constant_arg>{CONSTANT})|(?P<var_arg>[\w\.]+|{NUM})))?)"
    ))
    .expect("filter pattern is valid")
});

#[derive(Debug, Clone)]
enum FilterArg {
    /// Passed to the filter marked safe.
    Constant(Variable),
    Lookup(Variable),
}

#[derive(Debug, Clone)]
struct AppliedFilter {
    filter: Arc<Filter>,
    args: Vec<FilterArg>,
}

#[derive(Debug, Clone)]
pub struct FilterExpression {
    token: String,
    var: Option<Variable>,
    filters: Vec<AppliedFilter>,
}

impl FilterExpression {
    pub fn new(token: &str, parser: &Parser<'_>) -> Result<Self> {
        let mut var: Option<Variable> = None;
        let mut filters = Vec::new();
        let mut upto = 0;

        for caps in FILTER_RE.captures_iter(token) {
            let Some(whole) = caps.get(0) else { continue };
            let start = whole.start();
            if upto != start {
                return Err(Error::syntax(format!(
                    "Could not parse some characters: {}|{}|{}",
                    &token[..upto],
                    &token[upto..start],
                    &token[start..]
                )));
            }
            if var.is_none() {
                let head = caps
                    .name("constant")
                    .or_else(|| caps.name("var"))
                    .ok_or_else(|| {
                        Error::syntax(format!("Could not find variable at start of {token}."))
                    })?;
                var = Some(Variable::new(head.as_str())?);
            } else {
                let name = caps.name("filter_name").map_or("", |m| m.as_str());
                let mut args = Vec::new();
                if let Some(arg) = caps.name("constant_arg") {
                    args.push(FilterArg::Constant(Variable::new(arg.as_str())?));
                } else if let Some(arg) = caps.name("var_arg") {
                    args.push(FilterArg::Lookup(Variable::new(arg.as_str())?));
                }
                let filter = parser.find_filter(name)?;
                args_check(&filter, args.len())?;
                filters.push(AppliedFilter { filter, args });
            }
            upto = whole.end();
        }

        if upto != token.len() {
            return Err(Error::syntax(format!(
                "Could not parse the remainder: '{}' from '{token}'",
                &token[upto..]
            )));
        }

        Ok(Self {
            token: token.to_string(),
            var,
            filters,
        })
    }

    /// The source text of the expression.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn var(&self) -> Option<&Variable> {
        self.var.as_ref()
    }

    pub fn has_filters(&self) -> bool {
        !self.filters.is_empty()
    }

    pub fn filter_names(&self) -> impl Iterator<Item = &str> {
        self.filters.iter().map(|f| f.filter.name.as_str())
    }

    pub fn resolve(
        &self,
        ctx: &mut Context,
        renderer: &Renderer<'_>,
        ignore_failures: bool,
    ) -> Result<Value> {
        self.resolve_with(ctx, renderer, ignore_failures, Translation::AsParsed)
    }

    pub fn resolve_with(
        &self,
        ctx: &mut Context,
        renderer: &Renderer<'_>,
        ignore_failures: bool,
        translation: Translation<'_>,
    ) -> Result<Value> {
        let mut obj = match &self.var {
            None => Value::None,
            Some(var) => match var.resolve(ctx, renderer, translation)? {
                Lookup::Found(value) => value,
                Lookup::Missing { .. } if ignore_failures => Value::None,
                Lookup::Missing { .. } => {
                    let invalid = renderer.invalid_string();
                    if !invalid.is_empty() {
                        return Ok(Value::from(invalid.replace("%s", var.var())));
                    }
                    Value::from(invalid)
                }
            },
        };

        for applied in &self.filters {
            let mut args = Vec::with_capacity(applied.args.len());
            for arg in &applied.args {
                args.push(match arg {
                    FilterArg::Constant(var) => var
                        .resolve(ctx, renderer, Translation::AsParsed)?
                        .into_result()?
                        .mark_safe(),
                    FilterArg::Lookup(var) => var
                        .resolve(ctx, renderer, Translation::AsParsed)?
                        .into_result()?,
                });
            }
            let filter = &applied.filter;
            let autoescape = filter.needs_autoescape.then_some(ctx.autoescape);
            let output = (filter.func)(&obj, &args, autoescape)?;
            obj = match obj.safety() {
                Safety::Safe if filter.is_safe => output.mark_safe(),
                Safety::NeedsEscape => output.mark_for_escaping(),
                _ => output,
            };
        }
        Ok(obj)
    }
}

fn args_check(filter: &Filter, provided: usize) -> Result<()> {
    if provided < filter.required || provided > filter.required + filter.optional {
        return Err(Error::syntax(format!(
            "{} requires {} arguments, {} provided",
            filter.name, filter.required, provided
        )));
    }
    Ok(())
}

/// Turn a resolved value into output text, escaping it when the context
/// or the value asks for it.
pub fn render_value_in_context(value: &Value, ctx: &Context) -> String {
    let text = value.to_string();
    let escape = match value.safety() {
        Safety::NeedsEscape => true,
        Safety::Safe => false,
        Safety::Plain => ctx.autoescape,
    };
    if escape {
        html_escape::escape(&text)
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use pretty_assertions::assert_eq;

    fn compile(engine: &Engine, token: &str) -> Result<FilterExpression> {
        let parser = Parser::new(engine, Vec::new());
        FilterExpression::new(token, &parser)
    }

    fn syntax_message(result: Result<FilterExpression>) -> String {
        match result {
            Err(Error::Syntax(e)) => e.message,
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_chain() {
        let engine = Engine::default();
        let expr = compile(&engine, r#"name|default:"x y"|upper"#).unwrap();
        assert_eq!(expr.var().map(Variable::var), Some("name"));
        assert_eq!(expr.filter_names().collect::<Vec<_>>(), ["default", "upper"]);
    }

    #[test]
    fn test_unparsable_gap() {
        let engine = Engine::default();
        let message = syntax_message(compile(&engine, "var |upper"));
        assert_eq!(message, "Could not parse some characters: var| ||upper");
    }

    #[test]
    fn test_remainder() {
        let engine = Engine::default();
        let message = syntax_message(compile(&engine, "var|upper!"));
        assert_eq!(message, "Could not parse the remainder: '!' from 'var|upper!'");
    }

    #[test]
    fn test_missing_head() {
        let engine = Engine::default();
        let message = syntax_message(compile(&engine, "|upper"));
        assert_eq!(message, "Could not find variable at start of |upper.");
    }

    #[test]
    fn test_unknown_filter() {
        let engine = Engine::default();
        let message = syntax_message(compile(&engine, "var|does_not_exist"));
        assert_eq!(message, "Invalid filter: 'does_not_exist'");
    }

    #[test]
    fn test_arity() {
        let engine = Engine::default();
        assert_eq!(
            syntax_message(compile(&engine, "var|add")),
            "add requires 1 arguments, 0 provided"
        );
        assert_eq!(
            syntax_message(compile(&engine, "var|upper:1")),
            "upper requires 0 arguments, 1 provided"
        );
    }

    #[test]
    fn test_render_value_in_context() {
        let mut ctx = Context::new();
        assert_eq!(render_value_in_context(&Value::from("<b>"), &ctx), "&lt;b&gt;");
        assert_eq!(render_value_in_context(&Value::safe("<b>"), &ctx), "<b>");
        ctx.autoescape = false;
        assert_eq!(render_value_in_context(&Value::from("<b>"), &ctx), "<b>");
        let tainted = Value::from("<b>").mark_for_escaping();
        assert_eq!(render_value_in_context(&tainted, &ctx), "&lt;b&gt;");
    }

    #[test]
    fn test_localtime_filters_receive_the_value_as_is() {
        let mut lib = crate::library::Library::new();
        lib.filter(
            Filter::new("stamp", |value, _, _| Ok(Value::from(format!("[{value}]"))))
                .expects_localtime(),
        );
        let engine = Engine::default().with_builtins(lib);
        let template = engine.from_string("{{ when|stamp }}").unwrap();
        let mut ctx = engine
            .context(serde_json::json!({"when": "2024-01-02 10:00"}))
            .unwrap();
        assert_eq!(
            template.render(&engine, &mut ctx).unwrap(),
            "[2024-01-02 10:00]"
        );
    }
}
