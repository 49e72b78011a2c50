//! Control flow: `if`, `ifequal`, `ifchanged`, `for`, `with`, `firstof`
//! and `cycle`.

use std::sync::{Arc, LazyLock};

use indexmap::IndexMap;
use regex::Regex;

use quire_syntax::Token;

use crate::context::{Context, Frame, NodeState};
use crate::error::{Error, Result};
use crate::filter_expr::FilterExpression;
use crate::node::{Node, NodeId, NodeList};
use crate::parser::Parser;
use crate::render::Renderer;
use crate::smartif::Condition;
use crate::value::Value;

static LOOPVAR_SEP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" *, *").expect("loop variable separator is valid"));

#[derive(Debug)]
pub struct IfNode {
    /// `None` marks the trailing `else`.
    pub branches: Vec<(Option<Condition>, NodeList)>,
}

#[derive(Debug)]
pub struct IfEqualNode {
    pub var1: FilterExpression,
    pub var2: FilterExpression,
    pub negate: bool,
    pub nodelist_true: NodeList,
    pub nodelist_false: NodeList,
}

#[derive(Debug)]
pub struct IfChangedNode {
    pub id: NodeId,
    pub nodelist_true: NodeList,
    pub nodelist_false: NodeList,
    pub vars: Vec<FilterExpression>,
}

#[derive(Debug)]
pub struct ForNode {
    pub loopvars: Vec<String>,
    pub sequence: FilterExpression,
    pub is_reversed: bool,
    pub nodelist_loop: NodeList,
    pub nodelist_empty: NodeList,
}

#[derive(Debug)]
pub struct WithNode {
    pub extra_context: IndexMap<String, FilterExpression>,
    pub nodelist: NodeList,
}

/// One `{% cycle %}`. Named cycles are shared by every tag that refers to
/// them, so they advance together.
#[derive(Debug)]
pub struct CycleNode {
    pub id: NodeId,
    pub values: Vec<FilterExpression>,
    pub variable_name: Option<String>,
    pub silent: bool,
}

// ============================================================================
// Compilers
// ============================================================================

pub(crate) fn do_if(parser: &mut Parser<'_>, token: &Token) -> Result<Node> {
    const UNTIL: [&str; 3] = ["elif", "else", "endif"];

    let bits: Vec<String> = token.split_contents().into_iter().skip(1).collect();
    let condition = Condition::parse(parser, &bits)?;
    let nodelist = parser.parse(&UNTIL)?;
    let mut branches = vec![(Some(condition), nodelist)];
    let mut token = parser.next_token()?;

    while token.contents.starts_with("elif") {
        let bits: Vec<String> = token.split_contents().into_iter().skip(1).collect();
        let condition = Condition::parse(parser, &bits)?;
        let nodelist = parser.parse(&UNTIL)?;
        branches.push((Some(condition), nodelist));
        token = parser.next_token()?;
    }

    if token.contents == "else" {
        let nodelist = parser.parse(&["endif"])?;
        branches.push((None, nodelist));
        parser.delete_first_token();
    }

    Ok(Node::If(IfNode { branches }))
}

pub(crate) fn do_ifequal(parser: &mut Parser<'_>, token: &Token, negate: bool) -> Result<Node> {
    let bits = token.split_contents();
    if bits.len() != 3 {
        return Err(Error::syntax(format!("'{}' takes two arguments", bits[0])));
    }
    let end_tag = format!("end{}", bits[0]);
    let nodelist_true = parser.parse(&["else", end_tag.as_str()])?;
    let nodelist_false = if parser.next_token()?.contents == "else" {
        let nodelist = parser.parse(&[end_tag.as_str()])?;
        parser.delete_first_token();
        nodelist
    } else {
        NodeList::new()
    };
    Ok(Node::IfEqual(IfEqualNode {
        var1: parser.compile_filter(&bits[1])?,
        var2: parser.compile_filter(&bits[2])?,
        negate,
        nodelist_true,
        nodelist_false,
    }))
}

pub(crate) fn do_ifchanged(parser: &mut Parser<'_>, token: &Token) -> Result<Node> {
    let bits: Vec<&str> = token.contents.split_whitespace().collect();
    let nodelist_true = parser.parse(&["else", "endifchanged"])?;
    let nodelist_false = if parser.next_token()?.contents == "else" {
        let nodelist = parser.parse(&["endifchanged"])?;
        parser.delete_first_token();
        nodelist
    } else {
        NodeList::new()
    };
    let vars = bits
        .iter()
        .skip(1)
        .map(|bit| parser.compile_filter(bit))
        .collect::<Result<Vec<_>>>()?;
    Ok(Node::IfChanged(IfChangedNode {
        id: NodeId::next(),
        nodelist_true,
        nodelist_false,
        vars,
    }))
}

pub(crate) fn do_for(parser: &mut Parser<'_>, token: &Token) -> Result<Node> {
    let contents = &token.contents;
    let bits: Vec<&str> = contents.split_whitespace().collect();
    if bits.len() < 4 {
        return Err(Error::syntax(format!(
            "'for' statements should have at least four words: {contents}"
        )));
    }

    let is_reversed = bits.last() == Some(&"reversed");
    let in_index = if is_reversed { bits.len() - 3 } else { bits.len() - 2 };
    if bits[in_index] != "in" {
        return Err(Error::syntax(format!(
            "'for' statements should use the format 'for x in y': {contents}"
        )));
    }

    let joined = bits[1..in_index].join(" ");
    let loopvars: Vec<String> = LOOPVAR_SEP.split(&joined).map(str::to_string).collect();
    if loopvars.iter().any(|var| var.is_empty() || var.contains(' ')) {
        return Err(Error::syntax(format!(
            "'for' tag received an invalid argument: {contents}"
        )));
    }

    let sequence = parser.compile_filter(bits[in_index + 1])?;
    let nodelist_loop = parser.parse(&["empty", "endfor"])?;
    let nodelist_empty = if parser.next_token()?.contents == "empty" {
        let nodelist = parser.parse(&["endfor"])?;
        parser.delete_first_token();
        nodelist
    } else {
        NodeList::new()
    };

    Ok(Node::For(ForNode {
        loopvars,
        sequence,
        is_reversed,
        nodelist_loop,
        nodelist_empty,
    }))
}

pub(crate) fn do_with(parser: &mut Parser<'_>, token: &Token) -> Result<Node> {
    let mut remaining: Vec<String> = token.split_contents().into_iter().skip(1).collect();
    let extra_context = parser.token_kwargs(&mut remaining, true)?;
    if extra_context.is_empty() {
        return Err(Error::syntax(
            "'with' expected at least one variable assignment",
        ));
    }
    if let Some(extra) = remaining.first() {
        return Err(Error::syntax(format!(
            "'with' received an invalid token: {extra}"
        )));
    }
    let nodelist = parser.parse(&["endwith"])?;
    parser.delete_first_token();
    Ok(Node::With(WithNode {
        extra_context,
        nodelist,
    }))
}

pub(crate) fn do_firstof(parser: &mut Parser<'_>, token: &Token) -> Result<Node> {
    let bits: Vec<String> = token.split_contents().into_iter().skip(1).collect();
    if bits.is_empty() {
        return Err(Error::syntax(
            "'firstof' statement requires at least one argument",
        ));
    }
    let vars = bits
        .iter()
        .map(|bit| parser.compile_filter(bit))
        .collect::<Result<Vec<_>>>()?;
    Ok(Node::FirstOf(vars))
}

pub(crate) fn do_cycle(parser: &mut Parser<'_>, token: &Token) -> Result<Node> {
    let mut args = token.split_contents();
    if args.len() < 2 {
        return Err(Error::syntax(
            "'cycle' tag requires at least two arguments",
        ));
    }

    // {% cycle a,b,c %}
    if args[1].contains(',') {
        let quoted: Vec<String> = args[1].split(',').map(|arg| format!("\"{arg}\"")).collect();
        args.splice(1..2, quoted);
    }

    if args.len() == 2 {
        return Ok(Node::Cycle(parser.named_cycle(&args[1])?));
    }

    let len = args.len();
    let mut silent = false;
    let mut as_form = false;
    if len > 4 {
        if args[len - 3] == "as" {
            if args[len - 1] != "silent" {
                return Err(Error::syntax(format!(
                    "Only 'silent' flag is allowed after cycle's name, not '{}'.",
                    args[len - 1]
                )));
            }
            as_form = true;
            silent = true;
            args.pop();
        } else if args[len - 2] == "as" {
            as_form = true;
        }
    }

    if as_form {
        let len = args.len();
        let name = args[len - 1].clone();
        let values = args[1..len - 2]
            .iter()
            .map(|arg| parser.compile_filter(arg))
            .collect::<Result<Vec<_>>>()?;
        let node = Arc::new(CycleNode {
            id: NodeId::next(),
            values,
            variable_name: Some(name.clone()),
            silent,
        });
        parser.register_cycle(&name, Arc::clone(&node));
        return Ok(Node::Cycle(node));
    }

    let values = args[1..]
        .iter()
        .map(|arg| parser.compile_filter(arg))
        .collect::<Result<Vec<_>>>()?;
    Ok(Node::Cycle(Arc::new(CycleNode {
        id: NodeId::next(),
        values,
        variable_name: None,
        silent: false,
    })))
}

// ============================================================================
// Rendering
// ============================================================================

impl<'e> Renderer<'e> {
    pub(crate) fn render_if(&self, node: &IfNode, ctx: &mut Context) -> Result<String> {
        for (condition, nodelist) in &node.branches {
            let matched = match condition {
                None => true,
                Some(condition) => match condition.eval(ctx, self) {
                    Ok(value) => value.is_truthy(),
                    Err(e) if e.is_missing_variable() => false,
                    Err(e) => return Err(e),
                },
            };
            if matched {
                return self.render_nodelist(nodelist, ctx);
            }
        }
        Ok(String::new())
    }

    pub(crate) fn render_ifequal(&self, node: &IfEqualNode, ctx: &mut Context) -> Result<String> {
        let val1 = node.var1.resolve(ctx, self, true)?;
        let val2 = node.var2.resolve(ctx, self, true)?;
        if (val1 == val2) != node.negate {
            self.render_nodelist(&node.nodelist_true, ctx)
        } else {
            self.render_nodelist(&node.nodelist_false, ctx)
        }
    }

    pub(crate) fn render_ifchanged(
        &self,
        node: &IfChangedNode,
        ctx: &mut Context,
    ) -> Result<String> {
        let loop_id = ctx.current_loop();
        let last_seen = match ctx.render_context.top().state.get(&node.id) {
            Some(NodeState::IfChanged {
                loop_id: seen_in,
                last_seen,
            }) if *seen_in == loop_id => last_seen.clone(),
            _ => None,
        };

        let mut body = None;
        let compare_to = if node.vars.is_empty() {
            let rendered = self.render_nodelist(&node.nodelist_true, ctx)?;
            body = Some(rendered.clone());
            Value::from(rendered)
        } else {
            let mut values = Vec::with_capacity(node.vars.len());
            for var in &node.vars {
                values.push(match var.resolve(ctx, self, true) {
                    Ok(value) => value,
                    Err(e) if e.is_missing_variable() => Value::None,
                    Err(e) => return Err(e),
                });
            }
            Value::list(values)
        };

        if last_seen.as_ref() == Some(&compare_to) {
            return self.render_nodelist(&node.nodelist_false, ctx);
        }
        ctx.render_context.top().state.insert(
            node.id,
            NodeState::IfChanged {
                loop_id,
                last_seen: Some(compare_to),
            },
        );
        match body {
            Some(body) => Ok(body),
            None => self.render_nodelist(&node.nodelist_true, ctx),
        }
    }

    pub(crate) fn render_for(&self, node: &ForNode, ctx: &mut Context) -> Result<String> {
        let parentloop = ctx
            .get("forloop")
            .cloned()
            .unwrap_or_else(|| Value::map(Frame::new()));
        ctx.push();

        let values = match self.for_values(node, ctx) {
            Ok(values) => values,
            Err(e) => {
                ctx.pop()?;
                return Err(e);
            }
        };
        if values.is_empty() {
            ctx.pop()?;
            return self.render_nodelist(&node.nodelist_empty, ctx);
        }

        ctx.enter_loop();
        let result = self.render_for_items(node, values, parentloop, ctx);
        ctx.exit_loop();
        ctx.pop()?;
        result
    }

    fn for_values(&self, node: &ForNode, ctx: &mut Context) -> Result<Vec<Value>> {
        let values = match node.sequence.resolve(ctx, self, true) {
            Ok(Value::None) => return Ok(Vec::new()),
            Ok(values) => values,
            Err(e) if e.is_missing_variable() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut items = values
            .iterate()
            .ok_or_else(|| Error::NonIterable(values.to_string()))?;
        if node.is_reversed {
            items.reverse();
        }
        Ok(items)
    }

    fn render_for_items(
        &self,
        node: &ForNode,
        values: Vec<Value>,
        parentloop: Value,
        ctx: &mut Context,
    ) -> Result<String> {
        let len = values.len();
        let unpack = node.loopvars.len() > 1;
        let mut output = String::new();

        for (i, item) in values.into_iter().enumerate() {
            let forloop = Value::map([
                ("parentloop", parentloop.clone()),
                ("counter0", Value::from(i)),
                ("counter", Value::from(i + 1)),
                ("revcounter", Value::from(len - i)),
                ("revcounter0", Value::from(len - i - 1)),
                ("first", Value::Bool(i == 0)),
                ("last", Value::Bool(i == len - 1)),
            ]);
            ctx.set("forloop", forloop);

            let mut pushed = false;
            if unpack {
                // Mismatched arity binds only the leading names.
                if let Some(parts) = item.iterate() {
                    let frame: Frame = node.loopvars.iter().cloned().zip(parts).collect();
                    ctx.update(frame);
                    pushed = true;
                }
            } else {
                ctx.set(node.loopvars[0].clone(), item);
            }

            let rendered = self.render_nodelist(&node.nodelist_loop, ctx);
            if pushed {
                ctx.pop()?;
            }
            output.push_str(&rendered?);
        }
        Ok(output)
    }

    pub(crate) fn render_with(&self, node: &WithNode, ctx: &mut Context) -> Result<String> {
        let mut frame = Frame::with_capacity(node.extra_context.len());
        for (key, expr) in &node.extra_context {
            frame.insert(key.clone(), expr.resolve(ctx, self, false)?);
        }
        ctx.update(frame);
        let output = self.render_nodelist(&node.nodelist, ctx);
        ctx.pop()?;
        output
    }

    /// The first truthy value, rendered as is.
    pub(crate) fn render_firstof(
        &self,
        vars: &[FilterExpression],
        ctx: &mut Context,
    ) -> Result<String> {
        for var in vars {
            let value = var.resolve(ctx, self, true)?;
            if value.is_truthy() {
                return Ok(value.to_string());
            }
        }
        Ok(String::new())
    }

    pub(crate) fn render_cycle(&self, node: &Arc<CycleNode>, ctx: &mut Context) -> Result<String> {
        if node.values.is_empty() {
            return Ok(String::new());
        }
        let frame = ctx.render_context.top();
        let index = match frame.state.get(&node.id) {
            Some(NodeState::Cycle(index)) => *index,
            _ => 0,
        };
        frame
            .state
            .insert(node.id, NodeState::Cycle((index + 1) % node.values.len()));

        let value = node.values[index % node.values.len()].resolve(ctx, self, false)?;
        if let Some(name) = &node.variable_name {
            ctx.set(name.clone(), value.clone());
        }
        if node.silent {
            return Ok(String::new());
        }
        Ok(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::Engine;
    use crate::error::Error;
    use crate::settings::Settings;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn render(source: &str, data: serde_json::Value) -> String {
        crate::render(source, data).unwrap()
    }

    fn syntax_error(source: &str) -> String {
        let engine = Engine::default();
        match engine.from_string(source) {
            Err(Error::Syntax(e)) => e.message,
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn test_if_elif_else() {
        let source = "{% if a %}A{% elif b %}B{% else %}C{% endif %}";
        assert_eq!(render(source, json!({"a": 1})), "A");
        assert_eq!(render(source, json!({"b": 1})), "B");
        assert_eq!(render(source, json!({})), "C");
    }

    #[test]
    fn test_ifequal_and_ifnotequal() {
        assert_eq!(
            render("{% ifequal a b %}yes{% else %}no{% endifequal %}", json!({"a": 1, "b": 1})),
            "yes"
        );
        assert_eq!(
            render("{% ifnotequal a 'x' %}yes{% endifnotequal %}", json!({"a": "x"})),
            ""
        );
        assert_eq!(render("{% ifequal a b %}yes{% endifequal %}", json!({})), "yes");
        assert_eq!(syntax_error("{% ifequal a %}{% endifequal %}"), "'ifequal' takes two arguments");
    }

    #[test]
    fn test_for_counters_and_last() {
        assert_eq!(
            render(
                "{% for v in values %}{{ forloop.counter }}{% if forloop.last %}!{% endif %}{% endfor %}",
                json!({"values": [6, 6, 6]})
            ),
            "123!"
        );
        assert_eq!(
            render(
                "{% for v in values reversed %}{{ v }}{{ forloop.revcounter0 }}{% endfor %}",
                json!({"values": [1, 2, 3]})
            ),
            "322110"
        );
    }

    #[test]
    fn test_for_parentloop_and_empty() {
        assert_eq!(
            render(
                "{% for a in xs %}{% for b in xs %}{{ forloop.parentloop.counter }}{{ forloop.counter }} {% endfor %}{% endfor %}",
                json!({"xs": [1, 2]})
            ),
            "11 12 21 22 "
        );
        assert_eq!(
            render("{% for x in missing %}x{% empty %}none{% endfor %}", json!({})),
            "none"
        );
    }

    #[test]
    fn test_for_unpacking_truncates() {
        assert_eq!(
            render(
                "{% for k, v in items %}{{ k }}={{ v }};{% endfor %}",
                json!({"items": [["a", 1], ["b", 2]]})
            ),
            "a=1;b=2;"
        );
        assert_eq!(
            render(
                "{% for x,y,z in items %}{{ x }}:{{ y }},{{ z }}/{% endfor %}",
                json!({"items": [["one", 1], ["two", 2]]})
            ),
            "one:1,/two:2,/"
        );
    }

    #[test]
    fn test_for_over_non_iterable_fails() {
        let engine = Engine::default();
        let template = engine.from_string("{% for x in n %}{% endfor %}").unwrap();
        let mut ctx = crate::Context::from_json(json!({"n": 5})).unwrap();
        let err = template.render(&engine, &mut ctx).unwrap_err();
        assert_eq!(err.to_string(), "Noniterable \"5\" is passed to for loop.");
        assert_eq!(ctx.depth(), 1);
    }

    #[test]
    fn test_for_syntax_errors() {
        assert_eq!(
            syntax_error("{% for x %}{% endfor %}"),
            "'for' statements should have at least four words: for x"
        );
        assert_eq!(
            syntax_error("{% for x on y z %}{% endfor %}"),
            "'for' statements should use the format 'for x in y': for x on y z"
        );
        assert_eq!(
            syntax_error("{% for x,,y in z %}{% endfor %}"),
            "'for' tag received an invalid argument: for x,,y in z"
        );
    }

    #[test]
    fn test_ifchanged() {
        assert_eq!(
            render(
                "{% for n in num %}{% ifchanged %}{{ n }}{% endifchanged %}{% endfor %}",
                json!({"num": [1, 1, 2, 2, 3]})
            ),
            "123"
        );
        assert_eq!(
            render(
                "{% for d in days %}{% ifchanged d.m %}[{{ d.m }}]{% else %}.{% endifchanged %}{% endfor %}",
                json!({"days": [{"m": 1}, {"m": 1}, {"m": 2}]})
            ),
            "[1].[2]"
        );
    }

    #[test]
    fn test_ifchanged_resets_per_outer_iteration() {
        assert_eq!(
            render(
                "{% for x in xs %}{% for y in ys %}{% ifchanged %}{{ y }}{% endifchanged %}{% endfor %},{% endfor %}",
                json!({"xs": [1, 2], "ys": [7, 7]})
            ),
            "7,7,"
        );
    }

    #[test]
    fn test_with_both_forms() {
        assert_eq!(
            render("{% with a=b.c d=1 %}{{ a }}{{ d }}{% endwith %}{{ a }}", json!({"b": {"c": "x"}})),
            "x1"
        );
        assert_eq!(
            render("{% with b.c as a %}{{ a }}{% endwith %}", json!({"b": {"c": "y"}})),
            "y"
        );
        assert_eq!(
            syntax_error("{% with %}{% endwith %}"),
            "'with' expected at least one variable assignment"
        );
        assert_eq!(
            syntax_error("{% with a=1 junk %}{% endwith %}"),
            "'with' received an invalid token: junk"
        );
    }

    #[test]
    fn test_firstof() {
        assert_eq!(
            render("{% firstof a b 'fallback' %}", json!({"a": 0, "b": "B"})),
            "B"
        );
        assert_eq!(render("{% firstof a b %}", json!({})), "");
        assert_eq!(
            syntax_error("{% firstof %}"),
            "'firstof' statement requires at least one argument"
        );
    }

    #[test]
    fn test_cycle() {
        assert_eq!(
            render(
                "{% cycle a,b,c as abc %}{% cycle abc %}{% cycle abc %}{% cycle abc %}",
                json!({})
            ),
            "abca"
        );
        assert_eq!(
            render(
                "{% for i in xs %}{% cycle 'r1' 'r2' %}{% endfor %}",
                json!({"xs": [1, 2, 3]})
            ),
            "r1r2r1"
        );
        assert_eq!(
            render(
                "{% cycle 'a' 'b' as v silent %}{% cycle v %}{{ v }}",
                json!({})
            ),
            "b"
        );
    }

    #[test]
    fn test_cycle_errors() {
        assert_eq!(
            syntax_error("{% cycle %}"),
            "'cycle' tag requires at least two arguments"
        );
        assert_eq!(
            syntax_error("{% cycle foo %}"),
            "No named cycles in template. 'foo' is not defined"
        );
        assert_eq!(
            syntax_error("{% cycle a b as x %}{% cycle y %}"),
            "Named cycle 'y' does not exist"
        );
        assert_eq!(
            syntax_error("{% cycle a b as x loud %}"),
            "Only 'silent' flag is allowed after cycle's name, not 'loud'."
        );
    }

    #[test]
    fn test_invalid_string_for_unpacked_gap() {
        let settings = Settings {
            template_string_if_invalid: "INVALID".to_string(),
            ..Settings::default()
        };
        let engine = Engine::new(settings);
        let template = engine
            .from_string("{% for x,y,z in items %}{{ x }}:{{ y }},{{ z }}/{% endfor %}")
            .unwrap();
        let mut ctx = crate::Context::from_json(json!({"items": [["one", 1], ["two", 2]]})).unwrap();
        assert_eq!(
            template.render(&engine, &mut ctx).unwrap(),
            "one:1,INVALID/two:2,INVALID/"
        );
    }
}
