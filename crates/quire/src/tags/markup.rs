//! Output shaping tags: `autoescape`, `filter`, `spaceless`, `templatetag`,
//! `widthratio`, `regroup`, `url` and `comment`.

use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;

use quire_syntax::{
    Token, BLOCK_TAG_END, BLOCK_TAG_START, COMMENT_TAG_END, COMMENT_TAG_START, SINGLE_BRACE_END,
    SINGLE_BRACE_START, VARIABLE_TAG_END, VARIABLE_TAG_START,
};

use crate::context::{Context, Frame};
use crate::error::{Error, Result};
use crate::filter_expr::FilterExpression;
use crate::html_escape;
use crate::node::{Node, NodeList};
use crate::parser::{Parser, KWARG_RE};
use crate::providers::no_reverse_match;
use crate::render::Renderer;
use crate::value::Value;

static BETWEEN_TAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">\s+<").expect("spaceless pattern is valid"));

const TEMPLATE_TAGS: [(&str, &str); 8] = [
    ("openblock", BLOCK_TAG_START),
    ("closeblock", BLOCK_TAG_END),
    ("openvariable", VARIABLE_TAG_START),
    ("closevariable", VARIABLE_TAG_END),
    ("openbrace", SINGLE_BRACE_START),
    ("closebrace", SINGLE_BRACE_END),
    ("opencomment", COMMENT_TAG_START),
    ("closecomment", COMMENT_TAG_END),
];

#[derive(Debug)]
pub struct AutoEscapeNode {
    pub setting: bool,
    pub nodelist: NodeList,
}

/// `{% filter %}`: the body is bound to `var` and piped through the chain.
#[derive(Debug)]
pub struct FilterNode {
    pub filter_expr: FilterExpression,
    pub nodelist: NodeList,
}

#[derive(Debug)]
pub struct WidthRatioNode {
    pub val_expr: FilterExpression,
    pub max_expr: FilterExpression,
    pub max_width: FilterExpression,
}

#[derive(Debug)]
pub struct RegroupNode {
    pub target: FilterExpression,
    /// `var_name.attr`, resolved with each item bound to `var_name`.
    pub expression: FilterExpression,
    pub var_name: String,
}

#[derive(Debug)]
pub enum ViewName {
    Literal(String),
    Expr(FilterExpression),
}

#[derive(Debug)]
pub struct UrlNode {
    pub view_name: ViewName,
    pub args: Vec<FilterExpression>,
    pub kwargs: IndexMap<String, FilterExpression>,
    pub asvar: Option<String>,
}

// ============================================================================
// Compilers
// ============================================================================

pub(crate) fn do_autoescape(parser: &mut Parser<'_>, token: &Token) -> Result<Node> {
    let bits: Vec<&str> = token.contents.split_whitespace().collect();
    if bits.len() != 2 {
        return Err(Error::syntax(
            "'autoescape' tag requires exactly one argument.",
        ));
    }
    let setting = match bits[1] {
        "on" => true,
        "off" => false,
        _ => {
            return Err(Error::syntax(
                "'autoescape' argument should be 'on' or 'off'",
            ))
        }
    };
    let nodelist = parser.parse(&["endautoescape"])?;
    parser.delete_first_token();
    Ok(Node::AutoEscape(AutoEscapeNode { setting, nodelist }))
}

pub(crate) fn do_comment(parser: &mut Parser<'_>, _token: &Token) -> Result<Node> {
    parser.skip_past("endcomment")?;
    Ok(Node::Comment)
}

pub(crate) fn do_filter(parser: &mut Parser<'_>, token: &Token) -> Result<Node> {
    let rest = token
        .contents
        .split_once(char::is_whitespace)
        .map_or("", |(_, rest)| rest.trim_start());
    let filter_expr = parser.compile_filter(&format!("var|{rest}"))?;
    if let Some(name) = filter_expr
        .filter_names()
        .find(|name| matches!(*name, "escape" | "safe"))
    {
        return Err(Error::syntax(format!(
            "\"filter {name}\" is not permitted.  Use the \"autoescape\" tag instead."
        )));
    }
    let nodelist = parser.parse(&["endfilter"])?;
    parser.delete_first_token();
    Ok(Node::Filter(FilterNode {
        filter_expr,
        nodelist,
    }))
}

pub(crate) fn do_spaceless(parser: &mut Parser<'_>, _token: &Token) -> Result<Node> {
    let nodelist = parser.parse(&["endspaceless"])?;
    parser.delete_first_token();
    Ok(Node::Spaceless(nodelist))
}

pub(crate) fn do_templatetag(_parser: &mut Parser<'_>, token: &Token) -> Result<Node> {
    let bits: Vec<&str> = token.contents.split_whitespace().collect();
    if bits.len() != 2 {
        return Err(Error::syntax("'templatetag' statement takes one argument"));
    }
    TEMPLATE_TAGS
        .iter()
        .find(|(name, _)| *name == bits[1])
        .map(|(_, text)| Node::TemplateTag(*text))
        .ok_or_else(|| {
            let names: Vec<String> = TEMPLATE_TAGS
                .iter()
                .map(|(name, _)| format!("'{name}'"))
                .collect();
            Error::syntax(format!(
                "Invalid templatetag argument: '{}'. Must be one of: [{}]",
                bits[1],
                names.join(", ")
            ))
        })
}

pub(crate) fn do_widthratio(parser: &mut Parser<'_>, token: &Token) -> Result<Node> {
    let bits: Vec<&str> = token.contents.split_whitespace().collect();
    if bits.len() != 4 {
        return Err(Error::syntax("widthratio takes three arguments"));
    }
    Ok(Node::WidthRatio(WidthRatioNode {
        val_expr: parser.compile_filter(bits[1])?,
        max_expr: parser.compile_filter(bits[2])?,
        max_width: parser.compile_filter(bits[3])?,
    }))
}

pub(crate) fn do_regroup(parser: &mut Parser<'_>, token: &Token) -> Result<Node> {
    let bits = token.split_contents();
    if bits.len() != 6 {
        return Err(Error::syntax("'regroup' tag takes five arguments"));
    }
    let target = parser.compile_filter(&bits[1])?;
    if bits[2] != "by" {
        return Err(Error::syntax(
            "second argument to 'regroup' tag must be 'by'",
        ));
    }
    if bits[4] != "as" {
        return Err(Error::syntax(
            "next-to-last argument to 'regroup' tag must be 'as'",
        ));
    }
    let var_name = bits[5].clone();
    let expression = parser.compile_filter(&format!("{var_name}.{}", bits[3]))?;
    Ok(Node::Regroup(RegroupNode {
        target,
        expression,
        var_name,
    }))
}

/// `{% url %}`. With `literal_view` the view name is taken as written,
/// otherwise it is a filter expression resolved at render time.
pub(crate) fn do_url(parser: &mut Parser<'_>, token: &Token, literal_view: bool) -> Result<Node> {
    let mut bits = token.split_contents();
    if bits.len() < 2 {
        return Err(Error::syntax(
            "'url' takes at least one argument (path to a view)",
        ));
    }
    let view_name = if literal_view {
        ViewName::Literal(bits[1].clone())
    } else {
        ViewName::Expr(parser.compile_filter(&bits[1])?)
    };

    let mut rest = bits.split_off(2);
    let mut asvar = None;
    if rest.len() >= 2 && rest[rest.len() - 2] == "as" {
        asvar = rest.pop();
        rest.pop();
    }

    let mut args = Vec::new();
    let mut kwargs = IndexMap::new();
    for bit in &rest {
        let caps = KWARG_RE
            .captures(bit)
            .ok_or_else(|| Error::syntax("Malformed arguments to url tag"))?;
        let value = caps.get(2).map_or("", |m| m.as_str());
        match caps.get(1) {
            Some(name) => {
                kwargs.insert(name.as_str().to_string(), parser.compile_filter(value)?);
            }
            None => args.push(parser.compile_filter(value)?),
        }
    }

    Ok(Node::Url(UrlNode {
        view_name,
        args,
        kwargs,
        asvar,
    }))
}

// ============================================================================
// Rendering
// ============================================================================

impl<'e> Renderer<'e> {
    pub(crate) fn render_autoescape(
        &self,
        node: &AutoEscapeNode,
        ctx: &mut Context,
    ) -> Result<String> {
        let old = ctx.autoescape;
        ctx.autoescape = node.setting;
        let output = self.render_nodelist(&node.nodelist, ctx);
        ctx.autoescape = old;
        output
    }

    pub(crate) fn render_filter(&self, node: &FilterNode, ctx: &mut Context) -> Result<String> {
        let output = self.render_nodelist(&node.nodelist, ctx)?;
        ctx.update(Frame::from([("var".to_string(), Value::safe(output))]));
        let filtered = node.filter_expr.resolve(ctx, self, false);
        ctx.pop()?;
        Ok(filtered?.to_string())
    }

    pub(crate) fn render_spaceless(&self, nodelist: &NodeList, ctx: &mut Context) -> Result<String> {
        let output = self.render_nodelist(nodelist, ctx)?;
        Ok(BETWEEN_TAGS.replace_all(output.trim(), "><").into_owned())
    }

    pub(crate) fn render_widthratio(
        &self,
        node: &WidthRatioNode,
        ctx: &mut Context,
    ) -> Result<String> {
        let (value, max_value, max_width) = match self.widthratio_operands(node, ctx) {
            Ok(values) => values,
            Err(e) if e.is_missing_variable() => return Ok(String::new()),
            Err(e) => return Err(e),
        };

        let Some(max_width) = max_width.as_f64() else {
            return Err(Error::syntax(
                "widthratio final argument must be an number",
            ));
        };
        let (Some(value), Some(max_value)) = (value.as_f64(), max_value.as_f64()) else {
            return Ok(String::new());
        };
        if max_value == 0.0 {
            return Ok("0".to_string());
        }
        let ratio = value / max_value * max_width.trunc();
        Ok((ratio.round() as i64).to_string())
    }

    fn widthratio_operands(
        &self,
        node: &WidthRatioNode,
        ctx: &mut Context,
    ) -> Result<(Value, Value, Value)> {
        Ok((
            node.val_expr.resolve(ctx, self, false)?,
            node.max_expr.resolve(ctx, self, false)?,
            node.max_width.resolve(ctx, self, false)?,
        ))
    }

    pub(crate) fn render_regroup(&self, node: &RegroupNode, ctx: &mut Context) -> Result<String> {
        let obj_list = node.target.resolve(ctx, self, true)?;
        if obj_list.is_none() {
            ctx.set(node.var_name.clone(), Value::list([]));
            return Ok(String::new());
        }

        let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();
        for item in obj_list.iterate().unwrap_or_default() {
            ctx.update(Frame::from([(node.var_name.clone(), item.clone())]));
            let grouper = node.expression.resolve(ctx, self, true);
            ctx.pop()?;
            let grouper = grouper?;
            match groups.iter_mut().find(|(seen, _)| *seen == grouper) {
                Some((_, list)) => list.push(item),
                None => groups.push((grouper, vec![item])),
            }
        }

        let grouped = groups
            .into_iter()
            .map(|(grouper, list)| Value::map([("grouper", grouper), ("list", Value::list(list))]));
        ctx.set(node.var_name.clone(), Value::list(grouped));
        Ok(String::new())
    }

    pub(crate) fn render_url(&self, node: &UrlNode, ctx: &mut Context) -> Result<String> {
        let mut args = Vec::with_capacity(node.args.len());
        for arg in &node.args {
            args.push(arg.resolve(ctx, self, false)?);
        }
        let mut kwargs = IndexMap::with_capacity(node.kwargs.len());
        for (key, arg) in &node.kwargs {
            kwargs.insert(key.clone(), arg.resolve(ctx, self, false)?);
        }
        let view_name = match &node.view_name {
            ViewName::Literal(name) => name.clone(),
            ViewName::Expr(expr) => expr.resolve(ctx, self, false)?.to_string(),
        };

        let reversed = match self.engine().url_resolver() {
            Some(resolver) => {
                resolver.reverse(&view_name, &args, &kwargs, ctx.current_app.as_deref())
            }
            None => Err(no_reverse_match(&view_name, &args, &kwargs)),
        };

        match (&node.asvar, reversed) {
            (Some(asvar), Ok(url)) => {
                ctx.set(asvar.clone(), url);
                Ok(String::new())
            }
            (Some(asvar), Err(Error::NoReverseMatch(reason))) => {
                log::debug!("url for '{view_name}' bound empty to {asvar}: {reason}");
                ctx.set(asvar.clone(), "");
                Ok(String::new())
            }
            (None, Ok(url)) if ctx.autoescape => Ok(html_escape::escape(&url)),
            (None, Ok(url)) => Ok(url),
            (_, Err(e)) => Err(e),
        }
    }
}
