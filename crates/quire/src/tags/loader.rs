//! Template composition: `block`, `extends` and `include`.

use std::sync::Arc;

use indexmap::IndexMap;

use quire_syntax::Token;

use crate::context::{BlockContext, Context, Frame};
use crate::error::{Error, Result};
use crate::filter_expr::FilterExpression;
use crate::node::{BlockNode, Node, NodeList};
use crate::parser::Parser;
use crate::render::Renderer;
use crate::template::Template;
use crate::value::Value;

#[derive(Debug)]
pub enum ParentName {
    Constant(String),
    Expr(FilterExpression),
}

#[derive(Debug)]
pub struct ExtendsNode {
    pub parent_name: ParentName,
    pub nodelist: NodeList,
    pub blocks: Vec<Arc<BlockNode>>,
}

#[derive(Debug)]
pub enum IncludeTarget {
    /// Loaded while parsing; `None` when loading failed outside debug.
    Constant(Option<Arc<Template>>),
    Expr(FilterExpression),
}

#[derive(Debug)]
pub struct IncludeNode {
    pub target: IncludeTarget,
    pub extra_context: IndexMap<String, FilterExpression>,
    /// `only`: the included template sees nothing but `extra_context`.
    pub isolated: bool,
}

/// `'name'` or `"name"` with the quotes removed.
fn unquote(bit: &str) -> Option<&str> {
    let first = bit.chars().next()?;
    let quoted = bit.len() >= 2 && matches!(first, '"' | '\'') && bit.ends_with(first);
    quoted.then(|| &bit[1..bit.len() - 1])
}

// ============================================================================
// Compilers
// ============================================================================

pub(crate) fn do_block(parser: &mut Parser<'_>, token: &Token) -> Result<Node> {
    let bits: Vec<&str> = token.contents.split_whitespace().collect();
    if bits.len() != 2 {
        return Err(Error::syntax(format!(
            "'{}' tag takes only one argument",
            bits[0]
        )));
    }
    let name = bits[1].to_string();
    parser.load_block(bits[0], &name)?;

    let nodelist = parser.parse(&["endblock"])?;
    let endblock = parser.next_token()?;
    let named_end = format!("endblock {name}");
    let acceptable = ["endblock", named_end.as_str()];
    if !acceptable.contains(&endblock.contents.as_str()) {
        return Err(parser.invalid_block_tag(&endblock, "endblock", &acceptable));
    }
    Ok(Node::Block(Arc::new(BlockNode { name, nodelist })))
}

pub(crate) fn do_extends(parser: &mut Parser<'_>, token: &Token) -> Result<Node> {
    let bits = token.split_contents();
    if bits.len() != 2 {
        return Err(Error::syntax(format!("'{}' takes one argument", bits[0])));
    }
    let parent_name = match unquote(&bits[1]) {
        Some(name) => ParentName::Constant(name.to_string()),
        None => ParentName::Expr(parser.compile_filter(&bits[1])?),
    };
    let nodelist = parser.parse(&[])?;
    if nodelist.contains_extends() {
        return Err(Error::syntax(format!(
            "'{}' cannot appear more than once in the same template",
            bits[0]
        )));
    }
    let blocks = nodelist.blocks();
    Ok(Node::Extends(ExtendsNode {
        parent_name,
        nodelist,
        blocks,
    }))
}

pub(crate) fn do_include(parser: &mut Parser<'_>, token: &Token) -> Result<Node> {
    let bits = token.split_contents();
    if bits.len() < 2 {
        return Err(Error::syntax(format!(
            "'{}' tag takes at least one argument: the name of the template to be included.",
            bits[0]
        )));
    }

    let mut extra_context = IndexMap::new();
    let mut isolated = false;
    let mut seen: Vec<String> = Vec::new();
    let mut remaining: Vec<String> = bits[2..].to_vec();
    while !remaining.is_empty() {
        let option = remaining.remove(0);
        if seen.contains(&option) {
            return Err(Error::syntax(format!(
                "The '{option}' option was specified more than once."
            )));
        }
        match option.as_str() {
            "with" => {
                extra_context = parser.token_kwargs(&mut remaining, false)?;
                if extra_context.is_empty() {
                    return Err(Error::syntax(format!(
                        "\"with\" in '{}' tag needs at least one keyword argument.",
                        bits[0]
                    )));
                }
            }
            "only" => isolated = true,
            _ => {
                return Err(Error::syntax(format!(
                    "Unknown argument for '{}' tag: '{option}'.",
                    bits[0]
                )))
            }
        }
        seen.push(option);
    }

    let target = match unquote(&bits[1]) {
        Some(path) => match parser.load_template(path) {
            Ok(template) => IncludeTarget::Constant(Some(template)),
            Err(e) if parser.engine().settings().template_debug => return Err(e),
            Err(e) => {
                log::warn!("include of '{path}' failed to load: {e}");
                IncludeTarget::Constant(None)
            }
        },
        None => IncludeTarget::Expr(parser.compile_filter(&bits[1])?),
    };

    Ok(Node::Include(IncludeNode {
        target,
        extra_context,
        isolated,
    }))
}

// ============================================================================
// Rendering
// ============================================================================

impl<'e> Renderer<'e> {
    pub(crate) fn render_block(&self, node: &Arc<BlockNode>, ctx: &mut Context) -> Result<String> {
        ctx.push();
        let overridden = ctx
            .render_context
            .top()
            .block_context
            .as_mut()
            .map(|blocks| blocks.pop(&node.name));

        let result = match overridden {
            None => {
                ctx.set("block", Value::Block(Arc::clone(node)));
                self.render_nodelist(&node.nodelist, ctx)
            }
            Some(popped) => {
                let block = popped.clone().unwrap_or_else(|| Arc::clone(node));
                ctx.set("block", Value::Block(Arc::clone(&block)));
                let result = self.render_nodelist(&block.nodelist, ctx);
                if let Some(popped) = popped {
                    if let Some(blocks) = ctx.render_context.top().block_context.as_mut() {
                        blocks.push(&node.name, popped);
                    }
                }
                result
            }
        };
        ctx.pop()?;
        result
    }

    fn get_parent(&self, node: &ExtendsNode, ctx: &mut Context) -> Result<Arc<Template>> {
        let (parent, source) = match &node.parent_name {
            ParentName::Constant(name) => (Value::from(name.as_str()), None),
            ParentName::Expr(expr) => (expr.resolve(ctx, self, false)?, Some(expr.token())),
        };
        if !parent.is_truthy() {
            let mut message = format!("Invalid template name in 'extends' tag: {}.", parent.repr());
            if let Some(token) = source {
                message.push_str(&format!(" Got this from the '{token}' variable."));
            }
            return Err(Error::syntax(message));
        }
        if let Value::Template(template) = parent {
            return Ok(template);
        }

        let name = parent.to_string();
        let frame = ctx.render_context.top();
        if frame.extends_chain.contains(&name) {
            return Err(Error::syntax(format!("Circular extends detected: {name}")));
        }
        frame.extends_chain.push(name.clone());
        self.engine().get_template(&name)
    }

    pub(crate) fn render_extends(&self, node: &ExtendsNode, ctx: &mut Context) -> Result<String> {
        let parent = self.get_parent(node, ctx)?;
        let blocks = ctx
            .render_context
            .top()
            .block_context
            .get_or_insert_with(BlockContext::default);
        blocks.add_blocks(&node.blocks);
        // An intermediate parent contributes its blocks when its own
        // `extends` renders.
        if !matches!(parent.nodelist().first_nontext(), Some(Node::Extends(_))) {
            blocks.add_blocks(&parent.nodelist().blocks());
        }
        self.render_nodelist(parent.nodelist(), ctx)
    }

    pub(crate) fn render_include(&self, node: &IncludeNode, ctx: &mut Context) -> Result<String> {
        match &node.target {
            IncludeTarget::Constant(None) => Ok(String::new()),
            IncludeTarget::Constant(Some(template)) => self.render_included(node, template, ctx),
            IncludeTarget::Expr(expr) => {
                let result = self.resolve_included(expr, ctx).and_then(|template| {
                    self.render_included(node, &template, ctx)
                });
                match result {
                    Err(e) if !self.engine().settings().template_debug => {
                        log::warn!("include of '{}' rendered empty: {e}", expr.token());
                        Ok(String::new())
                    }
                    other => other,
                }
            }
        }
    }

    fn resolve_included(&self, expr: &FilterExpression, ctx: &mut Context) -> Result<Arc<Template>> {
        match expr.resolve(ctx, self, false)? {
            Value::Template(template) => Ok(template),
            name => self.engine().get_template(&name.to_string()),
        }
    }

    fn render_included(
        &self,
        node: &IncludeNode,
        template: &Template,
        ctx: &mut Context,
    ) -> Result<String> {
        let mut values = Frame::with_capacity(node.extra_context.len());
        for (name, expr) in &node.extra_context {
            values.insert(name.clone(), expr.resolve(ctx, self, false)?);
        }
        if node.isolated {
            let saved = ctx.swap_frames(vec![values]);
            let output = self.render_template(template, ctx);
            ctx.swap_frames(saved);
            return output;
        }
        ctx.update(values);
        let output = self.render_template(template, ctx);
        ctx.pop()?;
        output
    }
}
