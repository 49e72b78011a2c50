//! Tree-walking renderer.
//!
//! Each tag module adds the `render_*` methods for its own nodes; this file
//! holds the dispatch and the pieces shared by all of them.

use std::sync::Arc;

use crate::context::Context;
use crate::engine::Engine;
use crate::error::Result;
use crate::filter_expr::{render_value_in_context, FilterExpression};
use crate::node::{BlockNode, Node, NodeList};
use crate::providers::Translator;
use crate::template::Template;
use crate::value::Value;

/// Renders compiled templates against a [`Context`].
pub struct Renderer<'e> {
    engine: &'e Engine,
}

impl<'e> Renderer<'e> {
    pub fn new(engine: &'e Engine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &'e Engine {
        self.engine
    }

    pub fn translator(&self) -> &'e dyn Translator {
        self.engine.translator()
    }

    /// The fallback rendered for variables that fail to resolve.
    pub fn invalid_string(&self) -> &'e str {
        &self.engine.settings().template_string_if_invalid
    }

    /// Render a whole template in a fresh render-context frame.
    pub fn render_template(&self, template: &Template, ctx: &mut Context) -> Result<String> {
        let depth = ctx.render_context.depth();
        ctx.render_context.push();
        let result = self.render_nodelist(template.nodelist(), ctx);
        ctx.render_context.pop();
        debug_assert_eq!(ctx.render_context.depth(), depth);
        result
    }

    pub fn render_nodelist(&self, nodelist: &NodeList, ctx: &mut Context) -> Result<String> {
        let mut output = String::new();
        for node in nodelist {
            output.push_str(&self.render_node(node, ctx)?);
        }
        Ok(output)
    }

    pub fn render_node(&self, node: &Node, ctx: &mut Context) -> Result<String> {
        match node {
            Node::Text(text) => Ok(text.clone()),
            Node::Variable(expr) => self.render_variable(expr, ctx),
            Node::If(n) => self.render_if(n, ctx),
            Node::IfEqual(n) => self.render_ifequal(n, ctx),
            Node::IfChanged(n) => self.render_ifchanged(n, ctx),
            Node::For(n) => self.render_for(n, ctx),
            Node::With(n) => self.render_with(n, ctx),
            Node::FirstOf(vars) => self.render_firstof(vars, ctx),
            Node::Cycle(n) => self.render_cycle(n, ctx),
            Node::Block(n) => self.render_block(n, ctx),
            Node::Extends(n) => self.render_extends(n, ctx),
            Node::Include(n) => self.render_include(n, ctx),
            Node::AutoEscape(n) => self.render_autoescape(n, ctx),
            Node::Filter(n) => self.render_filter(n, ctx),
            Node::Spaceless(nodelist) => self.render_spaceless(nodelist, ctx),
            Node::TemplateTag(text) => Ok((*text).to_string()),
            Node::WidthRatio(n) => self.render_widthratio(n, ctx),
            Node::Regroup(n) => self.render_regroup(n, ctx),
            Node::Url(n) => self.render_url(n, ctx),
            Node::Cache(n) => self.render_cache(n, ctx),
            Node::GetAvailableLanguages(variable) => {
                self.render_get_available_languages(variable, ctx)
            }
            Node::Trans(n) => self.render_trans(n, ctx),
            Node::BlockTrans(n) => self.render_blocktrans(n, ctx),
            Node::Comment | Node::Load => Ok(String::new()),
            Node::Custom(custom) => custom.render(ctx, self),
        }
    }

    fn render_variable(&self, expr: &FilterExpression, ctx: &mut Context) -> Result<String> {
        let value = expr.resolve(ctx, self, false)?;
        Ok(render_value_in_context(&value, ctx))
    }

    /// `block.super`: the next definition of the block up the chain,
    /// rendered safe, or nothing when no ancestor defines it.
    pub(crate) fn render_block_super(
        &self,
        block: &Arc<BlockNode>,
        ctx: &mut Context,
    ) -> Result<Value> {
        let pending = ctx
            .render_context
            .top()
            .block_context
            .as_ref()
            .is_some_and(|blocks| blocks.get_block(&block.name).is_some());
        if !pending {
            return Ok(Value::from(""));
        }
        Ok(Value::safe(self.render_block(block, ctx)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn render(source: &str, data: serde_json::Value) -> String {
        let engine = Engine::default();
        let template = engine.from_string(source).unwrap();
        let mut ctx = Context::from_json(data).unwrap();
        template.render(&engine, &mut ctx).unwrap()
    }

    #[test]
    fn test_plain_text_round_trips() {
        assert_eq!(render("something cool", json!({})), "something cool");
    }

    #[test]
    fn test_variables_are_escaped() {
        assert_eq!(
            render("{{ a }} {{ b.c }}", json!({"a": "<a>", "b": {"c": "x&y"}})),
            "&lt;a&gt; x&amp;y"
        );
    }

    #[test]
    fn test_render_frames_are_balanced() {
        let engine = Engine::default();
        let template = engine.from_string("{% for x in xs %}{{ x }}{% endfor %}").unwrap();
        let mut ctx = Context::from_json(json!({"xs": [1, 2]})).unwrap();
        let depth = ctx.render_context.depth();
        assert_eq!(template.render(&engine, &mut ctx).unwrap(), "12");
        assert_eq!(ctx.render_context.depth(), depth);
        assert_eq!(ctx.depth(), 1);
    }
}
