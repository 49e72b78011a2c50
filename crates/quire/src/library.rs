//! Tag and filter libraries.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use quire_syntax::Token;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::filter_expr::{render_value_in_context, FilterExpression};
use crate::node::{CustomNode, Node, NodeList};
use crate::parser::Parser;
use crate::render::Renderer;
use crate::value::Value;

/// Compiles one block tag into a node.
pub type TagCompiler = Arc<dyn Fn(&mut Parser<'_>, &Token) -> Result<Node> + Send + Sync>;

/// A filter body: the piped value, the supplied arguments, and the
/// context's autoescape flag when the filter asked for it.
pub type FilterFn = dyn Fn(&Value, &[Value], Option<bool>) -> Result<Value> + Send + Sync;

type SimpleTagFn =
    dyn Fn(&[Value], &IndexMap<String, Value>, Option<&Context>) -> Result<Value> + Send + Sync;

pub struct Filter {
    pub name: String,
    pub(crate) func: Box<FilterFn>,
    pub required: usize,
    pub optional: usize,
    pub is_safe: bool,
    pub needs_autoescape: bool,
    /// Declared for catalog compatibility only. Values carry no datetimes,
    /// so a filter with this flag receives the piped value unconverted.
    pub expects_localtime: bool,
}

impl Filter {
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&Value, &[Value], Option<bool>) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Box::new(func),
            required: 0,
            optional: 0,
            is_safe: false,
            needs_autoescape: false,
            expects_localtime: false,
        }
    }

    /// Declare how many arguments the filter takes after the piped value.
    pub fn args(mut self, required: usize, optional: usize) -> Self {
        self.required = required;
        self.optional = optional;
        self
    }

    pub fn safe(mut self) -> Self {
        self.is_safe = true;
        self
    }

    pub fn needs_autoescape(mut self) -> Self {
        self.needs_autoescape = true;
        self
    }

    pub fn expects_localtime(mut self) -> Self {
        self.expects_localtime = true;
        self
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("name", &self.name)
            .field("required", &self.required)
            .field("optional", &self.optional)
            .field("is_safe", &self.is_safe)
            .field("needs_autoescape", &self.needs_autoescape)
            .field("expects_localtime", &self.expects_localtime)
            .finish_non_exhaustive()
    }
}

/// A named bundle of tags and filters.
#[derive(Clone, Default)]
pub struct Library {
    pub(crate) tags: HashMap<String, TagCompiler>,
    pub(crate) filters: HashMap<String, Arc<Filter>>,
}

impl fmt::Debug for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<&String> = self.tags.keys().collect();
        tags.sort();
        let mut filters: Vec<&String> = self.filters.keys().collect();
        filters.sort();
        f.debug_struct("Library")
            .field("tags", &tags)
            .field("filters", &filters)
            .finish()
    }
}

impl Library {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag(
        &mut self,
        name: impl Into<String>,
        compiler: impl Fn(&mut Parser<'_>, &Token) -> Result<Node> + Send + Sync + 'static,
    ) -> &mut Self {
        self.tags.insert(name.into(), Arc::new(compiler));
        self
    }

    pub fn filter(&mut self, filter: Filter) -> &mut Self {
        self.filters.insert(filter.name.clone(), Arc::new(filter));
        self
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.tags.contains_key(name)
    }

    pub fn has_filter(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    /// Register a tag that resolves its arguments and renders whatever
    /// `func` returns.
    ///
    /// `params` names the positional parameters; the last `defaults` of them
    /// are optional. Arguments may also be passed as `param=value`. With
    /// `takes_context` the function also receives the render context.
    pub fn simple_tag(
        &mut self,
        name: &str,
        params: &[&str],
        defaults: usize,
        takes_context: bool,
        func: impl Fn(&[Value], &IndexMap<String, Value>, Option<&Context>) -> Result<Value>
            + Send
            + Sync
            + 'static,
    ) -> &mut Self {
        let tag_name = name.to_string();
        let params: Vec<String> = params.iter().map(|p| p.to_string()).collect();
        let func: Arc<SimpleTagFn> = Arc::new(func);
        self.tag(name, move |parser, token| {
            let bits = token.split_contents().into_iter().skip(1).collect::<Vec<_>>();
            let (args, kwargs) = parser.parse_bits(&bits, &params, defaults, &tag_name)?;
            Ok(Node::Custom(Arc::new(SimpleTagNode {
                func: Arc::clone(&func),
                takes_context,
                args,
                kwargs,
            })))
        })
    }
}

struct SimpleTagNode {
    func: Arc<SimpleTagFn>,
    takes_context: bool,
    args: Vec<FilterExpression>,
    kwargs: IndexMap<String, FilterExpression>,
}

impl fmt::Debug for SimpleTagNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleTagNode")
            .field("takes_context", &self.takes_context)
            .field("args", &self.args)
            .field("kwargs", &self.kwargs)
            .finish_non_exhaustive()
    }
}

impl CustomNode for SimpleTagNode {
    fn render(&self, ctx: &mut Context, renderer: &Renderer<'_>) -> Result<String> {
        let mut args = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            args.push(arg.resolve(ctx, renderer, false)?);
        }
        let mut kwargs = IndexMap::with_capacity(self.kwargs.len());
        for (key, arg) in &self.kwargs {
            kwargs.insert(key.clone(), arg.resolve(ctx, renderer, false)?);
        }
        let context = self.takes_context.then_some(&*ctx);
        let value = (self.func)(&args, &kwargs, context)?;
        Ok(render_value_in_context(&value, ctx))
    }
}

// ============================================================================
// Registry
// ============================================================================

/// The libraries a parser can draw on: builtins merged into every parser,
/// plus named libraries available to `{% load %}`.
#[derive(Debug, Clone)]
pub struct Libraries {
    builtins: Vec<Library>,
    named: HashMap<String, Library>,
}

impl Default for Libraries {
    fn default() -> Self {
        let mut named = HashMap::new();
        named.insert("cache".to_string(), crate::tags::cache::library());
        named.insert("i18n".to_string(), crate::tags::i18n::library());
        named.insert("future".to_string(), crate::tags::future::library());
        Self {
            builtins: vec![crate::tags::builtins(), crate::filters::builtins()],
            named,
        }
    }
}

impl Libraries {
    pub fn builtins(&self) -> &[Library] {
        &self.builtins
    }

    pub fn add_builtin(&mut self, library: Library) {
        self.builtins.push(library);
    }

    pub fn insert(&mut self, name: impl Into<String>, library: Library) {
        self.named.insert(name.into(), library);
    }

    pub fn get(&self, name: &str) -> Result<&Library> {
        self.named.get(name).ok_or_else(|| {
            Error::syntax(format!(
                "'{name}' is not a valid tag library: Template library {name} not found"
            ))
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub mod helpers {
    use super::*;

    type ConditionFn = dyn Fn(&[Value]) -> bool + Send + Sync;

    /// Register `{% name args... %}...{% else %}...{% endname %}`, rendering
    /// the first branch when `condition` accepts the resolved arguments.
    pub fn naive_if_tag(
        lib: &mut Library,
        name: &str,
        condition: impl Fn(&[Value]) -> bool + Send + Sync + 'static,
    ) {
        let end_tag = format!("end{name}");
        let condition: Arc<ConditionFn> = Arc::new(condition);
        lib.tag(name, move |parser, token| {
            let bits: Vec<&str> = token.contents.split_whitespace().collect();
            let nodelist_true = parser.parse(&["else", end_tag.as_str()])?;
            let nodelist_false = if parser.next_token()?.contents == "else" {
                let nodelist = parser.parse(&[end_tag.as_str()])?;
                parser.delete_first_token();
                nodelist
            } else {
                NodeList::new()
            };
            let mut values = Vec::new();
            for bit in bits.iter().skip(1) {
                values.push(parser.compile_filter(bit)?);
            }
            Ok(Node::Custom(Arc::new(NaiveIfNode {
                nodelist_true,
                nodelist_false,
                values,
                condition: Arc::clone(&condition),
            })))
        });
    }

    struct NaiveIfNode {
        nodelist_true: NodeList,
        nodelist_false: NodeList,
        values: Vec<FilterExpression>,
        condition: Arc<ConditionFn>,
    }

    impl fmt::Debug for NaiveIfNode {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("NaiveIfNode")
                .field("values", &self.values)
                .finish_non_exhaustive()
        }
    }

    impl CustomNode for NaiveIfNode {
        fn render(&self, ctx: &mut Context, renderer: &Renderer<'_>) -> Result<String> {
            let mut values = Vec::with_capacity(self.values.len());
            for value in &self.values {
                values.push(value.resolve(ctx, renderer, true)?);
            }
            if (self.condition)(&values) {
                renderer.render_nodelist(&self.nodelist_true, ctx)
            } else {
                renderer.render_nodelist(&self.nodelist_false, ctx)
            }
        }

        fn child_nodelists(&self) -> Vec<&NodeList> {
            vec![&self.nodelist_true, &self.nodelist_false]
        }
    }
}
