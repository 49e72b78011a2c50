//! Compiled templates.

use quire_syntax::Lexer;

use crate::context::Context;
use crate::engine::Engine;
use crate::error::Result;
use crate::loader::Origin;
use crate::node::NodeList;
use crate::parser::Parser;
use crate::render::Renderer;

const UNKNOWN_TEMPLATE: &str = "<Unknown Template>";

/// A parsed template, ready to render any number of times.
///
/// Rendering never mutates the template; all per-render state lives in
/// the [`Context`].
#[derive(Debug)]
pub struct Template {
    name: String,
    origin: Option<Origin>,
    nodelist: NodeList,
}

impl Template {
    pub(crate) fn compile(
        engine: &Engine,
        source: &str,
        name: Option<&str>,
        origin: Option<Origin>,
        chain: Vec<String>,
    ) -> Result<Self> {
        let debug = engine.settings().template_debug;
        let lexer = if debug {
            Lexer::debug(source)
        } else {
            Lexer::new(source)
        };
        let mut parser = Parser::new(engine, lexer.tokenize()).with_chain(chain);
        let nodelist = parser.parse(&[])?;
        let origin = match origin {
            Some(origin) => Some(origin),
            None if debug => Some(Origin::from_string()),
            None => None,
        };
        Ok(Self {
            name: name.unwrap_or(UNKNOWN_TEMPLATE).to_string(),
            origin,
            nodelist,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Where the source came from; recorded in debug mode.
    pub fn origin(&self) -> Option<&Origin> {
        self.origin.as_ref()
    }

    pub fn nodelist(&self) -> &NodeList {
        &self.nodelist
    }

    pub fn render(&self, engine: &Engine, ctx: &mut Context) -> Result<String> {
        Renderer::new(engine).render_template(self, ctx)
    }
}
