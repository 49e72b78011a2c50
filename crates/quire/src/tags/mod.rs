//! Builtin block tags and the loadable tag libraries.

pub mod cache;
pub mod flow;
pub mod future;
pub mod i18n;
pub mod loader;
pub mod markup;

use quire_syntax::Token;

use crate::error::{Error, Result};
use crate::library::Library;
use crate::node::Node;
use crate::parser::Parser;

/// The tags every template can use without `{% load %}`.
pub fn builtins() -> Library {
    let mut lib = Library::new();
    lib.tag("autoescape", markup::do_autoescape)
        .tag("block", loader::do_block)
        .tag("comment", markup::do_comment)
        .tag("cycle", flow::do_cycle)
        .tag("extends", loader::do_extends)
        .tag("filter", markup::do_filter)
        .tag("firstof", flow::do_firstof)
        .tag("for", flow::do_for)
        .tag("if", flow::do_if)
        .tag("ifchanged", flow::do_ifchanged)
        .tag("ifequal", |parser, token| flow::do_ifequal(parser, token, false))
        .tag("ifnotequal", |parser, token| flow::do_ifequal(parser, token, true))
        .tag("include", loader::do_include)
        .tag("load", do_load)
        .tag("regroup", markup::do_regroup)
        .tag("spaceless", markup::do_spaceless)
        .tag("templatetag", markup::do_templatetag)
        .tag("url", |parser, token| markup::do_url(parser, token, true))
        .tag("widthratio", markup::do_widthratio)
        .tag("with", flow::do_with);
    lib
}

/// `{% load lib... %}` or `{% load name... from lib %}`.
fn do_load(parser: &mut Parser<'_>, token: &Token) -> Result<Node> {
    let bits: Vec<&str> = token.contents.split_whitespace().collect();
    let libraries = parser.engine().libraries();

    if bits.len() >= 4 && bits[bits.len() - 2] == "from" {
        let taglib = bits[bits.len() - 1];
        let lib = libraries.get(taglib)?;
        let mut picked = Library::new();
        for name in &bits[1..bits.len() - 2] {
            let tag = lib.tags.get(*name);
            let filter = lib.filters.get(*name);
            if tag.is_none() && filter.is_none() {
                return Err(Error::syntax(format!(
                    "'{name}' is not a valid tag or filter in tag library '{taglib}'"
                )));
            }
            if let Some(tag) = tag {
                picked.tags.insert(name.to_string(), tag.clone());
            }
            if let Some(filter) = filter {
                picked.filters.insert(name.to_string(), filter.clone());
            }
        }
        parser.add_library(&picked);
    } else {
        for taglib in &bits[1..] {
            parser.add_library(libraries.get(taglib)?);
        }
    }
    Ok(Node::Load)
}
