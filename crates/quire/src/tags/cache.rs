//! The `cache` library: `{% cache expire name [vary_on...] %}` stores the
//! rendered body in the engine's [`CacheBackend`](crate::providers::CacheBackend).

use std::time::Duration;

use sha2::{Digest, Sha256};

use quire_syntax::Token;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::library::Library;
use crate::node::{Node, NodeList};
use crate::parser::Parser;
use crate::render::Renderer;
use crate::variable::{Lookup, Translation, Variable};

#[derive(Debug)]
pub struct CacheNode {
    pub nodelist: NodeList,
    pub expire_time: Variable,
    pub fragment_name: String,
    pub vary_on: Vec<Variable>,
}

pub fn library() -> Library {
    let mut lib = Library::new();
    lib.tag("cache", do_cache);
    lib
}

fn do_cache(parser: &mut Parser<'_>, token: &Token) -> Result<Node> {
    let nodelist = parser.parse(&["endcache"])?;
    parser.delete_first_token();
    let tokens: Vec<&str> = token.contents.split_whitespace().collect();
    if tokens.len() < 3 {
        return Err(Error::syntax(format!(
            "'{}' tag requires at least 2 arguments.",
            tokens[0]
        )));
    }
    Ok(Node::Cache(CacheNode {
        nodelist,
        expire_time: Variable::new(tokens[1])?,
        fragment_name: tokens[2].to_string(),
        vary_on: tokens[3..]
            .iter()
            .map(|t| Variable::new(t))
            .collect::<std::result::Result<Vec<_>, _>>()?,
    }))
}

/// `template.cache.<name>.<sha256 of the quoted vary-on values>`
fn cache_key(fragment_name: &str, vary_on: &[String]) -> String {
    let quoted: Vec<String> = vary_on
        .iter()
        .map(|value| url::form_urlencoded::byte_serialize(value.as_bytes()).collect())
        .collect();
    let digest = Sha256::digest(quoted.join(":").as_bytes());
    format!("template.cache.{fragment_name}.{}", hex::encode(digest))
}

impl<'e> Renderer<'e> {
    pub(crate) fn render_cache(&self, node: &CacheNode, ctx: &mut Context) -> Result<String> {
        let expire_time = match node.expire_time.resolve(ctx, self, Translation::AsParsed)? {
            Lookup::Found(value) => value,
            Lookup::Missing { .. } => {
                return Err(Error::syntax(format!(
                    "\"cache\" tag got an unknown variable: {}",
                    node.expire_time.var()
                )))
            }
        };
        let Some(seconds) = expire_time.as_i64() else {
            return Err(Error::syntax(format!(
                "\"cache\" tag got a non-integer timeout value: {expire_time}"
            )));
        };

        let mut vary_on = Vec::with_capacity(node.vary_on.len());
        for var in &node.vary_on {
            let value = var.resolve(ctx, self, Translation::AsParsed)?.into_result()?;
            vary_on.push(value.to_string());
        }
        let key = cache_key(&node.fragment_name, &vary_on);

        let cache = self.engine().cache();
        if let Some(hit) = cache.get(&key) {
            log::debug!("fragment cache hit: {key}");
            return Ok(hit);
        }
        log::debug!("fragment cache miss: {key}");
        let value = self.render_nodelist(&node.nodelist, ctx)?;
        let timeout = Duration::from_secs(u64::try_from(seconds).unwrap_or(0));
        cache.set(&key, value.clone(), Some(timeout));
        Ok(value)
    }
}
