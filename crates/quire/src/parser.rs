//! Recursive-descent parser from tokens to a node tree.
//!
//! Block tags are compiled by the functions registered in the parser's tag
//! table. A compiler consumes the tokens of its own body by calling back into
//! [`Parser::parse`] with the names of the tags that end it.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use indexmap::IndexMap;
use regex::Regex;

use quire_syntax::{Token, TokenKind};

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::filter_expr::FilterExpression;
use crate::library::{Filter, Library, TagCompiler};
use crate::node::{Node, NodeList};
use crate::tags::flow::CycleNode;
use crate::template::Template;

pub(crate) static KWARG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:(\w+)=)?(.+)").expect("kwarg pattern is valid"));

pub struct Parser<'e> {
    engine: &'e Engine,
    /// Remaining tokens, next one last.
    tokens: Vec<Token>,
    tags: HashMap<String, TagCompiler>,
    filters: HashMap<String, Arc<Filter>>,
    command_stack: Vec<(String, Token)>,
    named_cycles: HashMap<String, Arc<CycleNode>>,
    loaded_blocks: Vec<String>,
    /// Names of the templates whose compilation led here.
    chain: Vec<String>,
}

impl<'e> Parser<'e> {
    pub fn new(engine: &'e Engine, mut tokens: Vec<Token>) -> Self {
        tokens.reverse();
        let mut parser = Self {
            engine,
            tokens,
            tags: HashMap::new(),
            filters: HashMap::new(),
            command_stack: Vec::new(),
            named_cycles: HashMap::new(),
            loaded_blocks: Vec::new(),
            chain: Vec::new(),
        };
        for library in engine.libraries().builtins() {
            parser.add_library(library);
        }
        parser
    }

    pub(crate) fn with_chain(mut self, chain: Vec<String>) -> Self {
        self.chain = chain;
        self
    }

    pub fn engine(&self) -> &'e Engine {
        self.engine
    }

    fn debug(&self) -> bool {
        self.engine.settings().template_debug
    }

    /// Parse until one of the `parse_until` tags, which is left unconsumed.
    pub fn parse(&mut self, parse_until: &[&str]) -> Result<NodeList> {
        let mut nodelist = NodeList::new();
        while let Some(token) = self.tokens.pop() {
            match token.kind {
                TokenKind::Text => {
                    self.extend_nodelist(&mut nodelist, Node::Text(token.contents), "")?;
                }
                TokenKind::Variable => {
                    if token.contents.is_empty() {
                        return Err(self.error(&token, "Empty variable tag"));
                    }
                    let expr = self
                        .compile_filter(&token.contents)
                        .map_err(|e| self.locate(e, &token))?;
                    self.extend_nodelist(&mut nodelist, Node::Variable(expr), "")?;
                }
                TokenKind::Block => {
                    let Some(command) = token.contents.split_whitespace().next() else {
                        return Err(self.error(&token, "Empty block tag"));
                    };
                    let command = command.to_string();
                    if parse_until.contains(&command.as_str()) {
                        self.prepend_token(token);
                        return Ok(nodelist);
                    }
                    let Some(compile) = self.tags.get(&command).cloned() else {
                        return Err(self.invalid_block_tag(&token, &command, parse_until));
                    };
                    log::trace!("compiling '{command}' tag at line {}", token.line);
                    self.enter_command(&command, &token);
                    let node = compile(self, &token).map_err(|e| self.locate(e, &token))?;
                    self.extend_nodelist(&mut nodelist, node, &command)
                        .map_err(|e| self.locate(e, &token))?;
                    self.exit_command();
                }
                TokenKind::Comment => {}
            }
        }
        if !parse_until.is_empty() {
            return Err(self.unclosed_block_tag(parse_until));
        }
        Ok(nodelist)
    }

    /// Discard tokens up to and including the `endtag` block tag.
    pub fn skip_past(&mut self, endtag: &str) -> Result<()> {
        while let Some(token) = self.tokens.pop() {
            if token.kind == TokenKind::Block && token.contents == endtag {
                return Ok(());
            }
        }
        Err(self.unclosed_block_tag(&[endtag]))
    }

    pub fn next_token(&mut self) -> Result<Token> {
        self.tokens
            .pop()
            .ok_or_else(|| Error::syntax("Unexpected end of template"))
    }

    pub fn prepend_token(&mut self, token: Token) {
        self.tokens.push(token);
    }

    pub fn delete_first_token(&mut self) {
        self.tokens.pop();
    }

    pub fn enter_command(&mut self, command: &str, token: &Token) {
        self.command_stack.push((command.to_string(), token.clone()));
    }

    pub fn exit_command(&mut self) {
        self.command_stack.pop();
    }

    pub fn add_library(&mut self, library: &Library) {
        for (name, compiler) in &library.tags {
            self.tags.insert(name.clone(), Arc::clone(compiler));
        }
        for (name, filter) in &library.filters {
            self.filters.insert(name.clone(), Arc::clone(filter));
        }
    }

    pub fn compile_filter(&self, token: &str) -> Result<FilterExpression> {
        FilterExpression::new(token, self)
    }

    pub fn find_filter(&self, name: &str) -> Result<Arc<Filter>> {
        self.filters
            .get(name)
            .cloned()
            .ok_or_else(|| Error::syntax(format!("Invalid filter: '{name}'")))
    }

    /// Consume leading `key=value` arguments from `bits`, or with `legacy`
    /// also `value as key [and value as key ...]`.
    ///
    /// Stops at the first bit that does not fit, leaving it in `bits`.
    pub fn token_kwargs(
        &self,
        bits: &mut Vec<String>,
        legacy: bool,
    ) -> Result<IndexMap<String, FilterExpression>> {
        let mut kwargs = IndexMap::new();
        let Some(first) = bits.first() else {
            return Ok(kwargs);
        };
        let kwarg_format = KWARG_RE
            .captures(first)
            .is_some_and(|caps| caps.get(1).is_some());
        if !kwarg_format && !(legacy && is_legacy_kwarg(bits)) {
            return Ok(kwargs);
        }

        while !bits.is_empty() {
            let (key, value) = if kwarg_format {
                let Some(caps) = KWARG_RE.captures(&bits[0]) else {
                    return Ok(kwargs);
                };
                let (Some(key), Some(value)) = (caps.get(1), caps.get(2)) else {
                    return Ok(kwargs);
                };
                let pair = (key.as_str().to_string(), value.as_str().to_string());
                bits.remove(0);
                pair
            } else {
                if !is_legacy_kwarg(bits) {
                    return Ok(kwargs);
                }
                let pair = (bits[2].clone(), bits[0].clone());
                bits.drain(..3);
                pair
            };
            kwargs.insert(key, self.compile_filter(&value)?);
            if !kwarg_format && !bits.is_empty() {
                if bits[0] != "and" {
                    return Ok(kwargs);
                }
                bits.remove(0);
            }
        }
        Ok(kwargs)
    }

    /// Bind tag arguments to named parameters, the last `defaults` of which
    /// are optional.
    pub fn parse_bits(
        &self,
        bits: &[String],
        params: &[String],
        defaults: usize,
        name: &str,
    ) -> Result<(Vec<FilterExpression>, IndexMap<String, FilterExpression>)> {
        let mut args = Vec::new();
        let mut kwargs: IndexMap<String, FilterExpression> = IndexMap::new();
        let mut unhandled: Vec<&String> = params.iter().collect();

        for bit in bits {
            let mut single = vec![bit.clone()];
            let kwarg = self.token_kwargs(&mut single, false)?;
            if let Some((param, value)) = kwarg.into_iter().next() {
                if !params.contains(&param) {
                    return Err(Error::syntax(format!(
                        "'{name}' received unexpected keyword argument '{param}'"
                    )));
                }
                if kwargs.contains_key(&param) {
                    return Err(Error::syntax(format!(
                        "'{name}' received multiple values for keyword argument '{param}'"
                    )));
                }
                unhandled.retain(|p| **p != param);
                kwargs.insert(param, value);
            } else if !kwargs.is_empty() {
                return Err(Error::syntax(format!(
                    "'{name}' received some positional argument(s) after some keyword argument(s)"
                )));
            } else {
                args.push(self.compile_filter(bit)?);
                if unhandled.is_empty() {
                    return Err(Error::syntax(format!(
                        "'{name}' received too many positional arguments"
                    )));
                }
                unhandled.remove(0);
            }
        }

        let optional_from = params.len().saturating_sub(defaults);
        unhandled.retain(|p| {
            params
                .iter()
                .position(|candidate| candidate == *p)
                .is_some_and(|index| index < optional_from)
        });
        if !unhandled.is_empty() {
            let missing: Vec<String> = unhandled.iter().map(|p| format!("'{p}'")).collect();
            return Err(Error::syntax(format!(
                "'{name}' did not receive value(s) for the argument(s): {}",
                missing.join(", ")
            )));
        }
        Ok((args, kwargs))
    }

    /// Load a template while compiling this one, refusing cycles.
    pub(crate) fn load_template(&self, name: &str) -> Result<Arc<Template>> {
        self.engine.get_template_nested(name, &self.chain)
    }

    pub(crate) fn named_cycle(&self, name: &str) -> Result<Arc<CycleNode>> {
        if self.named_cycles.is_empty() {
            return Err(Error::syntax(format!(
                "No named cycles in template. '{name}' is not defined"
            )));
        }
        self.named_cycles
            .get(name)
            .cloned()
            .ok_or_else(|| Error::syntax(format!("Named cycle '{name}' does not exist")))
    }

    pub(crate) fn register_cycle(&mut self, name: &str, node: Arc<CycleNode>) {
        self.named_cycles.insert(name.to_string(), node);
    }

    /// Record a block name, rejecting duplicates within one template.
    pub(crate) fn load_block(&mut self, tag: &str, name: &str) -> Result<()> {
        if self.loaded_blocks.iter().any(|b| b == name) {
            return Err(Error::syntax(format!(
                "'{tag}' tag with name '{name}' appears more than once"
            )));
        }
        self.loaded_blocks.push(name.to_string());
        Ok(())
    }

    pub(crate) fn invalid_block_tag(
        &self,
        token: &Token,
        command: &str,
        parse_until: &[&str],
    ) -> Error {
        if parse_until.is_empty() {
            return self.error(token, format!("Invalid block tag: '{command}'"));
        }
        let expected: Vec<String> = parse_until.iter().map(|p| format!("'{p}'")).collect();
        self.error(
            token,
            format!(
                "Invalid block tag: '{command}', expected {}",
                text_list(&expected, "or")
            ),
        )
    }

    pub(crate) fn unclosed_block_tag(&self, parse_until: &[&str]) -> Error {
        let expected = parse_until.join(", ");
        match self.command_stack.last() {
            Some((command, token)) if self.debug() => self.error(
                token,
                format!("Unclosed tag '{command}'. Looking for one of: {expected} "),
            ),
            _ => Error::syntax(format!("Unclosed tags: {expected} ")),
        }
    }

    fn extend_nodelist(&self, nodelist: &mut NodeList, node: Node, command: &str) -> Result<()> {
        if node.must_be_first() && nodelist.contains_nontext() {
            return Err(Error::syntax(format!(
                "'{command}' must be the first tag in the template."
            )));
        }
        nodelist.push(node);
        Ok(())
    }

    fn error(&self, token: &Token, message: impl Into<String>) -> Error {
        self.locate(Error::syntax(message), token)
    }

    /// Attach the token's location to syntax errors in debug mode.
    fn locate(&self, error: Error, token: &Token) -> Error {
        if self.debug() {
            error.located(token.location())
        } else {
            error
        }
    }
}

fn is_legacy_kwarg(bits: &[String]) -> bool {
    bits.len() >= 3 && bits[1] == "as"
}

/// `'a', 'b' or 'c'`
fn text_list(items: &[String], last_word: &str) -> String {
    match items {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} {last_word} {last}", init.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use pretty_assertions::assert_eq;
    use quire_syntax::tokenize;

    fn parse(engine: &Engine, source: &str) -> Result<NodeList> {
        Parser::new(engine, tokenize(source)).parse(&[])
    }

    fn message(result: Result<NodeList>) -> String {
        match result {
            Err(Error::Syntax(e)) => e.message,
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    fn bits(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_text_and_variables() {
        let engine = Engine::default();
        let nodelist = parse(&engine, "a{{ b }}c{# note #}").unwrap();
        assert_eq!(nodelist.len(), 3);
        assert!(nodelist.contains_nontext());
    }

    #[test]
    fn test_empty_tags() {
        let engine = Engine::default();
        assert_eq!(message(parse(&engine, "{{ }}")), "Empty variable tag");
        assert_eq!(message(parse(&engine, "{% %}")), "Empty block tag");
    }

    #[test]
    fn test_invalid_block_tag() {
        let engine = Engine::default();
        assert_eq!(
            message(parse(&engine, "{% nope %}")),
            "Invalid block tag: 'nope'"
        );
        assert_eq!(
            message(parse(&engine, "{% if a %}{% nope %}{% endif %}")),
            "Invalid block tag: 'nope', expected 'elif', 'else' or 'endif'"
        );
    }

    #[test]
    fn test_unclosed_tags() {
        let engine = Engine::default();
        assert_eq!(
            message(parse(&engine, "{% if a %}x")),
            "Unclosed tags: elif, else, endif "
        );
    }

    #[test]
    fn test_unclosed_tag_in_debug_names_the_command() {
        let settings = Settings {
            template_debug: true,
            ..Settings::default()
        };
        let engine = Engine::new(settings);
        let err = parse(&engine, "line\n{% for x in y %}x").unwrap_err();
        let Error::Syntax(err) = err else {
            panic!("expected syntax error")
        };
        assert_eq!(
            err.message,
            "Unclosed tag 'for'. Looking for one of: empty, endfor "
        );
        assert_eq!(err.location.map(|l| l.line), Some(2));
    }

    #[test]
    fn test_extends_must_be_first() {
        let engine = Engine::default();
        assert_eq!(
            message(parse(&engine, "{{ x }}{% extends 'base' %}")),
            "'extends' must be the first tag in the template."
        );
    }

    #[test]
    fn test_token_kwargs_new_style() {
        let engine = Engine::default();
        let parser = Parser::new(&engine, Vec::new());
        let mut rest = bits(&["a=1", "b=c|upper", "only"]);
        let kwargs = parser.token_kwargs(&mut rest, false).unwrap();
        assert_eq!(kwargs.keys().collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(rest, ["only"]);
    }

    #[test]
    fn test_token_kwargs_legacy() {
        let engine = Engine::default();
        let parser = Parser::new(&engine, Vec::new());
        let mut rest = bits(&["x", "as", "a", "and", "y", "as", "b", "tail"]);
        let kwargs = parser.token_kwargs(&mut rest, true).unwrap();
        assert_eq!(kwargs.keys().collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(rest, ["tail"]);

        let mut rest = bits(&["x", "as", "a"]);
        assert!(parser.token_kwargs(&mut rest, false).unwrap().is_empty());
        assert_eq!(rest.len(), 3);
    }

    #[test]
    fn test_parse_bits_errors() {
        let engine = Engine::default();
        let parser = Parser::new(&engine, Vec::new());
        let params = bits(&["a", "b"]);

        let err = parser
            .parse_bits(&bits(&["1", "2", "3"]), &params, 0, "tag")
            .unwrap_err();
        assert_eq!(err.to_string(), "'tag' received too many positional arguments");

        let err = parser
            .parse_bits(&bits(&["1"]), &params, 0, "tag")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "'tag' did not receive value(s) for the argument(s): 'b'"
        );

        assert!(parser.parse_bits(&bits(&["1"]), &params, 1, "tag").is_ok());

        let err = parser
            .parse_bits(&bits(&["b=1", "2"]), &params, 0, "tag")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "'tag' received some positional argument(s) after some keyword argument(s)"
        );

        let err = parser
            .parse_bits(&bits(&["c=1"]), &params, 0, "tag")
            .unwrap_err();
        assert_eq!(err.to_string(), "'tag' received unexpected keyword argument 'c'");
    }

    #[test]
    fn test_text_list() {
        let items = bits(&["'a'", "'b'", "'c'"]);
        assert_eq!(text_list(&items, "or"), "'a', 'b' or 'c'");
        assert_eq!(text_list(&items[..1], "or"), "'a'");
    }
}
