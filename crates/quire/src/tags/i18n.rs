//! The `i18n` library: `trans`, `blocktrans` and `get_available_languages`.
//!
//! All lookups go through the engine's [`Translator`](crate::providers::Translator).

use std::collections::HashMap;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;

use quire_syntax::{Token, TokenKind, TokenParser};

use crate::context::{Context, Frame};
use crate::error::{Error, Result};
use crate::filter_expr::{render_value_in_context, FilterExpression};
use crate::library::Library;
use crate::node::Node;
use crate::parser::Parser;
use crate::render::Renderer;
use crate::value::Value;
use crate::variable::Translation;

static SINGLE_QUOTED_WITH_FILTERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^'([^']+)'(\|.*)$").expect("quoted value pattern is valid")
});

#[derive(Debug)]
pub struct TransNode {
    pub filter_expression: FilterExpression,
    pub noop: bool,
    pub asvar: Option<String>,
    pub message_context: Option<FilterExpression>,
}

#[derive(Debug)]
pub struct BlockTransNode {
    pub extra_context: IndexMap<String, FilterExpression>,
    pub singular: Vec<Token>,
    pub plural: Vec<Token>,
    pub countervar: Option<String>,
    pub counter: Option<FilterExpression>,
    pub message_context: Option<FilterExpression>,
}

pub fn library() -> Library {
    let mut lib = Library::new();
    lib.tag("get_available_languages", do_get_available_languages)
        .tag("trans", do_trans)
        .tag("blocktrans", do_blocktrans);
    lib
}

// ============================================================================
// Compilers
// ============================================================================

fn do_get_available_languages(_parser: &mut Parser<'_>, token: &Token) -> Result<Node> {
    let args: Vec<&str> = token.contents.split_whitespace().collect();
    if args.len() != 3 || args[1] != "as" {
        let got: Vec<String> = args.iter().map(|a| format!("'{a}'")).collect();
        return Err(Error::syntax(format!(
            "'get_available_languages' requires 'as variable' (got [{}])",
            got.join(", ")
        )));
    }
    Ok(Node::GetAvailableLanguages(args[2].to_string()))
}

/// Rewrite a single-quoted message as a double-quoted one.
fn double_quote(value: String) -> String {
    if !value.starts_with('\'') {
        return value;
    }
    if let Some(caps) = SINGLE_QUOTED_WITH_FILTERS.captures(&value) {
        return format!("\"{}\"{}", caps[1].replace('"', "\\\""), &caps[2]);
    }
    if value.len() >= 2 && value.ends_with('\'') {
        return format!("\"{}\"", value[1..value.len() - 1].replace('"', "\\\""));
    }
    value
}

fn do_trans(parser: &mut Parser<'_>, token: &Token) -> Result<Node> {
    let mut bits = TokenParser::new(token.contents.as_str())?;
    let value = double_quote(bits.value()?);

    let mut noop = false;
    let mut asvar = None;
    let mut message_context = None;
    while bits.more() {
        match bits.tag()?.as_str() {
            "noop" => noop = true,
            "context" => message_context = Some(parser.compile_filter(&bits.value()?)?),
            "as" => asvar = Some(bits.tag()?),
            _ => {
                return Err(Error::syntax(
                    "Only options for 'trans' are 'noop', 'context \"xxx\"', and 'as VAR'.",
                ))
            }
        }
    }

    Ok(Node::Trans(TransNode {
        filter_expression: parser.compile_filter(&value)?,
        noop,
        asvar,
        message_context,
    }))
}

fn do_blocktrans(parser: &mut Parser<'_>, token: &Token) -> Result<Node> {
    let bits = token.split_contents();
    let tag = bits[0].as_str();

    let mut extra_context = IndexMap::new();
    let mut count = None;
    let mut message_context = None;
    let mut seen: Vec<String> = Vec::new();
    let mut remaining: Vec<String> = bits[1..].to_vec();
    while !remaining.is_empty() {
        let option = remaining.remove(0);
        if seen.contains(&option) {
            return Err(Error::syntax(format!(
                "The {option} option was specified more than once."
            )));
        }
        match option.as_str() {
            "with" => {
                extra_context = parser.token_kwargs(&mut remaining, true)?;
                if extra_context.is_empty() {
                    return Err(Error::syntax(format!(
                        "\"with\" in {tag} tag needs at least one keyword argument."
                    )));
                }
            }
            "count" => {
                let value = parser.token_kwargs(&mut remaining, true)?;
                if value.len() != 1 {
                    return Err(Error::syntax(format!(
                        "\"count\" in {tag} tag expected exactly one keyword argument."
                    )));
                }
                count = value.into_iter().next();
            }
            "context" => {
                let expected = || {
                    Error::syntax(format!(
                        "\"context\" in {tag} tag expected exactly one argument."
                    ))
                };
                if remaining.is_empty() {
                    return Err(expected());
                }
                let value = remaining.remove(0);
                message_context = Some(parser.compile_filter(&value).map_err(|_| expected())?);
            }
            _ => {
                return Err(Error::syntax(format!(
                    "Unknown argument for {tag} tag: {option}."
                )))
            }
        }
        seen.push(option);
    }

    let (singular, mut end) = body_tokens(parser)?;
    let mut plural = Vec::new();
    if count.is_some() {
        if end.contents.trim() != "plural" {
            return Err(Error::syntax(
                "'blocktrans' doesn't allow other block tags inside it",
            ));
        }
        (plural, end) = body_tokens(parser)?;
    }
    if end.contents.trim() != "endblocktrans" {
        return Err(Error::syntax(format!(
            "'blocktrans' doesn't allow other block tags (seen {}) inside it",
            end.contents
        )));
    }

    let (countervar, counter) = match count {
        Some((name, expr)) => (Some(name), Some(expr)),
        None => (None, None),
    };
    Ok(Node::BlockTrans(BlockTransNode {
        extra_context,
        singular,
        plural,
        countervar,
        counter,
        message_context,
    }))
}

/// Text and variable tokens up to the next block tag, which is returned
/// alongside them.
fn body_tokens(parser: &mut Parser<'_>) -> Result<(Vec<Token>, Token)> {
    let mut tokens = Vec::new();
    loop {
        let token = parser
            .next_token()
            .map_err(|_| parser.unclosed_block_tag(&["endblocktrans"]))?;
        match token.kind {
            TokenKind::Text | TokenKind::Variable => tokens.push(token),
            TokenKind::Comment => {}
            TokenKind::Block => return Ok((tokens, token)),
        }
    }
}

// ============================================================================
// Rendering
// ============================================================================

/// Join text and `%(name)s` placeholders, doubling every `%` that does not
/// open a placeholder.
fn render_token_list(tokens: &[Token]) -> (String, Vec<String>) {
    let mut message = String::new();
    let mut vars = Vec::new();
    for token in tokens {
        match token.kind {
            TokenKind::Text => {
                let mut chars = token.contents.chars().peekable();
                while let Some(c) = chars.next() {
                    message.push(c);
                    if c == '%' && chars.peek() != Some(&'(') {
                        message.push('%');
                    }
                }
            }
            TokenKind::Variable => {
                message.push_str(&format!("%({})s", token.contents));
                vars.push(token.contents.clone());
            }
            _ => {}
        }
    }
    (message, vars)
}

/// Substitute `%(name)s` from `data` and collapse `%%`, in one pass.
fn interpolate(message: &str, data: &HashMap<String, String>) -> String {
    let mut output = String::with_capacity(message.len());
    let mut rest = message;
    while let Some(pos) = rest.find('%') {
        output.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix("%%") {
            output.push('%');
            rest = after;
        } else if let Some((name, after)) = tail
            .strip_prefix("%(")
            .and_then(|t| t.split_once(")s"))
            .filter(|(name, _)| data.contains_key(*name))
        {
            output.push_str(&data[name]);
            rest = after;
        } else {
            output.push('%');
            rest = &tail[1..];
        }
    }
    output.push_str(rest);
    output
}

impl<'e> Renderer<'e> {
    pub(crate) fn render_get_available_languages(
        &self,
        variable: &str,
        ctx: &mut Context,
    ) -> Result<String> {
        let translator = self.translator();
        let languages = translator.get_languages().into_iter().map(|(code, name)| {
            Value::list([Value::from(code), Value::from(translator.ugettext(&name))])
        });
        ctx.set(variable, Value::list(languages));
        Ok(String::new())
    }

    pub(crate) fn render_trans(&self, node: &TransNode, ctx: &mut Context) -> Result<String> {
        let message_context = match &node.message_context {
            Some(expr) => Some(expr.resolve(ctx, self, false)?.to_string()),
            None => None,
        };
        let translation = if node.noop {
            Translation::Never
        } else {
            Translation::Always {
                context: message_context.as_deref(),
            }
        };
        let output = node
            .filter_expression
            .resolve_with(ctx, self, false, translation)?;
        let value = render_value_in_context(&output, ctx);
        match &node.asvar {
            Some(asvar) => {
                ctx.set(asvar.clone(), Value::safe(value));
                Ok(String::new())
            }
            None => Ok(value),
        }
    }

    pub(crate) fn render_blocktrans(
        &self,
        node: &BlockTransNode,
        ctx: &mut Context,
    ) -> Result<String> {
        let message_context = match &node.message_context {
            Some(expr) => Some(expr.resolve(ctx, self, false)?.to_string()),
            None => None,
        };
        let mut frame = Frame::with_capacity(node.extra_context.len());
        for (name, expr) in &node.extra_context {
            frame.insert(name.clone(), expr.resolve(ctx, self, false)?);
        }
        ctx.update(frame);
        let result = self.translate_block(node, message_context.as_deref(), ctx);
        ctx.pop()?;
        result
    }

    fn translate_block(
        &self,
        node: &BlockTransNode,
        message_context: Option<&str>,
        ctx: &mut Context,
    ) -> Result<String> {
        let translator = self.translator();
        let (singular, mut vars) = render_token_list(&node.singular);

        let message = match (&node.countervar, &node.counter) {
            (Some(countervar), Some(counter)) if !node.plural.is_empty() => {
                let count = counter.resolve(ctx, self, false)?;
                let n = count.as_i64().unwrap_or(0);
                ctx.set(countervar.clone(), count);
                let (plural, plural_vars) = render_token_list(&node.plural);
                vars.extend(plural_vars);
                match message_context {
                    Some(mc) => translator.npgettext(mc, &singular, &plural, n),
                    None => translator.ungettext(&singular, &plural, n),
                }
            }
            _ => match message_context {
                Some(mc) => translator.pgettext(mc, &singular),
                None => translator.ugettext(&singular),
            },
        };

        let data: HashMap<String, String> = vars
            .into_iter()
            .map(|var| {
                let value = ctx.get(&var).cloned().unwrap_or_else(|| Value::from(""));
                let rendered = render_value_in_context(&value, ctx);
                (var, rendered)
            })
            .collect();
        Ok(interpolate(&message, &data))
    }
}
