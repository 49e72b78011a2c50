//! Operator-precedence parser for `{% if %}` conditions.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::filter_expr::FilterExpression;
use crate::parser::Parser;
use crate::render::Renderer;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Or,
    And,
    Not,
    In,
    NotIn,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Op {
    fn from_word(word: &str) -> Option<Self> {
        Some(match word {
            "or" => Op::Or,
            "and" => Op::And,
            "not" => Op::Not,
            "in" => Op::In,
            "not in" => Op::NotIn,
            "=" | "==" => Op::Eq,
            "!=" => Op::Ne,
            ">" => Op::Gt,
            ">=" => Op::Ge,
            "<" => Op::Lt,
            "<=" => Op::Le,
            _ => return None,
        })
    }

    fn binding_power(self) -> u8 {
        match self {
            Op::Or => 6,
            Op::And => 7,
            Op::Not => 8,
            Op::In | Op::NotIn => 9,
            Op::Eq | Op::Ne | Op::Gt | Op::Ge | Op::Lt | Op::Le => 10,
        }
    }
}

/// A parsed condition. Literals resolve lazily, so `and`/`or` short-circuit.
#[derive(Debug)]
pub enum Condition {
    Literal(FilterExpression),
    Not(Box<Condition>),
    Binary {
        op: Op,
        left: Box<Condition>,
        right: Box<Condition>,
    },
}

impl Condition {
    pub fn parse(parser: &Parser<'_>, bits: &[String]) -> Result<Self> {
        let mut tokens = Vec::with_capacity(bits.len());
        let mut i = 0;
        while i < bits.len() {
            let word = if bits[i] == "not" && bits.get(i + 1).is_some_and(|b| b == "in") {
                i += 1;
                "not in"
            } else {
                bits[i].as_str()
            };
            tokens.push(match Op::from_word(word) {
                Some(op) => IfToken::Op(op, word.to_string()),
                None => IfToken::Literal(parser.compile_filter(word)?, word.to_string()),
            });
            i += 1;
        }
        tokens.reverse();
        let mut state = IfParser {
            current: tokens.pop().unwrap_or(IfToken::End),
            tokens,
        };
        let condition = state.expression(0)?;
        if !matches!(state.current, IfToken::End) {
            return Err(Error::syntax(format!(
                "Unused '{}' at end of if expression.",
                state.current.display()
            )));
        }
        Ok(condition)
    }

    /// Evaluate the condition. A failing operator evaluates to false.
    pub fn eval(&self, ctx: &mut Context, renderer: &Renderer<'_>) -> Result<Value> {
        match self {
            Condition::Literal(expr) => expr.resolve(ctx, renderer, true),
            Condition::Not(operand) => Ok(match operand.eval(ctx, renderer) {
                Ok(value) => Value::Bool(!value.is_truthy()),
                Err(_) => Value::Bool(false),
            }),
            Condition::Binary { op, left, right } => {
                Ok(Self::eval_binary(*op, left, right, ctx, renderer).unwrap_or(Value::Bool(false)))
            }
        }
    }

    fn eval_binary(
        op: Op,
        left: &Condition,
        right: &Condition,
        ctx: &mut Context,
        renderer: &Renderer<'_>,
    ) -> Option<Value> {
        let x = left.eval(ctx, renderer).ok()?;
        match op {
            Op::Or if x.is_truthy() => return Some(x),
            Op::And if !x.is_truthy() => return Some(x),
            _ => {}
        }
        let y = right.eval(ctx, renderer).ok()?;
        let result = match op {
            Op::Or | Op::And => return Some(y),
            Op::In => y.contains(&x)?,
            Op::NotIn => !y.contains(&x)?,
            Op::Eq => x == y,
            Op::Ne => x != y,
            Op::Gt => compare(&x, &y)?.is_gt(),
            Op::Ge => compare(&x, &y)?.is_ge(),
            Op::Lt => compare(&x, &y)?.is_lt(),
            Op::Le => compare(&x, &y)?.is_le(),
            Op::Not => return None,
        };
        Some(Value::Bool(result))
    }
}

fn compare(x: &Value, y: &Value) -> Option<std::cmp::Ordering> {
    x.partial_cmp(y)
}

enum IfToken {
    Op(Op, String),
    Literal(FilterExpression, String),
    End,
}

impl IfToken {
    fn lbp(&self) -> u8 {
        match self {
            IfToken::Op(op, _) => op.binding_power(),
            _ => 0,
        }
    }

    fn display(&self) -> &str {
        match self {
            IfToken::Op(_, word) | IfToken::Literal(_, word) => word,
            IfToken::End => "end",
        }
    }
}

struct IfParser {
    current: IfToken,
    tokens: Vec<IfToken>,
}

impl IfParser {
    fn advance(&mut self) -> IfToken {
        let next = self.tokens.pop().unwrap_or(IfToken::End);
        std::mem::replace(&mut self.current, next)
    }

    fn expression(&mut self, rbp: u8) -> Result<Condition> {
        let token = self.advance();
        let mut left = self.nud(token)?;
        while rbp < self.current.lbp() {
            let token = self.advance();
            left = self.led(token, left)?;
        }
        Ok(left)
    }

    fn nud(&mut self, token: IfToken) -> Result<Condition> {
        match token {
            IfToken::Literal(expr, _) => Ok(Condition::Literal(expr)),
            IfToken::Op(Op::Not, _) => {
                let operand = self.expression(Op::Not.binding_power())?;
                Ok(Condition::Not(Box::new(operand)))
            }
            IfToken::Op(_, word) => Err(Error::syntax(format!(
                "Not expecting '{word}' in this position in if tag."
            ))),
            IfToken::End => Err(Error::syntax("Unexpected end of expression in if tag.")),
        }
    }

    fn led(&mut self, token: IfToken, left: Condition) -> Result<Condition> {
        match token {
            IfToken::Op(Op::Not, word) => Err(Error::syntax(format!(
                "Not expecting '{word}' as infix operator in if tag."
            ))),
            IfToken::Op(op, _) => {
                let right = self.expression(op.binding_power())?;
                Ok(Condition::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
            other => Err(Error::syntax(format!(
                "Not expecting '{}' as infix operator in if tag.",
                other.display()
            ))),
        }
    }
}
