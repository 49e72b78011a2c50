//! Runtime values seen by templates.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::error::{CallError, TemplateFailure};
use crate::node::BlockNode;
use crate::template::Template;

/// How a string value is treated by the output escaper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Safety {
    /// Escaped only when autoescaping is on.
    #[default]
    Plain,
    /// Never escaped.
    Safe,
    /// Always escaped, whatever the autoescape setting.
    NeedsEscape,
}

/// A host object exposed to templates.
///
/// Every method has a default that reports "not supported", so an
/// implementation only spells out what it actually offers.
pub trait Object: Send + Sync + fmt::Debug {
    /// Keyed access (`obj.key` tried as a subscript first).
    fn get_item(&self, _key: &str) -> Result<Option<Value>, Box<dyn TemplateFailure>> {
        Ok(None)
    }

    /// Attribute or method access. Methods are returned as
    /// [`Value::Callable`] and invoked by the resolver.
    fn get_attr(&self, _name: &str) -> Result<Option<Value>, Box<dyn TemplateFailure>> {
        Ok(None)
    }

    fn get_index(&self, _index: i64) -> Option<Value> {
        None
    }

    /// The items a `for` loop walks, if the object is iterable.
    fn iterate(&self) -> Option<Vec<Value>> {
        None
    }

    fn is_truthy(&self) -> bool {
        true
    }

    fn display(&self) -> String {
        format!("{self:?}")
    }
}

/// A value the resolver invokes with no arguments when it is looked up.
pub trait Callable: Send + Sync + fmt::Debug {
    fn call(&self) -> Result<Value, CallError>;

    /// Side-effecting callables are never invoked from a template.
    fn alters_data(&self) -> bool {
        false
    }

    /// Keep the callable itself instead of calling it.
    fn do_not_call_in_templates(&self) -> bool {
        false
    }
}

type CallFn = dyn Fn() -> Result<Value, CallError> + Send + Sync;

/// A closure-backed [`Callable`].
pub struct Function {
    func: Box<CallFn>,
    alters_data: bool,
    do_not_call: bool,
}

impl Function {
    pub fn new(func: impl Fn() -> Result<Value, CallError> + Send + Sync + 'static) -> Self {
        Self {
            func: Box::new(func),
            alters_data: false,
            do_not_call: false,
        }
    }

    pub fn alters_data(mut self) -> Self {
        self.alters_data = true;
        self
    }

    pub fn do_not_call_in_templates(mut self) -> Self {
        self.do_not_call = true;
        self
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("alters_data", &self.alters_data)
            .field("do_not_call", &self.do_not_call)
            .finish_non_exhaustive()
    }
}

impl Callable for Function {
    fn call(&self) -> Result<Value, CallError> {
        (self.func)()
    }

    fn alters_data(&self) -> bool {
        self.alters_data
    }

    fn do_not_call_in_templates(&self) -> bool {
        self.do_not_call
    }
}

/// Runtime value type for quire templates
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String, Safety),
    List(Arc<Vec<Value>>),
    Map(Arc<IndexMap<String, Value>>),
    Object(Arc<dyn Object>),
    Callable(Arc<dyn Callable>),
    /// A compiled template, usable as an `extends` or `include` target.
    Template(Arc<Template>),
    /// The `block` variable inside a block body.
    Block(Arc<BlockNode>),
}

impl Value {
    /// Convert a JSON value to a quire Value
    pub fn from_json(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => Value::None,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => Value::String(s, Safety::Plain),
            JsonValue::Array(items) => {
                Value::List(Arc::new(items.into_iter().map(Value::from_json).collect()))
            }
            JsonValue::Object(obj) => Value::Map(Arc::new(
                obj.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            )),
        }
    }

    pub fn safe(s: impl Into<String>) -> Self {
        Value::String(s.into(), Safety::Safe)
    }

    pub fn object(obj: impl Object + 'static) -> Self {
        Value::Object(Arc::new(obj))
    }

    pub fn callable(callable: impl Callable + 'static) -> Self {
        Value::Callable(Arc::new(callable))
    }

    pub fn function(func: impl Fn() -> Result<Value, CallError> + Send + Sync + 'static) -> Self {
        Value::callable(Function::new(func))
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(Arc::new(items.into_iter().collect()))
    }

    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Map(Arc::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    pub fn safety(&self) -> Safety {
        match self {
            Value::String(_, safety) => *safety,
            _ => Safety::Plain,
        }
    }

    pub fn is_safe(&self) -> bool {
        self.safety() == Safety::Safe
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Mark the value as safe for output, stringifying non-strings.
    pub fn mark_safe(self) -> Self {
        match self {
            Value::String(s, _) => Value::String(s, Safety::Safe),
            other => Value::String(other.to_string(), Safety::Safe),
        }
    }

    /// Taint the value so it is escaped even with autoescaping off.
    /// Values already marked safe are left alone.
    pub fn mark_for_escaping(self) -> Self {
        match self {
            Value::String(s, Safety::Plain) => Value::String(s, Safety::NeedsEscape),
            Value::String(..) => self,
            other => Value::String(other.to_string(), Safety::NeedsEscape),
        }
    }

    /// Carry this value's safety marking over to a transformed string.
    pub(crate) fn with_safety_of(s: String, source: &Value) -> Self {
        Value::String(s, source.safety())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s, _) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of the value; numeric strings count.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(f64::from(u8::from(*b))),
            Value::String(s, _) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.is_finite() => Some(*f as i64),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::String(s, _) => {
                let s = s.trim();
                s.parse()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
            }
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s, _) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
            Value::Object(obj) => obj.is_truthy(),
            Value::Callable(_) | Value::Template(_) | Value::Block(_) => true,
        }
    }

    pub fn len(&self) -> Option<usize> {
        match self {
            Value::String(s, _) => Some(s.chars().count()),
            Value::List(items) => Some(items.len()),
            Value::Map(map) => Some(map.len()),
            Value::Object(obj) => obj.iterate().map(|items| items.len()),
            _ => None,
        }
    }

    /// The items a `for` loop walks: list elements, string characters,
    /// map keys, or whatever an object yields.
    pub fn iterate(&self) -> Option<Vec<Value>> {
        match self {
            Value::List(items) => Some(items.as_ref().clone()),
            Value::String(s, safety) => Some(
                s.chars()
                    .map(|c| Value::String(c.to_string(), *safety))
                    .collect(),
            ),
            Value::Map(map) => Some(map.keys().map(|k| Value::from(k.as_str())).collect()),
            Value::Object(obj) => obj.iterate(),
            _ => None,
        }
    }

    /// Membership test for the `in` operator; `None` when the container
    /// does not support it.
    pub fn contains(&self, needle: &Value) -> Option<bool> {
        match self {
            Value::String(s, _) => needle.as_str().map(|n| s.contains(n)),
            Value::List(items) => Some(items.iter().any(|item| item == needle)),
            Value::Map(map) => needle.as_str().map(|k| map.contains_key(k)),
            Value::Object(obj) => obj
                .iterate()
                .map(|items| items.iter().any(|item| item == needle)),
            _ => None,
        }
    }

    /// Index into a list or string; negative indexes count from the end.
    pub fn get_index(&self, index: i64) -> Option<Value> {
        fn normalize(index: i64, len: usize) -> Option<usize> {
            let len = i64::try_from(len).ok()?;
            let idx = if index < 0 { len + index } else { index };
            (0..len).contains(&idx).then(|| idx as usize)
        }
        match self {
            Value::List(items) => normalize(index, items.len()).map(|i| items[i].clone()),
            Value::String(s, safety) => {
                let chars: Vec<char> = s.chars().collect();
                normalize(index, chars.len())
                    .map(|i| Value::String(chars[i].to_string(), *safety))
            }
            Value::Object(obj) => obj.get_index(index),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(..) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Object(_) => "object",
            Value::Callable(_) => "callable",
            Value::Template(_) => "template",
            Value::Block(_) => "block",
        }
    }

    pub(crate) fn repr(&self) -> String {
        match self {
            Value::String(s, _) => format!("'{}'", s.replace('\'', "\\'")),
            other => other.to_string(),
        }
    }
}

fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        f.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => f.write_str(&format_float(*x)),
            Value::String(s, _) => f.write_str(s),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(Value::repr).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Map(map) => {
                let parts: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("'{k}': {}", v.repr()))
                    .collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            Value::Object(obj) => f.write_str(&obj.display()),
            Value::Callable(c) => write!(f, "{c:?}"),
            Value::Template(t) => write!(f, "<Template: {}>", t.name()),
            Value::Block(b) => write!(f, "<Block Node: {}>", b.name),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::String(a, _), Value::String(b, _)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Template(a), Value::Template(b)) => Arc::ptr_eq(a, b),
            (Value::Block(a), Value::Block(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Callable(a), Value::Callable(b)) => Arc::ptr_eq(a, b),
            (a, b) => match (numeric(a), numeric(b)) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::String(a, _), Value::String(b, _)) => a.partial_cmp(b),
            (Value::List(a), Value::List(b)) => a.as_slice().partial_cmp(b.as_slice()),
            (a, b) => numeric(a)?.partial_cmp(&numeric(b)?),
        }
    }
}

/// Numbers and booleans compare numerically with each other.
fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        Value::Bool(b) => Some(f64::from(u8::from(*b))),
        _ => None,
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string(), Safety::Plain)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s, Safety::Plain)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(Arc::new(items))
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(map: IndexMap<String, Value>) -> Self {
        Value::Map(Arc::new(map))
    }
}

impl From<JsonValue> for Value {
    fn from(json: JsonValue) -> Self {
        Value::from_json(json)
    }
}

impl From<Arc<Template>> for Value {
    fn from(template: Arc<Template>) -> Self {
        Value::Template(template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_from_json_preserves_key_order() {
        let value = Value::from_json(json!({"b": 1, "a": [true, null, 1.5]}));
        assert_eq!(value.to_string(), "{'b': 1, 'a': [True, None, 1.5]}");
    }

    #[test]
    fn test_display_scalars() {
        assert_eq!(Value::None.to_string(), "None");
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::from(vec![Value::from("a")]).to_string(), "['a']");
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::None.is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::list([]).is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::from("0").is_truthy());
        assert!(Value::map([("a", Value::None)]).is_truthy());
    }

    #[test]
    fn test_safety_marking() {
        let safe = Value::from("x").mark_safe();
        assert!(safe.is_safe());
        assert!(safe.clone().mark_safe().is_safe());
        assert_eq!(safe.mark_for_escaping().safety(), Safety::Safe);
        assert_eq!(
            Value::from("y").mark_for_escaping().safety(),
            Safety::NeedsEscape
        );
        assert_eq!(Value::Int(3).mark_safe().as_str(), Some("3"));
    }

    #[test]
    fn test_loose_equality_and_ordering() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_eq!(Value::Bool(true), Value::Int(1));
        assert_ne!(Value::from("1"), Value::Int(1));
        assert!(Value::Int(2) > Value::Float(1.5));
        assert!(Value::from("a") < Value::from("b"));
        assert_eq!(Value::from("a").partial_cmp(&Value::Int(1)), None);
    }

    #[test]
    fn test_contains() {
        let list = Value::list([Value::Int(1), Value::Int(2)]);
        assert_eq!(list.contains(&Value::Int(2)), Some(true));
        assert_eq!(Value::from("abc").contains(&Value::from("bc")), Some(true));
        assert_eq!(Value::Int(5).contains(&Value::Int(5)), None);
    }

    #[test]
    fn test_get_index_negative() {
        let list = Value::list([Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(list.get_index(-1), Some(Value::Int(3)));
        assert_eq!(list.get_index(3), None);
        assert_eq!(Value::from("abc").get_index(1), Some(Value::from("b")));
    }

    #[test]
    fn test_iterate_map_yields_keys() {
        let map = Value::map([("x", Value::Int(1)), ("y", Value::Int(2))]);
        assert_eq!(
            map.iterate().unwrap(),
            vec![Value::from("x"), Value::from("y")]
        );
    }
}
