//! Builtin filters.
//!
//! A small catalog of string and sequence functions. Each filter gets the
//! piped value, its arguments, and the autoescape flag when it declares
//! `needs_autoescape`. Output safety is settled by the filter chain, so most
//! filters here return plain strings.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::Result;
use crate::html_escape::{conditional_escape, escape};
use crate::library::{Filter, Library};
use crate::providers::quote;
use crate::value::Value;

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*?>").expect("tag pattern is valid"));
static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z]'[A-Z]|\d[A-Z]").expect("title pattern is valid"));

pub fn builtins() -> Library {
    let mut lib = Library::new();
    lib
        // strings
        .filter(Filter::new("addslashes", addslashes).safe())
        .filter(Filter::new("capfirst", capfirst).safe())
        .filter(Filter::new("cut", cut).args(1, 0))
        .filter(Filter::new("lower", |v, _, _| Ok(text(v).to_lowercase().into())).safe())
        .filter(Filter::new("title", title).safe())
        .filter(Filter::new("truncatewords", truncatewords).args(1, 0).safe())
        .filter(Filter::new("upper", |v, _, _| Ok(text(v).to_uppercase().into())))
        .filter(Filter::new("urlencode", urlencode).args(0, 1))
        .filter(Filter::new("wordcount", wordcount))
        // html
        .filter(Filter::new("escape", |v, _, _| Ok(v.clone().mark_for_escaping())).safe())
        .filter(Filter::new("force_escape", |v, _, _| Ok(Value::safe(escape(&text(v))))).safe())
        .filter(Filter::new("linebreaksbr", linebreaksbr).safe().needs_autoescape())
        .filter(Filter::new("removetags", removetags).args(1, 0).safe())
        .filter(Filter::new("safe", |v, _, _| Ok(v.clone().mark_safe())).safe())
        .filter(Filter::new("safeseq", safeseq).safe())
        .filter(Filter::new("striptags", |v, _, _| {
            Ok(TAG_RE.replace_all(&text(v), "").into_owned().into())
        })
        .safe())
        // sequences
        .filter(Filter::new("first", |v, _, _| Ok(v.get_index(0).unwrap_or_else(empty))))
        .filter(Filter::new("join", join).args(1, 0).safe().needs_autoescape())
        .filter(Filter::new("last", |v, _, _| Ok(v.get_index(-1).unwrap_or_else(empty))).safe())
        .filter(Filter::new("length", length).safe())
        .filter(Filter::new("length_is", length_is).args(1, 0))
        .filter(Filter::new("slice", slice).args(1, 0).safe())
        // numbers
        .filter(Filter::new("add", add).args(1, 0))
        // logic
        .filter(Filter::new("default", |v, args, _| {
            Ok(if v.is_truthy() { v.clone() } else { args[0].clone() })
        })
        .args(1, 0))
        .filter(Filter::new("default_if_none", |v, args, _| {
            Ok(if v.is_none() { args[0].clone() } else { v.clone() })
        })
        .args(1, 0))
        .filter(Filter::new("yesno", yesno).args(0, 1));
    lib
}

fn text(value: &Value) -> String {
    value.to_string()
}

fn empty() -> Value {
    Value::from("")
}

/// Integer view used by `add`: integral strings parse, other strings don't.
fn to_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Float(f) if f.is_finite() => Some(f.trunc() as i64),
        Value::String(s, _) => s.trim().parse().ok(),
        _ => None,
    }
}

fn add(value: &Value, args: &[Value], _: Option<bool>) -> Result<Value> {
    let arg = &args[0];
    if let (Some(a), Some(b)) = (to_int(value), to_int(arg)) {
        return Ok(a.checked_add(b).map_or_else(empty, Value::Int));
    }
    Ok(match (value, arg) {
        (Value::String(a, _), Value::String(b, _)) => Value::from(format!("{a}{b}")),
        (Value::List(a), Value::List(b)) => Value::list(a.iter().chain(b.iter()).cloned()),
        _ => empty(),
    })
}

fn addslashes(value: &Value, _: &[Value], _: Option<bool>) -> Result<Value> {
    let escaped = text(value)
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\'', "\\'");
    Ok(escaped.into())
}

fn capfirst(value: &Value, _: &[Value], _: Option<bool>) -> Result<Value> {
    let s = text(value);
    let mut chars = s.chars();
    Ok(match chars.next() {
        Some(first) => format!("{}{}", first.to_uppercase(), chars.as_str()).into(),
        None => s.into(),
    })
}

fn cut(value: &Value, args: &[Value], _: Option<bool>) -> Result<Value> {
    let arg = text(&args[0]);
    let cut = text(value).replace(&arg, "");
    if value.is_safe() && arg != ";" {
        return Ok(Value::safe(cut));
    }
    Ok(cut.into())
}

fn title(value: &Value, _: &[Value], _: Option<bool>) -> Result<Value> {
    let mut titled = String::new();
    let mut prev_cased = false;
    for c in text(value).chars() {
        if prev_cased {
            titled.extend(c.to_lowercase());
        } else {
            titled.extend(c.to_uppercase());
        }
        prev_cased = c.is_alphabetic();
    }
    let fixed = TITLE_RE.replace_all(&titled, |caps: &regex::Captures<'_>| caps[0].to_lowercase());
    Ok(fixed.into_owned().into())
}

fn truncatewords(value: &Value, args: &[Value], _: Option<bool>) -> Result<Value> {
    let Some(length) = to_int(&args[0]) else {
        return Ok(value.clone());
    };
    let length = usize::try_from(length).unwrap_or(0);
    let s = text(value);
    let words: Vec<&str> = s.split_whitespace().collect();
    if words.len() > length {
        return Ok(format!("{} ...", words[..length].join(" ")).into());
    }
    Ok(words.join(" ").into())
}

fn urlencode(value: &Value, args: &[Value], _: Option<bool>) -> Result<Value> {
    let safe = args.first().map_or_else(|| "/".to_string(), text);
    Ok(quote(&text(value), &safe).into())
}

fn wordcount(value: &Value, _: &[Value], _: Option<bool>) -> Result<Value> {
    Ok(text(value).split_whitespace().count().into())
}

fn linebreaksbr(value: &Value, _: &[Value], autoescape: Option<bool>) -> Result<Value> {
    let s = text(value).replace("\r\n", "\n").replace('\r', "\n");
    let s = if autoescape.unwrap_or(false) && !value.is_safe() {
        escape(&s)
    } else {
        s
    };
    Ok(Value::safe(s.replace('\n', "<br />")))
}

fn removetags(value: &Value, args: &[Value], _: Option<bool>) -> Result<Value> {
    let tags: Vec<String> = text(&args[0])
        .split_whitespace()
        .map(regex::escape)
        .collect();
    if tags.is_empty() {
        return Ok(value.clone());
    }
    let alternation = tags.join("|");
    let (Ok(start), Ok(end)) = (
        Regex::new(&format!(r"<({alternation})(/?>|(\s+[^>]*>))")),
        Regex::new(&format!(r"</({alternation})>")),
    ) else {
        return Ok(value.clone());
    };
    let s = text(value);
    let s = start.replace_all(&s, "");
    Ok(end.replace_all(&s, "").into_owned().into())
}

fn safeseq(value: &Value, _: &[Value], _: Option<bool>) -> Result<Value> {
    Ok(match value.iterate() {
        Some(items) => Value::list(items.into_iter().map(Value::mark_safe)),
        None => value.clone(),
    })
}

fn join(value: &Value, args: &[Value], autoescape: Option<bool>) -> Result<Value> {
    let Some(items) = value.iterate() else {
        return Ok(value.clone());
    };
    let parts: Vec<String> = if autoescape.unwrap_or(false) {
        items.iter().map(conditional_escape).collect()
    } else {
        items.iter().map(Value::to_string).collect()
    };
    Ok(Value::safe(parts.join(conditional_escape(&args[0]).as_str())))
}

fn length(value: &Value, _: &[Value], _: Option<bool>) -> Result<Value> {
    Ok(value.len().map_or_else(empty, Value::from))
}

fn length_is(value: &Value, args: &[Value], _: Option<bool>) -> Result<Value> {
    Ok(match (value.len(), to_int(&args[0])) {
        (Some(len), Some(expected)) => Value::Bool(i64::try_from(len).ok() == Some(expected)),
        _ => empty(),
    })
}

/// Python slice semantics over lists and strings: `"a:b[:step]"` or `"n"`
/// for the first `n` items.
fn slice(value: &Value, args: &[Value], _: Option<bool>) -> Result<Value> {
    let arg = text(&args[0]);
    let mut bits = Vec::new();
    for bit in arg.split(':') {
        if bit.is_empty() {
            bits.push(None);
        } else {
            match bit.trim().parse::<i64>() {
                Ok(n) => bits.push(Some(n)),
                Err(_) => return Ok(value.clone()),
            }
        }
    }
    let (start, stop, step) = match bits.as_slice() {
        [stop] => (None, *stop, None),
        [start, stop] => (*start, *stop, None),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Ok(value.clone()),
    };
    let step = match step.unwrap_or(1) {
        n if n > 0 => n as usize,
        _ => return Ok(value.clone()),
    };
    let bounds = |len: usize| {
        let clamp = |index: Option<i64>, default: usize| match index {
            None => default,
            Some(i) if i < 0 => len.saturating_sub(i.unsigned_abs() as usize),
            Some(i) => (i as usize).min(len),
        };
        (clamp(start, 0), clamp(stop, len))
    };
    Ok(match value {
        Value::List(items) => {
            let (from, to) = bounds(items.len());
            let picked = items.iter().take(to).skip(from).step_by(step).cloned();
            Value::list(picked)
        }
        Value::String(s, _) => {
            let chars: Vec<char> = s.chars().collect();
            let (from, to) = bounds(chars.len());
            let picked: String = chars.iter().take(to).skip(from).step_by(step).collect();
            Value::with_safety_of(picked, value)
        }
        _ => value.clone(),
    })
}

fn yesno(value: &Value, args: &[Value], _: Option<bool>) -> Result<Value> {
    let arg = args.first().map_or_else(|| "yes,no,maybe".to_string(), text);
    let bits: Vec<&str> = arg.split(',').collect();
    let (yes, no, maybe) = match bits.as_slice() {
        [yes, no] => (*yes, *no, *no),
        [yes, no, maybe, ..] => (*yes, *no, *maybe),
        _ => return Ok(value.clone()),
    };
    Ok(Value::from(if value.is_none() {
        maybe
    } else if value.is_truthy() {
        yes
    } else {
        no
    }))
}

#[cfg(test)]
mod tests {
    use crate::render;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn r(source: &str, data: serde_json::Value) -> String {
        render(source, data).unwrap()
    }

    #[test]
    fn test_string_filters() {
        assert_eq!(r("{{ s|upper }}|{{ s|lower }}", json!({"s": "MiXed"})), "MIXED|mixed");
        assert_eq!(r("{{ s|capfirst }}", json!({"s": "hello"})), "Hello");
        assert_eq!(r("{{ s|title }}", json!({"s": "joe's CAFE 1st"})), "Joe's Cafe 1st");
        assert_eq!(r("{{ s|cut:' ' }}", json!({"s": "a b c"})), "abc");
        assert_eq!(r("{{ s|addslashes }}", json!({"s": r#"I'm "x""#})), r"I\&#39;m \&quot;x\&quot;");
        assert_eq!(r("{{ s|wordcount }}", json!({"s": " one two  three "})), "3");
        assert_eq!(
            r("{{ s|truncatewords:2 }}|{{ s|truncatewords:9 }}", json!({"s": "a b  c"})),
            "a b ...|a b c"
        );
        assert_eq!(r("{{ s|truncatewords:'x' }}", json!({"s": "a  b"})), "a  b");
    }

    #[test]
    fn test_urlencode() {
        assert_eq!(r("{{ s|urlencode }}", json!({"s": "a b/c?d"})), "a%20b/c%3Fd");
        assert_eq!(r("{{ s|urlencode:'' }}", json!({"s": "a/b"})), "a%2Fb");
    }

    #[test]
    fn test_escaping_filters() {
        let data = json!({"s": "<a>&"});
        assert_eq!(r("{% autoescape off %}{{ s|escape }}{% endautoescape %}", data.clone()), "&lt;a&gt;&amp;");
        assert_eq!(r("{{ s|force_escape }}", data.clone()), "&lt;a&gt;&amp;");
        assert_eq!(r("{{ s|safe }}", data.clone()), "<a>&");
        assert_eq!(r("{{ s|escape|escape }}", data), "&lt;a&gt;&amp;");
    }

    #[test]
    fn test_safe_propagation_through_is_safe_filters() {
        let data = json!({"s": "<b>x</b>"});
        assert_eq!(r("{{ s|safe|lower }}", data.clone()), "<b>x</b>");
        assert_eq!(r("{{ s|safe|upper }}", data), "&lt;B&gt;X&lt;/B&gt;");
    }

    #[test]
    fn test_linebreaksbr() {
        assert_eq!(r("{{ s|linebreaksbr }}", json!({"s": "a<\r\nb"})), "a&lt;<br />b");
        assert_eq!(
            r("{% autoescape off %}{{ s|linebreaksbr }}{% endautoescape %}", json!({"s": "a<\nb"})),
            "a<<br />b"
        );
    }

    #[test]
    fn test_tag_stripping() {
        let data = json!({"s": "<b>bold</b> <i class=\"x\">it</i><br/>"});
        assert_eq!(r("{{ s|striptags }}", data.clone()), "bold it");
        assert_eq!(
            r("{{ s|removetags:'b br'|safe }}", data),
            "bold <i class=\"x\">it</i>"
        );
    }

    #[test]
    fn test_sequence_filters() {
        let data = json!({"l": ["a", "<b>", "c"], "e": []});
        assert_eq!(r("{{ l|first }}{{ l|last }}{{ e|first }}", data.clone()), "ac");
        assert_eq!(r("{{ l|join:', ' }}", data.clone()), "a, &lt;b&gt;, c");
        assert_eq!(r("{{ l|safeseq|join:', ' }}", data.clone()), "a, <b>, c");
        assert_eq!(r("{{ l|length }}|{{ 'abc'|length }}|{{ n|length }}", data.clone()), "3|3|0");
        assert_eq!(r("{{ l|length_is:3 }}|{{ l|length_is:'x' }}", data.clone()), "True|");
        assert_eq!(r("{{ l|slice:':2'|join:'' }}", data.clone()), "a&lt;b&gt;");
        assert_eq!(r("{{ 'abcdef'|slice:'1:-1' }}|{{ 'abcdef'|slice:'::2' }}", data), "bcde|ace");
    }

    #[test]
    fn test_add() {
        assert_eq!(r("{{ n|add:2 }}|{{ n|add:'3' }}", json!({"n": 4})), "6|7");
        assert_eq!(r("{{ s|add:'b' }}", json!({"s": "a"})), "ab");
        assert_eq!(r("{{ a|add:b }}", json!({"a": [1], "b": [2]})), "[1, 2]");
        assert_eq!(r("{{ n|add:s }}", json!({"n": 1, "s": "x"})), "");
    }

    #[test]
    fn test_default_and_yesno() {
        assert_eq!(r("{{ missing|default:'d' }}|{{ z|default:'d' }}", json!({"z": 0})), "d|d");
        assert_eq!(r("{{ n|default_if_none:'d' }}|{{ z|default_if_none:'d' }}", json!({"n": null, "z": 0})), "d|0");
        assert_eq!(
            r("{{ t|yesno }}|{{ f|yesno }}|{{ n|yesno }}|{{ n|yesno:'y,n' }}|{{ t|yesno:'bad' }}", json!({"t": true, "f": false, "n": null})),
            "yes|no|maybe|n|True"
        );
    }
}
