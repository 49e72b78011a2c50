//! HTML escaping.

use crate::value::Value;

/// Replace `& < > " '` with their entities, copying the runs in between.
pub fn escape(input: &str) -> String {
    let mut output = String::with_capacity(input.len() + input.len() / 8);
    let mut last = 0;
    for (i, byte) in input.bytes().enumerate() {
        let entity = match byte {
            b'&' => "&amp;",
            b'<' => "&lt;",
            b'>' => "&gt;",
            b'"' => "&quot;",
            b'\'' => "&#39;",
            _ => continue,
        };
        output.push_str(&input[last..i]);
        output.push_str(entity);
        last = i + 1;
    }
    output.push_str(&input[last..]);
    output
}

/// Escape unless the value is already marked safe.
pub fn conditional_escape(value: &Value) -> String {
    if value.is_safe() {
        value.to_string()
    } else {
        escape(&value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_each_special_char() {
        assert_eq!(escape("a & b"), "a &amp; b");
        assert_eq!(escape("a < b > c"), "a &lt; b &gt; c");
        assert_eq!(escape("a \"b\" 'c'"), "a &quot;b&quot; &#39;c&#39;");
    }

    #[test]
    fn test_escape_is_not_idempotent_on_raw_text() {
        assert_eq!(escape(&escape("x&y")), "x&amp;amp;y");
    }

    #[test]
    fn test_conditional_escape() {
        assert_eq!(conditional_escape(&Value::from("<b>")), "&lt;b&gt;");
        assert_eq!(conditional_escape(&Value::safe("<b>")), "<b>");
    }
}
