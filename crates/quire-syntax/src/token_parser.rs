//! A small backtracking microparser over raw tag contents.
//!
//! Tags whose grammar does not fit a whitespace split (such as `trans`,
//! whose first value may be a quoted string followed by filters) read their
//! arguments one piece at a time with [`TokenParser::tag`] and
//! [`TokenParser::value`].

use crate::SyntaxError;

pub struct TokenParser {
    subject: String,
    pointer: usize,
    backout: Vec<usize>,
    tagname: String,
}

fn is_space(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

impl TokenParser {
    /// Start parsing tag contents; the first word is consumed as the tag name.
    pub fn new(subject: impl Into<String>) -> Result<Self, SyntaxError> {
        let mut parser = Self {
            subject: subject.into(),
            pointer: 0,
            backout: Vec::new(),
            tagname: String::new(),
        };
        parser.tagname = parser.tag()?;
        Ok(parser)
    }

    pub fn tagname(&self) -> &str {
        &self.tagname
    }

    /// True if there is more left in the tag.
    pub fn more(&self) -> bool {
        self.pointer < self.subject.len()
    }

    /// Undo the last microparser call.
    pub fn back(&mut self) -> Result<(), SyntaxError> {
        self.pointer = self
            .backout
            .pop()
            .ok_or_else(|| SyntaxError::new("back called without some previous parsing"))?;
        Ok(())
    }

    /// The next space-delimited word.
    pub fn tag(&mut self) -> Result<String, SyntaxError> {
        let bytes = self.subject.as_bytes();
        let mut i = self.pointer;
        if i >= bytes.len() {
            return Err(SyntaxError::new(format!(
                "expected another tag, found end of string: {}",
                self.subject
            )));
        }
        let start = i;
        while i < bytes.len() && !is_space(bytes[i]) {
            i += 1;
        }
        let word = self.subject[start..i].to_string();
        self.advance_to(self.skip_spaces(i));
        Ok(word)
    }

    /// The next value: a quoted constant or a variable, with trailing filters.
    pub fn value(&mut self) -> Result<String, SyntaxError> {
        let bytes = self.subject.as_bytes();
        let mut i = self.pointer;
        if i >= bytes.len() {
            return Err(SyntaxError::new(format!(
                "Searching for value. Expected another value but found end of string: {}",
                self.subject
            )));
        }
        let start = i;
        if bytes[i] == b'"' || bytes[i] == b'\'' {
            let quote = bytes[i];
            i += 1;
            while i < bytes.len() && bytes[i] != quote {
                i += 1;
            }
            if i >= bytes.len() {
                return Err(self.unexpected_end(i));
            }
            i += 1;
        }
        let end = self.next_space_index(i)?;
        let value = self.subject[start..end].to_string();
        self.advance_to(self.skip_spaces(end));
        Ok(value)
    }

    fn next_space_index(&self, mut i: usize) -> Result<usize, SyntaxError> {
        let bytes = self.subject.as_bytes();
        while i < bytes.len() && !is_space(bytes[i]) {
            if bytes[i] == b'"' || bytes[i] == b'\'' {
                let quote = bytes[i];
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                if i >= bytes.len() {
                    return Err(self.unexpected_end(i));
                }
            }
            i += 1;
        }
        Ok(i)
    }

    fn skip_spaces(&self, mut i: usize) -> usize {
        let bytes = self.subject.as_bytes();
        while i < bytes.len() && is_space(bytes[i]) {
            i += 1;
        }
        i
    }

    fn advance_to(&mut self, i: usize) {
        self.backout.push(self.pointer);
        self.pointer = i;
    }

    fn unexpected_end(&self, column: usize) -> SyntaxError {
        SyntaxError::new(format!(
            "Searching for value. Unexpected end of string in column {column}: {}",
            self.subject
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_tagname_consumed() {
        let parser = TokenParser::new("trans \"hello\"").unwrap();
        assert_eq!(parser.tagname(), "trans");
        assert!(parser.more());
    }

    #[test]
    fn test_value_with_filters() {
        let mut parser = TokenParser::new(r#"trans "a b"|upper noop"#).unwrap();
        assert_eq!(parser.value().unwrap(), r#""a b"|upper"#);
        assert_eq!(parser.tag().unwrap(), "noop");
        assert!(!parser.more());
    }

    #[test]
    fn test_value_variable_with_quoted_arg() {
        let mut parser = TokenParser::new(r#"trans var|default:"x y" as z"#).unwrap();
        assert_eq!(parser.value().unwrap(), r#"var|default:"x y""#);
        assert_eq!(parser.tag().unwrap(), "as");
        assert_eq!(parser.tag().unwrap(), "z");
    }

    #[test]
    fn test_back_restores_pointer() {
        let mut parser = TokenParser::new("t a b").unwrap();
        assert_eq!(parser.tag().unwrap(), "a");
        parser.back().unwrap();
        assert_eq!(parser.tag().unwrap(), "a");
        assert_eq!(parser.tag().unwrap(), "b");
    }

    #[test]
    fn test_unterminated_quote() {
        let mut parser = TokenParser::new("trans \"abc").unwrap();
        let err = parser.value().unwrap_err();
        assert!(err.message.starts_with("Searching for value. Unexpected end of string"));
    }

    #[test]
    fn test_end_of_string() {
        let mut parser = TokenParser::new("trans").unwrap();
        assert!(parser.tag().is_err());
        assert!(parser.value().is_err());
    }
}
