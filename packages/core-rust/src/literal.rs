//! Parser for the literal mini-language used by filter and index input.
//!
//! The grammar is a small, closed subset of dictionary/list literal syntax:
//!
//! ```text
//! value   := object | list | tuple | string | number | word | call
//! object  := '{' (key ':' value (',' key ':' value)* ','?)? '}'
//! list    := '[' (value (',' value)* ','?)? ']'
//! tuple   := '(' (value (',' value)* ','?)? ')'
//! key     := string | identifier
//! word    := true | false | True | False | null | None
//! call    := ObjectId '(' string ')' | (date | gen_date) '(' int (',' int)* ')'
//! ```
//!
//! Nothing is ever evaluated: unknown names are a parse error.

use chrono::{NaiveDate, TimeZone, Utc};

use crate::normalize::TimeShift;
use crate::types::{Document, Value};

/// Deepest nesting of objects and sequences accepted by the parser.
const MAX_DEPTH: usize = 64;

/// Failure to parse literal text. Carries the byte offset where parsing stopped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} at offset {offset}")]
pub struct ParseError {
    /// Byte offset into the input.
    pub offset: usize,
    /// What went wrong.
    pub message: &'static str,
}

/// Parses `text` as a single literal value.
///
/// `date(...)` calls denote display time and are converted to stored time
/// with `shift`, so they compare correctly against raw store values.
///
/// # Errors
///
/// Returns [`ParseError`] if the text is not exactly one well-formed literal.
pub fn parse_literal(text: &str, shift: TimeShift) -> Result<Value, ParseError> {
    let mut parser = Parser {
        src: text,
        pos: 0,
        depth: 0,
        shift,
    };
    let value = parser.value()?;
    parser.skip_ws();
    if parser.pos < parser.src.len() {
        return Err(parser.error("trailing characters"));
    }
    Ok(value)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
    shift: TimeShift,
}

impl Parser<'_> {
    fn error(&self, message: &'static str) -> ParseError {
        ParseError {
            offset: self.pos,
            message,
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn expect(&mut self, want: char, message: &'static str) -> Result<(), ParseError> {
        self.skip_ws();
        if self.peek() == Some(want) {
            self.bump();
            Ok(())
        } else {
            Err(self.error(message))
        }
    }

    /// Runs `parse` one nesting level deeper, failing past [`MAX_DEPTH`].
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn value(&mut self) -> Result<Value, ParseError> {
        self.skip_ws();
        match self.peek() {
            Some('{') => self.nested(Self::object).map(Value::Document),
            Some('[') => self.nested(|p| p.sequence('[', ']')).map(Value::Array),
            Some('(') => self.nested(|p| p.sequence('(', ')')).map(Value::Array),
            Some('\'' | '"') => self.string().map(Value::String),
            Some(c) if c == '-' || c == '+' || c == '.' || c.is_ascii_digit() => self.number(),
            Some(c) if is_ident_start(c) => self.word(),
            Some(_) => Err(self.error("unexpected character")),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn object(&mut self) -> Result<Document, ParseError> {
        self.expect('{', "expected '{'")?;
        let mut doc = Document::new();
        loop {
            self.skip_ws();
            if self.peek() == Some('}') {
                self.bump();
                return Ok(doc);
            }
            let key = match self.peek() {
                Some('\'' | '"') => self.string()?,
                Some(c) if is_ident_start(c) => self.identifier(),
                _ => return Err(self.error("expected field name")),
            };
            self.expect(':', "expected ':'")?;
            let value = self.value()?;
            doc.insert(key, value);
            self.skip_ws();
            match self.bump() {
                Some(',') => {}
                Some('}') => return Ok(doc),
                _ => return Err(self.error("expected ',' or '}'")),
            }
        }
    }

    fn sequence(&mut self, open: char, close: char) -> Result<Vec<Value>, ParseError> {
        self.expect(open, "expected sequence")?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(close) {
                self.bump();
                return Ok(items);
            }
            items.push(self.value()?);
            self.skip_ws();
            match self.bump() {
                Some(',') => {}
                Some(c) if c == close => return Ok(items),
                _ => return Err(self.error("expected ',' or end of sequence")),
            }
        }
    }

    fn string(&mut self) -> Result<String, ParseError> {
        let Some(quote) = self.bump() else {
            return Err(self.error("expected string"));
        };
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('u') => out.push(self.unicode_escape()?),
                    Some(c) => out.push(c),
                    None => return Err(self.error("unterminated string")),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn unicode_escape(&mut self) -> Result<char, ParseError> {
        let end = self.pos + 4;
        let digits = self
            .src
            .get(self.pos..end)
            .ok_or_else(|| self.error("short unicode escape"))?;
        let code = u32::from_str_radix(digits, 16).map_err(|_| self.error("bad unicode escape"))?;
        self.pos = end;
        char::from_u32(code).ok_or_else(|| self.error("bad unicode escape"))
    }

    fn number(&mut self) -> Result<Value, ParseError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
        {
            self.bump();
        }
        let text = &self.src[start..self.pos];
        if text.contains(['.', 'e', 'E']) {
            text.parse::<f64>()
                .map(Value::Float)
                .map_err(|_| self.error("invalid number"))
        } else {
            text.trim_start_matches('+')
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| self.error("invalid integer"))
        }
    }

    fn identifier(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_continue) {
            self.bump();
        }
        self.src[start..self.pos].to_string()
    }

    fn word(&mut self) -> Result<Value, ParseError> {
        let start = self.pos;
        let name = self.identifier();
        match name.as_str() {
            "true" | "True" => Ok(Value::Bool(true)),
            "false" | "False" => Ok(Value::Bool(false)),
            "null" | "None" => Ok(Value::Null),
            "ObjectId" => self.object_id(),
            "date" | "gen_date" => self.date(),
            _ => {
                self.pos = start;
                Err(self.error("unknown name"))
            }
        }
    }

    fn object_id(&mut self) -> Result<Value, ParseError> {
        self.expect('(', "expected '('")?;
        self.skip_ws();
        let hex_id = self.string()?;
        self.expect(')', "expected ')'")?;
        let bytes = hex::decode(&hex_id).map_err(|_| self.error("invalid object id"))?;
        let oid: [u8; 12] = bytes
            .try_into()
            .map_err(|_| self.error("object id must be 12 bytes"))?;
        Ok(Value::ObjectId(oid))
    }

    fn date(&mut self) -> Result<Value, ParseError> {
        let args = self.sequence('(', ')')?;
        let mut parts = [0i64, 1, 1, 0, 0, 0];
        if args.is_empty() || args.len() > parts.len() {
            return Err(self.error("date takes 1 to 6 integer arguments"));
        }
        for (slot, arg) in parts.iter_mut().zip(&args) {
            *slot = arg
                .as_i64()
                .ok_or_else(|| self.error("date arguments must be integers"))?;
        }
        let field = |i: usize| u32::try_from(parts[i]).ok();
        let naive = i32::try_from(parts[0])
            .ok()
            .and_then(|y| NaiveDate::from_ymd_opt(y, field(1)?, field(2)?))
            .and_then(|d| d.and_hms_opt(field(3)?, field(4)?, field(5)?))
            .ok_or_else(|| self.error("date out of range"))?;
        Ok(Value::DateTime(
            self.shift.to_stored(Utc.from_utc_datetime(&naive)),
        ))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '$' | '.')
}
