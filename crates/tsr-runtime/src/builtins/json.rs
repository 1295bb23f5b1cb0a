//! `JSON.stringify` / `JSON.parse` over runtime values.
//!
//! Stringify follows the language's rules: `undefined`, functions and
//! symbols are omitted from objects and become `null` in arrays; top-level
//! unserializable values yield `undefined`. Parse builds plain objects and
//! arrays with insertion order preserved.

use indexmap::IndexMap;

use crate::error::make_error;
use crate::ops::number_to_string;
use crate::value::Value;
use crate::RtResult;

pub fn stringify(value: &Value, indent: Option<usize>) -> RtResult<Value> {
    let mut out = String::new();
    if write_value(&mut out, value, indent, 0)? {
        Ok(Value::str(out))
    } else {
        Ok(Value::Undefined)
    }
}

/// Returns false for values JSON omits entirely.
fn write_value(out: &mut String, value: &Value, indent: Option<usize>, depth: usize) -> RtResult<bool> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            if n.is_finite() {
                out.push_str(&number_to_string(*n));
            } else {
                out.push_str("null");
            }
        }
        Value::Str(s) => write_string(out, s),
        Value::BigInt(_) => {
            return Err(make_error("TypeError", "Do not know how to serialize a BigInt"));
        }
        Value::Array(items) => {
            let items = items.borrow();
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_break(out, indent, depth + 1);
                if !write_value(out, item, indent, depth + 1)? {
                    out.push_str("null");
                }
            }
            if !items.is_empty() {
                write_break(out, indent, depth);
            }
            out.push(']');
        }
        Value::Object(obj) => {
            let props = obj.props.borrow();
            out.push('{');
            let mut first = true;
            for (key, v) in props.iter() {
                let mut piece = String::new();
                if !write_value(&mut piece, v, indent, depth + 1)? {
                    continue;
                }
                if !first {
                    out.push(',');
                }
                first = false;
                write_break(out, indent, depth + 1);
                write_string(out, key);
                out.push(':');
                if indent.is_some() {
                    out.push(' ');
                }
                out.push_str(&piece);
            }
            if !first {
                write_break(out, indent, depth);
            }
            out.push('}');
        }
        Value::Instance(inst) => {
            let fields = inst.fields.borrow();
            out.push('{');
            let mut first = true;
            for (key, v) in fields.iter() {
                let mut piece = String::new();
                if !write_value(&mut piece, v, indent, depth + 1)? {
                    continue;
                }
                if !first {
                    out.push(',');
                }
                first = false;
                write_break(out, indent, depth + 1);
                write_string(out, key);
                out.push(':');
                if indent.is_some() {
                    out.push(' ');
                }
                out.push_str(&piece);
            }
            if !first {
                write_break(out, indent, depth);
            }
            out.push('}');
        }
        Value::Map(_) | Value::Set(_) | Value::Promise(_) | Value::Regex(_) | Value::Date(_)
        | Value::Generator(_) => out.push_str("{}"),
        // Omitted from objects, null in arrays, undefined at top level.
        Value::Undefined
        | Value::Function(_)
        | Value::Bound(_)
        | Value::Native(_)
        | Value::NativeMethod(_)
        | Value::Symbol(_)
        | Value::Class(_)
        | Value::Opaque(_) => return Ok(false),
    }
    Ok(true)
}

fn write_break(out: &mut String, indent: Option<usize>, depth: usize) {
    if let Some(width) = indent {
        out.push('\n');
        out.push_str(&" ".repeat(width * depth));
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

pub fn parse(text: &str) -> RtResult<Value> {
    let mut parser = JsonParser { bytes: text.as_bytes(), pos: 0 };
    parser.skip_ws();
    let value = parser.parse_value()?;
    parser.skip_ws();
    if parser.pos != parser.bytes.len() {
        return Err(syntax_error(parser.pos));
    }
    Ok(value)
}

fn syntax_error(pos: usize) -> Value {
    make_error("SyntaxError", format!("Unexpected token in JSON at position {pos}"))
}

struct JsonParser<'s> {
    bytes: &'s [u8],
    pos: usize,
}

impl JsonParser<'_> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.bytes[self.pos..].starts_with(token.as_bytes()) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn parse_value(&mut self) -> RtResult<Value> {
        self.skip_ws();
        match self.peek() {
            Some(b'n') if self.eat("null") => Ok(Value::Null),
            Some(b't') if self.eat("true") => Ok(Value::Bool(true)),
            Some(b'f') if self.eat("false") => Ok(Value::Bool(false)),
            Some(b'"') => self.parse_string().map(Value::str),
            Some(b'[') => {
                self.pos += 1;
                let mut items = Vec::new();
                self.skip_ws();
                if self.peek() == Some(b']') {
                    self.pos += 1;
                    return Ok(Value::array(items));
                }
                loop {
                    items.push(self.parse_value()?);
                    self.skip_ws();
                    match self.peek() {
                        Some(b',') => self.pos += 1,
                        Some(b']') => {
                            self.pos += 1;
                            return Ok(Value::array(items));
                        }
                        _ => return Err(syntax_error(self.pos)),
                    }
                }
            }
            Some(b'{') => {
                self.pos += 1;
                let mut props = IndexMap::new();
                self.skip_ws();
                if self.peek() == Some(b'}') {
                    self.pos += 1;
                    return Ok(Value::object(props));
                }
                loop {
                    self.skip_ws();
                    let key = self.parse_string()?;
                    self.skip_ws();
                    if self.peek() != Some(b':') {
                        return Err(syntax_error(self.pos));
                    }
                    self.pos += 1;
                    let value = self.parse_value()?;
                    props.insert(key, value);
                    self.skip_ws();
                    match self.peek() {
                        Some(b',') => self.pos += 1,
                        Some(b'}') => {
                            self.pos += 1;
                            return Ok(Value::object(props));
                        }
                        _ => return Err(syntax_error(self.pos)),
                    }
                }
            }
            Some(c) if c == b'-' || c.is_ascii_digit() => self.parse_number(),
            _ => Err(syntax_error(self.pos)),
        }
    }

    fn parse_string(&mut self) -> RtResult<String> {
        if self.peek() != Some(b'"') {
            return Err(syntax_error(self.pos));
        }
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(syntax_error(self.pos)),
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(b'"') => out.push('"'),
                        Some(b'\\') => out.push('\\'),
                        Some(b'/') => out.push('/'),
                        Some(b'n') => out.push('\n'),
                        Some(b't') => out.push('\t'),
                        Some(b'r') => out.push('\r'),
                        Some(b'b') => out.push('\u{8}'),
                        Some(b'f') => out.push('\u{c}'),
                        Some(b'u') => {
                            let start = self.pos + 1;
                            let end = start + 4;
                            if end > self.bytes.len() {
                                return Err(syntax_error(self.pos));
                            }
                            let hex = std::str::from_utf8(&self.bytes[start..end])
                                .map_err(|_| syntax_error(self.pos))?;
                            let code =
                                u32::from_str_radix(hex, 16).map_err(|_| syntax_error(self.pos))?;
                            out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                            self.pos = end - 1;
                        }
                        _ => return Err(syntax_error(self.pos)),
                    }
                    self.pos += 1;
                }
                Some(_) => {
                    // Decode a full UTF-8 character.
                    let rest = std::str::from_utf8(&self.bytes[self.pos..])
                        .map_err(|_| syntax_error(self.pos))?;
                    let c = rest.chars().next().ok_or_else(|| syntax_error(self.pos))?;
                    out.push(c);
                    self.pos += c.len_utf8();
                }
            }
        }
    }

    fn parse_number(&mut self) -> RtResult<Value> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() == Some(b'.') {
            self.pos += 1;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|_| syntax_error(start))?;
        text.parse::<f64>()
            .map(Value::Number)
            .map_err(|_| syntax_error(start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::strict_equals;

    #[test]
    fn stringify_basic_values() {
        let v = Value::object({
            let mut m = IndexMap::new();
            m.insert("a".to_string(), Value::Number(1.0));
            m.insert("b".to_string(), Value::str("x"));
            m.insert("skip".to_string(), Value::Undefined);
            m
        });
        let s = stringify(&v, None).unwrap();
        assert_eq!(s.as_str(), Some(r#"{"a":1,"b":"x"}"#));
    }

    #[test]
    fn undefined_in_arrays_becomes_null() {
        let v = Value::array(vec![Value::Number(1.0), Value::Undefined]);
        let s = stringify(&v, None).unwrap();
        assert_eq!(s.as_str(), Some("[1,null]"));
    }

    #[test]
    fn parse_round_trips_stringify() {
        let parsed = parse(r#"{"a": [1, 2.5, "s"], "b": {"c": true}}"#).unwrap();
        let restringified = stringify(&parsed, None).unwrap();
        let reparsed = parse(restringified.as_str().unwrap()).unwrap();
        let again = stringify(&reparsed, None).unwrap();
        assert!(strict_equals(&restringified, &again));
    }

    #[test]
    fn parse_rejects_trailing_garbage() {
        assert!(parse("{} extra").is_err());
        assert!(parse("[1,]").is_err());
    }

    #[test]
    fn stringify_with_indent_inserts_newlines() {
        let v = Value::object({
            let mut m = IndexMap::new();
            m.insert("a".to_string(), Value::Number(1.0));
            m
        });
        let s = stringify(&v, Some(2)).unwrap();
        assert_eq!(s.as_str(), Some("{\n  \"a\": 1\n}"));
    }
}
