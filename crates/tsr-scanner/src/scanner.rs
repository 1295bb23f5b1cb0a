//! The scanner.
//!
//! One pass over the source text. Template literals are handled with a mode
//! stack: `TemplateHead` opens a substitution, a `}` at substitution depth
//! zero resumes template scanning and yields `TemplateMiddle` or
//! `TemplateTail`. Regex literals are recognized by position: a `/` that
//! cannot be a division (the previous significant token cannot end an
//! expression) starts a regex.

use once_cell::sync::OnceCell;
use rustc_hash::FxHashMap;

use tsr_common::{Diagnostic, DiagnosticCode, Span};

use crate::token::{Token, TokenKind, TokenLiteral};

fn keyword_table() -> &'static FxHashMap<&'static str, TokenKind> {
    static KEYWORDS: OnceCell<FxHashMap<&'static str, TokenKind>> = OnceCell::new();
    KEYWORDS.get_or_init(|| {
        let mut m = FxHashMap::default();
        m.insert("abstract", TokenKind::Abstract);
        m.insert("as", TokenKind::As);
        m.insert("async", TokenKind::Async);
        m.insert("await", TokenKind::Await);
        m.insert("break", TokenKind::Break);
        m.insert("case", TokenKind::Case);
        m.insert("catch", TokenKind::Catch);
        m.insert("class", TokenKind::Class);
        m.insert("const", TokenKind::Const);
        m.insert("continue", TokenKind::Continue);
        m.insert("declare", TokenKind::Declare);
        m.insert("default", TokenKind::Default);
        m.insert("do", TokenKind::Do);
        m.insert("else", TokenKind::Else);
        m.insert("enum", TokenKind::Enum);
        m.insert("export", TokenKind::Export);
        m.insert("extends", TokenKind::Extends);
        m.insert("false", TokenKind::False);
        m.insert("finally", TokenKind::Finally);
        m.insert("for", TokenKind::For);
        m.insert("from", TokenKind::From);
        m.insert("function", TokenKind::Function);
        m.insert("get", TokenKind::Get);
        m.insert("global", TokenKind::Global);
        m.insert("if", TokenKind::If);
        m.insert("implements", TokenKind::Implements);
        m.insert("import", TokenKind::Import);
        m.insert("in", TokenKind::In);
        m.insert("infer", TokenKind::Infer);
        m.insert("instanceof", TokenKind::InstanceOf);
        m.insert("interface", TokenKind::Interface);
        m.insert("is", TokenKind::Is);
        m.insert("keyof", TokenKind::KeyOf);
        m.insert("let", TokenKind::Let);
        m.insert("namespace", TokenKind::Namespace);
        m.insert("new", TokenKind::New);
        m.insert("null", TokenKind::Null);
        m.insert("of", TokenKind::Of);
        m.insert("private", TokenKind::Private);
        m.insert("protected", TokenKind::Protected);
        m.insert("public", TokenKind::Public);
        m.insert("readonly", TokenKind::Readonly);
        m.insert("return", TokenKind::Return);
        m.insert("set", TokenKind::Set);
        m.insert("static", TokenKind::Static);
        m.insert("super", TokenKind::Super);
        m.insert("switch", TokenKind::Switch);
        m.insert("this", TokenKind::This);
        m.insert("throw", TokenKind::Throw);
        m.insert("true", TokenKind::True);
        m.insert("try", TokenKind::Try);
        m.insert("type", TokenKind::Type);
        m.insert("typeof", TokenKind::TypeOf);
        m.insert("undefined", TokenKind::Undefined);
        m.insert("using", TokenKind::Using);
        m.insert("var", TokenKind::Var);
        m.insert("void", TokenKind::Void);
        m.insert("while", TokenKind::While);
        m.insert("yield", TokenKind::Yield);
        m
    })
}

/// Scanner state for one template literal being interrupted by substitutions.
struct TemplateFrame {
    /// `{`-nesting inside the current substitution.
    brace_depth: u32,
}

pub struct Scanner<'s> {
    source: &'s str,
    pos: usize,
    start: usize,
    line: u32,
    tokens: Vec<Token>,
    templates: Vec<TemplateFrame>,
    /// Kind of the last significant token, for regex disambiguation.
    prev_kind: Option<TokenKind>,
}

impl<'s> Scanner<'s> {
    pub fn new(source: &'s str) -> Self {
        Scanner {
            source,
            pos: 0,
            start: 0,
            line: 1,
            tokens: Vec::new(),
            templates: Vec::new(),
            prev_kind: None,
        }
    }

    /// Scan the whole source, returning tokens ending in an EOF sentinel.
    pub fn scan_tokens(mut self) -> Result<Vec<Token>, Diagnostic> {
        while !self.is_at_end() {
            self.start = self.pos;
            self.scan_token()?;
        }
        let span = Span::at(self.pos as u32);
        self.tokens.push(Token::new(TokenKind::Eof, "", self.line, span));
        Ok(self.tokens)
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.source.len()
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_next(&self) -> Option<char> {
        let mut it = self.source[self.pos..].chars();
        it.next();
        it.next()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn matches(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn lexeme(&self) -> &'s str {
        &self.source[self.start..self.pos]
    }

    fn span(&self) -> Span {
        Span::new(self.start as u32, self.pos as u32)
    }

    fn push(&mut self, kind: TokenKind) {
        let token = Token::new(kind, self.lexeme(), self.line, self.span());
        self.prev_kind = Some(kind);
        self.tokens.push(token);
    }

    fn push_literal(&mut self, kind: TokenKind, literal: TokenLiteral) {
        let token = Token::new(kind, self.lexeme(), self.line, self.span()).with_literal(literal);
        self.prev_kind = Some(kind);
        self.tokens.push(token);
    }

    fn err(&self, code: DiagnosticCode, message: impl Into<String>) -> Diagnostic {
        Diagnostic::error(code, message, self.span())
    }

    fn scan_token(&mut self) -> Result<(), Diagnostic> {
        let c = match self.advance() {
            Some(c) => c,
            None => return Ok(()),
        };
        match c {
            ' ' | '\t' | '\r' | '\n' => {}
            '(' => self.push(TokenKind::LeftParen),
            ')' => self.push(TokenKind::RightParen),
            '[' => self.push(TokenKind::LeftBracket),
            ']' => self.push(TokenKind::RightBracket),
            '{' => {
                if let Some(frame) = self.templates.last_mut() {
                    frame.brace_depth += 1;
                }
                self.push(TokenKind::LeftBrace);
            }
            '}' => {
                if let Some(frame) = self.templates.last_mut() {
                    if frame.brace_depth == 0 {
                        // Closes a template substitution; resume the template.
                        self.templates.pop();
                        return self.scan_template_part();
                    }
                    frame.brace_depth -= 1;
                }
                self.push(TokenKind::RightBrace);
            }
            ',' => self.push(TokenKind::Comma),
            ';' => self.push(TokenKind::Semicolon),
            ':' => self.push(TokenKind::Colon),
            '@' => self.push(TokenKind::At),
            '~' => self.push(TokenKind::Tilde),
            '.' => {
                if self.peek() == Some('.') && self.peek_next() == Some('.') {
                    self.advance();
                    self.advance();
                    self.push(TokenKind::DotDotDot);
                } else if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.scan_number(c)?;
                } else {
                    self.push(TokenKind::Dot);
                }
            }
            '?' => {
                if self.matches('?') {
                    if self.matches('=') {
                        self.push(TokenKind::QuestionQuestionEqual);
                    } else {
                        self.push(TokenKind::QuestionQuestion);
                    }
                } else {
                    self.push(TokenKind::Question);
                }
            }
            '+' => {
                if self.matches('+') {
                    self.push(TokenKind::PlusPlus);
                } else if self.matches('=') {
                    self.push(TokenKind::PlusEqual);
                } else {
                    self.push(TokenKind::Plus);
                }
            }
            '-' => {
                if self.matches('-') {
                    self.push(TokenKind::MinusMinus);
                } else if self.matches('=') {
                    self.push(TokenKind::MinusEqual);
                } else {
                    self.push(TokenKind::Minus);
                }
            }
            '*' => {
                if self.matches('*') {
                    if self.matches('=') {
                        self.push(TokenKind::StarStarEqual);
                    } else {
                        self.push(TokenKind::StarStar);
                    }
                } else if self.matches('=') {
                    self.push(TokenKind::StarEqual);
                } else {
                    self.push(TokenKind::Star);
                }
            }
            '%' => {
                if self.matches('=') {
                    self.push(TokenKind::PercentEqual);
                } else {
                    self.push(TokenKind::Percent);
                }
            }
            '^' => {
                if self.matches('=') {
                    self.push(TokenKind::CaretEqual);
                } else {
                    self.push(TokenKind::Caret);
                }
            }
            '&' => {
                if self.matches('&') {
                    if self.matches('=') {
                        self.push(TokenKind::AmpAmpEqual);
                    } else {
                        self.push(TokenKind::AmpAmp);
                    }
                } else if self.matches('=') {
                    self.push(TokenKind::AmpEqual);
                } else {
                    self.push(TokenKind::Amp);
                }
            }
            '|' => {
                if self.matches('|') {
                    if self.matches('=') {
                        self.push(TokenKind::PipePipeEqual);
                    } else {
                        self.push(TokenKind::PipePipe);
                    }
                } else if self.matches('=') {
                    self.push(TokenKind::PipeEqual);
                } else {
                    self.push(TokenKind::Pipe);
                }
            }
            '=' => {
                if self.matches('=') {
                    if self.matches('=') {
                        self.push(TokenKind::EqualEqualEqual);
                    } else {
                        self.push(TokenKind::EqualEqual);
                    }
                } else if self.matches('>') {
                    self.push(TokenKind::Arrow);
                } else {
                    self.push(TokenKind::Equal);
                }
            }
            '!' => {
                if self.matches('=') {
                    if self.matches('=') {
                        self.push(TokenKind::BangEqualEqual);
                    } else {
                        self.push(TokenKind::BangEqual);
                    }
                } else {
                    self.push(TokenKind::Bang);
                }
            }
            '<' => {
                if self.matches('<') {
                    if self.matches('=') {
                        self.push(TokenKind::LessLessEqual);
                    } else {
                        self.push(TokenKind::LessLess);
                    }
                } else if self.matches('=') {
                    self.push(TokenKind::LessEqual);
                } else {
                    self.push(TokenKind::Less);
                }
            }
            '>' => {
                if self.matches('>') {
                    if self.matches('>') {
                        if self.matches('=') {
                            self.push(TokenKind::GreaterGreaterGreaterEqual);
                        } else {
                            self.push(TokenKind::GreaterGreaterGreater);
                        }
                    } else if self.matches('=') {
                        self.push(TokenKind::GreaterGreaterEqual);
                    } else {
                        self.push(TokenKind::GreaterGreater);
                    }
                } else if self.matches('=') {
                    self.push(TokenKind::GreaterEqual);
                } else {
                    self.push(TokenKind::Greater);
                }
            }
            '/' => {
                if self.matches('/') {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.advance();
                    }
                } else if self.matches('*') {
                    self.scan_block_comment()?;
                } else if self.regex_allowed() {
                    self.scan_regex()?;
                } else if self.matches('=') {
                    self.push(TokenKind::SlashEqual);
                } else {
                    self.push(TokenKind::Slash);
                }
            }
            '"' | '\'' => self.scan_string(c)?,
            '`' => self.scan_template_part()?,
            c if c.is_ascii_digit() => self.scan_number(c)?,
            c if is_ident_start(c) => self.scan_identifier(),
            _ => {
                return Err(self.err(
                    DiagnosticCode::UnknownCharacter,
                    format!("unexpected character '{c}'"),
                ));
            }
        }
        Ok(())
    }

    fn regex_allowed(&self) -> bool {
        !self.prev_kind.is_some_and(|k| k.can_end_expression())
    }

    fn scan_block_comment(&mut self) -> Result<(), Diagnostic> {
        loop {
            match self.advance() {
                None => {
                    return Err(self.err(DiagnosticCode::UnterminatedComment, "unterminated block comment"));
                }
                Some('*') if self.peek() == Some('/') => {
                    self.advance();
                    return Ok(());
                }
                Some(_) => {}
            }
        }
    }

    fn scan_identifier(&mut self) {
        while self.peek().is_some_and(is_ident_continue) {
            self.advance();
        }
        let text = self.lexeme();
        match keyword_table().get(text) {
            Some(TokenKind::True) => self.push_literal(TokenKind::True, TokenLiteral::Boolean(true)),
            Some(TokenKind::False) => self.push_literal(TokenKind::False, TokenLiteral::Boolean(false)),
            Some(TokenKind::Null) => self.push_literal(TokenKind::Null, TokenLiteral::Null),
            Some(&kind) => self.push(kind),
            None => self.push(TokenKind::Identifier),
        }
    }

    fn scan_number(&mut self, first: char) -> Result<(), Diagnostic> {
        // Radix prefixes.
        if first == '0' {
            if let Some(radix_char @ ('x' | 'X' | 'o' | 'O' | 'b' | 'B')) = self.peek() {
                self.advance();
                let radix = match radix_char {
                    'x' | 'X' => 16,
                    'o' | 'O' => 8,
                    _ => 2,
                };
                let digits_start = self.pos;
                while self.peek().is_some_and(|c| c.is_digit(radix) || c == '_') {
                    self.advance();
                }
                let digits: String = self.source[digits_start..self.pos]
                    .chars()
                    .filter(|&c| c != '_')
                    .collect();
                if digits.is_empty() {
                    return Err(self.err(DiagnosticCode::MalformedNumber, "missing digits after radix prefix"));
                }
                if self.matches('n') {
                    self.push_literal(TokenKind::BigIntLiteral, TokenLiteral::BigInt(self.lexeme().to_string()));
                    return Ok(());
                }
                let value = u64::from_str_radix(&digits, radix)
                    .map(|v| v as f64)
                    .map_err(|_| self.err(DiagnosticCode::MalformedNumber, "numeric literal out of range"))?;
                self.push_literal(TokenKind::Number, TokenLiteral::Number(value));
                return Ok(());
            }
        }

        let mut is_float = first == '.';
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
            self.advance();
        }
        if !is_float && self.peek() == Some('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
                self.advance();
            }
        }
        if let Some('e' | 'E') = self.peek() {
            let mark = self.pos;
            self.advance();
            if matches!(self.peek(), Some('+' | '-')) {
                self.advance();
            }
            if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
                    self.advance();
                }
            } else {
                self.pos = mark;
            }
        }
        if !is_float && self.matches('n') {
            self.push_literal(TokenKind::BigIntLiteral, TokenLiteral::BigInt(self.lexeme().to_string()));
            return Ok(());
        }
        let cleaned: String = self.lexeme().chars().filter(|&c| c != '_').collect();
        let value: f64 = cleaned
            .parse()
            .map_err(|_| self.err(DiagnosticCode::MalformedNumber, format!("malformed number '{cleaned}'")))?;
        self.push_literal(TokenKind::Number, TokenLiteral::Number(value));
        Ok(())
    }

    fn scan_string(&mut self, quote: char) -> Result<(), Diagnostic> {
        let mut value = String::new();
        loop {
            match self.advance() {
                None => return Err(self.err(DiagnosticCode::UnterminatedString, "unterminated string literal")),
                Some('\n') => {
                    return Err(self.err(DiagnosticCode::UnterminatedString, "unterminated string literal"));
                }
                Some(c) if c == quote => break,
                Some('\\') => value.push_str(&self.scan_escape()?),
                Some(c) => value.push(c),
            }
        }
        self.push_literal(TokenKind::String, TokenLiteral::String(value));
        Ok(())
    }

    /// Scan template text after a `` ` `` or a substitution-closing `}` up to
    /// the next `${`, the closing backtick, or EOF.
    fn scan_template_part(&mut self) -> Result<(), Diagnostic> {
        let opener = self.source[self.start..].chars().next();
        let opened_by_backtick = opener == Some('`');
        let mut value = String::new();
        loop {
            match self.advance() {
                None => {
                    return Err(self.err(DiagnosticCode::UnterminatedTemplate, "unterminated template literal"));
                }
                Some('`') => {
                    let kind = if opened_by_backtick {
                        TokenKind::TemplateComplete
                    } else {
                        TokenKind::TemplateTail
                    };
                    self.push_literal(kind, TokenLiteral::String(value));
                    return Ok(());
                }
                Some('$') if self.peek() == Some('{') => {
                    self.advance();
                    self.templates.push(TemplateFrame { brace_depth: 0 });
                    let kind = if opened_by_backtick {
                        TokenKind::TemplateHead
                    } else {
                        TokenKind::TemplateMiddle
                    };
                    self.push_literal(kind, TokenLiteral::String(value));
                    return Ok(());
                }
                Some('\\') => value.push_str(&self.scan_escape()?),
                Some(c) => value.push(c),
            }
        }
    }

    fn scan_escape(&mut self) -> Result<String, Diagnostic> {
        let c = self
            .advance()
            .ok_or_else(|| self.err(DiagnosticCode::UnterminatedString, "unterminated escape sequence"))?;
        let s = match c {
            'n' => "\n".to_string(),
            't' => "\t".to_string(),
            'r' => "\r".to_string(),
            'b' => "\u{8}".to_string(),
            'f' => "\u{c}".to_string(),
            'v' => "\u{b}".to_string(),
            '0' => "\0".to_string(),
            '\n' => String::new(), // line continuation
            'x' => {
                let hex = self.take_hex_digits(2)?;
                char::from_u32(hex)
                    .map(|c| c.to_string())
                    .ok_or_else(|| self.err(DiagnosticCode::UnterminatedString, "invalid \\x escape"))?
            }
            'u' => {
                if self.matches('{') {
                    let mut hex = String::new();
                    while self.peek().is_some_and(|c| c != '}') {
                        hex.push(self.advance().unwrap());
                    }
                    if !self.matches('}') {
                        return Err(self.err(DiagnosticCode::UnterminatedString, "unterminated \\u{} escape"));
                    }
                    let code = u32::from_str_radix(&hex, 16)
                        .map_err(|_| self.err(DiagnosticCode::UnterminatedString, "invalid \\u{} escape"))?;
                    char::from_u32(code)
                        .map(|c| c.to_string())
                        .ok_or_else(|| self.err(DiagnosticCode::UnterminatedString, "invalid code point"))?
                } else {
                    let hex = self.take_hex_digits(4)?;
                    char::from_u32(hex)
                        .map(|c| c.to_string())
                        .ok_or_else(|| self.err(DiagnosticCode::UnterminatedString, "invalid \\u escape"))?
                }
            }
            other => other.to_string(),
        };
        Ok(s)
    }

    fn take_hex_digits(&mut self, count: usize) -> Result<u32, Diagnostic> {
        let mut value = 0u32;
        for _ in 0..count {
            let c = self
                .advance()
                .filter(|c| c.is_ascii_hexdigit())
                .ok_or_else(|| self.err(DiagnosticCode::UnterminatedString, "invalid hex escape"))?;
            value = value * 16 + c.to_digit(16).unwrap();
        }
        Ok(value)
    }

    fn scan_regex(&mut self) -> Result<(), Diagnostic> {
        let mut in_class = false;
        loop {
            match self.advance() {
                None | Some('\n') => {
                    return Err(self.err(DiagnosticCode::UnterminatedRegex, "unterminated regex literal"));
                }
                Some('\\') => {
                    self.advance();
                }
                Some('[') => in_class = true,
                Some(']') => in_class = false,
                Some('/') if !in_class => break,
                Some(_) => {}
            }
        }
        while self.peek().is_some_and(|c| c.is_ascii_alphabetic()) {
            self.advance();
        }
        let lexeme = self.lexeme().to_string();
        self.push_literal(TokenKind::Regex, TokenLiteral::String(lexeme));
        Ok(())
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Scanner::new(source)
            .scan_tokens()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn scans_keywords_and_identifiers() {
        assert_eq!(
            kinds("const x = foo;"),
            vec![
                TokenKind::Const,
                TokenKind::Identifier,
                TokenKind::Equal,
                TokenKind::Identifier,
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn scans_numeric_forms() {
        let tokens = Scanner::new("1 2.5 1e3 0xff 0b101 1_000").scan_tokens().unwrap();
        let values: Vec<f64> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Number)
            .map(|t| t.number_value())
            .collect();
        assert_eq!(values, vec![1.0, 2.5, 1000.0, 255.0, 5.0, 1000.0]);
    }

    #[test]
    fn scans_bigint() {
        let tokens = Scanner::new("42n").scan_tokens().unwrap();
        assert_eq!(tokens[0].kind, TokenKind::BigIntLiteral);
        assert_eq!(tokens[0].literal, Some(TokenLiteral::BigInt("42n".to_string())));
    }

    #[test]
    fn scans_string_escapes() {
        let tokens = Scanner::new(r#""a\nbA""#).scan_tokens().unwrap();
        assert_eq!(tokens[0].string_value(), "a\nbA");
    }

    #[test]
    fn template_with_substitution_splits_into_parts() {
        assert_eq!(
            kinds("`a${x}b`"),
            vec![
                TokenKind::TemplateHead,
                TokenKind::Identifier,
                TokenKind::TemplateTail,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn template_substitution_may_contain_braces() {
        assert_eq!(
            kinds("`v=${ {x: 1}.x }!`"),
            vec![
                TokenKind::TemplateHead,
                TokenKind::LeftBrace,
                TokenKind::Identifier,
                TokenKind::Colon,
                TokenKind::Number,
                TokenKind::RightBrace,
                TokenKind::Dot,
                TokenKind::Identifier,
                TokenKind::TemplateTail,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn slash_after_expression_is_division() {
        assert_eq!(
            kinds("a / b"),
            vec![TokenKind::Identifier, TokenKind::Slash, TokenKind::Identifier, TokenKind::Eof]
        );
    }

    #[test]
    fn slash_in_expression_position_is_regex() {
        let tokens = Scanner::new("x = /ab+c/gi").scan_tokens().unwrap();
        assert_eq!(tokens[2].kind, TokenKind::Regex);
        assert_eq!(tokens[2].lexeme, "/ab+c/gi");
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = Scanner::new("\"abc").scan_tokens().unwrap_err();
        assert_eq!(err.code, DiagnosticCode::UnterminatedString);
    }

    #[test]
    fn tracks_lines() {
        let tokens = Scanner::new("a\nb\nc").scan_tokens().unwrap();
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[1].line, 2);
        assert_eq!(tokens[2].line, 3);
    }
}
