//! The parser.
//!
//! Recursive descent for statements and declarations; Pratt-style precedence
//! for expressions (`expr.rs`); a separate precedence ladder for type
//! annotations (`type_ann.rs`).
//!
//! Desugaring done here so both backends agree on meaning:
//! - destructuring parameters and variable declarations become synthetic
//!   `_paramN` / `_destN` names plus a prologue of plain bindings;
//! - constructor parameter properties become `this.x = x` prologue
//!   assignments;
//! - directive prologues mark the enclosing function or program strict, and
//!   strictness propagates into nested function bodies.

mod expr;
mod type_ann;

use std::rc::Rc;

use tracing::debug;
use tsr_common::{Diagnostic, DiagnosticCode};
use tsr_scanner::{Scanner, Token, TokenKind, TokenLiteral};

use crate::ast::*;
use crate::types::{TypeExpr, TypeParamDecl};

pub(crate) type PResult<T> = Result<T, Diagnostic>;

/// A binding pattern, before desugaring.
pub(crate) enum Pattern {
    Name(String, Option<TypeExpr>),
    Array {
        /// `None` marks a hole (`[, x]`).
        elements: Vec<Option<(Pattern, Option<Expr>)>>,
        rest: Option<Box<Pattern>>,
    },
    Object {
        /// `(key, binding, default)`.
        props: Vec<(String, Pattern, Option<Expr>)>,
    },
}

impl Pattern {
    fn is_name(&self) -> bool {
        matches!(self, Pattern::Name(..))
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    next_node_id: u32,
    next_synthetic: u32,
    strict: bool,
    /// Active labels with whether they name a loop.
    labels: Vec<(String, bool)>,
    loop_depth: u32,
    switch_depth: u32,
    in_class: bool,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            pos: 0,
            next_node_id: 0,
            next_synthetic: 0,
            strict: false,
            labels: Vec::new(),
            loop_depth: 0,
            switch_depth: 0,
            in_class: false,
        }
    }

    /// Scan and parse a whole program.
    pub fn parse_source(source: &str) -> PResult<Vec<Stmt>> {
        let tokens = Scanner::new(source).scan_tokens()?;
        Parser::new(tokens).parse_program()
    }

    /// Parse a program: a directive prologue followed by statements.
    pub fn parse_program(&mut self) -> PResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        self.parse_directives(&mut stmts)?;
        while !self.at(TokenKind::Eof) {
            stmts.push(self.statement()?);
        }
        debug!(statements = stmts.len(), "parsed program");
        Ok(stmts)
    }

    // =========================================================================
    // Token plumbing
    // =========================================================================

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_ahead(&self, n: usize) -> &Token {
        let idx = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.pos.saturating_sub(1)]
    }

    pub(crate) fn current_token_mut(&mut self) -> &mut Token {
        &mut self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> PResult<Token> {
        if self.at(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(format!("expected {what}, found '{}'", self.peek().lexeme)))
        }
    }

    fn error(&self, message: impl Into<String>) -> Diagnostic {
        Diagnostic::error(DiagnosticCode::SyntaxError, message, self.peek().span)
    }

    fn error_at(&self, token: &Token, code: DiagnosticCode, message: impl Into<String>) -> Diagnostic {
        Diagnostic::error(code, message, token.span)
    }

    fn line(&self) -> u32 {
        self.peek().line
    }

    pub(crate) fn mk_expr(&mut self, line: u32, kind: ExprKind) -> Expr {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        let span = self.previous().span;
        Expr { id, line, span, kind }
    }

    fn synthetic_name(&mut self, prefix: &str) -> String {
        let n = self.next_synthetic;
        self.next_synthetic += 1;
        format!("{prefix}{n}")
    }

    /// Whether the current token can serve as an identifier (contextual
    /// keywords included).
    pub(crate) fn at_ident(&self) -> bool {
        self.at(TokenKind::Identifier) || self.peek().kind.is_contextual_keyword()
    }

    /// Consume an identifier-like token and return its text.
    pub(crate) fn ident_name(&mut self, what: &str) -> PResult<String> {
        if self.at_ident() {
            Ok(self.advance().lexeme)
        } else {
            Err(self.error(format!("expected {what}, found '{}'", self.peek().lexeme)))
        }
    }

    /// Consume a property name: identifier, any keyword, string or number.
    fn property_name(&mut self) -> PResult<String> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::String => {
                self.advance();
                Ok(token.string_value().to_string())
            }
            TokenKind::Number => {
                self.advance();
                Ok(crate::parser::expr::number_to_key(token.number_value()))
            }
            TokenKind::Eof => Err(self.error("expected property name")),
            _ if !token.lexeme.is_empty() && token.lexeme.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$') => {
                self.advance();
                Ok(token.lexeme)
            }
            _ => Err(self.error("expected property name")),
        }
    }

    /// Statement terminator: `;`, or implied before `}` / EOF / a line break.
    fn end_statement(&mut self) -> PResult<()> {
        if self.matches(TokenKind::Semicolon) {
            return Ok(());
        }
        if self.at(TokenKind::RightBrace) || self.at(TokenKind::Eof) {
            return Ok(());
        }
        if self.peek().line > self.previous().line {
            return Ok(());
        }
        Err(self.error(format!("expected ';' before '{}'", self.peek().lexeme)))
    }

    // =========================================================================
    // Directives
    // =========================================================================

    /// Parse a leading run of string-expression statements as directives and
    /// set strict mode if one is `"use strict"`.
    fn parse_directives(&mut self, out: &mut Vec<Stmt>) -> PResult<()> {
        while self.at(TokenKind::String) {
            // Only a bare string statement is a directive; `"s".length` is not.
            let next = self.peek_ahead(1).kind;
            let terminated = matches!(next, TokenKind::Semicolon | TokenKind::RightBrace | TokenKind::Eof)
                || self.peek_ahead(1).line > self.peek().line;
            if !terminated {
                break;
            }
            let token = self.advance();
            let text = token.string_value().to_string();
            if text == "use strict" {
                self.strict = true;
            }
            let _ = self.matches(TokenKind::Semicolon);
            out.push(Stmt::new(token.line, StmtKind::Directive(text)));
        }
        Ok(())
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn statement(&mut self) -> PResult<Stmt> {
        let line = self.line();
        match self.peek().kind {
            TokenKind::Var | TokenKind::Let => self.var_statement(false),
            TokenKind::Const => {
                if self.peek_ahead(1).kind == TokenKind::Enum {
                    self.advance();
                    self.enum_statement(true)
                } else {
                    self.var_statement(true)
                }
            }
            TokenKind::Using => {
                // `using` is contextual: only a declaration when followed by
                // a name and `=`.
                if self.at_decl_name_eq() {
                    self.using_statement()
                } else {
                    self.expression_statement()
                }
            }
            TokenKind::Function => {
                self.advance();
                let func = self.function_rest(true, false)?;
                Ok(Stmt::new(line, StmtKind::Function(func)))
            }
            TokenKind::Async if self.peek_ahead(1).kind == TokenKind::Function => {
                self.advance();
                self.advance();
                let func = self.function_rest(true, true)?;
                Ok(Stmt::new(line, StmtKind::Function(func)))
            }
            TokenKind::Class => self.class_statement(false),
            TokenKind::Abstract if self.peek_ahead(1).kind == TokenKind::Class => {
                self.advance();
                self.class_statement(true)
            }
            TokenKind::Interface if self.peek_ahead(1).kind == TokenKind::Identifier => self.interface_statement(),
            TokenKind::Enum => self.enum_statement(false),
            TokenKind::Type if self.at_type_alias() => self.type_alias_statement(),
            TokenKind::Namespace if self.peek_ahead(1).kind == TokenKind::Identifier => self.namespace_statement(),
            TokenKind::Import => self.import_statement(),
            TokenKind::Export => {
                self.advance();
                let inner = self.statement()?;
                Ok(Stmt::new(line, StmtKind::Export(Box::new(inner))))
            }
            TokenKind::Declare => self.declare_statement(),
            TokenKind::LeftBrace => {
                self.advance();
                let body = self.block_body()?;
                Ok(Stmt::new(line, StmtKind::Block(body)))
            }
            TokenKind::If => self.if_statement(),
            TokenKind::While => self.while_statement(),
            TokenKind::Do => self.do_while_statement(),
            TokenKind::For => self.for_statement(),
            TokenKind::Return => {
                self.advance();
                let value = if self.at(TokenKind::Semicolon)
                    || self.at(TokenKind::RightBrace)
                    || self.at(TokenKind::Eof)
                    || self.peek().line > line
                {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.end_statement()?;
                Ok(Stmt::new(line, StmtKind::Return(value)))
            }
            TokenKind::Break => {
                self.advance();
                let label = self.break_continue_label(true)?;
                self.end_statement()?;
                Ok(Stmt::new(line, StmtKind::Break(label)))
            }
            TokenKind::Continue => {
                self.advance();
                let label = self.break_continue_label(false)?;
                self.end_statement()?;
                Ok(Stmt::new(line, StmtKind::Continue(label)))
            }
            TokenKind::Switch => self.switch_statement(),
            TokenKind::Try => self.try_statement(),
            TokenKind::Throw => {
                self.advance();
                let value = self.expression()?;
                self.end_statement()?;
                Ok(Stmt::new(line, StmtKind::Throw(value)))
            }
            TokenKind::Semicolon => {
                self.advance();
                Ok(Stmt::new(line, StmtKind::Sequence(Vec::new())))
            }
            TokenKind::Identifier if self.peek_ahead(1).kind == TokenKind::Colon => {
                self.labeled_statement()
            }
            _ => self.expression_statement(),
        }
    }

    fn at_decl_name_eq(&self) -> bool {
        let next = self.peek_ahead(1);
        (next.kind == TokenKind::Identifier || next.kind.is_contextual_keyword())
            && self.peek_ahead(2).kind == TokenKind::Equal
    }

    fn at_type_alias(&self) -> bool {
        let next = self.peek_ahead(1);
        next.kind == TokenKind::Identifier || next.kind.is_contextual_keyword()
    }

    fn expression_statement(&mut self) -> PResult<Stmt> {
        let line = self.line();
        let expr = self.expression()?;
        self.end_statement()?;
        Ok(Stmt::new(line, StmtKind::Expression(expr)))
    }

    fn labeled_statement(&mut self) -> PResult<Stmt> {
        let line = self.line();
        let label_token = self.advance();
        let label = label_token.lexeme.clone();
        self.expect(TokenKind::Colon, "':' after label")?;
        let is_loop = matches!(
            self.peek().kind,
            TokenKind::While | TokenKind::Do | TokenKind::For
        );
        if self.labels.iter().any(|(name, _)| name == &label) {
            return Err(self.error_at(
                &label_token,
                DiagnosticCode::InvalidLabel,
                format!("label '{label}' is already in scope"),
            ));
        }
        self.labels.push((label.clone(), is_loop));
        let body = self.statement();
        self.labels.pop();
        Ok(Stmt::new(line, StmtKind::Labeled { label, body: Box::new(body?) }))
    }

    fn break_continue_label(&mut self, is_break: bool) -> PResult<Option<String>> {
        if self.at(TokenKind::Identifier) && self.peek().line == self.previous().line {
            let token = self.advance();
            let label = token.lexeme.clone();
            match self.labels.iter().find(|(name, _)| name == &label) {
                None => Err(self.error_at(
                    &token,
                    DiagnosticCode::InvalidLabel,
                    format!("unknown label '{label}'"),
                )),
                Some((_, is_loop)) => {
                    if !is_break && !is_loop {
                        Err(self.error_at(
                            &token,
                            DiagnosticCode::InvalidLabel,
                            format!("cannot 'continue' to non-loop label '{label}'"),
                        ))
                    } else {
                        Ok(Some(label))
                    }
                }
            }
        } else {
            let ok = if is_break {
                self.loop_depth > 0 || self.switch_depth > 0
            } else {
                self.loop_depth > 0
            };
            if !ok {
                let what = if is_break { "break" } else { "continue" };
                return Err(self.error(format!("'{what}' outside of a loop")));
            }
            Ok(None)
        }
    }

    fn block_body(&mut self) -> PResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        while !self.at(TokenKind::RightBrace) && !self.at(TokenKind::Eof) {
            stmts.push(self.statement()?);
        }
        self.expect(TokenKind::RightBrace, "'}'")?;
        Ok(stmts)
    }

    // =========================================================================
    // Declarations
    // =========================================================================

    fn var_statement(&mut self, is_const: bool) -> PResult<Stmt> {
        let line = self.line();
        self.advance(); // var/let/const
        let mut decls: Vec<Stmt> = Vec::new();
        loop {
            let decl = self.var_declarator(is_const, line)?;
            decls.push(decl);
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.end_statement()?;
        if decls.len() == 1 {
            Ok(decls.pop().unwrap())
        } else {
            Ok(Stmt::new(line, StmtKind::Sequence(decls)))
        }
    }

    fn var_declarator(&mut self, is_const: bool, line: u32) -> PResult<Stmt> {
        if self.at(TokenKind::LeftBracket) || self.at(TokenKind::LeftBrace) {
            let pattern = self.binding_pattern()?;
            self.expect(TokenKind::Equal, "'=' after destructuring pattern")?;
            let init = self.assignment()?;
            let temp = self.synthetic_name("_dest");
            let mut stmts = vec![Stmt::new(
                line,
                StmtKind::Var { name: temp.clone(), type_ann: None, init: Some(init) },
            )];
            let source = self.mk_expr(line, ExprKind::Variable(temp));
            self.desugar_pattern(&pattern, source, is_const, line, &mut stmts)?;
            return Ok(Stmt::new(line, StmtKind::Sequence(stmts)));
        }

        let name = self.ident_name("variable name")?;
        let type_ann = if self.matches(TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        if is_const {
            self.expect(TokenKind::Equal, "'=' after const name")?;
            let init = self.assignment()?;
            Ok(Stmt::new(line, StmtKind::Const { name, type_ann, init }))
        } else {
            let init = if self.matches(TokenKind::Equal) {
                Some(self.assignment()?)
            } else {
                None
            };
            Ok(Stmt::new(line, StmtKind::Var { name, type_ann, init }))
        }
    }

    fn using_statement(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance(); // using
        let name = self.ident_name("binding name after 'using'")?;
        self.expect(TokenKind::Equal, "'=' after using name")?;
        let init = self.assignment()?;
        self.end_statement()?;
        Ok(Stmt::new(line, StmtKind::Using { name, init }))
    }

    fn type_alias_statement(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance(); // type
        let name = self.ident_name("type alias name")?;
        let type_params = self.type_params_opt()?;
        self.expect(TokenKind::Equal, "'=' in type alias")?;
        let target = self.parse_type()?;
        self.end_statement()?;
        Ok(Stmt::new(line, StmtKind::TypeAlias { name, type_params, target }))
    }

    fn enum_statement(&mut self, is_const: bool) -> PResult<Stmt> {
        let line = self.line();
        self.expect(TokenKind::Enum, "'enum'")?;
        let name = self.ident_name("enum name")?;
        self.expect(TokenKind::LeftBrace, "'{' after enum name")?;
        let mut members = Vec::new();
        while !self.at(TokenKind::RightBrace) {
            let member_line = self.line();
            let member_name = self.property_name()?;
            let init = if self.matches(TokenKind::Equal) {
                Some(self.assignment()?)
            } else {
                None
            };
            members.push(EnumMember { name: member_name, init, line: member_line });
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightBrace, "'}' after enum members")?;
        Ok(Stmt::new(
            line,
            StmtKind::Enum(EnumDecl { name, members, is_const, line }),
        ))
    }

    fn namespace_statement(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance(); // namespace
        let name = self.ident_name("namespace name")?;
        self.expect(TokenKind::LeftBrace, "'{' after namespace name")?;
        let body = self.block_body()?;
        Ok(Stmt::new(line, StmtKind::Namespace { name, body }))
    }

    fn import_statement(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance(); // import

        // Dynamic import as an expression statement: `import("...")...`
        if self.at(TokenKind::LeftParen) {
            self.advance();
            let arg = self.expression()?;
            self.expect(TokenKind::RightParen, "')' after import argument")?;
            let call = self.mk_expr(line, ExprKind::DynamicImport(Box::new(arg)));
            let expr = self.finish_postfix(call)?;
            self.end_statement()?;
            return Ok(Stmt::new(line, StmtKind::Expression(expr)));
        }

        // `import A = Some.Path;`
        if self.at_ident() && self.peek_ahead(1).kind == TokenKind::Equal {
            let name = self.ident_name("import alias name")?;
            self.advance(); // =
            let mut target = vec![self.ident_name("qualified name")?];
            while self.matches(TokenKind::Dot) {
                target.push(self.ident_name("qualified name")?);
            }
            self.end_statement()?;
            return Ok(Stmt::new(line, StmtKind::ImportAlias { name, target }));
        }

        // `import * as ns from "path";`
        if self.matches(TokenKind::Star) {
            self.expect(TokenKind::As, "'as' after '*'")?;
            let ns = self.ident_name("namespace import name")?;
            self.expect(TokenKind::From, "'from'")?;
            let path_token = self.expect(TokenKind::String, "module path string")?;
            self.end_statement()?;
            return Ok(Stmt::new(
                line,
                StmtKind::Import {
                    specs: Vec::new(),
                    namespace: Some(ns),
                    path: path_token.string_value().to_string(),
                },
            ));
        }

        // `import { a, b as c } from "path";`
        self.expect(TokenKind::LeftBrace, "'{' after 'import'")?;
        let mut specs = Vec::new();
        while !self.at(TokenKind::RightBrace) {
            let name = self.ident_name("import name")?;
            let alias = if self.matches(TokenKind::As) {
                Some(self.ident_name("import alias")?)
            } else {
                None
            };
            specs.push(ImportSpec { name, alias });
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightBrace, "'}' after import list")?;
        self.expect(TokenKind::From, "'from'")?;
        let path_token = self.expect(TokenKind::String, "module path string")?;
        self.end_statement()?;
        Ok(Stmt::new(
            line,
            StmtKind::Import {
                specs,
                namespace: None,
                path: path_token.string_value().to_string(),
            },
        ))
    }

    fn declare_statement(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance(); // declare
        if self.at(TokenKind::Global) {
            self.advance();
            self.expect(TokenKind::LeftBrace, "'{' after 'declare global'")?;
            let body = self.block_body()?;
            return Ok(Stmt::new(line, StmtKind::DeclareGlobal { body }));
        }
        if self.at(TokenKind::Identifier) && self.peek().lexeme == "module" {
            self.advance();
            let name_token = self.expect(TokenKind::String, "module name string")?;
            self.expect(TokenKind::LeftBrace, "'{' after module name")?;
            let body = self.block_body()?;
            return Ok(Stmt::new(
                line,
                StmtKind::DeclareModule { name: name_token.string_value().to_string(), body },
            ));
        }
        // `declare function/const/let/class ...` — ambient declaration; parse
        // the declaration and treat it as global ambient context.
        let inner = self.statement()?;
        Ok(Stmt::new(line, StmtKind::DeclareGlobal { body: vec![inner] }))
    }

    // =========================================================================
    // Control flow
    // =========================================================================

    fn if_statement(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance();
        self.expect(TokenKind::LeftParen, "'(' after 'if'")?;
        let cond = self.expression()?;
        self.expect(TokenKind::RightParen, "')' after if condition")?;
        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.matches(TokenKind::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Stmt::new(line, StmtKind::If { cond, then_branch, else_branch }))
    }

    fn while_statement(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance();
        self.expect(TokenKind::LeftParen, "'(' after 'while'")?;
        let cond = self.expression()?;
        self.expect(TokenKind::RightParen, "')' after while condition")?;
        self.loop_depth += 1;
        let body = self.statement();
        self.loop_depth -= 1;
        Ok(Stmt::new(line, StmtKind::While { cond, body: Box::new(body?) }))
    }

    fn do_while_statement(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance();
        self.loop_depth += 1;
        let body = self.statement();
        self.loop_depth -= 1;
        let body = body?;
        self.expect(TokenKind::While, "'while' after do body")?;
        self.expect(TokenKind::LeftParen, "'(' after 'while'")?;
        let cond = self.expression()?;
        self.expect(TokenKind::RightParen, "')' after do-while condition")?;
        self.end_statement()?;
        Ok(Stmt::new(line, StmtKind::DoWhile { body: Box::new(body), cond }))
    }

    fn for_statement(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance(); // for
        let is_await = self.matches(TokenKind::Await);
        self.expect(TokenKind::LeftParen, "'(' after 'for'")?;

        // for-of with a destructuring pattern: bind through a synthetic
        // name, desugared at the top of the body.
        if matches!(self.peek().kind, TokenKind::Let | TokenKind::Const | TokenKind::Var)
            && matches!(self.peek_ahead(1).kind, TokenKind::LeftBracket | TokenKind::LeftBrace)
        {
            self.advance(); // let/const/var
            let pattern = self.binding_pattern()?;
            self.expect(TokenKind::Of, "'of' after destructuring loop pattern")?;
            let iterable = self.expression()?;
            self.expect(TokenKind::RightParen, "')' after for-of")?;
            let synthetic = self.synthetic_name("_dest");
            let source = self.mk_expr(line, ExprKind::Variable(synthetic.clone()));
            let mut prologue = Vec::new();
            self.desugar_pattern(&pattern, source, false, line, &mut prologue)?;
            self.loop_depth += 1;
            let body = self.statement();
            self.loop_depth -= 1;
            let mut block = prologue;
            block.push(body?);
            return Ok(Stmt::new(
                line,
                StmtKind::ForOf {
                    name: synthetic,
                    iterable,
                    body: Box::new(Stmt::new(line, StmtKind::Block(block))),
                    is_await,
                },
            ));
        }

        // for-of / for-in with a declaration keyword.
        if matches!(self.peek().kind, TokenKind::Let | TokenKind::Const | TokenKind::Var)
            && (self.peek_ahead(2).kind == TokenKind::Of || self.peek_ahead(2).kind == TokenKind::In)
        {
            self.advance(); // let/const/var
            let name = self.ident_name("loop variable")?;
            if self.matches(TokenKind::Of) {
                let iterable = self.expression()?;
                self.expect(TokenKind::RightParen, "')' after for-of")?;
                self.loop_depth += 1;
                let body = self.statement();
                self.loop_depth -= 1;
                return Ok(Stmt::new(
                    line,
                    StmtKind::ForOf { name, iterable, body: Box::new(body?), is_await },
                ));
            }
            self.expect(TokenKind::In, "'in' or 'of'")?;
            let object = self.expression()?;
            self.expect(TokenKind::RightParen, "')' after for-in")?;
            self.loop_depth += 1;
            let body = self.statement();
            self.loop_depth -= 1;
            return Ok(Stmt::new(
                line,
                StmtKind::ForIn { name, object, body: Box::new(body?) },
            ));
        }

        if is_await {
            return Err(self.error("'for await' requires an 'of' loop"));
        }

        // Classic C-style for.
        let init = if self.matches(TokenKind::Semicolon) {
            None
        } else if matches!(self.peek().kind, TokenKind::Let | TokenKind::Const | TokenKind::Var) {
            Some(Box::new(self.var_statement(self.at(TokenKind::Const))?))
        } else {
            let stmt = self.expression_statement()?;
            Some(Box::new(stmt))
        };
        let cond = if self.at(TokenKind::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(TokenKind::Semicolon, "';' after for condition")?;
        let update = if self.at(TokenKind::RightParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(TokenKind::RightParen, "')' after for clauses")?;
        self.loop_depth += 1;
        let body = self.statement();
        self.loop_depth -= 1;
        Ok(Stmt::new(
            line,
            StmtKind::For { init, cond, update, body: Box::new(body?) },
        ))
    }

    fn switch_statement(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance();
        self.expect(TokenKind::LeftParen, "'(' after 'switch'")?;
        let discriminant = self.expression()?;
        self.expect(TokenKind::RightParen, "')' after switch discriminant")?;
        self.expect(TokenKind::LeftBrace, "'{' to open switch body")?;
        self.switch_depth += 1;
        let mut cases = Vec::new();
        let result: PResult<()> = (|| {
            let mut seen_default = false;
            while !self.at(TokenKind::RightBrace) && !self.at(TokenKind::Eof) {
                let test = if self.matches(TokenKind::Case) {
                    let test = self.expression()?;
                    Some(test)
                } else {
                    self.expect(TokenKind::Default, "'case' or 'default'")?;
                    if seen_default {
                        return Err(self.error("multiple 'default' clauses in switch"));
                    }
                    seen_default = true;
                    None
                };
                self.expect(TokenKind::Colon, "':' after case")?;
                let mut body = Vec::new();
                while !self.at(TokenKind::Case)
                    && !self.at(TokenKind::Default)
                    && !self.at(TokenKind::RightBrace)
                    && !self.at(TokenKind::Eof)
                {
                    body.push(self.statement()?);
                }
                cases.push(SwitchCase { test, body });
            }
            Ok(())
        })();
        self.switch_depth -= 1;
        result?;
        self.expect(TokenKind::RightBrace, "'}' to close switch body")?;
        Ok(Stmt::new(line, StmtKind::Switch { discriminant, cases }))
    }

    fn try_statement(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance();
        self.expect(TokenKind::LeftBrace, "'{' after 'try'")?;
        let try_block = self.block_body()?;
        let mut catch_param = None;
        let mut catch_block = None;
        if self.matches(TokenKind::Catch) {
            if self.matches(TokenKind::LeftParen) {
                catch_param = Some(self.ident_name("catch parameter")?);
                if self.matches(TokenKind::Colon) {
                    let _ = self.parse_type()?;
                }
                self.expect(TokenKind::RightParen, "')' after catch parameter")?;
            }
            self.expect(TokenKind::LeftBrace, "'{' after 'catch'")?;
            catch_block = Some(self.block_body()?);
        }
        let finally_block = if self.matches(TokenKind::Finally) {
            self.expect(TokenKind::LeftBrace, "'{' after 'finally'")?;
            Some(self.block_body()?)
        } else {
            None
        };
        if catch_block.is_none() && finally_block.is_none() {
            return Err(self.error("'try' requires 'catch' or 'finally'"));
        }
        Ok(Stmt::new(
            line,
            StmtKind::TryCatch { try_block, catch_param, catch_block, finally_block },
        ))
    }

    // =========================================================================
    // Functions
    // =========================================================================

    /// Parse the remainder of a function after `function` (and `async`):
    /// optional `*`, name, type parameters, parameters, return type, body.
    fn function_rest(&mut self, named: bool, is_async: bool) -> PResult<Rc<FunctionDecl>> {
        let line = self.previous().line;
        let is_generator = self.matches(TokenKind::Star);
        let name = if named { Some(self.ident_name("function name")?) } else { None };
        let type_params = self.type_params_opt()?;
        let (params, prologue) = self.param_list(false)?;
        let return_type = if self.matches(TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        // Overload signature: declaration terminated without a body.
        if !self.at(TokenKind::LeftBrace) {
            self.end_statement()?;
            return Ok(Rc::new(FunctionDecl {
                name,
                type_params,
                params,
                return_type,
                body: None,
                is_async,
                is_generator,
                is_arrow: false,
                is_strict: self.strict,
                line,
            }));
        }
        let body = self.function_body(prologue, &params)?;
        Ok(Rc::new(FunctionDecl {
            name,
            type_params,
            params,
            return_type,
            body: Some(body.0),
            is_async,
            is_generator,
            is_arrow: false,
            is_strict: body.1,
            line,
        }))
    }

    /// Parse `{ body }`, prepending a desugaring prologue and handling the
    /// directive prologue and strict-mode validation. Returns the body and
    /// whether it is strict.
    pub(crate) fn function_body(
        &mut self,
        prologue: Vec<Stmt>,
        params: &[Param],
    ) -> PResult<(Vec<Stmt>, bool)> {
        self.expect(TokenKind::LeftBrace, "'{' to open function body")?;
        let outer_strict = self.strict;
        let outer_labels = std::mem::take(&mut self.labels);
        let outer_loop = std::mem::replace(&mut self.loop_depth, 0);
        let outer_switch = std::mem::replace(&mut self.switch_depth, 0);

        let mut stmts = Vec::new();
        let result: PResult<()> = (|| {
            self.parse_directives(&mut stmts)?;
            self.validate_params(params)?;
            let directive_count = stmts.len();
            stmts.extend(prologue);
            // Keep directives in front, then the synthetic prologue.
            let _ = directive_count;
            while !self.at(TokenKind::RightBrace) && !self.at(TokenKind::Eof) {
                stmts.push(self.statement()?);
            }
            Ok(())
        })();
        let strict = self.strict;
        self.strict = outer_strict;
        self.labels = outer_labels;
        self.loop_depth = outer_loop;
        self.switch_depth = outer_switch;
        result?;
        self.expect(TokenKind::RightBrace, "'}' to close function body")?;
        Ok((stmts, strict))
    }

    /// Duplicate parameter names are a syntax error in strict mode.
    /// Synthetic destructuring parameters are exempt.
    fn validate_params(&self, params: &[Param]) -> PResult<()> {
        if !self.strict {
            return Ok(());
        }
        for (i, p) in params.iter().enumerate() {
            if p.name.starts_with("_param") {
                continue;
            }
            if params[..i].iter().any(|q| q.name == p.name) {
                return Err(Diagnostic::error(
                    DiagnosticCode::DuplicateParameter,
                    format!("duplicate parameter name '{}' in strict mode", p.name),
                    self.peek().span,
                ));
            }
        }
        Ok(())
    }

    /// Parse a parenthesized parameter list. Returns the parameters plus the
    /// prologue statements generated by destructuring and parameter
    /// properties.
    pub(crate) fn param_list(&mut self, in_constructor: bool) -> PResult<(Vec<Param>, Vec<Stmt>)> {
        self.expect(TokenKind::LeftParen, "'(' to open parameter list")?;
        let mut params = Vec::new();
        let mut prologue = Vec::new();
        while !self.at(TokenKind::RightParen) {
            self.parse_param(in_constructor, &mut params, &mut prologue)?;
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightParen, "')' to close parameter list")?;
        Ok((params, prologue))
    }

    fn parse_param(
        &mut self,
        in_constructor: bool,
        params: &mut Vec<Param>,
        prologue: &mut Vec<Stmt>,
    ) -> PResult<()> {
        let line = self.line();
        let is_rest = self.matches(TokenKind::DotDotDot);

        let mut access = None;
        let mut readonly = false;
        if in_constructor {
            access = match self.peek().kind {
                TokenKind::Public => { self.advance(); Some(AccessModifier::Public) }
                TokenKind::Private => { self.advance(); Some(AccessModifier::Private) }
                TokenKind::Protected => { self.advance(); Some(AccessModifier::Protected) }
                _ => None,
            };
            if self.at(TokenKind::Readonly) {
                self.advance();
                readonly = true;
            }
        }

        // Destructuring parameter: synthesize a name, bind in the prologue.
        if self.at(TokenKind::LeftBracket) || self.at(TokenKind::LeftBrace) {
            let pattern = self.binding_pattern()?;
            let synthetic = self.synthetic_name("_param");
            let type_ann = if self.matches(TokenKind::Colon) {
                Some(self.parse_type()?)
            } else {
                None
            };
            let default = if self.matches(TokenKind::Equal) {
                Some(self.assignment()?)
            } else {
                None
            };
            let source = self.mk_expr(line, ExprKind::Variable(synthetic.clone()));
            self.desugar_pattern(&pattern, source, false, line, prologue)?;
            params.push(Param {
                name: synthetic,
                type_ann,
                default,
                is_rest,
                optional: false,
                access: None,
                readonly: false,
            });
            return Ok(());
        }

        let name = self.ident_name("parameter name")?;
        let optional = self.matches(TokenKind::Question);
        let type_ann = if self.matches(TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        let default = if self.matches(TokenKind::Equal) {
            Some(self.assignment()?)
        } else {
            None
        };

        // Parameter property: prologue `this.x = x`.
        if access.is_some() || readonly {
            let this = self.mk_expr(line, ExprKind::This);
            let value = self.mk_expr(line, ExprKind::Variable(name.clone()));
            let assign = self.mk_expr(
                line,
                ExprKind::Set { object: Box::new(this), name: name.clone(), value: Box::new(value) },
            );
            prologue.push(Stmt::new(line, StmtKind::Expression(assign)));
        }

        params.push(Param { name, type_ann, default, is_rest, optional, access, readonly });
        Ok(())
    }

    // =========================================================================
    // Binding patterns
    // =========================================================================

    fn binding_pattern(&mut self) -> PResult<Pattern> {
        if self.matches(TokenKind::LeftBracket) {
            let mut elements = Vec::new();
            let mut rest = None;
            while !self.at(TokenKind::RightBracket) {
                if self.matches(TokenKind::Comma) {
                    elements.push(None);
                    continue;
                }
                if self.matches(TokenKind::DotDotDot) {
                    rest = Some(Box::new(self.binding_target()?));
                    break;
                }
                let target = self.binding_target()?;
                let default = if self.matches(TokenKind::Equal) {
                    Some(self.assignment()?)
                } else {
                    None
                };
                elements.push(Some((target, default)));
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::RightBracket, "']' to close array pattern")?;
            return Ok(Pattern::Array { elements, rest });
        }

        self.expect(TokenKind::LeftBrace, "'{' to open object pattern")?;
        let mut props = Vec::new();
        while !self.at(TokenKind::RightBrace) {
            let key = self.property_name()?;
            let binding = if self.matches(TokenKind::Colon) {
                self.binding_target()?
            } else {
                Pattern::Name(key.clone(), None)
            };
            let default = if self.matches(TokenKind::Equal) {
                Some(self.assignment()?)
            } else {
                None
            };
            props.push((key, binding, default));
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightBrace, "'}' to close object pattern")?;
        Ok(Pattern::Object { props })
    }

    fn binding_target(&mut self) -> PResult<Pattern> {
        if self.at(TokenKind::LeftBracket) || self.at(TokenKind::LeftBrace) {
            self.binding_pattern()
        } else {
            let name = self.ident_name("binding name")?;
            let ty = if self.matches(TokenKind::Colon) {
                Some(self.parse_type()?)
            } else {
                None
            };
            Ok(Pattern::Name(name, ty))
        }
    }

    /// Expand a pattern into `let` bindings reading from `source`.
    fn desugar_pattern(
        &mut self,
        pattern: &Pattern,
        source: Expr,
        is_const: bool,
        line: u32,
        out: &mut Vec<Stmt>,
    ) -> PResult<()> {
        match pattern {
            Pattern::Name(name, ty) => {
                if is_const {
                    out.push(Stmt::new(
                        line,
                        StmtKind::Const { name: name.clone(), type_ann: ty.clone(), init: source },
                    ));
                } else {
                    out.push(Stmt::new(
                        line,
                        StmtKind::Var { name: name.clone(), type_ann: ty.clone(), init: Some(source) },
                    ));
                }
            }
            Pattern::Array { elements, rest } => {
                for (i, element) in elements.iter().enumerate() {
                    let Some((target, default)) = element else { continue };
                    let index = self.mk_expr(line, ExprKind::Literal(Literal::Number(i as f64)));
                    let get = self.mk_expr(
                        line,
                        ExprKind::GetIndex { object: Box::new(source.clone()), index: Box::new(index) },
                    );
                    let value = self.apply_default(get, default.clone(), line);
                    self.bind_pattern_value(target, value, is_const, line, out)?;
                }
                if let Some(rest_target) = rest {
                    let skip = self.mk_expr(
                        line,
                        ExprKind::Literal(Literal::Number(elements.len() as f64)),
                    );
                    let slice = self.mk_expr(
                        line,
                        ExprKind::Get { object: Box::new(source.clone()), name: "slice".to_string() },
                    );
                    let call = self.mk_expr(
                        line,
                        ExprKind::Call { callee: Box::new(slice), args: vec![skip] },
                    );
                    self.bind_pattern_value(rest_target, call, is_const, line, out)?;
                }
            }
            Pattern::Object { props } => {
                for (key, target, default) in props {
                    let get = self.mk_expr(
                        line,
                        ExprKind::Get { object: Box::new(source.clone()), name: key.clone() },
                    );
                    let value = self.apply_default(get, default.clone(), line);
                    self.bind_pattern_value(target, value, is_const, line, out)?;
                }
            }
        }
        Ok(())
    }

    fn bind_pattern_value(
        &mut self,
        target: &Pattern,
        value: Expr,
        is_const: bool,
        line: u32,
        out: &mut Vec<Stmt>,
    ) -> PResult<()> {
        if target.is_name() {
            self.desugar_pattern(target, value, is_const, line, out)
        } else {
            // Nested pattern: bind through a fresh temp.
            let temp = self.synthetic_name("_dest");
            out.push(Stmt::new(
                line,
                StmtKind::Var { name: temp.clone(), type_ann: None, init: Some(value) },
            ));
            let source = self.mk_expr(line, ExprKind::Variable(temp));
            self.desugar_pattern(target, source, is_const, line, out)
        }
    }

    /// `src === undefined ? default : src`
    fn apply_default(&mut self, source: Expr, default: Option<Expr>, line: u32) -> Expr {
        match default {
            None => source,
            Some(default) => {
                let undef = self.mk_expr(line, ExprKind::Literal(Literal::Undefined));
                let cond = self.mk_expr(
                    line,
                    ExprKind::Binary {
                        op: BinaryOp::EqEqEq,
                        left: Box::new(source.clone()),
                        right: Box::new(undef),
                    },
                );
                self.mk_expr(
                    line,
                    ExprKind::Ternary {
                        cond: Box::new(cond),
                        then_branch: Box::new(default),
                        else_branch: Box::new(source),
                    },
                )
            }
        }
    }

    // =========================================================================
    // Classes and interfaces
    // =========================================================================

    fn class_statement(&mut self, is_abstract: bool) -> PResult<Stmt> {
        let line = self.line();
        self.advance(); // class
        let name = self.ident_name("class name")?;
        let type_params = self.type_params_opt()?;
        let mut superclass = None;
        let mut super_type_args = Vec::new();
        if self.matches(TokenKind::Extends) {
            let super_line = self.line();
            let super_name = self.ident_name("superclass name")?;
            superclass = Some(self.mk_expr(super_line, ExprKind::Variable(super_name)));
            if self.at(TokenKind::Less) {
                super_type_args = self.type_args()?;
            }
        }
        let mut implements = Vec::new();
        if self.matches(TokenKind::Implements) {
            loop {
                implements.push(self.parse_type()?);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::LeftBrace, "'{' to open class body")?;
        let was_in_class = std::mem::replace(&mut self.in_class, true);
        let members = self.class_members();
        self.in_class = was_in_class;
        let members = members?;
        self.expect(TokenKind::RightBrace, "'}' to close class body")?;
        Ok(Stmt::new(
            line,
            StmtKind::Class(Rc::new(ClassDecl {
                name,
                type_params,
                superclass,
                super_type_args,
                implements,
                members,
                is_abstract,
                line,
            })),
        ))
    }

    fn class_members(&mut self) -> PResult<Vec<ClassMember>> {
        let mut members = Vec::new();
        while !self.at(TokenKind::RightBrace) && !self.at(TokenKind::Eof) {
            if self.matches(TokenKind::Semicolon) {
                continue;
            }
            members.push(self.class_member()?);
        }
        Ok(members)
    }

    fn class_member(&mut self) -> PResult<ClassMember> {
        let line = self.line();

        // `static { ... }`
        if self.at(TokenKind::Static) && self.peek_ahead(1).kind == TokenKind::LeftBrace {
            self.advance();
            self.advance();
            let body = self.block_body()?;
            return Ok(ClassMember::StaticBlock(body));
        }

        let access = match self.peek().kind {
            TokenKind::Public if self.member_modifier_ahead() => { self.advance(); Some(AccessModifier::Public) }
            TokenKind::Private if self.member_modifier_ahead() => { self.advance(); Some(AccessModifier::Private) }
            TokenKind::Protected if self.member_modifier_ahead() => { self.advance(); Some(AccessModifier::Protected) }
            _ => None,
        };
        let is_static = self.at(TokenKind::Static) && self.member_modifier_ahead() && { self.advance(); true };
        let is_abstract = self.at(TokenKind::Abstract) && self.member_modifier_ahead() && { self.advance(); true };
        let readonly = self.at(TokenKind::Readonly) && self.member_modifier_ahead() && { self.advance(); true };
        let is_async = self.at(TokenKind::Async)
            && !matches!(self.peek_ahead(1).kind, TokenKind::Equal | TokenKind::Colon | TokenKind::LeftParen)
            && { self.advance(); true };

        // Accessors.
        if self.at(TokenKind::Get) && self.accessor_ahead() {
            self.advance();
            let name = self.property_name()?;
            let func = self.method_rest(Some(name.clone()), false, false, false)?;
            return Ok(ClassMember::Getter { name, func, is_static });
        }
        if self.at(TokenKind::Set) && self.accessor_ahead() {
            self.advance();
            let name = self.property_name()?;
            let func = self.method_rest(Some(name.clone()), false, false, false)?;
            return Ok(ClassMember::Setter { name, func, is_static });
        }

        let is_generator = self.matches(TokenKind::Star);
        let name = self.property_name()?;

        // Method (or overload signature).
        if self.at(TokenKind::LeftParen) || self.at(TokenKind::Less) {
            let func = self.method_rest(Some(name), is_async, is_generator, is_abstract)?;
            return Ok(ClassMember::Method { func, is_static, is_abstract, access });
        }

        // Field.
        let optional = self.matches(TokenKind::Question);
        let _ = optional;
        let type_ann = if self.matches(TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        let init = if self.matches(TokenKind::Equal) {
            Some(self.assignment()?)
        } else {
            None
        };
        self.end_statement()?;
        Ok(ClassMember::Field { name, type_ann, init, is_static, readonly, access, line })
    }

    /// True when the keyword at the cursor is a modifier rather than a member
    /// name (i.e. the next token does not immediately form a field/method).
    fn member_modifier_ahead(&self) -> bool {
        !matches!(
            self.peek_ahead(1).kind,
            TokenKind::Equal | TokenKind::Colon | TokenKind::LeftParen | TokenKind::Semicolon | TokenKind::Question
        )
    }

    fn accessor_ahead(&self) -> bool {
        !matches!(
            self.peek_ahead(1).kind,
            TokenKind::Equal | TokenKind::Colon | TokenKind::LeftParen | TokenKind::Semicolon
        )
    }

    /// Parse a method after its name: type params, params, return type, body.
    fn method_rest(
        &mut self,
        name: Option<String>,
        is_async: bool,
        is_generator: bool,
        is_abstract: bool,
    ) -> PResult<Rc<FunctionDecl>> {
        let line = self.previous().line;
        let type_params = self.type_params_opt()?;
        let in_constructor = name.as_deref() == Some("constructor");
        let (params, prologue) = self.param_list(in_constructor)?;
        let return_type = if self.matches(TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        if is_abstract || !self.at(TokenKind::LeftBrace) {
            self.end_statement()?;
            return Ok(Rc::new(FunctionDecl {
                name,
                type_params,
                params,
                return_type,
                body: None,
                is_async,
                is_generator,
                is_arrow: false,
                is_strict: self.strict,
                line,
            }));
        }
        let (body, is_strict) = self.function_body(prologue, &params)?;
        Ok(Rc::new(FunctionDecl {
            name,
            type_params,
            params,
            return_type,
            body: Some(body),
            is_async,
            is_generator,
            is_arrow: false,
            is_strict,
            line,
        }))
    }

    fn interface_statement(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance(); // interface
        let name = self.ident_name("interface name")?;
        let type_params = self.type_params_opt()?;
        let mut extends = Vec::new();
        if self.matches(TokenKind::Extends) {
            loop {
                extends.push(self.parse_type()?);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::LeftBrace, "'{' to open interface body")?;
        let mut members = Vec::new();
        while !self.at(TokenKind::RightBrace) && !self.at(TokenKind::Eof) {
            members.push(self.interface_member()?);
            let _ = self.matches(TokenKind::Semicolon) || self.matches(TokenKind::Comma);
        }
        self.expect(TokenKind::RightBrace, "'}' to close interface body")?;
        Ok(Stmt::new(
            line,
            StmtKind::Interface(InterfaceDecl { name, type_params, extends, members }),
        ))
    }

    fn interface_member(&mut self) -> PResult<InterfaceMember> {
        // Index signature: `[key: string]: T`
        if self.at(TokenKind::LeftBracket) {
            self.advance();
            let _key_name = self.ident_name("index parameter name")?;
            self.expect(TokenKind::Colon, "':' in index signature")?;
            let key_type = self.parse_type()?;
            self.expect(TokenKind::RightBracket, "']' in index signature")?;
            self.expect(TokenKind::Colon, "':' after index signature")?;
            let value = self.parse_type()?;
            return match &key_type {
                TypeExpr::Named { name, .. } if name == "number" => Ok(InterfaceMember::NumberIndex(value)),
                _ => Ok(InterfaceMember::StringIndex(value)),
            };
        }
        let readonly = self.at(TokenKind::Readonly)
            && !matches!(self.peek_ahead(1).kind, TokenKind::Colon | TokenKind::Question | TokenKind::LeftParen)
            && { self.advance(); true };
        let name = self.property_name()?;
        let optional = self.matches(TokenKind::Question);
        if self.at(TokenKind::LeftParen) || self.at(TokenKind::Less) {
            // Method signature — represent as a function-typed member.
            let type_params = self.type_params_opt()?;
            let _ = type_params;
            let func_type = self.function_type_rest()?;
            return Ok(InterfaceMember::Method { name, func_type, optional });
        }
        self.expect(TokenKind::Colon, "':' after member name")?;
        let ty = self.parse_type()?;
        Ok(InterfaceMember::Property { name, type_ann: ty, optional, readonly })
    }
}

#[cfg(test)]
mod tests;
