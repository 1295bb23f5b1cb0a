//! Type annotation parsing.
//!
//! A separate precedence ladder: conditional → union → intersection →
//! postfix (`[]`, indexed access) → primary. `keyof` and `infer` bind
//! tighter than unions. Nested generic closers (`>>`) are handled by
//! splitting the scanner's shift tokens in place.

use tsr_scanner::TokenKind;

use crate::parser::{PResult, Parser};
use crate::types::{TupleMember, TypeExpr, TypeFnParam, TypeMember, TypeParamDecl};

impl Parser {
    /// Parse a type, including conditional types and return-type predicates.
    pub(crate) fn parse_type(&mut self) -> PResult<TypeExpr> {
        // `x is T` (return type position).
        if self.at_ident() && self.peek_ahead(1).kind == TokenKind::Is {
            let param = self.ident_name("predicate parameter")?;
            self.advance(); // is
            let ty = self.parse_type()?;
            return Ok(TypeExpr::Predicate { param, ty: Box::new(ty) });
        }
        let check = self.union_type()?;
        if self.matches(TokenKind::Extends) {
            let extends = self.union_type()?;
            self.expect(TokenKind::Question, "'?' in conditional type")?;
            let then_ty = self.parse_type()?;
            self.expect(TokenKind::Colon, "':' in conditional type")?;
            let else_ty = self.parse_type()?;
            return Ok(TypeExpr::Conditional {
                check: Box::new(check),
                extends: Box::new(extends),
                then_ty: Box::new(then_ty),
                else_ty: Box::new(else_ty),
            });
        }
        Ok(check)
    }

    fn union_type(&mut self) -> PResult<TypeExpr> {
        let _ = self.matches(TokenKind::Pipe); // leading `|` allowed
        let first = self.intersection_type()?;
        if !self.at(TokenKind::Pipe) {
            return Ok(first);
        }
        let mut members = vec![first];
        while self.matches(TokenKind::Pipe) {
            members.push(self.intersection_type()?);
        }
        Ok(TypeExpr::Union(members))
    }

    fn intersection_type(&mut self) -> PResult<TypeExpr> {
        let first = self.postfix_type()?;
        if !self.at(TokenKind::Amp) {
            return Ok(first);
        }
        let mut members = vec![first];
        while self.matches(TokenKind::Amp) {
            members.push(self.postfix_type()?);
        }
        Ok(TypeExpr::Intersection(members))
    }

    fn postfix_type(&mut self) -> PResult<TypeExpr> {
        let mut ty = self.primary_type()?;
        loop {
            if self.at(TokenKind::LeftBracket) {
                self.advance();
                if self.matches(TokenKind::RightBracket) {
                    ty = TypeExpr::Array(Box::new(ty));
                } else {
                    let index = self.parse_type()?;
                    self.expect(TokenKind::RightBracket, "']' in indexed access type")?;
                    ty = TypeExpr::IndexedAccess { object: Box::new(ty), index: Box::new(index) };
                }
            } else {
                break;
            }
        }
        Ok(ty)
    }

    fn primary_type(&mut self) -> PResult<TypeExpr> {
        match self.peek().kind {
            TokenKind::KeyOf => {
                self.advance();
                let inner = self.postfix_type()?;
                Ok(TypeExpr::KeyOf(Box::new(inner)))
            }
            TokenKind::Infer => {
                self.advance();
                let name = self.ident_name("inferred type name")?;
                Ok(TypeExpr::Infer(name))
            }
            TokenKind::TypeOf => {
                self.advance();
                let name = self.ident_name("value name after 'typeof'")?;
                Ok(TypeExpr::TypeQuery(name))
            }
            TokenKind::Readonly => {
                // `readonly T[]` — readonly arrays are treated as arrays.
                self.advance();
                self.postfix_type()
            }
            TokenKind::New => {
                // Constructor type: `new (args) => T`; modeled as a function.
                self.advance();
                self.function_type()
            }
            TokenKind::LeftParen => {
                let start = self.pos;
                match self.function_type() {
                    Ok(ty) => Ok(ty),
                    Err(_) => {
                        self.pos = start;
                        self.advance();
                        let inner = self.parse_type()?;
                        self.expect(TokenKind::RightParen, "')' in parenthesized type")?;
                        Ok(TypeExpr::Paren(Box::new(inner)))
                    }
                }
            }
            TokenKind::LeftBrace => {
                self.advance();
                self.object_type()
            }
            TokenKind::LeftBracket => {
                self.advance();
                self.tuple_type()
            }
            TokenKind::String => {
                let token = self.advance();
                Ok(TypeExpr::StringLiteral(token.string_value().to_string()))
            }
            TokenKind::Number => {
                let token = self.advance();
                Ok(TypeExpr::NumberLiteral(token.number_value()))
            }
            TokenKind::Minus if self.peek_ahead(1).kind == TokenKind::Number => {
                self.advance();
                let token = self.advance();
                Ok(TypeExpr::NumberLiteral(-token.number_value()))
            }
            TokenKind::True => {
                self.advance();
                Ok(TypeExpr::BooleanLiteral(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(TypeExpr::BooleanLiteral(false))
            }
            TokenKind::Null => {
                self.advance();
                Ok(TypeExpr::named("null"))
            }
            TokenKind::Undefined => {
                self.advance();
                Ok(TypeExpr::named("undefined"))
            }
            TokenKind::Void => {
                self.advance();
                Ok(TypeExpr::named("void"))
            }
            TokenKind::TemplateComplete | TokenKind::TemplateHead => self.template_type(),
            _ if self.at_ident() => {
                let name = self.advance().lexeme;
                // Qualified name: `Ns.Member`.
                if self.at(TokenKind::Dot) {
                    let mut parts = vec![name];
                    while self.matches(TokenKind::Dot) {
                        parts.push(self.ident_name("qualified type name")?);
                    }
                    let args = if self.at(TokenKind::Less) { self.type_args()? } else { Vec::new() };
                    return Ok(TypeExpr::Qualified { parts, args });
                }
                let args = if self.at(TokenKind::Less) { self.type_args()? } else { Vec::new() };
                Ok(TypeExpr::Named { name, args })
            }
            _ => Err(self.type_error()),
        }
    }

    fn type_error(&self) -> tsr_common::Diagnostic {
        tsr_common::Diagnostic::error(
            tsr_common::DiagnosticCode::SyntaxError,
            format!("expected type, found '{}'", self.peek().lexeme),
            self.peek().span,
        )
    }

    /// `(params) => R`
    fn function_type(&mut self) -> PResult<TypeExpr> {
        self.expect(TokenKind::LeftParen, "'('")?;
        let params = self.type_fn_params()?;
        self.expect(TokenKind::Arrow, "'=>' in function type")?;
        let ret = self.parse_type()?;
        Ok(TypeExpr::Function { params, ret: Box::new(ret) })
    }

    /// Parse `(params)` then `:` or `=>` then the return type. Used for
    /// interface/object method signatures and function types alike.
    pub(crate) fn function_type_rest(&mut self) -> PResult<TypeExpr> {
        self.expect(TokenKind::LeftParen, "'('")?;
        let params = self.type_fn_params()?;
        if !self.matches(TokenKind::Colon) {
            self.expect(TokenKind::Arrow, "':' or '=>' before return type")?;
        }
        let ret = self.parse_type()?;
        Ok(TypeExpr::Function { params, ret: Box::new(ret) })
    }

    fn type_fn_params(&mut self) -> PResult<Vec<TypeFnParam>> {
        let mut params = Vec::new();
        while !self.at(TokenKind::RightParen) {
            let rest = self.matches(TokenKind::DotDotDot);
            let name = self.ident_name("parameter name")?;
            let optional = self.matches(TokenKind::Question);
            self.expect(TokenKind::Colon, "':' after parameter name")?;
            let ty = self.parse_type()?;
            params.push(TypeFnParam { name, ty, optional, rest });
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightParen, "')'")?;
        Ok(params)
    }

    /// Parse the body of `{ ... }` in type position: a mapped type or an
    /// object type literal. The `{` has been consumed.
    fn object_type(&mut self) -> PResult<TypeExpr> {
        // Mapped type: `{ [K in Keys]: V }` with optional modifiers.
        let mut readonly_modifier = None;
        let mut lookahead = 0;
        if matches!(self.peek().kind, TokenKind::Plus | TokenKind::Minus)
            && self.peek_ahead(1).kind == TokenKind::Readonly
        {
            readonly_modifier = Some(self.peek().kind == TokenKind::Plus);
            lookahead = 2;
        } else if self.at(TokenKind::Readonly) && self.peek_ahead(1).kind == TokenKind::LeftBracket {
            readonly_modifier = Some(true);
            lookahead = 1;
        }
        let is_mapped = self.peek_ahead(lookahead).kind == TokenKind::LeftBracket
            && self.peek_ahead(lookahead + 2).kind == TokenKind::In;
        if is_mapped {
            for _ in 0..lookahead {
                self.advance();
            }
            self.expect(TokenKind::LeftBracket, "'['")?;
            let param = self.ident_name("mapped type parameter")?;
            self.expect(TokenKind::In, "'in'")?;
            let constraint = self.parse_type()?;
            self.expect(TokenKind::RightBracket, "']'")?;
            let optional = if self.matches(TokenKind::Question) {
                Some(true)
            } else if matches!(self.peek().kind, TokenKind::Plus | TokenKind::Minus)
                && self.peek_ahead(1).kind == TokenKind::Question
            {
                let add = self.advance().kind == TokenKind::Plus;
                self.advance();
                Some(add)
            } else {
                None
            };
            self.expect(TokenKind::Colon, "':' in mapped type")?;
            let value = self.parse_type()?;
            let _ = self.matches(TokenKind::Semicolon) || self.matches(TokenKind::Comma);
            self.expect(TokenKind::RightBrace, "'}' to close mapped type")?;
            return Ok(TypeExpr::Mapped {
                param,
                constraint: Box::new(constraint),
                value: Box::new(value),
                optional,
                readonly: readonly_modifier,
            });
        }

        // Object type literal.
        let mut members = Vec::new();
        while !self.at(TokenKind::RightBrace) && !self.at(TokenKind::Eof) {
            if self.at(TokenKind::LeftBracket) {
                self.advance();
                let _name = self.ident_name("index parameter")?;
                self.expect(TokenKind::Colon, "':' in index signature")?;
                let key = self.parse_type()?;
                self.expect(TokenKind::RightBracket, "']'")?;
                self.expect(TokenKind::Colon, "':' after index signature")?;
                let value = self.parse_type()?;
                match &key {
                    TypeExpr::Named { name, .. } if name == "number" => {
                        members.push(TypeMember::NumberIndex(Box::new(value)));
                    }
                    _ => members.push(TypeMember::StringIndex(Box::new(value))),
                }
            } else {
                let readonly = self.at(TokenKind::Readonly)
                    && !matches!(self.peek_ahead(1).kind, TokenKind::Colon | TokenKind::Question)
                    && { self.advance(); true };
                let name = self.type_member_name()?;
                let optional = self.matches(TokenKind::Question);
                if self.at(TokenKind::LeftParen) {
                    let func = self.function_type_rest()?;
                    members.push(TypeMember::Property { name, ty: func, optional, readonly });
                } else {
                    self.expect(TokenKind::Colon, "':' after member name")?;
                    let ty = self.parse_type()?;
                    members.push(TypeMember::Property { name, ty, optional, readonly });
                }
            }
            let _ = self.matches(TokenKind::Semicolon) || self.matches(TokenKind::Comma);
        }
        self.expect(TokenKind::RightBrace, "'}' to close object type")?;
        Ok(TypeExpr::ObjectLiteral(members))
    }

    fn type_member_name(&mut self) -> PResult<String> {
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
            _ if token.lexeme.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$') => {
                self.advance();
                Ok(token.lexeme)
            }
            _ => Err(self.type_error()),
        }
    }

    /// The `[` has been consumed.
    fn tuple_type(&mut self) -> PResult<TypeExpr> {
        let mut members = Vec::new();
        while !self.at(TokenKind::RightBracket) {
            let rest = self.matches(TokenKind::DotDotDot);
            let ty = self.parse_type()?;
            let optional = self.matches(TokenKind::Question);
            members.push(TupleMember { ty, optional, rest });
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightBracket, "']' to close tuple type")?;
        Ok(TypeExpr::Tuple(members))
    }

    fn template_type(&mut self) -> PResult<TypeExpr> {
        let head = self.advance();
        if head.kind == TokenKind::TemplateComplete {
            return Ok(TypeExpr::TemplateLiteral {
                strings: vec![head.string_value().to_string()],
                types: Vec::new(),
            });
        }
        let mut strings = vec![head.string_value().to_string()];
        let mut types = Vec::new();
        loop {
            types.push(self.parse_type()?);
            let part = self.peek().clone();
            match part.kind {
                TokenKind::TemplateMiddle => {
                    self.advance();
                    strings.push(part.string_value().to_string());
                }
                TokenKind::TemplateTail => {
                    self.advance();
                    strings.push(part.string_value().to_string());
                    break;
                }
                _ => return Err(self.type_error()),
            }
        }
        Ok(TypeExpr::TemplateLiteral { strings, types })
    }

    // =========================================================================
    // Type parameters / arguments
    // =========================================================================

    /// `<T, U extends V, W = Default>` if present.
    pub(crate) fn type_params_opt(&mut self) -> PResult<Vec<TypeParamDecl>> {
        if !self.at(TokenKind::Less) {
            return Ok(Vec::new());
        }
        self.advance();
        let mut params = Vec::new();
        loop {
            let name = self.ident_name("type parameter name")?;
            let constraint = if self.matches(TokenKind::Extends) {
                Some(self.parse_type()?)
            } else {
                None
            };
            let default = if self.matches(TokenKind::Equal) {
                Some(self.parse_type()?)
            } else {
                None
            };
            params.push(TypeParamDecl { name, constraint, default });
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.expect_type_close()?;
        Ok(params)
    }

    /// `<T, U>` — the cursor must be at `<`.
    pub(crate) fn type_args(&mut self) -> PResult<Vec<crate::types::TypeExpr>> {
        self.expect(TokenKind::Less, "'<'")?;
        let mut args = Vec::new();
        loop {
            args.push(self.parse_type()?);
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.expect_type_close()?;
        Ok(args)
    }

    /// Consume one `>` in type context, splitting `>>` / `>>>` tokens.
    fn expect_type_close(&mut self) -> PResult<()> {
        match self.peek().kind {
            TokenKind::Greater => {
                self.advance();
                Ok(())
            }
            TokenKind::GreaterGreater => {
                self.demote_closer(TokenKind::Greater);
                Ok(())
            }
            TokenKind::GreaterGreaterGreater => {
                self.demote_closer(TokenKind::GreaterGreater);
                Ok(())
            }
            _ => Err(self.type_error()),
        }
    }

    fn demote_closer(&mut self, to: TokenKind) {
        let token = self.current_token_mut();
        token.kind = to;
        token.lexeme.pop();
    }
}
