//! Expression parsing: Pratt-style precedence ladder.
//!
//! Arrow functions are recognized by trial parse with backtracking: a `(` in
//! expression position first attempts a parameter list followed by `=>`, and
//! falls back to a grouping expression. Explicit call type arguments
//! (`f<T>(x)`) parse the same way and are discarded; the checker re-infers
//! them from the arguments.

use std::rc::Rc;

use tsr_scanner::TokenKind;

use crate::ast::*;
use crate::parser::{PResult, Parser};

/// Format a numeric property key the way the runtime does (`1` not `1.0`).
pub(crate) fn number_to_key(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl Parser {
    pub(crate) fn expression(&mut self) -> PResult<Expr> {
        self.assignment()
    }

    pub(crate) fn assignment(&mut self) -> PResult<Expr> {
        let line = self.line();

        // `yield` binds loosest.
        if self.at(TokenKind::Yield) {
            self.advance();
            let delegate = self.matches(TokenKind::Star);
            let value = if self.yield_has_operand(line) {
                Some(Box::new(self.assignment()?))
            } else {
                None
            };
            return Ok(self.mk_expr(line, ExprKind::Yield { value, delegate }));
        }

        if let Some(arrow) = self.try_arrow()? {
            return Ok(arrow);
        }

        let lhs = self.ternary()?;

        let op_kind = self.peek().kind;
        let assign = match op_kind {
            TokenKind::Equal => {
                self.advance();
                let value = Box::new(self.assignment()?);
                return self.build_assign(lhs, value, line);
            }
            TokenKind::PlusEqual => Some(BinaryOp::Add),
            TokenKind::MinusEqual => Some(BinaryOp::Sub),
            TokenKind::StarEqual => Some(BinaryOp::Mul),
            TokenKind::SlashEqual => Some(BinaryOp::Div),
            TokenKind::PercentEqual => Some(BinaryOp::Rem),
            TokenKind::StarStarEqual => Some(BinaryOp::Pow),
            TokenKind::AmpEqual => Some(BinaryOp::BitAnd),
            TokenKind::PipeEqual => Some(BinaryOp::BitOr),
            TokenKind::CaretEqual => Some(BinaryOp::BitXor),
            TokenKind::LessLessEqual => Some(BinaryOp::Shl),
            TokenKind::GreaterGreaterEqual => Some(BinaryOp::Shr),
            TokenKind::GreaterGreaterGreaterEqual => Some(BinaryOp::UShr),
            _ => None,
        };
        if let Some(op) = assign {
            self.advance();
            let value = Box::new(self.assignment()?);
            return self.build_compound_assign(lhs, op, value, line);
        }

        let logical = match op_kind {
            TokenKind::AmpAmpEqual => Some(LogicalAssignOp::And),
            TokenKind::PipePipeEqual => Some(LogicalAssignOp::Or),
            TokenKind::QuestionQuestionEqual => Some(LogicalAssignOp::Nullish),
            _ => None,
        };
        if let Some(op) = logical {
            self.advance();
            let value = Box::new(self.assignment()?);
            return self.build_logical_assign(lhs, op, value, line);
        }

        Ok(lhs)
    }

    fn yield_has_operand(&self, yield_line: u32) -> bool {
        let next = self.peek();
        if next.line > yield_line {
            return false;
        }
        !matches!(
            next.kind,
            TokenKind::Semicolon
                | TokenKind::RightParen
                | TokenKind::RightBracket
                | TokenKind::RightBrace
                | TokenKind::Comma
                | TokenKind::Colon
                | TokenKind::Eof
        )
    }

    fn build_assign(&mut self, lhs: Expr, value: Box<Expr>, line: u32) -> PResult<Expr> {
        match lhs.kind {
            ExprKind::Variable(name) => Ok(self.mk_expr(line, ExprKind::Assign { name, value })),
            ExprKind::Get { object, name } => {
                Ok(self.mk_expr(line, ExprKind::Set { object, name, value }))
            }
            ExprKind::GetIndex { object, index } => {
                Ok(self.mk_expr(line, ExprKind::SetIndex { object, index, value }))
            }
            _ => Err(self.invalid_target()),
        }
    }

    fn build_compound_assign(
        &mut self,
        lhs: Expr,
        op: BinaryOp,
        value: Box<Expr>,
        line: u32,
    ) -> PResult<Expr> {
        match lhs.kind {
            ExprKind::Variable(name) => {
                Ok(self.mk_expr(line, ExprKind::CompoundAssign { name, op, value }))
            }
            ExprKind::Get { object, name } => {
                Ok(self.mk_expr(line, ExprKind::CompoundSet { object, name, op, value }))
            }
            ExprKind::GetIndex { object, index } => {
                Ok(self.mk_expr(line, ExprKind::CompoundSetIndex { object, index, op, value }))
            }
            _ => Err(self.invalid_target()),
        }
    }

    fn build_logical_assign(
        &mut self,
        lhs: Expr,
        op: LogicalAssignOp,
        value: Box<Expr>,
        line: u32,
    ) -> PResult<Expr> {
        match lhs.kind {
            ExprKind::Variable(name) => {
                Ok(self.mk_expr(line, ExprKind::LogicalAssign { name, op, value }))
            }
            ExprKind::Get { object, name } => {
                Ok(self.mk_expr(line, ExprKind::LogicalSet { object, name, op, value }))
            }
            ExprKind::GetIndex { object, index } => {
                Ok(self.mk_expr(line, ExprKind::LogicalSetIndex { object, index, op, value }))
            }
            _ => Err(self.invalid_target()),
        }
    }

    fn invalid_target(&self) -> tsr_common::Diagnostic {
        tsr_common::Diagnostic::error(
            tsr_common::DiagnosticCode::InvalidAssignmentTarget,
            "invalid assignment target",
            self.peek().span,
        )
    }

    // =========================================================================
    // Arrows
    // =========================================================================

    /// Attempt an arrow function at the current position; backtracks and
    /// returns `None` if the tokens do not form one.
    fn try_arrow(&mut self) -> PResult<Option<Expr>> {
        let line = self.line();

        // `x => ...`
        if self.at(TokenKind::Identifier) && self.peek_ahead(1).kind == TokenKind::Arrow {
            let name = self.ident_name("parameter")?;
            self.advance(); // =>
            let params = vec![plain_param(name)];
            return Ok(Some(self.arrow_body(params, false, line)?));
        }

        // `async x => ...`
        if self.at(TokenKind::Async)
            && self.peek_ahead(1).kind == TokenKind::Identifier
            && self.peek_ahead(2).kind == TokenKind::Arrow
        {
            self.advance();
            let name = self.ident_name("parameter")?;
            self.advance(); // =>
            let params = vec![plain_param(name)];
            return Ok(Some(self.arrow_body(params, true, line)?));
        }

        // `(params) => ...`, `async (params) => ...`, `<T>(params) => ...`
        let could_open = matches!(self.peek().kind, TokenKind::LeftParen | TokenKind::Less)
            || (self.at(TokenKind::Async)
                && matches!(self.peek_ahead(1).kind, TokenKind::LeftParen | TokenKind::Less));
        if !could_open {
            return Ok(None);
        }
        let start = self.pos;
        match self.parse_parenthesized_arrow(line) {
            Ok(expr) => Ok(Some(expr)),
            Err(_) => {
                self.pos = start;
                Ok(None)
            }
        }
    }

    fn parse_parenthesized_arrow(&mut self, line: u32) -> PResult<Expr> {
        let is_async = self.matches(TokenKind::Async);
        let type_params = self.type_params_opt()?;
        let _ = type_params;
        let (params, prologue) = self.param_list(false)?;
        let return_type = if self.matches(TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        self.expect(TokenKind::Arrow, "'=>'")?;
        let mut expr = self.arrow_body_with(params, prologue, is_async, line)?;
        if let ExprKind::ArrowFunction(decl) = &mut expr.kind {
            if let Some(decl_mut) = Rc::get_mut(decl) {
                decl_mut.return_type = return_type;
            }
        }
        Ok(expr)
    }

    fn arrow_body(&mut self, params: Vec<Param>, is_async: bool, line: u32) -> PResult<Expr> {
        self.arrow_body_with(params, Vec::new(), is_async, line)
    }

    fn arrow_body_with(
        &mut self,
        params: Vec<Param>,
        prologue: Vec<Stmt>,
        is_async: bool,
        line: u32,
    ) -> PResult<Expr> {
        let (body, is_strict) = if self.at(TokenKind::LeftBrace) {
            self.function_body(prologue, &params)?
        } else {
            let value = self.assignment()?;
            let mut body = prologue;
            body.push(Stmt::new(line, StmtKind::Return(Some(value))));
            (body, self.strict_mode())
        };
        let decl = Rc::new(FunctionDecl {
            name: None,
            type_params: Vec::new(),
            params,
            return_type: None,
            body: Some(body),
            is_async,
            is_generator: false,
            is_arrow: true,
            is_strict,
            line,
        });
        Ok(self.mk_expr(line, ExprKind::ArrowFunction(decl)))
    }

    pub(crate) fn strict_mode(&self) -> bool {
        self.strict
    }

    // =========================================================================
    // Binary precedence ladder
    // =========================================================================

    fn ternary(&mut self) -> PResult<Expr> {
        let line = self.line();
        let cond = self.nullish()?;
        if self.matches(TokenKind::Question) {
            let then_branch = self.assignment()?;
            self.expect(TokenKind::Colon, "':' in conditional expression")?;
            let else_branch = self.assignment()?;
            return Ok(self.mk_expr(
                line,
                ExprKind::Ternary {
                    cond: Box::new(cond),
                    then_branch: Box::new(then_branch),
                    else_branch: Box::new(else_branch),
                },
            ));
        }
        Ok(cond)
    }

    fn nullish(&mut self) -> PResult<Expr> {
        let line = self.line();
        let mut left = self.logical_or()?;
        while self.matches(TokenKind::QuestionQuestion) {
            let right = self.logical_or()?;
            left = self.mk_expr(
                line,
                ExprKind::NullishCoalescing { left: Box::new(left), right: Box::new(right) },
            );
        }
        Ok(left)
    }

    fn logical_or(&mut self) -> PResult<Expr> {
        let line = self.line();
        let mut left = self.logical_and()?;
        while self.matches(TokenKind::PipePipe) {
            let right = self.logical_and()?;
            left = self.mk_expr(
                line,
                ExprKind::Logical { op: LogicalOp::Or, left: Box::new(left), right: Box::new(right) },
            );
        }
        Ok(left)
    }

    fn logical_and(&mut self) -> PResult<Expr> {
        let line = self.line();
        let mut left = self.bit_or()?;
        while self.matches(TokenKind::AmpAmp) {
            let right = self.bit_or()?;
            left = self.mk_expr(
                line,
                ExprKind::Logical { op: LogicalOp::And, left: Box::new(left), right: Box::new(right) },
            );
        }
        Ok(left)
    }

    fn bit_or(&mut self) -> PResult<Expr> {
        let line = self.line();
        let mut left = self.bit_xor()?;
        while self.at(TokenKind::Pipe) {
            self.advance();
            let right = self.bit_xor()?;
            left = self.binary(line, BinaryOp::BitOr, left, right);
        }
        Ok(left)
    }

    fn bit_xor(&mut self) -> PResult<Expr> {
        let line = self.line();
        let mut left = self.bit_and()?;
        while self.at(TokenKind::Caret) {
            self.advance();
            let right = self.bit_and()?;
            left = self.binary(line, BinaryOp::BitXor, left, right);
        }
        Ok(left)
    }

    fn bit_and(&mut self) -> PResult<Expr> {
        let line = self.line();
        let mut left = self.equality()?;
        while self.at(TokenKind::Amp) {
            self.advance();
            let right = self.equality()?;
            left = self.binary(line, BinaryOp::BitAnd, left, right);
        }
        Ok(left)
    }

    fn equality(&mut self) -> PResult<Expr> {
        let line = self.line();
        let mut left = self.relational()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::EqualEqual => BinaryOp::EqEq,
                TokenKind::BangEqual => BinaryOp::NotEq,
                TokenKind::EqualEqualEqual => BinaryOp::EqEqEq,
                TokenKind::BangEqualEqual => BinaryOp::NotEqEq,
                _ => break,
            };
            self.advance();
            let right = self.relational()?;
            left = self.binary(line, op, left, right);
        }
        Ok(left)
    }

    fn relational(&mut self) -> PResult<Expr> {
        let line = self.line();
        let mut left = self.shift()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Less => BinaryOp::Less,
                TokenKind::LessEqual => BinaryOp::LessEqual,
                TokenKind::Greater => BinaryOp::Greater,
                TokenKind::GreaterEqual => BinaryOp::GreaterEqual,
                TokenKind::In => BinaryOp::In,
                TokenKind::InstanceOf => BinaryOp::InstanceOf,
                TokenKind::As => {
                    self.advance();
                    let target = self.parse_type()?;
                    left = self.mk_expr(
                        line,
                        ExprKind::TypeAssertion { expr: Box::new(left), target },
                    );
                    continue;
                }
                _ => break,
            };
            self.advance();
            let right = self.shift()?;
            left = self.binary(line, op, left, right);
        }
        Ok(left)
    }

    fn shift(&mut self) -> PResult<Expr> {
        let line = self.line();
        let mut left = self.additive()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::LessLess => BinaryOp::Shl,
                TokenKind::GreaterGreater => BinaryOp::Shr,
                TokenKind::GreaterGreaterGreater => BinaryOp::UShr,
                _ => break,
            };
            self.advance();
            let right = self.additive()?;
            left = self.binary(line, op, left, right);
        }
        Ok(left)
    }

    fn additive(&mut self) -> PResult<Expr> {
        let line = self.line();
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.multiplicative()?;
            left = self.binary(line, op, left, right);
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> PResult<Expr> {
        let line = self.line();
        let mut left = self.exponent()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Rem,
                _ => break,
            };
            self.advance();
            let right = self.exponent()?;
            left = self.binary(line, op, left, right);
        }
        Ok(left)
    }

    fn exponent(&mut self) -> PResult<Expr> {
        let line = self.line();
        let base = self.unary()?;
        if self.matches(TokenKind::StarStar) {
            // Right-associative.
            let exp = self.exponent()?;
            return Ok(self.binary(line, BinaryOp::Pow, base, exp));
        }
        Ok(base)
    }

    fn binary(&mut self, line: u32, op: BinaryOp, left: Expr, right: Expr) -> Expr {
        self.mk_expr(line, ExprKind::Binary { op, left: Box::new(left), right: Box::new(right) })
    }

    // =========================================================================
    // Unary / postfix / call
    // =========================================================================

    fn unary(&mut self) -> PResult<Expr> {
        let line = self.line();
        let op = match self.peek().kind {
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Minus => Some(UnaryOp::Minus),
            TokenKind::Plus => Some(UnaryOp::Plus),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            TokenKind::TypeOf => Some(UnaryOp::TypeOf),
            TokenKind::Void => Some(UnaryOp::Void),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.unary()?;
            return Ok(self.mk_expr(line, ExprKind::Unary { op, operand: Box::new(operand) }));
        }
        if self.at(TokenKind::Await) {
            self.advance();
            let operand = self.unary()?;
            return Ok(self.mk_expr(line, ExprKind::Await(Box::new(operand))));
        }
        if self.at(TokenKind::PlusPlus) || self.at(TokenKind::MinusMinus) {
            let negative = self.advance().kind == TokenKind::MinusMinus;
            let target = self.unary()?;
            if !target.is_assignment_target() {
                return Err(self.invalid_target());
            }
            return Ok(self.mk_expr(line, ExprKind::PrefixIncrement { target: Box::new(target), negative }));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let line = self.line();
        let expr = self.call_expression()?;
        if (self.at(TokenKind::PlusPlus) || self.at(TokenKind::MinusMinus))
            && self.peek().line == self.previous().line
        {
            let negative = self.advance().kind == TokenKind::MinusMinus;
            if !expr.is_assignment_target() {
                return Err(self.invalid_target());
            }
            return Ok(self.mk_expr(line, ExprKind::PostfixIncrement { target: Box::new(expr), negative }));
        }
        Ok(expr)
    }

    fn call_expression(&mut self) -> PResult<Expr> {
        let expr = self.primary()?;
        self.finish_postfix(expr)
    }

    /// Apply call, member and index suffixes to an already-parsed expression.
    pub(crate) fn finish_postfix(&mut self, mut expr: Expr) -> PResult<Expr> {
        loop {
            let line = self.line();
            if self.matches(TokenKind::LeftParen) {
                let args = self.call_args()?;
                expr = self.mk_expr(line, ExprKind::Call { callee: Box::new(expr), args });
            } else if self.matches(TokenKind::Dot) {
                let name = self.member_name()?;
                expr = self.mk_expr(line, ExprKind::Get { object: Box::new(expr), name });
            } else if self.matches(TokenKind::LeftBracket) {
                let index = self.expression()?;
                self.expect(TokenKind::RightBracket, "']' after index")?;
                expr = self.mk_expr(
                    line,
                    ExprKind::GetIndex { object: Box::new(expr), index: Box::new(index) },
                );
            } else if self.at(TokenKind::Less) {
                // Possibly explicit call type arguments: `f<T>(x)`. The type
                // arguments are discarded; the checker re-infers from the
                // call site.
                let start = self.pos;
                if self.type_args().is_ok() && self.at(TokenKind::LeftParen) {
                    continue;
                }
                self.pos = start;
                break;
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn member_name(&mut self) -> PResult<String> {
        let token = self.peek().clone();
        if token.lexeme.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$') {
            self.advance();
            Ok(token.lexeme)
        } else {
            Err(self.error_expected_member())
        }
    }

    fn error_expected_member(&self) -> tsr_common::Diagnostic {
        tsr_common::Diagnostic::error(
            tsr_common::DiagnosticCode::SyntaxError,
            format!("expected property name after '.', found '{}'", self.peek().lexeme),
            self.peek().span,
        )
    }

    fn call_args(&mut self) -> PResult<Vec<Expr>> {
        let mut args = Vec::new();
        while !self.at(TokenKind::RightParen) {
            if self.at(TokenKind::DotDotDot) {
                let line = self.line();
                self.advance();
                let inner = self.assignment()?;
                args.push(self.mk_expr(line, ExprKind::Spread(Box::new(inner))));
            } else {
                args.push(self.assignment()?);
            }
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightParen, "')' after arguments")?;
        Ok(args)
    }

    fn new_expression(&mut self) -> PResult<Expr> {
        let line = self.line();
        self.advance(); // new
        let mut callee = self.primary()?;
        // Member chain without calls: `new a.b.C(...)`.
        loop {
            if self.matches(TokenKind::Dot) {
                let name = self.member_name()?;
                let member_line = self.previous().line;
                callee = self.mk_expr(member_line, ExprKind::Get { object: Box::new(callee), name });
            } else {
                break;
            }
        }
        if self.at(TokenKind::Less) {
            let start = self.pos;
            if !(self.type_args().is_ok() && self.at(TokenKind::LeftParen)) {
                self.pos = start;
            }
        }
        let args = if self.matches(TokenKind::LeftParen) {
            self.call_args()?
        } else {
            Vec::new()
        };
        let expr = self.mk_expr(line, ExprKind::New { callee: Box::new(callee), args });
        self.finish_postfix(expr)
    }

    // =========================================================================
    // Primary
    // =========================================================================

    fn primary(&mut self) -> PResult<Expr> {
        let line = self.line();
        match self.peek().kind {
            TokenKind::Number => {
                let token = self.advance();
                Ok(self.mk_expr(line, ExprKind::Literal(Literal::Number(token.number_value()))))
            }
            TokenKind::String => {
                let token = self.advance();
                Ok(self.mk_expr(
                    line,
                    ExprKind::Literal(Literal::String(token.string_value().to_string())),
                ))
            }
            TokenKind::BigIntLiteral => {
                let token = self.advance();
                let digits = token.lexeme.trim_end_matches('n').replace('_', "");
                Ok(self.mk_expr(line, ExprKind::Literal(Literal::BigInt(digits))))
            }
            TokenKind::True => {
                self.advance();
                Ok(self.mk_expr(line, ExprKind::Literal(Literal::Boolean(true))))
            }
            TokenKind::False => {
                self.advance();
                Ok(self.mk_expr(line, ExprKind::Literal(Literal::Boolean(false))))
            }
            TokenKind::Null => {
                self.advance();
                Ok(self.mk_expr(line, ExprKind::Literal(Literal::Null)))
            }
            TokenKind::Undefined => {
                self.advance();
                Ok(self.mk_expr(line, ExprKind::Literal(Literal::Undefined)))
            }
            TokenKind::This => {
                self.advance();
                Ok(self.mk_expr(line, ExprKind::This))
            }
            TokenKind::Super => {
                self.advance();
                Ok(self.mk_expr(line, ExprKind::Super))
            }
            TokenKind::Regex => {
                let token = self.advance();
                let lexeme = token.lexeme;
                let close = lexeme.rfind('/').unwrap_or(0);
                let pattern = lexeme[1..close].to_string();
                let flags = lexeme[close + 1..].to_string();
                Ok(self.mk_expr(line, ExprKind::RegexLiteral { pattern, flags }))
            }
            TokenKind::TemplateComplete | TokenKind::TemplateHead => self.template_literal(),
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(TokenKind::RightParen, "')' after expression")?;
                Ok(self.mk_expr(line, ExprKind::Grouping(Box::new(inner))))
            }
            TokenKind::LeftBracket => self.array_literal(),
            TokenKind::LeftBrace => self.object_literal(),
            TokenKind::Function => {
                self.advance();
                self.function_expression(false, line)
            }
            TokenKind::Async if self.peek_ahead(1).kind == TokenKind::Function => {
                self.advance();
                self.advance();
                self.function_expression(true, line)
            }
            TokenKind::New => self.new_expression(),
            TokenKind::Import if self.peek_ahead(1).kind == TokenKind::LeftParen => {
                self.advance();
                self.advance();
                let arg = self.expression()?;
                self.expect(TokenKind::RightParen, "')' after import argument")?;
                Ok(self.mk_expr(line, ExprKind::DynamicImport(Box::new(arg))))
            }
            _ if self.at_ident() => {
                let name = self.advance().lexeme;
                Ok(self.mk_expr(line, ExprKind::Variable(name)))
            }
            _ => Err(self.error_primary()),
        }
    }

    fn error_primary(&self) -> tsr_common::Diagnostic {
        tsr_common::Diagnostic::error(
            tsr_common::DiagnosticCode::SyntaxError,
            format!("unexpected token '{}'", self.peek().lexeme),
            self.peek().span,
        )
    }

    fn function_expression(&mut self, is_async: bool, line: u32) -> PResult<Expr> {
        let is_generator = self.matches(TokenKind::Star);
        let name = if self.at_ident() { Some(self.advance().lexeme) } else { None };
        let type_params = self.type_params_opt()?;
        let (params, prologue) = self.param_list(false)?;
        let return_type = if self.matches(TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        let (body, is_strict) = self.function_body(prologue, &params)?;
        let decl = Rc::new(FunctionDecl {
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
        });
        Ok(self.mk_expr(line, ExprKind::ArrowFunction(decl)))
    }

    fn template_literal(&mut self) -> PResult<Expr> {
        let line = self.line();
        let head = self.advance();
        if head.kind == TokenKind::TemplateComplete {
            return Ok(self.mk_expr(
                line,
                ExprKind::TemplateLiteral {
                    strings: vec![head.string_value().to_string()],
                    exprs: Vec::new(),
                },
            ));
        }
        let mut strings = vec![head.string_value().to_string()];
        let mut exprs = Vec::new();
        loop {
            exprs.push(self.expression()?);
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
                _ => return Err(self.error_primary()),
            }
        }
        Ok(self.mk_expr(line, ExprKind::TemplateLiteral { strings, exprs }))
    }

    fn array_literal(&mut self) -> PResult<Expr> {
        let line = self.line();
        self.advance(); // [
        let mut elements = Vec::new();
        while !self.at(TokenKind::RightBracket) {
            if self.at(TokenKind::Comma) {
                // Elision: hole reads as undefined.
                self.advance();
                let hole = self.mk_expr(line, ExprKind::Literal(Literal::Undefined));
                elements.push(hole);
                continue;
            }
            if self.at(TokenKind::DotDotDot) {
                let spread_line = self.line();
                self.advance();
                let inner = self.assignment()?;
                elements.push(self.mk_expr(spread_line, ExprKind::Spread(Box::new(inner))));
            } else {
                elements.push(self.assignment()?);
            }
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightBracket, "']' to close array literal")?;
        Ok(self.mk_expr(line, ExprKind::ArrayLiteral(elements)))
    }

    fn object_literal(&mut self) -> PResult<Expr> {
        let line = self.line();
        self.advance(); // {
        let mut props = Vec::new();
        while !self.at(TokenKind::RightBrace) {
            if self.at(TokenKind::DotDotDot) {
                self.advance();
                let inner = self.assignment()?;
                props.push(ObjectProp::Spread(inner));
            } else {
                props.push(self.object_entry()?);
            }
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightBrace, "'}' to close object literal")?;
        Ok(self.mk_expr(line, ExprKind::ObjectLiteral(props)))
    }

    fn object_entry(&mut self) -> PResult<ObjectProp> {
        let entry_line = self.line();

        let is_async = self.at(TokenKind::Async)
            && !matches!(self.peek_ahead(1).kind, TokenKind::Colon | TokenKind::Comma | TokenKind::RightBrace | TokenKind::LeftParen)
            && { self.advance(); true };
        let is_generator = self.matches(TokenKind::Star);

        let key = if self.at(TokenKind::LeftBracket) {
            self.advance();
            let key_expr = self.assignment()?;
            self.expect(TokenKind::RightBracket, "']' after computed key")?;
            PropKey::Computed(Box::new(key_expr))
        } else {
            PropKey::Static(self.object_key_name()?)
        };

        // Method.
        if self.at(TokenKind::LeftParen) || self.at(TokenKind::Less) {
            let type_params = self.type_params_opt()?;
            let _ = type_params;
            let (params, prologue) = self.param_list(false)?;
            let return_type = if self.matches(TokenKind::Colon) {
                Some(self.parse_type()?)
            } else {
                None
            };
            let (body, is_strict) = self.function_body(prologue, &params)?;
            let name = match &key {
                PropKey::Static(s) => Some(s.clone()),
                PropKey::Computed(_) => None,
            };
            let decl = Rc::new(FunctionDecl {
                name,
                type_params: Vec::new(),
                params,
                return_type,
                body: Some(body),
                is_async,
                is_generator,
                is_arrow: false,
                is_strict,
                line: entry_line,
            });
            let value = self.mk_expr(entry_line, ExprKind::ArrowFunction(decl));
            return Ok(ObjectProp::Entry { key, value });
        }

        if is_async || is_generator {
            return Err(self.error_primary());
        }

        // `key: value`.
        if self.matches(TokenKind::Colon) {
            let value = self.assignment()?;
            return Ok(ObjectProp::Entry { key, value });
        }

        // Shorthand.
        match &key {
            PropKey::Static(name) => {
                let value = self.mk_expr(entry_line, ExprKind::Variable(name.clone()));
                Ok(ObjectProp::Entry { key, value })
            }
            PropKey::Computed(_) => Err(self.error_primary()),
        }
    }

    fn object_key_name(&mut self) -> PResult<String> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::String => {
                self.advance();
                Ok(token.string_value().to_string())
            }
            TokenKind::Number => {
                self.advance();
                Ok(number_to_key(token.number_value()))
            }
            _ if token.lexeme.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$') => {
                self.advance();
                Ok(token.lexeme)
            }
            _ => Err(self.error_primary()),
        }
    }
}

fn plain_param(name: String) -> Param {
    Param {
        name,
        type_ann: None,
        default: None,
        is_rest: false,
        optional: false,
        access: None,
        readonly: false,
    }
}
